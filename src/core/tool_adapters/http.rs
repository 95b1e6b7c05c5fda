//! HTTP/OpenAPI adapter: calls an external REST operation as a tool.
//!
//! The domain allow/deny-list and size/timeout knobs
//! (`allow_domain`/`deny_domain`/`with_timeout`/`with_max_response_size`)
//! generalize a single ad-hoc REST client into a per-`ToolConfig`
//! adapter. Retry uses `backoff`, configured with base 250 ms, factor
//! 2, jitter ±20%, max 3 attempts, idempotent methods and
//! 5xx/connect errors only.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::RetryConfig;
use crate::core::errors::ErrorKind;
use crate::core::model::{ToolConfig, ToolType};
use crate::core::tool_adapters::redact_for_trace;
use crate::core::tool_protocol::{Tool, ToolContext, ToolError, ToolFactory, ToolMetadata, ToolOutput};

const IDEMPOTENT_METHODS: &[Method] = &[Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS];

/// One REST operation, derived from an OpenAPI document at factory
/// time, deriving per-operation callables. This crate accepts the already-parsed
/// shape directly in `ToolConfig::static_config` rather than shipping a
/// full OpenAPI parser, since the concrete external tool endpoints are
/// out of scope — the operator supplies `{method, path,
/// parameters_schema}` and this adapter does the input-validation +
/// retry + invocation.
#[derive(Debug, Clone, serde::Deserialize)]
struct OpenApiOperation {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    parameters_schema: Value,
    #[serde(default)]
    description: String,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpAdapterFactory {
    client: Client,
    retry: RetryConfig,
    allowed_domains: Vec<String>,
    denied_domains: Vec<String>,
    max_response_bytes: usize,
}

impl HttpAdapterFactory {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            retry,
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            max_response_bytes: 1024 * 1024,
        }
    }

    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.push(domain.into());
        self
    }

    pub fn deny_domain(mut self, domain: impl Into<String>) -> Self {
        self.denied_domains.push(domain.into());
        self
    }

    fn domain_allowed(&self, url: &str) -> bool {
        let host = url::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
        let host = match host {
            Some(h) => h,
            None => return false,
        };
        if self.denied_domains.iter().any(|d| host.ends_with(d.as_str())) {
            return false;
        }
        if self.allowed_domains.is_empty() {
            return true;
        }
        self.allowed_domains.iter().any(|d| host.ends_with(d.as_str()))
    }
}

struct HttpTool {
    name: String,
    base_url: String,
    operation: OpenApiOperation,
    client: Client,
    retry: RetryConfig,
    max_response_bytes: usize,
}

#[async_trait]
impl Tool for HttpTool {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        let method: Method = self.operation.method.parse().unwrap_or(Method::GET);
        let url = format!("{}{}", self.base_url, self.operation.path);
        let mut backoff = exponential_backoff(&self.retry);
        let is_idempotent = IDEMPOTENT_METHODS.contains(&method);

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::new(ErrorKind::Cancelled, "cancelled before HTTP attempt"));
            }
            let remaining = ctx.deadline.remaining(&crate::core::ids::SystemClock);
            if remaining.is_zero() {
                return Err(ToolError::new(ErrorKind::Timeout, "deadline exceeded before HTTP attempt"));
            }

            let mut request = self.client.request(method.clone(), &url).timeout(remaining);
            request = if method == Method::GET || method == Method::HEAD {
                request.query(&flatten_to_pairs(&input))
            } else {
                request.json(&input)
            };

            let attempt = request.send().await;
            match attempt {
                Ok(response) => {
                    let status = response.status();
                    if let Some(len) = response.content_length() {
                        if len as usize > self.max_response_bytes {
                            return Err(ToolError::new(
                                ErrorKind::ToolInvocationError,
                                format!("response body too large ({} bytes)", len),
                            ));
                        }
                    }
                    if status.is_success() {
                        let body: Value = response.json().await.unwrap_or(Value::Null);
                        return Ok(ToolOutput::json(body));
                    }
                    if is_idempotent && status.is_server_error() {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(http_status_error(status));
                }
                Err(e) if e.is_connect() && is_idempotent => {
                    if let Some(delay) = backoff.next_backoff() {
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ToolError::new(ErrorKind::ToolInvocationError, redact_for_trace(&e.to_string())));
                }
                Err(e) if e.is_timeout() => {
                    return Err(ToolError::new(ErrorKind::Timeout, "HTTP request timed out"));
                }
                Err(e) => {
                    return Err(ToolError::new(ErrorKind::ToolInvocationError, redact_for_trace(&e.to_string())));
                }
            }
        }
    }

    fn describe(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: self.operation.description.clone(),
            parameters_schema: self.operation.parameters_schema.clone(),
        }
    }

    fn tool_type(&self) -> ToolType {
        ToolType::Http
    }
}

fn http_status_error(status: StatusCode) -> ToolError {
    ToolError::new(ErrorKind::ToolInvocationError, format!("HTTP status {}", status.as_u16()))
}

fn flatten_to_pairs(input: &Value) -> Vec<(String, String)> {
    match input.as_object() {
        Some(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())).or_else(|| Some((k.clone(), v.to_string()))))
            .collect(),
        None => Vec::new(),
    }
}

fn exponential_backoff(retry: &RetryConfig) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(retry.base)
        .with_multiplier(retry.factor)
        .with_randomization_factor(retry.jitter)
        .with_max_elapsed_time(Some(retry.base * (retry.max_attempts + 1)))
        .build()
}

#[async_trait]
impl ToolFactory for HttpAdapterFactory {
    async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        if !self.domain_allowed(&config.target) {
            return Err(ToolError::new(
                ErrorKind::ConfigError,
                format!("domain not allowed for target '{}'", config.target),
            ));
        }
        let operation: OpenApiOperation = serde_json::from_value(config.static_config.clone())
            .map_err(|e| ToolError::new(ErrorKind::ConfigError, format!("invalid OpenAPI operation config: {}", e)))?;
        Ok(Arc::new(HttpTool {
            name: config.name.clone(),
            base_url: config.target.clone(),
            operation,
            client: self.client.clone(),
            retry: self.retry,
            max_response_bytes: self.max_response_bytes,
        }))
    }
}

/// Reasonable default per-call deadline when the caller does not scope
/// one explicitly.
pub const DEFAULT_TOOL_DEADLINE: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_allowlist_rejects_unlisted_domains() {
        let factory = HttpAdapterFactory::new(RetryConfig::default()).allow_domain("api.example.com");
        assert!(factory.domain_allowed("https://api.example.com/data"));
        assert!(!factory.domain_allowed("https://evil.com/data"));
    }

    #[test]
    fn denylist_overrides_allowlist() {
        let factory = HttpAdapterFactory::new(RetryConfig::default()).deny_domain("blocked.com");
        assert!(!factory.domain_allowed("https://blocked.com/data"));
    }

    #[test]
    fn empty_allowlist_permits_anything_not_denied() {
        let factory = HttpAdapterFactory::new(RetryConfig::default());
        assert!(factory.domain_allowed("https://anything.example/data"));
    }
}
