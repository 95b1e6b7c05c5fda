//! The four Tool Adapters behind the registry.

pub mod a2a;
pub mod function;
pub mod http;
pub mod mcp;

/// Redacts likely PII (email, phone, card-number, SSN-like patterns)
/// from a value before it is persisted as a trace payload. All
/// adapters redact inputs/outputs before persistence; this applies to
/// log/trace payloads only, the raw values are passed to the
/// downstream endpoint unchanged. Intentionally conservative regexes —
/// false positives (over-redacting) are preferred to false negatives.
pub fn redact_for_trace(text: &str) -> String {
    let mut out = text.to_string();
    out = EMAIL_RE.replace_all(&out, "[redacted-email]").into_owned();
    out = CARD_RE.replace_all(&out, "[redacted-card]").into_owned();
    out = SSN_RE.replace_all(&out, "[redacted-ssn]").into_owned();
    out = PHONE_RE.replace_all(&out, "[redacted-phone]").into_owned();
    out
}

lazy_static::lazy_static! {
    static ref EMAIL_RE: regex::Regex =
        regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref CARD_RE: regex::Regex =
        regex::Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap();
    static ref SSN_RE: regex::Regex =
        regex::Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref PHONE_RE: regex::Regex =
        regex::Regex::new(r"\b\+?1?[ -]?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b").unwrap();
}
