//! Cost accounting.
//!
//! `costUSD = price(model,in)·tokensIn + price(model,out)·tokensOut`,
//! read from the operator-provided [`RuntimeConfig::price_table`].
//! Unknown models cost 0 rather than erroring — an explicit choice,
//! not an oversight.

use crate::core::config::RuntimeConfig;

pub fn cost_usd(config: &RuntimeConfig, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match config.price_table.get(model) {
        Some(price) => {
            (input_tokens as f64 / 1000.0) * price.in_per_1k
                + (output_tokens as f64 / 1000.0) * price.out_per_1k
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ModelPrice;

    #[test]
    fn known_model_is_priced() {
        let mut config = RuntimeConfig::default();
        config.price_table.insert(
            "gpt-4o".to_string(),
            ModelPrice {
                in_per_1k: 0.005,
                out_per_1k: 0.015,
            },
        );
        let cost = cost_usd(&config, "gpt-4o", 2000, 1000);
        assert!((cost - (0.01 + 0.015)).abs() < 1e-9);
    }

    #[test]
    fn unregistered_model_costs_nothing() {
        let config = RuntimeConfig::default();
        assert_eq!(cost_usd(&config, "mystery-model", 500, 500), 0.0);
    }
}
