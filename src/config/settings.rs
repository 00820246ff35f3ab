//! Settings management utilities

use crate::{ArbitrageError, Result};
use std::env;

/// Environment variable expansion utility
pub struct EnvExpander;

impl EnvExpander {
    /// Expand environment variables in a string
    /// Supports the ${VAR_NAME} pattern
    pub fn expand(input: &str) -> Result<String> {
        let mut result = input.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let var_value = env::var(var_name).map_err(|_| {
                    ArbitrageError::Config(format!("Environment variable '{}' not found", var_name))
                })?;

                result.replace_range(start..start + end + 1, &var_value);
            } else {
                return Err(ArbitrageError::Config(
                    "Unclosed environment variable reference".to_string(),
                )
                .into());
            }
        }

        Ok(result)
    }
}

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a symbol format
    pub fn validate_symbol(symbol: &str) -> Result<()> {
        if symbol.is_empty() {
            return Err(ArbitrageError::Config("Symbol cannot be empty".to_string()).into());
        }

        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ArbitrageError::Config(
                "Symbol must contain only alphanumeric characters".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validate a fee or rate value (0.0 inclusive to 1.0 exclusive)
    pub fn validate_rate(value: f64, name: &str) -> Result<()> {
        if !(0.0..1.0).contains(&value) {
            return Err(ArbitrageError::Config(format!("{} must be in [0.0, 1.0)", name)).into());
        }
        Ok(())
    }

    /// Validate a positive value
    pub fn validate_positive(value: f64, name: &str) -> Result<()> {
        if value <= 0.0 {
            return Err(ArbitrageError::Config(format!("{} must be positive", name)).into());
        }
        Ok(())
    }
}

/// Configuration defaults
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// Minimum funding rate worth acting on (0.01% per 8h period)
    pub const MIN_FUNDING_RATE: f64 = 0.0001;

    /// Maximum position size in quote units
    pub const MAX_POSITION_SIZE: f64 = 1000.0;

    /// Spot taker fee rate (0.1%)
    pub const SPOT_FEE_RATE: f64 = 0.001;

    /// Derivatives taker fee rate for market orders (0.055%)
    pub const FUTURES_FEE_RATE: f64 = 0.00055;

    /// Trading-rules cache time-to-live in seconds
    pub const RULES_CACHE_TTL_SECS: u64 = 3600;

    /// Safety margin applied to minimum investment figures
    pub const SAFETY_MARGIN: f64 = 1.2;

    /// Request receive window in milliseconds
    pub const RECV_WINDOW_MS: u64 = 5000;

    /// HTTP request timeout in seconds
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_env_expansion() {
        env::set_var("FUNDING_ARB_TEST_VAR", "test_value");

        let input = "prefix_${FUNDING_ARB_TEST_VAR}_suffix";
        let result = EnvExpander::expand(input).unwrap();
        assert_eq!(result, "prefix_test_value_suffix");

        env::remove_var("FUNDING_ARB_TEST_VAR");
    }

    #[test]
    fn test_env_expansion_missing_var() {
        let input = "prefix_${FUNDING_ARB_MISSING_VAR}_suffix";
        let result = EnvExpander::expand(input);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_expansion_unclosed() {
        assert!(EnvExpander::expand("prefix_${UNCLOSED").is_err());
    }

    #[test]
    fn test_symbol_validation() {
        assert!(ConfigValidator::validate_symbol("BTCUSDT").is_ok());
        assert!(ConfigValidator::validate_symbol("").is_err());
        assert!(ConfigValidator::validate_symbol("BTC-USDT").is_err());
    }

    #[test]
    fn test_rate_validation() {
        assert!(ConfigValidator::validate_rate(0.001, "fee").is_ok());
        assert!(ConfigValidator::validate_rate(0.0, "fee").is_ok());
        assert!(ConfigValidator::validate_rate(1.0, "fee").is_err());
        assert!(ConfigValidator::validate_rate(-0.1, "fee").is_err());
    }

    #[test]
    fn test_positive_validation() {
        assert!(ConfigValidator::validate_positive(1.0, "test").is_ok());
        assert!(ConfigValidator::validate_positive(0.0, "test").is_err());
        assert!(ConfigValidator::validate_positive(-1.0, "test").is_err());
    }
}
