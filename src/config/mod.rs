//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::{ArbitrageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Bybit API hosts
const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const DEMO_URL: &str = "https://api-demo.bybit.com";

/// Main configuration structure for the funding-arbitrage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Exchange API configuration
    pub api: ApiConfig,
    /// Strategy configuration
    pub strategy: StrategyConfig,
    /// Fee schedule
    pub fees: FeeConfig,
    /// Trading-rules provider configuration
    pub rules: RulesConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

/// Exchange API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key (supports ${VAR} expansion)
    pub api_key: String,
    /// Secret key (supports ${VAR} expansion)
    pub secret_key: String,
    /// Use the testnet host
    pub testnet: bool,
    /// Use the demo-trading host (takes precedence over testnet)
    pub demo: bool,
    /// Request receive window in milliseconds
    pub recv_window_ms: u64,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    /// REST API base URL for the configured account mode
    pub fn rest_url(&self) -> String {
        if self.demo {
            DEMO_URL.to_string()
        } else if self.testnet {
            TESTNET_URL.to_string()
        } else {
            MAINNET_URL.to_string()
        }
    }
}

/// Strategy-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum funding rate for a scan hit (fraction per 8h period)
    pub min_funding_rate: f64,
    /// Maximum position size in quote units
    pub max_position_size: f64,
    /// Quote asset all pairs settle in
    pub quote_asset: String,
    /// Symbol universe scanned for opportunities
    pub symbols: Vec<String>,
}

/// Fee schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Spot taker fee rate
    pub spot_fee_rate: f64,
    /// Derivatives taker fee rate for market orders
    pub futures_fee_rate: f64,
}

/// Trading-rules provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Cache time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Safety margin applied to minimum investment figures
    pub safety_margin: f64,
    /// Per-symbol minimum-quantity overrides observed on the demo environment
    #[serde(default)]
    pub demo_min_qty: HashMap<String, f64>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable the Prometheus metrics exporter
    pub enable_metrics: bool,
    /// Metrics exporter port
    pub metrics_port: u16,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ArbitrageError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: EngineConfig = toml::from_str(&content)
            .map_err(|e| ArbitrageError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. Environment overrides for credentials are applied
    /// either way.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.strategy.min_funding_rate < 0.0 {
            return Err(
                ArbitrageError::Config("Minimum funding rate cannot be negative".to_string())
                    .into(),
            );
        }

        ConfigValidator::validate_positive(self.strategy.max_position_size, "max_position_size")?;
        ConfigValidator::validate_symbol(&self.strategy.quote_asset)?;

        if self.strategy.symbols.is_empty() {
            return Err(
                ArbitrageError::Config("At least one symbol must be configured".to_string()).into(),
            );
        }
        for symbol in &self.strategy.symbols {
            ConfigValidator::validate_symbol(symbol)?;
        }

        ConfigValidator::validate_rate(self.fees.spot_fee_rate, "spot_fee_rate")?;
        ConfigValidator::validate_rate(self.fees.futures_fee_rate, "futures_fee_rate")?;

        if self.rules.safety_margin < 1.0 {
            return Err(
                ArbitrageError::Config("Safety margin must be at least 1.0".to_string()).into(),
            );
        }
        if self.rules.cache_ttl_secs == 0 {
            return Err(
                ArbitrageError::Config("Rules cache TTL must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Expand ${VAR} references in credential fields
    fn expand_env_vars(&mut self) -> Result<()> {
        self.api.api_key = EnvExpander::expand(&self.api.api_key)?;
        self.api.secret_key = EnvExpander::expand(&self.api.secret_key)?;
        Ok(())
    }

    /// Apply plain environment overrides for credentials when present
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("BYBIT_API_KEY") {
            self.api.api_key = key;
        }
        if let Ok(secret) = std::env::var("BYBIT_SECRET_KEY") {
            self.api.secret_key = secret;
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                api_key: String::new(),
                secret_key: String::new(),
                testnet: false,
                demo: true,
                recv_window_ms: ConfigDefaults::RECV_WINDOW_MS,
                request_timeout_secs: ConfigDefaults::REQUEST_TIMEOUT_SECS,
            },
            strategy: StrategyConfig {
                min_funding_rate: ConfigDefaults::MIN_FUNDING_RATE,
                max_position_size: ConfigDefaults::MAX_POSITION_SIZE,
                quote_asset: "USDT".to_string(),
                symbols: vec![
                    "BTCUSDT".to_string(),
                    "ETHUSDT".to_string(),
                    "SOLUSDT".to_string(),
                    "ADAUSDT".to_string(),
                    "DOTUSDT".to_string(),
                    "LINKUSDT".to_string(),
                    "UNIUSDT".to_string(),
                    "LTCUSDT".to_string(),
                    "BCHUSDT".to_string(),
                    "XRPUSDT".to_string(),
                    "AVAXUSDT".to_string(),
                    "ATOMUSDT".to_string(),
                    "NEARUSDT".to_string(),
                ],
            },
            fees: FeeConfig {
                spot_fee_rate: ConfigDefaults::SPOT_FEE_RATE,
                futures_fee_rate: ConfigDefaults::FUTURES_FEE_RATE,
            },
            rules: RulesConfig {
                cache_ttl_secs: ConfigDefaults::RULES_CACHE_TTL_SECS,
                safety_margin: ConfigDefaults::SAFETY_MARGIN,
                demo_min_qty: HashMap::from([
                    ("BTCUSDT".to_string(), 5.0),
                    ("ETHUSDT".to_string(), 5.0),
                    ("SOLUSDT".to_string(), 5.0),
                    ("ADAUSDT".to_string(), 10.0),
                    ("XRPUSDT".to_string(), 10.0),
                    ("NEARUSDT".to_string(), 10.0),
                ]),
            },
            monitoring: MonitoringConfig {
                enable_metrics: false,
                metrics_port: 9184,
            },
        }
    }
}
