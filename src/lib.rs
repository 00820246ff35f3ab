//! Funding-Rate Arbitrage Engine
//!
//! A cash-and-carry arbitrage system for Bybit: buy spot, short the matching
//! linear perpetual, collect the periodic funding payment while the hedge is
//! open, then unwind both legs and account for fees and funding income.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod exchange;
pub mod market;
pub mod rules;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{ArbitrageEngine, Opportunity, Position, TradingResult};
pub use exchange::{BybitTransport, ExchangeTransport, Market};
pub use rules::TradingRulesManager;

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the arbitrage system
#[derive(thiserror::Error, Debug)]
pub enum ArbitrageError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection/transport error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    DataParsing(String),

    /// Order parameter validation error, rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-zero response code from the exchange
    #[error("Exchange error {code}: {message}")]
    Exchange {
        /// Exchange-reported return code
        code: i64,
        /// Exchange-reported message
        message: String,
    },

    /// Trading error
    #[error("Trading error: {0}")]
    Trading(String),
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
