//! Exchange transport implementations

pub mod bybit;
pub mod traits;

pub use bybit::BybitTransport;
pub use traits::*;

use crate::ArbitrageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market category on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Spot market
    Spot,
    /// USDT-settled linear perpetual market
    Linear,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Spot => write!(f, "spot"),
            Market::Linear => write!(f, "linear"),
        }
    }
}

impl std::str::FromStr for Market {
    type Err = ArbitrageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(Market::Spot),
            "linear" => Ok(Market::Linear),
            _ => Err(ArbitrageError::Config(format!("Unknown market: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_from_str() {
        assert_eq!("spot".parse::<Market>().unwrap(), Market::Spot);
        assert_eq!("linear".parse::<Market>().unwrap(), Market::Linear);
        assert_eq!("LINEAR".parse::<Market>().unwrap(), Market::Linear);
        assert!("margin".parse::<Market>().is_err());
    }

    #[test]
    fn test_market_display() {
        assert_eq!(Market::Spot.to_string(), "spot");
        assert_eq!(Market::Linear.to_string(), "linear");
    }
}
