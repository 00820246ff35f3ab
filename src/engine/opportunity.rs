//! Opportunity scoring for spot/perpetual funding arbitrage

use serde::{Deserialize, Serialize};

/// Funding settlements per day (one every 8 hours)
const SETTLEMENTS_PER_DAY: f64 = 3.0;

/// Reference notional used for the projected-profit ranking signal
const REFERENCE_NOTIONAL: f64 = 100.0;

/// A scored arbitrage candidate, recomputed on every scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Trading symbol
    pub symbol: String,
    /// Current spot price
    pub spot_price: f64,
    /// Current perpetual-futures price
    pub futures_price: f64,
    /// Funding rate, fraction per 8h period
    pub funding_rate: f64,
    /// Absolute spot/futures spread
    pub spread: f64,
    /// Spread as a percentage of the spot price
    pub spread_pct: f64,
    /// Projected daily funding profit on the reference notional.
    /// A relative ranking signal, not a dollar forecast.
    pub projected_daily_profit: f64,
    /// Composite risk score in [0, 1]; lower is safer
    pub risk_score: f64,
    /// Capture timestamp, unix seconds
    pub timestamp: i64,
}

impl Opportunity {
    /// Score a symbol from its current quotes
    pub fn from_quotes(symbol: &str, spot_price: f64, futures_price: f64, funding_rate: f64) -> Self {
        let spread = futures_price - spot_price;
        let spread_pct = spread / spot_price * 100.0;
        let projected_daily_profit = funding_rate * SETTLEMENTS_PER_DAY * REFERENCE_NOTIONAL;

        Self {
            symbol: symbol.to_string(),
            spot_price,
            futures_price,
            funding_rate,
            spread,
            spread_pct,
            projected_daily_profit,
            risk_score: risk_score(spread_pct, funding_rate),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Composite risk score in [0, 1].
///
/// Price-divergence risk saturates at a 2% spread; a negative funding rate
/// adds funding risk proportional to its magnitude.
pub fn risk_score(spread_pct: f64, funding_rate: f64) -> f64 {
    let price_risk = (spread_pct.abs() / 2.0).min(1.0);
    let funding_risk = (-funding_rate * 100.0).max(0.0);
    (price_risk * 0.7 + funding_risk * 0.3).min(1.0)
}
