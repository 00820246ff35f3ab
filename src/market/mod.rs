//! Market data access for spot prices, futures prices and funding rates

use crate::exchange::{Market, SharedTransport};
use tracing::{debug, warn};

/// Quote suffix used by the traded pairs
const QUOTE_SUFFIX: &str = "USDT";

/// Funding-rate queries use the exchange's PERP ticker format,
/// e.g. BTCUSDT -> BTCPERP
fn perp_symbol(symbol: &str) -> String {
    match symbol.strip_suffix(QUOTE_SUFFIX) {
        Some(base) => format!("{}PERP", base),
        None => symbol.to_string(),
    }
}

/// Ensure the symbol carries the quote suffix, e.g. BTC -> BTCUSDT
fn normalize_symbol(symbol: &str) -> String {
    if symbol.ends_with(QUOTE_SUFFIX) {
        symbol.to_string()
    } else {
        format!("{}{}", symbol, QUOTE_SUFFIX)
    }
}

/// Read accessor for current market data.
///
/// Every read soft-fails to `None` on transport errors or malformed payloads
/// so a scan over many symbols can skip individual symbols without aborting.
pub struct MarketData {
    transport: SharedTransport,
}

impl MarketData {
    /// Create a new market data accessor
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport }
    }

    /// Current spot last price, or `None` when unavailable
    pub async fn spot_price(&self, symbol: &str) -> Option<f64> {
        let symbol = normalize_symbol(symbol);
        match self.transport.get_ticker(Market::Spot, &symbol).await {
            Ok(ticker) => Some(ticker.last_price),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch spot price");
                None
            }
        }
    }

    /// Current perpetual-futures last price, or `None` when unavailable
    pub async fn futures_price(&self, symbol: &str) -> Option<f64> {
        let symbol = normalize_symbol(symbol);
        match self.transport.get_ticker(Market::Linear, &symbol).await {
            Ok(ticker) => Some(ticker.last_price),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch futures price");
                None
            }
        }
    }

    /// Current funding rate (fraction per 8h period), or `None` when unavailable
    pub async fn funding_rate(&self, symbol: &str) -> Option<f64> {
        let query_symbol = perp_symbol(symbol);
        match self.transport.get_ticker(Market::Linear, &query_symbol).await {
            Ok(ticker) => {
                let rate = ticker.funding_rate?;
                if let Some(next_funding_ms) = ticker.next_funding_time {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let hours_to_next = (next_funding_ms - now_ms) as f64 / 3_600_000.0;
                    debug!(symbol = %symbol, rate = rate, hours_to_next = hours_to_next, "Funding rate");
                }
                Some(rate)
            }
            Err(e) => {
                warn!(symbol = %symbol, perp = %query_symbol, error = %e, "Failed to fetch funding rate");
                None
            }
        }
    }
}
