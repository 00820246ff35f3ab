//! Exchange transport trait and common types

use super::Market;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handle to an exchange transport implementation
pub type SharedTransport = Arc<dyn ExchangeTransport + Send + Sync>;

/// Capability contract executed by the transport collaborator.
///
/// The engine consumes only this trait: every call blocks the caller until the
/// exchange answers or the transport fails, and a non-zero exchange return
/// code surfaces as an error carrying the exchange-provided message.
#[async_trait]
pub trait ExchangeTransport {
    /// Get the current ticker for a symbol on the given market
    async fn get_ticker(&self, market: Market, symbol: &str) -> Result<Ticker>;

    /// Get per-instrument trading constraints for a symbol on the given market
    async fn get_instrument_rules(&self, market: Market, symbol: &str) -> Result<InstrumentRules>;

    /// Place an order; returns the exchange order id on acceptance
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Cancel an open order
    async fn cancel_order(&self, symbol: &str, order_id: &str, market: Market) -> Result<()>;

    /// Set the leverage multiplier for a symbol on a derivatives market
    async fn set_leverage(&self, symbol: &str, leverage: u32, market: Market) -> Result<()>;

    /// Get open positions on a derivatives market
    async fn get_positions(&self, market: Market) -> Result<Vec<FuturesPosition>>;

    /// Get wallet balances across all assets
    async fn get_wallet_balances(&self) -> Result<Vec<WalletBalance>>;
}

/// Ticker snapshot for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    /// Trading symbol
    pub symbol: String,
    /// Last traded price
    pub last_price: f64,
    /// Current funding rate (derivatives markets only)
    pub funding_rate: Option<f64>,
    /// Next funding settlement time, unix milliseconds (derivatives only)
    pub next_funding_time: Option<i64>,
}

/// Per-instrument trading constraints for one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentRules {
    /// Minimum order quantity in base units
    pub min_order_qty: f64,
    /// Maximum order quantity in base units
    pub max_order_qty: f64,
    /// Quantity step size; order quantities must be a multiple of this
    pub qty_step: f64,
    /// Minimum order notional in quote units
    pub min_order_amt: f64,
    /// Maximum order notional in quote units
    pub max_order_amt: f64,
    /// Price decimal precision
    pub price_precision: u32,
    /// Quantity decimal precision
    pub qty_precision: u32,
    /// Maximum leverage (derivatives markets only)
    pub max_leverage: Option<f64>,
    /// Instrument trading status as reported by the exchange
    pub status: String,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// Order sizing: base-asset quantity or quote-asset amount.
///
/// Spot market buys are sized by quote amount; everything else is sized by
/// base quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderQty {
    /// Quantity in base units
    Base(f64),
    /// Amount in quote units
    Quote(f64),
}

impl OrderQty {
    /// Numeric value regardless of unit
    pub fn value(&self) -> f64 {
        match self {
            OrderQty::Base(v) | OrderQty::Quote(v) => *v,
        }
    }
}

/// Market order request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Trading symbol
    pub symbol: String,
    /// Order side
    pub side: OrderSide,
    /// Order size
    pub qty: OrderQty,
    /// Target market
    pub market: Market,
}

impl OrderRequest {
    /// Market order sized by base quantity
    pub fn market_base(symbol: &str, side: OrderSide, qty: f64, market: Market) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            qty: OrderQty::Base(qty),
            market,
        }
    }

    /// Market order sized by quote amount
    pub fn market_quote(symbol: &str, side: OrderSide, amount: f64, market: Market) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            qty: OrderQty::Quote(amount),
            market,
        }
    }
}

/// Order acceptance response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Exchange order id
    pub order_id: String,
}

/// Externally reported derivatives position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesPosition {
    /// Trading symbol
    pub symbol: String,
    /// Position size in base units (unsigned; see `side`)
    pub size: f64,
    /// Position side
    pub side: OrderSide,
    /// Average entry price
    pub avg_price: f64,
    /// Unrealized profit and loss
    pub unrealized_pnl: f64,
}

impl FuturesPosition {
    /// Signed position size: negative denotes a short
    pub fn signed_size(&self) -> f64 {
        match self.side {
            OrderSide::Buy => self.size,
            OrderSide::Sell => -self.size,
        }
    }
}

/// Wallet balance for one asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Asset symbol, e.g. "BTC"
    pub asset: String,
    /// Wallet balance in asset units
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_side_display() {
        assert_eq!(OrderSide::Buy.to_string(), "Buy");
        assert_eq!(OrderSide::Sell.to_string(), "Sell");
    }

    #[test]
    fn test_signed_size() {
        let long = FuturesPosition {
            symbol: "BTCUSDT".to_string(),
            size: 0.5,
            side: OrderSide::Buy,
            avg_price: 60000.0,
            unrealized_pnl: 0.0,
        };
        let short = FuturesPosition {
            side: OrderSide::Sell,
            ..long.clone()
        };
        assert_eq!(long.signed_size(), 0.5);
        assert_eq!(short.signed_size(), -0.5);
    }

    #[test]
    fn test_order_qty_value() {
        assert_eq!(OrderQty::Base(0.25).value(), 0.25);
        assert_eq!(OrderQty::Quote(500.0).value(), 500.0);
    }

    #[test]
    fn test_order_request_constructors() {
        let buy = OrderRequest::market_quote("BTCUSDT", OrderSide::Buy, 500.0, Market::Spot);
        assert_eq!(buy.qty, OrderQty::Quote(500.0));
        assert_eq!(buy.market, Market::Spot);

        let sell = OrderRequest::market_base("BTCUSDT", OrderSide::Sell, 0.01, Market::Linear);
        assert_eq!(sell.qty, OrderQty::Base(0.01));
        assert_eq!(sell.side, OrderSide::Sell);
    }
}
