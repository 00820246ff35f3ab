//! In-memory position bookkeeping and external-state reconciliation

use crate::exchange::{FuturesPosition, WalletBalance};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Open hedge position for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Trading symbol
    pub symbol: String,
    /// Spot quantity held, non-negative
    pub spot_qty: f64,
    /// Futures quantity, signed; negative denotes a short
    pub futures_qty: f64,
    /// Spot entry average price
    pub spot_avg_price: f64,
    /// Futures entry average price
    pub futures_avg_price: f64,
    /// Leverage multiplier used at entry
    pub leverage: u32,
    /// Total investment at entry in quote units
    pub total_investment: f64,
    /// Spot-leg investment at entry
    pub spot_investment: f64,
    /// Futures-leg margin at entry
    pub futures_investment: f64,
    /// Cumulative funding paid
    pub funding_paid: f64,
    /// Unrealized P&L as last reported by the exchange
    pub unrealized_pnl: f64,
    /// Entry timestamp, unix seconds
    pub entry_time: i64,
}

impl Position {
    /// Combined notional of both legs at their entry prices
    pub fn market_value(&self) -> f64 {
        self.spot_qty * self.spot_avg_price + self.futures_qty.abs() * self.futures_avg_price
    }
}

/// Immutable record of a closed hedge position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Trading symbol
    pub symbol: String,
    /// Spot quantity held at entry
    pub spot_qty: f64,
    /// Futures quantity at entry (signed)
    pub futures_qty: f64,
    /// Spot entry average price
    pub spot_avg_price: f64,
    /// Futures entry average price
    pub futures_avg_price: f64,
    /// Spot quantity sold at close
    pub close_spot_qty: f64,
    /// Futures quantity covered at close
    pub close_futures_qty: f64,
    /// Spot price at close
    pub close_spot_price: f64,
    /// Futures price at close
    pub close_futures_price: f64,
    /// Total realized P&L including fees and estimated funding income
    pub total_pnl: f64,
    /// Entry timestamp, unix seconds
    pub entry_time: i64,
    /// Close timestamp, unix seconds
    pub close_time: i64,
    /// Leverage multiplier used at entry
    pub leverage: u32,
    /// Total investment at entry
    pub total_investment: f64,
    /// Spot-leg investment at entry
    pub spot_investment: f64,
    /// Futures-leg margin at entry
    pub futures_investment: f64,
    /// Cumulative funding paid while open
    pub funding_paid: f64,
}

/// Live position map plus append-only close history.
///
/// Owned exclusively by the engine; reconciliation is the single merge point
/// between local bookkeeping and exchange-reported state.
#[derive(Debug, Default)]
pub struct PositionLedger {
    open: HashMap<String, Position>,
    closed: Vec<ClosedPosition>,
}

impl PositionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Open position for a symbol, if any
    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.open.get(symbol)
    }

    /// Store an open position, replacing any existing record for the symbol
    pub fn insert(&mut self, position: Position) {
        self.open.insert(position.symbol.clone(), position);
    }

    /// Remove the open position for a symbol
    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.open.remove(symbol)
    }

    /// Number of open positions
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Iterate over open positions
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    /// Append a closed-position record to history
    pub fn push_closed(&mut self, closed: ClosedPosition) {
        self.closed.push(closed);
    }

    /// Closed-position history, in close order
    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed
    }

    /// Rebuild the live map from exchange-reported state.
    ///
    /// Precedence: futures size, average price and unrealized P&L always come
    /// from the exchange; entry bookkeeping (investments, entry time, leverage)
    /// survives from the local record when one exists; spot quantity is
    /// inferred from wallet balances and is not authoritative. A futures
    /// position unknown locally is adopted with a zero spot leg; a local
    /// record with no exchange-side futures position does not survive unless a
    /// wallet balance still references its symbol.
    pub fn reconcile(
        &mut self,
        futures: Vec<FuturesPosition>,
        balances: Vec<WalletBalance>,
        quote_asset: &str,
    ) {
        let mut rebuilt: HashMap<String, Position> = HashMap::new();

        for reported in futures.into_iter().filter(|p| p.size > 0.0) {
            let position = match self.open.get(&reported.symbol) {
                Some(local) => {
                    let mut updated = local.clone();
                    updated.futures_qty = reported.signed_size();
                    updated.futures_avg_price = reported.avg_price;
                    updated.unrealized_pnl = reported.unrealized_pnl;
                    updated
                }
                None => {
                    debug!(symbol = %reported.symbol, "Adopting externally opened futures position");
                    Position {
                        symbol: reported.symbol.clone(),
                        spot_qty: 0.0,
                        futures_qty: reported.signed_size(),
                        spot_avg_price: 0.0,
                        futures_avg_price: reported.avg_price,
                        leverage: 1,
                        total_investment: 0.0,
                        spot_investment: 0.0,
                        futures_investment: 0.0,
                        funding_paid: 0.0,
                        unrealized_pnl: reported.unrealized_pnl,
                        entry_time: chrono::Utc::now().timestamp(),
                    }
                }
            };
            rebuilt.insert(reported.symbol, position);
        }

        for balance in balances {
            if balance.asset == quote_asset || balance.balance <= 0.0 {
                continue;
            }
            let symbol = format!("{}{}", balance.asset, quote_asset);
            if let Some(position) = rebuilt.get_mut(&symbol) {
                position.spot_qty = balance.balance;
            } else if let Some(local) = self.open.get(&symbol) {
                let mut carried = local.clone();
                carried.spot_qty = balance.balance;
                rebuilt.insert(symbol, carried);
            }
        }

        self.open = rebuilt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderSide;

    fn local_position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            spot_qty: 0.5,
            futures_qty: -0.5,
            spot_avg_price: 3000.0,
            futures_avg_price: 3010.0,
            leverage: 2,
            total_investment: 3000.0,
            spot_investment: 1500.0,
            futures_investment: 750.0,
            funding_paid: 1.25,
            unrealized_pnl: 0.0,
            entry_time: 1_700_000_000,
        }
    }

    fn reported(symbol: &str, size: f64, avg_price: f64, upnl: f64) -> FuturesPosition {
        FuturesPosition {
            symbol: symbol.to_string(),
            size,
            side: OrderSide::Sell,
            avg_price,
            unrealized_pnl: upnl,
        }
    }

    #[test]
    fn test_reconcile_overwrites_futures_keeps_entry_bookkeeping() {
        let mut ledger = PositionLedger::new();
        ledger.insert(local_position("ETHUSDT"));

        ledger.reconcile(
            vec![reported("ETHUSDT", 0.48, 3012.5, -4.2)],
            vec![WalletBalance {
                asset: "ETH".to_string(),
                balance: 0.49,
            }],
            "USDT",
        );

        let position = ledger.get("ETHUSDT").unwrap();
        assert_eq!(position.futures_qty, -0.48);
        assert_eq!(position.futures_avg_price, 3012.5);
        assert_eq!(position.unrealized_pnl, -4.2);
        assert_eq!(position.spot_qty, 0.49);
        // Local entry bookkeeping survives
        assert_eq!(position.entry_time, 1_700_000_000);
        assert_eq!(position.total_investment, 3000.0);
        assert_eq!(position.leverage, 2);
    }

    #[test]
    fn test_reconcile_adopts_unknown_position() {
        let mut ledger = PositionLedger::new();

        ledger.reconcile(vec![reported("SOLUSDT", 10.0, 150.0, 1.0)], vec![], "USDT");

        let position = ledger.get("SOLUSDT").unwrap();
        assert_eq!(position.futures_qty, -10.0);
        assert_eq!(position.spot_qty, 0.0);
        assert_eq!(position.total_investment, 0.0);
        assert_eq!(position.leverage, 1);
    }

    #[test]
    fn test_reconcile_drops_stale_local_record() {
        let mut ledger = PositionLedger::new();
        ledger.insert(local_position("ETHUSDT"));

        // Exchange reports nothing for the symbol and no wallet balance remains
        ledger.reconcile(vec![], vec![], "USDT");
        assert!(ledger.get("ETHUSDT").is_none());
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_reconcile_carries_spot_only_remainder() {
        let mut ledger = PositionLedger::new();
        ledger.insert(local_position("ETHUSDT"));

        // No futures position, but the wallet still holds the base asset
        ledger.reconcile(
            vec![],
            vec![WalletBalance {
                asset: "ETH".to_string(),
                balance: 0.2,
            }],
            "USDT",
        );

        let position = ledger.get("ETHUSDT").unwrap();
        assert_eq!(position.spot_qty, 0.2);
    }

    #[test]
    fn test_reconcile_ignores_quote_and_zero_balances() {
        let mut ledger = PositionLedger::new();

        ledger.reconcile(
            vec![reported("ETHUSDT", 1.0, 3000.0, 0.0)],
            vec![
                WalletBalance {
                    asset: "USDT".to_string(),
                    balance: 5000.0,
                },
                WalletBalance {
                    asset: "BTC".to_string(),
                    balance: 0.0,
                },
            ],
            "USDT",
        );

        assert_eq!(ledger.open_count(), 1);
        assert_eq!(ledger.get("ETHUSDT").unwrap().spot_qty, 0.0);
        assert!(ledger.get("USDTUSDT").is_none());
    }

    #[test]
    fn test_reconcile_skips_zero_size_positions() {
        let mut ledger = PositionLedger::new();
        ledger.reconcile(vec![reported("ETHUSDT", 0.0, 0.0, 0.0)], vec![], "USDT");
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_market_value() {
        let position = local_position("ETHUSDT");
        // 0.5 * 3000 + 0.5 * 3010
        assert_eq!(position.market_value(), 3005.0);
    }

    #[test]
    fn test_closed_history_append_only() {
        let mut ledger = PositionLedger::new();
        assert!(ledger.closed_positions().is_empty());

        ledger.push_closed(ClosedPosition {
            symbol: "ETHUSDT".to_string(),
            spot_qty: 0.5,
            futures_qty: -0.5,
            spot_avg_price: 3000.0,
            futures_avg_price: 3010.0,
            close_spot_qty: 0.5,
            close_futures_qty: 0.5,
            close_spot_price: 3020.0,
            close_futures_price: 3025.0,
            total_pnl: 2.5,
            entry_time: 1_700_000_000,
            close_time: 1_700_100_000,
            leverage: 2,
            total_investment: 3000.0,
            spot_investment: 1500.0,
            futures_investment: 750.0,
            funding_paid: 0.0,
        });

        assert_eq!(ledger.closed_positions().len(), 1);
        assert_eq!(ledger.closed_positions()[0].total_pnl, 2.5);
    }
}
