//! Arbitrage engine: scoring, sizing, two-legged execution and P&L

pub mod ledger;
pub mod opportunity;

pub use ledger::{ClosedPosition, Position, PositionLedger};
pub use opportunity::Opportunity;

use crate::{
    config::EngineConfig,
    exchange::{Market, OrderRequest, OrderSide, SharedTransport},
    market::MarketData,
    rules::{quantize, TradingRulesManager, TradingTips},
    ArbitrageError, Result,
};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};

/// Spot residue below this many base units counts as dust when reporting
/// whether a close left anything behind
const SPOT_DUST_THRESHOLD: f64 = 0.001;

/// Uniform result of every mutating trading operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingResult {
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable outcome description
    pub message: String,
    /// Spot order id, when a spot order was accepted
    pub spot_order_id: Option<String>,
    /// Futures order id, when a futures order was accepted
    pub futures_order_id: Option<String>,
    /// Spot quantity filled or sold
    pub spot_qty: f64,
    /// Futures quantity opened or covered
    pub futures_qty: f64,
    /// Spot price used
    pub spot_price: f64,
    /// Futures price used
    pub futures_price: f64,
    /// Total cost of the operation in quote units
    pub total_cost: f64,
}

impl TradingResult {
    /// A failed result carrying only a message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            spot_order_id: None,
            futures_order_id: None,
            spot_qty: 0.0,
            futures_qty: 0.0,
            spot_price: 0.0,
            futures_price: 0.0,
            total_cost: 0.0,
        }
    }
}

/// Aggregate view over open positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsSummary {
    /// Number of open positions
    pub count: usize,
    /// Combined entry-price notional of both legs
    pub total_value: f64,
    /// Sum of exchange-reported unrealized P&L
    pub total_unrealized_pnl: f64,
    /// Sum of funding paid across open positions
    pub total_funding_paid: f64,
    /// Open positions, sorted by symbol
    pub positions: Vec<Position>,
}

/// Aggregate view over closed positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedSummary {
    /// Number of closed positions
    pub count: usize,
    /// Sum of realized P&L
    pub total_pnl: f64,
    /// Sum of entry investments
    pub total_investment: f64,
    /// Close history, in close order
    pub positions: Vec<ClosedPosition>,
}

/// Orchestrates scanning, entry, exit and bookkeeping for one trading session.
///
/// Owns all mutable session state (ledger, rules cache). Mutating operations
/// must not be called concurrently for the same symbol; the engine itself
/// performs every external call sequentially.
pub struct ArbitrageEngine {
    transport: SharedTransport,
    market: MarketData,
    rules: TradingRulesManager,
    ledger: PositionLedger,
    quote_asset: String,
    spot_fee_rate: f64,
    futures_fee_rate: f64,
}

impl ArbitrageEngine {
    /// Create an engine for one trading session
    pub fn new(transport: SharedTransport, config: &EngineConfig) -> Self {
        let market = MarketData::new(transport.clone());
        let rules = TradingRulesManager::new(
            transport.clone(),
            config.rules.clone(),
            config.api.demo,
        );

        Self {
            transport,
            market,
            rules,
            ledger: PositionLedger::new(),
            quote_asset: config.strategy.quote_asset.clone(),
            spot_fee_rate: config.fees.spot_fee_rate,
            futures_fee_rate: config.fees.futures_fee_rate,
        }
    }

    /// Read access to the position ledger
    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Score a single symbol. Yields nothing when any of spot price, futures
    /// price or funding rate is unavailable.
    pub async fn evaluate(&self, symbol: &str) -> Option<Opportunity> {
        let spot_price = self.market.spot_price(symbol).await?;
        let futures_price = self.market.futures_price(symbol).await?;
        let funding_rate = self.market.funding_rate(symbol).await?;

        Some(Opportunity::from_quotes(
            symbol,
            spot_price,
            futures_price,
            funding_rate,
        ))
    }

    /// Evaluate every symbol, keep those with funding rate above the minimum,
    /// sorted descending by projected profit (stable; ties keep input order).
    pub async fn scan(&self, symbols: &[String], min_funding_rate: f64) -> Vec<Opportunity> {
        counter!("funding_arb_scans_total", 1);

        let mut opportunities = Vec::new();
        for symbol in symbols {
            if let Some(opportunity) = self.evaluate(symbol).await {
                if opportunity.funding_rate > min_funding_rate {
                    opportunities.push(opportunity);
                } else {
                    debug!(symbol = %symbol, rate = opportunity.funding_rate, "Funding rate below threshold");
                }
            }
        }

        opportunities.sort_by(|a, b| {
            b.projected_daily_profit
                .partial_cmp(&a.projected_daily_profit)
                .unwrap_or(Ordering::Equal)
        });

        info!(hits = opportunities.len(), scanned = symbols.len(), "Scan complete");
        opportunities
    }

    /// Split a total investment between the two legs.
    ///
    /// The spot leg buys outright with half the capital; the futures leg posts
    /// the other half as margin, which the exchange levers `leverage`x into a
    /// short of roughly the spot quantity. Returns (spot_amount,
    /// futures_margin).
    pub fn calculate_capital_allocation(total_amount: f64, leverage: u32) -> (f64, f64) {
        let spot_amount = total_amount / 2.0;
        let futures_margin = spot_amount / leverage.max(1) as f64;
        (spot_amount, futures_margin)
    }

    /// One-click arbitrage entry: spot market buy plus leveraged futures
    /// market sell, both sized for a full unit-quantity hedge.
    pub async fn enter(&mut self, symbol: &str, total_amount: f64, leverage: u32) -> TradingResult {
        match self.try_enter(symbol, total_amount, leverage).await {
            Ok(result) => result,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Entry failed");
                TradingResult::failure(format!("Entry failed: {}", e))
            }
        }
    }

    async fn try_enter(
        &mut self,
        symbol: &str,
        total_amount: f64,
        leverage: u32,
    ) -> Result<TradingResult> {
        let tips = self.rules.trading_tips(symbol).await;

        let max_leverage = tips.linear.max_leverage.unwrap_or(1.0);
        if leverage < 1 || leverage as f64 > max_leverage {
            return Err(ArbitrageError::Validation(format!(
                "Leverage must be between 1 and {}, got {}",
                max_leverage, leverage
            ))
            .into());
        }

        if total_amount < tips.min_investment {
            return Err(ArbitrageError::Validation(format!(
                "Investment {:.2} below minimum {:.2}",
                total_amount, tips.min_investment
            ))
            .into());
        }

        let (spot_amount, futures_margin) = Self::calculate_capital_allocation(total_amount, leverage);

        let spot_price = self
            .market
            .spot_price(symbol)
            .await
            .ok_or_else(|| ArbitrageError::Trading(format!("Spot price unavailable for {}", symbol)))?;
        let futures_price = self.market.futures_price(symbol).await.ok_or_else(|| {
            ArbitrageError::Trading(format!("Futures price unavailable for {}", symbol))
        })?;

        let spot_qty = quantize(
            spot_amount / spot_price,
            tips.spot.qty_step,
            tips.spot.qty_precision,
        );
        let futures_qty = quantize(
            futures_margin / futures_price,
            tips.linear.qty_step,
            tips.linear.qty_precision,
        );

        if spot_qty <= 0.0 || futures_qty <= 0.0 {
            return Err(ArbitrageError::Validation(format!(
                "Computed order quantities invalid: spot {}, futures {}",
                spot_qty, futures_qty
            ))
            .into());
        }

        self.rules
            .validate_order(symbol, spot_qty, spot_price, Market::Spot)
            .await?;
        self.rules
            .validate_order(symbol, futures_qty, futures_price, Market::Linear)
            .await?;

        info!(
            symbol = %symbol,
            total = total_amount,
            leverage = leverage,
            spot_amount = spot_amount,
            futures_margin = futures_margin,
            spot_qty = spot_qty,
            futures_qty = futures_qty,
            "Entering hedge"
        );

        // Spot leg first; a failed buy leaves nothing to unwind
        let spot_order = OrderRequest::market_quote(symbol, OrderSide::Buy, spot_amount, Market::Spot);
        let spot_ack = self.transport.place_order(&spot_order).await?;
        info!(symbol = %symbol, order_id = %spot_ack.order_id, "Spot buy accepted");

        // Leverage may already be set; not fatal
        if let Err(e) = self.transport.set_leverage(symbol, leverage, Market::Linear).await {
            warn!(symbol = %symbol, error = %e, "Failed to set leverage, continuing");
        }

        let futures_order =
            OrderRequest::market_base(symbol, OrderSide::Sell, futures_qty, Market::Linear);
        let futures_ack = match self.transport.place_order(&futures_order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Futures sell failed after spot fill");
                // Best-effort compensation, not a transaction: the market buy
                // has likely filled and cannot be cancelled, in which case a
                // one-legged spot position is left for the caller to detect
                match self
                    .transport
                    .cancel_order(symbol, &spot_ack.order_id, Market::Spot)
                    .await
                {
                    Ok(()) => info!(order_id = %spot_ack.order_id, "Spot order cancel requested"),
                    Err(cancel_err) => {
                        warn!(order_id = %spot_ack.order_id, error = %cancel_err, "Spot cancel attempt failed")
                    }
                }
                return Ok(TradingResult::failure(format!(
                    "Futures sell failed: {}; spot leg may remain partially filled",
                    e
                )));
            }
        };
        info!(symbol = %symbol, order_id = %futures_ack.order_id, "Futures sell accepted");

        let spot_fees = spot_amount * self.spot_fee_rate;
        let futures_fees = futures_qty * futures_price * self.futures_fee_rate;
        debug!(spot_fees = spot_fees, futures_fees = futures_fees, "Estimated entry fees");

        self.ledger.insert(Position {
            symbol: symbol.to_string(),
            spot_qty,
            futures_qty: -futures_qty,
            spot_avg_price: spot_price,
            futures_avg_price: futures_price,
            leverage,
            total_investment: total_amount,
            spot_investment: spot_amount,
            futures_investment: futures_margin,
            funding_paid: 0.0,
            unrealized_pnl: 0.0,
            entry_time: chrono::Utc::now().timestamp(),
        });

        counter!("funding_arb_orders_total", 2);
        gauge!("funding_arb_open_positions", self.ledger.open_count() as f64);

        Ok(TradingResult {
            success: true,
            message: format!(
                "Arbitrage entered: bought {} spot, sold {} futures",
                spot_qty, futures_qty
            ),
            spot_order_id: Some(spot_ack.order_id),
            futures_order_id: Some(futures_ack.order_id),
            spot_qty,
            futures_qty,
            spot_price,
            futures_price,
            total_cost: total_amount,
        })
    }

    /// Close a hedge: sell the spot leg, buy back the short.
    pub async fn exit(&mut self, symbol: &str) -> TradingResult {
        match self.try_exit(symbol).await {
            Ok(result) => result,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Exit failed");
                TradingResult::failure(format!("Exit failed: {}", e))
            }
        }
    }

    async fn try_exit(&mut self, symbol: &str) -> Result<TradingResult> {
        // Operate on reconciled state, not stale local bookkeeping
        self.refresh_ledger().await;

        let mut position = self
            .ledger
            .get(symbol)
            .cloned()
            .ok_or_else(|| ArbitrageError::Trading(format!("No open position for {}", symbol)))?;

        let spot_price = self
            .market
            .spot_price(symbol)
            .await
            .ok_or_else(|| ArbitrageError::Trading(format!("Spot price unavailable for {}", symbol)))?;
        let futures_price = self.market.futures_price(symbol).await.ok_or_else(|| {
            ArbitrageError::Trading(format!("Futures price unavailable for {}", symbol))
        })?;

        let tips = self.rules.trading_tips(symbol).await;

        // Fully cover the short; sell spot only up to the hedge size and never
        // more than held
        let close_futures_qty = position.futures_qty.abs();
        let close_spot_qty = position.spot_qty.min(close_futures_qty);

        info!(
            symbol = %symbol,
            futures_position = close_futures_qty,
            spot_held = position.spot_qty,
            spot_to_sell = close_spot_qty,
            "Closing hedge"
        );

        let spot_sell_qty = quantize(close_spot_qty, tips.spot.qty_step, tips.spot.qty_precision);
        let spot_order =
            OrderRequest::market_base(symbol, OrderSide::Sell, spot_sell_qty, Market::Spot);
        // No compensation needed on failure: the futures leg is untouched
        let spot_ack = self.transport.place_order(&spot_order).await.map_err(|e| {
            ArbitrageError::Trading(format!("Spot sell failed: {}", e))
        })?;

        let futures_buy_qty = quantize(
            close_futures_qty,
            tips.linear.qty_step,
            tips.linear.qty_precision,
        );
        let futures_order =
            OrderRequest::market_base(symbol, OrderSide::Buy, futures_buy_qty, Market::Linear);
        let futures_ack = match self.transport.place_order(&futures_order).await {
            Ok(ack) => ack,
            Err(e) => {
                // Known risk window: the spot leg is sold, the short remains
                error!(symbol = %symbol, error = %e, "Futures buy failed after spot sell, position under-hedged");
                return Ok(TradingResult::failure(format!(
                    "Futures buy failed: {}; position is now under-hedged",
                    e
                )));
            }
        };

        let spot_gross = (spot_price - position.spot_avg_price) * close_spot_qty;
        let spot_fees = (position.spot_avg_price * close_spot_qty
            + spot_price * close_spot_qty)
            * self.spot_fee_rate;
        let spot_pnl = spot_gross - spot_fees;

        let futures_gross = (position.futures_avg_price - futures_price) * close_futures_qty;
        let futures_fees = (position.futures_avg_price * close_futures_qty
            + futures_price * close_futures_qty)
            * self.futures_fee_rate;
        let futures_pnl = futures_gross - futures_fees;

        let funding_income = self.estimate_funding_income(&position).await;
        let total_pnl = spot_pnl + futures_pnl + funding_income;

        info!(
            symbol = %symbol,
            spot_pnl = spot_pnl,
            futures_pnl = futures_pnl,
            fees = spot_fees + futures_fees,
            funding_income = funding_income,
            total_pnl = total_pnl,
            "Close P&L"
        );

        let entry_spot_qty = position.spot_qty;
        let entry_futures_qty = position.futures_qty;
        position.spot_qty -= close_spot_qty;
        position.futures_qty = 0.0;

        self.ledger.push_closed(ClosedPosition {
            symbol: symbol.to_string(),
            spot_qty: entry_spot_qty,
            futures_qty: entry_futures_qty,
            spot_avg_price: position.spot_avg_price,
            futures_avg_price: position.futures_avg_price,
            close_spot_qty,
            close_futures_qty,
            close_spot_price: spot_price,
            close_futures_price: futures_price,
            total_pnl,
            entry_time: position.entry_time,
            close_time: chrono::Utc::now().timestamp(),
            leverage: position.leverage,
            total_investment: position.total_investment,
            spot_investment: position.spot_investment,
            futures_investment: position.futures_investment,
            funding_paid: position.funding_paid,
        });

        // The short is fully covered: drop the live record even when spot
        // residue remains, so a one-legged holding never displays as an
        // active arbitrage
        let remaining_spot = position.spot_qty;
        self.ledger.remove(symbol);

        counter!("funding_arb_orders_total", 2);
        gauge!("funding_arb_open_positions", self.ledger.open_count() as f64);

        let message = if remaining_spot < SPOT_DUST_THRESHOLD {
            format!("Position closed, total PnL {:.2}", total_pnl)
        } else {
            format!(
                "Position closed, total PnL {:.2}; unhedged spot remainder {:.6}",
                total_pnl, remaining_spot
            )
        };

        Ok(TradingResult {
            success: true,
            message,
            spot_order_id: Some(spot_ack.order_id),
            futures_order_id: Some(futures_ack.order_id),
            spot_qty: close_spot_qty,
            futures_qty: close_futures_qty,
            spot_price,
            futures_price,
            total_cost: 0.0,
        })
    }

    /// Estimate funding income accrued while a position was open.
    ///
    /// Approximation, not an exchange-confirmed ledger entry: the current
    /// funding rate proxies the rate at each elapsed 8-hour settlement, which
    /// can misstate income if the rate moved materially during the hold.
    pub async fn estimate_funding_income(&self, position: &Position) -> f64 {
        let Some(funding_rate) = self.market.funding_rate(&position.symbol).await else {
            warn!(symbol = %position.symbol, "Funding rate unavailable, assuming zero funding income");
            return 0.0;
        };

        let now = chrono::Utc::now().timestamp();
        let holding_hours = (now - position.entry_time) as f64 / 3600.0;
        let funding_periods = (holding_hours / 8.0).floor();

        if funding_periods <= 0.0 {
            debug!(symbol = %position.symbol, holding_hours = holding_hours, "No settlement period elapsed");
            return 0.0;
        }

        let futures_value = position.futures_qty.abs() * position.futures_avg_price;
        let income = futures_value * funding_rate * funding_periods;

        debug!(
            symbol = %position.symbol,
            periods = funding_periods,
            futures_value = futures_value,
            rate = funding_rate,
            income = income,
            "Estimated funding income"
        );

        income
    }

    /// Rebuild the ledger's live map from exchange-reported positions and
    /// balances. Transport failures degrade to empty inputs with a warning.
    async fn refresh_ledger(&mut self) {
        let futures = match self.transport.get_positions(Market::Linear).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to fetch futures positions");
                Vec::new()
            }
        };

        let balances = match self.transport.get_wallet_balances().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to fetch wallet balances");
                Vec::new()
            }
        };

        self.ledger.reconcile(futures, balances, &self.quote_asset);
        gauge!("funding_arb_open_positions", self.ledger.open_count() as f64);
    }

    /// Reconcile, then summarize open positions
    pub async fn positions_summary(&mut self) -> PositionsSummary {
        self.refresh_ledger().await;

        let mut positions: Vec<Position> = self.ledger.open_positions().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        PositionsSummary {
            count: positions.len(),
            total_value: positions.iter().map(Position::market_value).sum(),
            total_unrealized_pnl: positions.iter().map(|p| p.unrealized_pnl).sum(),
            total_funding_paid: positions.iter().map(|p| p.funding_paid).sum(),
            positions,
        }
    }

    /// Summarize the closed-position history
    pub fn closed_summary(&self) -> ClosedSummary {
        let positions = self.ledger.closed_positions().to_vec();

        ClosedSummary {
            count: positions.len(),
            total_pnl: positions.iter().map(|p| p.total_pnl).sum(),
            total_investment: positions.iter().map(|p| p.total_investment).sum(),
            positions,
        }
    }

    /// Rules, minimum investment and advisory notes for one symbol
    pub async fn trading_tips(&mut self, symbol: &str) -> TradingTips {
        self.rules.trading_tips(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capital_allocation_identity() {
        for leverage in 1..=10u32 {
            let total = 1000.0;
            let (spot, margin) = ArbitrageEngine::calculate_capital_allocation(total, leverage);
            assert_eq!(spot, total / 2.0);
            assert!((spot + margin * leverage as f64 - total).abs() < 1e-9);
        }
    }

    #[test]
    fn test_capital_allocation_scenario() {
        let (spot, margin) = ArbitrageEngine::calculate_capital_allocation(1000.0, 2);
        assert_eq!(spot, 500.0);
        assert_eq!(margin, 250.0);
    }

    #[test]
    fn test_capital_allocation_zero_leverage_clamped() {
        let (spot, margin) = ArbitrageEngine::calculate_capital_allocation(1000.0, 0);
        assert_eq!(spot, 500.0);
        assert_eq!(margin, 500.0);
    }

    #[test]
    fn test_trading_result_failure() {
        let result = TradingResult::failure("no position");
        assert!(!result.success);
        assert_eq!(result.message, "no position");
        assert!(result.spot_order_id.is_none());
        assert_eq!(result.total_cost, 0.0);
    }
}
