//! End-to-end engine tests against a scripted in-memory exchange

use async_trait::async_trait;
use funding_arbitrage::{
    config::EngineConfig,
    engine::ArbitrageEngine,
    exchange::{
        ExchangeTransport, FuturesPosition, InstrumentRules, Market, OrderAck, OrderQty,
        OrderRequest, OrderSide, Ticker, WalletBalance,
    },
    ArbitrageError, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory exchange: fills market orders instantly at the configured prices
/// and tracks the resulting balances and futures positions.
struct MockExchange {
    spot_price: f64,
    futures_price: f64,
    default_funding_rate: Option<f64>,
    funding_rates: Mutex<HashMap<String, f64>>,
    fail_futures_sell: bool,
    orders: Mutex<Vec<OrderRequest>>,
    cancels: Mutex<Vec<String>>,
    positions: Mutex<Vec<FuturesPosition>>,
    balances: Mutex<HashMap<String, f64>>,
    order_seq: AtomicUsize,
}

impl MockExchange {
    fn new(spot_price: f64, futures_price: f64, funding_rate: f64) -> Arc<Self> {
        Arc::new(Self {
            spot_price,
            futures_price,
            default_funding_rate: Some(funding_rate),
            funding_rates: Mutex::new(HashMap::new()),
            fail_futures_sell: false,
            orders: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            balances: Mutex::new(HashMap::new()),
            order_seq: AtomicUsize::new(0),
        })
    }

    fn failing_futures(spot_price: f64, futures_price: f64, funding_rate: f64) -> Arc<Self> {
        let mut mock = Self::new(spot_price, futures_price, funding_rate);
        Arc::get_mut(&mut mock).unwrap().fail_futures_sell = true;
        mock
    }

    fn set_funding_rate(&self, perp_symbol: &str, rate: f64) {
        self.funding_rates
            .lock()
            .unwrap()
            .insert(perp_symbol.to_string(), rate);
    }

    fn seed_position(&self, symbol: &str, size: f64, avg_price: f64) {
        self.positions.lock().unwrap().push(FuturesPosition {
            symbol: symbol.to_string(),
            size,
            side: OrderSide::Sell,
            avg_price,
            unrealized_pnl: 0.0,
        });
    }

    fn seed_balance(&self, asset: &str, balance: f64) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), balance);
    }

    fn base_asset(symbol: &str) -> String {
        symbol.trim_end_matches("USDT").to_string()
    }

    fn recorded_orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    fn recorded_cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeTransport for MockExchange {
    async fn get_ticker(&self, market: Market, symbol: &str) -> Result<Ticker> {
        let funding_rate = self
            .funding_rates
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .or(self.default_funding_rate);

        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: match market {
                Market::Spot => self.spot_price,
                Market::Linear => self.futures_price,
            },
            funding_rate: match market {
                Market::Spot => None,
                Market::Linear => funding_rate,
            },
            next_funding_time: Some(chrono::Utc::now().timestamp_millis() + 3_600_000),
        })
    }

    async fn get_instrument_rules(&self, market: Market, _: &str) -> Result<InstrumentRules> {
        Ok(InstrumentRules {
            min_order_qty: 0.001,
            max_order_qty: 10_000.0,
            qty_step: 0.001,
            min_order_amt: 5.0,
            max_order_amt: 10_000_000.0,
            price_precision: 2,
            qty_precision: 3,
            max_leverage: match market {
                Market::Linear => Some(10.0),
                Market::Spot => None,
            },
            status: "Trading".to_string(),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if self.fail_futures_sell && order.market == Market::Linear && order.side == OrderSide::Sell
        {
            return Err(ArbitrageError::Exchange {
                code: 110007,
                message: "ab not enough for new order".to_string(),
            }
            .into());
        }

        self.orders.lock().unwrap().push(order.clone());
        let asset = Self::base_asset(&order.symbol);

        match (order.market, order.side, order.qty) {
            (Market::Spot, OrderSide::Buy, OrderQty::Quote(amount)) => {
                *self.balances.lock().unwrap().entry(asset).or_insert(0.0) +=
                    amount / self.spot_price;
            }
            (Market::Spot, OrderSide::Sell, OrderQty::Base(qty)) => {
                *self.balances.lock().unwrap().entry(asset).or_insert(0.0) -= qty;
            }
            (Market::Linear, OrderSide::Sell, OrderQty::Base(qty)) => {
                let mut positions = self.positions.lock().unwrap();
                match positions.iter_mut().find(|p| p.symbol == order.symbol) {
                    Some(position) => position.size += qty,
                    None => positions.push(FuturesPosition {
                        symbol: order.symbol.clone(),
                        size: qty,
                        side: OrderSide::Sell,
                        avg_price: self.futures_price,
                        unrealized_pnl: 0.0,
                    }),
                }
            }
            (Market::Linear, OrderSide::Buy, OrderQty::Base(qty)) => {
                let mut positions = self.positions.lock().unwrap();
                if let Some(position) = positions.iter_mut().find(|p| p.symbol == order.symbol) {
                    position.size -= qty;
                }
                positions.retain(|p| p.size > 1e-12);
            }
            _ => {}
        }

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderAck {
            order_id: format!("ord-{}", seq),
        })
    }

    async fn cancel_order(&self, _: &str, order_id: &str, _: Market) -> Result<()> {
        self.cancels.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn set_leverage(&self, _: &str, _: u32, _: Market) -> Result<()> {
        Ok(())
    }

    async fn get_positions(&self, _: Market) -> Result<Vec<FuturesPosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_wallet_balances(&self) -> Result<Vec<WalletBalance>> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .iter()
            .map(|(asset, balance)| WalletBalance {
                asset: asset.clone(),
                balance: *balance,
            })
            .collect())
    }
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    // Use live instrument rules, not demo minimum-quantity heuristics
    config.api.demo = false;
    config
}

fn engine_with(mock: Arc<MockExchange>) -> ArbitrageEngine {
    ArbitrageEngine::new(mock, &test_config())
}

#[tokio::test]
async fn scan_returns_symbols_above_threshold() {
    let mock = MockExchange::new(60000.0, 60120.0, 0.0003);
    let engine = engine_with(mock);

    // 0.0003 > 0.0001: exactly one hit
    let hits = engine.scan(&["BTCUSDT".to_string()], 0.0001).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].symbol, "BTCUSDT");
    assert!((hits[0].spread_pct - 0.2).abs() < 1e-9);

    // Threshold above the rate filters it out
    let hits = engine.scan(&["BTCUSDT".to_string()], 0.0005).await;
    assert!(hits.is_empty());
}

#[tokio::test]
async fn scan_sorts_by_projected_profit() {
    let mock = MockExchange::new(60000.0, 60120.0, 0.0003);
    mock.set_funding_rate("BTCPERP", 0.0002);
    mock.set_funding_rate("ETHPERP", 0.0005);
    let engine = engine_with(mock);

    let hits = engine
        .scan(&["BTCUSDT".to_string(), "ETHUSDT".to_string()], 0.0001)
        .await;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].symbol, "ETHUSDT");
    assert_eq!(hits[1].symbol, "BTCUSDT");
}

#[tokio::test]
async fn enter_allocates_and_places_both_legs() {
    let mock = MockExchange::new(3000.0, 3010.0, 0.0003);
    let mut engine = engine_with(mock.clone());

    let result = engine.enter("ETHUSDT", 1000.0, 2).await;
    assert!(result.success, "{}", result.message);
    assert!(result.spot_order_id.is_some());
    assert!(result.futures_order_id.is_some());
    assert_eq!(result.total_cost, 1000.0);

    let orders = mock.recorded_orders();
    assert_eq!(orders.len(), 2);

    // Spot leg: market buy sized by half the capital in quote units
    assert_eq!(orders[0].market, Market::Spot);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].qty, OrderQty::Quote(500.0));

    // Futures leg: market sell sized by quantized margin/price
    assert_eq!(orders[1].market, Market::Linear);
    assert_eq!(orders[1].side, OrderSide::Sell);
    let expected_qty = (250.0 / 3010.0 / 0.001_f64).round() * 0.001;
    match orders[1].qty {
        OrderQty::Base(qty) => assert!((qty - expected_qty).abs() < 1e-9),
        OrderQty::Quote(_) => panic!("futures leg must be sized in base units"),
    }

    let position = engine.ledger().get("ETHUSDT").expect("position stored");
    assert_eq!(position.spot_investment, 500.0);
    assert_eq!(position.futures_investment, 250.0);
    assert_eq!(position.leverage, 2);
    assert!(position.futures_qty < 0.0, "short leg must be signed negative");
}

#[tokio::test]
async fn enter_rejects_bad_leverage_before_any_order() {
    let mock = MockExchange::new(3000.0, 3010.0, 0.0003);
    let mut engine = engine_with(mock.clone());

    let result = engine.enter("ETHUSDT", 1000.0, 20).await;
    assert!(!result.success);
    assert!(result.message.contains("Leverage"));
    assert!(mock.recorded_orders().is_empty());

    let result = engine.enter("ETHUSDT", 1000.0, 0).await;
    assert!(!result.success);
    assert!(mock.recorded_orders().is_empty());
}

#[tokio::test]
async fn enter_rejects_small_amount_before_any_order() {
    let mock = MockExchange::new(3000.0, 3010.0, 0.0003);
    let mut engine = engine_with(mock.clone());

    // Below max(5, 5/2) * 1.2 = 6
    let result = engine.enter("ETHUSDT", 4.0, 2).await;
    assert!(!result.success);
    assert!(result.message.contains("below minimum"));
    assert!(mock.recorded_orders().is_empty());
}

#[tokio::test]
async fn enter_futures_failure_attempts_spot_cancel() {
    let mock = MockExchange::failing_futures(3000.0, 3010.0, 0.0003);
    let mut engine = engine_with(mock.clone());

    let result = engine.enter("ETHUSDT", 1000.0, 2).await;
    assert!(!result.success);
    assert!(result.message.contains("Futures sell failed"));

    // Best-effort compensation: the spot order cancel was attempted
    let orders = mock.recorded_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].market, Market::Spot);
    assert_eq!(mock.recorded_cancels(), vec!["ord-1".to_string()]);

    // No position recorded for a failed entry
    assert!(engine.ledger().get("ETHUSDT").is_none());
}

#[tokio::test]
async fn round_trip_with_no_price_move_loses_exactly_the_fees() {
    // Same spot and futures price, zero funding periods elapsed
    let mock = MockExchange::new(60000.0, 60000.0, 0.0003);
    let mut engine = engine_with(mock);

    let entered = engine.enter("BTCUSDT", 1000.0, 2).await;
    assert!(entered.success, "{}", entered.message);

    let exited = engine.exit("BTCUSDT").await;
    assert!(exited.success, "{}", exited.message);

    let summary = engine.closed_summary();
    assert_eq!(summary.count, 1);
    let closed = &summary.positions[0];

    let spot_fees = (closed.spot_avg_price * closed.close_spot_qty
        + closed.close_spot_price * closed.close_spot_qty)
        * 0.001;
    let futures_fees = (closed.futures_avg_price * closed.close_futures_qty
        + closed.close_futures_price * closed.close_futures_qty)
        * 0.00055;

    assert!(
        (closed.total_pnl + spot_fees + futures_fees).abs() < 1e-9,
        "expected pure fee loss, got {} vs fees {}",
        closed.total_pnl,
        spot_fees + futures_fees
    );

    // Futures leg fully covered: position gone despite any spot residue
    assert!(engine.ledger().get("BTCUSDT").is_none());
}

#[tokio::test]
async fn exit_without_position_fails() {
    let mock = MockExchange::new(60000.0, 60120.0, 0.0003);
    let mut engine = engine_with(mock);

    let result = engine.exit("BTCUSDT").await;
    assert!(!result.success);
    assert!(result.message.contains("No open position"));
}

#[tokio::test]
async fn exit_removes_position_with_dust_spot_residue() {
    let mock = MockExchange::new(150.0, 150.0, 0.0003);
    // Externally opened hedge: 0.5 short, 0.5005 spot in the wallet
    mock.seed_position("SOLUSDT", 0.5, 150.0);
    mock.seed_balance("SOL", 0.5005);
    let mut engine = engine_with(mock.clone());

    let result = engine.exit("SOLUSDT").await;
    assert!(result.success, "{}", result.message);
    assert!((result.futures_qty - 0.5).abs() < 1e-9);
    assert!((result.spot_qty - 0.5).abs() < 1e-9);

    // Residual 0.0005 is below the dust threshold: no remainder warning,
    // and the live map no longer carries the symbol
    assert!(!result.message.contains("remainder"));
    assert!(engine.ledger().get("SOLUSDT").is_none());

    let summary = engine.positions_summary().await;
    assert_eq!(summary.count, 0);
}

#[tokio::test]
async fn positions_summary_reconciles_external_state() {
    let mock = MockExchange::new(3000.0, 3010.0, 0.0003);
    mock.seed_position("ETHUSDT", 0.4, 3005.0);
    mock.seed_balance("ETH", 0.4);
    let mut engine = engine_with(mock);

    let summary = engine.positions_summary().await;
    assert_eq!(summary.count, 1);

    let position = &summary.positions[0];
    assert_eq!(position.symbol, "ETHUSDT");
    assert_eq!(position.futures_qty, -0.4);
    assert_eq!(position.futures_avg_price, 3005.0);
    assert_eq!(position.spot_qty, 0.4);
    assert!(summary.total_value > 0.0);
}

#[tokio::test]
async fn trading_tips_exposes_rules_and_minimum() {
    let mock = MockExchange::new(3000.0, 3010.0, 0.0003);
    let mut engine = engine_with(mock);

    let tips = engine.trading_tips("ETHUSDT").await;
    assert_eq!(tips.symbol, "ETHUSDT");
    // max(5, 5/1) * 1.2
    assert!((tips.min_investment - 6.0).abs() < 1e-9);
    assert_eq!(tips.linear.max_leverage, Some(10.0));
    assert!(!tips.recommendations.is_empty());
}
