//! Per-symbol trading constraints: fetching, caching and order validation

use crate::{
    config::RulesConfig,
    exchange::{InstrumentRules, Market, SharedTransport},
    ArbitrageError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Tolerance for quantity step-multiple checks
const STEP_TOLERANCE: f64 = 1e-10;

/// Combined spot + linear constraint set for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRuleSet {
    /// Trading symbol
    pub symbol: String,
    /// Spot market constraints
    pub spot: InstrumentRules,
    /// Linear perpetual constraints
    pub linear: InstrumentRules,
    /// Unix timestamp of the fetch that produced this set
    pub fetched_at: i64,
}

/// Rules, minimum investment and advisory notes for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingTips {
    /// Trading symbol
    pub symbol: String,
    /// Smallest sensible total investment in quote units
    pub min_investment: f64,
    /// Spot market constraints
    pub spot: InstrumentRules,
    /// Linear perpetual constraints
    pub linear: InstrumentRules,
    /// Advisory strings (high minimums, leverage caps, demo limits)
    pub recommendations: Vec<String>,
}

/// Round to a fixed number of decimal places
fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Snap a raw quantity to the market's step size, then to its decimal
/// precision. The result is the quantity actually sent to the exchange.
pub fn quantize(qty: f64, step: f64, precision: u32) -> f64 {
    if step <= 0.0 {
        return round_to(qty, precision);
    }
    let stepped = (qty / step).round() * step;
    round_to(stepped, precision)
}

/// Fetches and caches per-symbol exchange trading constraints.
///
/// Metadata failures never propagate: a documented default rule set is
/// substituted so sizing always produces an answer, with order validation
/// downstream responsible for catching a wrong default.
pub struct TradingRulesManager {
    transport: SharedTransport,
    cache: HashMap<String, TradingRuleSet>,
    cache_time: i64,
    cache_ttl_secs: u64,
    safety_margin: f64,
    demo: bool,
    demo_min_qty: HashMap<String, f64>,
}

impl TradingRulesManager {
    /// Create a rules manager. `demo` selects the demo-environment
    /// minimum-quantity heuristics carried in `config.demo_min_qty`.
    pub fn new(transport: SharedTransport, config: RulesConfig, demo: bool) -> Self {
        Self {
            transport,
            cache: HashMap::new(),
            cache_time: 0,
            cache_ttl_secs: config.cache_ttl_secs,
            safety_margin: config.safety_margin,
            demo,
            demo_min_qty: config.demo_min_qty,
        }
    }

    fn cache_valid(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        (now - self.cache_time) < self.cache_ttl_secs as i64
    }

    /// Get the combined rule set for a symbol, from cache when fresh
    pub async fn get_rules(&mut self, symbol: &str, force_refresh: bool) -> TradingRuleSet {
        if !force_refresh && self.cache_valid() {
            if let Some(rules) = self.cache.get(symbol) {
                return rules.clone();
            }
        }

        let spot = self.fetch_market_rules(Market::Spot, symbol).await;
        let linear = self.fetch_market_rules(Market::Linear, symbol).await;

        let rules = TradingRuleSet {
            symbol: symbol.to_string(),
            spot,
            linear,
            fetched_at: chrono::Utc::now().timestamp(),
        };

        self.cache.insert(symbol.to_string(), rules.clone());
        self.cache_time = chrono::Utc::now().timestamp();

        rules
    }

    async fn fetch_market_rules(&self, market: Market, symbol: &str) -> InstrumentRules {
        match self.transport.get_instrument_rules(market, symbol).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(symbol = %symbol, market = %market, error = %e, "Metadata lookup failed, using default rules");
                Self::default_rules(market)
            }
        }
    }

    /// Default rule set substituted when a metadata query fails
    fn default_rules(market: Market) -> InstrumentRules {
        InstrumentRules {
            min_order_qty: 0.001,
            max_order_qty: 1000.0,
            qty_step: 0.001,
            min_order_amt: 5.0,
            max_order_amt: 100_000.0,
            price_precision: 2,
            qty_precision: 3,
            max_leverage: match market {
                Market::Linear => Some(5.0),
                Market::Spot => None,
            },
            status: "Trading".to_string(),
        }
    }

    /// Smallest total investment for which both legs clear their
    /// minimum-order-amount constraints, scaled by the safety margin.
    pub async fn min_investment(&mut self, symbol: &str, leverage: u32) -> f64 {
        let leverage = leverage.max(1);

        // Demo environments enforce minimum quantities well above the
        // published instrument rules
        if self.demo {
            let demo_qty = self.demo_min_qty.get(symbol).copied().unwrap_or(5.0);
            let estimated_price = Self::estimated_price(symbol);
            let demo_min_amount = demo_qty * estimated_price;
            let spot_ratio = leverage as f64 / (leverage as f64 + 1.0);
            return round_to(demo_min_amount / spot_ratio * self.safety_margin, 2);
        }

        let rules = self.get_rules(symbol, false).await;
        let spot_min = rules.spot.min_order_amt;
        let linear_min = rules.linear.min_order_amt / leverage as f64;
        round_to(spot_min.max(linear_min) * self.safety_margin, 2)
    }

    /// Rough price guess used only for demo minimum-investment estimates
    fn estimated_price(symbol: &str) -> f64 {
        if symbol.contains("ETH") {
            4500.0
        } else if symbol.contains("BTC") {
            50000.0
        } else {
            100.0
        }
    }

    /// Validate order parameters against the market's constraints.
    ///
    /// Checks in order: minimum quantity, maximum quantity, step multiple,
    /// notional bounds. The first failing check short-circuits.
    pub async fn validate_order(
        &mut self,
        symbol: &str,
        qty: f64,
        price: f64,
        market: Market,
    ) -> Result<()> {
        let rules = self.get_rules(symbol, false).await;
        let rule = match market {
            Market::Spot => &rules.spot,
            Market::Linear => &rules.linear,
        };

        if qty < rule.min_order_qty {
            return Err(ArbitrageError::Validation(format!(
                "Quantity {} below minimum {}",
                qty, rule.min_order_qty
            ))
            .into());
        }

        if qty > rule.max_order_qty {
            return Err(ArbitrageError::Validation(format!(
                "Quantity {} exceeds maximum {}",
                qty, rule.max_order_qty
            ))
            .into());
        }

        if rule.qty_step > 0.0 {
            let remainder = qty % rule.qty_step;
            if remainder.abs() > STEP_TOLERANCE
                && (remainder - rule.qty_step).abs() > STEP_TOLERANCE
            {
                return Err(ArbitrageError::Validation(format!(
                    "Quantity {} must be a multiple of {}",
                    qty, rule.qty_step
                ))
                .into());
            }
        }

        let amount = qty * price;
        if amount < rule.min_order_amt {
            return Err(ArbitrageError::Validation(format!(
                "Order amount {:.2} below minimum {}",
                amount, rule.min_order_amt
            ))
            .into());
        }

        if amount > rule.max_order_amt {
            return Err(ArbitrageError::Validation(format!(
                "Order amount {:.2} exceeds maximum {}",
                amount, rule.max_order_amt
            ))
            .into());
        }

        Ok(())
    }

    /// Rules plus minimum investment plus advisory notes for one symbol
    pub async fn trading_tips(&mut self, symbol: &str) -> TradingTips {
        let rules = self.get_rules(symbol, false).await;
        let min_investment = self.min_investment(symbol, 1).await;

        let mut recommendations = Vec::new();

        if self.demo {
            let demo_qty = self.demo_min_qty.get(symbol).copied().unwrap_or(5.0);
            recommendations.push(format!(
                "Demo environment enforces a minimum quantity of {} for {}",
                demo_qty, symbol
            ));
            recommendations.push(format!(
                "Suggested investment: {:.0} or more",
                min_investment
            ));
        } else {
            if rules.spot.min_order_amt > 10.0 {
                recommendations.push(format!(
                    "{} spot minimum order amount is high: {}",
                    symbol, rules.spot.min_order_amt
                ));
            }
            if rules.linear.min_order_amt > 10.0 {
                recommendations.push(format!(
                    "{} futures minimum order amount is high: {}",
                    symbol, rules.linear.min_order_amt
                ));
            }
            if let Some(max_leverage) = rules.linear.max_leverage {
                if max_leverage < 5.0 {
                    recommendations.push(format!(
                        "{} maximum leverage is limited to {}x",
                        symbol, max_leverage
                    ));
                }
            }
            if recommendations.is_empty() {
                recommendations.push("Trading parameters look fine for arbitrage".to_string());
            }
        }

        debug!(symbol = %symbol, min_investment = min_investment, "Prepared trading tips");

        TradingTips {
            symbol: symbol.to_string(),
            min_investment,
            spot: rules.spot,
            linear: rules.linear,
            recommendations,
        }
    }
}
