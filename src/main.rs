use clap::{Parser, Subcommand};
use funding_arbitrage::{
    config::EngineConfig,
    engine::ArbitrageEngine,
    exchange::BybitTransport,
    utils::{logger, metrics},
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "funding-arb")]
#[command(about = "Funding-rate cash-and-carry arbitrage for Bybit spot/perpetual markets")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/funding-arb.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/funding-arb.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the configured symbol universe for funding opportunities
    Scan {
        /// Override the configured minimum funding rate
        #[arg(long)]
        min_funding_rate: Option<f64>,
    },
    /// Enter a hedge: spot buy plus leveraged futures short
    Enter {
        /// Trading symbol, e.g. BTCUSDT
        symbol: String,
        /// Total investment in quote units
        amount: f64,
        /// Leverage multiplier for the futures leg
        #[arg(long, default_value_t = 2)]
        leverage: u32,
    },
    /// Close the hedge for a symbol
    Exit {
        /// Trading symbol, e.g. BTCUSDT
        symbol: String,
    },
    /// Show open positions (reconciled against the exchange)
    Positions,
    /// Show closed-position history for this session
    History,
    /// Show trading rules and minimum investment for a symbol
    Tips {
        /// Trading symbol, e.g. BTCUSDT
        symbol: String,
    },
    /// Scan repeatedly at a fixed interval
    Watch {
        /// Poll interval in seconds
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;

    info!("Starting {} v{}", funding_arbitrage::APP_NAME, funding_arbitrage::VERSION);

    let config = EngineConfig::load(&cli.config)?;
    config.validate()?;
    info!("Configuration loaded from: {}", cli.config.display());

    if let Commands::Validate = cli.command {
        println!("Configuration validation passed!");
        return Ok(());
    }

    if config.monitoring.enable_metrics {
        metrics::init(config.monitoring.metrics_port)?;
    }

    let transport = Arc::new(BybitTransport::new(&config.api)?);
    let mut engine = ArbitrageEngine::new(transport, &config);

    match cli.command {
        Commands::Scan { min_funding_rate } => {
            let min_rate = min_funding_rate.unwrap_or(config.strategy.min_funding_rate);
            run_scan(&engine, &config.strategy.symbols, min_rate).await;
        }
        Commands::Enter {
            symbol,
            amount,
            leverage,
        } => {
            let result = engine.enter(&symbol, amount, leverage).await;
            print_result(&result);
        }
        Commands::Exit { symbol } => {
            let result = engine.exit(&symbol).await;
            print_result(&result);
        }
        Commands::Positions => {
            let summary = engine.positions_summary().await;
            println!("Open positions: {}", summary.count);
            println!("Total value: {:.2}", summary.total_value);
            println!("Unrealized PnL: {:.2}", summary.total_unrealized_pnl);
            println!("Funding paid: {:.2}", summary.total_funding_paid);
            for position in &summary.positions {
                println!(
                    "  {} spot {:.6} @ {:.4} | futures {:.6} @ {:.4} | uPnL {:.2} | {}x",
                    position.symbol,
                    position.spot_qty,
                    position.spot_avg_price,
                    position.futures_qty,
                    position.futures_avg_price,
                    position.unrealized_pnl,
                    position.leverage,
                );
            }
        }
        Commands::History => {
            let summary = engine.closed_summary();
            println!("Closed positions: {}", summary.count);
            println!("Total PnL: {:.2}", summary.total_pnl);
            println!("Total investment: {:.2}", summary.total_investment);
            for closed in &summary.positions {
                println!(
                    "  {} closed {:.6} spot / {:.6} futures | PnL {:.2}",
                    closed.symbol, closed.close_spot_qty, closed.close_futures_qty, closed.total_pnl,
                );
            }
        }
        Commands::Tips { symbol } => {
            let tips = engine.trading_tips(&symbol).await;
            println!("{}", tips.symbol);
            println!("Minimum investment: {:.2}", tips.min_investment);
            println!(
                "Spot: min qty {} | step {} | min amount {} | precision {}",
                tips.spot.min_order_qty, tips.spot.qty_step, tips.spot.min_order_amt, tips.spot.qty_precision,
            );
            println!(
                "Linear: min qty {} | step {} | min notional {} | max leverage {}",
                tips.linear.min_order_qty,
                tips.linear.qty_step,
                tips.linear.min_order_amt,
                tips.linear.max_leverage.unwrap_or(1.0),
            );
            for note in &tips.recommendations {
                println!("  - {}", note);
            }
        }
        Commands::Watch { interval_secs } => {
            info!("Polling every {}s, Ctrl-C to stop", interval_secs);
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                run_scan(&engine, &config.strategy.symbols, config.strategy.min_funding_rate).await;
            }
        }
        Commands::Validate => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_scan(engine: &ArbitrageEngine, symbols: &[String], min_funding_rate: f64) {
    let opportunities = engine.scan(symbols, min_funding_rate).await;

    if opportunities.is_empty() {
        println!("No opportunities above funding rate {}", min_funding_rate);
        return;
    }

    println!(
        "{:<12} {:>12} {:>12} {:>10} {:>9} {:>10} {:>6}",
        "symbol", "spot", "futures", "funding", "spread%", "proj/day", "risk"
    );
    for op in &opportunities {
        println!(
            "{:<12} {:>12.4} {:>12.4} {:>10.6} {:>8.3}% {:>10.4} {:>6.2}",
            op.symbol,
            op.spot_price,
            op.futures_price,
            op.funding_rate,
            op.spread_pct,
            op.projected_daily_profit,
            op.risk_score,
        );
    }
}

fn print_result(result: &funding_arbitrage::TradingResult) {
    if result.success {
        println!("OK: {}", result.message);
        if let Some(id) = &result.spot_order_id {
            println!("  spot order: {} ({:.6} @ {:.4})", id, result.spot_qty, result.spot_price);
        }
        if let Some(id) = &result.futures_order_id {
            println!(
                "  futures order: {} ({:.6} @ {:.4})",
                id, result.futures_qty, result.futures_price
            );
        }
    } else {
        error!("{}", result.message);
        println!("FAILED: {}", result.message);
    }
}
