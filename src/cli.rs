use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::domain::{AccountSummary, Order, OrderRequest, OrderSide};
use crate::engine::PaperBroker;
use crate::error::{BrokerError, Result};
use crate::exchange::{Broker, OrderFilter};
use crate::feed::{spawn_random_walk, DataFeed, InMemoryFeed, RandomWalkConfig};

#[derive(Parser)]
#[command(name = "papertrade")]
#[command(version = "0.1.0")]
#[command(about = "Paper-trading execution engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $PAPERTRADE_ENV overrides)
    #[arg(short, long, default_value = "config", env = "PAPERTRADE_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an in-memory session against a random-walk feed and print the summary
    Demo(DemoArgs),
    /// Load and validate configuration
    CheckConfig,
}

#[derive(Debug, Clone, clap::Args)]
pub struct DemoArgs {
    /// Symbol to simulate
    #[arg(long, default_value = "EURUSD")]
    pub symbol: String,
    /// Starting price of the random walk
    #[arg(long, default_value = "1.10000")]
    pub start_price: Decimal,
    /// Units per order
    #[arg(long, default_value = "1000")]
    pub quantity: Decimal,
    /// How long to let the session run
    #[arg(long, default_value = "3000")]
    pub duration_ms: u64,
    /// Random walk step interval
    #[arg(long, default_value = "50")]
    pub tick_ms: u64,
}

/// What `demo` prints
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub symbol: String,
    pub last_price: Option<Decimal>,
    pub duplicate_detected: bool,
    pub summary: AccountSummary,
    pub orders: Vec<Order>,
}

fn price_at(start: Decimal, factor: Decimal) -> Decimal {
    (start * factor).round_dp(5)
}

pub async fn run_demo(config: &AppConfig, args: &DemoArgs) -> Result<DemoReport> {
    if args.start_price <= Decimal::ZERO || args.quantity <= Decimal::ZERO {
        return Err(BrokerError::Validation(
            "start price and quantity must be positive".to_string(),
        ));
    }

    let feed = Arc::new(InMemoryFeed::new());
    feed.set_price(&args.symbol, args.start_price).await;

    let broker = PaperBroker::new(feed.clone(), config);
    broker.connect().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut walk = RandomWalkConfig::new(args.symbol.clone(), args.start_price);
    walk.interval = Duration::from_millis(args.tick_ms.max(1));
    let walker = spawn_random_walk(feed.clone(), walk, stop_rx);

    let symbol = args.symbol.as_str();
    let qty = args.quantity;
    let start = args.start_price;

    let first = broker
        .create_order(OrderRequest::market(symbol, OrderSide::Buy, qty).with_client_id("demo-1"))
        .await?;
    let retried = broker
        .create_order(OrderRequest::market(symbol, OrderSide::Buy, qty).with_client_id("demo-1"))
        .await?;
    let duplicate_detected = first == retried;

    let requests = [
        OrderRequest::limit(symbol, OrderSide::Buy, qty, price_at(start, dec!(0.9995))),
        OrderRequest::stop(symbol, OrderSide::Sell, qty, price_at(start, dec!(0.9995))),
        OrderRequest::stop_limit(
            symbol,
            OrderSide::Buy,
            qty,
            price_at(start, dec!(1.0010)),
            price_at(start, dec!(1.0005)),
        ),
        OrderRequest::market(symbol, OrderSide::Sell, qty / dec!(2)),
        OrderRequest::limit(symbol, OrderSide::Sell, qty, price_at(start, dec!(1.5))).with_ttl_secs(1),
    ];
    for request in requests {
        if let Err(e) = broker.create_order(request).await {
            warn!("demo order refused: {}", e);
        }
    }

    tokio::time::sleep(Duration::from_millis(args.duration_ms)).await;

    let _ = stop_tx.send(true);
    if let Err(e) = walker.await {
        warn!("random walk ended abnormally: {}", e);
    }

    broker.update_positions_pnl().await;
    let report = DemoReport {
        symbol: args.symbol.clone(),
        last_price: feed.get_latest_price(symbol).await.ok(),
        duplicate_detected,
        summary: broker.get_account_summary().await,
        orders: broker.get_orders(OrderFilter::default()).await,
    };
    broker.shutdown().await;

    info!(
        "Demo finished: {} orders, {} executions",
        report.summary.orders_count, report.summary.executions_count
    );
    Ok(report)
}

/// Load configuration and report every violated constraint
pub fn check_config(config_dir: &std::path::Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(config_dir)?;
    config
        .validate()
        .map_err(|errors| BrokerError::Validation(errors.join("; ")))?;
    Ok(config)
}
