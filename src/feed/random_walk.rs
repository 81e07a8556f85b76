//! Random-walk price driver for demo sessions.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::InMemoryFeed;

#[derive(Debug, Clone)]
pub struct RandomWalkConfig {
    pub symbol: String,
    pub start_price: Decimal,
    /// Maximum move per step, in basis points of the current price
    pub step_bps: u32,
    pub interval: Duration,
    /// Decimal places kept on each generated price
    pub scale: u32,
}

impl RandomWalkConfig {
    pub fn new(symbol: impl Into<String>, start_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            start_price,
            step_bps: 5,
            interval: Duration::from_millis(100),
            scale: 5,
        }
    }
}

/// Next price one random step away from `price`, never below one tick.
pub fn next_price(price: Decimal, step_bps: u32, scale: u32, rng: &mut impl Rng) -> Decimal {
    let bps = step_bps as i64;
    let drift = if bps == 0 { 0 } else { rng.gen_range(-bps..=bps) };
    let change = Decimal::from(drift) / Decimal::from(10_000);
    let floor = Decimal::new(1, scale);
    (price * (Decimal::ONE + change)).round_dp(scale).max(floor)
}

/// Drive `feed` with a random walk until `shutdown` flips to true.
pub fn spawn_random_walk(
    feed: Arc<InMemoryFeed>,
    config: RandomWalkConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut price = config.start_price;
        feed.set_price(&config.symbol, price).await;
        info!(symbol = %config.symbol, %price, "random walk started");

        let mut ticker = tokio::time::interval(config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    price = {
                        let mut rng = rand::thread_rng();
                        next_price(price, config.step_bps, config.scale, &mut rng)
                    };
                    feed.set_price(&config.symbol, price).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(symbol = %config.symbol, %price, "random walk stopped");
    })
}
