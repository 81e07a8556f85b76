//! Unrealized PnL refresh for open positions.
//!
//! Purely derived state: refreshing never touches cash or realized PnL.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ledger::Ledger;
use crate::feed::DataFeed;

#[derive(Clone)]
pub struct PnlUpdater {
    ledger: Ledger,
    feed: Arc<dyn DataFeed>,
}

impl PnlUpdater {
    pub fn new(ledger: Ledger, feed: Arc<dyn DataFeed>) -> Self {
        Self { ledger, feed }
    }

    /// Mark `symbol` at `price`; `None` when there is no open position.
    pub async fn refresh(&self, symbol: &str, price: Decimal) -> Option<Decimal> {
        self.ledger.mark_to_market(symbol, price).await
    }

    /// Mark every open position at the feed's latest price.
    ///
    /// Symbols the feed cannot price right now keep their previous value.
    /// Returns how many positions were refreshed.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for symbol in self.ledger.open_symbols().await {
            match self.feed.get_latest_price(&symbol).await {
                Ok(price) => {
                    if self.refresh(&symbol, price).await.is_some() {
                        refreshed += 1;
                    }
                }
                Err(e) => debug!(symbol = %symbol, "pnl refresh skipped: {}", e),
            }
        }
        refreshed
    }

    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_all().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("pnl updater stopped");
        })
    }
}
