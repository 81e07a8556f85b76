//! Resting order monitor.
//!
//! Re-evaluates SUBMITTED orders on every price tick the feed publishes
//! and on a periodic sweep that also expires orders past their time to
//! live and retries orders stuck behind a feed outage.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::BrokerEvent;
use super::worker::FillContext;
use crate::feed::PriceTick;

pub struct RestingOrderMonitor {
    ctx: FillContext,
    ticks: Option<broadcast::Receiver<PriceTick>>,
    sweep_interval: Duration,
}

impl RestingOrderMonitor {
    pub fn new(
        ctx: FillContext,
        ticks: Option<broadcast::Receiver<PriceTick>>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            ticks,
            sweep_interval,
        }
    }

    /// Re-evaluate resting orders on `tick.symbol` at the tick price.
    pub async fn on_tick(&self, tick: &PriceTick) -> usize {
        let resting = self.ctx.ledger.resting_orders(Some(&tick.symbol)).await;
        for order in &resting {
            self.ctx.evaluate_at(order, tick.price).await;
        }
        resting.len()
    }

    /// Expire overdue orders, then re-evaluate everything still resting.
    pub async fn sweep(&self) {
        for order in self.ctx.ledger.expire_due(Utc::now()).await {
            info!(order_id = %order.id, symbol = %order.symbol, "Order expired");
            self.ctx.events.publish(BrokerEvent::OrderExpired { order_id: order.id });
        }

        let resting = self.ctx.ledger.resting_orders(None).await;
        if resting.is_empty() {
            return;
        }

        let symbols: BTreeSet<&str> = resting.iter().map(|o| o.symbol.as_str()).collect();
        for symbol in symbols {
            // One attempt per sweep; the next sweep is the retry
            let price = match self.ctx.feed.get_latest_price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    debug!(symbol, "sweep skipped symbol: {}", e);
                    continue;
                }
            };
            for order in resting.iter().filter(|o| o.symbol == symbol) {
                self.ctx.evaluate_at(order, price).await;
            }
        }
    }

    async fn next_tick(&mut self) -> Option<Result<PriceTick, RecvError>> {
        match self.ticks.as_mut() {
            Some(rx) => Some(rx.recv().await),
            None => std::future::pending().await,
        }
    }

    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(self.sweep_interval);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            debug!(interval = ?self.sweep_interval, "resting order monitor started");

            loop {
                tokio::select! {
                    tick = self.next_tick() => match tick {
                        Some(Ok(tick)) => {
                            self.on_tick(&tick).await;
                        }
                        Some(Err(RecvError::Lagged(skipped))) => {
                            warn!(skipped, "price ticks lagged, sweeping instead");
                            self.sweep().await;
                        }
                        Some(Err(RecvError::Closed)) | None => {
                            debug!("price tick stream closed");
                            self.ticks = None;
                        }
                    },
                    _ = sweep.tick() => self.sweep().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("resting order monitor stopped");
        })
    }
}
