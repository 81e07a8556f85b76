//! Fill worker pool.
//!
//! Admitted order ids go into a bounded queue. Each worker waits out the
//! simulated exchange latency, asks the feed for a price and hands the
//! order to the fill engine; the ledger applies the result. Failures stay
//! on the order and in the event stream, never in the caller's context.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{BrokerEvent, EventBus};
use super::fill::{FillDecision, FillEngine};
use super::ledger::{FillOutcome, Ledger};
use crate::config::ExecutionConfig;
use crate::domain::Order;
use crate::error::Result;
use crate::feed::DataFeed;

/// Price lookup retries: exponential backoff plus up to half a step of jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            attempts: config.price_retry_attempts.max(1),
            base_backoff_ms: config.price_retry_backoff_ms,
            max_backoff_ms: config.price_retry_max_backoff_ms,
        }
    }

    /// Delay before retry number `retry` (0-based), without jitter
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let delay = self
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    fn jittered(&self, retry: u32) -> Duration {
        let base = self.backoff_duration(retry);
        let spread = self.base_backoff_ms / 2;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Everything a fill evaluation needs; cheap to clone into tasks.
#[derive(Clone)]
pub struct FillContext {
    pub ledger: Ledger,
    pub feed: Arc<dyn DataFeed>,
    pub engine: FillEngine,
    pub events: EventBus,
    pub retry: RetryPolicy,
}

impl FillContext {
    /// Latest price for `symbol`, retrying transient feed errors.
    pub async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let mut retry = 0;
        loop {
            match self.feed.get_latest_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(e) if e.is_retryable() && retry + 1 < self.retry.attempts => {
                    let delay = self.retry.jittered(retry);
                    debug!(symbol, retry, ?delay, "price lookup failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// First evaluation of a freshly admitted order.
    pub async fn process(&self, order_id: &str) {
        let Some(order) = self.ledger.order(order_id).await else {
            warn!(order_id, "queued order vanished from the ledger");
            return;
        };
        if !order.status.is_active() {
            debug!(order_id, status = %order.status, "skipping inactive order");
            return;
        }

        match self.fetch_price(&order.symbol).await {
            Ok(price) => self.evaluate_at(&order, price).await,
            Err(e) => {
                // Transient: rest the order and let the monitor retry
                warn!(order_id, symbol = %order.symbol, "no price for order: {}", e);
                let note = format!("awaiting price: {e}");
                let rested = self.ledger.mark_resting(order_id, Some(note.clone())).await;
                if rested == Some(true) {
                    self.events.publish(BrokerEvent::OrderResting {
                        order_id: order_id.to_string(),
                        note: Some(note),
                    });
                }
            }
        }
    }

    /// Evaluate `order` against `market_price` and apply the decision.
    pub async fn evaluate_at(&self, order: &Order, market_price: Decimal) {
        let order_id = order.id.as_str();
        match self.engine.evaluate(order, market_price) {
            FillDecision::Fill(fill_price) => {
                match self.ledger.apply_fill(order_id, fill_price).await {
                    Ok(FillOutcome::Filled(execution)) => {
                        self.events.publish(BrokerEvent::OrderFilled { execution });
                    }
                    Ok(FillOutcome::Rejected(reason)) => {
                        self.events.publish(BrokerEvent::OrderRejected {
                            order_id: order_id.to_string(),
                            reason,
                        });
                    }
                    Ok(FillOutcome::Expired) => {
                        info!(order_id, "Order expired before fill");
                        self.events.publish(BrokerEvent::OrderExpired {
                            order_id: order_id.to_string(),
                        });
                    }
                    Ok(FillOutcome::Skipped(status)) => {
                        debug!(order_id, %status, "fill skipped");
                    }
                    Err(e) => warn!(order_id, "fill failed: {}", e),
                }
            }
            FillDecision::NotFillable => {
                if self.ledger.mark_resting(order_id, None).await == Some(true) {
                    info!(
                        order_id,
                        %market_price,
                        "Order resting: {} {} {} {}",
                        order.order_type(), order.side, order.quantity, order.symbol
                    );
                    self.events.publish(BrokerEvent::OrderResting {
                        order_id: order_id.to_string(),
                        note: None,
                    });
                }
            }
            FillDecision::Rejected(reason) => {
                if self.ledger.reject(order_id, &reason).await {
                    warn!(order_id, "Order rejected: {}", reason);
                    self.events.publish(BrokerEvent::OrderRejected {
                        order_id: order_id.to_string(),
                        reason,
                    });
                }
            }
        }
    }
}

/// Simulated latency for one order, counted from its creation
fn remaining_delay(order: &Order, delay: Duration, jitter_ms: u64) -> Duration {
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    };
    let elapsed = (Utc::now() - order.created_at).to_std().unwrap_or_default();
    (delay + jitter).saturating_sub(elapsed)
}

/// Spawn `workers` tasks consuming order ids until the queue closes.
///
/// Closing the queue (dropping every sender) lets the workers finish what
/// is already queued before they exit.
pub fn spawn_workers(
    ctx: FillContext,
    rx: mpsc::Receiver<String>,
    workers: usize,
    delay: Duration,
    jitter_ms: u64,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..workers.max(1))
        .map(|worker_id| {
            let ctx = ctx.clone();
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                debug!(worker_id, "fill worker started");
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(order_id) = next else {
                        break;
                    };

                    if let Some(order) = ctx.ledger.order(&order_id).await {
                        let wait = remaining_delay(&order, delay, jitter_ms);
                        if !wait.is_zero() {
                            tokio::time::sleep(wait).await;
                        }
                    }
                    ctx.process(&order_id).await;
                }
                debug!(worker_id, "fill worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, OrderRequest, OrderSide, OrderStatus};
    use crate::engine::ledger::{Account, Admission};
    use crate::error::BrokerError;
    use crate::feed::MockDataFeed;
    use rust_decimal_macros::dec;

    fn context(feed: MockDataFeed, attempts: u32) -> FillContext {
        FillContext {
            ledger: Ledger::new(Account::new("USD", dec!(10000), dec!(0.001))),
            feed: Arc::new(feed),
            engine: FillEngine::new(dec!(0.0001)),
            events: EventBus::new(16),
            retry: RetryPolicy {
                attempts,
                base_backoff_ms: 1,
                max_backoff_ms: 10,
            },
        }
    }

    async fn admit(ctx: &FillContext, request: OrderRequest, kind: OrderKind) -> String {
        match ctx
            .ledger
            .admit(&request, kind, None, Some(dec!(1)))
            .await
            .unwrap()
        {
            Admission::Created(order) => order.id,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 5,
            base_backoff_ms: 50,
            max_backoff_ms: 1000,
        };
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(400));

        let jittered = policy.jittered(1);
        assert!(jittered >= Duration::from_millis(100));
        assert!(jittered <= Duration::from_millis(125));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            base_backoff_ms: 50,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_duration(60), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_fetch_price_retries_transient_errors() {
        let mut feed = MockDataFeed::new();
        let mut calls = 0;
        feed.expect_get_latest_price().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(BrokerError::FeedUnavailable("reconnecting".into()))
            } else {
                Ok(dec!(1.25))
            }
        });

        let ctx = context(feed, 3);
        assert_eq!(ctx.fetch_price("EURUSD").await.unwrap(), dec!(1.25));
    }

    #[tokio::test]
    async fn test_fetch_price_gives_up() {
        let mut feed = MockDataFeed::new();
        feed.expect_get_latest_price()
            .times(2)
            .returning(|_| Err(BrokerError::FeedUnavailable("down".into())));

        let ctx = context(feed, 2);
        assert!(ctx.fetch_price("EURUSD").await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_feed_outage_rests_order_instead_of_rejecting() {
        let mut feed = MockDataFeed::new();
        feed.expect_get_latest_price()
            .returning(|_| Err(BrokerError::FeedUnavailable("down".into())));
        let ctx = context(feed, 2);
        let mut events = ctx.events.subscribe();

        let request = OrderRequest::market("EURUSD", OrderSide::Buy, dec!(1));
        let id = admit(&ctx, request, OrderKind::Market).await;
        ctx.process(&id).await;

        let order = ctx.ledger.order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(order.error_message.unwrap().contains("awaiting price"));
        assert!(matches!(
            events.recv().await.unwrap(),
            BrokerEvent::OrderResting { .. }
        ));
    }

    #[tokio::test]
    async fn test_process_fills_market_order() {
        let mut feed = MockDataFeed::new();
        feed.expect_get_latest_price().returning(|_| Ok(dec!(100)));
        let ctx = context(feed, 1);
        let mut events = ctx.events.subscribe();

        let request = OrderRequest::market("EURUSD", OrderSide::Buy, dec!(2));
        let id = admit(&ctx, request, OrderKind::Market).await;
        ctx.process(&id).await;

        let order = ctx.ledger.order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_price, Some(dec!(100.01)));
        match events.recv().await.unwrap() {
            BrokerEvent::OrderFilled { execution } => assert_eq!(execution.order_id, id),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmarketable_limit_rests() {
        let mut feed = MockDataFeed::new();
        feed.expect_get_latest_price().returning(|_| Ok(dec!(1.10)));
        let ctx = context(feed, 1);

        let request = OrderRequest::limit("EURUSD", OrderSide::Buy, dec!(1), dec!(0.5));
        let id = admit(&ctx, request, OrderKind::Limit { price: dec!(0.5) }).await;
        ctx.process(&id).await;

        let order = ctx.ledger.order(&id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(order.error_message.is_none());
    }

    #[tokio::test]
    async fn test_workers_drain_queue_on_close() {
        let mut feed = MockDataFeed::new();
        feed.expect_get_latest_price().returning(|_| Ok(dec!(10)));
        let ctx = context(feed, 1);

        let (tx, rx) = mpsc::channel(16);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let request = OrderRequest::market("EURUSD", OrderSide::Buy, dec!(1));
            let id = admit(&ctx, request, OrderKind::Market).await;
            tx.send(id.clone()).await.unwrap();
            ids.push(id);
        }
        drop(tx);

        for handle in spawn_workers(ctx.clone(), rx, 2, Duration::from_millis(5), 0) {
            handle.await.unwrap();
        }
        for id in ids {
            assert_eq!(
                ctx.ledger.order(&id).await.unwrap().status,
                OrderStatus::Filled
            );
        }
    }
}
