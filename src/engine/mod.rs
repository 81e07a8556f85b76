//! Paper execution engine.
//!
//! `PaperBroker` admits orders synchronously (validation, idempotency,
//! funds pre-check) and evaluates them on a worker pool. Resting orders
//! are re-evaluated by a monitor task and unrealized PnL is refreshed by a
//! periodic updater. All account state lives behind one ledger lock.

pub mod events;
pub mod fill;
pub mod idempotency;
pub mod ledger;
pub mod monitor;
pub mod pnl;
pub mod validator;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ExecutionConfig};
use crate::domain::{
    AccountSummary, Execution, Order, OrderKind, OrderRequest, OrderSide, Position,
};
use crate::error::{BrokerError, Result};
use crate::exchange::{Broker, ExecutionFilter, OrderFilter};
use crate::feed::DataFeed;

pub use events::{BrokerEvent, EventBus};
pub use fill::{FillDecision, FillEngine};
pub use idempotency::IdempotencyTable;
pub use ledger::{Account, Admission, FillOutcome, Ledger};
pub use monitor::RestingOrderMonitor;
pub use pnl::PnlUpdater;
pub use validator::validate;
pub use worker::{FillContext, RetryPolicy};

pub struct PaperBroker {
    config: ExecutionConfig,
    ctx: FillContext,
    pnl: PnlUpdater,
    queue: RwLock<Option<mpsc::Sender<String>>>,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl PaperBroker {
    /// Build the broker and start its tasks. Must run inside a Tokio runtime.
    pub fn new(feed: Arc<dyn DataFeed>, config: &AppConfig) -> Self {
        let exec = config.execution.clone();
        let account = Account::new(
            config.account.currency.clone(),
            config.account.initial_balance,
            exec.commission_rate,
        );
        let ledger = Ledger::new(account);
        let ctx = FillContext {
            ledger: ledger.clone(),
            feed: feed.clone(),
            engine: FillEngine::new(exec.slippage_rate),
            events: EventBus::new(exec.event_capacity),
            retry: RetryPolicy::from_config(&exec),
        };
        let pnl = PnlUpdater::new(ledger, feed.clone());

        let (queue_tx, queue_rx) = mpsc::channel(exec.queue_capacity.max(1));
        let workers = worker::spawn_workers(
            ctx.clone(),
            queue_rx,
            exec.workers,
            exec.fill_delay(),
            exec.fill_jitter_ms,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = RestingOrderMonitor::new(ctx.clone(), feed.subscribe(), exec.reevaluate_interval());
        let background = vec![
            monitor.spawn(shutdown_rx.clone()),
            pnl.clone()
                .spawn(config.pnl.refresh_interval(), shutdown_rx),
        ];

        info!(
            "Paper broker initialized with balance {} {} ({} workers)",
            config.account.initial_balance, config.account.currency, exec.workers
        );

        Self {
            config: exec,
            ctx,
            pnl,
            queue: RwLock::new(Some(queue_tx)),
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(workers),
            background: Mutex::new(background),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.ctx.events.subscribe()
    }

    pub async fn get_position(&self, symbol: &str) -> Option<Position> {
        self.ctx.ledger.position(symbol).await
    }

    /// Mark one symbol at `price`
    pub async fn refresh_pnl(&self, symbol: &str, price: Decimal) -> Option<Decimal> {
        self.pnl.refresh(symbol, price).await
    }

    /// Mark every open position at the feed's latest price
    pub async fn update_positions_pnl(&self) -> usize {
        self.pnl.refresh_all().await
    }

    pub async fn reset_daily_pnl(&self) {
        self.ctx.ledger.reset_daily_pnl().await;
        info!("Daily PnL reset");
    }

    /// Stop accepting orders, drain queued fills and stop background tasks.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Paper broker shutting down");

        // Dropping the only sender lets workers drain and exit
        self.queue.write().await.take();
        for handle in self.workers.lock().await.drain(..) {
            if let Err(e) = handle.await {
                warn!("fill worker ended abnormally: {}", e);
            }
        }

        let _ = self.shutdown_tx.send(true);
        for handle in self.background.lock().await.drain(..) {
            if let Err(e) = handle.await {
                warn!("background task ended abnormally: {}", e);
            }
        }
        info!("Paper broker stopped");
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BrokerError::ShuttingDown);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }

    async fn enqueue(&self, order_id: &str) -> Result<()> {
        let sender = self.queue.read().await.clone();
        let Some(sender) = sender else {
            return Err(BrokerError::ShuttingDown);
        };
        sender
            .send(order_id.to_string())
            .await
            .map_err(|_| BrokerError::ShuttingDown)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn create_order(&self, request: OrderRequest) -> Result<String> {
        self.ensure_accepting()?;
        let kind = validate(&request).map_err(|e| {
            warn!(symbol = %request.symbol, "Order validation failed: {}", e);
            e
        })?;

        // Known token: skip the price lookup, admit() re-checks under the lock
        if let Some(token) = request.client_id.as_deref() {
            if let Some(existing) = self.ctx.ledger.bound_order(token).await {
                info!(client_id = token, order_id = %existing, "Duplicate order submission");
                return Ok(existing);
            }
        }

        let funds_price = if request.side == OrderSide::Buy && kind == OrderKind::Market {
            Some(self.ctx.fetch_price(&request.symbol).await?)
        } else {
            None
        };

        let ttl_secs = request.ttl_secs.or(self.config.resting_order_ttl_secs);
        let admission = self
            .ctx
            .ledger
            .admit(&request, kind, ttl_secs, funds_price)
            .await
            .map_err(|e| {
                warn!(symbol = %request.symbol, "Order refused: {}", e);
                e
            })?;

        let order = match admission {
            Admission::Duplicate(existing) => {
                info!(order_id = %existing, "Duplicate order submission");
                return Ok(existing);
            }
            Admission::Created(order) => order,
        };

        info!(
            order_id = %order.id,
            "Order created: {} {} {} {}",
            order.order_type(), order.side, order.quantity, order.symbol
        );
        let order_id = order.id.clone();
        self.ctx.events.publish(BrokerEvent::OrderCreated { order });

        if let Err(e) = self.enqueue(&order_id).await {
            let reason = "broker shutting down";
            if self.ctx.ledger.reject(&order_id, reason).await {
                self.ctx.events.publish(BrokerEvent::OrderRejected {
                    order_id: order_id.clone(),
                    reason: reason.to_string(),
                });
            }
            return Err(e);
        }
        debug!(order_id = %order_id, "order queued for evaluation");
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        match self.ctx.ledger.cancel(order_id).await {
            Some(order) => {
                info!(order_id = %order.id, "Order cancelled");
                self.ctx.events.publish(BrokerEvent::OrderCancelled { order_id: order.id });
                Ok(true)
            }
            None => {
                debug!(order_id, "cancel ignored: unknown or terminal order");
                Ok(false)
            }
        }
    }

    async fn get_order(&self, order_id: &str) -> Option<Order> {
        self.ctx.ledger.order(order_id).await
    }

    async fn get_orders(&self, filter: OrderFilter) -> Vec<Order> {
        self.ctx.ledger.orders(&filter).await
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Vec<Position> {
        self.ctx.ledger.positions(symbol).await
    }

    async fn get_executions(&self, filter: ExecutionFilter) -> Vec<Execution> {
        self.ctx.ledger.executions(&filter).await
    }

    async fn get_balance(&self) -> HashMap<String, Decimal> {
        self.ctx.ledger.balances().await
    }

    async fn get_account_summary(&self) -> AccountSummary {
        self.ctx.ledger.summary().await
    }

    async fn connect(&self) -> Result<()> {
        if !self.ctx.feed.is_connected().await {
            self.ctx.feed.connect().await?;
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("Paper broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Paper broker disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.ctx.feed.is_connected().await
    }
}
