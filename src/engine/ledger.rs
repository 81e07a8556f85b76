//! Account ledger: cash, orders, executions and positions.
//!
//! [`Account`] holds the state and does all arithmetic synchronously.
//! [`Ledger`] wraps it in a single async mutex; every balance or position
//! change goes through that one critical section, so concurrent fills on
//! the same account serialize and check-then-act on order status is safe.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::idempotency::{generate_token, IdempotencyTable};
use crate::domain::{
    AccountSummary, Execution, Order, OrderKind, OrderRequest, OrderSide, OrderStatus, Position,
};
use crate::error::{BrokerError, Result};
use crate::exchange::{ExecutionFilter, OrderFilter};

pub const INSUFFICIENT_FUNDS_AT_EXECUTION: &str = "insufficient funds at execution time";
pub const NOTIONAL_OUT_OF_RANGE: &str = "order notional out of range";

/// Result of admitting an order request
#[derive(Debug, Clone)]
pub enum Admission {
    /// New order stored as PENDING
    Created(Order),
    /// The client token was already bound to this order id
    Duplicate(String),
}

impl Admission {
    pub fn order_id(&self) -> &str {
        match self {
            Admission::Created(order) => &order.id,
            Admission::Duplicate(id) => id,
        }
    }
}

/// Result of trying to apply a fill
#[derive(Debug, Clone)]
pub enum FillOutcome {
    Filled(Execution),
    Rejected(String),
    /// The order outlived its time to live before the fill landed
    Expired,
    /// The order was no longer active (cancel won the race, etc.)
    Skipped(OrderStatus),
}

/// Ledger root. Mutated only through its methods.
#[derive(Debug)]
pub struct Account {
    currency: String,
    balance: Decimal,
    commission_rate: Decimal,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    /// Order ids in creation order
    order_seq: Vec<String>,
    executions: Vec<Execution>,
    realized_pnl: Decimal,
    /// Realized PnL per symbol, kept after a position goes flat
    realized_by_symbol: HashMap<String, Decimal>,
    daily_pnl: Decimal,
    pnl_day: NaiveDate,
    idempotency: IdempotencyTable,
}

impl Account {
    pub fn new(currency: impl Into<String>, initial_balance: Decimal, commission_rate: Decimal) -> Self {
        Self {
            currency: currency.into(),
            balance: initial_balance,
            commission_rate,
            positions: HashMap::new(),
            orders: HashMap::new(),
            order_seq: Vec::new(),
            executions: Vec::new(),
            realized_pnl: Decimal::ZERO,
            realized_by_symbol: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            pnl_day: Utc::now().date_naive(),
            idempotency: IdempotencyTable::new(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    // ==================== Admission ====================

    /// Order id already bound to `token`, if any
    pub fn bound_order(&self, token: &str) -> Option<String> {
        self.idempotency.register(token)
    }

    /// Check the client token, pre-check funds and store a PENDING order.
    ///
    /// `funds_price` is the market price observed for a MARKET BUY; the
    /// projected notional at that price must not exceed the cash balance.
    pub fn admit(
        &mut self,
        request: &OrderRequest,
        kind: OrderKind,
        ttl_secs: Option<u64>,
        funds_price: Option<Decimal>,
    ) -> Result<Admission> {
        let token = request.client_id.clone().unwrap_or_else(generate_token);
        if let Some(existing) = self.idempotency.register(&token) {
            debug!(client_id = %token, order_id = %existing, "duplicate submission");
            return Ok(Admission::Duplicate(existing));
        }

        if request.side == OrderSide::Buy && kind == OrderKind::Market {
            let price = funds_price.ok_or_else(|| {
                BrokerError::Internal("market buy admitted without a price".to_string())
            })?;
            let required = request
                .quantity
                .checked_mul(price)
                .ok_or_else(|| BrokerError::InvalidOrder(NOTIONAL_OUT_OF_RANGE.to_string()))?;
            if required > self.balance {
                return Err(BrokerError::InsufficientFunds {
                    required,
                    available: self.balance,
                });
            }
        }

        let order = Order::new(
            token.clone(),
            request.symbol.clone(),
            request.side,
            kind,
            request.quantity,
            ttl_secs,
        );
        self.idempotency.bind(&token, &order.id)?;
        self.order_seq.push(order.id.clone());
        self.orders.insert(order.id.clone(), order.clone());
        Ok(Admission::Created(order))
    }

    // ==================== Transitions ====================

    /// Cancel an active order. `None` when unknown or already terminal.
    pub fn cancel(&mut self, order_id: &str) -> Option<Order> {
        let order = self.orders.get_mut(order_id)?;
        if !order.status.is_active() {
            return None;
        }
        order.transition(OrderStatus::Cancelled, None);
        Some(order.clone())
    }

    /// Move an order to SUBMITTED (resting), optionally noting why.
    ///
    /// Returns `Some(true)` when it left PENDING, `Some(false)` when it was
    /// already resting, `None` when it is unknown or terminal.
    pub fn mark_resting(&mut self, order_id: &str, note: Option<String>) -> Option<bool> {
        let order = self.orders.get_mut(order_id)?;
        match order.status {
            OrderStatus::Pending => {
                order.transition(OrderStatus::Submitted, note);
                Some(true)
            }
            OrderStatus::Submitted => {
                if note.is_some() {
                    order.transition(OrderStatus::Submitted, note);
                }
                Some(false)
            }
            _ => None,
        }
    }

    /// Reject an active order with `reason`
    pub fn reject(&mut self, order_id: &str, reason: &str) -> bool {
        match self.orders.get_mut(order_id) {
            Some(order) if order.status.is_active() => {
                order.transition(OrderStatus::Rejected, Some(reason.to_string()));
                true
            }
            _ => false,
        }
    }

    /// Expire every active order whose time to live has run out.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<Order> {
        let mut expired = Vec::new();
        for order in self.orders.values_mut() {
            if order.status.is_active() && order.is_expired_at(now) {
                order.transition(OrderStatus::Expired, None);
                expired.push(order.clone());
            }
        }
        expired
    }

    /// Apply a full fill at `fill_price`.
    ///
    /// Status is re-checked here, inside the ledger lock, so a cancel that
    /// landed first turns this into a no-op. Every amount is computed
    /// before anything is written; a fill whose arithmetic leaves `Decimal`
    /// range rejects the order and leaves the account unchanged.
    pub fn apply_fill(&mut self, order_id: &str, fill_price: Decimal) -> Result<FillOutcome> {
        let now = Utc::now();
        self.roll_day(now);
        let commission_rate = self.commission_rate;
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::NotFound {
                order_id: order_id.to_string(),
            })?;

        if !order.status.is_active() {
            return Ok(FillOutcome::Skipped(order.status));
        }
        if order.is_expired_at(now) {
            order.transition(OrderStatus::Expired, None);
            return Ok(FillOutcome::Expired);
        }

        let quantity = order.remaining();
        let amounts = quantity.checked_mul(fill_price).and_then(|notional| {
            notional
                .checked_mul(commission_rate)
                .map(|fee| (notional, fee))
        });
        let Some((notional, fee)) = amounts else {
            return Ok(reject_fill(order, NOTIONAL_OUT_OF_RANGE));
        };

        let balance_after = match order.side {
            OrderSide::Buy => {
                let Some(cost) = notional.checked_add(fee) else {
                    return Ok(reject_fill(order, NOTIONAL_OUT_OF_RANGE));
                };
                if cost > self.balance {
                    debug!(order_id = %order.id, %cost, balance = %self.balance, "cost exceeds cash");
                    return Ok(reject_fill(order, INSUFFICIENT_FUNDS_AT_EXECUTION));
                }
                self.balance.checked_sub(cost)
            }
            OrderSide::Sell => notional
                .checked_sub(fee)
                .and_then(|proceeds| self.balance.checked_add(proceeds)),
        };

        let symbol = order.symbol.clone();
        let mut position = self.positions.get(&symbol).cloned().unwrap_or_else(|| {
            let mut fresh = Position::flat(symbol.clone());
            fresh.realized_pnl = self
                .realized_by_symbol
                .get(&symbol)
                .copied()
                .unwrap_or_default();
            fresh
        });
        let booked = position.apply_fill(order.side.sign() * quantity, fill_price);

        let totals = match (balance_after, booked) {
            (Some(balance), Some(realized)) => self
                .realized_pnl
                .checked_add(realized)
                .zip(self.daily_pnl.checked_add(realized))
                .map(|(total, daily)| (balance, total, daily)),
            _ => None,
        };
        let Some((balance, realized_total, daily_total)) = totals else {
            return Ok(reject_fill(order, NOTIONAL_OUT_OF_RANGE));
        };

        let execution = Execution::for_order(order, fill_price, fee);
        order.record_fill(fill_price);

        self.balance = balance;
        self.realized_pnl = realized_total;
        self.daily_pnl = daily_total;
        self.realized_by_symbol
            .insert(symbol.clone(), position.realized_pnl);
        if position.is_flat() {
            self.positions.remove(&symbol);
        } else {
            self.positions.insert(symbol, position);
        }
        self.executions.push(execution.clone());

        info!(
            order_id = %execution.order_id,
            "Order filled: {} {} {} @ {} (fee {})",
            execution.side, execution.quantity, execution.symbol, execution.price, execution.fee
        );
        Ok(FillOutcome::Filled(execution))
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.pnl_day {
            debug!(previous = %self.pnl_day, %today, "daily pnl rollover");
            self.pnl_day = today;
            self.daily_pnl = Decimal::ZERO;
        }
    }

    pub fn reset_daily_pnl(&mut self) {
        self.pnl_day = Utc::now().date_naive();
        self.daily_pnl = Decimal::ZERO;
    }

    /// Refresh unrealized PnL for `symbol`; `None` when flat or out of range.
    pub fn mark_to_market(&mut self, symbol: &str, price: Decimal) -> Option<Decimal> {
        self.positions
            .get_mut(symbol)
            .and_then(|position| position.mark_to_market(price))
    }

    // ==================== Queries ====================

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).cloned()
    }

    pub fn orders(&self, filter: &OrderFilter) -> Vec<Order> {
        self.order_seq
            .iter()
            .rev()
            .filter_map(|id| self.orders.get(id))
            .filter(|order| filter.matches(order))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    /// Resting (SUBMITTED) orders, oldest first
    pub fn resting_orders(&self, symbol: Option<&str>) -> Vec<Order> {
        self.order_seq
            .iter()
            .filter_map(|id| self.orders.get(id))
            .filter(|order| order.status == OrderStatus::Submitted)
            .filter(|order| symbol.map_or(true, |s| s == order.symbol))
            .cloned()
            .collect()
    }

    pub fn positions(&self, symbol: Option<&str>) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .values()
            .filter(|p| symbol.map_or(true, |s| s == p.symbol))
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).cloned()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        self.executions
            .iter()
            .rev()
            .filter(|execution| filter.matches(execution))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn balances(&self) -> HashMap<String, Decimal> {
        HashMap::from([(self.currency.clone(), self.balance)])
    }

    pub fn summary(&mut self) -> AccountSummary {
        self.roll_day(Utc::now());

        // Valuation saturates at the edge of Decimal range
        let unrealized = self
            .positions
            .values()
            .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.unrealized_pnl));
        let cost_basis = self
            .positions
            .values()
            .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.cost_basis()));

        AccountSummary {
            currency: self.currency.clone(),
            balance: self.balance,
            total_value: self.balance.saturating_add(cost_basis).saturating_add(unrealized),
            unrealized_pnl: unrealized,
            realized_pnl: self.realized_pnl,
            daily_pnl: self.daily_pnl,
            positions_count: self.positions.len(),
            orders_count: self.orders.len(),
            executions_count: self.executions.len(),
        }
    }
}

fn reject_fill(order: &mut Order, reason: &str) -> FillOutcome {
    warn!(order_id = %order.id, "fill rejected: {}", reason);
    order.transition(OrderStatus::Rejected, Some(reason.to_string()));
    FillOutcome::Rejected(reason.to_string())
}

/// Shared handle to one [`Account`]
#[derive(Debug, Clone)]
pub struct Ledger {
    account: Arc<Mutex<Account>>,
}

impl Ledger {
    pub fn new(account: Account) -> Self {
        Self {
            account: Arc::new(Mutex::new(account)),
        }
    }

    pub async fn admit(
        &self,
        request: &OrderRequest,
        kind: OrderKind,
        ttl_secs: Option<u64>,
        funds_price: Option<Decimal>,
    ) -> Result<Admission> {
        self.account
            .lock()
            .await
            .admit(request, kind, ttl_secs, funds_price)
    }

    pub async fn bound_order(&self, token: &str) -> Option<String> {
        self.account.lock().await.bound_order(token)
    }

    pub async fn cancel(&self, order_id: &str) -> Option<Order> {
        self.account.lock().await.cancel(order_id)
    }

    pub async fn mark_resting(&self, order_id: &str, note: Option<String>) -> Option<bool> {
        self.account.lock().await.mark_resting(order_id, note)
    }

    pub async fn reject(&self, order_id: &str, reason: &str) -> bool {
        self.account.lock().await.reject(order_id, reason)
    }

    pub async fn expire_due(&self, now: DateTime<Utc>) -> Vec<Order> {
        self.account.lock().await.expire_due(now)
    }

    pub async fn apply_fill(&self, order_id: &str, fill_price: Decimal) -> Result<FillOutcome> {
        self.account.lock().await.apply_fill(order_id, fill_price)
    }

    pub async fn mark_to_market(&self, symbol: &str, price: Decimal) -> Option<Decimal> {
        self.account.lock().await.mark_to_market(symbol, price)
    }

    pub async fn reset_daily_pnl(&self) {
        self.account.lock().await.reset_daily_pnl();
    }

    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.account.lock().await.order(order_id)
    }

    pub async fn orders(&self, filter: &OrderFilter) -> Vec<Order> {
        self.account.lock().await.orders(filter)
    }

    pub async fn resting_orders(&self, symbol: Option<&str>) -> Vec<Order> {
        self.account.lock().await.resting_orders(symbol)
    }

    pub async fn positions(&self, symbol: Option<&str>) -> Vec<Position> {
        self.account.lock().await.positions(symbol)
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.account.lock().await.position(symbol)
    }

    pub async fn open_symbols(&self) -> Vec<String> {
        self.account.lock().await.open_symbols()
    }

    pub async fn executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        self.account.lock().await.executions(filter)
    }

    pub async fn balances(&self) -> HashMap<String, Decimal> {
        self.account.lock().await.balances()
    }

    pub async fn summary(&self) -> AccountSummary {
        self.account.lock().await.summary()
    }
}
