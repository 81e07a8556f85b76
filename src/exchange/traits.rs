use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountSummary, Execution, Order, OrderRequest, OrderStatus, Position};
use crate::error::Result;

pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Order query; results are newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            symbol: None,
            status: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl OrderFilter {
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.symbol.as_deref().map_or(true, |s| s == order.symbol)
            && self.status.map_or(true, |s| s == order.status)
    }
}

/// Execution query; results are newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            order_id: None,
            symbol: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl ExecutionFilter {
    pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        self.order_id
            .as_deref()
            .map_or(true, |id| id == execution.order_id)
            && self
                .symbol
                .as_deref()
                .map_or(true, |s| s == execution.symbol)
    }
}

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

/// Caller-facing broker contract.
///
/// `create_order` returns as soon as the order is admitted; fills happen
/// asynchronously and are observed by polling `get_order` or through the
/// broker's event stream.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_order(&self, request: OrderRequest) -> Result<String>;

    /// `false` when the order is unknown or already terminal.
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn get_order(&self, order_id: &str) -> Option<Order>;

    async fn get_orders(&self, filter: OrderFilter) -> Vec<Order>;

    async fn get_positions(&self, symbol: Option<&str>) -> Vec<Position>;

    async fn get_executions(&self, filter: ExecutionFilter) -> Vec<Execution>;

    /// Cash balance keyed by currency
    async fn get_balance(&self) -> HashMap<String, Decimal>;

    async fn get_account_summary(&self) -> AccountSummary;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, OrderSide};
    use rust_decimal_macros::dec;

    fn order(symbol: &str) -> Order {
        Order::new(
            "c1".to_string(),
            symbol.to_string(),
            OrderSide::Buy,
            OrderKind::Market,
            dec!(1),
            None,
        )
    }

    #[test]
    fn order_filter_defaults_to_everything() {
        let filter = OrderFilter::default();
        assert_eq!(filter.limit, DEFAULT_QUERY_LIMIT);
        assert!(filter.matches(&order("EURUSD")));
    }

    #[test]
    fn order_filter_matches_symbol_and_status() {
        let filter = OrderFilter::default()
            .symbol("EURUSD")
            .status(OrderStatus::Pending);
        assert!(filter.matches(&order("EURUSD")));
        assert!(!filter.matches(&order("GBPUSD")));
        assert!(!OrderFilter::default()
            .status(OrderStatus::Filled)
            .matches(&order("EURUSD")));
    }

    #[test]
    fn execution_filter_deserializes_with_default_limit() {
        let filter: ExecutionFilter = serde_json::from_str(r#"{"symbol":"EURUSD"}"#).unwrap();
        assert_eq!(filter.limit, DEFAULT_QUERY_LIMIT);
        assert_eq!(filter.symbol.as_deref(), Some("EURUSD"));
        assert!(filter.order_id.is_none());
    }
}
