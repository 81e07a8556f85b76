use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type as submitted by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

/// Validated order kind carrying exactly the prices its type needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit { price: Decimal },
    Stop { stop_price: Decimal },
    StopLimit { price: Decimal, stop_price: Decimal },
}

impl OrderKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Market => OrderType::Market,
            OrderKind::Limit { .. } => OrderType::Limit,
            OrderKind::Stop { .. } => OrderType::Stop,
            OrderKind::StopLimit { .. } => OrderType::StopLimit,
        }
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match self {
            OrderKind::Limit { price } | OrderKind::StopLimit { price, .. } => Some(*price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            OrderKind::Stop { stop_price } | OrderKind::StopLimit { stop_price, .. } => {
                Some(*stop_price)
            }
            _ => None,
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted, waiting for its first evaluation
    Pending,
    /// Order evaluated but not yet marketable; resting
    Submitted,
    /// Order fully filled
    Filled,
    /// Order cancelled by the caller
    Cancelled,
    /// Order rejected at fill time
    Rejected,
    /// Resting order outlived its time to live
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Submitted)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// Order request (what the caller wants to do)
///
/// Flat on purpose: this is the shape API layers hand over. The validator
/// turns it into an [`OrderKind`] before anything is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Idempotency token; generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Time to live for a resting order, in seconds
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            client_id: None,
            ttl_secs: None,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Stop,
            stop_price: Some(stop_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::StopLimit,
            price: Some(price),
            stop_price: Some(stop_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

/// Order (tracked by the ledger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        client_id: String,
        symbol: String,
        side: OrderSide,
        kind: OrderKind,
        quantity: Decimal,
        ttl_secs: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id,
            symbol,
            side,
            kind,
            quantity,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            // A ttl beyond chrono's range is good till cancelled
            expires_at: ttl_secs
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl)),
        }
    }

    pub fn order_type(&self) -> OrderType {
        self.kind.order_type()
    }

    /// Remaining quantity to fill
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    pub(crate) fn transition(&mut self, status: OrderStatus, error: Option<String>) {
        self.status = status;
        if error.is_some() {
            self.error_message = error;
        }
        self.updated_at = Utc::now();
    }

    pub(crate) fn record_fill(&mut self, fill_price: Decimal) {
        self.filled_quantity = self.quantity;
        self.average_price = Some(fill_price);
        self.error_message = None;
        self.transition(OrderStatus::Filled, None);
    }

    /// Notional value at the fill price (zero until filled)
    pub fn fill_value(&self) -> Decimal {
        match self.average_price {
            Some(price) => price * self.filled_quantity,
            None => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_limit() -> Order {
        Order::new(
            "client-1".to_string(),
            "EURUSD".to_string(),
            OrderSide::Buy,
            OrderKind::Limit { price: dec!(1.10) },
            dec!(0.5),
            None,
        )
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn test_kind_prices() {
        let kind = OrderKind::StopLimit {
            price: dec!(101),
            stop_price: dec!(100),
        };
        assert_eq!(kind.order_type(), OrderType::StopLimit);
        assert_eq!(kind.limit_price(), Some(dec!(101)));
        assert_eq!(kind.stop_price(), Some(dec!(100)));
        assert_eq!(OrderKind::Market.limit_price(), None);
    }

    #[test]
    fn test_new_order_is_pending_and_unfilled() {
        let order = pending_limit();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.filled_quantity, Decimal::ZERO);
        assert!(order.average_price.is_none());
        assert!(order.expires_at.is_none());
        assert_eq!(order.remaining(), dec!(0.5));
    }

    #[test]
    fn test_record_fill() {
        let mut order = pending_limit();
        order.record_fill(dec!(1.10));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, order.quantity);
        assert_eq!(order.average_price, Some(dec!(1.10)));
        assert_eq!(order.fill_value(), dec!(0.550));
    }

    #[test]
    fn test_expiry() {
        let order = Order::new(
            "c".to_string(),
            "EURUSD".to_string(),
            OrderSide::Sell,
            OrderKind::Market,
            dec!(1),
            Some(30),
        );
        let expires_at = order.expires_at.expect("ttl should set expiry");
        assert!(!order.is_expired_at(order.created_at));
        assert!(order.is_expired_at(expires_at));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        for ttl in [u64::MAX, i64::MAX as u64] {
            let order = Order::new(
                "c".to_string(),
                "EURUSD".to_string(),
                OrderSide::Buy,
                OrderKind::Market,
                dec!(1),
                Some(ttl),
            );
            assert!(order.expires_at.is_none());
        }
    }

    #[test]
    fn test_kind_serializes_with_type_tag() {
        let json = serde_json::to_value(OrderKind::Stop {
            stop_price: dec!(99.5),
        })
        .unwrap();
        assert_eq!(json["type"], "STOP");
        assert_eq!(json["stop_price"], "99.5");
    }
}
