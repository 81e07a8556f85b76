use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Order, OrderSide};

/// Immutable record of one fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Execution {
    pub fn for_order(order: &Order, price: Decimal, fee: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            fee,
            timestamp: Utc::now(),
        }
    }

    /// quantity × price, before fees
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Signed cash movement this fill caused
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => -(self.notional() + self.fee),
            OrderSide::Sell => self.notional() - self.fee,
        }
    }
}

/// Point-in-time view of the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub currency: String,
    pub balance: Decimal,
    pub total_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub positions_count: usize,
    pub orders_count: usize,
    pub executions_count: usize,
}
