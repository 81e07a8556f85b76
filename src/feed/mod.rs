//! Market data capability consumed by the engine.
//!
//! The engine never owns market truth; it asks a [`DataFeed`] for the latest
//! price and, when the feed can push updates, listens for [`PriceTick`]s to
//! re-evaluate resting orders.

pub mod memory;
pub mod random_walk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub use memory::InMemoryFeed;
pub use random_walk::{spawn_random_walk, RandomWalkConfig};

/// Latest traded price for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Latest price for `symbol`.
    ///
    /// Fails with a retryable error while disconnected or when the symbol
    /// has never been quoted.
    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal>;

    async fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Push stream of price updates, if the feed has one.
    fn subscribe(&self) -> Option<broadcast::Receiver<PriceTick>> {
        None
    }
}
