//! In-process price feed for tests, demos and replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::{DataFeed, PriceTick};
use crate::error::{BrokerError, Result};

const TICK_CHANNEL_CAPACITY: usize = 1024;

/// Price map that callers drive with [`InMemoryFeed::set_price`].
pub struct InMemoryFeed {
    prices: RwLock<HashMap<String, Decimal>>,
    connected: AtomicBool,
    tick_tx: broadcast::Sender<PriceTick>,
}

impl InMemoryFeed {
    /// Create a disconnected feed with no quotes
    pub fn new() -> Self {
        let (tick_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self {
            prices: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            tick_tx,
        }
    }

    /// Create a feed seeded with initial quotes
    pub fn with_prices<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let mut feed = Self::new();
        let seeded = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.into(), price))
            .collect();
        feed.prices = RwLock::new(seeded);
        feed
    }

    /// Update the quote for `symbol` and publish a tick.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);

        // Nobody listening is fine
        let _ = self.tick_tx.send(PriceTick {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        });
        debug!(symbol, %price, "price updated");
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.prices.read().await.keys().cloned().collect()
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataFeed for InMemoryFeed {
    async fn get_latest_price(&self, symbol: &str) -> Result<Decimal> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::FeedUnavailable(
                "in-memory feed is disconnected".to_string(),
            ));
        }

        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::PriceUnavailable {
                symbol: symbol.to_string(),
            })
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!("In-memory feed connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("In-memory feed disconnected");
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PriceTick>> {
        Some(self.tick_tx.subscribe())
    }
}
