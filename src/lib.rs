pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod logging;

pub use config::AppConfig;
pub use domain::{
    AccountSummary, Execution, Order, OrderKind, OrderRequest, OrderSide, OrderStatus, OrderType,
    Position,
};
pub use engine::{BrokerEvent, PaperBroker};
pub use error::{BrokerError, Result};
pub use exchange::{Broker, ExecutionFilter, OrderFilter};
pub use feed::{DataFeed, InMemoryFeed, PriceTick};
