use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the paper broker
#[derive(Error, Debug)]
pub enum BrokerError {
    // Order admission errors
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    // Connectivity errors
    #[error("Broker is not connected")]
    NotConnected,

    #[error("Price feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("No price available for symbol: {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("Broker is shutting down")]
    ShuttingDown,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Transient failures the caller (or the fill path) may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::FeedUnavailable(_) | BrokerError::PriceUnavailable { .. }
        )
    }
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;
