use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Price lookups per evaluation are capped so one order cannot park a worker
pub const MAX_PRICE_RETRY_ATTEMPTS: u32 = 10;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub pnl: PnlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Starting cash balance
    pub initial_balance: Decimal,
    /// Currency the balance is held in
    pub currency: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(100000),
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Adverse price move applied to MARKET and STOP fills (0.0001 = 0.01%)
    pub slippage_rate: Decimal,
    /// Fee charged on notional (0.001 = 0.1%)
    pub commission_rate: Decimal,
    /// Simulated exchange round trip before the first evaluation
    pub fill_delay_ms: u64,
    /// Random extra delay on top of `fill_delay_ms`
    pub fill_jitter_ms: u64,
    /// Fill worker tasks
    pub workers: usize,
    /// Pending order queue capacity
    pub queue_capacity: usize,
    /// Price lookups per evaluation before giving up
    pub price_retry_attempts: u32,
    /// First retry delay; doubles on every attempt
    pub price_retry_backoff_ms: u64,
    /// Upper bound for a single retry delay
    pub price_retry_max_backoff_ms: u64,
    /// Periodic sweep over resting orders
    pub reevaluate_interval_ms: u64,
    /// Default time to live for resting orders (None = good till cancelled)
    pub resting_order_ttl_secs: Option<u64>,
    /// Broker event channel capacity
    pub event_capacity: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_rate: dec!(0.0001),
            commission_rate: dec!(0.001),
            fill_delay_ms: 100,
            fill_jitter_ms: 0,
            workers: 4,
            queue_capacity: 1024,
            price_retry_attempts: 3,
            price_retry_backoff_ms: 50,
            price_retry_max_backoff_ms: 2000,
            reevaluate_interval_ms: 250,
            resting_order_ttl_secs: None,
            event_capacity: 1024,
        }
    }
}

impl ExecutionConfig {
    pub fn fill_delay(&self) -> Duration {
        Duration::from_millis(self.fill_delay_ms)
    }

    pub fn reevaluate_interval(&self) -> Duration {
        Duration::from_millis(self.reevaluate_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PnlConfig {
    /// Unrealized PnL sweep interval
    pub refresh_interval_ms: u64,
}

impl Default for PnlConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
        }
    }
}

impl PnlConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for daily rolling log files (console only when unset)
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PAPERTRADE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PAPERTRADE__EXECUTION__WORKERS, etc.)
            .add_source(
                Environment::with_prefix("PAPERTRADE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.account.initial_balance <= Decimal::ZERO {
            errors.push("account.initial_balance must be positive".to_string());
        }

        if self.account.currency.trim().is_empty() {
            errors.push("account.currency must not be empty".to_string());
        }

        let rate_ok = |rate: Decimal| rate >= Decimal::ZERO && rate < Decimal::ONE;
        if !rate_ok(self.execution.slippage_rate) {
            errors.push("execution.slippage_rate must be in [0, 1)".to_string());
        }

        if !rate_ok(self.execution.commission_rate) {
            errors.push("execution.commission_rate must be in [0, 1)".to_string());
        }

        if self.execution.workers == 0 {
            errors.push("execution.workers must be at least 1".to_string());
        }

        if self.execution.queue_capacity == 0 {
            errors.push("execution.queue_capacity must be positive".to_string());
        }

        if self.execution.event_capacity == 0 {
            errors.push("execution.event_capacity must be positive".to_string());
        }

        if !(1..=MAX_PRICE_RETRY_ATTEMPTS).contains(&self.execution.price_retry_attempts) {
            errors.push(format!(
                "execution.price_retry_attempts must be between 1 and {}",
                MAX_PRICE_RETRY_ATTEMPTS
            ));
        }

        if self.execution.price_retry_max_backoff_ms < self.execution.price_retry_backoff_ms {
            errors.push(
                "execution.price_retry_max_backoff_ms must not be below price_retry_backoff_ms"
                    .to_string(),
            );
        }

        if self.execution.resting_order_ttl_secs == Some(0) {
            errors.push("execution.resting_order_ttl_secs must be positive when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
