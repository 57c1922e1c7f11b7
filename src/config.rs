use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::domain::{MilestoneStage, ScheduleEntry};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub onramp: RailConfig,
    pub payout: RailConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for one external payment rail
#[derive(Debug, Clone, Deserialize)]
pub struct RailConfig {
    /// REST base URL for the rail
    pub base_url: String,
    /// API key id sent in signed request headers
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret used for HMAC request signing
    #[serde(default)]
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Minimum transferable local-currency amount per onramp order
    pub min_order_amount: Decimal,
    /// Maximum transferable local-currency amount per onramp order
    pub max_order_amount: Decimal,
    /// Settlement asset held in escrow (e.g. "USDC")
    pub settlement_asset: String,
    /// Quote cache TTL in seconds (hard cap 60)
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,
    /// Milestone release schedule; percentages must sum to 100
    #[serde(default = "default_schedule")]
    pub milestone_schedule: Vec<ScheduleEntry>,
}

fn default_quote_ttl() -> u64 {
    60
}

fn default_schedule() -> Vec<ScheduleEntry> {
    use rust_decimal_macros::dec;

    vec![
        ScheduleEntry {
            stage: MilestoneStage::OrderConfirmed,
            description: "Order confirmation".to_string(),
            percentage: dec!(20),
        },
        ScheduleEntry {
            stage: MilestoneStage::ShipmentStarted,
            description: "Shipment start".to_string(),
            percentage: dec!(30),
        },
        ScheduleEntry {
            stage: MilestoneStage::DeliveryConfirmed,
            description: "Delivery confirmation".to_string(),
            percentage: dec!(50),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout for rate quote calls in milliseconds
    #[serde(default = "default_quote_timeout")]
    pub quote_timeout_ms: u64,
    /// Timeout for settlement operations (order/transfer creation) in milliseconds
    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_ms: u64,
    /// Maximum retry attempts for transient provider errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Polling interval for order/transfer status in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum status polls before giving the order back to the caller
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_quote_timeout() -> u64 {
    30_000
}

fn default_settlement_timeout() -> u64 {
    120_000
}

fn default_max_retries() -> u8 {
    3
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_max_polls() -> u32 {
    150
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            quote_timeout_ms: default_quote_timeout(),
            settlement_timeout_ms: default_settlement_timeout(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Bind address for the webhook callback server
    #[serde(default = "default_webhook_bind")]
    pub bind_addr: String,
    /// Shared secret for HMAC signature verification
    #[serde(default)]
    pub secret: String,
}

fn default_webhook_bind() -> String {
    "0.0.0.0:8090".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_webhook_bind(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
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
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("policy.quote_ttl_secs", 60)?
            .set_default("execution.poll_interval_ms", 2_000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADELANE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADELANE_ONRAMP__BASE_URL, etc.)
            .add_source(
                Environment::with_prefix("TRADELANE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load from `config_dir`, falling back to the sandbox defaults when no
    /// config file exists there. A present-but-invalid file is still an
    /// error.
    pub fn load_or_default<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let dir = config_dir.as_ref();
        if dir.join("default.toml").exists() {
            return Self::load_from(dir);
        }
        // Environment variables alone may still form a full config
        Self::load_from(dir).or_else(|_| Ok(Self::default_config()))
    }

    /// Create a default configuration for CLI usage
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            onramp: RailConfig {
                base_url: "https://onramp.sandbox.tradelane.dev".to_string(),
                api_key: None,
                api_secret: None,
            },
            payout: RailConfig {
                base_url: "https://payout.sandbox.tradelane.dev".to_string(),
                api_key: None,
                api_secret: None,
            },
            policy: PolicyConfig {
                min_order_amount: dec!(10_000),
                max_order_amount: dec!(50_000_000),
                settlement_asset: "USDC".to_string(),
                quote_ttl_secs: 60,
                milestone_schedule: default_schedule(),
            },
            execution: ExecutionConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.policy.min_order_amount <= Decimal::ZERO {
            errors.push("min_order_amount must be positive".to_string());
        }

        if self.policy.max_order_amount <= self.policy.min_order_amount {
            errors.push("max_order_amount must exceed min_order_amount".to_string());
        }

        if self.policy.settlement_asset.trim().is_empty() {
            errors.push("settlement_asset must be set".to_string());
        }

        // Quotes may be cached briefly, but never long enough to permit
        // execution against stale pricing.
        if self.policy.quote_ttl_secs > 60 {
            errors.push("quote_ttl_secs must not exceed 60".to_string());
        }

        let pct_sum: Decimal = self
            .policy
            .milestone_schedule
            .iter()
            .map(|entry| entry.percentage)
            .sum();
        if pct_sum != Decimal::from(100) {
            errors.push(format!(
                "milestone_schedule percentages must sum to 100, got {pct_sum}"
            ));
        }

        if self.execution.max_retries == 0 {
            errors.push("max_retries must be at least 1".to_string());
        }

        if self.execution.max_polls == 0 {
            errors.push("max_polls must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
