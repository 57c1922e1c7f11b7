use thiserror::Error;

/// Main error type for the payment orchestrator
#[derive(Error, Debug)]
pub enum TradelaneError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Quote errors
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Quote expired at {expires_at}")]
    QuoteExpired {
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    // Amount/terms validation
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid trade terms: {0}")]
    InvalidTerms(String),

    #[error("Invalid payout details: {0}")]
    InvalidDetails(String),

    // Provider errors
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Trade already funded: {0}")]
    AlreadyFunded(uuid::Uuid),

    // Lookup errors
    #[error("Trade not found: {0}")]
    TradeNotFound(uuid::Uuid),

    #[error("Milestone not found: {0}")]
    MilestoneNotFound(uuid::Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // Flow errors
    #[error("Flow halted at step {step}: {reason}")]
    FlowHalted { step: String, reason: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Webhook signature rejected: {0}")]
    WebhookSignature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TradelaneError {
    /// Transient errors may be retried with backoff; everything else is
    /// either a validation failure or a terminal provider outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            TradelaneError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            TradelaneError::ProviderUnavailable(_) | TradelaneError::RateLimited(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for TradelaneError
pub type Result<T> = std::result::Result<T, TradelaneError>;
