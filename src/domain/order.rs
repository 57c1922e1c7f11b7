use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Onramp order status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnrampOrderStatus {
    /// Order created, awaiting the buyer's local payment
    Pending,
    /// Local payment observed, conversion in flight
    Processing,
    /// Settlement asset delivered to the destination wallet
    Completed,
    /// Provider reported a terminal failure
    Failed,
    /// Order cancelled before completion
    Cancelled,
}

impl OnrampOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnrampOrderStatus::Pending => "pending",
            OnrampOrderStatus::Processing => "processing",
            OnrampOrderStatus::Completed => "completed",
            OnrampOrderStatus::Failed => "failed",
            OnrampOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OnrampOrderStatus::Completed
                | OnrampOrderStatus::Failed
                | OnrampOrderStatus::Cancelled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OnrampOrderStatus::Failed | OnrampOrderStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OnrampOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OnrampOrderStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "awaiting_payment" => Ok(OnrampOrderStatus::Pending),
            "processing" | "in_progress" => Ok(OnrampOrderStatus::Processing),
            "completed" | "complete" | "settled" => Ok(OnrampOrderStatus::Completed),
            "failed" | "error" => Ok(OnrampOrderStatus::Failed),
            "cancelled" | "canceled" => Ok(OnrampOrderStatus::Cancelled),
            _ => Err(format!("Unknown onramp order status: {}", s)),
        }
    }
}

/// Out-of-band instructions the buyer must act on to fund the order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInstructions {
    /// Payment reference the buyer must include
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_money_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// An onramp conversion order (local currency in, settlement asset out)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnrampOrder {
    /// Provider-issued order id; never fabricated locally
    pub id: String,
    pub source_amount: Decimal,
    pub source_currency: String,
    pub destination_amount: Option<Decimal>,
    pub destination_wallet: String,
    pub status: OnrampOrderStatus,
    pub payment_instructions: Option<PaymentInstructions>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnrampOrder {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_accepts_provider_spellings() {
        assert_eq!(
            OnrampOrderStatus::try_from("COMPLETED").unwrap(),
            OnrampOrderStatus::Completed
        );
        assert_eq!(
            OnrampOrderStatus::try_from("canceled").unwrap(),
            OnrampOrderStatus::Cancelled
        );
        assert_eq!(
            OnrampOrderStatus::try_from("awaiting_payment").unwrap(),
            OnrampOrderStatus::Pending
        );
        assert!(OnrampOrderStatus::try_from("unknown").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!OnrampOrderStatus::Pending.is_terminal());
        assert!(!OnrampOrderStatus::Processing.is_terminal());
        assert!(OnrampOrderStatus::Completed.is_terminal());
        assert!(OnrampOrderStatus::Failed.is_terminal());
        assert!(OnrampOrderStatus::Cancelled.is_terminal());

        assert!(!OnrampOrderStatus::Completed.is_failure());
        assert!(OnrampOrderStatus::Failed.is_failure());
    }
}
