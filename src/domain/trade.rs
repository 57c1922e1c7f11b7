use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MilestonePayment, MilestoneStatus};
use crate::error::{Result, TradelaneError};

/// Escrow trade lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// Trade record created, escrow not yet funded
    Created,
    /// Converted value locked against the trade
    Funded,
    /// Supplier confirmed shipment
    Shipped,
    /// Buyer confirmed delivery
    Delivered,
    /// Delivered and every milestone received
    Completed,
    /// Absorbing state: under dispute
    Disputed,
    /// Absorbing state: cancelled
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Created => "CREATED",
            TradeStatus::Funded => "FUNDED",
            TradeStatus::Shipped => "SHIPPED",
            TradeStatus::Delivered => "DELIVERED",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Disputed => "DISPUTED",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }

    /// Position on the forward path; absorbing states have no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            TradeStatus::Created => Some(0),
            TradeStatus::Funded => Some(1),
            TradeStatus::Shipped => Some(2),
            TradeStatus::Delivered => Some(3),
            TradeStatus::Completed => Some(4),
            TradeStatus::Disputed | TradeStatus::Cancelled => None,
        }
    }

    /// Has the trade advanced at least as far as `gate` on the forward path?
    pub fn has_reached(&self, gate: TradeStatus) -> bool {
        match (self.rank(), gate.rank()) {
            (Some(current), Some(required)) => current >= required,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Completed | TradeStatus::Disputed | TradeStatus::Cancelled
        )
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: TradeStatus) -> bool {
        use TradeStatus::*;

        match (self, target) {
            // Forward path
            (Created, Funded) => true,
            (Funded, Shipped) => true,
            (Shipped, Delivered) => true,
            (Delivered, Completed) => true,

            // Absorbing states, reachable from any non-terminal state
            (Created | Funded | Shipped | Delivered, Disputed) => true,
            (Created | Funded | Shipped | Delivered, Cancelled) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    pub fn valid_transitions(&self) -> Vec<TradeStatus> {
        use TradeStatus::*;

        match self {
            Created => vec![Funded, Disputed, Cancelled],
            Funded => vec![Shipped, Disputed, Cancelled],
            Shipped => vec![Delivered, Disputed, Cancelled],
            Delivered => vec![Completed, Disputed, Cancelled],
            Completed | Disputed | Cancelled => vec![],
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.trim().to_uppercase().as_str() {
            "CREATED" => Ok(TradeStatus::Created),
            "FUNDED" => Ok(TradeStatus::Funded),
            "SHIPPED" => Ok(TradeStatus::Shipped),
            "DELIVERED" => Ok(TradeStatus::Delivered),
            "COMPLETED" => Ok(TradeStatus::Completed),
            "DISPUTED" => Ok(TradeStatus::Disputed),
            "CANCELLED" => Ok(TradeStatus::Cancelled),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

/// Quality inspection outcome for a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionStatus {
    Pending,
    Passed,
    Failed,
    NotRequired,
}

/// The terms a trade is created with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSpec {
    pub buyer_ref: String,
    pub counterparty_ref: String,
    pub total_amount: Decimal,
    /// Settlement asset the escrow value is denominated in
    pub currency: String,
    pub delivery_deadline: DateTime<Utc>,
    pub quality_requirements: String,
    pub inspection_required: bool,
}

/// An escrow trade / letter-of-credit record.
///
/// The trade's monotonic state machine is the system's concurrency control:
/// no distributed lock spans the three external rails, so every disbursement
/// guard is expressed as a status check here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub buyer_ref: String,
    pub counterparty_ref: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: TradeStatus,
    pub inspection_required: bool,
    pub inspection_status: InspectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspection_certificate: Option<String>,
    pub quality_requirements: String,
    pub delivery_deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub milestones: Vec<MilestonePayment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(id: Uuid, spec: TradeSpec, milestones: Vec<MilestonePayment>) -> Self {
        let now = Utc::now();
        Self {
            id,
            buyer_ref: spec.buyer_ref,
            counterparty_ref: spec.counterparty_ref,
            total_amount: spec.total_amount,
            currency: spec.currency,
            status: TradeStatus::Created,
            inspection_required: spec.inspection_required,
            inspection_status: if spec.inspection_required {
                InspectionStatus::Pending
            } else {
                InspectionStatus::NotRequired
            },
            inspection_certificate: None,
            quality_requirements: spec.quality_requirements,
            delivery_deadline: spec.delivery_deadline,
            tracking_number: None,
            milestones,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn milestone(&self, milestone_id: Uuid) -> Result<&MilestonePayment> {
        self.milestones
            .iter()
            .find(|m| m.id == milestone_id)
            .ok_or(TradelaneError::MilestoneNotFound(milestone_id))
    }

    pub fn milestone_mut(&mut self, milestone_id: Uuid) -> Result<&mut MilestonePayment> {
        self.milestones
            .iter_mut()
            .find(|m| m.id == milestone_id)
            .ok_or(TradelaneError::MilestoneNotFound(milestone_id))
    }

    pub fn all_milestones_received(&self) -> bool {
        self.milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Received)
    }

    /// Guard for disbursement. A milestone is payable only if:
    /// - it is still `pending`,
    /// - the trade has reached the stage it is tied to,
    /// - no earlier milestone is still `pending` or `failed`.
    pub fn ensure_milestone_payable(&self, milestone_id: Uuid) -> Result<&MilestonePayment> {
        let idx = self
            .milestones
            .iter()
            .position(|m| m.id == milestone_id)
            .ok_or(TradelaneError::MilestoneNotFound(milestone_id))?;
        let milestone = &self.milestones[idx];

        if milestone.status != MilestoneStatus::Pending {
            return Err(TradelaneError::Validation(format!(
                "milestone {} is {}, only pending milestones may be disbursed",
                milestone.id, milestone.status
            )));
        }

        let required = milestone.stage.required_status();
        if !self.status.has_reached(required) {
            return Err(TradelaneError::Validation(format!(
                "milestone {} requires trade status {} or later, trade is {}",
                milestone.id, required, self.status
            )));
        }

        if let Some(blocker) = self.milestones[..idx]
            .iter()
            .find(|m| !m.status.is_settled())
        {
            return Err(TradelaneError::Validation(format!(
                "milestone {} blocked by earlier milestone {} in status {}",
                milestone.id, blocker.id, blocker.status
            )));
        }

        Ok(milestone)
    }
}
