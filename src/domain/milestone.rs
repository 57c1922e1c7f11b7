use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeStatus;
use crate::error::{Result, TradelaneError};

/// Delivery stage a milestone is contractually tied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStage {
    OrderConfirmed,
    ShipmentStarted,
    DeliveryConfirmed,
}

impl MilestoneStage {
    /// Minimum trade status that makes a milestone at this stage payable
    pub fn required_status(&self) -> TradeStatus {
        match self {
            MilestoneStage::OrderConfirmed => TradeStatus::Funded,
            MilestoneStage::ShipmentStarted => TradeStatus::Shipped,
            MilestoneStage::DeliveryConfirmed => TradeStatus::Delivered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStage::OrderConfirmed => "order_confirmed",
            MilestoneStage::ShipmentStarted => "shipment_started",
            MilestoneStage::DeliveryConfirmed => "delivery_confirmed",
        }
    }
}

impl std::fmt::Display for MilestoneStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Milestone payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    /// Not yet disbursed; the only state a transfer may be issued from
    Pending,
    /// Transfer accepted by the payout rail
    Sent,
    /// Payout rail confirmed completion
    Received,
    /// Payout failed; operator must retry with a new idempotency key
    Failed,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::Sent => "sent",
            MilestoneStatus::Received => "received",
            MilestoneStatus::Failed => "failed",
        }
    }

    /// A settled milestone no longer blocks later milestones
    pub fn is_settled(&self) -> bool {
        matches!(self, MilestoneStatus::Sent | MilestoneStatus::Received)
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payout transfer status as reported by the payout rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TransferStatus::Failed | TransferStatus::Cancelled)
    }
}

impl TryFrom<&str> for TransferStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "queued" => Ok(TransferStatus::Pending),
            "processing" | "in_progress" => Ok(TransferStatus::Processing),
            "completed" | "complete" | "success" | "successful" => Ok(TransferStatus::Completed),
            "failed" | "error" => Ok(TransferStatus::Failed),
            "cancelled" | "canceled" | "reversed" => Ok(TransferStatus::Cancelled),
            _ => Err(format!("Unknown transfer status: {}", s)),
        }
    }
}

/// One percentage-based release of a trade's value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonePayment {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub description: String,
    pub stage: MilestoneStage,
    pub percentage: Decimal,
    pub amount: Decimal,
    pub status: MilestoneStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry of a milestone release schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub stage: MilestoneStage,
    pub description: String,
    pub percentage: Decimal,
}

/// A validated milestone release schedule
#[derive(Debug, Clone)]
pub struct MilestoneSchedule {
    entries: Vec<ScheduleEntry>,
}

impl MilestoneSchedule {
    /// Build a schedule, rejecting percentages that do not sum to exactly 100.
    pub fn new(entries: Vec<ScheduleEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TradelaneError::InvalidTerms(
                "milestone schedule must not be empty".to_string(),
            ));
        }

        for entry in &entries {
            if entry.percentage <= Decimal::ZERO {
                return Err(TradelaneError::InvalidTerms(format!(
                    "milestone percentage must be positive, got {} for {}",
                    entry.percentage, entry.stage
                )));
            }
        }

        let sum: Decimal = entries.iter().map(|e| e.percentage).sum();
        if sum != Decimal::from(100) {
            return Err(TradelaneError::InvalidTerms(format!(
                "milestone percentages must sum to 100, got {sum}"
            )));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Materialize the schedule for a trade. Each amount is rounded to 2dp
    /// with the final milestone absorbing the remainder, so the amounts sum
    /// to `total_amount` exactly.
    pub fn build(&self, trade_id: Uuid, total_amount: Decimal) -> Vec<MilestonePayment> {
        let hundred = Decimal::from(100);
        let mut milestones = Vec::with_capacity(self.entries.len());
        let mut allocated = Decimal::ZERO;

        for (i, entry) in self.entries.iter().enumerate() {
            let amount = if i + 1 == self.entries.len() {
                total_amount - allocated
            } else {
                (total_amount * entry.percentage / hundred).round_dp(2)
            };
            allocated += amount;

            milestones.push(MilestonePayment {
                id: Uuid::new_v4(),
                trade_id,
                description: entry.description.clone(),
                stage: entry.stage,
                percentage: entry.percentage,
                amount,
                status: MilestoneStatus::Pending,
                transaction_ref: None,
                completed_at: None,
            });
        }

        milestones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn default_entries() -> Vec<ScheduleEntry> {
        vec![
            ScheduleEntry {
                stage: MilestoneStage::OrderConfirmed,
                description: "Order confirmation".into(),
                percentage: dec!(20),
            },
            ScheduleEntry {
                stage: MilestoneStage::ShipmentStarted,
                description: "Shipment start".into(),
                percentage: dec!(30),
            },
            ScheduleEntry {
                stage: MilestoneStage::DeliveryConfirmed,
                description: "Delivery confirmation".into(),
                percentage: dec!(50),
            },
        ]
    }

    #[test]
    fn default_schedule_splits_12500() {
        let schedule = MilestoneSchedule::new(default_entries()).unwrap();
        let milestones = schedule.build(Uuid::new_v4(), dec!(12_500));

        let amounts: Vec<Decimal> = milestones.iter().map(|m| m.amount).collect();
        assert_eq!(amounts, vec![dec!(2_500), dec!(3_750), dec!(6_250)]);
    }

    #[test]
    fn amounts_always_sum_to_total() {
        let schedule = MilestoneSchedule::new(default_entries()).unwrap();

        for total in [dec!(0.01), dec!(100.01), dec!(623.42), dec!(999_999.99)] {
            let milestones = schedule.build(Uuid::new_v4(), total);
            let sum: Decimal = milestones.iter().map(|m| m.amount).sum();
            assert_eq!(sum, total, "total {total} not preserved");
        }
    }

    #[test]
    fn schedule_rejects_bad_percentages() {
        let mut entries = default_entries();
        entries[2].percentage = dec!(49);
        assert!(matches!(
            MilestoneSchedule::new(entries),
            Err(TradelaneError::InvalidTerms(_))
        ));

        assert!(MilestoneSchedule::new(vec![]).is_err());

        let mut entries = default_entries();
        entries[0].percentage = dec!(-20);
        assert!(MilestoneSchedule::new(entries).is_err());
    }

    #[test]
    fn stage_gates_map_to_trade_status() {
        assert_eq!(
            MilestoneStage::OrderConfirmed.required_status(),
            TradeStatus::Funded
        );
        assert_eq!(
            MilestoneStage::ShipmentStarted.required_status(),
            TradeStatus::Shipped
        );
        assert_eq!(
            MilestoneStage::DeliveryConfirmed.required_status(),
            TradeStatus::Delivered
        );
    }

    #[test]
    fn transfer_status_parsing() {
        assert_eq!(
            TransferStatus::try_from("SUCCESS").unwrap(),
            TransferStatus::Completed
        );
        assert_eq!(
            TransferStatus::try_from("reversed").unwrap(),
            TransferStatus::Cancelled
        );
        assert!(TransferStatus::try_from("???").is_err());
    }
}
