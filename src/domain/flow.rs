use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OnrampOrderStatus, TradeStatus, TransferStatus};

/// Saga steps recorded in the payment flow log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStep {
    /// Local-currency deposit converted into the settlement asset
    Onramp,
    /// Escrow trade record created and funded
    Escrow,
    /// Milestone disbursement through the payout rail
    Payment,
    /// Delivery-stage milestone releases
    Delivery,
    /// Flow finished end to end
    Completed,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Onramp => "onramp",
            FlowStep::Escrow => "escrow",
            FlowStep::Payment => "payment",
            FlowStep::Delivery => "delivery",
            FlowStep::Completed => "completed",
        }
    }
}

impl std::fmt::Display for FlowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One append-only audit entry in a trade's payment flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEntry {
    pub step: FlowStep,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FlowEntry {
    pub fn new(step: FlowStep, status: StepStatus, data: serde_json::Value) -> Self {
        Self {
            step,
            status,
            data,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(step: FlowStep, error: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only execution log for one payment flow.
///
/// Single-writer: only the orchestrator instance holding the trade's lock
/// may append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowLog {
    entries: Vec<FlowEntry>,
}

impl FlowLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: FlowEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[FlowEntry] {
        &self.entries
    }

    /// Latest entry per step order, used to display flow progress
    pub fn current(&self) -> Option<&FlowEntry> {
        self.entries.last()
    }

    /// The step recorded as failed, if the flow halted
    pub fn failed_step(&self) -> Option<&FlowEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.status == StepStatus::Failed)
    }
}

/// Merged view over the three independently-failing subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Active,
    Pending,
    Failed,
}

impl OverallStatus {
    /// Merge rule: `Failed` if any subsystem reports a terminal failure;
    /// `Active` only once the onramp completed, the trade advanced past
    /// CREATED and no transfer is outstanding; `Pending` otherwise.
    pub fn merge(
        onramp: OnrampOrderStatus,
        trade: TradeStatus,
        transfer: Option<TransferStatus>,
    ) -> Self {
        let trade_failed = matches!(trade, TradeStatus::Disputed | TradeStatus::Cancelled);
        if onramp.is_failure() || trade_failed || transfer.map(|t| t.is_failure()).unwrap_or(false)
        {
            return OverallStatus::Failed;
        }

        let transfer_ok = transfer
            .map(|t| t == TransferStatus::Completed)
            .unwrap_or(true);
        if onramp == OnrampOrderStatus::Completed
            && trade.has_reached(TradeStatus::Funded)
            && transfer_ok
        {
            return OverallStatus::Active;
        }

        OverallStatus::Pending
    }
}

/// Per-subsystem statuses plus the merged overall view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub onramp: OnrampOrderStatus,
    pub trade: TradeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferStatus>,
    pub overall: OverallStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_active_requires_all_three() {
        assert_eq!(
            OverallStatus::merge(OnrampOrderStatus::Completed, TradeStatus::Funded, None),
            OverallStatus::Active
        );
        assert_eq!(
            OverallStatus::merge(
                OnrampOrderStatus::Completed,
                TradeStatus::Shipped,
                Some(TransferStatus::Completed)
            ),
            OverallStatus::Active
        );
    }

    #[test]
    fn merge_pending_while_any_leg_in_flight() {
        assert_eq!(
            OverallStatus::merge(OnrampOrderStatus::Processing, TradeStatus::Created, None),
            OverallStatus::Pending
        );
        assert_eq!(
            OverallStatus::merge(OnrampOrderStatus::Completed, TradeStatus::Created, None),
            OverallStatus::Pending
        );
        assert_eq!(
            OverallStatus::merge(
                OnrampOrderStatus::Completed,
                TradeStatus::Funded,
                Some(TransferStatus::Processing)
            ),
            OverallStatus::Pending
        );
    }

    #[test]
    fn merge_failed_on_any_terminal_failure() {
        assert_eq!(
            OverallStatus::merge(OnrampOrderStatus::Failed, TradeStatus::Created, None),
            OverallStatus::Failed
        );
        assert_eq!(
            OverallStatus::merge(OnrampOrderStatus::Completed, TradeStatus::Cancelled, None),
            OverallStatus::Failed
        );
        assert_eq!(
            OverallStatus::merge(
                OnrampOrderStatus::Completed,
                TradeStatus::Funded,
                Some(TransferStatus::Failed)
            ),
            OverallStatus::Failed
        );
    }

    #[test]
    fn flow_log_is_append_only_and_tracks_failure() {
        let mut log = FlowLog::new();
        log.append(FlowEntry::new(
            FlowStep::Onramp,
            StepStatus::Processing,
            serde_json::Value::Null,
        ));
        log.append(FlowEntry::new(
            FlowStep::Onramp,
            StepStatus::Completed,
            serde_json::json!({"order_id": "ord-1"}),
        ));
        log.append(FlowEntry::failed(FlowStep::Escrow, "provider down"));

        assert_eq!(log.entries().len(), 3);
        let failed = log.failed_step().unwrap();
        assert_eq!(failed.step, FlowStep::Escrow);
        assert_eq!(failed.error.as_deref(), Some("provider down"));
    }
}
