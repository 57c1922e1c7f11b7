//! Escrow trade manager.
//!
//! Owns the Trade and its milestones. The monotonic trade state machine and
//! the `pending` milestone guard are the system's concurrency control: every
//! transition and disbursement precondition is checked here, under the
//! store's per-trade lock.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    InspectionStatus, MilestonePayment, MilestoneSchedule, MilestoneStatus, Trade, TradeSpec,
    TradeStatus,
};
use crate::error::{Result, TradelaneError};
use crate::persistence::TradeStore;

pub struct EscrowService {
    store: Arc<TradeStore>,
    schedule: MilestoneSchedule,
}

impl EscrowService {
    pub fn new(store: Arc<TradeStore>, schedule: MilestoneSchedule) -> Self {
        Self { store, schedule }
    }

    /// Create a trade record with its milestone schedule. The trade id is
    /// minted here, server-side; callers never supply their own.
    pub fn create_trade(&self, spec: TradeSpec) -> Result<Trade> {
        if spec.total_amount <= Decimal::ZERO {
            return Err(TradelaneError::InvalidTerms(format!(
                "trade amount must be positive, got {}",
                spec.total_amount
            )));
        }
        if spec.delivery_deadline <= Utc::now() {
            return Err(TradelaneError::InvalidTerms(format!(
                "delivery deadline {} must be in the future",
                spec.delivery_deadline
            )));
        }
        if spec.counterparty_ref.trim().is_empty() {
            return Err(TradelaneError::InvalidTerms(
                "counterparty reference must not be empty".to_string(),
            ));
        }

        let trade_id = Uuid::new_v4();
        let milestones = self.schedule.build(trade_id, spec.total_amount);
        let trade = Trade::new(trade_id, spec, milestones);

        self.store.insert(trade.clone())?;
        info!(
            "Trade {} created: {} {} for {}, {} milestones",
            trade.id,
            trade.total_amount,
            trade.currency,
            trade.counterparty_ref,
            trade.milestones.len()
        );
        Ok(trade)
    }

    pub fn get_trade(&self, trade_id: Uuid) -> Result<Trade> {
        self.store.get(trade_id)
    }

    pub fn list_trades(&self) -> Vec<Trade> {
        self.store.all()
    }

    /// CREATED -> FUNDED once the converted value is locked against the trade
    pub fn fund_trade(&self, trade_id: Uuid) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            if trade.status == TradeStatus::Funded {
                return Err(TradelaneError::AlreadyFunded(trade_id));
            }
            transition(trade, TradeStatus::Funded)?;
            Ok(trade.clone())
        })
    }

    /// Record a quality inspection outcome. Only valid while FUNDED and only
    /// for trades that require inspection.
    pub fn submit_inspection(
        &self,
        trade_id: Uuid,
        passed: bool,
        certificate_ref: Option<String>,
    ) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            if !trade.inspection_required {
                return Err(TradelaneError::Validation(format!(
                    "trade {} does not require inspection",
                    trade_id
                )));
            }
            if trade.status != TradeStatus::Funded {
                return Err(TradelaneError::Validation(format!(
                    "inspection only valid while FUNDED, trade {} is {}",
                    trade_id, trade.status
                )));
            }

            trade.inspection_status = if passed {
                InspectionStatus::Passed
            } else {
                InspectionStatus::Failed
            };
            trade.inspection_certificate = certificate_ref;
            info!(
                "Trade {} inspection recorded: {:?}",
                trade_id, trade.inspection_status
            );
            Ok(trade.clone())
        })
    }

    /// FUNDED -> SHIPPED, gated on a passed inspection where one is required
    pub fn confirm_shipment(&self, trade_id: Uuid, tracking_ref: &str) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            if trade.status == TradeStatus::Funded
                && trade.inspection_required
                && trade.inspection_status != InspectionStatus::Passed
            {
                return Err(TradelaneError::Validation(format!(
                    "trade {} requires a passed inspection before shipment, inspection is {:?}",
                    trade_id, trade.inspection_status
                )));
            }
            transition(trade, TradeStatus::Shipped)?;
            trade.tracking_number = Some(tracking_ref.to_string());
            Ok(trade.clone())
        })
    }

    /// SHIPPED -> DELIVERED; promotes to COMPLETED once every milestone has
    /// been received.
    pub fn confirm_delivery(&self, trade_id: Uuid) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            transition(trade, TradeStatus::Delivered)?;
            maybe_complete(trade);
            Ok(trade.clone())
        })
    }

    /// Absorbing dispute transition, valid from any non-terminal state
    pub fn dispute(&self, trade_id: Uuid, reason: &str) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            transition(trade, TradeStatus::Disputed)?;
            info!("Trade {} disputed: {}", trade_id, reason);
            Ok(trade.clone())
        })
    }

    /// Absorbing cancel transition, valid from any non-terminal state
    pub fn cancel(&self, trade_id: Uuid, reason: &str) -> Result<Trade> {
        self.store.with_trade_mut(trade_id, |trade| {
            transition(trade, TradeStatus::Cancelled)?;
            info!("Trade {} cancelled: {}", trade_id, reason);
            Ok(trade.clone())
        })
    }

    /// Disbursement guard; see `Trade::ensure_milestone_payable`
    pub fn payable_milestone(&self, trade_id: Uuid, milestone_id: Uuid) -> Result<MilestonePayment> {
        let trade = self.store.get(trade_id)?;
        trade.ensure_milestone_payable(milestone_id).cloned()
    }

    /// Mark a milestone `sent` after the payout rail accepted the transfer.
    /// Re-validates the payable guard under the trade lock; the `pending`
    /// check here is what makes double-disbursement impossible.
    pub fn mark_milestone_sent(
        &self,
        trade_id: Uuid,
        milestone_id: Uuid,
        transfer_ref: &str,
    ) -> Result<()> {
        self.store.with_trade_mut(trade_id, |trade| {
            trade.ensure_milestone_payable(milestone_id)?;
            let milestone = trade.milestone_mut(milestone_id)?;
            milestone.status = MilestoneStatus::Sent;
            milestone.transaction_ref = Some(transfer_ref.to_string());
            info!(
                "Milestone {} of trade {} sent (transfer {})",
                milestone_id, trade_id, transfer_ref
            );
            Ok(())
        })
    }

    /// SENT -> RECEIVED once the payout rail confirms completion. Promotes
    /// the trade to COMPLETED when it is DELIVERED and fully settled.
    pub fn mark_milestone_received(&self, trade_id: Uuid, milestone_id: Uuid) -> Result<()> {
        self.store.with_trade_mut(trade_id, |trade| {
            let milestone = trade.milestone_mut(milestone_id)?;
            if milestone.status != MilestoneStatus::Sent {
                return Err(TradelaneError::Validation(format!(
                    "milestone {} is {}, only sent milestones can be received",
                    milestone_id, milestone.status
                )));
            }
            milestone.status = MilestoneStatus::Received;
            milestone.completed_at = Some(Utc::now());
            maybe_complete(trade);
            Ok(())
        })
    }

    /// Record a payout failure. The milestone is left `failed` with the
    /// failed transfer's reference still attached for the audit trail; it is
    /// never reset automatically, an operator reopens it for a retry with a
    /// new key.
    pub fn mark_milestone_failed(&self, trade_id: Uuid, milestone_id: Uuid) -> Result<()> {
        self.store.with_trade_mut(trade_id, |trade| {
            let milestone = trade.milestone_mut(milestone_id)?;
            if !matches!(
                milestone.status,
                MilestoneStatus::Pending | MilestoneStatus::Sent
            ) {
                return Err(TradelaneError::Validation(format!(
                    "milestone {} is {}, cannot mark failed",
                    milestone_id, milestone.status
                )));
            }
            milestone.status = MilestoneStatus::Failed;
            info!(
                "Milestone {} of trade {} failed (transfer {:?})",
                milestone_id, trade_id, milestone.transaction_ref
            );
            Ok(())
        })
    }

    /// Operator action: reopen a failed milestone so it can be retried with
    /// a fresh idempotency key.
    pub fn reopen_milestone(&self, trade_id: Uuid, milestone_id: Uuid) -> Result<()> {
        self.store.with_trade_mut(trade_id, |trade| {
            let milestone = trade.milestone_mut(milestone_id)?;
            if milestone.status != MilestoneStatus::Failed {
                return Err(TradelaneError::Validation(format!(
                    "milestone {} is {}, only failed milestones can be reopened",
                    milestone_id, milestone.status
                )));
            }
            milestone.status = MilestoneStatus::Pending;
            // The next attempt gets its own transfer reference
            milestone.transaction_ref = None;
            Ok(())
        })
    }
}

fn transition(trade: &mut Trade, target: TradeStatus) -> Result<()> {
    if !trade.status.can_transition_to(target) {
        return Err(TradelaneError::InvalidStateTransition {
            from: trade.status.to_string(),
            to: target.to_string(),
        });
    }
    info!("Trade {} {} -> {}", trade.id, trade.status, target);
    trade.status = target;
    Ok(())
}

fn maybe_complete(trade: &mut Trade) {
    if trade.status == TradeStatus::Delivered && trade.all_milestones_received() {
        info!("Trade {} fully settled, marking COMPLETED", trade.id);
        trade.status = TradeStatus::Completed;
    }
}
