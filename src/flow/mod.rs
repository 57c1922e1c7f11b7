//! End-to-end payment flow orchestration.
//!
//! The flow is a saga over three subsystems that fail independently: the
//! onramp rail, the escrow ledger and the payout rail. Every step is recorded
//! in an append-only [`FlowLog`] before and after execution, and a failed
//! step halts the flow where it stands. There is no automatic compensation;
//! a halted flow is resolved by an operator acting on the recorded state.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{
    FlowEntry, FlowLog, FlowStep, MilestoneStage, MilestoneStatus, OnrampOrder,
    OnrampOrderStatus, OverallStatus, StatusReport, StepStatus, TradeSpec, TradeStatus,
    TransferStatus,
};
use crate::error::{Result, TradelaneError};
use crate::rails::{CustomerIdentity, WebhookEvent};
use crate::services::{DisbursementService, EscrowService, OnrampService, PayoutDetails};

/// Everything needed to run a payment flow end to end
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub source_amount: rust_decimal::Decimal,
    pub source_currency: String,
    pub destination_wallet: String,
    pub customer: CustomerIdentity,
    /// Reuse on retried invocations: a repeated key replays the recorded
    /// flow instead of moving money a second time
    pub idempotency_key: Option<String>,
    pub trade: TradeSpec,
    pub payout: PayoutDetails,
}

/// What a completed (or partially completed) flow produced
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub flow_id: Uuid,
    pub order: OnrampOrder,
    pub trade_id: Uuid,
    /// Transfer reference for the first milestone disbursement
    pub transfer_ref: String,
}

struct FlowContext {
    order_id: String,
    trade_id: Option<Uuid>,
}

pub struct FlowOrchestrator {
    onramp: Arc<OnrampService>,
    escrow: Arc<EscrowService>,
    disbursement: Arc<DisbursementService>,
    logs: DashMap<Uuid, FlowLog>,
    contexts: DashMap<Uuid, FlowContext>,
    trade_to_flow: DashMap<Uuid, Uuid>,
    /// Caller idempotency key -> flow, so a retried invocation resumes the
    /// recorded flow instead of starting a second one
    flows_by_key: DashMap<String, Uuid>,
    outcomes: DashMap<Uuid, FlowOutcome>,
    /// One lock per trade: all milestone mutations for a trade serialize here
    trade_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FlowOrchestrator {
    pub fn new(
        onramp: Arc<OnrampService>,
        escrow: Arc<EscrowService>,
        disbursement: Arc<DisbursementService>,
    ) -> Self {
        Self {
            onramp,
            escrow,
            disbursement,
            logs: DashMap::new(),
            contexts: DashMap::new(),
            trade_to_flow: DashMap::new(),
            flows_by_key: DashMap::new(),
            outcomes: DashMap::new(),
            trade_locks: DashMap::new(),
        }
    }

    /// Run a flow: convert the buyer's local funds, create and fund the
    /// escrow trade, then disburse the first milestone.
    ///
    /// Halts at the first failed step with [`TradelaneError::FlowHalted`];
    /// completed steps are left exactly as they finished.
    ///
    /// A repeated caller idempotency key never starts a second flow: it
    /// returns the recorded outcome of the original, or the recorded halt
    /// if the original never finished.
    pub async fn run(&self, request: FlowRequest) -> Result<FlowOutcome> {
        let flow_id = Uuid::new_v4();
        if let Some(key) = request.idempotency_key.clone() {
            match self.flows_by_key.entry(key) {
                Entry::Occupied(existing) => {
                    let existing = *existing.get();
                    return self.replay(existing);
                }
                Entry::Vacant(slot) => {
                    slot.insert(flow_id);
                }
            }
        }
        self.logs.insert(flow_id, FlowLog::new());
        info!("Flow {} started for buyer {}", flow_id, request.trade.buyer_ref);

        // Step 1: onramp conversion
        self.append(
            flow_id,
            FlowEntry::new(FlowStep::Onramp, StepStatus::Processing, json!(null)),
        );
        let order = self
            .onramp
            .create_order(
                request.source_amount,
                &request.source_currency,
                &request.destination_wallet,
                request.customer.clone(),
                request.idempotency_key.clone(),
            )
            .await
            .map_err(|e| self.halt(flow_id, FlowStep::Onramp, e))?;
        self.contexts.insert(
            flow_id,
            FlowContext {
                order_id: order.id.clone(),
                trade_id: None,
            },
        );

        let order = self
            .onramp
            .await_completion(&order.id)
            .await
            .map_err(|e| self.halt(flow_id, FlowStep::Onramp, e))?;
        if order.status != OnrampOrderStatus::Completed {
            let reason = format!("onramp order {} ended {}", order.id, order.status);
            return Err(self.halt(flow_id, FlowStep::Onramp, TradelaneError::Validation(reason)));
        }
        self.append(
            flow_id,
            FlowEntry::new(
                FlowStep::Onramp,
                StepStatus::Completed,
                json!({ "order_id": order.id, "destination_amount": order.destination_amount }),
            ),
        );

        // Step 2: escrow trade creation and funding
        self.append(
            flow_id,
            FlowEntry::new(FlowStep::Escrow, StepStatus::Processing, json!(null)),
        );
        let trade = self
            .escrow
            .create_trade(request.trade.clone())
            .and_then(|t| self.escrow.fund_trade(t.id))
            .map_err(|e| self.halt(flow_id, FlowStep::Escrow, e))?;
        self.trade_to_flow.insert(trade.id, flow_id);
        if let Some(mut ctx) = self.contexts.get_mut(&flow_id) {
            ctx.trade_id = Some(trade.id);
        }
        self.append(
            flow_id,
            FlowEntry::new(
                FlowStep::Escrow,
                StepStatus::Completed,
                json!({ "trade_id": trade.id, "milestones": trade.milestones.len() }),
            ),
        );

        // Step 3: first milestone disbursement
        let first = trade
            .milestones
            .first()
            .ok_or_else(|| {
                self.halt(
                    flow_id,
                    FlowStep::Payment,
                    TradelaneError::Internal("trade has no milestones".into()),
                )
            })?
            .id;
        let transfer_ref = self
            .release_milestone(trade.id, first, &request.payout)
            .await?;

        info!(
            "Flow {} active: trade {} funded, first milestone sent via {}",
            flow_id, trade.id, transfer_ref
        );
        let outcome = FlowOutcome {
            flow_id,
            order,
            trade_id: trade.id,
            transfer_ref,
        };
        self.outcomes.insert(flow_id, outcome.clone());
        Ok(outcome)
    }

    /// Answer a retried invocation from the recorded state of the original
    /// flow. No step is re-executed.
    fn replay(&self, flow_id: Uuid) -> Result<FlowOutcome> {
        if let Some(outcome) = self.outcomes.get(&flow_id) {
            info!("Flow {} replayed from its recorded outcome", flow_id);
            return Ok(outcome.clone());
        }
        let halted = self
            .logs
            .get(&flow_id)
            .and_then(|log| log.failed_step().map(|e| (e.step, e.error.clone())));
        match halted {
            Some((step, error)) => Err(TradelaneError::FlowHalted {
                step: step.to_string(),
                reason: error
                    .unwrap_or_else(|| format!("flow {flow_id} previously halted at this step")),
            }),
            None => Err(TradelaneError::Validation(format!(
                "flow {flow_id} is still in progress for this idempotency key"
            ))),
        }
    }

    /// Disburse one milestone under the trade's lock, recording the attempt
    /// in the flow log. Concurrent releases for the same trade serialize;
    /// the escrow guard rejects the loser.
    pub async fn release_milestone(
        &self,
        trade_id: Uuid,
        milestone_id: Uuid,
        payout: &PayoutDetails,
    ) -> Result<String> {
        let lock = self.trade_lock(trade_id);
        let _guard = lock.lock().await;

        let flow_id = self.flow_for_trade(trade_id)?;
        let milestone = self.escrow.payable_milestone(trade_id, milestone_id)?;
        let step = step_for_stage(milestone.stage);

        self.append(
            flow_id,
            FlowEntry::new(
                step,
                StepStatus::Processing,
                json!({ "milestone_id": milestone_id, "amount": milestone.amount }),
            ),
        );

        match self
            .disbursement
            .pay_milestone(trade_id, milestone_id, payout)
            .await
        {
            Ok(transfer_ref) => {
                self.append(
                    flow_id,
                    FlowEntry::new(
                        step,
                        StepStatus::Completed,
                        json!({ "milestone_id": milestone_id, "transfer_ref": transfer_ref }),
                    ),
                );
                Ok(transfer_ref)
            }
            Err(e) => Err(self.halt(flow_id, step, e)),
        }
    }

    /// Poll the payout rail for a sent milestone and settle its status.
    /// Appends a `completed` flow entry when the whole trade completes.
    pub async fn reconcile_milestone(
        &self,
        trade_id: Uuid,
        milestone_id: Uuid,
    ) -> Result<TransferStatus> {
        let lock = self.trade_lock(trade_id);
        let _guard = lock.lock().await;

        let status = self
            .disbursement
            .reconcile_transfer(trade_id, milestone_id)
            .await?;

        let trade = self.escrow.get_trade(trade_id)?;
        if trade.status == TradeStatus::Completed {
            if let Ok(flow_id) = self.flow_for_trade(trade_id) {
                self.append(
                    flow_id,
                    FlowEntry::new(
                        FlowStep::Completed,
                        StepStatus::Completed,
                        json!({ "trade_id": trade_id }),
                    ),
                );
                info!("Flow {} completed: trade {} settled in full", flow_id, trade_id);
            }
        }
        Ok(status)
    }

    /// Route a verified webhook event to the subsystem it belongs to.
    pub fn apply_webhook(&self, event: &WebhookEvent) -> Result<()> {
        if event.order_id.is_some() {
            return self.onramp.apply_webhook(event);
        }
        if event.transfer_id.is_some() {
            // Transfer webhooks only carry the provider reference; the next
            // reconcile pass settles the milestone from the rail's view.
            info!(
                "Transfer webhook received for {:?} ({})",
                event.transfer_id, event.status
            );
            return Ok(());
        }
        Err(TradelaneError::Validation(
            "webhook event names neither an order nor a transfer".into(),
        ))
    }

    /// Merged status across the flow's three subsystems.
    ///
    /// Uses the locally-known views only; reconciliation against the rails
    /// happens through polling and webhooks, not here.
    pub fn track_status(&self, trade_id: Uuid) -> Result<StatusReport> {
        let flow_id = self.flow_for_trade(trade_id)?;
        let trade = self.escrow.get_trade(trade_id)?;

        let onramp_status = self
            .contexts
            .get(&flow_id)
            .and_then(|ctx| self.onramp.cached_order(&ctx.order_id))
            .map(|o| o.status)
            .unwrap_or(OnrampOrderStatus::Pending);

        // Most recent milestone that actually hit the payout rail
        let transfer = trade
            .milestones
            .iter()
            .rev()
            .find(|m| m.transaction_ref.is_some())
            .map(|m| match m.status {
                MilestoneStatus::Sent => TransferStatus::Processing,
                MilestoneStatus::Received => TransferStatus::Completed,
                MilestoneStatus::Failed => TransferStatus::Failed,
                MilestoneStatus::Pending => TransferStatus::Pending,
            });

        let overall = OverallStatus::merge(onramp_status, trade.status, transfer);
        Ok(StatusReport {
            onramp: onramp_status,
            trade: trade.status,
            transfer,
            overall,
        })
    }

    /// Full audit log for a flow
    pub fn flow_log(&self, flow_id: Uuid) -> Option<FlowLog> {
        self.logs.get(&flow_id).map(|log| log.clone())
    }

    pub fn flow_for_trade(&self, trade_id: Uuid) -> Result<Uuid> {
        self.trade_to_flow
            .get(&trade_id)
            .map(|entry| *entry)
            .ok_or(TradelaneError::TradeNotFound(trade_id))
    }

    fn trade_lock(&self, trade_id: Uuid) -> Arc<Mutex<()>> {
        self.trade_locks
            .entry(trade_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn append(&self, flow_id: Uuid, entry: FlowEntry) {
        if let Some(mut log) = self.logs.get_mut(&flow_id) {
            log.append(entry);
        }
    }

    /// Record the failure and freeze the flow at the failed step.
    fn halt(&self, flow_id: Uuid, step: FlowStep, cause: TradelaneError) -> TradelaneError {
        let reason = cause.to_string();
        error!("Flow {} halted at {}: {}", flow_id, step, reason);
        self.append(flow_id, FlowEntry::failed(step, reason.clone()));
        TradelaneError::FlowHalted {
            step: step.to_string(),
            reason,
        }
    }
}

fn step_for_stage(stage: MilestoneStage) -> FlowStep {
    match stage {
        MilestoneStage::OrderConfirmed | MilestoneStage::ShipmentStarted => FlowStep::Payment,
        MilestoneStage::DeliveryConfirmed => FlowStep::Delivery,
    }
}
