//! End-to-end flow tests over in-process fake rails.
//!
//! The fakes are stateful: they enforce wire-level idempotency keys and let
//! tests flip a rail into failure mode to observe where the saga halts.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tradelane::config::AppConfig;
use tradelane::domain::{
    FlowStep, MilestoneSchedule, MilestoneStatus, OnrampOrderStatus, OverallStatus, StepStatus,
    TradeSpec, TradeStatus, TransferStatus,
};
use tradelane::error::{Result, TradelaneError};
use tradelane::flow::{FlowOrchestrator, FlowRequest};
use tradelane::persistence::TradeStore;
use tradelane::rails::{
    BeneficiaryRequest, BeneficiaryResponse, CreateOrderRequest, CustomerIdentity, OnrampRail,
    OrderResponse, PayoutRail, RateRail, RateResponse, RetryPolicy, TransferRequest,
    TransferResponse,
};
use tradelane::services::{
    DisbursementService, EscrowService, OnrampService, PayoutDetails, RateQuoter,
};

/// Fixed corridor pricing: 1580 NGN per USDC on the onramp leg, 130 KES per
/// USDC on the payout leg, 1.5% fee either way.
struct FakeRate;

#[async_trait]
impl RateRail for FakeRate {
    async fn get_rate(
        &self,
        amount: Decimal,
        source_currency: &str,
        _dest_currency: &str,
    ) -> Result<RateResponse> {
        let fee = amount * dec!(0.015);
        let net = amount - fee;
        let (rate, dest_amount) = if source_currency == "USDC" {
            (dec!(130), net * dec!(130))
        } else {
            (dec!(1580), net / dec!(1580))
        };
        Ok(RateResponse {
            rate,
            fee,
            dest_amount,
            expires_at: Utc::now() + ChronoDuration::seconds(30),
        })
    }
}

/// Onramp rail that settles every order immediately on the first poll.
/// Honors idempotency keys: a repeated key returns the original order.
struct FakeOnramp {
    orders_by_key: Mutex<HashMap<String, String>>,
    created: AtomicU32,
    /// Terminal status every order settles into
    settle_as: &'static str,
}

impl FakeOnramp {
    fn new(settle_as: &'static str) -> Self {
        Self {
            orders_by_key: Mutex::new(HashMap::new()),
            created: AtomicU32::new(0),
            settle_as,
        }
    }

    fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OnrampRail for FakeOnramp {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderResponse> {
        let mut by_key = self
            .orders_by_key
            .lock()
            .map_err(|_| TradelaneError::Internal("lock poisoned".into()))?;
        let order_id = match by_key.get(&request.idempotency_key) {
            Some(existing) => existing.clone(),
            None => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("ord-{n}");
                by_key.insert(request.idempotency_key.clone(), id.clone());
                id
            }
        };
        Ok(OrderResponse {
            order_id,
            status: "pending".to_string(),
            destination_amount: Some(dec!(623.42)),
            payment_instructions: None,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderResponse> {
        Ok(OrderResponse {
            order_id: order_id.to_string(),
            status: self.settle_as.to_string(),
            destination_amount: Some(dec!(623.42)),
            payment_instructions: None,
        })
    }
}

/// Payout rail with per-key idempotency and a switchable failure mode.
struct FakePayout {
    transfers_by_key: Mutex<HashMap<String, String>>,
    statuses: Mutex<HashMap<String, String>>,
    created: AtomicU32,
    reject: AtomicBool,
}

impl FakePayout {
    fn new() -> Self {
        Self {
            transfers_by_key: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            created: AtomicU32::new(0),
            reject: AtomicBool::new(false),
        }
    }

    fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    fn reject_transfers(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    fn settle(&self, transfer_id: &str, status: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(transfer_id.to_string(), status.to_string());
        }
    }
}

#[async_trait]
impl PayoutRail for FakePayout {
    async fn create_beneficiary(&self, _request: &BeneficiaryRequest) -> Result<BeneficiaryResponse> {
        Ok(BeneficiaryResponse {
            beneficiary_id: "ben-1".to_string(),
        })
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferResponse> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(TradelaneError::ProviderRejected(
                "insufficient float".to_string(),
            ));
        }
        let mut by_key = self
            .transfers_by_key
            .lock()
            .map_err(|_| TradelaneError::Internal("lock poisoned".into()))?;
        let transfer_id = match by_key.get(&request.idempotency_key) {
            Some(existing) => existing.clone(),
            None => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("tr-{n}");
                by_key.insert(request.idempotency_key.clone(), id.clone());
                id
            }
        };
        Ok(TransferResponse {
            transfer_id,
            status: "pending".to_string(),
        })
    }

    async fn get_transfer(&self, transfer_id: &str) -> Result<TransferResponse> {
        let status = self
            .statuses
            .lock()
            .map_err(|_| TradelaneError::Internal("lock poisoned".into()))?
            .get(transfer_id)
            .cloned()
            .unwrap_or_else(|| "processing".to_string());
        Ok(TransferResponse {
            transfer_id: transfer_id.to_string(),
            status,
        })
    }
}

struct Harness {
    orchestrator: Arc<FlowOrchestrator>,
    escrow: Arc<EscrowService>,
    onramp_rail: Arc<FakeOnramp>,
    payout_rail: Arc<FakePayout>,
}

fn harness(onramp_settles_as: &'static str) -> Harness {
    let config = AppConfig::default_config();
    let mut execution = config.execution.clone();
    execution.poll_interval_ms = 1;
    execution.max_polls = 3;

    let onramp_rail = Arc::new(FakeOnramp::new(onramp_settles_as));
    let payout_rail = Arc::new(FakePayout::new());

    let onramp = Arc::new(OnrampService::new(
        onramp_rail.clone(),
        &config.policy,
        &execution,
    ));
    let quoter = Arc::new(RateQuoter::new(
        Arc::new(FakeRate),
        config.policy.quote_ttl_secs,
        RetryPolicy::from_execution(&execution),
        Duration::from_secs(5),
    ));
    let schedule = MilestoneSchedule::new(config.policy.milestone_schedule.clone())
        .expect("default schedule is valid");
    let escrow = Arc::new(EscrowService::new(Arc::new(TradeStore::new()), schedule));
    let disbursement = Arc::new(DisbursementService::new(
        payout_rail.clone(),
        quoter,
        escrow.clone(),
        "USDC",
        &execution,
    ));
    let orchestrator = Arc::new(FlowOrchestrator::new(
        onramp,
        escrow.clone(),
        disbursement,
    ));

    Harness {
        orchestrator,
        escrow,
        onramp_rail,
        payout_rail,
    }
}

fn request() -> FlowRequest {
    FlowRequest {
        source_amount: dec!(1_000_000),
        source_currency: "NGN".to_string(),
        destination_wallet: "0xescrow-wallet".to_string(),
        customer: CustomerIdentity {
            name: "Ada Buyer".to_string(),
            email: "ada@example.com".to_string(),
            country: "NG".to_string(),
        },
        idempotency_key: Some("flow-key-1".to_string()),
        trade: TradeSpec {
            buyer_ref: "buyer-1".to_string(),
            counterparty_ref: "supplier-1".to_string(),
            total_amount: dec!(600),
            currency: "USDC".to_string(),
            delivery_deadline: Utc::now() + ChronoDuration::days(30),
            quality_requirements: String::new(),
            inspection_required: false,
        },
        payout: PayoutDetails {
            name: "Supplier Ltd".to_string(),
            bank_code: "KCB".to_string(),
            account_number: "1100022200".to_string(),
            contact: None,
            currency: "KES".to_string(),
            purpose_code: "TRADE_GOODS".to_string(),
        },
    }
}

#[tokio::test]
async fn happy_path_reaches_first_milestone() {
    let h = harness("completed");

    let outcome = h.orchestrator.run(request()).await.expect("flow runs");

    let trade = h.escrow.get_trade(outcome.trade_id).expect("trade exists");
    assert_eq!(trade.status, TradeStatus::Funded);
    assert_eq!(trade.milestones[0].status, MilestoneStatus::Sent);
    assert_eq!(
        trade.milestones[0].transaction_ref.as_deref(),
        Some(outcome.transfer_ref.as_str())
    );
    assert_eq!(trade.milestones[1].status, MilestoneStatus::Pending);

    // Log records each step as processing then completed, in saga order
    let log = h.orchestrator.flow_log(outcome.flow_id).expect("log exists");
    let steps: Vec<(FlowStep, StepStatus)> =
        log.entries().iter().map(|e| (e.step, e.status)).collect();
    assert_eq!(
        steps,
        vec![
            (FlowStep::Onramp, StepStatus::Processing),
            (FlowStep::Onramp, StepStatus::Completed),
            (FlowStep::Escrow, StepStatus::Processing),
            (FlowStep::Escrow, StepStatus::Completed),
            (FlowStep::Payment, StepStatus::Processing),
            (FlowStep::Payment, StepStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn onramp_failure_halts_before_escrow() {
    let h = harness("failed");

    let err = h.orchestrator.run(request()).await.expect_err("flow halts");
    match err {
        TradelaneError::FlowHalted { step, .. } => assert_eq!(step, "onramp"),
        other => panic!("expected FlowHalted, got {other:?}"),
    }

    // Nothing downstream ran
    assert_eq!(h.payout_rail.created_count(), 0);
}

#[tokio::test]
async fn payout_failure_leaves_completed_steps_standing() {
    let h = harness("completed");
    h.payout_rail.reject_transfers(true);

    let err = h.orchestrator.run(request()).await.expect_err("flow halts");
    match err {
        TradelaneError::FlowHalted { step, .. } => assert_eq!(step, "payment"),
        other => panic!("expected FlowHalted, got {other:?}"),
    }

    // The onramp conversion and the funded trade stay exactly as they
    // finished; only the milestone is marked failed.
    assert_eq!(h.onramp_rail.created_count(), 1);
    let (trade_id, _) = single_trade(&h);
    let trade = h.escrow.get_trade(trade_id).expect("trade exists");
    assert_eq!(trade.status, TradeStatus::Funded);
    assert_eq!(trade.milestones[0].status, MilestoneStatus::Failed);
}

#[tokio::test]
async fn repeated_idempotency_key_replays_existing_flow() {
    let h = harness("completed");

    let first = h.orchestrator.run(request()).await.expect("first run");
    let second = h.orchestrator.run(request()).await.expect("second run");

    // The retry moved no money anywhere: same order, same trade, same
    // transfer, and exactly one of each at the rails.
    assert_eq!(first.flow_id, second.flow_id);
    assert_eq!(first.order.id, second.order.id);
    assert_eq!(first.trade_id, second.trade_id);
    assert_eq!(first.transfer_ref, second.transfer_ref);
    assert_eq!(h.onramp_rail.created_count(), 1);
    assert_eq!(h.payout_rail.created_count(), 1);
    assert_eq!(h.escrow.list_trades().len(), 1);
}

#[tokio::test]
async fn retried_key_after_halt_reports_recorded_failure() {
    let h = harness("completed");
    h.payout_rail.reject_transfers(true);

    let _ = h.orchestrator.run(request()).await.expect_err("flow halts");
    let err = h
        .orchestrator
        .run(request())
        .await
        .expect_err("retry refused");

    // The retry surfaces where the original halted instead of re-running
    // the completed onramp and escrow steps.
    match err {
        TradelaneError::FlowHalted { step, .. } => assert_eq!(step, "payment"),
        other => panic!("expected FlowHalted, got {other:?}"),
    }
    assert_eq!(h.onramp_rail.created_count(), 1);
    assert_eq!(h.payout_rail.created_count(), 0);
    assert_eq!(h.escrow.list_trades().len(), 1);
}

#[tokio::test]
async fn double_release_of_same_milestone_rejected() {
    let h = harness("completed");

    let outcome = h.orchestrator.run(request()).await.expect("flow runs");
    let trade = h.escrow.get_trade(outcome.trade_id).expect("trade exists");
    let first = trade.milestones[0].id;

    let err = h
        .orchestrator
        .release_milestone(outcome.trade_id, first, &request().payout)
        .await
        .expect_err("second release rejected");
    assert!(matches!(err, TradelaneError::Validation(_)));
    assert_eq!(h.payout_rail.created_count(), 1);
}

#[tokio::test]
async fn full_lifecycle_settles_trade_completed() {
    let h = harness("completed");
    let payout = request().payout;

    let outcome = h.orchestrator.run(request()).await.expect("flow runs");
    let trade_id = outcome.trade_id;
    let milestones: Vec<_> = h
        .escrow
        .get_trade(trade_id)
        .expect("trade exists")
        .milestones
        .iter()
        .map(|m| m.id)
        .collect();

    // Milestone 1 settles
    h.payout_rail.settle(&outcome.transfer_ref, "completed");
    let status = h
        .orchestrator
        .reconcile_milestone(trade_id, milestones[0])
        .await
        .expect("reconcile");
    assert_eq!(status, TransferStatus::Completed);

    // Shipment milestone
    h.escrow.confirm_shipment(trade_id, "TRACK-123").expect("ship");
    let tr2 = h
        .orchestrator
        .release_milestone(trade_id, milestones[1], &payout)
        .await
        .expect("release m2");
    h.payout_rail.settle(&tr2, "completed");
    h.orchestrator
        .reconcile_milestone(trade_id, milestones[1])
        .await
        .expect("reconcile m2");

    // Delivery milestone
    h.escrow.confirm_delivery(trade_id).expect("deliver");
    let tr3 = h
        .orchestrator
        .release_milestone(trade_id, milestones[2], &payout)
        .await
        .expect("release m3");
    h.payout_rail.settle(&tr3, "completed");
    h.orchestrator
        .reconcile_milestone(trade_id, milestones[2])
        .await
        .expect("reconcile m3");

    let trade = h.escrow.get_trade(trade_id).expect("trade exists");
    assert_eq!(trade.status, TradeStatus::Completed);
    assert!(trade.milestones.iter().all(|m| m.status == MilestoneStatus::Received));

    let report = h.orchestrator.track_status(trade_id).expect("status");
    assert_eq!(report.onramp, OnrampOrderStatus::Completed);
    assert_eq!(report.trade, TradeStatus::Completed);
    assert_eq!(report.overall, OverallStatus::Active);

    // Flow log closes with a completed entry
    let log = h.orchestrator.flow_log(outcome.flow_id).expect("log exists");
    let last = log.entries().last().expect("non-empty log");
    assert_eq!(last.step, FlowStep::Completed);
}

#[tokio::test]
async fn track_status_merges_subsystem_views() {
    let h = harness("completed");

    let outcome = h.orchestrator.run(request()).await.expect("flow runs");

    // Milestone 1 is sent but not yet confirmed: transfer leg outstanding
    let report = h.orchestrator.track_status(outcome.trade_id).expect("status");
    assert_eq!(report.onramp, OnrampOrderStatus::Completed);
    assert_eq!(report.trade, TradeStatus::Funded);
    assert_eq!(report.transfer, Some(TransferStatus::Processing));
    assert_eq!(report.overall, OverallStatus::Pending);

    // A disputed trade dominates everything else
    h.escrow.dispute(outcome.trade_id, "goods damaged").expect("dispute");
    let report = h.orchestrator.track_status(outcome.trade_id).expect("status");
    assert_eq!(report.overall, OverallStatus::Failed);
}

fn single_trade(h: &Harness) -> (uuid::Uuid, TradeStatus) {
    let trades = h.escrow.list_trades();
    assert_eq!(trades.len(), 1);
    (trades[0].id, trades[0].status)
}
