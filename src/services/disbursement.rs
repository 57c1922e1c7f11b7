//! Milestone disbursement through the payout rail.
//!
//! A disbursement is an irreversible money movement. The escrow guard (the
//! milestone's `pending` status, checked again under the trade lock) is the
//! concurrency control that makes a double-fire impossible; a failed payout
//! leaves the milestone `failed` for an operator retry with a NEW key.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::domain::{ConversionDirection, TransferStatus};
use crate::error::{Result, TradelaneError};
use crate::rails::{
    retry_with_backoff, BankDetails, BeneficiaryRequest, PayoutRail, RetryPolicy, TransferRequest,
};
use crate::services::{EscrowService, RateQuoter};

/// Counterparty payout coordinates in their local currency
#[derive(Debug, Clone)]
pub struct PayoutDetails {
    pub name: String,
    pub bank_code: String,
    pub account_number: String,
    pub contact: Option<String>,
    /// Currency the counterparty is paid in
    pub currency: String,
    pub purpose_code: String,
}

impl PayoutDetails {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TradelaneError::InvalidDetails(
                "payout name must not be empty".to_string(),
            ));
        }
        if self.account_number.trim().is_empty() || self.bank_code.trim().is_empty() {
            return Err(TradelaneError::InvalidDetails(
                "payout bank details must be complete".to_string(),
            ));
        }
        if self.currency.trim().is_empty() {
            return Err(TradelaneError::InvalidDetails(
                "payout currency must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Deterministic fingerprint used to cache beneficiary resolution
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.bank_code.as_bytes());
        hasher.update(self.account_number.as_bytes());
        hasher.update(self.currency.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

pub struct DisbursementService {
    payout: Arc<dyn PayoutRail>,
    quoter: Arc<RateQuoter>,
    escrow: Arc<EscrowService>,
    settlement_asset: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    /// details fingerprint -> provider beneficiary id
    beneficiaries: DashMap<String, String>,
}

impl DisbursementService {
    pub fn new(
        payout: Arc<dyn PayoutRail>,
        quoter: Arc<RateQuoter>,
        escrow: Arc<EscrowService>,
        settlement_asset: impl Into<String>,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            payout,
            quoter,
            escrow,
            settlement_asset: settlement_asset.into(),
            retry: RetryPolicy::from_execution(execution),
            call_timeout: Duration::from_millis(execution.settlement_timeout_ms),
            beneficiaries: DashMap::new(),
        }
    }

    /// Disburse one milestone to the counterparty in their local currency.
    ///
    /// Sequence: escrow guard, beneficiary resolution, fresh payout-leg
    /// quote, transfer instruction. Returns the provider transfer reference;
    /// the milestone is marked `sent` on acceptance and `failed` on a
    /// terminal provider failure.
    pub async fn pay_milestone(
        &self,
        trade_id: Uuid,
        milestone_id: Uuid,
        details: &PayoutDetails,
    ) -> Result<String> {
        details.validate()?;

        // Fail fast on any invariant violation before touching the rail
        let milestone = self.escrow.payable_milestone(trade_id, milestone_id)?;

        let beneficiary_id = self.resolve_beneficiary(details).await?;

        let quote = self
            .quoter
            .get_quote(
                &self.settlement_asset,
                &details.currency,
                milestone.amount,
                ConversionDirection::AssetToLocal,
            )
            .await?;
        quote.ensure_fresh()?;

        // A fresh key per invocation: a retried *operator* attempt must never
        // silently replay the original request. Internal backoff retries of
        // this same invocation do reuse it.
        let idempotency_key = format!("ms-{}-{}", milestone_id, Uuid::new_v4());
        let request = TransferRequest {
            beneficiary_id,
            amount: quote.destination_amount,
            currency: details.currency.clone(),
            purpose_code: details.purpose_code.clone(),
            idempotency_key,
        };

        let payout = self.payout.clone();
        let call_timeout = self.call_timeout;
        let result = retry_with_backoff(self.retry, "create_transfer", || {
            let payout = payout.clone();
            let request = request.clone();
            async move {
                match timeout(call_timeout, payout.create_transfer(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TradelaneError::ProviderUnavailable(format!(
                        "transfer creation timed out after {:?}",
                        call_timeout
                    ))),
                }
            }
        })
        .await;

        match result {
            Ok(response) => {
                self.escrow
                    .mark_milestone_sent(trade_id, milestone_id, &response.transfer_id)?;
                info!(
                    "Milestone {} disbursed: {} {} via transfer {}",
                    milestone_id, quote.destination_amount, details.currency, response.transfer_id
                );
                Ok(response.transfer_id)
            }
            Err(e) => {
                warn!(
                    "Milestone {} payout failed, leaving it failed for operator retry: {}",
                    milestone_id, e
                );
                self.escrow.mark_milestone_failed(trade_id, milestone_id)?;
                Err(TradelaneError::PayoutFailed(e.to_string()))
            }
        }
    }

    /// Poll the payout rail for a sent milestone's transfer and promote it
    /// to `received` (or `failed`) accordingly.
    pub async fn reconcile_transfer(
        &self,
        trade_id: Uuid,
        milestone_id: Uuid,
    ) -> Result<TransferStatus> {
        let trade = self.escrow.get_trade(trade_id)?;
        let milestone = trade.milestone(milestone_id)?;
        let transfer_ref = milestone.transaction_ref.as_deref().ok_or_else(|| {
            TradelaneError::Validation(format!(
                "milestone {} has no transfer reference to reconcile",
                milestone_id
            ))
        })?;

        let response = self.payout.get_transfer(transfer_ref).await?;
        let status = TransferStatus::try_from(response.status.as_str()).unwrap_or_else(|e| {
            warn!("{}; treating as processing", e);
            TransferStatus::Processing
        });

        match status {
            TransferStatus::Completed => {
                self.escrow.mark_milestone_received(trade_id, milestone_id)?;
            }
            TransferStatus::Failed | TransferStatus::Cancelled => {
                self.escrow.mark_milestone_failed(trade_id, milestone_id)?;
            }
            TransferStatus::Pending | TransferStatus::Processing => {}
        }

        Ok(status)
    }

    /// Raw transfer status lookup for the reconciler
    pub async fn transfer_status(&self, transfer_ref: &str) -> Result<TransferStatus> {
        let response = self.payout.get_transfer(transfer_ref).await?;
        TransferStatus::try_from(response.status.as_str())
            .map_err(TradelaneError::Internal)
    }

    async fn resolve_beneficiary(&self, details: &PayoutDetails) -> Result<String> {
        let fingerprint = details.fingerprint();
        if let Some(existing) = self.beneficiaries.get(&fingerprint) {
            return Ok(existing.clone());
        }

        let request = BeneficiaryRequest {
            name: details.name.clone(),
            bank_details: BankDetails {
                bank_code: details.bank_code.clone(),
                account_number: details.account_number.clone(),
            },
            contact: details.contact.clone(),
        };

        let payout = self.payout.clone();
        let response = retry_with_backoff(self.retry, "create_beneficiary", || {
            let payout = payout.clone();
            let request = request.clone();
            async move { payout.create_beneficiary(&request).await }
        })
        .await?;

        self.beneficiaries
            .insert(fingerprint, response.beneficiary_id.clone());
        Ok(response.beneficiary_id)
    }
}
