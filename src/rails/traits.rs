use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::PaymentInstructions;
use crate::error::Result;

/// Rate response from a rail's `POST /rate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateResponse {
    /// Local-currency units per settlement-asset unit
    pub rate: Decimal,
    /// Fee in source-currency units
    pub fee: Decimal,
    pub dest_amount: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// Buyer identity forwarded to the onramp rail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    pub name: String,
    pub email: String,
    pub country: String,
}

/// Request body for the onramp rail's `POST /order`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub amount: Decimal,
    pub source_currency: String,
    pub destination_wallet: String,
    pub customer: CustomerIdentity,
    /// Caller-supplied token; a retried request with the same key must not
    /// create a second order.
    #[serde(skip)]
    pub idempotency_key: String,
}

/// Order as returned by the onramp rail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub destination_amount: Option<Decimal>,
    #[serde(default)]
    pub payment_instructions: Option<PaymentInstructions>,
}

/// Counterparty bank coordinates for payout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub bank_code: String,
    pub account_number: String,
}

/// Request body for the payout rail's `POST /beneficiary`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryRequest {
    pub name: String,
    pub bank_details: BankDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryResponse {
    pub beneficiary_id: String,
}

/// Request body for the payout rail's `POST /transfer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub beneficiary_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub purpose_code: String,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub transfer_id: String,
    pub status: String,
}

/// Rate lookup against an external rail. Pure: no side effects beyond the
/// HTTP call itself.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateRail: Send + Sync {
    async fn get_rate(
        &self,
        amount: Decimal,
        source_currency: &str,
        dest_currency: &str,
    ) -> Result<RateResponse>;
}

/// Onramp rail: converts a local-currency deposit into settlement-asset
/// funds at a destination wallet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OnrampRail: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<OrderResponse>;

    async fn get_order(&self, order_id: &str) -> Result<OrderResponse>;
}

/// Payout rail: disburses settlement-asset value to a counterparty in their
/// local currency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutRail: Send + Sync {
    async fn create_beneficiary(&self, request: &BeneficiaryRequest) -> Result<BeneficiaryResponse>;

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferResponse>;

    async fn get_transfer(&self, transfer_id: &str) -> Result<TransferResponse>;
}
