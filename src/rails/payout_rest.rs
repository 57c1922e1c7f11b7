//! Payout rail REST adapter.
//!
//! Same wire conventions as the onramp adapter: HMAC-signed requests, an
//! `Idempotency-Key` header on transfer creation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;

use super::traits::{
    BeneficiaryRequest, BeneficiaryResponse, PayoutRail, RateRail, RateResponse, TransferRequest,
    TransferResponse,
};
use crate::config::{ExecutionConfig, RailConfig};
use crate::error::{Result, TradelaneError};

type HmacSha256 = Hmac<Sha256>;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct PayoutRestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl PayoutRestClient {
    pub fn new(config: &RailConfig, execution: &ExecutionConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base_url)
            .map_err(|e| TradelaneError::Validation(format!("invalid payout base_url: {}", e)))?;

        let http = Client::builder()
            .user_agent("tradelane-payout/0.1")
            .timeout(Duration::from_millis(execution.settlement_timeout_ms))
            .build()
            .map_err(|e| {
                TradelaneError::Internal(format!("failed to build payout HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self, method: &Method, path: &str, body: &str) -> Result<HeaderMap> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| TradelaneError::Auth("payout api_key is required".to_string()))?;
        let secret = self
            .api_secret
            .as_ref()
            .ok_or_else(|| TradelaneError::Auth("payout api_secret is required".to_string()))?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let sign_payload = format!("{}{}{}{}", timestamp, method.as_str(), path, body);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| TradelaneError::Auth(format!("invalid payout secret: {}", e)))?;
        mac.update(sign_payload.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-access-key"),
            HeaderValue::from_str(key)
                .map_err(|e| TradelaneError::Auth(format!("invalid payout api key: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-access-signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| TradelaneError::Auth(format!("invalid payout signature: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-access-timestamp"),
            HeaderValue::from_str(&timestamp)
                .map_err(|e| TradelaneError::Auth(format!("invalid payout timestamp: {}", e)))?,
        );

        Ok(headers)
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let body_text = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(String::new);

        let mut req = self.http.request(method.clone(), &url);

        if self.api_key.is_some() {
            req = req.headers(self.auth_headers(&method, path, &body_text)?);
        }

        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_HEADER, key);
        }

        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.as_u16() == 429 {
            return Err(TradelaneError::RateLimited(format!(
                "payout rail rate limited for {} {}",
                method, path
            )));
        }

        if status.is_server_error() {
            return Err(TradelaneError::ProviderUnavailable(format!(
                "payout rail {} {} failed: status={} body={}",
                method, path, status, text
            )));
        }

        if !status.is_success() {
            return Err(TradelaneError::ProviderRejected(format!(
                "payout rail {} {} rejected: status={} body={}",
                method, path, status, text
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| TradelaneError::Internal(format!("invalid payout JSON response: {}", e)))
    }
}

#[async_trait]
impl RateRail for PayoutRestClient {
    async fn get_rate(
        &self,
        amount: Decimal,
        source_currency: &str,
        dest_currency: &str,
    ) -> Result<RateResponse> {
        let body = json!({
            "amount": amount,
            "sourceCurrency": source_currency,
            "destCurrency": dest_currency,
        });

        let raw = self
            .request_json(Method::POST, "/rate", Some(body), None)
            .await?;

        serde_json::from_value(raw).map_err(|e| {
            TradelaneError::RateUnavailable(format!(
                "payout rate for {}/{} unparseable: {}",
                source_currency, dest_currency, e
            ))
        })
    }
}

#[async_trait]
impl PayoutRail for PayoutRestClient {
    async fn create_beneficiary(
        &self,
        request: &BeneficiaryRequest,
    ) -> Result<BeneficiaryResponse> {
        let body = serde_json::to_value(request)?;

        let raw = self
            .request_json(Method::POST, "/beneficiary", Some(body), None)
            .await?;

        serde_json::from_value(raw).map_err(|e| {
            TradelaneError::Internal(format!("invalid beneficiary response: {}", e))
        })
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<TransferResponse> {
        let body = serde_json::to_value(request)?;

        let raw = self
            .request_json(
                Method::POST,
                "/transfer",
                Some(body),
                Some(&request.idempotency_key),
            )
            .await?;

        serde_json::from_value(raw)
            .map_err(|e| TradelaneError::Internal(format!("invalid transfer response: {}", e)))
    }

    async fn get_transfer(&self, transfer_id: &str) -> Result<TransferResponse> {
        let raw = self
            .request_json(
                Method::GET,
                &format!("/transfer/{}", transfer_id),
                None,
                None,
            )
            .await?;

        if raw.is_null() {
            return Err(TradelaneError::TransferNotFound(transfer_id.to_string()));
        }

        serde_json::from_value(raw)
            .map_err(|e| TradelaneError::Internal(format!("invalid transfer response: {}", e)))
    }
}
