//! Signed webhook callbacks from the payment rails.
//!
//! This is the only push-based status path; everything else is pull/poll.
//! Payloads are trusted only after the HMAC-SHA256 signature over the raw
//! body verifies against the shared secret.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::{Result, TradelaneError};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verify a hex-encoded HMAC-SHA256 signature over the raw request body.
/// Comparison is constant-time via `Mac::verify_slice`.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<()> {
    let expected = hex::decode(signature_hex.trim())
        .map_err(|e| TradelaneError::WebhookSignature(format!("signature not hex: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TradelaneError::WebhookSignature(format!("invalid secret: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| TradelaneError::WebhookSignature("signature mismatch".to_string()))
}

/// Compute the hex signature for a body (used by tests and fixtures)
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Status payload pushed by a rail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub transfer_id: Option<String>,
    pub status: String,
}

/// A verified webhook delivery, tagged with the rail path segment it arrived on
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub rail: String,
    pub event: WebhookEvent,
}

struct WebhookState {
    secret: String,
    tx: mpsc::Sender<WebhookDelivery>,
}

/// Webhook callback server. Verified events are forwarded to the channel
/// handed out by [`WebhookServer::new`]; consumers reconcile from there.
pub struct WebhookServer {
    state: Arc<WebhookState>,
}

impl WebhookServer {
    pub fn new(secret: impl Into<String>) -> (Self, mpsc::Receiver<WebhookDelivery>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                state: Arc::new(WebhookState {
                    secret: secret.into(),
                    tx,
                }),
            },
            rx,
        )
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhooks/:rail", post(handle_webhook))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn serve(&self, bind_addr: &str) -> Result<()> {
        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| TradelaneError::Validation(format!("invalid bind address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Webhook server listening on {}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| TradelaneError::Internal(format!("webhook server error: {}", e)))
    }
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(rail): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(sig) => sig,
        None => {
            warn!("Webhook from {} missing signature header", rail);
            return StatusCode::UNAUTHORIZED;
        }
    };

    if let Err(e) = verify_signature(&state.secret, &body, signature) {
        warn!("Webhook from {} rejected: {}", rail, e);
        return StatusCode::UNAUTHORIZED;
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Webhook from {} unparseable: {}", rail, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    if state
        .tx
        .send(WebhookDelivery { rail, event })
        .await
        .is_err()
    {
        // Receiver dropped; the rail will retry or polling will reconcile.
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}
