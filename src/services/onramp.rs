//! Onramp converter: turns a local-currency deposit into settlement-asset
//! funds at a destination wallet, and tracks the order to a terminal status.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionConfig, PolicyConfig};
use crate::domain::{OnrampOrder, OnrampOrderStatus};
use crate::error::{Result, TradelaneError};
use crate::rails::{
    retry_with_backoff, CreateOrderRequest, CustomerIdentity, OnrampRail, OrderResponse,
    RetryPolicy, WebhookEvent,
};

pub struct OnrampService {
    rail: Arc<dyn OnrampRail>,
    min_order_amount: Decimal,
    max_order_amount: Decimal,
    retry: RetryPolicy,
    call_timeout: Duration,
    poll_interval: Duration,
    max_polls: u32,
    /// Local view of orders, refreshed by polls and verified webhooks
    orders: DashMap<String, OnrampOrder>,
}

impl OnrampService {
    pub fn new(
        rail: Arc<dyn OnrampRail>,
        policy: &PolicyConfig,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            rail,
            min_order_amount: policy.min_order_amount,
            max_order_amount: policy.max_order_amount,
            retry: RetryPolicy::from_execution(execution),
            call_timeout: Duration::from_millis(execution.settlement_timeout_ms),
            poll_interval: Duration::from_millis(execution.poll_interval_ms),
            max_polls: execution.max_polls,
            orders: DashMap::new(),
        }
    }

    /// Create a conversion order. The buyer must act on the returned payment
    /// instructions out of band; the order stays pending/processing until the
    /// provider confirms receipt of local funds.
    ///
    /// A caller-supplied idempotency key makes retried invocations safe; if
    /// none is given a fresh one is generated, and the same key is reused
    /// across internal backoff retries.
    pub async fn create_order(
        &self,
        amount: Decimal,
        source_currency: &str,
        destination_wallet: &str,
        customer: CustomerIdentity,
        idempotency_key: Option<String>,
    ) -> Result<OnrampOrder> {
        if amount < self.min_order_amount {
            return Err(TradelaneError::InvalidAmount(format!(
                "amount {} below minimum transferable {}",
                amount, self.min_order_amount
            )));
        }
        if amount > self.max_order_amount {
            return Err(TradelaneError::InvalidAmount(format!(
                "amount {} above maximum transferable {}",
                amount, self.max_order_amount
            )));
        }
        if destination_wallet.trim().is_empty() {
            return Err(TradelaneError::Validation(
                "destination wallet must not be empty".to_string(),
            ));
        }

        let request = CreateOrderRequest {
            amount,
            source_currency: source_currency.to_string(),
            destination_wallet: destination_wallet.to_string(),
            customer,
            idempotency_key: idempotency_key.unwrap_or_else(|| format!("ord-{}", Uuid::new_v4())),
        };

        let rail = self.rail.clone();
        let call_timeout = self.call_timeout;
        let response = retry_with_backoff(self.retry, "create_order", || {
            let rail = rail.clone();
            let request = request.clone();
            async move {
                match timeout(call_timeout, rail.create_order(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TradelaneError::ProviderUnavailable(format!(
                        "order creation timed out after {:?}",
                        call_timeout
                    ))),
                }
            }
        })
        .await?;

        let order = self.record(&request, response);
        info!(
            "Onramp order {} created for {} {} -> wallet {}",
            order.id, order.source_amount, order.source_currency, order.destination_wallet
        );
        Ok(order)
    }

    /// Idempotent status read; safe to call repeatedly.
    pub async fn get_order_status(&self, order_id: &str) -> Result<OnrampOrder> {
        let response = self.rail.get_order(order_id).await?;
        Ok(self.refresh(order_id, response))
    }

    /// Poll until the order reaches a terminal status or the poll bound is
    /// hit. Hitting the bound returns the last observed order unchanged; the
    /// order is never failed locally on a timeout.
    pub async fn await_completion(&self, order_id: &str) -> Result<OnrampOrder> {
        let mut last = self.get_order_status(order_id).await?;

        for _ in 1..self.max_polls {
            if last.is_terminal() {
                return Ok(last);
            }
            sleep(self.poll_interval).await;
            last = self.get_order_status(order_id).await?;
        }

        if !last.is_terminal() {
            warn!(
                "Onramp order {} still {} after {} polls; leaving reconciliation to webhooks",
                order_id, last.status, self.max_polls
            );
        }
        Ok(last)
    }

    /// Apply a signature-verified webhook event to the local order view.
    pub fn apply_webhook(&self, event: &WebhookEvent) -> Result<()> {
        let order_id = event
            .order_id
            .as_deref()
            .ok_or_else(|| TradelaneError::Validation("webhook event has no orderId".into()))?;

        let status = parse_status(&event.status);
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradelaneError::OrderNotFound(order_id.to_string()))?;

        debug!(
            "Webhook moved onramp order {} from {} to {}",
            order_id, entry.status, status
        );
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Last locally-known view of an order (no provider call)
    pub fn cached_order(&self, order_id: &str) -> Option<OnrampOrder> {
        self.orders.get(order_id).map(|entry| entry.clone())
    }

    fn record(&self, request: &CreateOrderRequest, response: OrderResponse) -> OnrampOrder {
        let now = Utc::now();
        let order = OnrampOrder {
            id: response.order_id,
            source_amount: request.amount,
            source_currency: request.source_currency.clone(),
            destination_amount: response.destination_amount,
            destination_wallet: request.destination_wallet.clone(),
            status: parse_status(&response.status),
            payment_instructions: response.payment_instructions,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(order.id.clone(), order.clone());
        order
    }

    fn refresh(&self, order_id: &str, response: OrderResponse) -> OnrampOrder {
        let status = parse_status(&response.status);

        match self.orders.get_mut(order_id) {
            Some(mut entry) => {
                entry.status = status;
                if response.destination_amount.is_some() {
                    entry.destination_amount = response.destination_amount;
                }
                if response.payment_instructions.is_some() {
                    entry.payment_instructions = response.payment_instructions;
                }
                entry.updated_at = Utc::now();
                entry.clone()
            }
            None => {
                // Order created elsewhere (e.g. before a restart); track what
                // the provider reports.
                let now = Utc::now();
                let order = OnrampOrder {
                    id: order_id.to_string(),
                    source_amount: Decimal::ZERO,
                    source_currency: String::new(),
                    destination_amount: response.destination_amount,
                    destination_wallet: String::new(),
                    status,
                    payment_instructions: response.payment_instructions,
                    created_at: now,
                    updated_at: now,
                };
                self.orders.insert(order.id.clone(), order.clone());
                order
            }
        }
    }
}

fn parse_status(raw: &str) -> OnrampOrderStatus {
    OnrampOrderStatus::try_from(raw).unwrap_or_else(|e| {
        warn!("{}; treating as processing", e);
        OnrampOrderStatus::Processing
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::PaymentInstructions;
    use crate::rails::traits::MockOnrampRail;
    use rust_decimal_macros::dec;

    fn customer() -> CustomerIdentity {
        CustomerIdentity {
            name: "Ada Buyer".into(),
            email: "ada@example.com".into(),
            country: "NG".into(),
        }
    }

    fn order_response(status: &str) -> OrderResponse {
        OrderResponse {
            order_id: "ord-1".into(),
            status: status.into(),
            destination_amount: Some(dec!(623.42)),
            payment_instructions: Some(PaymentInstructions {
                reference: "PAY-REF-1".into(),
                bank_name: Some("First Bank".into()),
                account_number: Some("0123456789".into()),
                mobile_money_number: None,
                note: None,
            }),
        }
    }

    fn service(rail: MockOnrampRail) -> OnrampService {
        let config = AppConfig::default_config();
        let mut execution = config.execution.clone();
        execution.poll_interval_ms = 10;
        execution.max_polls = 5;
        OnrampService::new(Arc::new(rail), &config.policy, &execution)
    }

    #[tokio::test]
    async fn rejects_amount_outside_policy_bounds() {
        let service = service(MockOnrampRail::new());

        let below = service
            .create_order(dec!(1), "NGN", "0xwallet", customer(), None)
            .await;
        assert!(matches!(below, Err(TradelaneError::InvalidAmount(_))));

        let above = service
            .create_order(dec!(999_000_000_000), "NGN", "0xwallet", customer(), None)
            .await;
        assert!(matches!(above, Err(TradelaneError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn forwards_caller_idempotency_key() {
        let mut rail = MockOnrampRail::new();
        rail.expect_create_order()
            .withf(|req| req.idempotency_key == "retry-key-7")
            .times(1)
            .returning(|_| Ok(order_response("pending")));

        let service = service(rail);
        let order = service
            .create_order(
                dec!(1_000_000),
                "NGN",
                "0xwallet",
                customer(),
                Some("retry-key-7".into()),
            )
            .await
            .unwrap();

        assert_eq!(order.status, OnrampOrderStatus::Pending);
        assert!(order.payment_instructions.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn await_completion_polls_to_terminal() {
        let mut rail = MockOnrampRail::new();
        rail.expect_create_order()
            .returning(|_| Ok(order_response("processing")));

        let mut seq = mockall::Sequence::new();
        rail.expect_get_order()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(order_response("processing")));
        rail.expect_get_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(order_response("completed")));

        let service = service(rail);
        service
            .create_order(dec!(1_000_000), "NGN", "0xwallet", customer(), None)
            .await
            .unwrap();

        let order = service.await_completion("ord-1").await.unwrap();
        assert_eq!(order.status, OnrampOrderStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn await_completion_bound_returns_last_observed() {
        let mut rail = MockOnrampRail::new();
        rail.expect_create_order()
            .returning(|_| Ok(order_response("processing")));
        rail.expect_get_order()
            .returning(|_| Ok(order_response("processing")));

        let service = service(rail);
        service
            .create_order(dec!(1_000_000), "NGN", "0xwallet", customer(), None)
            .await
            .unwrap();

        // Bound hit: the order is handed back non-terminal, not failed
        let order = service.await_completion("ord-1").await.unwrap();
        assert_eq!(order.status, OnrampOrderStatus::Processing);
    }

    #[tokio::test]
    async fn webhook_updates_local_view() {
        let mut rail = MockOnrampRail::new();
        rail.expect_create_order()
            .returning(|_| Ok(order_response("processing")));

        let service = service(rail);
        service
            .create_order(dec!(1_000_000), "NGN", "0xwallet", customer(), None)
            .await
            .unwrap();

        service
            .apply_webhook(&WebhookEvent {
                order_id: Some("ord-1".into()),
                transfer_id: None,
                status: "completed".into(),
            })
            .unwrap();

        let cached = service.cached_order("ord-1").unwrap();
        assert_eq!(cached.status, OnrampOrderStatus::Completed);
    }
}
