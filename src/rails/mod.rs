pub mod onramp_rest;
pub mod payout_rest;
pub mod retry;
pub mod traits;
pub mod webhook;

pub use onramp_rest::OnrampRestClient;
pub use payout_rest::PayoutRestClient;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use traits::{
    BankDetails, BeneficiaryRequest, BeneficiaryResponse, CreateOrderRequest, CustomerIdentity,
    OnrampRail, OrderResponse, PayoutRail, RateRail, RateResponse, TransferRequest,
    TransferResponse,
};
pub use webhook::{
    sign_body, verify_signature, WebhookDelivery, WebhookEvent, WebhookServer,
};
