pub mod config;
pub mod domain;
pub mod error;
pub mod flow;
pub mod persistence;
pub mod rails;
pub mod services;

pub use config::AppConfig;
pub use domain::{
    ConversionDirection, FlowLog, MilestoneSchedule, OverallStatus, Quote, StatusReport, Trade,
    TradeSpec, TradeStatus,
};
pub use error::{Result, TradelaneError};
pub use flow::{FlowOrchestrator, FlowOutcome, FlowRequest};
pub use persistence::TradeStore;
pub use rails::{OnrampRestClient, PayoutRestClient, WebhookServer};
pub use services::{DisbursementService, EscrowService, OnrampService, PayoutDetails, RateQuoter};
