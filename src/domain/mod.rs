pub mod flow;
pub mod milestone;
pub mod order;
pub mod quote;
pub mod trade;

pub use flow::{FlowEntry, FlowLog, FlowStep, OverallStatus, StatusReport, StepStatus};
pub use milestone::{
    MilestonePayment, MilestoneSchedule, MilestoneStage, MilestoneStatus, ScheduleEntry,
    TransferStatus,
};
pub use order::{OnrampOrder, OnrampOrderStatus, PaymentInstructions};
pub use quote::{ConversionDirection, Quote};
pub use trade::{InspectionStatus, Trade, TradeSpec, TradeStatus};
