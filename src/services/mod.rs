pub mod disbursement;
pub mod escrow;
pub mod onramp;
pub mod quoter;

pub use disbursement::{DisbursementService, PayoutDetails};
pub use escrow::EscrowService;
pub use onramp::OnrampService;
pub use quoter::RateQuoter;
