//! Concrete sagas. Each module adds its workflows to
//! [`SagaCoordinator`](crate::SagaCoordinator).

pub mod booking;
pub mod payout;
pub mod registration;
pub mod verification;

pub use booking::AssignBooking;
pub use payout::{PayoutReceipt, PayoutRequest};
pub use registration::RegisterVehicle;
pub use verification::{SubmitVerification, VerificationUpload};
