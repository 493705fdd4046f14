//! Saga engine for the ride-booking backend.
//!
//! Every workflow that touches more than one entity (booking assignment,
//! payout, cab registration, driver verification, ...) runs through one
//! [`SagaExecutor`]:
//!
//! 1. Internal mutations are grouped into [`UnitOfWork`]s. When the store
//!    supports transactions, a unit runs in one transaction and is retried
//!    on transient conflicts. Otherwise each write commits on its own and
//!    its pre-image is journaled.
//! 2. Calls to external services (payment gateway, asset store) are
//!    journaled as they complete.
//! 3. On failure the journal is walked in reverse and each step is handed
//!    to the compensator registered for its kind.
//!
//! Completed and failed runs are persisted to the `compensation_logs`
//! collection.

pub mod caller;
pub mod compensator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod log;
pub mod outcome;
pub mod retry;
pub mod sagas;
pub mod services;
pub mod state;
pub mod writer;

pub use caller::{Caller, Role};
pub use compensator::{CompensationContext, Compensator, CompensatorRegistry};
pub use config::{BalanceEffect, ExecutionMode, PayoutPolicy, SagaConfig};
pub use coordinator::SagaCoordinator;
pub use error::{ErrorKind, Result, SagaError};
pub use executor::{SagaExecutor, SagaRun};
pub use log::{
    Compensation, CompensationLog, CompensationOutcome, CompensationRecord, CompletedStep,
    Journal, StepKind,
};
pub use outcome::{RollbackStatus, SagaFailure, SagaOutcome};
pub use retry::{RetryController, RetryPolicy};
pub use sagas::{
    AssignBooking, PayoutReceipt, PayoutRequest, RegisterVehicle, SubmitVerification,
    VerificationUpload,
};
pub use services::{
    AssetRules, AssetStore, AssetUpload, HttpGatewayConfig, HttpPaymentGateway,
    InMemoryAssetStore, InMemoryNotifier, InMemoryPaymentGateway, Notification, Notifier,
    PayeeProfile, PaymentGateway, TracingNotifier, TransferReceipt, TransferRequest,
};
pub use state::SagaState;
pub use writer::{SagaWriter, UnitOfWork};
