//! Domain model for the ride-booking backend.
//!
//! This crate provides the stored entities and the rules they enforce:
//! - Order with its lifecycle state machine and operator revenue share
//! - Vehicle with its booking calendar
//! - Operator with wallet, bank details and verification state
//! - LedgerEntry recording money owed or paid per order
//! - CommissionPolicy computing the operator's cut

pub mod commission;
pub mod error;
pub mod ledger;
pub mod operator;
pub mod order;
pub mod vehicle;

pub use commission::CommissionPolicy;
pub use error::{DomainError, Result};
pub use ledger::{Direction, LedgerEntry};
pub use operator::{Account, BankDetails, Operator, VerificationDocument};
pub use order::{
    Order, OrderStatus, PaymentMethod, RevenueShare, SettlementChannel, SettlementStatus,
};
pub use vehicle::{BookingEntry, Vehicle};
