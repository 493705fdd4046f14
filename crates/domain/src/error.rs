//! Domain error types.

use common::{EntityId, Money};
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised when an entity rejects a state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The order cannot move between these statuses.
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The ride has not ended yet.
    #[error("Ride for order {0} has not ended yet")]
    RideNotFinished(EntityId),

    /// The order's revenue share has already been paid out.
    #[error("Revenue share for order {0} is already paid")]
    ShareAlreadyPaid(EntityId),

    /// The order has no revenue share to settle.
    #[error("Order {0} has no revenue share")]
    ShareMissing(EntityId),

    /// The vehicle calendar already lists the order.
    #[error("Vehicle already has a booking for order {0}")]
    DuplicateBooking(EntityId),

    /// The booking overlaps another booking on the same vehicle.
    #[error("Booking for order {order_id} overlaps booking for order {conflicting}")]
    BookingOverlap {
        order_id: EntityId,
        conflicting: EntityId,
    },

    /// The order's vehicle changed while the order was being updated.
    #[error("Assignment of order {0} changed concurrently")]
    AssignmentChanged(EntityId),

    /// The vehicle calendar does not list the order.
    #[error("Vehicle has no booking for order {0}")]
    BookingNotFound(EntityId),

    /// The booking window is empty or inverted.
    #[error("Booking window must end after it starts")]
    InvalidWindow,

    /// Bank details are missing or malformed.
    #[error("Invalid bank details: {0}")]
    InvalidBankDetails(String),

    /// The operator does not have enough balance.
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Money, requested: Money },

    /// The ledger entry is not pending.
    #[error("Ledger entry {0} is not pending")]
    EntryNotPending(EntityId),

    /// The ledger entry is still pending.
    #[error("Ledger entry {0} is still pending")]
    EntryStillPending(EntityId),

    /// The operator already owns a registered vehicle.
    #[error("Operator {0} already has a vehicle")]
    VehicleAlreadyRegistered(EntityId),

    /// The operator cannot be approved or revoked in their current state.
    #[error("Operator {operator_id} cannot change verification: {reason}")]
    VerificationNotAllowed {
        operator_id: EntityId,
        reason: &'static str,
    },

    /// A value failed validation.
    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl DomainError {
    /// Returns true if the error reflects a clash with current entity state
    /// (as opposed to bad input).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidTransition { .. }
                | DomainError::ShareAlreadyPaid(_)
                | DomainError::DuplicateBooking(_)
                | DomainError::AssignmentChanged(_)
                | DomainError::BookingOverlap { .. }
                | DomainError::InsufficientBalance { .. }
                | DomainError::EntryNotPending(_)
                | DomainError::EntryStillPending(_)
                | DomainError::VehicleAlreadyRegistered(_)
        )
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
