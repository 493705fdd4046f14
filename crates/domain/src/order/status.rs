//! Order lifecycle state machine.

use serde::{Deserialize, Serialize};

/// The status of a booking in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Assigning ──► Confirmed ──► Completed
///    │            │  └─────────────────────► Completed
///    └────────────┴──────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Booked by a customer, no vehicle assigned yet.
    #[default]
    Pending,

    /// A vehicle has been assigned, waiting for the operator to accept.
    Assigning,

    /// The operator accepted the booking.
    Confirmed,

    /// The ride finished and was settled (terminal state).
    Completed,

    /// The booking was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Assigning)
                | (Assigning, Confirmed)
                | (Assigning, Completed)
                | (Confirmed, Completed)
                | (Pending, Cancelled)
                | (Assigning, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    /// Returns true if a vehicle must be attached in this status.
    pub fn holds_vehicle(&self) -> bool {
        matches!(self, OrderStatus::Assigning | OrderStatus::Confirmed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Assigning => "Assigning",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
