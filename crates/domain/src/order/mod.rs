//! Booking orders.

mod share;
mod status;

pub use share::{RevenueShare, SettlementChannel, SettlementStatus};
pub use status::OrderStatus;

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use entity_store::Document;
use serde::{Deserialize, Serialize};

use crate::{DomainError, Result};

/// How the customer pays for the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Paid to the platform up front.
    Online,
    /// Paid to the operator in cash.
    Cash,
    /// Part online, remainder to the operator.
    Hybrid,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "Online",
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Hybrid => "Hybrid",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single booking.
///
/// While the order is `Assigning` or `Confirmed` it references exactly one
/// vehicle whose calendar lists it. Orders are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub vehicle_id: Option<EntityId>,
    pub operator_id: Option<EntityId>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub pickup_at: DateTime<Utc>,
    pub dropoff_at: DateTime<Utc>,
    pub total: Money,
    pub paid: Money,
    pub share: Option<RevenueShare>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Order {
    const COLLECTION: &'static str = "orders";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Order {
    /// Creates a pending order.
    pub fn new(
        customer_id: EntityId,
        payment_method: PaymentMethod,
        total: Money,
        pickup_at: DateTime<Utc>,
        dropoff_at: DateTime<Utc>,
    ) -> Result<Self> {
        if dropoff_at <= pickup_at {
            return Err(DomainError::InvalidWindow);
        }
        if !total.is_positive() {
            return Err(DomainError::InvalidValue {
                field: "total",
                reason: format!("must be positive, got {total}"),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: EntityId::new(),
            customer_id,
            vehicle_id: None,
            operator_id: None,
            status: OrderStatus::Pending,
            payment_method,
            pickup_at,
            dropoff_at,
            total,
            paid: Money::zero(),
            share: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attaches a vehicle and its operator and records the operator's share.
    pub fn assign(
        &mut self,
        vehicle_id: EntityId,
        operator_id: EntityId,
        share: RevenueShare,
    ) -> Result<()> {
        self.transition(OrderStatus::Assigning)?;
        self.vehicle_id = Some(vehicle_id);
        self.operator_id = Some(operator_id);
        self.share = Some(share);
        Ok(())
    }

    /// The operator accepted the booking.
    pub fn confirm(&mut self) -> Result<()> {
        self.transition(OrderStatus::Confirmed)
    }

    /// Cancels the booking, detaching vehicle and operator.
    ///
    /// Customer, schedule and amounts are kept for audit.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(OrderStatus::Cancelled)?;
        self.vehicle_id = None;
        self.operator_id = None;
        self.share = Some(RevenueShare::cancelled(at));
        Ok(())
    }

    /// Marks the ride finished and fully paid. The drop-off time must have passed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if now < self.dropoff_at {
            return Err(DomainError::RideNotFinished(self.id));
        }
        self.transition(OrderStatus::Completed)?;
        self.paid = self.total;
        Ok(())
    }

    /// Returns true if the operator's share has been paid out.
    pub fn share_paid(&self) -> bool {
        self.share.as_ref().is_some_and(RevenueShare::is_paid)
    }

    /// Settles the operator's share through `channel`.
    pub fn mark_share_paid(&mut self, channel: SettlementChannel, at: DateTime<Utc>) -> Result<()> {
        let id = self.id;
        let share = self.share.as_mut().ok_or(DomainError::ShareMissing(id))?;
        if share.is_paid() {
            return Err(DomainError::ShareAlreadyPaid(id));
        }
        share.channel = channel;
        share.status = Some(SettlementStatus::Paid);
        share.settled_at = Some(at);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Puts back a previously recorded share.
    pub fn reset_share(&mut self, share: Option<RevenueShare>) {
        self.share = share;
        self.updated_at = Utc::now();
    }
}
