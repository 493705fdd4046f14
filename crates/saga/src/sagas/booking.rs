//! Booking lifecycle sagas: assignment, confirmation, cancellation and
//! completion.

use async_trait::async_trait;
use chrono::Utc;
use common::EntityId;
use domain::{
    BookingEntry, CommissionPolicy, Direction, DomainError, LedgerEntry, Operator, Order,
    OrderStatus, PaymentMethod, RevenueShare, Vehicle,
};
use entity_store::EntityStore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::caller::{Caller, Role};
use crate::coordinator::SagaCoordinator;
use crate::error::{Result, SagaError};
use crate::executor::SagaRun;
use crate::log::Compensation;
use crate::outcome::SagaOutcome;
use crate::writer::{SagaWriter, UnitOfWork};

pub const ASSIGNMENT: &str = "BOOKING_ASSIGNMENT";
pub const CONFIRMATION: &str = "BOOKING_CONFIRMATION";
pub const CANCELLATION: &str = "BOOKING_CANCELLATION";
pub const COMPLETION: &str = "BOOKING_COMPLETION";

/// Ledger description for fares the platform collected.
pub const PLATFORM_OWES: &str = "You will get paid by us";
/// Ledger description for fares the customer paid the operator directly.
pub const PAID_BY_CUSTOMER: &str = "You have been paid by the passenger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignBooking {
    pub order_id: EntityId,
    pub vehicle_id: EntityId,
}

struct Assign {
    order_id: EntityId,
    vehicle_id: EntityId,
    operator_id: EntityId,
    share: RevenueShare,
}

#[async_trait]
impl UnitOfWork for Assign {
    type Output = Order;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Order> {
        let order = writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| {
                    order.assign(self.vehicle_id, self.operator_id, self.share.clone())
                },
            )
            .await?;

        let entry = BookingEntry::new(order.id, order.pickup_at, order.dropoff_at)?;
        writer
            .update(
                Compensation::RestoreCalendarEntry {
                    vehicle_id: self.vehicle_id,
                    order_id: self.order_id,
                },
                self.vehicle_id,
                |vehicle: &mut Vehicle| vehicle.insert_booking(entry.clone()),
            )
            .await?;

        Ok(order)
    }
}

struct Confirm {
    order_id: EntityId,
    vehicle_id: EntityId,
}

#[async_trait]
impl UnitOfWork for Confirm {
    type Output = Order;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Order> {
        let order = writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| order.confirm(),
            )
            .await?;

        writer
            .update(
                Compensation::RestoreCalendarEntry {
                    vehicle_id: self.vehicle_id,
                    order_id: self.order_id,
                },
                self.vehicle_id,
                |vehicle: &mut Vehicle| vehicle.accept_booking(self.order_id),
            )
            .await?;

        Ok(order)
    }
}

struct Cancel {
    order_id: EntityId,
}

#[async_trait]
impl UnitOfWork for Cancel {
    /// The cancelled order and the operator it was taken from.
    type Output = (Order, Option<EntityId>);

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Self::Output> {
        let now = Utc::now();

        // The calendar to clean up is the one the order points at inside
        // this unit, not at precondition time.
        let current: Order = writer.load(self.order_id).await?;
        let (vehicle_id, operator_id) = (current.vehicle_id, current.operator_id);

        let order = writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| {
                    if order.vehicle_id != vehicle_id {
                        return Err(DomainError::AssignmentChanged(order.id));
                    }
                    order.cancel(now)
                },
            )
            .await?;

        if let Some(vehicle_id) = vehicle_id {
            writer
                .update(
                    Compensation::RestoreCalendarEntry {
                        vehicle_id,
                        order_id: self.order_id,
                    },
                    vehicle_id,
                    |vehicle: &mut Vehicle| {
                        vehicle.remove_booking(self.order_id);
                        Ok(())
                    },
                )
                .await?;
        }

        Ok((order, operator_id))
    }
}

struct Complete {
    order_id: EntityId,
    vehicle_id: EntityId,
    operator_id: EntityId,
}

impl Complete {
    fn ledger_entry(&self, order: &Order) -> LedgerEntry {
        let cut = order.share.as_ref().map_or(order.total, |share| share.cut);
        let (direction, pending, description) = match order.payment_method {
            PaymentMethod::Online => (Direction::Credit, true, PLATFORM_OWES),
            PaymentMethod::Hybrid => (Direction::Credit, false, PAID_BY_CUSTOMER),
            PaymentMethod::Cash => (Direction::Debit, false, PAID_BY_CUSTOMER),
        };
        LedgerEntry::new(
            self.operator_id,
            order.id,
            direction,
            cut,
            pending,
            description,
        )
    }
}

#[async_trait]
impl UnitOfWork for Complete {
    type Output = (Order, LedgerEntry);

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<(Order, LedgerEntry)> {
        let now = Utc::now();

        writer
            .update(
                Compensation::RestoreCalendarEntry {
                    vehicle_id: self.vehicle_id,
                    order_id: self.order_id,
                },
                self.vehicle_id,
                |vehicle: &mut Vehicle| {
                    vehicle
                        .remove_booking(self.order_id)
                        .map(|_| ())
                        .ok_or(DomainError::BookingNotFound(self.order_id))
                },
            )
            .await?;

        let existing: Vec<LedgerEntry> = writer.find_by("order_id", &self.order_id).await?;
        if !existing.is_empty() {
            return Err(SagaError::Conflict(format!(
                "order {} already has a ledger entry",
                self.order_id
            )));
        }

        let current: Order = writer.load(self.order_id).await?;
        let entry = self.ledger_entry(&current);
        writer
            .create(
                Compensation::DeleteLedgerEntry { entry_id: entry.id },
                &entry,
            )
            .await?;

        if entry.pending {
            let cut = entry.amount;
            writer
                .update(
                    Compensation::AdjustWallet {
                        operator_id: self.operator_id,
                        delta: -cut,
                    },
                    self.operator_id,
                    |operator: &mut Operator| {
                        operator.account.credit(cut);
                        Ok(())
                    },
                )
                .await?;
        }

        let order = writer
            .update(
                Compensation::RestoreOrder {
                    order_id: self.order_id,
                },
                self.order_id,
                |order: &mut Order| {
                    order.complete(now)?;
                    if order.payment_method != PaymentMethod::Online && !order.share_paid() {
                        order.mark_share_paid(
                            CommissionPolicy::channel_for(order.payment_method),
                            now,
                        )?;
                    }
                    Ok(())
                },
            )
            .await?;

        Ok((order, entry))
    }
}

impl<S: EntityStore> SagaCoordinator<S> {
    /// Attaches a vehicle to an order and books it on the vehicle's calendar.
    #[tracing::instrument(skip(self, caller), fields(saga_type = ASSIGNMENT))]
    pub async fn assign_booking(&self, request: AssignBooking, caller: &Caller) -> SagaOutcome<Order> {
        let mut run = self.executor.begin(ASSIGNMENT);
        let result = self.run_assignment(&mut run, request, caller).await;
        run.finish(result).await
    }

    async fn run_assignment(
        &self,
        run: &mut SagaRun<'_, S>,
        request: AssignBooking,
        caller: &Caller,
    ) -> Result<Order> {
        caller.require_admin()?;

        let order: Order = self.read(request.order_id).await?;
        if order.status.is_terminal() {
            return Err(SagaError::Validation(format!(
                "order {} is {}",
                order.id, order.status
            )));
        }
        let vehicle: Vehicle = self.read(request.vehicle_id).await?;
        if vehicle.has_booking(order.id) {
            return Err(SagaError::Conflict(format!(
                "vehicle {} already lists order {}",
                vehicle.id, order.id
            )));
        }
        let operator: Operator = self.read(vehicle.owner_id).await?;
        if !operator.verified {
            return Err(SagaError::Validation(format!(
                "operator {} is not verified",
                operator.id
            )));
        }

        let share = self
            .config
            .commission
            .revenue_share(order.payment_method, order.total);
        tracing::info!(order_id = %order.id, cut = %share.cut, "revenue_share_computed");

        let order = run
            .apply(&Assign {
                order_id: order.id,
                vehicle_id: vehicle.id,
                operator_id: operator.id,
                share,
            })
            .await?;

        self.notify(
            operator.id,
            "booking_assigned",
            json!({ "order_id": order.id, "pickup_at": order.pickup_at }),
        )
        .await;
        Ok(order)
    }

    /// The assigned operator (or an administrator) accepts a booking.
    #[tracing::instrument(skip(self, caller), fields(saga_type = CONFIRMATION))]
    pub async fn confirm_booking(&self, order_id: EntityId, caller: &Caller) -> SagaOutcome<Order> {
        let mut run = self.executor.begin(CONFIRMATION);
        let result = self.run_confirmation(&mut run, order_id, caller).await;
        run.finish(result).await
    }

    async fn run_confirmation(
        &self,
        run: &mut SagaRun<'_, S>,
        order_id: EntityId,
        caller: &Caller,
    ) -> Result<Order> {
        let order: Order = self.read(order_id).await?;
        let (Some(vehicle_id), Some(operator_id)) = (order.vehicle_id, order.operator_id) else {
            return Err(SagaError::Validation(format!(
                "order {order_id} has no assigned vehicle"
            )));
        };
        caller.require_self_or_admin(operator_id)?;
        if order.status != OrderStatus::Assigning {
            return Err(SagaError::Conflict(format!(
                "order {order_id} is {}",
                order.status
            )));
        }

        let order = run.apply(&Confirm { order_id, vehicle_id }).await?;

        self.notify(order.customer_id, "booking_confirmed", json!({ "order_id": order_id }))
            .await;
        Ok(order)
    }

    /// Cancels a booking and frees the vehicle's calendar slot.
    #[tracing::instrument(skip(self, caller), fields(saga_type = CANCELLATION))]
    pub async fn cancel_booking(&self, order_id: EntityId, caller: &Caller) -> SagaOutcome<Order> {
        let mut run = self.executor.begin(CANCELLATION);
        let result = self.run_cancellation(&mut run, order_id, caller).await;
        run.finish(result).await
    }

    async fn run_cancellation(
        &self,
        run: &mut SagaRun<'_, S>,
        order_id: EntityId,
        caller: &Caller,
    ) -> Result<Order> {
        let order: Order = self.read(order_id).await?;
        let allowed = match caller.role {
            Role::Admin => true,
            Role::Customer => caller.id == order.customer_id,
            Role::Operator => order.operator_id == Some(caller.id),
        };
        if !allowed {
            return Err(SagaError::Unauthorized(format!(
                "caller {} may not cancel order {order_id}",
                caller.id
            )));
        }
        if order.status.is_terminal() {
            return Err(SagaError::Conflict(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }

        let (cancelled, operator_id) = run.apply(&Cancel { order_id }).await?;

        self.notify(order.customer_id, "booking_cancelled", json!({ "order_id": order_id }))
            .await;
        if let Some(operator_id) = operator_id {
            self.notify(operator_id, "booking_cancelled", json!({ "order_id": order_id }))
                .await;
        }
        Ok(cancelled)
    }

    /// Closes a finished ride: frees the calendar, records the ledger entry
    /// and marks the order completed and paid.
    #[tracing::instrument(skip(self, caller), fields(saga_type = COMPLETION))]
    pub async fn complete_booking(
        &self,
        order_id: EntityId,
        caller: &Caller,
    ) -> SagaOutcome<(Order, LedgerEntry)> {
        let mut run = self.executor.begin(COMPLETION);
        let result = self.run_completion(&mut run, order_id, caller).await;
        run.finish(result).await
    }

    async fn run_completion(
        &self,
        run: &mut SagaRun<'_, S>,
        order_id: EntityId,
        caller: &Caller,
    ) -> Result<(Order, LedgerEntry)> {
        let order: Order = self.read(order_id).await?;
        let (Some(vehicle_id), Some(operator_id)) = (order.vehicle_id, order.operator_id) else {
            return Err(SagaError::Validation(format!(
                "order {order_id} has no assigned vehicle"
            )));
        };
        caller.require_self_or_admin(operator_id)?;
        if !matches!(order.status, OrderStatus::Assigning | OrderStatus::Confirmed) {
            return Err(SagaError::Conflict(format!(
                "order {order_id} is {}",
                order.status
            )));
        }
        if Utc::now() < order.dropoff_at {
            return Err(DomainError::RideNotFinished(order_id).into());
        }
        let vehicle: Vehicle = self.read(vehicle_id).await?;
        if !vehicle.has_booking(order_id) {
            return Err(SagaError::Validation(format!(
                "vehicle {vehicle_id} has no booking for order {order_id}"
            )));
        }

        let (order, entry) = run
            .apply(&Complete {
                order_id,
                vehicle_id,
                operator_id,
            })
            .await?;

        self.notify(
            operator_id,
            "booking_completed",
            json!({ "order_id": order_id, "amount": entry.amount, "pending": entry.pending }),
        )
        .await;
        Ok((order, entry))
    }
}
