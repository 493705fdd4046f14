//! Integration tests for the booking sagas and the executor underneath them.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use common::{EntityId, Money};
use domain::{
    BookingEntry, Direction, LedgerEntry, Operator, Order, OrderStatus, PaymentMethod,
    SettlementChannel, SettlementStatus, Vehicle,
};
use entity_store::Document;
use saga::sagas::booking::{PAID_BY_CUSTOMER, PLATFORM_OWES};
use saga::{
    AssignBooking, Caller, Compensation, CompensationContext, CompensationOutcome, Compensator,
    CompensatorRegistry, ErrorKind, RollbackStatus, SagaError, SagaState, StepKind,
};

use support::TestHarness;

fn request(order: &Order, vehicle: &Vehicle) -> AssignBooking {
    AssignBooking {
        order_id: order.id,
        vehicle_id: vehicle.id,
    }
}

async fn assert_hybrid_assignment(harness: TestHarness) {
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Hybrid, 1000, 3).await;

    let assigned = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    assert_eq!(assigned.status, OrderStatus::Assigning);
    assert_eq!(assigned.vehicle_id, Some(vehicle.id));
    assert_eq!(assigned.operator_id, Some(operator.id));
    let share = assigned.share.unwrap();
    assert_eq!(share.cut, Money::from_rupees(900));
    assert_eq!(share.channel, SettlementChannel::Customer);
    assert_eq!(share.status, None);

    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert_eq!(vehicle.calendar.len(), 1);
    let entry = vehicle.booking(order.id).unwrap();
    assert_eq!(entry.start, order.pickup_at);
    assert_eq!(entry.end, order.dropoff_at);
    assert!(!entry.accepted);

    assert_eq!(harness.notifier.sent_count("booking_assigned"), 1);
}

#[tokio::test]
async fn test_hybrid_assignment_books_vehicle_with_commission() {
    assert_hybrid_assignment(TestHarness::new()).await;
}

#[tokio::test]
async fn test_hybrid_assignment_without_transactions() {
    assert_hybrid_assignment(TestHarness::manual()).await;
}

#[tokio::test]
async fn test_cash_assignment_keeps_full_fare() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 1000, 3).await;

    let assigned = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    assert_eq!(assigned.share.unwrap().cut, Money::from_rupees(1000));
}

#[tokio::test]
async fn test_vehicle_already_listing_order_is_rejected_without_writes() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let order = harness.order(PaymentMethod::Online, 800, 3).await;

    let mut vehicle = Vehicle::new(operator.id, "Dzire", "KA01ZZ0001", 4, Vec::new()).unwrap();
    vehicle
        .insert_booking(BookingEntry::new(order.id, order.pickup_at, order.dropoff_at).unwrap())
        .unwrap();
    harness.seed(&vehicle).await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert_eq!(failure.rollback, RollbackStatus::NotNeeded);
    assert!(!failure.funds_moved);

    let order: Order = harness.get(order.id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.share.is_none());
    assert!(order.vehicle_id.is_none());
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert_eq!(vehicle.calendar.len(), 1);
    assert!(harness.logs_for(failure.saga_id).await.is_empty());
}

#[tokio::test]
async fn test_unverified_operator_cannot_take_bookings() {
    let harness = TestHarness::new();
    let operator = harness.unverified_operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(failure.user_message(), "operation failed, no charge applied");
}

#[tokio::test]
async fn test_only_admins_assign() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &Caller::operator(operator.id))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Unauthorized);
    let order: Order = harness.get(order.id).await;
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_missing_vehicle_is_not_found() {
    let harness = TestHarness::new();
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;

    let failure = harness
        .coordinator
        .assign_booking(
            AssignBooking {
                order_id: order.id,
                vehicle_id: EntityId::new(),
            },
            &harness.admin,
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::NotFound);
}

async fn assert_overlapping_assignments_admit_one(harness: TestHarness) {
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let first = harness.order(PaymentMethod::Online, 700, 3).await;
    let second = harness.order(PaymentMethod::Cash, 400, 3).await;

    let (a, b) = tokio::join!(
        harness
            .coordinator
            .assign_booking(request(&first, &vehicle), &harness.admin),
        harness
            .coordinator
            .assign_booking(request(&second, &vehicle), &harness.admin),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    let failure = a.err().or(b.err()).unwrap();
    assert_eq!(failure.kind, ErrorKind::Conflict);

    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert_eq!(vehicle.calendar.len(), 1);

    let orders: Vec<Order> = vec![harness.get(first.id).await, harness.get(second.id).await];
    let pending: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].vehicle_id.is_none());
    assert!(pending[0].share.is_none());
}

#[tokio::test]
async fn test_overlapping_assignments_admit_one() {
    assert_overlapping_assignments_admit_one(TestHarness::new()).await;
}

#[tokio::test]
async fn test_overlapping_assignments_admit_one_without_transactions() {
    assert_overlapping_assignments_admit_one(TestHarness::manual()).await;
}

#[tokio::test]
async fn test_back_to_back_bookings_do_not_overlap() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let morning = harness.order(PaymentMethod::Cash, 400, 3).await;
    let afternoon = harness.order(PaymentMethod::Cash, 400, 6).await;

    for order in [&afternoon, &morning] {
        harness
            .coordinator
            .assign_booking(request(order, &vehicle), &harness.admin)
            .await
            .unwrap();
    }

    let vehicle: Vehicle = harness.get(vehicle.id).await;
    let ids: Vec<EntityId> = vehicle.calendar.iter().map(|e| e.order_id).collect();
    assert_eq!(ids, vec![morning.id, afternoon.id]);
}

#[tokio::test]
async fn test_commit_conflicts_are_retried_and_applied_once() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Hybrid, 1000, 3).await;
    harness.store.inject_commit_conflicts(2).await;

    let assigned = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    assert_eq!(assigned.status, OrderStatus::Assigning);
    assert_eq!(harness.store.commit_count().await, 1);
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert_eq!(vehicle.calendar.len(), 1);
    let stored: Order = harness.get(order.id).await;
    assert_eq!(stored.share.unwrap().cut, Money::from_rupees(900));
}

#[tokio::test]
async fn test_exhausted_retries_report_transient_store_failure() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 600, 3).await;
    harness.store.inject_commit_conflicts(10).await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::TransientStore);
    assert_eq!(failure.rollback, RollbackStatus::NotNeeded);
    assert_eq!(harness.store.commit_count().await, 0);
    let order: Order = harness.get(order.id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.calendar.is_empty());
}

#[tokio::test]
async fn test_failed_transaction_leaves_no_trace() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Online, 900, 3).await;
    harness
        .store
        .inject_write_failures(Vehicle::COLLECTION, 1, false)
        .await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Internal);
    assert_eq!(failure.rollback, RollbackStatus::NotNeeded);
    let stored: Order = harness.get(order.id).await;
    assert_eq!(stored, order);
}

#[tokio::test]
async fn test_manual_failure_restores_pre_saga_values() {
    let harness = TestHarness::manual();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Online, 900, 3).await;
    harness
        .store
        .inject_write_failures(Vehicle::COLLECTION, 1, false)
        .await;

    let failure = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Internal);
    assert!(failure.message.contains("injected write failure"));
    assert_eq!(failure.rollback, RollbackStatus::RolledBack);
    assert_eq!(failure.compensations.len(), 1);
    assert_eq!(failure.compensations[0].kind, StepKind::OrderUpdated);
    assert_eq!(
        failure.compensations[0].outcome,
        CompensationOutcome::Compensated
    );

    let restored: Order = harness.get(order.id).await;
    assert_eq!(restored.status, OrderStatus::Pending);
    assert!(restored.vehicle_id.is_none());
    assert!(restored.operator_id.is_none());
    assert!(restored.share.is_none());
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.calendar.is_empty());

    let statuses: Vec<SagaState> = harness
        .logs_for(failure.saga_id)
        .await
        .into_iter()
        .map(|log| log.status)
        .collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.contains(&SagaState::RollingBack));
    assert!(statuses.contains(&SagaState::RolledBack));
}

#[tokio::test]
async fn test_confirmation_accepts_calendar_entry() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;
    harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    let stranger = Caller::operator(EntityId::new());
    let failure = harness
        .coordinator
        .confirm_booking(order.id, &stranger)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Unauthorized);

    let confirmed = harness
        .coordinator
        .confirm_booking(order.id, &Caller::operator(operator.id))
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.booking(order.id).unwrap().accepted);
    assert_eq!(harness.notifier.sent_count("booking_confirmed"), 1);

    let again = harness
        .coordinator
        .confirm_booking(order.id, &Caller::operator(operator.id))
        .await
        .unwrap_err();
    assert_eq!(again.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_cancellation_frees_the_vehicle() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Online, 750, 3).await;
    harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    let other_customer = Caller::customer(EntityId::new());
    let failure = harness
        .coordinator
        .cancel_booking(order.id, &other_customer)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Unauthorized);

    let cancelled = harness
        .coordinator
        .cancel_booking(order.id, &Caller::customer(order.customer_id))
        .await
        .unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert!(cancelled.vehicle_id.is_none());
    let share = cancelled.share.unwrap();
    assert_eq!(share.channel, SettlementChannel::Cancelled);
    assert_eq!(share.status, Some(SettlementStatus::Cancelled));
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.calendar.is_empty());
    assert_eq!(harness.notifier.sent_count("booking_cancelled"), 2);

    let again = harness
        .coordinator
        .cancel_booking(order.id, &harness.admin)
        .await
        .unwrap_err();
    assert_eq!(again.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_online_completion_records_pending_credit() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness
        .finished_ride(&vehicle, PaymentMethod::Online, 1000)
        .await;

    let (completed, entry) = harness
        .coordinator
        .complete_booking(order.id, &Caller::operator(operator.id))
        .await
        .unwrap();

    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.paid, Money::from_rupees(1000));
    assert!(!completed.share_paid());

    assert_eq!(entry.direction, Direction::Credit);
    assert_eq!(entry.amount, Money::from_rupees(900));
    assert!(entry.pending);
    assert_eq!(entry.description, PLATFORM_OWES);
    assert_eq!(entry.operator_id, operator.id);
    let stored: LedgerEntry = harness.get(entry.id).await;
    assert_eq!(stored, entry);

    let operator: Operator = harness.get(operator.id).await;
    assert_eq!(operator.account.balance, Money::from_rupees(900));
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.calendar.is_empty());
}

#[tokio::test]
async fn test_cash_completion_settles_share_with_customer() {
    let harness = TestHarness::manual();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.finished_ride(&vehicle, PaymentMethod::Cash, 600).await;

    let (completed, entry) = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap();

    assert!(completed.share_paid());
    assert_eq!(
        completed.share.unwrap().channel,
        SettlementChannel::Customer
    );
    assert_eq!(entry.direction, Direction::Debit);
    assert_eq!(entry.amount, Money::from_rupees(600));
    assert!(!entry.pending);
    assert_eq!(entry.description, PAID_BY_CUSTOMER);

    let operator: Operator = harness.get(operator.id).await;
    assert!(operator.account.balance.is_zero());
}

#[tokio::test]
async fn test_hybrid_completion_is_settled_credit() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness
        .finished_ride(&vehicle, PaymentMethod::Hybrid, 1000)
        .await;

    let (completed, entry) = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap();

    assert!(completed.share_paid());
    assert_eq!(entry.direction, Direction::Credit);
    assert_eq!(entry.amount, Money::from_rupees(900));
    assert!(!entry.pending);
}

#[tokio::test]
async fn test_completion_before_dropoff_is_rejected() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;
    harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    let failure = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(harness.store.count(LedgerEntry::COLLECTION).await, 0);
}

#[tokio::test]
async fn test_completion_happens_once() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness
        .finished_ride(&vehicle, PaymentMethod::Online, 1000)
        .await;

    harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap();
    let failure = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Conflict);
    assert_eq!(harness.store.count(LedgerEntry::COLLECTION).await, 1);
    let operator: Operator = harness.get(operator.id).await;
    assert_eq!(operator.account.balance, Money::from_rupees(900));
}

#[tokio::test]
async fn test_manual_completion_failure_undoes_ledger_and_wallet() {
    let harness = TestHarness::manual();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness
        .finished_ride(&vehicle, PaymentMethod::Online, 1000)
        .await;
    harness
        .store
        .inject_write_failures(Order::COLLECTION, 1, false)
        .await;

    let failure = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap_err();

    assert_eq!(failure.rollback, RollbackStatus::RolledBack);
    let undone: Vec<StepKind> = failure.compensations.iter().map(|c| c.kind).collect();
    assert_eq!(
        undone,
        vec![
            StepKind::WalletUpdated,
            StepKind::LedgerCreated,
            StepKind::CalendarUpdated
        ]
    );

    assert_eq!(harness.store.count(LedgerEntry::COLLECTION).await, 0);
    let operator: Operator = harness.get(operator.id).await;
    assert!(operator.account.balance.is_zero());
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.has_booking(order.id));
    let order: Order = harness.get(order.id).await;
    assert_eq!(order.status, OrderStatus::Assigning);
}

struct AlwaysFails;

#[async_trait]
impl Compensator for AlwaysFails {
    async fn compensate(
        &self,
        _step: &Compensation,
        _ctx: &mut CompensationContext<'_>,
    ) -> saga::Result<CompensationOutcome> {
        Err(SagaError::Validation("ledger store offline".into()))
    }
}

#[tokio::test]
async fn test_failed_compensation_is_rollback_partial() {
    let mut registry = CompensatorRegistry::standard();
    registry.register(StepKind::LedgerCreated, Arc::new(AlwaysFails));
    let harness = TestHarness::manual().with_registry(registry);

    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness
        .finished_ride(&vehicle, PaymentMethod::Online, 1000)
        .await;
    harness
        .store
        .inject_write_failures(Order::COLLECTION, 1, false)
        .await;

    let failure = harness
        .coordinator
        .complete_booking(order.id, &harness.admin)
        .await
        .unwrap_err();

    // The reported error is the one that stopped the run.
    assert_eq!(failure.kind, ErrorKind::Internal);
    assert!(failure.message.contains("injected write failure"));
    assert!(failure.is_partial());
    assert!(failure.compensations.iter().any(|c| c.kind == StepKind::LedgerCreated
        && matches!(c.outcome, CompensationOutcome::Failed(_))));

    // The remaining steps were still undone.
    let operator: Operator = harness.get(operator.id).await;
    assert!(operator.account.balance.is_zero());
    let vehicle: Vehicle = harness.get(vehicle.id).await;
    assert!(vehicle.has_booking(order.id));
    assert_eq!(harness.store.count(LedgerEntry::COLLECTION).await, 1);

    let logs = harness.logs_for(failure.saga_id).await;
    assert!(logs
        .iter()
        .any(|log| log.status == SagaState::RollbackPartial && log.failed_compensations() == 1));
}

#[tokio::test]
async fn test_successful_runs_are_logged() {
    let harness = TestHarness::new();
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;

    harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    assert_eq!(harness.store.count("compensation_logs").await, 1);
}

#[tokio::test]
async fn test_notification_failures_do_not_fail_sagas() {
    let harness = TestHarness::new();
    harness.notifier.set_fail(true);
    let operator = harness.operator().await;
    let vehicle = harness.vehicle(&operator).await;
    let order = harness.order(PaymentMethod::Cash, 500, 3).await;

    let assigned = harness
        .coordinator
        .assign_booking(request(&order, &vehicle), &harness.admin)
        .await
        .unwrap();

    assert_eq!(assigned.status, OrderStatus::Assigning);
}
