//! Integration tests for storing domain entities.
//!
//! These verify the entities persist through the entity store and that
//! calendar rules hold when applied as guarded atomic updates.

use chrono::{Duration, Utc};
use common::{EntityId, Money};
use domain::{
    BookingEntry, CommissionPolicy, LedgerEntry, Operator, Order, OrderStatus, PaymentMethod,
    Vehicle,
};
use entity_store::{
    DocumentOpsExt, EntityStore, GuardViolation, InMemoryEntityStore, StoreError, Version,
};

fn order(method: PaymentMethod, offset_hours: i64) -> Order {
    let pickup = Utc::now() + Duration::hours(offset_hours);
    Order::new(
        EntityId::new(),
        method,
        Money::from_rupees(1000),
        pickup,
        pickup + Duration::hours(2),
    )
    .unwrap()
}

async fn seeded_vehicle(store: &InMemoryEntityStore) -> Vehicle {
    let operator = Operator::new("Asha", "asha@example.com", "9999999999");
    let vehicle = Vehicle::new(operator.id, "Sedan", "KA01AB1234", 4, Vec::new()).unwrap();
    let mut session = store.session();
    session.create(&operator).await.unwrap();
    session.create(&vehicle).await.unwrap();
    vehicle
}

#[tokio::test]
async fn order_round_trips_through_store() {
    let store = InMemoryEntityStore::new();
    let mut session = store.session();
    let mut order = order(PaymentMethod::Hybrid, 1);
    let policy = CommissionPolicy::default();
    order
        .assign(
            EntityId::new(),
            EntityId::new(),
            policy.revenue_share(order.payment_method, order.total),
        )
        .unwrap();

    session.create(&order).await.unwrap();
    let loaded = session.load::<Order>(order.id).await.unwrap();

    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.document, order);
    assert_eq!(loaded.status, OrderStatus::Assigning);
}

#[tokio::test]
async fn guarded_calendar_insert_rejects_duplicate() {
    let store = InMemoryEntityStore::new();
    let vehicle = seeded_vehicle(&store).await;
    let order = order(PaymentMethod::Cash, 1);
    let entry = BookingEntry::new(order.id, order.pickup_at, order.dropoff_at).unwrap();
    let mut session = store.session();

    let insert = |v: &mut Vehicle| {
        v.insert_booking(entry.clone())
            .map_err(|e| GuardViolation::new(e.to_string()))
    };

    session
        .atomic_update::<Vehicle, _>(vehicle.id, insert)
        .await
        .unwrap();
    let err = session
        .atomic_update::<Vehicle, _>(vehicle.id, insert)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::GuardRejected(_)));
    let stored = session.load::<Vehicle>(vehicle.id).await.unwrap();
    assert_eq!(stored.calendar.len(), 1);
}

#[tokio::test]
async fn concurrent_overlapping_bookings_admit_one() {
    let store = InMemoryEntityStore::new();
    let vehicle = seeded_vehicle(&store).await;
    let first = order(PaymentMethod::Cash, 1);
    let second = order(PaymentMethod::Online, 2);

    let mut handles = Vec::new();
    for order in [first, second] {
        let mut session = store.session();
        let vehicle_id = vehicle.id;
        handles.push(tokio::spawn(async move {
            let entry = BookingEntry::new(order.id, order.pickup_at, order.dropoff_at).unwrap();
            session
                .atomic_update::<Vehicle, _>(vehicle_id, |v| {
                    v.insert_booking(entry.clone())
                        .map_err(|e| GuardViolation::new(e.to_string()))
                })
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);

    let stored = store.session().load::<Vehicle>(vehicle.id).await.unwrap();
    assert_eq!(stored.calendar.len(), 1);
}

#[tokio::test]
async fn ledger_entries_found_by_order() {
    let store = InMemoryEntityStore::new();
    let mut session = store.session();
    let order_id = EntityId::new();
    let entry = LedgerEntry::new(
        EntityId::new(),
        order_id,
        domain::Direction::Credit,
        Money::from_rupees(900),
        true,
        "You will get paid by us",
    );
    session.create(&entry).await.unwrap();

    let found = session
        .find_by::<LedgerEntry, _>("order_id", &order_id)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].document, entry);

    let none = session
        .find_by::<LedgerEntry, _>("order_id", &EntityId::new())
        .await
        .unwrap();
    assert!(none.is_empty());
}
