//! Shared harness for the saga integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{EntityId, Money};
use domain::{BankDetails, LedgerEntry, Operator, Order, PaymentMethod, Vehicle};
use entity_store::{Document, DocumentOpsExt, EntityStore, InMemoryEntityStore};
use saga::{
    AssignBooking, Caller, CompensationLog, CompensatorRegistry, ExecutionMode,
    InMemoryAssetStore, InMemoryNotifier, InMemoryPaymentGateway, RetryPolicy, SagaConfig,
    SagaCoordinator,
};

#[ctor::ctor]
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn bank() -> BankDetails {
    BankDetails {
        account_holder_name: "Ravi Kumar".into(),
        account_number: "001234567890".into(),
        ifsc: "SBIN0004567".into(),
        bank_name: "State Bank".into(),
    }
}

pub fn fast_config(mode: ExecutionMode) -> SagaConfig {
    let mut config = SagaConfig::new();
    config.mode = mode;
    config.retry = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };
    config
}

/// Test harness holding the coordinator and handles to every fake.
pub struct TestHarness {
    pub store: InMemoryEntityStore,
    pub gateway: InMemoryPaymentGateway,
    pub notifier: InMemoryNotifier,
    pub assets: InMemoryAssetStore,
    pub coordinator: SagaCoordinator<InMemoryEntityStore>,
    pub admin: Caller,
}

impl TestHarness {
    /// Transactional harness.
    pub fn new() -> Self {
        Self::with_config(fast_config(ExecutionMode::Auto))
    }

    /// Harness that commits each write on its own and compensates.
    pub fn manual() -> Self {
        Self::with_config(fast_config(ExecutionMode::Manual))
    }

    pub fn with_config(config: SagaConfig) -> Self {
        let store =
            InMemoryEntityStore::new().with_unique_field(LedgerEntry::COLLECTION, "order_id");
        let gateway = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();
        let assets = InMemoryAssetStore::new();
        let coordinator = SagaCoordinator::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            Arc::new(assets.clone()),
            config,
        );

        Self {
            store,
            gateway,
            notifier,
            assets,
            coordinator,
            admin: Caller::admin(EntityId::new()),
        }
    }

    /// Swaps in a custom compensator registry.
    pub fn with_registry(mut self, registry: CompensatorRegistry) -> Self {
        self.coordinator = self.coordinator.with_registry(registry);
        self
    }

    pub async fn seed<D: Document>(&self, document: &D) {
        self.store.session().create(document).await.unwrap();
    }

    pub async fn get<D: Document>(&self, id: EntityId) -> D {
        self.store.session().load::<D>(id).await.unwrap().into_inner()
    }

    pub async fn exists<D: Document>(&self, id: EntityId) -> bool {
        self.store.session().find::<D>(id).await.unwrap().is_some()
    }

    /// Verified operator with complete bank details and a vehicle.
    pub async fn operator(&self) -> Operator {
        let mut operator = Operator::new("Ravi Kumar", "ravi@example.com", "9876543210");
        operator.verified = true;
        operator.has_vehicle = true;
        operator.account.bank_details = Some(bank());
        self.seed(&operator).await;
        operator
    }

    pub async fn unverified_operator(&self) -> Operator {
        let operator = Operator::new("Meera Nair", "meera@example.com", "9123456780");
        self.seed(&operator).await;
        operator
    }

    pub async fn vehicle(&self, owner: &Operator) -> Vehicle {
        let vehicle = Vehicle::new(owner.id, "Innova", "KA05MN4321", 6, Vec::new()).unwrap();
        self.seed(&vehicle).await;
        vehicle
    }

    /// Pending order whose ride starts `starts_in_hours` from now and lasts two hours.
    pub async fn order(&self, method: PaymentMethod, rupees: i64, starts_in_hours: i64) -> Order {
        let pickup = Utc::now() + ChronoDuration::hours(starts_in_hours);
        let order = Order::new(
            EntityId::new(),
            method,
            Money::from_rupees(rupees),
            pickup,
            pickup + ChronoDuration::hours(2),
        )
        .unwrap();
        self.seed(&order).await;
        order
    }

    /// Order assigned to `vehicle` whose ride has already ended.
    pub async fn finished_ride(
        &self,
        vehicle: &Vehicle,
        method: PaymentMethod,
        rupees: i64,
    ) -> Order {
        let order = self.order(method, rupees, -5).await;
        self.coordinator
            .assign_booking(
                AssignBooking {
                    order_id: order.id,
                    vehicle_id: vehicle.id,
                },
                &self.admin,
            )
            .await
            .unwrap()
    }

    pub async fn logs_for(&self, saga_id: EntityId) -> Vec<CompensationLog> {
        self.coordinator.compensation_logs(saga_id).await.unwrap()
    }
}
