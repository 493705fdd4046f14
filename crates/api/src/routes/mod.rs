//! HTTP handlers, one module per resource.

pub mod health;
pub mod metrics;
pub mod operators;
pub mod orders;
pub mod payouts;
pub mod sagas;

use entity_store::EntityStore;
use saga::SagaCoordinator;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EntityStore> {
    pub coordinator: SagaCoordinator<S>,
}
