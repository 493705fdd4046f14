//! HTTP API server for the ride-booking saga engine.
//!
//! Exposes each saga as a REST endpoint, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use entity_store::EntityStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    AssetStore, InMemoryAssetStore, InMemoryPaymentGateway, Notifier, PaymentGateway, SagaConfig,
    SagaCoordinator, TracingNotifier,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EntityStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders/{id}/assign", post(routes::orders::assign::<S>))
        .route("/orders/{id}/confirm", post(routes::orders::confirm::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/complete", post(routes::orders::complete::<S>))
        .route("/payouts", post(routes::payouts::create::<S>))
        .route("/payouts/{id}/reverse", post(routes::payouts::reverse::<S>))
        .route(
            "/operators/{id}/vehicles",
            post(routes::operators::register_vehicle::<S>),
        )
        .route(
            "/operators/{id}/verification",
            post(routes::operators::submit_verification::<S>),
        )
        .route(
            "/operators/{id}/approval",
            post(routes::operators::toggle_approval::<S>),
        )
        .route("/sagas/{id}/logs", get(routes::sagas::logs::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state from explicit collaborators.
pub fn create_state<S: EntityStore>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    assets: Arc<dyn AssetStore>,
    config: SagaConfig,
) -> Arc<AppState<S>> {
    let coordinator = SagaCoordinator::new(store, gateway, notifier, assets, config);
    Arc::new(AppState { coordinator })
}

/// Creates the default application state with in-memory collaborators.
pub fn create_default_state<S: EntityStore>(store: S) -> Arc<AppState<S>> {
    create_state(
        store,
        Arc::new(InMemoryPaymentGateway::new()),
        Arc::new(TracingNotifier),
        Arc::new(InMemoryAssetStore::new()),
        SagaConfig::new(),
    )
}
