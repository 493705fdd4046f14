//! Booking lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Order, OrderStatus, PaymentMethod, SettlementChannel, SettlementStatus};
use entity_store::EntityStore;
use saga::AssignBooking;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::payouts::LedgerEntryResponse;
use crate::error::ApiError;
use crate::extract::{CallerIdentity, parse_id};

// -- Request types --

#[derive(Deserialize)]
pub struct AssignRequest {
    pub vehicle_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub vehicle_id: Option<String>,
    pub operator_id: Option<String>,
    pub pickup_at: String,
    pub dropoff_at: String,
    pub total_paise: i64,
    pub paid_paise: i64,
    pub share: Option<ShareResponse>,
}

#[derive(Serialize)]
pub struct ShareResponse {
    pub cut_paise: i64,
    pub channel: SettlementChannel,
    pub status: Option<SettlementStatus>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            status: order.status,
            payment_method: order.payment_method,
            vehicle_id: order.vehicle_id.map(|id| id.to_string()),
            operator_id: order.operator_id.map(|id| id.to_string()),
            pickup_at: order.pickup_at.to_rfc3339(),
            dropoff_at: order.dropoff_at.to_rfc3339(),
            total_paise: order.total.paise(),
            paid_paise: order.paid.paise(),
            share: order.share.map(|share| ShareResponse {
                cut_paise: share.cut.paise(),
                channel: share.channel,
                status: share.status,
            }),
        }
    }
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub order: OrderResponse,
    pub ledger_entry: LedgerEntryResponse,
}

// -- Handlers --

/// POST /orders/:id/assign: assign a vehicle to a pending order.
#[tracing::instrument(skip(state, req))]
pub async fn assign<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let request = AssignBooking {
        order_id: parse_id(&id)?,
        vehicle_id: parse_id(&req.vehicle_id)?,
    };

    let order = state.coordinator.assign_booking(request, &caller).await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/confirm: the operator accepts an assigned booking.
#[tracing::instrument(skip(state))]
pub async fn confirm<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .coordinator
        .confirm_booking(parse_id(&id)?, &caller)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/cancel: cancel a booking that has not finished.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .coordinator
        .cancel_booking(parse_id(&id)?, &caller)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/complete: close a finished ride and record its ledger entry.
#[tracing::instrument(skip(state))]
pub async fn complete<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let (order, entry) = state
        .coordinator
        .complete_booking(parse_id(&id)?, &caller)
        .await?;
    Ok(Json(CompletionResponse {
        order: order.into(),
        ledger_entry: entry.into(),
    }))
}
