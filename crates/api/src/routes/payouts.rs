//! Payout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::Money;
use domain::{Direction, LedgerEntry};
use entity_store::EntityStore;
use saga::{PayoutRequest, TransferReceipt};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::orders::OrderResponse;
use crate::error::ApiError;
use crate::extract::{CallerIdentity, parse_id};

#[derive(Deserialize)]
pub struct CreatePayoutRequest {
    pub ledger_entry_id: String,
    pub order_id: String,
    pub amount_paise: i64,
}

#[derive(Deserialize)]
pub struct ReverseRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct LedgerEntryResponse {
    pub id: String,
    pub operator_id: String,
    pub order_id: String,
    pub direction: Direction,
    pub amount_paise: i64,
    pub pending: bool,
    pub payout_id: Option<String>,
    pub description: String,
    pub recorded_at: String,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            operator_id: entry.operator_id.to_string(),
            order_id: entry.order_id.to_string(),
            direction: entry.direction,
            amount_paise: entry.amount.paise(),
            pending: entry.pending,
            payout_id: entry.payout_id,
            description: entry.description,
            recorded_at: entry.recorded_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PayoutResponse {
    pub ledger_entry: LedgerEntryResponse,
    pub order: OrderResponse,
    pub balance_paise: i64,
    pub transfer: TransferReceipt,
}

/// POST /payouts: pay an operator what a pending ledger entry owes them.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Json(req): Json<CreatePayoutRequest>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let request = PayoutRequest {
        ledger_entry_id: parse_id(&req.ledger_entry_id)?,
        order_id: parse_id(&req.order_id)?,
        amount: Money::from_paise(req.amount_paise),
    };

    let receipt = state.coordinator.payout(request, &caller).await?;
    Ok(Json(PayoutResponse {
        ledger_entry: receipt.entry.into(),
        order: receipt.order.into(),
        balance_paise: receipt.balance.paise(),
        transfer: receipt.transfer,
    }))
}

/// POST /payouts/:ledger_id/reverse: undo the bookkeeping of a completed payout.
///
/// The JSON body is optional and may carry a `reason`.
#[tracing::instrument(skip(state, body))]
pub async fn reverse<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(ledger_id): Path<String>,
    body: Option<Json<ReverseRequest>>,
) -> Result<Json<LedgerEntryResponse>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let entry = state
        .coordinator
        .reverse_payout(parse_id(&ledger_id)?, reason.as_deref(), &caller)
        .await?;
    Ok(Json(entry.into()))
}
