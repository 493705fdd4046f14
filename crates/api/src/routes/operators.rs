//! Operator onboarding endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use base64::prelude::*;
use domain::{BankDetails, Operator, Vehicle, VerificationDocument};
use entity_store::EntityStore;
use saga::{AssetUpload, RegisterVehicle, SubmitVerification, VerificationUpload};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;
use crate::extract::{CallerIdentity, parse_id};

// -- Request types --

/// An uploaded file with base64-encoded content.
#[derive(Deserialize)]
pub struct FileRequest {
    pub file_name: String,
    pub content_type: String,
    pub data: String,
}

impl FileRequest {
    fn decode(self) -> Result<AssetUpload, ApiError> {
        let bytes = BASE64_STANDARD.decode(self.data.as_bytes()).map_err(|e| {
            ApiError::BadRequest(format!("{} is not valid base64: {e}", self.file_name))
        })?;
        Ok(AssetUpload::new(self.file_name, self.content_type, bytes))
    }
}

#[derive(Deserialize)]
pub struct RegisterVehicleRequest {
    pub model: String,
    pub registration_number: String,
    pub capacity: u32,
    pub photos: Vec<FileRequest>,
}

#[derive(Deserialize)]
pub struct DocumentRequest {
    pub kind: String,
    #[serde(flatten)]
    pub file: FileRequest,
}

#[derive(Deserialize)]
pub struct VerificationRequest {
    pub documents: Vec<DocumentRequest>,
    pub bank_details: BankDetails,
}

// -- Response types --

#[derive(Serialize)]
pub struct VehicleResponse {
    pub id: String,
    pub owner_id: String,
    pub model: String,
    pub registration_number: String,
    pub capacity: u32,
    pub photos: Vec<String>,
}

impl From<Vehicle> for VehicleResponse {
    fn from(vehicle: Vehicle) -> Self {
        Self {
            id: vehicle.id.to_string(),
            owner_id: vehicle.owner_id.to_string(),
            model: vehicle.model,
            registration_number: vehicle.registration_number,
            capacity: vehicle.capacity,
            photos: vehicle.photos,
        }
    }
}

#[derive(Serialize)]
pub struct OperatorResponse {
    pub id: String,
    pub name: String,
    pub verified: bool,
    pub has_vehicle: bool,
    pub documents_submitted: bool,
    pub documents: Vec<VerificationDocument>,
    pub balance_paise: i64,
    pub has_bank_details: bool,
}

impl From<Operator> for OperatorResponse {
    fn from(operator: Operator) -> Self {
        Self {
            id: operator.id.to_string(),
            name: operator.name,
            verified: operator.verified,
            has_vehicle: operator.has_vehicle,
            documents_submitted: operator.documents_submitted,
            documents: operator.documents,
            balance_paise: operator.account.balance.paise(),
            has_bank_details: operator.account.bank_details.is_some(),
        }
    }
}

// -- Handlers --

/// POST /operators/:id/vehicles: register the operator's cab with its photos.
#[tracing::instrument(skip(state, req))]
pub async fn register_vehicle<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(req): Json<RegisterVehicleRequest>,
) -> Result<(axum::http::StatusCode, Json<VehicleResponse>), ApiError> {
    let request = RegisterVehicle {
        operator_id: parse_id(&id)?,
        model: req.model,
        registration_number: req.registration_number,
        capacity: req.capacity,
        photos: req
            .photos
            .into_iter()
            .map(FileRequest::decode)
            .collect::<Result<_, _>>()?,
    };

    let vehicle = state.coordinator.register_vehicle(request, &caller).await?;
    Ok((axum::http::StatusCode::CREATED, Json(vehicle.into())))
}

/// POST /operators/:id/verification: submit documents and bank details.
#[tracing::instrument(skip(state, req))]
pub async fn submit_verification<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(req): Json<VerificationRequest>,
) -> Result<Json<OperatorResponse>, ApiError> {
    let documents = req
        .documents
        .into_iter()
        .map(|doc| {
            Ok(VerificationUpload {
                kind: doc.kind,
                file: doc.file.decode()?,
            })
        })
        .collect::<Result<_, ApiError>>()?;

    let request = SubmitVerification {
        operator_id: parse_id(&id)?,
        documents,
        bank_details: req.bank_details,
    };

    let operator = state
        .coordinator
        .submit_verification(request, &caller)
        .await?;
    Ok(Json(operator.into()))
}

/// POST /operators/:id/approval: flip the operator's verified flag.
#[tracing::instrument(skip(state))]
pub async fn toggle_approval<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<OperatorResponse>, ApiError> {
    let operator = state
        .coordinator
        .toggle_approval(parse_id(&id)?, &caller)
        .await?;
    Ok(Json(operator.into()))
}
