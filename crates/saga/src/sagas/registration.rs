//! Cab registration saga.

use async_trait::async_trait;
use common::EntityId;
use domain::{Operator, Vehicle};
use entity_store::EntityStore;
use serde_json::json;

use crate::caller::Caller;
use crate::coordinator::SagaCoordinator;
use crate::error::{Result, SagaError};
use crate::executor::SagaRun;
use crate::log::Compensation;
use crate::outcome::SagaOutcome;
use crate::services::assets::{AssetRules, AssetUpload, upload_all};
use crate::writer::{SagaWriter, UnitOfWork};

pub const CAB_REGISTRATION: &str = "CAB_REGISTRATION";

#[derive(Debug, Clone)]
pub struct RegisterVehicle {
    pub operator_id: EntityId,
    pub model: String,
    pub registration_number: String,
    pub capacity: u32,
    pub photos: Vec<AssetUpload>,
}

struct Register {
    vehicle: Vehicle,
}

#[async_trait]
impl UnitOfWork for Register {
    type Output = Vehicle;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Vehicle> {
        writer
            .create(
                Compensation::DeleteVehicle {
                    vehicle_id: self.vehicle.id,
                },
                &self.vehicle,
            )
            .await?;

        let operator_id = self.vehicle.owner_id;
        writer
            .update(
                Compensation::RestoreOperator { operator_id },
                operator_id,
                |operator: &mut Operator| operator.register_vehicle(),
            )
            .await?;

        Ok(self.vehicle.clone())
    }
}

impl<S: EntityStore> SagaCoordinator<S> {
    /// Uploads vehicle photos, stores the vehicle and flags its owner.
    ///
    /// Photos are removed again if storing fails.
    #[tracing::instrument(
        skip(self, request, caller),
        fields(saga_type = CAB_REGISTRATION, operator_id = %request.operator_id)
    )]
    pub async fn register_vehicle(
        &self,
        request: RegisterVehicle,
        caller: &Caller,
    ) -> SagaOutcome<Vehicle> {
        let mut run = self.executor.begin(CAB_REGISTRATION);
        let result = self.run_registration(&mut run, request, caller).await;
        run.finish(result).await
    }

    async fn run_registration(
        &self,
        run: &mut SagaRun<'_, S>,
        request: RegisterVehicle,
        caller: &Caller,
    ) -> Result<Vehicle> {
        caller.require_self_or_admin(request.operator_id)?;

        let operator: Operator = self.read(request.operator_id).await?;
        if operator.has_vehicle {
            return Err(SagaError::Conflict(format!(
                "operator {} already has a vehicle",
                operator.id
            )));
        }
        if request.photos.is_empty() {
            return Err(SagaError::Validation("at least one photo is required".into()));
        }
        let rules = AssetRules::images();
        for photo in &request.photos {
            rules.check(photo)?;
        }
        let mut vehicle = Vehicle::new(
            operator.id,
            request.model,
            request.registration_number,
            request.capacity,
            Vec::new(),
        )?;

        let prefix = format!("vehicles/{}", operator.id);
        let keys = upload_all(self.assets.as_ref(), &prefix, &request.photos).await?;
        run.record_external(Compensation::DeleteAssets { keys: keys.clone() });
        vehicle.photos = keys;

        let vehicle = run.apply(&Register { vehicle }).await?;

        self.notify(
            operator.id,
            "vehicle_registered",
            json!({ "vehicle_id": vehicle.id, "registration_number": vehicle.registration_number }),
        )
        .await;
        Ok(vehicle)
    }
}
