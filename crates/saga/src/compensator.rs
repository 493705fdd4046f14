//! Compensators undo completed saga steps.
//!
//! One compensator is registered per [`StepKind`]. Every saga shares the
//! same registry, so adding a workflow never means writing a new rollback
//! routine for a step kind that already exists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::EntityId;
use domain::{LedgerEntry, Operator, Order, Vehicle};
use entity_store::{Document, DocumentOps, DocumentOpsExt};

use crate::error::{Result, SagaError};
use crate::log::{Compensation, CompensationOutcome, Journal, StepKind};
use crate::services::assets::{AssetStore, delete_all};

/// What a compensator gets to work with.
pub struct CompensationContext<'a> {
    /// Autocommit handle. Compensations are never batched.
    pub ops: &'a mut (dyn DocumentOps + 'a),
    pub journal: &'a Journal,
    pub assets: &'a dyn AssetStore,
}

impl CompensationContext<'_> {
    fn original<D: Document>(&self, id: EntityId, step: StepKind) -> Result<D> {
        self.journal
            .original::<D>(id)?
            .ok_or_else(|| SagaError::CompensationFailed {
                step: step.to_string(),
                reason: format!("no pre-image for {} {id}", D::COLLECTION),
            })
    }
}

/// Undoes one kind of step.
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome>;
}

fn mismatched(kind: StepKind, step: &Compensation) -> SagaError {
    SagaError::CompensationFailed {
        step: kind.to_string(),
        reason: format!("cannot undo {} step", step.kind()),
    }
}

/// Restores order status, vehicle, operator, share and paid amount.
pub struct RestoreOrder;

#[async_trait]
impl Compensator for RestoreOrder {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::RestoreOrder { order_id } = step else {
            return Err(mismatched(StepKind::OrderUpdated, step));
        };
        let original: Order = ctx.original(*order_id, StepKind::OrderUpdated)?;

        ctx.ops
            .atomic_update::<Order, _>(*order_id, |order| {
                order.status = original.status;
                order.vehicle_id = original.vehicle_id;
                order.operator_id = original.operator_id;
                order.share = original.share.clone();
                order.paid = original.paid;
                order.updated_at = original.updated_at;
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

/// Puts the order's calendar entry back as it was, or removes it if the
/// step added it.
pub struct RestoreCalendarEntry;

#[async_trait]
impl Compensator for RestoreCalendarEntry {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::RestoreCalendarEntry {
            vehicle_id,
            order_id,
        } = step
        else {
            return Err(mismatched(StepKind::CalendarUpdated, step));
        };
        let original: Vehicle = ctx.original(*vehicle_id, StepKind::CalendarUpdated)?;
        let entry = original.booking(*order_id).cloned();

        ctx.ops
            .atomic_update::<Vehicle, _>(*vehicle_id, |vehicle| {
                match &entry {
                    Some(entry) => vehicle.restore_entry(entry.clone()),
                    None => {
                        vehicle.remove_booking(*order_id);
                    }
                }
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

pub struct DeleteVehicle;

#[async_trait]
impl Compensator for DeleteVehicle {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::DeleteVehicle { vehicle_id } = step else {
            return Err(mismatched(StepKind::VehicleCreated, step));
        };
        if ctx.ops.delete::<Vehicle>(*vehicle_id).await? {
            Ok(CompensationOutcome::Compensated)
        } else {
            Ok(CompensationOutcome::Skipped("vehicle already removed".into()))
        }
    }
}

/// Restores verification state, vehicle flag, documents and bank details.
///
/// Balance and payout destination belong to their own steps.
pub struct RestoreOperator;

#[async_trait]
impl Compensator for RestoreOperator {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::RestoreOperator { operator_id } = step else {
            return Err(mismatched(StepKind::OperatorUpdated, step));
        };
        let original: Operator = ctx.original(*operator_id, StepKind::OperatorUpdated)?;

        ctx.ops
            .atomic_update::<Operator, _>(*operator_id, |operator| {
                operator.verified = original.verified;
                operator.has_vehicle = original.has_vehicle;
                operator.documents = original.documents.clone();
                operator.documents_submitted = original.documents_submitted;
                operator.account.bank_details = original.account.bank_details.clone();
                operator.updated_at = original.updated_at;
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

/// Detaches a payout destination stored by the saga.
///
/// A destination that passed gateway validation is kept when `keep` is set,
/// so a retried payout skips registration.
pub struct RemoveDestination;

#[async_trait]
impl Compensator for RemoveDestination {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::RemoveDestination {
            operator_id,
            destination_id,
            keep,
        } = step
        else {
            return Err(mismatched(StepKind::DestinationRegistered, step));
        };
        if *keep {
            return Ok(CompensationOutcome::Skipped(
                "validated destination kept".into(),
            ));
        }

        ctx.ops
            .atomic_update::<Operator, _>(*operator_id, |operator| {
                if operator.account.destination_id.as_deref() == Some(destination_id.as_str()) {
                    operator.account.destination_id = None;
                }
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

pub struct AdjustWallet;

#[async_trait]
impl Compensator for AdjustWallet {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::AdjustWallet { operator_id, delta } = step else {
            return Err(mismatched(StepKind::WalletUpdated, step));
        };
        let delta = *delta;

        ctx.ops
            .atomic_update::<Operator, _>(*operator_id, |operator| {
                operator.account.balance += delta;
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

pub struct DeleteLedgerEntry;

#[async_trait]
impl Compensator for DeleteLedgerEntry {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::DeleteLedgerEntry { entry_id } = step else {
            return Err(mismatched(StepKind::LedgerCreated, step));
        };
        if ctx.ops.delete::<LedgerEntry>(*entry_id).await? {
            Ok(CompensationOutcome::Compensated)
        } else {
            Ok(CompensationOutcome::Skipped("ledger entry already removed".into()))
        }
    }
}

pub struct RestoreLedgerEntry;

#[async_trait]
impl Compensator for RestoreLedgerEntry {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::RestoreLedgerEntry { entry_id } = step else {
            return Err(mismatched(StepKind::LedgerUpdated, step));
        };
        let original: LedgerEntry = ctx.original(*entry_id, StepKind::LedgerUpdated)?;

        ctx.ops
            .atomic_update::<LedgerEntry, _>(*entry_id, |entry| {
                *entry = original.clone();
                Ok(())
            })
            .await?;
        Ok(CompensationOutcome::Compensated)
    }
}

pub struct DeleteAssets;

#[async_trait]
impl Compensator for DeleteAssets {
    async fn compensate(
        &self,
        step: &Compensation,
        ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::DeleteAssets { keys } = step else {
            return Err(mismatched(StepKind::AssetsUploaded, step));
        };
        delete_all(ctx.assets, keys).await?;
        Ok(CompensationOutcome::Compensated)
    }
}

/// Transfers cannot be pulled back. The divergence is logged for manual
/// reconciliation.
pub struct FlagTransfer;

#[async_trait]
impl Compensator for FlagTransfer {
    async fn compensate(
        &self,
        step: &Compensation,
        _ctx: &mut CompensationContext<'_>,
    ) -> Result<CompensationOutcome> {
        let Compensation::Irreversible {
            transfer_id,
            amount,
        } = step
        else {
            return Err(mismatched(StepKind::TransferExecuted, step));
        };
        tracing::error!(
            %transfer_id,
            %amount,
            "transfer_not_reversible: reconcile manually"
        );
        Ok(CompensationOutcome::Skipped(format!(
            "transfer {transfer_id} cannot be reversed"
        )))
    }
}

/// Compensators keyed by step kind.
#[derive(Clone, Default)]
pub struct CompensatorRegistry {
    compensators: HashMap<StepKind, Arc<dyn Compensator>>,
}

impl CompensatorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry covering every built-in step kind.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register(StepKind::OrderUpdated, Arc::new(RestoreOrder))
            .register(StepKind::CalendarUpdated, Arc::new(RestoreCalendarEntry))
            .register(StepKind::VehicleCreated, Arc::new(DeleteVehicle))
            .register(StepKind::OperatorUpdated, Arc::new(RestoreOperator))
            .register(StepKind::DestinationRegistered, Arc::new(RemoveDestination))
            .register(StepKind::WalletUpdated, Arc::new(AdjustWallet))
            .register(StepKind::LedgerCreated, Arc::new(DeleteLedgerEntry))
            .register(StepKind::LedgerUpdated, Arc::new(RestoreLedgerEntry))
            .register(StepKind::AssetsUploaded, Arc::new(DeleteAssets))
            .register(StepKind::TransferExecuted, Arc::new(FlagTransfer));
        registry
    }

    /// Registers or replaces the compensator for `kind`.
    pub fn register(&mut self, kind: StepKind, compensator: Arc<dyn Compensator>) -> &mut Self {
        self.compensators.insert(kind, compensator);
        self
    }

    pub fn get(&self, kind: StepKind) -> Option<&Arc<dyn Compensator>> {
        self.compensators.get(&kind)
    }
}

impl std::fmt::Debug for CompensatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.compensators.keys().collect();
        kinds.sort();
        f.debug_struct("CompensatorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
