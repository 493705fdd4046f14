//! Compensation log: the append-only record of what a saga run changed.
//!
//! Every completed step is journaled together with the compensation that
//! undoes it. The first time a step touches a document, its pre-image is
//! captured so compensators can restore fields exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use entity_store::Document;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::SagaState;

/// Kind of a completed step. Compensators are registered per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    OrderUpdated,
    CalendarUpdated,
    VehicleCreated,
    OperatorUpdated,
    DestinationRegistered,
    WalletUpdated,
    LedgerCreated,
    LedgerUpdated,
    AssetsUploaded,
    TransferExecuted,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::OrderUpdated => "ORDER_UPDATED",
            StepKind::CalendarUpdated => "CALENDAR_UPDATED",
            StepKind::VehicleCreated => "VEHICLE_CREATED",
            StepKind::OperatorUpdated => "OPERATOR_UPDATED",
            StepKind::DestinationRegistered => "DESTINATION_REGISTERED",
            StepKind::WalletUpdated => "WALLET_UPDATED",
            StepKind::LedgerCreated => "LEDGER_CREATED",
            StepKind::LedgerUpdated => "LEDGER_UPDATED",
            StepKind::AssetsUploaded => "ASSETS_UPLOADED",
            StepKind::TransferExecuted => "TRANSFER_EXECUTED",
        }
    }

    /// Steps outside the entity store. They are undone even when the
    /// store writes ran inside a transaction.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            StepKind::AssetsUploaded | StepKind::TransferExecuted
        )
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How to undo one completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    /// Put back the order's status, vehicle, operator, share and paid amount.
    RestoreOrder { order_id: EntityId },
    /// Put back (or remove) the order's entry on the vehicle calendar.
    RestoreCalendarEntry {
        vehicle_id: EntityId,
        order_id: EntityId,
    },
    DeleteVehicle { vehicle_id: EntityId },
    /// Put back verification state, vehicle flag and bank details.
    RestoreOperator { operator_id: EntityId },
    /// Detach a newly stored payout destination unless `keep` is set.
    RemoveDestination {
        operator_id: EntityId,
        destination_id: String,
        keep: bool,
    },
    /// Add `delta` back to the wallet balance.
    AdjustWallet { operator_id: EntityId, delta: Money },
    DeleteLedgerEntry { entry_id: EntityId },
    RestoreLedgerEntry { entry_id: EntityId },
    DeleteAssets { keys: Vec<String> },
    /// Money left the platform. Cannot be undone here.
    Irreversible { transfer_id: String, amount: Money },
}

impl Compensation {
    pub fn kind(&self) -> StepKind {
        match self {
            Compensation::RestoreOrder { .. } => StepKind::OrderUpdated,
            Compensation::RestoreCalendarEntry { .. } => StepKind::CalendarUpdated,
            Compensation::DeleteVehicle { .. } => StepKind::VehicleCreated,
            Compensation::RestoreOperator { .. } => StepKind::OperatorUpdated,
            Compensation::RemoveDestination { .. } => StepKind::DestinationRegistered,
            Compensation::AdjustWallet { .. } => StepKind::WalletUpdated,
            Compensation::DeleteLedgerEntry { .. } => StepKind::LedgerCreated,
            Compensation::RestoreLedgerEntry { .. } => StepKind::LedgerUpdated,
            Compensation::DeleteAssets { .. } => StepKind::AssetsUploaded,
            Compensation::Irreversible { .. } => StepKind::TransferExecuted,
        }
    }
}

/// A step that finished and how to undo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub kind: StepKind,
    pub compensation: Compensation,
    pub completed_at: DateTime<Utc>,
}

/// Key under which a document's pre-image is stored.
pub fn entity_key(collection: &str, id: EntityId) -> String {
    format!("{collection}/{id}")
}

/// Completed steps in execution order plus the pre-images they captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub originals: BTreeMap<String, serde_json::Value>,
    pub steps: Vec<CompletedStep>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Stores the pre-image of `document` unless one is already held.
    pub fn capture<D: Document>(&mut self, document: &D) -> Result<()> {
        let key = entity_key(D::COLLECTION, document.id());
        if !self.originals.contains_key(&key) {
            self.originals.insert(key, serde_json::to_value(document)?);
        }
        Ok(())
    }

    /// The captured pre-image of a document, if any.
    pub fn original<D: Document>(&self, id: EntityId) -> Result<Option<D>> {
        self.originals
            .get(&entity_key(D::COLLECTION, id))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.steps.push(CompletedStep {
            kind: compensation.kind(),
            compensation,
            completed_at: Utc::now(),
        });
    }

    /// Appends a committed journal. Earlier pre-images win.
    pub fn merge(&mut self, other: Journal) {
        for (key, value) in other.originals {
            self.originals.entry(key).or_insert(value);
        }
        self.steps.extend(other.steps);
    }
}

/// Result of running one compensator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CompensationOutcome {
    Compensated,
    /// Nothing to undo, or deliberately left in place.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub kind: StepKind,
    pub outcome: CompensationOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// One persisted snapshot of a saga run.
///
/// Records are only ever inserted. A failed run writes one record when
/// rollback starts and another once it has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationLog {
    pub id: EntityId,
    pub saga_id: EntityId,
    pub saga_type: String,
    pub status: SagaState,
    #[serde(flatten)]
    pub journal: Journal,
    pub compensations: Vec<CompensationRecord>,
    pub error: Option<String>,
    pub funds_moved: bool,
    pub started_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl Document for CompensationLog {
    const COLLECTION: &'static str = "compensation_logs";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl CompensationLog {
    pub fn new(saga_id: EntityId, saga_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            saga_id,
            saga_type: saga_type.into(),
            status: SagaState::Running,
            journal: Journal::new(),
            compensations: Vec::new(),
            error: None,
            funds_moved: false,
            started_at: now,
            recorded_at: now,
        }
    }

    /// A copy with a fresh record id, ready to be inserted.
    pub fn snapshot(&self) -> Self {
        Self {
            id: EntityId::new(),
            recorded_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn failed_compensations(&self) -> usize {
        self.compensations
            .iter()
            .filter(|r| matches!(r.outcome, CompensationOutcome::Failed(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use domain::{Order, PaymentMethod};

    use super::*;

    fn order() -> Order {
        let pickup = Utc::now();
        Order::new(
            EntityId::new(),
            PaymentMethod::Cash,
            Money::from_rupees(100),
            pickup,
            pickup + chrono::Duration::hours(1),
        )
        .unwrap()
    }

    #[test]
    fn compensation_kind_drives_step_kind() {
        let id = EntityId::new();
        assert_eq!(
            Compensation::RestoreOrder { order_id: id }.kind(),
            StepKind::OrderUpdated
        );
        assert_eq!(
            Compensation::DeleteAssets { keys: vec![] }.kind(),
            StepKind::AssetsUploaded
        );
        assert!(StepKind::TransferExecuted.is_external());
        assert!(!StepKind::WalletUpdated.is_external());
    }

    #[test]
    fn capture_keeps_first_pre_image() {
        let mut journal = Journal::new();
        let mut order = order();
        journal.capture(&order).unwrap();

        order.total = Money::from_rupees(5);
        journal.capture(&order).unwrap();

        let original: Order = journal.original(order.id).unwrap().unwrap();
        assert_eq!(original.total, Money::from_rupees(100));
    }

    #[test]
    fn merge_appends_steps_and_keeps_existing_originals() {
        let order = order();
        let mut first = Journal::new();
        first.capture(&order).unwrap();
        first.record(Compensation::RestoreOrder { order_id: order.id });

        let mut changed = order.clone();
        changed.total = Money::from_rupees(1);
        let mut second = Journal::new();
        second.capture(&changed).unwrap();
        second.record(Compensation::DeleteLedgerEntry {
            entry_id: EntityId::new(),
        });

        first.merge(second);

        assert_eq!(first.steps.len(), 2);
        let original: Order = first.original(order.id).unwrap().unwrap();
        assert_eq!(original.total, Money::from_rupees(100));
    }

    #[test]
    fn log_serializes_with_flattened_journal() {
        let mut log = CompensationLog::new(EntityId::new(), "PAYOUT");
        log.journal.record(Compensation::Irreversible {
            transfer_id: "pout_1".into(),
            amount: Money::from_rupees(900),
        });
        log.status = SagaState::RollbackPartial;

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["status"], "ROLLBACK_PARTIAL");
        assert_eq!(json["steps"][0]["kind"], "TRANSFER_EXECUTED");
        assert_eq!(json["steps"][0]["compensation"]["action"], "irreversible");

        let back: CompensationLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn snapshot_gets_new_record_id() {
        let log = CompensationLog::new(EntityId::new(), "BOOKING_ASSIGNMENT");
        let snap = log.snapshot();
        assert_ne!(snap.id, log.id);
        assert_eq!(snap.saga_id, log.saga_id);
    }
}
