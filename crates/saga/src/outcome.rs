//! What a saga run returns to its caller.

use common::EntityId;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::log::CompensationRecord;

/// How much of a failed run was undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStatus {
    /// Nothing had been changed.
    NotNeeded,
    /// Every completed step was compensated.
    RolledBack,
    /// At least one compensation failed.
    RollbackPartial,
}

/// A failed saga run.
///
/// `kind` and `message` describe the error that stopped the run, never a
/// later compensation error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaFailure {
    pub saga_id: EntityId,
    pub saga_type: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    pub rollback: RollbackStatus,
    /// The gateway transfer step was reached.
    pub funds_moved: bool,
    #[serde(skip)]
    pub compensations: Vec<CompensationRecord>,
}

impl SagaFailure {
    /// The only rollback detail shown to end users.
    pub fn user_message(&self) -> &'static str {
        if self.funds_moved {
            "operation failed, funds may have moved; contact support"
        } else {
            "operation failed, no charge applied"
        }
    }

    pub fn is_partial(&self) -> bool {
        self.rollback == RollbackStatus::RollbackPartial
    }
}

impl std::fmt::Display for SagaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} saga failed ({}): {}", self.saga_type, self.kind, self.message)
    }
}

impl std::error::Error for SagaFailure {}

/// `Ok` carries the saga's view of the result.
pub type SagaOutcome<T> = std::result::Result<T, SagaFailure>;
