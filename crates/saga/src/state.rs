//! Saga run status.

use serde::{Deserialize, Serialize};

/// The status of a saga run as recorded in its compensation log.
///
/// State transitions:
/// ```text
/// Running ──┬──► Completed
///           ├──► Failed            (nothing to undo)
///           └──► RollingBack ──┬──► RolledBack
///                              └──► RollbackPartial
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Steps are being executed.
    #[default]
    Running,

    /// Every step succeeded (terminal state).
    Completed,

    /// A step failed before anything was applied (terminal state).
    Failed,

    /// A step failed and compensations are in progress.
    RollingBack,

    /// Every compensation succeeded (terminal state).
    RolledBack,

    /// At least one compensation failed (terminal state).
    RollbackPartial,
}

impl SagaState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Running => "RUNNING",
            SagaState::Completed => "COMPLETED",
            SagaState::Failed => "FAILED",
            SagaState::RollingBack => "ROLLING_BACK",
            SagaState::RolledBack => "ROLLED_BACK",
            SagaState::RollbackPartial => "ROLLBACK_PARTIAL",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
