//! Ledger entries recording money owed to or paid by operators.

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use entity_store::Document;
use serde::{Deserialize, Serialize};

use crate::{DomainError, Result};

/// Direction of money relative to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Credit,
    Debit,
}

/// Money owed or paid for one order. At most one entry exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntityId,
    pub operator_id: EntityId,
    pub order_id: EntityId,
    pub direction: Direction,
    pub amount: Money,
    /// True while the platform still owes the operator a payout.
    pub pending: bool,
    pub payout_id: Option<String>,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
    /// Number of payouts reversed on this entry.
    #[serde(default)]
    pub reversals: u32,
}

impl Document for LedgerEntry {
    const COLLECTION: &'static str = "ledger_entries";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl LedgerEntry {
    pub fn new(
        operator_id: EntityId,
        order_id: EntityId,
        direction: Direction,
        amount: Money,
        pending: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            operator_id,
            order_id,
            direction,
            amount,
            pending,
            payout_id: None,
            description: description.into(),
            recorded_at: Utc::now(),
            reversals: 0,
        }
    }

    /// Gateway idempotency key for the next payout of this entry.
    ///
    /// Stable across retries of one attempt, new after every reversal.
    pub fn payout_reference(&self) -> String {
        match self.reversals {
            0 => self.order_id.to_string(),
            n => format!("{}-r{n}", self.order_id),
        }
    }

    /// Records a completed payout against a pending entry.
    pub fn settle(&mut self, payout_id: impl Into<String>, mode: &str, at: DateTime<Utc>) -> Result<()> {
        if !self.pending {
            return Err(DomainError::EntryNotPending(self.id));
        }
        self.pending = false;
        self.payout_id = Some(payout_id.into());
        self.description = format!("Payout via {mode}");
        self.recorded_at = at;
        Ok(())
    }

    /// Undoes the bookkeeping of a settled payout.
    pub fn reopen(&mut self, description: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        if self.pending {
            return Err(DomainError::EntryStillPending(self.id));
        }
        self.pending = true;
        self.payout_id = None;
        self.reversals += 1;
        self.description = description.into();
        self.recorded_at = at;
        Ok(())
    }
}
