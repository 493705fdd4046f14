//! Operator revenue share and its settlement.

use chrono::{DateTime, Utc};
use common::Money;
use serde::{Deserialize, Serialize};

/// How the operator receives (or received) their cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "mode")]
pub enum SettlementChannel {
    /// The customer pays the operator directly.
    Customer,
    /// The platform collects and pays the operator later.
    Platform,
    /// Paid out through the payment gateway using the given transfer mode.
    Transfer(String),
    /// The booking was cancelled; nothing is owed.
    Cancelled,
}

/// Terminal settlement state of a revenue share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    Paid,
    Cancelled,
}

/// The operator's share of a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueShare {
    pub cut: Money,
    pub channel: SettlementChannel,
    pub status: Option<SettlementStatus>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl RevenueShare {
    /// An unsettled share.
    pub fn new(cut: Money, channel: SettlementChannel) -> Self {
        Self {
            cut,
            channel,
            status: None,
            settled_at: None,
        }
    }

    /// The share recorded on a cancelled booking.
    pub fn cancelled(at: DateTime<Utc>) -> Self {
        Self {
            cut: Money::zero(),
            channel: SettlementChannel::Cancelled,
            status: Some(SettlementStatus::Cancelled),
            settled_at: Some(at),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == Some(SettlementStatus::Paid)
    }
}
