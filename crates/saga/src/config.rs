//! Saga configuration.

use common::Money;
use domain::CommissionPolicy;
use entity_store::TransactionOptions;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// What a completed payout does to the operator's wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceEffect {
    /// The balance tracks money still owed, so paying it out reduces it.
    #[default]
    Debit,
    /// The balance tracks lifetime earnings paid out.
    Credit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPolicy {
    pub balance_effect: BalanceEffect,
    /// Transfer rail requested from the gateway.
    pub transfer_mode: String,
    /// Largest single payout accepted.
    pub max_amount: Money,
    /// Keep a gateway-validated destination when a later step fails.
    pub keep_validated_destination: bool,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            balance_effect: BalanceEffect::Debit,
            transfer_mode: "NEFT".to_string(),
            max_amount: Money::from_rupees(1_000_000),
            keep_validated_destination: true,
        }
    }
}

/// How internal mutations are made atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Use store transactions when the store supports them, otherwise
    /// journaled autocommit writes.
    #[default]
    Auto,
    /// Always use journaled autocommit writes with compensation.
    Manual,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "transactional" => Ok(ExecutionMode::Auto),
            "manual" => Ok(ExecutionMode::Manual),
            other => Err(format!("unknown saga mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub commission: CommissionPolicy,
    pub payout: PayoutPolicy,
    pub retry: RetryPolicy,
    pub transaction: TransactionOptions,
    pub mode: ExecutionMode,
    /// Write compensation logs to the store.
    pub persist_logs: bool,
}

impl SagaConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            commission: CommissionPolicy::default(),
            payout: PayoutPolicy::default(),
            retry: RetryPolicy::default(),
            transaction: TransactionOptions::default(),
            mode: ExecutionMode::Auto,
            persist_logs: true,
        }
    }
}
