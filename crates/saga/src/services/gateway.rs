//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::Money;
use domain::BankDetails;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Validation statuses that make a destination usable for transfers.
pub const VALID_DESTINATION_STATUSES: [&str; 2] = ["created", "completed"];

/// Returns true if a destination validation status allows transfers.
pub fn destination_is_valid(status: &str) -> bool {
    VALID_DESTINATION_STATUSES.contains(&status)
}

/// The person a payout destination belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayeeProfile {
    /// Our id for the payee, echoed back by the gateway.
    pub reference_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub destination_id: String,
    pub amount: Money,
    pub mode: String,
    /// Idempotency key. Repeating a reference never moves money twice.
    pub reference: String,
}

/// Result of a transfer accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub status: String,
    pub mode: String,
}

/// Trait for payout operations against the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a payee. Returns the gateway's payee id.
    async fn register_payee(&self, payee: &PayeeProfile) -> Result<String>;

    /// Registers a bank account for a payee. Returns the destination id.
    async fn register_destination(&self, payee_id: &str, bank: &BankDetails) -> Result<String>;

    /// Runs the gateway's account check. Returns its status string.
    async fn validate_destination(&self, destination_id: &str) -> Result<String>;

    /// Moves money to a destination. Cannot be undone.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt>;
}

#[derive(Debug)]
struct InMemoryGatewayState {
    payees: HashMap<String, PayeeProfile>,
    destinations: HashMap<String, (String, BankDetails)>,
    transfers: HashMap<String, (TransferRequest, TransferReceipt)>,
    next_id: u32,
    validation_status: String,
    fail_on_register_payee: bool,
    fail_on_register_destination: bool,
    fail_on_validate: bool,
    fail_on_transfer: bool,
}

impl Default for InMemoryGatewayState {
    fn default() -> Self {
        Self {
            payees: HashMap::new(),
            destinations: HashMap::new(),
            transfers: HashMap::new(),
            next_id: 0,
            validation_status: "completed".to_string(),
            fail_on_register_payee: false,
            fail_on_register_destination: false,
            fail_on_validate: false,
            fail_on_transfer: false,
        }
    }
}

impl InMemoryGatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status returned by subsequent destination validations.
    pub fn set_validation_status(&self, status: impl Into<String>) {
        self.write().validation_status = status.into();
    }

    pub fn set_fail_on_register_payee(&self, fail: bool) {
        self.write().fail_on_register_payee = fail;
    }

    pub fn set_fail_on_register_destination(&self, fail: bool) {
        self.write().fail_on_register_destination = fail;
    }

    pub fn set_fail_on_validate(&self, fail: bool) {
        self.write().fail_on_validate = fail;
    }

    pub fn set_fail_on_transfer(&self, fail: bool) {
        self.write().fail_on_transfer = fail;
    }

    pub fn payee_count(&self) -> usize {
        self.read().payees.len()
    }

    pub fn destination_count(&self) -> usize {
        self.read().destinations.len()
    }

    /// Returns the number of distinct transfers executed.
    pub fn transfer_count(&self) -> usize {
        self.read().transfers.len()
    }

    /// Returns the sum of every transfer executed.
    pub fn total_transferred(&self) -> Money {
        self.read()
            .transfers
            .values()
            .fold(Money::zero(), |acc, (request, _)| acc + request.amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn register_payee(&self, payee: &PayeeProfile) -> Result<String> {
        let mut state = self.write();
        if state.fail_on_register_payee {
            return Err(SagaError::Gateway("payee registration rejected".to_string()));
        }

        let id = state.next_id("cont");
        state.payees.insert(id.clone(), payee.clone());
        Ok(id)
    }

    async fn register_destination(&self, payee_id: &str, bank: &BankDetails) -> Result<String> {
        let mut state = self.write();
        if state.fail_on_register_destination {
            return Err(SagaError::Gateway("bank account rejected".to_string()));
        }
        if !state.payees.contains_key(payee_id) {
            return Err(SagaError::Gateway(format!("unknown payee {payee_id}")));
        }

        let id = state.next_id("fa");
        state
            .destinations
            .insert(id.clone(), (payee_id.to_string(), bank.clone()));
        Ok(id)
    }

    async fn validate_destination(&self, destination_id: &str) -> Result<String> {
        let state = self.read();
        if state.fail_on_validate {
            return Err(SagaError::Gateway("validation service unavailable".to_string()));
        }
        if !state.destinations.contains_key(destination_id) {
            return Err(SagaError::Gateway(format!(
                "unknown destination {destination_id}"
            )));
        }
        Ok(state.validation_status.clone())
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        let mut state = self.write();
        if state.fail_on_transfer {
            return Err(SagaError::Gateway("transfer declined".to_string()));
        }
        if !state.destinations.contains_key(&request.destination_id) {
            return Err(SagaError::Gateway(format!(
                "unknown destination {}",
                request.destination_id
            )));
        }
        if let Some((_, receipt)) = state.transfers.get(&request.reference) {
            return Ok(receipt.clone());
        }

        let receipt = TransferReceipt {
            transfer_id: state.next_id("pout"),
            status: "processing".to_string(),
            mode: request.mode.clone(),
        };
        state.transfers.insert(
            request.reference.clone(),
            (request.clone(), receipt.clone()),
        );
        Ok(receipt)
    }
}
