//! Operators (drivers), their wallet and verification state.

use chrono::{DateTime, Utc};
use common::{EntityId, Money};
use entity_store::Document;
use serde::{Deserialize, Serialize};

use crate::{DomainError, Result};

/// Bank account an operator is paid out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_holder_name: String,
    pub account_number: String,
    pub ifsc: String,
    pub bank_name: String,
}

impl BankDetails {
    /// Checks every field is present and well formed.
    pub fn validate(&self) -> Result<()> {
        if self.account_holder_name.trim().is_empty() {
            return Err(DomainError::InvalidBankDetails(
                "account holder name is required".to_string(),
            ));
        }
        if self.bank_name.trim().is_empty() {
            return Err(DomainError::InvalidBankDetails(
                "bank name is required".to_string(),
            ));
        }
        if self.account_number.is_empty() || !self.account_number.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DomainError::InvalidBankDetails(
                "account number must contain digits only".to_string(),
            ));
        }
        if !is_valid_ifsc(&self.ifsc) {
            return Err(DomainError::InvalidBankDetails(format!(
                "IFSC code {} is malformed",
                self.ifsc
            )));
        }
        Ok(())
    }

    /// Holder, number and IFSC are all filled in.
    pub fn is_complete(&self) -> bool {
        !self.account_holder_name.trim().is_empty()
            && !self.account_number.trim().is_empty()
            && !self.ifsc.trim().is_empty()
    }
}

/// Four letters followed by seven digits.
fn is_valid_ifsc(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_alphabetic)
        && bytes[4..].iter().all(u8::is_ascii_digit)
}

/// The operator's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    pub balance: Money,
    /// Gateway destination, recorded only once the gateway validated it.
    pub destination_id: Option<String>,
    pub bank_details: Option<BankDetails>,
}

impl Account {
    pub fn credit(&mut self, amount: Money) {
        self.balance += amount;
    }

    /// Debits the balance. The balance never goes below zero.
    pub fn debit(&mut self, amount: Money) -> Result<()> {
        if self.balance < amount {
            return Err(DomainError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

/// A document submitted for driver verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationDocument {
    pub kind: String,
    pub asset_key: String,
    pub content_type: String,
}

/// A driver who owns vehicles and receives payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub verified: bool,
    pub has_vehicle: bool,
    pub documents: Vec<VerificationDocument>,
    pub documents_submitted: bool,
    pub account: Account,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Operator {
    const COLLECTION: &'static str = "operators";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Operator {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            verified: false,
            has_vehicle: false,
            documents: Vec::new(),
            documents_submitted: false,
            account: Account::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records that the operator now owns a vehicle.
    pub fn register_vehicle(&mut self) -> Result<()> {
        if self.has_vehicle {
            return Err(DomainError::VehicleAlreadyRegistered(self.id));
        }
        self.has_vehicle = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attaches verification documents and bank details.
    pub fn submit_documents(
        &mut self,
        documents: Vec<VerificationDocument>,
        bank_details: BankDetails,
    ) -> Result<()> {
        if documents.is_empty() {
            return Err(DomainError::InvalidValue {
                field: "documents",
                reason: "at least one document is required".to_string(),
            });
        }
        bank_details.validate()?;

        self.documents.extend(documents);
        self.account.bank_details = Some(bank_details);
        self.documents_submitted = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Flips the verified flag. Requires a vehicle and submitted documents.
    pub fn toggle_verified(&mut self) -> Result<bool> {
        if !self.has_vehicle {
            return Err(DomainError::VerificationNotAllowed {
                operator_id: self.id,
                reason: "no registered vehicle",
            });
        }
        if self.documents.is_empty() {
            return Err(DomainError::VerificationNotAllowed {
                operator_id: self.id,
                reason: "no verification documents",
            });
        }
        self.verified = !self.verified;
        self.updated_at = Utc::now();
        Ok(self.verified)
    }

    /// Bank details usable for a payout.
    pub fn payout_details(&self) -> Option<&BankDetails> {
        self.account
            .bank_details
            .as_ref()
            .filter(|details| details.is_complete())
    }
}
