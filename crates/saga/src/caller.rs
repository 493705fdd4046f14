//! Who is running a saga.

use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Customer,
}

impl std::str::FromStr for Role {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "operator" | "driver" => Ok(Role::Operator),
            "customer" => Ok(Role::Customer),
            other => Err(SagaError::Unauthorized(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: EntityId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: EntityId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn admin(id: EntityId) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn operator(id: EntityId) -> Self {
        Self::new(id, Role::Operator)
    }

    pub fn customer(id: EntityId) -> Self {
        Self::new(id, Role::Customer)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(SagaError::Unauthorized("administrator role required".to_string()))
        }
    }

    /// Allows administrators and the caller whose id is `subject`.
    pub fn require_self_or_admin(&self, subject: EntityId) -> Result<()> {
        if self.is_admin() || self.id == subject {
            Ok(())
        } else {
            Err(SagaError::Unauthorized(format!(
                "caller {} may not act for {subject}",
                self.id
            )))
        }
    }
}
