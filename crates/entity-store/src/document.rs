use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{EntityId, Result};

/// A typed entity persisted as a JSON document.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection the document lives in.
    const COLLECTION: &'static str;

    /// Identity of the document within its collection.
    fn id(&self) -> EntityId;
}

/// Version number of a stored document, used for optimistic concurrency.
///
/// A freshly inserted document is at version 1 and every write
/// increments the version by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a document that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version of a freshly inserted document.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A document as the backends see it: untyped body plus version.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: EntityId,
    pub version: Version,
    pub body: serde_json::Value,
}

impl RawDocument {
    /// Deserializes the body into a typed document.
    pub fn decode<D: Document>(self) -> Result<Versioned<D>> {
        Ok(Versioned {
            version: self.version,
            document: serde_json::from_value(self.body)?,
        })
    }
}

/// A typed document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<D> {
    pub version: Version,
    pub document: D,
}

impl<D> Versioned<D> {
    pub fn into_inner(self) -> D {
        self.document
    }
}

impl<D> std::ops::Deref for Versioned<D> {
    type Target = D;

    fn deref(&self) -> &Self::Target {
        &self.document
    }
}
