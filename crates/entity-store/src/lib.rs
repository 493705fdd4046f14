//! Versioned document storage.
//!
//! Entities are stored as JSON documents grouped by collection. Every write
//! bumps the document's [`Version`], which gives optimistic concurrency both
//! for single guarded updates and for multi-document transactions.

pub mod document;
pub mod error;
pub mod memory;
pub mod options;
pub mod postgres;
pub mod store;

pub use common::EntityId;
pub use document::{Document, RawDocument, Version, Versioned};
pub use error::{GuardViolation, Result, StoreError};
pub use memory::InMemoryEntityStore;
pub use options::{ReadConcern, TransactionOptions, WriteConcern};
pub use postgres::PostgresEntityStore;
pub use store::{DocumentOps, DocumentOpsExt, EntityStore, StoreTransaction};
