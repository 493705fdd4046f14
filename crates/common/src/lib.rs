//! Shared types used across the ride-booking crates.

mod types;

pub use types::{EntityId, Money};
