//! Vehicles and their booking calendars.

use chrono::{DateTime, Utc};
use common::EntityId;
use entity_store::Document;
use serde::{Deserialize, Serialize};

use crate::{DomainError, Result};

/// One booking held on a vehicle's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEntry {
    pub order_id: EntityId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub accepted: bool,
}

impl BookingEntry {
    pub fn new(order_id: EntityId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(DomainError::InvalidWindow);
        }
        Ok(Self {
            order_id,
            start,
            end,
            accepted: false,
        })
    }

    /// Half-open interval overlap.
    pub fn overlaps(&self, other: &BookingEntry) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A vehicle registered by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: EntityId,
    pub owner_id: EntityId,
    pub model: String,
    pub registration_number: String,
    pub capacity: u32,
    pub photos: Vec<String>,
    /// Bookings ordered by start time. Never lists an order twice.
    pub calendar: Vec<BookingEntry>,
    pub created_at: DateTime<Utc>,
}

impl Document for Vehicle {
    const COLLECTION: &'static str = "vehicles";

    fn id(&self) -> EntityId {
        self.id
    }
}

impl Vehicle {
    pub fn new(
        owner_id: EntityId,
        model: impl Into<String>,
        registration_number: impl Into<String>,
        capacity: u32,
        photos: Vec<String>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(DomainError::InvalidValue {
                field: "capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        let registration_number = registration_number.into();
        if registration_number.trim().is_empty() {
            return Err(DomainError::InvalidValue {
                field: "registration number",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            id: EntityId::new(),
            owner_id,
            model: model.into(),
            registration_number,
            capacity,
            photos,
            calendar: Vec::new(),
            created_at: Utc::now(),
        })
    }

    pub fn has_booking(&self, order_id: EntityId) -> bool {
        self.calendar.iter().any(|e| e.order_id == order_id)
    }

    pub fn booking(&self, order_id: EntityId) -> Option<&BookingEntry> {
        self.calendar.iter().find(|e| e.order_id == order_id)
    }

    /// Adds a booking to the calendar.
    ///
    /// Rejects a second entry for the same order and any entry whose window
    /// overlaps a booking already on the calendar.
    pub fn insert_booking(&mut self, entry: BookingEntry) -> Result<()> {
        if self.has_booking(entry.order_id) {
            return Err(DomainError::DuplicateBooking(entry.order_id));
        }
        if let Some(other) = self.calendar.iter().find(|e| e.overlaps(&entry)) {
            return Err(DomainError::BookingOverlap {
                order_id: entry.order_id,
                conflicting: other.order_id,
            });
        }
        self.place(entry);
        Ok(())
    }

    /// Marks the order's booking accepted.
    ///
    /// No two accepted bookings may overlap.
    pub fn accept_booking(&mut self, order_id: EntityId) -> Result<()> {
        let entry = self
            .booking(order_id)
            .cloned()
            .ok_or(DomainError::BookingNotFound(order_id))?;
        if let Some(other) = self
            .calendar
            .iter()
            .find(|e| e.accepted && e.order_id != order_id && e.overlaps(&entry))
        {
            return Err(DomainError::BookingOverlap {
                order_id,
                conflicting: other.order_id,
            });
        }
        if let Some(entry) = self.calendar.iter_mut().find(|e| e.order_id == order_id) {
            entry.accepted = true;
        }
        Ok(())
    }

    /// Removes the order's booking, returning it if present.
    pub fn remove_booking(&mut self, order_id: EntityId) -> Option<BookingEntry> {
        let index = self.calendar.iter().position(|e| e.order_id == order_id)?;
        Some(self.calendar.remove(index))
    }

    /// Puts a calendar entry back exactly as it was, replacing any current
    /// entry for the same order.
    pub fn restore_entry(&mut self, entry: BookingEntry) {
        self.remove_booking(entry.order_id);
        self.place(entry);
    }

    fn place(&mut self, entry: BookingEntry) {
        let index = self.calendar.partition_point(|e| e.start <= entry.start);
        self.calendar.insert(index, entry);
    }
}
