use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{Clock, ClockError, Window};
use crate::store::StoreError;

/// Why a candidate slot cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collision {
    /// An existing appointment's window overlaps the candidate window.
    Overlap { appointment: Ulid, window: Window },
    /// The store already holds an appointment starting at exactly this slot.
    SlotTaken { date: NaiveDate, start: Clock },
}

impl std::fmt::Display for Collision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collision::Overlap { window, .. } => {
                write!(f, "conflicts with existing appointment from {window}")
            }
            Collision::SlotTaken { date, start } => {
                write!(f, "an appointment already starts at {date} {start}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed date, time or price text.
    InvalidFormat(String),
    /// Well-formed but unacceptable value (duration, day of week, ...).
    InvalidInput(String),
    Conflict(Collision),
    /// Referenced row missing. Carries the table and id.
    NotFound(&'static str, Ulid),
    /// A unique constraint other than the appointment slot. Carries the constraint.
    AlreadyExists(&'static str),
    LimitExceeded(&'static str),
    Storage(String),
}

impl EngineError {
    /// Overlap and slot-taken are both "the slot is not free".
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidFormat(msg) => write!(f, "invalid format: {msg}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict(c) => write!(f, "time slot {c}"),
            EngineError::NotFound(table, id) => write!(f, "not found in {table}: {id}"),
            EngineError::AlreadyExists(constraint) => {
                write!(f, "already exists: {constraint}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ClockError> for EngineError {
    fn from(e: ClockError) -> Self {
        EngineError::InvalidFormat(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(constraint) => EngineError::AlreadyExists(constraint),
            StoreError::ForeignKey(table, id) => EngineError::NotFound(table, id),
            StoreError::Wal(msg) => EngineError::Storage(msg),
        }
    }
}
