//! The relational store the scheduling engine depends on.
//!
//! Implementations must enforce, atomically with the insert itself:
//! - one appointment per `(professional_id, date, start)`;
//! - foreign keys from clients, rules and appointments to their professional and client;
//! - unique professional email and phone.
//!
//! Schedule replacement must be all-or-nothing.

mod memory;

pub use memory::WalStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write. Carries the constraint name.
    UniqueViolation(&'static str),
    /// A referenced row does not exist. Carries the referenced table and id.
    ForeignKey(&'static str, Ulid),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UniqueViolation(c) => write!(f, "unique constraint violated: {c}"),
            StoreError::ForeignKey(table, id) => write!(f, "referenced {table} {id} does not exist"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Constraint name reported when an appointment slot is already taken.
pub const APPOINTMENT_SLOT_KEY: &str = "appointments_professional_date_start_key";
pub const PROFESSIONAL_EMAIL_KEY: &str = "professionals_email_key";
pub const PROFESSIONAL_PHONE_KEY: &str = "professionals_phone_key";

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn insert_professional(&self, draft: ProfessionalDraft) -> Result<Professional, StoreError>;

    async fn professionals(&self) -> Result<Vec<Professional>, StoreError>;

    async fn insert_client(&self, draft: ClientDraft) -> Result<Client, StoreError>;

    async fn clients_of(&self, professional_id: Ulid) -> Result<Vec<Client>, StoreError>;

    /// Every appointment of the professional on `date`, regardless of status, ordered by start.
    async fn day_appointments(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Appointments within `range`, ordered by `(date, start)`.
    async fn appointments_in(
        &self,
        professional_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, StoreError>;

    async fn insert_rule(&self, draft: RuleDraft) -> Result<RecurringRule, StoreError>;

    async fn rule(&self, id: Ulid) -> Result<Option<RecurringRule>, StoreError>;

    /// Rules of the professional in creation order.
    async fn rules_of(&self, professional_id: Ulid) -> Result<Vec<RecurringRule>, StoreError>;

    async fn replace_schedule(
        &self,
        professional_id: Ulid,
        blocks: Vec<AvailabilityBlock>,
    ) -> Result<(), StoreError>;

    async fn schedule_of(&self, professional_id: Ulid) -> Result<Vec<AvailabilityBlock>, StoreError>;
}
