use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::{parse_clock, parse_date};
use crate::limits::*;
use crate::model::*;
use crate::store::{APPOINTMENT_SLOT_KEY, Store, StoreError};

use super::conflict::{
    check_len, parse_price, require, validate_day_of_week, validate_duration,
};
use super::{Collision, Engine, EngineError, RuleCreated};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewProfessional {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Defaults to 24 hours.
    pub cancellation_window_hours: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    pub professional_id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A one-off booking request. Date, time and price arrive as text and are
/// parsed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub date: String,
    pub start: String,
    pub duration_minutes: i64,
    pub price: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecurringRule {
    pub professional_id: Ulid,
    pub client_id: Ulid,
    /// 1 = Monday .. 7 = Sunday.
    pub day_of_week: i64,
    pub start: String,
    pub duration_minutes: i64,
    pub price: Option<String>,
    pub activation_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub day_of_week: i64,
    pub start: String,
    pub end: String,
}

const DEFAULT_CANCELLATION_WINDOW_HOURS: u32 = 24;

fn optional_contact(value: Option<String>, what: &'static str) -> Result<Option<String>, EngineError> {
    match value {
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => {
            check_len(&v, MAX_CONTACT_LEN, what)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

impl<S: Store> Engine<S> {
    pub async fn register_professional(
        &self,
        new: NewProfessional,
    ) -> Result<Professional, EngineError> {
        require(&new.name, "name")?;
        require(&new.email, "email")?;
        check_len(&new.name, MAX_NAME_LEN, "name too long")?;
        check_len(&new.email, MAX_CONTACT_LEN, "email too long")?;
        if !new.email.contains('@') {
            return Err(EngineError::InvalidFormat(format!("invalid email {:?}", new.email)));
        }
        let phone = optional_contact(new.phone, "phone too long")?;
        let window = match new.cancellation_window_hours {
            None => DEFAULT_CANCELLATION_WINDOW_HOURS,
            Some(h) if (0..=MAX_CANCELLATION_WINDOW_HOURS as i64).contains(&h) => h as u32,
            Some(h) => {
                return Err(EngineError::InvalidInput(format!(
                    "cancellation_window_hours must be between 0 and {MAX_CANCELLATION_WINDOW_HOURS}, got {h}"
                )));
            }
        };

        let professional = self
            .store
            .insert_professional(ProfessionalDraft {
                name: new.name,
                email: new.email,
                phone,
                cancellation_window_hours: window,
            })
            .await?;
        info!(professional = %professional.id, "professional registered");
        Ok(professional)
    }

    pub async fn register_client(&self, new: NewClient) -> Result<Client, EngineError> {
        require(&new.name, "name")?;
        check_len(&new.name, MAX_NAME_LEN, "name too long")?;
        let email = optional_contact(new.email, "email too long")?;
        let phone = optional_contact(new.phone, "phone too long")?;
        let client = self
            .store
            .insert_client(ClientDraft {
                professional_id: new.professional_id,
                name: new.name,
                email,
                phone,
            })
            .await?;
        Ok(client)
    }

    /// Book a one-off appointment after checking the slot is free.
    ///
    /// No lock is held between the check and the insert. A booking that lands
    /// in between is caught by the store's slot constraint and reported as
    /// `Collision::SlotTaken`.
    pub async fn create_appointment(
        &self,
        new: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        let date = parse_date(&new.date)?;
        let start = parse_clock(&new.start)?;
        let duration = validate_duration(new.duration_minutes)?;
        let price = parse_price(new.price.as_deref())?;
        if let Some(note) = &new.note {
            check_len(note, MAX_NOTE_LEN, "note too long")?;
        }

        self.check_window(new.professional_id, date, start, duration)
            .await?;

        let draft = AppointmentDraft {
            professional_id: new.professional_id,
            client_id: new.client_id,
            date,
            start,
            duration_minutes: duration,
            price,
            note: new.note,
            provenance: Provenance::Manual,
        };
        match self.store.insert_appointment(draft).await {
            Ok(appointment) => {
                metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL, "provenance" => "manual")
                    .increment(1);
                Ok(appointment)
            }
            Err(StoreError::UniqueViolation(APPOINTMENT_SLOT_KEY)) => {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
                Err(EngineError::Conflict(Collision::SlotTaken { date, start }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a weekly rule, then project it onto the next
    /// `MATERIALIZE_WEEKS` weeks.
    ///
    /// Only persisting the rule can fail. Every per-date outcome of the
    /// projection is in the returned report.
    pub async fn create_recurring_rule(
        &self,
        new: NewRecurringRule,
    ) -> Result<RuleCreated, EngineError> {
        let day_of_week = validate_day_of_week(new.day_of_week)?;
        let start = parse_clock(&new.start)?;
        let duration = validate_duration(new.duration_minutes)?;
        let price = parse_price(new.price.as_deref())?;
        let activation_date = new.activation_date.as_deref().map(parse_date).transpose()?;

        let rule = self
            .store
            .insert_rule(RuleDraft {
                professional_id: new.professional_id,
                client_id: new.client_id,
                day_of_week,
                start,
                duration_minutes: duration,
                price,
                activation_date,
            })
            .await?;
        info!(
            rule = %rule.id,
            professional = %rule.professional_id,
            day_of_week,
            %start,
            "recurring rule created"
        );

        let report = self.materialize(&rule, MATERIALIZE_WEEKS).await;
        if report.booked_count() == 0 && !report.occurrences.is_empty() {
            warn!(rule = %rule.id, "no occurrences could be booked for new rule");
        }
        Ok(RuleCreated { rule, report })
    }

    /// Replace the professional's weekly schedule as a whole. An empty list clears it.
    pub async fn replace_schedule(
        &self,
        professional_id: Ulid,
        blocks: Vec<NewBlock>,
    ) -> Result<Vec<AvailabilityBlock>, EngineError> {
        if blocks.len() > MAX_SCHEDULE_BLOCKS {
            return Err(EngineError::LimitExceeded("too many schedule blocks"));
        }
        let mut parsed = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let day_of_week = validate_day_of_week(block.day_of_week)?;
            let start = parse_clock(&block.start)?;
            let end = parse_clock(&block.end)?;
            if start >= end {
                return Err(EngineError::InvalidInput(format!(
                    "schedule block must start before it ends: {start} to {end}"
                )));
            }
            parsed.push(AvailabilityBlock {
                day_of_week,
                start,
                end,
            });
        }
        self.store
            .replace_schedule(professional_id, parsed)
            .await?;
        Ok(self.store.schedule_of(professional_id).await?)
    }
}
