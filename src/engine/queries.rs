use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;
use crate::store::Store;

use super::{Engine, EngineError};

impl<S: Store> Engine<S> {
    pub async fn list_professionals(&self) -> Result<Vec<Professional>, EngineError> {
        Ok(self.store.professionals().await?)
    }

    pub async fn list_clients(&self, professional_id: Ulid) -> Result<Vec<Client>, EngineError> {
        Ok(self.store.clients_of(professional_id).await?)
    }

    /// Appointments in `range` ordered by `(date, start)`. Both ends must be
    /// bounded and at most `MAX_QUERY_WINDOW_DAYS` apart.
    pub async fn list_appointments(
        &self,
        professional_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Appointment>, EngineError> {
        match range.span_days() {
            Some(days) if days <= MAX_QUERY_WINDOW_DAYS => {}
            _ => return Err(EngineError::LimitExceeded("query window too wide")),
        }
        Ok(self.store.appointments_in(professional_id, range).await?)
    }

    pub async fn list_recurring_rules(
        &self,
        professional_id: Ulid,
    ) -> Result<Vec<RecurringRule>, EngineError> {
        Ok(self.store.rules_of(professional_id).await?)
    }

    pub async fn list_schedule(
        &self,
        professional_id: Ulid,
    ) -> Result<Vec<AvailabilityBlock>, EngineError> {
        Ok(self.store.schedule_of(professional_id).await?)
    }
}
