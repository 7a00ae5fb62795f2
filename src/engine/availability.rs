use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::clock::{Clock, parse_clock};
use crate::store::Store;

use super::conflict::{first_collision, validate_duration};
use super::{Collision, Engine, EngineError};

impl<S: Store> Engine<S> {
    /// Whether `[start, start + duration)` on `date` is free for the professional.
    ///
    /// `start` is parsed before anything else; nothing is read from the store
    /// when it is malformed.
    pub async fn check_availability(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        start: &str,
        duration_minutes: i64,
    ) -> Result<(), EngineError> {
        let start = parse_clock(start)?;
        let duration = validate_duration(duration_minutes)?;
        self.check_window(professional_id, date, start, duration).await
    }

    pub(super) async fn check_window(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
        start: Clock,
        duration_minutes: u32,
    ) -> Result<(), EngineError> {
        let booked = self.store.day_appointments(professional_id, date).await?;
        match first_collision(&booked, start.window(duration_minutes)) {
            None => Ok(()),
            Some(existing) => {
                debug!(
                    professional = %professional_id,
                    %date,
                    %start,
                    existing = %existing.id,
                    "slot collides with existing appointment"
                );
                metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
                Err(EngineError::Conflict(Collision::Overlap {
                    appointment: existing.id,
                    window: existing.window(),
                }))
            }
        }
    }
}
