mod availability;
mod conflict;
mod error;
mod materialize;
mod mutations;
mod queries;

pub use conflict::first_collision;
pub use error::{Collision, EngineError};
pub use materialize::{
    MaterializeReport, Occurrence, Outcome, RuleCreated, Skip, occurrence_dates,
    rule_day_to_weekday,
};
pub use mutations::{NewAppointment, NewBlock, NewClient, NewProfessional, NewRecurringRule};

use chrono::NaiveDate;

use crate::store::Store;

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// The scheduling core. Stateless apart from the store it writes through;
/// every constraint that must hold under concurrency lives in the store.
pub struct Engine<S> {
    store: S,
    /// The professional-local calendar date. Replaceable for tests.
    today: fn() -> NaiveDate,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            today: local_today,
        }
    }

    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }
}
