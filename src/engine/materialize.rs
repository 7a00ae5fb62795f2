use chrono::{Datelike, Days, NaiveDate, Weekday};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::MAX_WEEKS_AHEAD;
use crate::model::*;
use crate::store::{APPOINTMENT_SLOT_KEY, Store, StoreError};

use super::{Collision, Engine, EngineError};

/// Map a rule's day number to a weekday: 1 = Monday .. 7 = Sunday.
pub fn rule_day_to_weekday(day: u8) -> Option<Weekday> {
    match day {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// The dates a rule would occupy over the next `weeks` weeks.
///
/// Counting starts at `today`, or at the activation date when that is later.
/// Week `i` begins `7 * i` days after the anchor and its occurrence is the
/// first matching weekday on or after that.
pub fn occurrence_dates(rule: &RecurringRule, weeks: u32, today: NaiveDate) -> Vec<NaiveDate> {
    let Some(target) = rule_day_to_weekday(rule.day_of_week) else {
        return Vec::new();
    };
    let anchor = match rule.activation_date {
        Some(activation) if activation > today => activation,
        _ => today,
    };
    let target = target.num_days_from_monday();
    (0..weeks as u64)
        .filter_map(|week| {
            let week_start = anchor.checked_add_days(Days::new(7 * week))?;
            let current = week_start.weekday().num_days_from_monday();
            let ahead = (target + 7 - current) % 7;
            week_start.checked_add_days(Days::new(ahead as u64))
        })
        .collect()
}

/// Why an occurrence was not booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// The date is before today.
    Past,
    /// An existing appointment overlaps the occurrence.
    Conflict(Collision),
    /// Another writer took the exact slot between the check and the insert,
    /// or an earlier run already booked it.
    AlreadyBooked,
    Failed(String),
}

impl Skip {
    pub fn label(&self) -> &'static str {
        match self {
            Skip::Past => "past",
            Skip::Conflict(_) => "conflict",
            Skip::AlreadyBooked => "already_booked",
            Skip::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::Past => write!(f, "date is in the past"),
            Skip::Conflict(c) => write!(f, "{c}"),
            Skip::AlreadyBooked => write!(f, "slot already booked"),
            Skip::Failed(msg) => write!(f, "insert failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Booked(Appointment),
    Skipped(Skip),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Booked(_) => "booked",
            Outcome::Skipped(skip) => skip.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub outcome: Outcome,
}

/// Per-date outcome of one materialization run, in date order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub rule_id: Ulid,
    pub occurrences: Vec<Occurrence>,
}

impl MaterializeReport {
    fn new(rule_id: Ulid) -> Self {
        Self {
            rule_id,
            occurrences: Vec::new(),
        }
    }

    pub fn booked(&self) -> impl Iterator<Item = &Appointment> {
        self.occurrences.iter().filter_map(|o| match &o.outcome {
            Outcome::Booked(a) => Some(a),
            Outcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (NaiveDate, &Skip)> {
        self.occurrences.iter().filter_map(|o| match &o.outcome {
            Outcome::Booked(_) => None,
            Outcome::Skipped(skip) => Some((o.date, skip)),
        })
    }

    pub fn booked_count(&self) -> usize {
        self.booked().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }
}

/// A freshly persisted rule together with its first materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCreated {
    pub rule: RecurringRule,
    pub report: MaterializeReport,
}

impl<S: Store> Engine<S> {
    /// Book the rule's occurrences for the next `weeks_ahead` weeks, best effort.
    ///
    /// Never fails as a whole. Each date is checked and inserted on its own and
    /// whatever happened to it is recorded in the report. Re-running over the
    /// same horizon books nothing new.
    pub async fn materialize(&self, rule: &RecurringRule, weeks_ahead: u32) -> MaterializeReport {
        let mut report = MaterializeReport::new(rule.id);
        if !rule.active {
            debug!(rule = %rule.id, "inactive rule not materialized");
            return report;
        }
        let today = self.today();
        for date in occurrence_dates(rule, weeks_ahead.min(MAX_WEEKS_AHEAD), today) {
            let outcome = self.materialize_one(rule, date, today).await;
            metrics::counter!(crate::observability::OCCURRENCES_TOTAL, "outcome" => outcome.label())
                .increment(1);
            report.occurrences.push(Occurrence { date, outcome });
        }
        info!(
            rule = %rule.id,
            booked = report.booked_count(),
            skipped = report.skipped_count(),
            "rule materialized"
        );
        report
    }

    /// Re-read a rule and materialize it. Fails only when the rule is unknown
    /// or the horizon is out of range.
    pub async fn materialize_rule(
        &self,
        rule_id: Ulid,
        weeks_ahead: u32,
    ) -> Result<MaterializeReport, EngineError> {
        if weeks_ahead > MAX_WEEKS_AHEAD {
            return Err(EngineError::LimitExceeded("materialization horizon too far"));
        }
        let rule = self
            .store
            .rule(rule_id)
            .await?
            .ok_or(EngineError::NotFound("recurring_rules", rule_id))?;
        Ok(self.materialize(&rule, weeks_ahead).await)
    }

    pub(super) async fn materialize_one(
        &self,
        rule: &RecurringRule,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Outcome {
        if date < today {
            return Outcome::Skipped(Skip::Past);
        }
        match self
            .check_window(rule.professional_id, date, rule.start, rule.duration_minutes)
            .await
        {
            Ok(()) => {}
            Err(EngineError::Conflict(collision)) => {
                info!(rule = %rule.id, %date, %collision, "occurrence skipped");
                return Outcome::Skipped(Skip::Conflict(collision));
            }
            Err(e) => {
                warn!(rule = %rule.id, %date, error = %e, "availability check failed");
                return Outcome::Skipped(Skip::Failed(e.to_string()));
            }
        }

        let draft = AppointmentDraft {
            professional_id: rule.professional_id,
            client_id: rule.client_id,
            date,
            start: rule.start,
            duration_minutes: rule.duration_minutes,
            price: rule.price,
            note: None,
            provenance: Provenance::Generated { rule_id: rule.id },
        };
        match self.store.insert_appointment(draft).await {
            Ok(appointment) => {
                metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL, "provenance" => "generated")
                    .increment(1);
                Outcome::Booked(appointment)
            }
            Err(StoreError::UniqueViolation(APPOINTMENT_SLOT_KEY)) => {
                info!(rule = %rule.id, %date, "occurrence already booked");
                Outcome::Skipped(Skip::AlreadyBooked)
            }
            Err(e) => {
                warn!(rule = %rule.id, %date, error = %e, "occurrence insert failed");
                Outcome::Skipped(Skip::Failed(e.to_string()))
            }
        }
    }
}
