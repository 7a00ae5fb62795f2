use std::fmt;
use std::ops::Bound;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::{Clock, Window};

/// Unix milliseconds, used for row timestamps.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Money amount in cents. Rendered with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(i64);

impl Price {
    pub fn from_cents(cents: i64) -> Self {
        Price(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    /// Parse `"50"`, `"50.5"` or `"50.00"`. Negative amounts and more than two
    /// fractional digits are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) || s.ends_with('.') {
            return None;
        }
        let whole: i64 = whole.parse().ok()?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        whole.checked_mul(100)?.checked_add(frac_cents).map(Price)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cancellation_window_hours: u32,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: Ms,
}

/// A nominal bookable window on one weekday. Stored, never consulted by conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    /// 1 = Monday .. 7 = Sunday.
    pub day_of_week: u8,
    pub start: Clock,
    pub end: Clock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub client_id: Ulid,
    /// 1 = Monday .. 7 = Sunday.
    pub day_of_week: u8,
    pub start: Clock,
    pub duration_minutes: u32,
    pub price: Option<Price>,
    /// No occurrences are materialized before this date.
    pub activation_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

/// Whether an appointment was booked by hand or generated from a recurring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    Manual,
    Generated { rule_id: Ulid },
}

impl Provenance {
    pub fn rule_id(&self) -> Option<Ulid> {
        match self {
            Provenance::Manual => None,
            Provenance::Generated { rule_id } => Some(*rule_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub start: Clock,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub price: Option<Price>,
    pub note: Option<String>,
    pub provenance: Provenance,
    pub rescheduled_from: Option<Ulid>,
    pub created_at: Ms,
}

impl Appointment {
    pub fn window(&self) -> Window {
        self.start.window(self.duration_minutes)
    }
}

// ── Store inputs (identity and timestamps assigned by the store) ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfessionalDraft {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cancellation_window_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDraft {
    pub professional_id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub start: Clock,
    pub duration_minutes: u32,
    pub price: Option<Price>,
    pub note: Option<String>,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDraft {
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub day_of_week: u8,
    pub start: Clock,
    pub duration_minutes: u32,
    pub price: Option<Price>,
    pub activation_date: Option<NaiveDate>,
}

/// Date window for appointment listings. Each side is inclusive or exclusive as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Bound<NaiveDate>,
    pub end: Bound<NaiveDate>,
}

impl DateRange {
    /// `[start, end)`.
    pub fn half_open(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Excluded(end),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        let after_start = match self.start {
            Bound::Included(s) => date >= s,
            Bound::Excluded(s) => date > s,
            Bound::Unbounded => true,
        };
        let before_end = match self.end {
            Bound::Included(e) => date <= e,
            Bound::Excluded(e) => date < e,
            Bound::Unbounded => true,
        };
        after_start && before_end
    }

    /// Number of calendar days spanned, or `None` if either side is open.
    pub fn span_days(&self) -> Option<i64> {
        let start = match self.start {
            Bound::Included(s) | Bound::Excluded(s) => s,
            Bound::Unbounded => return None,
        };
        let end = match self.end {
            Bound::Included(e) | Bound::Excluded(e) => e,
            Bound::Unbounded => return None,
        };
        Some((end - start).num_days())
    }
}

/// The WAL record format. One record per committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalRegistered(Professional),
    ClientRegistered(Client),
    RuleCreated(RecurringRule),
    AppointmentBooked(Appointment),
    ScheduleReplaced {
        professional_id: Ulid,
        blocks: Vec<AvailabilityBlock>,
    },
}

impl Event {
    /// The professional whose state this event touches.
    pub fn professional_id(&self) -> Ulid {
        match self {
            Event::ProfessionalRegistered(p) => p.id,
            Event::ClientRegistered(c) => c.professional_id,
            Event::RuleCreated(r) => r.professional_id,
            Event::AppointmentBooked(a) => a.professional_id,
            Event::ScheduleReplaced { professional_id, .. } => *professional_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_clock;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn price_parse_and_display() {
        assert_eq!(Price::parse("50"), Some(Price::from_cents(5000)));
        assert_eq!(Price::parse("50.5"), Some(Price::from_cents(5050)));
        assert_eq!(Price::parse("50.05"), Some(Price::from_cents(5005)));
        assert_eq!(Price::parse("0"), Some(Price::from_cents(0)));
        assert_eq!(Price::from_cents(5005).to_string(), "50.05");
        assert_eq!(Price::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn price_rejects_garbage() {
        for s in ["", "-5", "5.", ".5", "5.123", "1e3", "five", "5,00"] {
            assert_eq!(Price::parse(s), None, "{s:?} should be rejected");
        }
    }

    #[test]
    fn zero_price_is_not_absent() {
        let zero = Price::parse("0.00");
        assert!(zero.is_some());
        assert_ne!(zero, None);
    }

    #[test]
    fn provenance_rule_link() {
        let rid = Ulid::new();
        assert_eq!(Provenance::Manual.rule_id(), None);
        assert_eq!(Provenance::Generated { rule_id: rid }.rule_id(), Some(rid));
    }

    #[test]
    fn date_range_bounds() {
        let r = DateRange::half_open(day(2030, 1, 1), day(2030, 1, 31));
        assert!(r.contains(day(2030, 1, 1)));
        assert!(r.contains(day(2030, 1, 30)));
        assert!(!r.contains(day(2030, 1, 31)));
        assert!(!r.contains(day(2029, 12, 31)));
        assert_eq!(r.span_days(), Some(30));

        let inclusive = DateRange {
            start: Bound::Excluded(day(2030, 1, 1)),
            end: Bound::Included(day(2030, 1, 31)),
        };
        assert!(!inclusive.contains(day(2030, 1, 1)));
        assert!(inclusive.contains(day(2030, 1, 31)));
    }

    #[test]
    fn open_range_has_no_span() {
        let r = DateRange {
            start: Bound::Unbounded,
            end: Bound::Included(day(2030, 1, 31)),
        };
        assert_eq!(r.span_days(), None);
        assert!(r.contains(day(1999, 1, 1)));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked(Appointment {
            id: Ulid::new(),
            professional_id: Ulid::new(),
            client_id: Ulid::new(),
            date: day(2030, 1, 7),
            start: parse_clock("10:00").unwrap(),
            duration_minutes: 60,
            status: AppointmentStatus::Scheduled,
            price: Some(Price::from_cents(5000)),
            note: None,
            provenance: Provenance::Generated { rule_id: Ulid::new() },
            rescheduled_from: None,
            created_at: 1,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
