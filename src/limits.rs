//! Hard limits enforced at the engine and wire boundaries.

/// Longest appointment or rule duration: one full day.
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

/// Weeks projected when a recurring rule is created.
pub const MATERIALIZE_WEEKS: u32 = 8;

/// Upper bound for an explicit materialization horizon.
pub const MAX_WEEKS_AHEAD: u32 = 104;

/// Widest date window a single appointment listing may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

pub const MAX_SCHEDULE_BLOCKS: usize = 64;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 4096;

/// Largest accepted price, in cents.
pub const MAX_PRICE_CENTS: i64 = 10_000_000_000;

pub const MAX_CANCELLATION_WINDOW_HOURS: u32 = 24 * 365;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
