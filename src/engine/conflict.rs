use crate::clock::Window;
use crate::limits::*;
use crate::model::{Appointment, Price};

use super::EngineError;

/// First existing appointment whose window overlaps `candidate`, in the order given.
///
/// Status is not consulted: cancelled appointments still occupy their slot.
pub fn first_collision(existing: &[Appointment], candidate: Window) -> Option<&Appointment> {
    existing.iter().find(|a| a.window().overlaps(&candidate))
}

pub(crate) fn validate_duration(minutes: i64) -> Result<u32, EngineError> {
    if minutes <= 0 {
        return Err(EngineError::InvalidInput(format!(
            "duration must be positive, got {minutes}"
        )));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::InvalidInput(format!(
            "duration {minutes} exceeds {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(minutes as u32)
}

/// 1 = Monday .. 7 = Sunday.
pub(crate) fn validate_day_of_week(day: i64) -> Result<u8, EngineError> {
    if (1..=7).contains(&day) {
        Ok(day as u8)
    } else {
        Err(EngineError::InvalidInput(format!(
            "day_of_week must be between 1 and 7, got {day}"
        )))
    }
}

pub(crate) fn parse_price(text: Option<&str>) -> Result<Option<Price>, EngineError> {
    let Some(text) = text else { return Ok(None) };
    let price = Price::parse(text)
        .ok_or_else(|| EngineError::InvalidFormat(format!("invalid price {text:?}")))?;
    if price.cents() > MAX_PRICE_CENTS {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(Some(price))
}

pub(crate) fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn require(value: &str, field: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}
