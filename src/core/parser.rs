use lazy_static::lazy_static;
use regex::Regex;

use super::error::{EngineError, EngineResult};

lazy_static! {
    // 1:30, 12:05 - minutes must be two digits below 60
    static ref HOURS_MINUTES: Regex =
        Regex::new(r"^(\d{1,4}):([0-5]\d)$").expect("Invalid H:MM regex");
    static ref WHOLE_MINUTES: Regex = Regex::new(r"^\d{1,6}$").expect("Invalid minutes regex");
}

/// Parse a manual countdown override into minutes.
///
/// Accepts `H:MM` or a plain whole number of minutes.
pub fn parse_time_input(input: &str) -> EngineResult<f64> {
    let trimmed = input.trim();
    let invalid = || EngineError::InvalidFormat(input.to_string());

    if let Some(caps) = HOURS_MINUTES.captures(trimmed) {
        let hours: u32 = caps[1].parse().map_err(|_| invalid())?;
        let minutes: u32 = caps[2].parse().map_err(|_| invalid())?;
        return Ok(f64::from(hours * 60 + minutes));
    }

    if WHOLE_MINUTES.is_match(trimmed) {
        let minutes: u32 = trimmed.parse().map_err(|_| invalid())?;
        return Ok(f64::from(minutes));
    }

    Err(invalid())
}
