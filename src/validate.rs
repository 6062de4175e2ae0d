use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::errors::{invalid, Result};

/// Parse a canonical hyphenated UUID (8-4-4-4-12 hex digits).
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    // Uuid::parse_str also accepts simple, braced, and urn forms; only the
    // hyphenated form is canonical here.
    let well_formed = s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        });
    if !well_formed {
        invalid!("invalid UUID '{s}': expected format xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx");
    }
    match Uuid::parse_str(s) {
        Ok(uuid) => Ok(uuid),
        Err(_) => {
            invalid!("invalid UUID '{s}': expected format xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")
        }
    }
}

/// Validate a user tag name: non-empty, starts with a letter, no whitespace
/// or `:`. All-uppercase names are reserved for synthetic tags.
pub fn validate_tag(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        invalid!("tag name must not be empty");
    };
    if !first.is_alphabetic() {
        invalid!("tag '{name}' must start with a letter");
    }
    if name.chars().any(|c| c.is_whitespace() || c == ':') {
        invalid!("tag '{name}' contains whitespace or ':'");
    }
    if name.chars().all(|c| c.is_ascii_uppercase()) {
        invalid!("tag '{name}' is reserved: all-uppercase tags are synthetic");
    }
    Ok(())
}

/// Property names must be non-empty and free of whitespace.
pub fn validate_property(name: &str) -> Result<()> {
    if name.is_empty() {
        invalid!("property name must not be empty");
    }
    if name.chars().any(char::is_whitespace) {
        invalid!("property name '{name}' contains whitespace");
    }
    Ok(())
}

/// Parse a stored date: decimal Unix-epoch seconds.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let Ok(secs) = s.trim().parse::<i64>() else {
        invalid!("invalid timestamp '{s}': expected Unix epoch seconds");
    };
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => Ok(dt),
        None => invalid!("timestamp '{s}' is out of range"),
    }
}

pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.timestamp().to_string()
}
