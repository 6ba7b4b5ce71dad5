// Field checks shared by every decoded descriptor
// Values arriving in task JSON end up in file names and log lines, so free-text
// fields are screened before any object is built from them.

use crate::error::{DiagError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest accepted collection window, in seconds (30 days)
pub const MAX_TIME: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Largest accepted repetition count
pub const MAX_COUNT: u64 = 1_000_000_000;

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("static regex"));

static ESCAPE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n\t\r\x0b\x0c]").expect("static regex"));

/// Rejects values that are unsafe to embed in a path or file name
///
/// # Errors
/// - the value contains `\ / : * ? " < > |`
/// - the value contains a newline, tab, carriage return, vertical tab or form feed
/// - the value is exactly `.` or `..`
pub fn check_string_value(value: &str, field: &str) -> Result<()> {
    if INVALID_CHARS.is_match(value) {
        return Err(DiagError::validation(format!(
            "{}: contains invalid characters (\\ / : * ? \" < > |)",
            field
        )));
    }
    if ESCAPE_CHARS.is_match(value) {
        return Err(DiagError::validation(format!(
            "{}: contains escape characters",
            field
        )));
    }
    if value == "." || value == ".." {
        return Err(DiagError::validation(format!(
            "{}: '{}' is not a valid value",
            field, value
        )));
    }
    Ok(())
}

/// Inclusive numeric range check
pub fn check_range<T>(value: T, min: T, max: T, field: &str) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(DiagError::validation(format!(
            "{}: value should be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(())
}

/// Character length check on a trimmed value
pub fn check_length(value: &str, min: usize, max: usize, field: &str) -> Result<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(DiagError::validation(format!(
            "{}: length should be between {} and {} characters, got {}",
            field, min, max, len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_value_accepts_plain_text() {
        assert!(check_string_value("nightly capture 01", "name").is_ok());
        assert!(check_string_value("a.b-c_d", "name").is_ok());
    }

    #[test]
    fn test_string_value_rejects_path_hostile_input() {
        for bad in ["a/b", "a\\b", "c:", "x*", "q?", "\"", "<", ">", "|", "line\nbreak", "tab\t", "\x0b", "\x0c", ".", ".."] {
            assert!(check_string_value(bad, "name").is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_range_is_inclusive() {
        assert!(check_range(10.0, 10.0, MAX_TIME, "collection_time").is_ok());
        assert!(check_range(MAX_TIME, 10.0, MAX_TIME, "collection_time").is_ok());
        assert!(check_range(9.99, 10.0, MAX_TIME, "collection_time").is_err());
    }

    #[test]
    fn test_length_trims_whitespace() {
        assert!(check_length("   ", 1, 256, "name").is_err());
        assert!(check_length(" x ", 1, 256, "name").is_ok());
        assert!(check_length(&"x".repeat(257), 1, 256, "name").is_err());
    }
}
