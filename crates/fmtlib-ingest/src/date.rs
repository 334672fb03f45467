//! Lenient date parsing for catalog timestamps.

use chrono::{DateTime, NaiveDate};

use fmtlib_core::{Error, Result};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%d/%m/%Y"];

/// Parse the calendar date of a catalog timestamp.
///
/// Accepts RFC 3339 timestamps, anything starting with `YYYY-MM-DD`, and a few
/// spelled-out day/month/year forms. The time of day is discarded.
pub fn parse_catalog_date(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.date_naive());
    }
    if let Some(prefix) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Ok(date);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| Error::Parse(format!("Unrecognized date '{}'", raw)))
}
