//! Row-mapping helpers shared by the repositories.

use chrono::{DateTime, Utc};

use crate::domain::error::DatabaseError;

/// Parse an RFC 3339 timestamp column.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::SerializationError(format!("bad timestamp {s:?}: {e}")))
}

/// Render a timestamp for storage.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
