//! Safe time helpers shared by the registry and the pipeline.
//!
//! Carried over from the validation module's clock-error posture: a stuck or
//! skewed system clock must never panic a batch, only degrade a timestamp field.

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds, tolerating a clock before the epoch.
pub fn safe_unix_timestamp() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs(),
        Err(e) => {
            tracing::warn!(error = %e, "system clock is before UNIX epoch, using timestamp 0");
            0
        }
    }
}

/// Current UTC instant, for ISO-8601 timestamps in registry records.
pub fn now_iso() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_unix_timestamp_is_plausible() {
        assert!(safe_unix_timestamp() > 1_700_000_000);
    }

    #[test]
    fn now_iso_round_trips_through_rfc3339() {
        let ts = now_iso();
        let text = ts.to_rfc3339();
        let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&text)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts.timestamp_millis(), parsed.timestamp_millis());
    }
}
