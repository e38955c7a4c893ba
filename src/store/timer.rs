//! Persisted pump hysteresis timer.
//!
//! On disk the timer is a single ISO-8601 instant; an empty or missing file
//! means no timer is running and the pump is allowed on.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::path::Path;

use crate::store::files::{StoreError, io_err, write_atomic};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpTimer {
    /// Sample time of the newest above-threshold bin since the pump went off.
    pub pump_off_since: Option<DateTime<Utc>>,
}

impl PumpTimer {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PumpTimer::default()),
            Err(e) => return Err(io_err(path)(e)),
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(PumpTimer::default());
        }
        let parsed = DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| trimmed.parse::<DateTime<Utc>>())
            .map_err(|_| StoreError::Timestamp {
                path: path.to_path_buf(),
                value: trimmed.to_string(),
            })?;
        Ok(PumpTimer {
            pump_off_since: Some(parsed),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let text = self
            .pump_off_since
            .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_default();
        write_atomic(path, text.as_bytes())
    }

    pub fn is_running(&self) -> bool {
        self.pump_off_since.is_some()
    }

    /// Time elapsed between the timer and `at`, if a timer is set.
    pub fn elapsed_at(&self, at: DateTime<Utc>) -> Option<Duration> {
        self.pump_off_since.map(|since| at - since)
    }
}
