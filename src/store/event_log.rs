//! Pump event log: one CSV row per pump-off episode, keyed by the bin that
//! triggered it. Only the newest row is ever reopened or closed, so at most one
//! row has an empty `pump_back_on`.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::dashboard::BinId;
use crate::store::files::{StoreError, csv_err, open_if_exists, write_csv_atomic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpEvent {
    pub triggering_bin: BinId,
    pub pump_turned_off: DateTime<Utc>,
    pub pump_back_on: Option<DateTime<Utc>>,
}

impl PumpEvent {
    pub fn is_open(&self) -> bool {
        self.pump_back_on.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    entries: Vec<PumpEvent>,
}

impl EventLog {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let Some(file) = open_if_exists(path)? else {
            debug!("Event log: {} not found; one may be created", path.display());
            return Ok(EventLog::default());
        };
        let mut rdr = csv::Reader::from_reader(file);
        let entries = rdr
            .deserialize::<PumpEvent>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_err(path))?;
        Ok(EventLog { entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_csv_atomic(path, &self.entries)
    }

    pub fn entries(&self) -> &[PumpEvent] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&PumpEvent> {
        self.entries.last()
    }

    pub fn open_entry(&self) -> Option<&PumpEvent> {
        self.latest().filter(|e| e.is_open())
    }

    /// Start a new pump-off episode. A still-open previous episode is closed at
    /// `pump_turned_off` first; its triggering bin is returned.
    pub fn append_open(&mut self, triggering_bin: BinId, pump_turned_off: DateTime<Utc>) -> Option<BinId> {
        let closed = self
            .close_latest(pump_turned_off)
            .map(|e| e.triggering_bin.clone());
        self.entries.push(PumpEvent {
            triggering_bin,
            pump_turned_off,
            pump_back_on: None,
        });
        closed
    }

    /// Close the newest episode if it is open. Returns the closed entry.
    pub fn close_latest(&mut self, pump_back_on: DateTime<Utc>) -> Option<&PumpEvent> {
        match self.entries.last_mut() {
            Some(entry) if entry.is_open() => {
                entry.pump_back_on = Some(pump_back_on);
                Some(&*entry)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap()
    }

    #[test]
    fn append_then_close_keeps_single_open_entry() {
        let mut log = EventLog::default();
        assert!(log.close_latest(t0()).is_none());

        assert_eq!(log.append_open(BinId("b1".into()), t0()), None);
        assert_eq!(log.open_entry().map(|e| &e.triggering_bin), Some(&BinId("b1".into())));

        let closed = log.close_latest(t0() + Duration::hours(2)).cloned();
        assert_eq!(closed.and_then(|e| e.pump_back_on), Some(t0() + Duration::hours(2)));
        assert!(log.open_entry().is_none());

        // closing again does not touch the closed row
        assert!(log.close_latest(t0() + Duration::hours(3)).is_none());
        assert_eq!(log.entries()[0].pump_back_on, Some(t0() + Duration::hours(2)));
    }

    #[test]
    fn appending_over_open_entry_closes_it() {
        let mut log = EventLog::default();
        log.append_open(BinId("b1".into()), t0());
        let forced = log.append_open(BinId("b2".into()), t0() + Duration::hours(1));
        assert_eq!(forced, Some(BinId("b1".into())));
        assert_eq!(log.entries().iter().filter(|e| e.is_open()).count(), 1);
        assert_eq!(log.entries()[0].pump_back_on, Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn save_and_load_round_trip_with_open_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Margalefidinium.pumplog.csv");
        assert_eq!(EventLog::load(&path).expect("load"), EventLog::default());

        let mut log = EventLog::default();
        log.append_open(BinId("b1".into()), t0());
        log.close_latest(t0() + Duration::hours(2));
        log.append_open(BinId("b2".into()), t0() + Duration::days(1));
        log.save(&path).expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("triggering_bin,pump_turned_off,pump_back_on\n"));
        assert!(text.trim_end().ends_with(','));

        assert_eq!(EventLog::load(&path).expect("load"), log);
    }
}
