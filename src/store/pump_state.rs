//! Timer and event log bundled as the evaluator's persisted state.
//!
//! `PumpState::load` binds the state to its files and every `persist_*` call
//! rewrites the corresponding file. `PumpState::in_memory` is the same state
//! with nowhere to write, used by the demo replay and by tests.

use std::path::{Path, PathBuf};

use crate::store::event_log::EventLog;
use crate::store::files::StoreError;
use crate::store::timer::PumpTimer;

#[derive(Debug, Clone)]
struct StatePaths {
    timer: PathBuf,
    log: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PumpState {
    pub timer: PumpTimer,
    pub log: EventLog,
    paths: Option<StatePaths>,
}

impl PumpState {
    pub fn load(timer_path: &Path, log_path: &Path) -> Result<Self, StoreError> {
        Ok(PumpState {
            timer: PumpTimer::load(timer_path)?,
            log: EventLog::load(log_path)?,
            paths: Some(StatePaths {
                timer: timer_path.to_path_buf(),
                log: log_path.to_path_buf(),
            }),
        })
    }

    pub fn in_memory() -> Self {
        PumpState::default()
    }

    pub fn persist_timer(&self) -> Result<(), StoreError> {
        match &self.paths {
            Some(p) => self.timer.save(&p.timer),
            None => Ok(()),
        }
    }

    pub fn persist_log(&self) -> Result<(), StoreError> {
        match &self.paths {
            Some(p) => self.log.save(&p.log),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dashboard::BinId;
    use chrono::{TimeZone, Utc};

    #[test]
    fn persists_to_bound_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let timer_path = dir.path().join("timer.txt");
        let log_path = dir.path().join("log.csv");
        let t = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();

        let mut state = PumpState::load(&timer_path, &log_path).expect("load");
        state.timer.pump_off_since = Some(t);
        state.log.append_open(BinId("b1".into()), t);
        state.persist_timer().expect("timer");
        state.persist_log().expect("log");

        let reloaded = PumpState::load(&timer_path, &log_path).expect("reload");
        assert_eq!(reloaded.timer, state.timer);
        assert_eq!(reloaded.log, state.log);
    }

    #[test]
    fn in_memory_state_writes_nothing() {
        let mut state = PumpState::in_memory();
        state.timer.pump_off_since = Some(Utc::now());
        assert!(state.persist_timer().is_ok());
        assert!(state.persist_log().is_ok());
    }
}
