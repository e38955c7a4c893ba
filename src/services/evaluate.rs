//! Threshold evaluation: decides from the newest concentration and the pump
//! timer whether to switch outlets, alert, and record a pump event.
//!
//! ```text
//!                  conc >= threshold, no timer
//!   Below ───────────────────────────────────────► AboveFirst (pump OFF, alert, log open)
//!     ▲                                                │
//!     │                                                ▼
//!     │      conc >= threshold, timer == sample ── AboveStale   (nothing new)
//!     │      conc >= threshold, timer != sample ── AboveHolding (timer re-armed)
//!     │                                                │ conc < threshold
//!     │                                                ▼
//!     │                                   elapsed <= hysteresis: BelowWaiting
//!     └──────── Recovery (pump ON, alert, log closed) ◄─ elapsed > hysteresis
//! ```
//!
//! The timer always holds the sample time of the newest above-threshold bin,
//! so the hysteresis window is counted from the last breach, not the first.
//! Elapsed time is read on the sample clock (latest sample time − timer).
//!
//! Outlet and email failures are reported in the [`Outcome`] and logged; the
//! timer and event log are updated regardless.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, error, info, warn};

use crate::models::dashboard::BinId;
use crate::notify::{Alert, Notifier};
use crate::services::outlets::{OutletCommand, OutletController};
use crate::store::cache::SampleCache;
use crate::store::pump_state::PumpState;
use crate::store::timer::PumpTimer;
use crate::utils::format_hms;

/// The newest sample that has a concentration.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub bin: BinId,
    pub concentration: f64,
    pub sample_time: DateTime<Utc>,
}

impl Reading {
    pub fn latest(cache: &SampleCache) -> Option<Reading> {
        cache.latest_with_concentration().and_then(|r| {
            Some(Reading {
                bin: r.pid.clone(),
                concentration: r.taxon_per_l?,
                sample_time: r.sample_time,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    /// Below threshold, no timer: pump on, aerator off.
    Below,
    /// First above-threshold reading since the pump was last on.
    AboveFirst,
    /// Still above threshold with a newer sample than the timer.
    AboveHolding,
    /// Still above threshold, no new sample since the last evaluation.
    AboveStale,
    /// Back below threshold, hysteresis not yet served.
    BelowWaiting { remaining: Duration },
    /// Back below threshold and hysteresis served: pump goes back on.
    Recovery,
}

impl ThresholdState {
    pub fn is_above(&self) -> bool {
        matches!(
            self,
            ThresholdState::AboveFirst | ThresholdState::AboveHolding | ThresholdState::AboveStale
        )
    }
}

pub fn classify(reading: &Reading, threshold: f64, timer: &PumpTimer, hysteresis: Duration) -> ThresholdState {
    if reading.concentration >= threshold {
        return match timer.pump_off_since {
            None => ThresholdState::AboveFirst,
            Some(t) if t == reading.sample_time => ThresholdState::AboveStale,
            Some(_) => ThresholdState::AboveHolding,
        };
    }
    match timer.elapsed_at(reading.sample_time) {
        None => ThresholdState::Below,
        Some(elapsed) => {
            if elapsed > hysteresis {
                ThresholdState::Recovery
            } else {
                ThresholdState::BelowWaiting {
                    remaining: hysteresis - elapsed,
                }
            }
        }
    }
}

/// How a side effect went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// No action was called for.
    Skipped,
    /// Action was called for but the collaborator is not configured.
    NotConfigured,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub state: ThresholdState,
    pub outlets: Delivery,
    pub alert: Delivery,
}

pub struct Evaluator<'a> {
    pub threshold: f64,
    pub hysteresis: Duration,
    pub instrument: &'a str,
    pub taxon: &'a str,
    pub outlets: Option<OutletController<'a>>,
    pub notifier: Option<&'a dyn Notifier>,
}

impl Evaluator<'_> {
    /// Run one evaluation against `state`, persisting timer and log changes as
    /// they happen. `now` stamps event-log entries. Only state-file write
    /// failures are errors.
    pub fn evaluate(&self, reading: &Reading, state: &mut PumpState, now: DateTime<Utc>) -> Result<Outcome, String> {
        let ago = now - reading.sample_time;
        info!(
            "Checking counts against threshold ({} perL): latest {:.0} perL from {} (sampled {} ago)",
            self.threshold,
            reading.concentration,
            reading.bin,
            format_hms(ago)
        );
        if let Some(since) = state.timer.pump_off_since {
            debug!("Pump timer set at {}", since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let kind = classify(reading, self.threshold, &state.timer, self.hysteresis);
        let mut outcome = Outcome {
            state: kind,
            outlets: Delivery::Skipped,
            alert: Delivery::Skipped,
        };

        if kind.is_above() {
            state.timer.pump_off_since = Some(reading.sample_time);
            state
                .persist_timer()
                .map_err(|e| format!("save pump timer failed: {}", e))?;
        }

        match kind {
            ThresholdState::AboveFirst => {
                let msg = format!(
                    "Counts Above Threshold\n  Threshold: {}/L\n  Counts: {:.1}/L\n  SampleTime: {}\n  Bin: {}\n\nSetting pump timer + Turning Pump OFF and Aerator ON",
                    self.threshold,
                    reading.concentration,
                    reading.sample_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                    reading.bin
                );
                info!("{}", msg.replace('\n', "; "));
                outcome.outlets = self.switch(OutletCommand::PumpOffAeratorOn);
                outcome.alert = self.alert(
                    format!("[{}] ALERT: {} Above Threshold", self.instrument, self.taxon),
                    msg,
                );

                if let Some(forced) = state.log.append_open(reading.bin.clone(), now) {
                    warn!("Event log: episode triggered by {} was still open; closed it", forced);
                }
                state
                    .persist_log()
                    .map_err(|e| format!("save event log failed: {}", e))?;
            }
            ThresholdState::AboveStale => {
                info!("Counts Still Above Threshold: No New Classification Data");
            }
            ThresholdState::AboveHolding => {
                info!("Counts Still Above Threshold: Re-Setting pump timer");
            }
            ThresholdState::Recovery => {
                let msg = "Counts Below Threshold and Pump Timer has run out\n\nTurning Pump back ON and Aerator OFF";
                info!("{}", msg.replace('\n', "; "));
                outcome.outlets = self.switch(OutletCommand::PumpOnAeratorOff);

                state.timer = PumpTimer::default();
                state
                    .persist_timer()
                    .map_err(|e| format!("save pump timer failed: {}", e))?;

                outcome.alert = self.alert(
                    format!("[{}] {} Back Below Threshold", self.instrument, self.taxon),
                    msg.to_string(),
                );

                if state.log.close_latest(now).is_none() {
                    warn!("Event log: no open episode to close");
                }
                state
                    .persist_log()
                    .map_err(|e| format!("save event log failed: {}", e))?;
            }
            ThresholdState::BelowWaiting { remaining } => {
                info!(
                    "Counts Below Threshold: pump stays off for another {}",
                    format_hms(remaining)
                );
            }
            ThresholdState::Below => {
                info!("Counts Below Threshold: nothing to do");
            }
        }

        Ok(outcome)
    }

    fn switch(&self, command: OutletCommand) -> Delivery {
        let Some(outlets) = &self.outlets else {
            debug!("No power strip configured; skipping {}", command);
            return Delivery::NotConfigured;
        };
        match outlets.apply(command) {
            Ok(()) => Delivery::Done,
            Err(e) => {
                error!("Outlets: {} failed: {}", command, e);
                Delivery::Failed(e.to_string())
            }
        }
    }

    fn alert(&self, subject: String, body: String) -> Delivery {
        let Some(notifier) = self.notifier else {
            return Delivery::NotConfigured;
        };
        match notifier.send(&Alert::new(subject.clone(), body)) {
            Ok(()) => {
                info!("Email sent: {}", subject);
                Delivery::Done
            }
            Err(e) => {
                error!("Email \"{}\" failed: {}", subject, e);
                Delivery::Failed(e.to_string())
            }
        }
    }
}
