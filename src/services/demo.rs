use crate::models::dashboard::BinId;
use crate::services::evaluate::{Evaluator, Reading, ThresholdState};
use crate::store::pump_state::PumpState;
use chrono::{DateTime, Duration, DurationRound, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread;

const STEP_MINUTES: i64 = 20;
const SERIES_HOURS: i64 = 30;
const SEED: u64 = 0x0B10_0D5E_A5ED_2020;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoSummary {
    pub samples: usize,
    pub pump_off_episodes: usize,
    pub pump_back_on: usize,
}

/// Replay a synthetic bloom through `evaluator` using in-memory state,
/// pausing `pause` between samples. Each sample's own time is used as "now".
pub fn run(evaluator: &Evaluator<'_>, start: DateTime<Utc>, pause: std::time::Duration) -> Result<DemoSummary, String> {
    let series = synthesize(start);
    info!(
        "Demo: replaying {} synthetic sample(s) from {} (threshold {} perL, hysteresis {}m)",
        series.len(),
        start,
        evaluator.threshold,
        evaluator.hysteresis.num_minutes()
    );

    let mut state = PumpState::in_memory();
    let mut summary = DemoSummary::default();
    for reading in &series {
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        let outcome = evaluator.evaluate(reading, &mut state, reading.sample_time)?;
        summary.samples += 1;
        match outcome.state {
            ThresholdState::AboveFirst => summary.pump_off_episodes += 1,
            ThresholdState::Recovery => summary.pump_back_on += 1,
            _ => {}
        }
    }

    info!(
        "Demo: finished ({} pump-off episode(s), {} back on)",
        summary.pump_off_episodes, summary.pump_back_on
    );
    Ok(summary)
}

/// A day and a bit of bins with one strong bloom and a weaker second pulse.
pub fn synthesize(start: DateTime<Utc>) -> Vec<Reading> {
    let start = start.duration_trunc(Duration::minutes(STEP_MINUTES)).unwrap_or(start);
    let mut rng = SmallRng::seed_from_u64(SEED);
    let steps = SERIES_HOURS * 60 / STEP_MINUTES;

    (0..steps)
        .map(|i| {
            let ts = start + Duration::minutes(i * STEP_MINUTES);
            let hours = (i * STEP_MINUTES) as f64 / 60.0;
            Reading {
                bin: BinId(format!("D{}_DEMO", ts.format("%Y%m%dT%H%M%S"))),
                concentration: compute_concentration(hours, &mut rng),
                sample_time: ts,
            }
        })
        .collect()
}

fn pulse(hours: f64, center: f64, width: f64, amplitude: f64) -> f64 {
    amplitude * (-((hours - center) / width).powi(2) / 2.0).exp()
}

fn compute_concentration(hours: f64, rng: &mut impl Rng) -> f64 {
    let tide = 8.0 * (2.0 * PI * hours / 12.42).sin();
    let base = 25.0 + tide + rng.random_range(-6.0..6.0);
    let bloom = pulse(hours, 8.0, 1.5, 320.0) + pulse(hours, 21.0, 1.0, 160.0);
    (base + bloom * rng.random_range(0.85..1.15)).max(0.0)
}
