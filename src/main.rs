pub mod models {
    pub mod dashboard;
}

pub mod client;
pub mod config;
pub mod envfile;
pub mod notify;
pub mod powerstrip;
pub mod store {
    pub mod cache;
    pub mod event_log;
    pub mod files;
    pub mod pump_state;
    pub mod timer;
}
pub mod utils;
pub mod services {
    pub mod demo;
    pub mod evaluate;
    pub mod outlets;
    pub mod refresh;
}

use crate::client::DashboardClient;
use crate::config::Config;
use crate::notify::{Notifier, SmtpNotifier};
use crate::powerstrip::PowerStrip;
use crate::services::evaluate::{Evaluator, Reading};
use crate::services::outlets::OutletController;
use crate::services::{demo, refresh};
use crate::store::pump_state::PumpState;
use crate::utils::now_secs;
use log::{error, info};
use std::path::PathBuf;

const DEFAULT_DEMO_SECS_PER_BIN: f64 = 1.0;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

#[derive(Debug, Default)]
struct Cli {
    env_file: Option<PathBuf>,
    demo: bool,
}

pub fn run(cfg: &Config) -> Result<(), String> {
    // 1) State directories
    cfg.ensure_state_dirs()?;
    for path in cfg.state_files() {
        info!("State file: {}", path.display());
    }

    // 2) Refresh the sample cache
    let now = now_secs();
    let dashboard = DashboardClient::new(&cfg.dashboard_url);
    info!(
        "Refreshing {} counts from {} ({} {})",
        cfg.taxon, cfg.dashboard_url, cfg.dataset, cfg.instrument
    );
    let cache = refresh::run(&cfg.data_file, &dashboard, &refresh::RefreshPlan::from(cfg), now)?;

    // 3) Threshold evaluation
    let Some(threshold) = cfg.threshold else {
        info!("No threshold set; skipping evaluation");
        return Ok(());
    };
    let Some(reading) = Reading::latest(&cache) else {
        info!("No classified samples cached yet; skipping evaluation");
        return Ok(());
    };

    let mut state = PumpState::load(&cfg.timer_file, &cfg.log_file).map_err(|e| format!("load pump state failed: {}", e))?;

    let strip = cfg
        .powerstrip
        .as_ref()
        .map(|p| PowerStrip::new(&p.url, &p.username, &p.password));
    let outlets = match (&strip, &cfg.powerstrip) {
        (Some(strip), Some(p)) => Some(OutletController::new(strip, p.pump_outlet, p.aerator_outlet, p.settle)),
        _ => None,
    };
    if let Some(outlets) = &outlets {
        outlets.log_states();
    }

    let mailer = cfg.email.clone().map(SmtpNotifier::new);
    let evaluator = Evaluator {
        threshold,
        hysteresis: cfg.hysteresis,
        instrument: &cfg.instrument,
        taxon: &cfg.taxon,
        outlets,
        notifier: mailer.as_ref().map(|m| m as &dyn Notifier),
    };
    let outcome = evaluator.evaluate(&reading, &mut state, now)?;
    info!(
        "Evaluation complete: {:?} (outlets: {:?}, email: {:?})",
        outcome.state, outcome.outlets, outcome.alert
    );
    Ok(())
}

fn run_demo(cfg: &Config) -> Result<(), String> {
    let threshold = cfg
        .threshold
        .ok_or_else(|| "Demo mode requires THRESHOLD".to_string())?;
    let secs_per_bin = match std::env::var("DEMO_SECS_PER_BIN") {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| "DEMO_SECS_PER_BIN must be a non-negative number".to_string())?,
        _ => DEFAULT_DEMO_SECS_PER_BIN,
    };

    let strip = cfg
        .powerstrip
        .as_ref()
        .map(|p| PowerStrip::new(&p.url, &p.username, &p.password));
    let outlets = match (&strip, &cfg.powerstrip) {
        (Some(strip), Some(p)) => Some(OutletController::new(strip, p.pump_outlet, p.aerator_outlet, p.settle)),
        _ => None,
    };
    let evaluator = Evaluator {
        threshold,
        hysteresis: cfg.hysteresis,
        instrument: &cfg.instrument,
        taxon: &cfg.taxon,
        outlets,
        notifier: None,
    };
    demo::run(
        &evaluator,
        now_secs() - chrono::Duration::days(1),
        std::time::Duration::from_secs_f64(secs_per_bin),
    )?;
    Ok(())
}

fn parse_cli() -> Result<Cli, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut cli = Cli::default();
    while let Some(arg) = args.next() {
        let Some(arg) = arg.to_str() else {
            return Err("argument contains invalid UTF-8".to_string());
        };
        let env_value = if arg == "--env-file" {
            Some(
                args.next()
                    .map(PathBuf::from)
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            )
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            if path.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            Some(PathBuf::from(path))
        } else {
            None
        };

        match (arg, env_value) {
            (_, Some(path)) => {
                if cli.env_file.replace(path).is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
            }
            ("--demo", None) => cli.demo = true,
            ("--", None) => break,
            (other, None) => return Err(format!("unrecognised argument: {}", other)),
        }
    }
    Ok(cli)
}

fn load_env(cli: &Cli) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = &cli.env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        let applied = envfile::load(path)?;
        return Ok(Some(LoadedEnvFile {
            path: path.clone(),
            explicit: true,
            applied,
        }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    let applied = envfile::load(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
        applied,
    }))
}

fn main() {
    let (cli, loaded_env) = match parse_cli().and_then(|cli| load_env(&cli).map(|env| (cli, env))) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s))",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "rustalert {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    let result = Config::from_env().and_then(|cfg| {
        info!(
            "Config loaded (taxon={}, threshold={}, hysteresis={}m, retention={}d, powerstrip={}, email={})",
            cfg.taxon,
            cfg.threshold.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            cfg.hysteresis.num_minutes(),
            cfg.retention.num_days(),
            cfg.powerstrip.as_ref().map(|p| p.url.as_str()).unwrap_or("-"),
            cfg.email.as_ref().map(|e| e.recipients.len().to_string()).unwrap_or_else(|| "-".to_string()),
        );
        if cli.demo { run_demo(&cfg) } else { run(&cfg) }
    });
    if let Err(e) = result {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
