//! Runtime configuration from environment variables.
//! `--env-file` (or `./.env`) may pre-populate the environment; see `main.rs`.

use chrono::Duration;
use std::path::{Path, PathBuf};

use crate::notify::SmtpSettings;
use crate::powerstrip::OutletId;

pub const DEFAULT_TAXON: &str = "Margalefidinium";
pub const DEFAULT_HYSTERESIS_HOURS: f64 = 1.5;
pub const DEFAULT_RETENTION_DAYS: i64 = 14;
pub const DEFAULT_POLL_HOURS: i64 = 3;
pub const DEFAULT_SETTLE_SECS: f64 = 1.0;
pub const DEFAULT_DATA_FILE: &str = "data/{TAXON}.csv";
pub const DEFAULT_LOG_FILE: &str = "data/{TAXON}.pumplog.csv";
pub const DEFAULT_TIMER_FILE: &str = "data/.{TAXON}.pumptimer.txt";

#[derive(Debug, Clone)]
pub struct PowerStripConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub pump_outlet: OutletId,
    pub aerator_outlet: OutletId,
    /// Pause between an outlet write and its read-back.
    pub settle: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dashboard_url: String,
    pub dataset: String,
    pub instrument: String,
    pub taxon: String,
    /// Cells per liter at or above which the pump is switched off. When unset
    /// the cache is refreshed but never evaluated.
    pub threshold: Option<f64>,
    /// Minimum time the pump stays off after the last above-threshold sample.
    pub hysteresis: Duration,
    /// Cached samples older than this are pruned.
    pub retention: Duration,
    /// How far back each refresh asks the dashboard for bins.
    pub poll_window: Duration,
    pub data_file: PathBuf,
    pub log_file: PathBuf,
    pub timer_file: PathBuf,
    pub powerstrip: Option<PowerStripConfig>,
    pub email: Option<SmtpSettings>,
}

/// Reads settings by name. Production looks at the process environment.
struct Settings<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Settings<F> {
    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, String> {
        self.var(name).ok_or_else(|| format!("Missing required setting {}", name))
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, String> {
        match self.var(name) {
            Some(s) => s
                .parse::<T>()
                .map(Some)
                .map_err(|_| format!("{} has an invalid value: {:?}", name, s)),
            None => Ok(None),
        }
    }

    /// A whole number of units that must be at least 1.
    fn positive(&self, name: &str, default: i64, unit: fn(i64) -> Option<Duration>) -> Result<Duration, String> {
        let value = self.parsed::<i64>(name)?.unwrap_or(default);
        if value <= 0 {
            return Err(format!("{} must be a positive whole number", name));
        }
        unit(value).ok_or_else(|| format!("{} is out of range: {}", name, value))
    }

    /// Outlets are numbered from 1 on the device label and from 0 on the wire.
    fn outlet(&self, name: &str) -> Result<OutletId, String> {
        let n: u32 = self
            .parsed(name)?
            .ok_or_else(|| format!("Missing required setting {}", name))?;
        if n == 0 {
            return Err(format!("{} is 1-based; 0 is not a valid outlet", name));
        }
        Ok(OutletId(n - 1))
    }
}

fn hours(value: f64, name: &str) -> Result<Duration, String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} must be a non-negative number of hours", name));
    }
    let millis = (value * 3_600_000.0).round();
    if millis >= i64::MAX as f64 {
        return Err(format!("{} is out of range: {}", name, value));
    }
    Duration::try_milliseconds(millis as i64).ok_or_else(|| format!("{} is out of range: {}", name, value))
}

fn seconds(value: f64, name: &str) -> Result<std::time::Duration, String> {
    std::time::Duration::try_from_secs_f64(value)
        .map_err(|_| format!("{} must be a non-negative number of seconds", name))
}

/// Prefix bare hosts with `https://`.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Substitute `{TAXON}` in a path template.
pub fn template_path(template: &str, taxon: &str) -> PathBuf {
    PathBuf::from(template.replace("{TAXON}", taxon))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any name-to-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let env = Settings { lookup };
        let dashboard_url = normalize_url(&env.required("DASHBOARD_URL")?);
        let dataset = env.required("DATASET")?;
        let instrument = env.required("INSTRUMENT")?;
        let taxon = env.var("TAXON").unwrap_or_else(|| DEFAULT_TAXON.to_string());

        let threshold = env.parsed::<f64>("THRESHOLD")?;
        if let Some(t) = threshold
            && (!t.is_finite() || t < 0.0)
        {
            return Err("THRESHOLD must be a non-negative number".to_string());
        }

        let hysteresis = hours(
            env.parsed("HYSTERESIS_HOURS")?.unwrap_or(DEFAULT_HYSTERESIS_HOURS),
            "HYSTERESIS_HOURS",
        )?;
        let retention = env.positive("RETENTION_DAYS", DEFAULT_RETENTION_DAYS, Duration::try_days)?;
        let poll_window = env.positive("POLL_HOURS", DEFAULT_POLL_HOURS, Duration::try_hours)?;

        let data_file = template_path(&env.var("DATA_FILE").unwrap_or_else(|| DEFAULT_DATA_FILE.into()), &taxon);
        let log_file = template_path(&env.var("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.into()), &taxon);
        let timer_file = template_path(&env.var("TIMER_FILE").unwrap_or_else(|| DEFAULT_TIMER_FILE.into()), &taxon);

        let powerstrip = match env.var("POWERSTRIP_URL") {
            Some(url) if !matches!(url.to_lowercase().as_str(), "none" | "0") => {
                let settle = seconds(
                    env.parsed("OUTLET_SETTLE_SECS")?.unwrap_or(DEFAULT_SETTLE_SECS),
                    "OUTLET_SETTLE_SECS",
                )?;
                Some(PowerStripConfig {
                    url: normalize_url(&url),
                    username: env.var("POWERSTRIP_USER").unwrap_or_default(),
                    password: env.var("POWERSTRIP_PASS").unwrap_or_default(),
                    pump_outlet: env.outlet("PUMP_OUTLET")?,
                    aerator_outlet: env.outlet("AERATOR_OUTLET")?,
                    settle,
                })
            }
            _ => None,
        };

        let email = match env.var("SMTP_SERVER") {
            Some(server) => {
                let recipients: Vec<String> = env
                    .var("EMAILS")
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if recipients.is_empty() {
                    return Err("SMTP_SERVER is set but EMAILS lists no recipients".to_string());
                }
                Some(SmtpSettings {
                    server,
                    username: env.var("SMTP_USER"),
                    password: env.var("SMTP_PASS"),
                    recipients,
                })
            }
            None => None,
        };

        Ok(Config {
            dashboard_url,
            dataset,
            instrument,
            taxon,
            threshold,
            hysteresis,
            retention,
            poll_window,
            data_file,
            log_file,
            timer_file,
            powerstrip,
            email,
        })
    }

    /// Create the parent directories of every state file.
    pub fn ensure_state_dirs(&self) -> Result<(), String> {
        for path in self.state_files() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("unable to create {}: {}", parent.display(), e))?;
            }
        }
        Ok(())
    }

    pub fn state_files(&self) -> [&Path; 3] {
        [self.data_file.as_path(), self.log_file.as_path(), self.timer_file.as_path()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_taxon_into_paths() {
        assert_eq!(
            template_path(DEFAULT_TIMER_FILE, "Dinophysis"),
            PathBuf::from("data/.Dinophysis.pumptimer.txt")
        );
        assert_eq!(template_path("fixed.csv", "X"), PathBuf::from("fixed.csv"));
    }

    #[test]
    fn normalizes_scheme() {
        assert_eq!(normalize_url("habon-ifcb.whoi.edu"), "https://habon-ifcb.whoi.edu");
        assert_eq!(normalize_url("http://10.0.0.2"), "http://10.0.0.2");
    }

    #[test]
    fn fractional_hours_convert_exactly() {
        assert_eq!(hours(1.5, "X").unwrap(), Duration::minutes(90));
        assert!(hours(-1.0, "X").is_err());
        assert!(hours(f64::NAN, "X").is_err());
        assert!(hours(1e300, "X").is_err());
    }

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    static BASE: [(&str, &str); 3] = [
        ("DASHBOARD_URL", "habon-ifcb.whoi.edu"),
        ("DATASET", "mvco"),
        ("INSTRUMENT", "IFCB010"),
    ];

    fn with_base(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        extra.iter().chain(BASE.iter()).copied().collect()
    }

    #[test]
    fn minimal_settings_use_defaults() {
        let cfg = Config::from_lookup(lookup(&BASE)).expect("config");
        assert_eq!(cfg.dashboard_url, "https://habon-ifcb.whoi.edu");
        assert_eq!(cfg.taxon, DEFAULT_TAXON);
        assert_eq!(cfg.threshold, None);
        assert_eq!(cfg.hysteresis, Duration::minutes(90));
        assert_eq!(cfg.retention, Duration::days(14));
        assert_eq!(cfg.poll_window, Duration::hours(3));
        assert_eq!(cfg.data_file, PathBuf::from("data/Margalefidinium.csv"));
        assert_eq!(cfg.log_file, PathBuf::from("data/Margalefidinium.pumplog.csv"));
        assert_eq!(cfg.timer_file, PathBuf::from("data/.Margalefidinium.pumptimer.txt"));
        assert!(cfg.powerstrip.is_none());
        assert!(cfg.email.is_none());
    }

    #[test]
    fn missing_required_setting_is_fatal() {
        let err = Config::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(err.contains("INSTRUMENT"));
    }

    #[test]
    fn taxon_is_templated_into_default_and_custom_paths() {
        let pairs = with_base(&[("TAXON", "Dinophysis"), ("DATA_FILE", "/srv/{TAXON}/cache.csv")]);
        let cfg = Config::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(cfg.data_file, PathBuf::from("/srv/Dinophysis/cache.csv"));
        assert_eq!(cfg.timer_file, PathBuf::from("data/.Dinophysis.pumptimer.txt"));
    }

    #[test]
    fn non_numeric_values_are_fatal() {
        for (name, value) in [
            ("THRESHOLD", "lots"),
            ("THRESHOLD", "-5"),
            ("HYSTERESIS_HOURS", "1h30"),
            ("HYSTERESIS_HOURS", "1e300"),
            ("RETENTION_DAYS", "two weeks"),
        ] {
            let pairs = with_base(&[(name, value)]);
            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.contains(name), "{}={} gave {:?}", name, value, err);
        }
    }

    #[test]
    fn retention_and_poll_window_must_be_positive_and_in_range() {
        for (name, value) in [
            ("RETENTION_DAYS", "-3"),
            ("RETENTION_DAYS", "0"),
            ("RETENTION_DAYS", "9223372036854775807"),
            ("POLL_HOURS", "-1"),
            ("POLL_HOURS", "0"),
            ("POLL_HOURS", "9223372036854775807"),
        ] {
            let pairs = with_base(&[(name, value)]);
            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.contains(name), "{}={} gave {:?}", name, value, err);
        }

        let pairs = with_base(&[("RETENTION_DAYS", "30"), ("POLL_HOURS", "6")]);
        let cfg = Config::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(cfg.retention, Duration::days(30));
        assert_eq!(cfg.poll_window, Duration::hours(6));
    }

    #[test]
    fn outlets_are_one_based_on_input() {
        let pairs = with_base(&[
            ("POWERSTRIP_URL", "192.168.0.100"),
            ("POWERSTRIP_USER", "admin"),
            ("POWERSTRIP_PASS", "1234"),
            ("PUMP_OUTLET", "1"),
            ("AERATOR_OUTLET", "2"),
        ]);
        let strip = Config::from_lookup(lookup(&pairs)).expect("config").powerstrip.expect("strip");
        assert_eq!(strip.url, "https://192.168.0.100");
        assert_eq!(strip.pump_outlet, OutletId(0));
        assert_eq!(strip.aerator_outlet, OutletId(1));
        assert_eq!(strip.settle, std::time::Duration::from_secs(1));

        let pairs = with_base(&[("POWERSTRIP_URL", "192.168.0.100"), ("PUMP_OUTLET", "0"), ("AERATOR_OUTLET", "2")]);
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.contains("PUMP_OUTLET"));

        let pairs = with_base(&[("POWERSTRIP_URL", "192.168.0.100"), ("PUMP_OUTLET", "1")]);
        assert!(Config::from_lookup(lookup(&pairs)).unwrap_err().contains("AERATOR_OUTLET"));

        let pairs = with_base(&[
            ("POWERSTRIP_URL", "192.168.0.100"),
            ("PUMP_OUTLET", "1"),
            ("AERATOR_OUTLET", "2"),
            ("OUTLET_SETTLE_SECS", "1e300"),
        ]);
        assert!(Config::from_lookup(lookup(&pairs)).unwrap_err().contains("OUTLET_SETTLE_SECS"));
    }

    #[test]
    fn powerstrip_can_be_disabled() {
        for url in ["none", "NONE", "0"] {
            let pairs = with_base(&[("POWERSTRIP_URL", url)]);
            assert!(Config::from_lookup(lookup(&pairs)).expect("config").powerstrip.is_none());
        }
    }

    #[test]
    fn smtp_needs_recipients() {
        let pairs = with_base(&[("SMTP_SERVER", "smtp.example.org"), ("EMAILS", " , ")]);
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.contains("EMAILS"));

        let pairs = with_base(&[
            ("SMTP_SERVER", "smtp.example.org"),
            ("SMTP_USER", "alerts@example.org"),
            ("EMAILS", "a@example.org, b@example.org"),
        ]);
        let email = Config::from_lookup(lookup(&pairs)).expect("config").email.expect("email");
        assert_eq!(email.recipients, vec!["a@example.org", "b@example.org"]);
        assert_eq!(email.username.as_deref(), Some("alerts@example.org"));
        assert_eq!(email.password, None);
    }

    #[test]
    fn from_env_reads_the_process_environment() {
        // Only this test touches these variables.
        unsafe {
            std::env::set_var("DASHBOARD_URL", "http://localhost:8000");
            std::env::set_var("DATASET", "mvco");
            std::env::set_var("INSTRUMENT", "IFCB010");
            std::env::set_var("THRESHOLD", "1000");
        }
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.dashboard_url, "http://localhost:8000");
        assert_eq!(cfg.threshold, Some(1000.0));
    }
}
