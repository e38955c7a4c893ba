//! Standalone HTTP client for the instrument dashboard API (read-only subset).
//!
//! - Blocking client using `ureq` (no async).
//! - Uses the wire models in `crate::models::dashboard`.
//! - Covers the three endpoints the refresh cycle needs: the bin list, single-bin
//!   metadata and the per-bin class score table.
//!
//! An empty bin list is a successful, empty result. Anything that prevented a
//! response from being read (DNS, refused connection, non-2xx status, undecodable
//! body) is a `DashboardError`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use std::io::Read;

use crate::models::dashboard::*;

#[derive(Debug)]
pub enum DashboardError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Csv(csv::Error),
    Parse(String),
}

impl core::fmt::Display for DashboardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DashboardError::Transport(s) => write!(f, "transport error: {}", s),
            DashboardError::Http { status, message } => write!(f, "http {}: {}", status, message),
            DashboardError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
            DashboardError::Csv(e) => write!(f, "csv error: {}", e),
            DashboardError::Parse(s) => write!(f, "parse error: {}", s),
        }
    }
}

impl std::error::Error for DashboardError {}

impl From<serde_path_to_error::Error<serde_json::Error>> for DashboardError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        DashboardError::Json(value)
    }
}

impl From<csv::Error> for DashboardError {
    fn from(value: csv::Error) -> Self {
        DashboardError::Csv(value)
    }
}

impl From<ureq::Error> for DashboardError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => DashboardError::Http {
                status,
                message: String::from("<no body>"),
            },
            other => DashboardError::Transport(other.to_string()),
        }
    }
}

/// The remote source of bins. `DashboardClient` is the production
/// implementation; the refresh service only sees this trait.
pub trait BinSource {
    fn list_bins(
        &self,
        dataset: &str,
        instrument: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<BinListing>, DashboardError>;

    fn bin_metadata(&self, bin_id: &BinId) -> Result<BinMeta, DashboardError>;

    fn class_scores(&self, dataset: &str, bin_id: &BinId) -> Result<ClassScores, DashboardError>;
}

pub struct DashboardClient {
    agent: ureq::Agent,
    base_url: String,
}

impl DashboardClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        DashboardClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn get(&self, path: &str, accept: &str, query: &[(&str, String)]) -> Result<ureq::Body, DashboardError> {
        let url = self.url(path);
        let mut req = self.agent.get(&url).header("Accept", accept);
        for (k, v) in query {
            req = req.query(*k, v);
        }

        let res = req.call()?;
        let status = res.status();
        if status.is_success() {
            return Ok(res.into_body());
        }
        let message = res
            .into_body()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err(DashboardError::Http {
            status: status.as_u16(),
            message,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, DashboardError> {
        let body = self.get(path, "application/json", query)?;
        let mut de = serde_json::Deserializer::from_reader(body.into_reader());
        Ok(serde_path_to_error::deserialize(&mut de)?)
    }

    pub fn get_bin_list(
        &self,
        dataset: &str,
        instrument: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BinList, DashboardError> {
        let mut q = vec![
            ("dataset", dataset.to_string()),
            ("instrument", instrument.to_string()),
            ("start_date", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("skip_filter", "exclude".to_string()),
        ];
        if let Some(end) = end {
            q.push(("end_date", end.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        self.get_json("/api/list_bins", &q)
    }

    pub fn get_bin_meta(&self, bin_id: &BinId) -> Result<BinMeta, DashboardError> {
        self.get_json(
            &format!("/api/bin/{}", bin_id.0),
            &[("include_coordinates", "false".to_string())],
        )
    }

    pub fn get_class_scores(&self, dataset: &str, bin_id: &BinId) -> Result<ClassScores, DashboardError> {
        let body = self.get(&format!("/{}/{}_class_scores.csv", dataset, bin_id.0), "text/csv", &[])?;
        parse_class_scores(body.into_reader())
    }
}

impl BinSource for DashboardClient {
    fn list_bins(
        &self,
        dataset: &str,
        instrument: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<BinListing>, DashboardError> {
        Ok(self.get_bin_list(dataset, instrument, start, end)?.data)
    }

    fn bin_metadata(&self, bin_id: &BinId) -> Result<BinMeta, DashboardError> {
        self.get_bin_meta(bin_id)
    }

    fn class_scores(&self, dataset: &str, bin_id: &BinId) -> Result<ClassScores, DashboardError> {
        self.get_class_scores(dataset, bin_id)
    }
}

/// Parse a `pid,<class>,<class>,...` score table into the winning class per row.
/// Ties go to the left-most column.
pub fn parse_class_scores<R: Read>(reader: R) -> Result<ClassScores, DashboardError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let pid_col = headers
        .iter()
        .position(|h| h == "pid")
        .ok_or_else(|| DashboardError::Parse("class scores missing pid column".to_string()))?;
    let classes: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != pid_col)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut scores = ClassScores::default();

    for record in rdr.records() {
        let record = record?;
        let pid = record
            .get(pid_col)
            .ok_or_else(|| DashboardError::Parse("row without pid".to_string()))?
            .to_string();

        let mut best: Option<(f64, &str)> = None;
        for (col, name) in &classes {
            let raw = record.get(*col).unwrap_or_default();
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|_| DashboardError::Parse(format!("row {}: bad score {:?} for {}", pid, raw, name)))?;
            match best {
                Some((best_value, _)) if value <= best_value => {}
                _ => best = Some((value, name.as_str())),
            }
        }

        if let Some((_, label)) = best {
            scores.winners.insert(pid, label.to_string());
        }
    }

    Ok(scores)
}
