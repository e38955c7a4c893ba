//! Wire models for the instrument dashboard API.
//!
//! Scope: types only. Requests live in `crate::client`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinId(pub String);

impl std::fmt::Display for BinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope returned by `/api/list_bins`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinList {
    #[serde(default)]
    pub data: Vec<BinListing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinListing {
    pub pid: BinId,
    pub sample_time: DateTime<Utc>,
    #[serde(default)]
    pub skip: Option<bool>,
}

/// `ml_analyzed` is usually delivered as text (`"5.068 ml"`), older
/// dashboards send a bare number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MlAnalyzed {
    Number(f64),
    Text(String),
}

impl MlAnalyzed {
    pub fn milliliters(&self) -> Option<f64> {
        let ml = match self {
            MlAnalyzed::Number(v) => Some(*v),
            MlAnalyzed::Text(s) => s.trim().trim_end_matches("ml").trim().parse::<f64>().ok(),
        };
        ml.filter(|v| v.is_finite())
    }
}

/// Subset of `/api/bin/{pid}` that we consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinMeta {
    pub ml_analyzed: Option<MlAnalyzed>,
}

/// Per-observation winning class of a bin's `_class_scores.csv`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassScores {
    /// observation pid -> top-scoring class label
    pub winners: BTreeMap<String, String>,
}

impl ClassScores {
    /// Number of observations whose top-scoring class is `taxon`.
    pub fn count_of(&self, taxon: &str) -> u32 {
        self.winners.values().filter(|label| label.as_str() == taxon).count() as u32
    }
}
