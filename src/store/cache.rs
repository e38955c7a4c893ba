//! Local sample cache: one CSV row per bin, keyed by bin id.
//!
//! Invariants
//! - A bin id appears at most once.
//! - `taxon_perL` is present exactly when both `bin_ml` and `taxon_count` are.
//! - Rows are written in sample-time order.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::dashboard::{BinId, BinListing};
use crate::store::files::{StoreError, csv_err, open_if_exists, write_csv_atomic};

/// Cells per liter from a count of cells found in `ml` milliliters.
pub fn concentration(count: Option<u32>, ml: Option<f64>) -> Option<f64> {
    match (count, ml) {
        (Some(count), Some(ml)) if ml > 0.0 => Some(1000.0 * count as f64 / ml),
        _ => None,
    }
}

/// Counts written by float-typed tabular tools come back as `3.0`.
fn whole_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let Some(value) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if value.is_nan() {
        return Ok(None);
    }
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(serde::de::Error::custom(format!("not a whole count: {}", value)));
    }
    Ok(Some(value as u32))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub pid: BinId,
    pub sample_time: DateTime<Utc>,
    pub bin_ml: Option<f64>,
    pub bin_added: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "whole_count")]
    pub taxon_count: Option<u32>,
    #[serde(rename = "taxon_perL")]
    pub taxon_per_l: Option<f64>,
    pub taxon_added: Option<DateTime<Utc>>,
}

impl SampleRecord {
    pub fn pending(listing: &BinListing) -> Self {
        SampleRecord {
            pid: listing.pid.clone(),
            sample_time: listing.sample_time,
            bin_ml: None,
            bin_added: None,
            taxon_count: None,
            taxon_per_l: None,
            taxon_added: None,
        }
    }

    pub fn needs_volume(&self) -> bool {
        self.bin_ml.is_none()
    }

    pub fn needs_count(&self) -> bool {
        self.bin_ml.is_some() && self.taxon_count.is_none()
    }

    pub fn with_volume(&self, ml: f64, fetched_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.bin_ml = Some(ml);
        next.bin_added = Some(fetched_at);
        next.taxon_per_l = concentration(next.taxon_count, next.bin_ml);
        next
    }

    pub fn with_count(&self, count: u32, derived_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.taxon_count = Some(count);
        next.taxon_per_l = concentration(next.taxon_count, next.bin_ml);
        next.taxon_added = Some(derived_at);
        next
    }

    fn order_key(&self) -> (DateTime<Utc>, &BinId) {
        (self.sample_time, &self.pid)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleCache {
    records: BTreeMap<BinId, SampleRecord>,
}

impl SampleCache {
    /// Load the cache; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let Some(file) = open_if_exists(path)? else {
            debug!("Cache: {} not found; one will be created", path.display());
            return Ok(SampleCache::default());
        };

        let mut cache = SampleCache::default();
        let mut rdr = csv::Reader::from_reader(file);
        for row in rdr.deserialize::<SampleRecord>() {
            let mut record = row.map_err(csv_err(path))?;
            record.taxon_per_l = concentration(record.taxon_count, record.bin_ml);
            cache.records.entry(record.pid.clone()).or_insert(record);
        }
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_csv_atomic(path, self.ordered())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, pid: &BinId) -> Option<&SampleRecord> {
        self.records.get(pid)
    }

    /// Records in sample-time order (bin id breaks ties).
    pub fn ordered(&self) -> Vec<&SampleRecord> {
        let mut rows: Vec<&SampleRecord> = self.records.values().collect();
        rows.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        rows
    }

    pub fn ids(&self) -> Vec<BinId> {
        self.ordered().into_iter().map(|r| r.pid.clone()).collect()
    }

    /// Left-biased merge: listings for ids already cached are ignored.
    /// Returns how many new rows were added.
    pub fn merge(&mut self, listings: &[BinListing]) -> usize {
        let mut added = 0;
        for listing in listings {
            if !self.records.contains_key(&listing.pid) {
                self.records
                    .insert(listing.pid.clone(), SampleRecord::pending(listing));
                added += 1;
            }
        }
        added
    }

    /// Replace the row for `record.pid`. Only used with rows derived from the
    /// cached one.
    pub fn replace(&mut self, record: SampleRecord) {
        self.records.insert(record.pid.clone(), record);
    }

    /// Drop rows sampled strictly before `cutoff`. Returns how many were dropped.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.sample_time >= cutoff);
        before - self.records.len()
    }

    /// The newest row that has a concentration.
    pub fn latest_with_concentration(&self) -> Option<&SampleRecord> {
        self.records
            .values()
            .filter(|r| r.taxon_per_l.is_some())
            .max_by(|a, b| a.order_key().cmp(&b.order_key()))
    }
}
