use crate::client::{BinSource, DashboardError};
use crate::config::Config;
use crate::store::cache::{SampleCache, SampleRecord};
use crate::utils::determine_poll_start;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, info, warn};
use std::path::Path;

/// What a refresh asks for and how long it keeps it.
#[derive(Debug, Clone)]
pub struct RefreshPlan<'a> {
    pub dataset: &'a str,
    pub instrument: &'a str,
    pub taxon: &'a str,
    pub poll_window: Duration,
    pub retention: Duration,
}

impl<'a> From<&'a Config> for RefreshPlan<'a> {
    fn from(cfg: &'a Config) -> Self {
        RefreshPlan {
            dataset: &cfg.dataset,
            instrument: &cfg.instrument,
            taxon: &cfg.taxon,
            poll_window: cfg.poll_window,
            retention: cfg.retention,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub listed: usize,
    pub added: usize,
    pub volumes_filled: usize,
    pub volumes_pending: usize,
    pub counts_filled: usize,
    pub counts_pending: usize,
    pub pruned: usize,
    pub total: usize,
}

/// Load the cache at `path`, bring it up to date and write it back.
pub fn run(
    path: &Path,
    source: &dyn BinSource,
    plan: &RefreshPlan<'_>,
    now: DateTime<Utc>,
) -> Result<SampleCache, String> {
    debug!("Refresh: loading cache {}", path.display());
    let mut cache = SampleCache::load(path).map_err(|e| format!("load cache failed: {}", e))?;

    let summary = update_cache(&mut cache, source, plan, now)?;
    info!(
        "Refresh: {} listed, {} new, volumes {} filled / {} pending, counts {} filled / {} pending, {} pruned, {} cached",
        summary.listed,
        summary.added,
        summary.volumes_filled,
        summary.volumes_pending,
        summary.counts_filled,
        summary.counts_pending,
        summary.pruned,
        summary.total
    );

    debug!("Refresh: saving cache {}", path.display());
    cache.save(path).map_err(|e| format!("save cache failed: {}", e))?;
    Ok(cache)
}

/// Merge newly listed bins, fill whatever derived columns are still missing,
/// then prune rows older than the retention window.
///
/// Only the bin list request is fatal. Per-bin failures leave that row pending
/// for the next cycle.
pub fn update_cache(
    cache: &mut SampleCache,
    source: &dyn BinSource,
    plan: &RefreshPlan<'_>,
    now: DateTime<Utc>,
) -> Result<RefreshSummary, String> {
    let mut summary = RefreshSummary::default();

    // 1) list recent bins
    let start = determine_poll_start(now, plan.poll_window);
    debug!(
        "Refresh: fetching bins since {} ({} {})",
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        plan.dataset,
        plan.instrument
    );
    let listings = source
        .list_bins(plan.dataset, plan.instrument, start, None)
        .map_err(|e| format!("list_bins({}, {}) failed: {}", plan.dataset, plan.instrument, e))?;
    summary.listed = listings.len();
    for listing in &listings {
        debug!("  {}", listing.pid);
    }

    // 2) merge; cached rows win
    summary.added = cache.merge(&listings);

    // 3) volumes
    for pid in cache.ids() {
        let Some(record) = cache.get(&pid) else { continue };
        if !record.needs_volume() {
            continue;
        }
        match fill_volume(record, source, now) {
            Ok(next) => {
                debug!("  {}: {} ml", pid, next.bin_ml.unwrap_or_default());
                cache.replace(next);
                summary.volumes_filled += 1;
            }
            Err(e) => {
                warn!("Refresh: volume for {} unavailable ({}); will retry next cycle", pid, e);
                summary.volumes_pending += 1;
            }
        }
    }

    // 4) taxon counts
    for pid in cache.ids() {
        let Some(record) = cache.get(&pid) else { continue };
        if !record.needs_count() {
            continue;
        }
        match fill_count(record, source, plan, now) {
            Ok(next) => {
                debug!(
                    "  {}: {} {} ({:.0} perL)",
                    pid,
                    next.taxon_count.unwrap_or_default(),
                    plan.taxon,
                    next.taxon_per_l.unwrap_or_default()
                );
                cache.replace(next);
                summary.counts_filled += 1;
            }
            Err(e) => {
                warn!("Refresh: class scores for {} unavailable ({}); will retry next cycle", pid, e);
                summary.counts_pending += 1;
            }
        }
    }

    // 5) retention
    summary.pruned = cache.prune_before(now - plan.retention);
    summary.total = cache.len();
    Ok(summary)
}

fn fill_volume(record: &SampleRecord, source: &dyn BinSource, now: DateTime<Utc>) -> Result<SampleRecord, DashboardError> {
    let meta = source.bin_metadata(&record.pid)?;
    let ml = meta
        .ml_analyzed
        .as_ref()
        .and_then(|m| m.milliliters())
        .ok_or_else(|| DashboardError::Parse(format!("{}: missing or unreadable ml_analyzed", record.pid)))?;
    if ml <= 0.0 {
        return Err(DashboardError::Parse(format!("{}: ml_analyzed is {}", record.pid, ml)));
    }
    Ok(record.with_volume(ml, now))
}

fn fill_count(
    record: &SampleRecord,
    source: &dyn BinSource,
    plan: &RefreshPlan<'_>,
    now: DateTime<Utc>,
) -> Result<SampleRecord, DashboardError> {
    let scores = source.class_scores(plan.dataset, &record.pid)?;
    Ok(record.with_count(scores.count_of(plan.taxon), now))
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::models::dashboard::{BinId, BinListing, BinMeta, ClassScores, MlAnalyzed};
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    /// Scripted dashboard. Bins missing from `volumes`/`scores` fail with 404.
    #[derive(Default)]
    pub struct FakeDashboard {
        pub listings: Vec<BinListing>,
        pub list_fails: bool,
        pub volumes: BTreeMap<String, String>,
        pub scores: BTreeMap<String, Vec<&'static str>>,
        pub meta_calls: RefCell<BTreeSet<String>>,
        pub score_calls: RefCell<BTreeSet<String>>,
        pub last_start: RefCell<Option<DateTime<Utc>>>,
    }

    fn not_found() -> DashboardError {
        DashboardError::Http {
            status: 404,
            message: "not found".into(),
        }
    }

    impl BinSource for FakeDashboard {
        fn list_bins(
            &self,
            _dataset: &str,
            _instrument: &str,
            start: DateTime<Utc>,
            _end: Option<DateTime<Utc>>,
        ) -> Result<Vec<BinListing>, DashboardError> {
            *self.last_start.borrow_mut() = Some(start);
            if self.list_fails {
                return Err(DashboardError::Transport("dns failure".into()));
            }
            Ok(self.listings.clone())
        }

        fn bin_metadata(&self, bin_id: &BinId) -> Result<BinMeta, DashboardError> {
            self.meta_calls.borrow_mut().insert(bin_id.0.clone());
            let ml = self.volumes.get(&bin_id.0).ok_or_else(not_found)?;
            Ok(BinMeta {
                ml_analyzed: Some(MlAnalyzed::Text(ml.clone())),
            })
        }

        fn class_scores(&self, _dataset: &str, bin_id: &BinId) -> Result<ClassScores, DashboardError> {
            self.score_calls.borrow_mut().insert(bin_id.0.clone());
            let labels = self.scores.get(&bin_id.0).ok_or_else(not_found)?;
            let mut scores = ClassScores::default();
            for (i, label) in labels.iter().enumerate() {
                scores.winners.insert(format!("{}_{:05}", bin_id.0, i + 1), label.to_string());
            }
            Ok(scores)
        }
    }
}
