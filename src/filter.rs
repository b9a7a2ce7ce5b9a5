//! Result filtering.
//!
//! Narrows the merged record list by journal quality, the open-access hint
//! and publication year. The three predicates are independent; quality runs
//! first because it is usually the most selective.

use crate::metrics::{passes_threshold, MetricStore};
use crate::models::{PaperRecord, Quality, SearchQuery};
use serde::Serialize;
use tracing::{debug, info, warn};

/// How many records each predicate removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DropCounts {
    pub quality: usize,
    pub open_access: usize,
    pub years: usize,
}

/// Surviving records plus advisories for the end user
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub records: Vec<PaperRecord>,
    pub dropped: DropCounts,
    pub notes: Vec<String>,
}

/// Attach the metric store's score to every record whose journal is known
pub fn annotate_quality(records: &mut [PaperRecord], store: &MetricStore) {
    for record in records.iter_mut() {
        if let Some(entry) = store.lookup_any(record.journal.as_deref(), record.issn.as_deref()) {
            record.quality = Some(Quality {
                score: entry.score,
                band: entry.quartile.clone(),
            });
        }
    }
}

/// Apply the query's predicates to `records`
///
/// # Arguments
///
/// * `records` - Deduplicated search results
/// * `query` - Supplies the threshold, open-access flag and year range
/// * `store` - Journal metrics; an empty store disables the quality predicate
pub fn apply(mut records: Vec<PaperRecord>, query: &SearchQuery, store: &MetricStore) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    let before = records.len();

    annotate_quality(&mut records, store);

    if let Some(threshold) = query.min_quality {
        if store.is_empty() {
            warn!(threshold, "Metric table is empty, quality filter skipped");
            outcome.notes.push(format!(
                "Quality filtering (minimum SJR {}) was skipped because no journal metric table is loaded. \
                 Import one with `rustpapers metrics import <scimago.csv>`.",
                threshold
            ));
        } else {
            let n = records.len();
            records.retain(|r| {
                passes_threshold(
                    store.lookup_any(r.journal.as_deref(), r.issn.as_deref()),
                    threshold,
                )
            });
            outcome.dropped.quality = n - records.len();
            debug!(threshold, dropped = outcome.dropped.quality, "Quality filter applied");
        }
    }

    if query.open_access_only {
        let n = records.len();
        records.retain(|r| r.open_access);
        outcome.dropped.open_access = n - records.len();
    }

    if !query.years.is_open() {
        let n = records.len();
        records.retain(|r| query.years.contains(r.year));
        outcome.dropped.years = n - records.len();
    }

    info!(
        before,
        after = records.len(),
        quality = outcome.dropped.quality,
        open_access = outcome.dropped.open_access,
        years = outcome.dropped.years,
        "Filtering complete"
    );
    outcome.records = records;
    outcome
}
