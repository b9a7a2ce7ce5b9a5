//! Pipeline driver: search every requested database, merge duplicates,
//! filter, resolve PDFs and assemble the [`RunReport`].

use crate::config::Config;
use crate::error::{PaperError, Result};
use crate::filter;
use crate::metrics::MetricStore;
use crate::models::{Database, PaperRecord, SearchQuery};
use crate::ratelimit::SourceLimits;
use crate::report::RunReport;
use crate::resolver::Resolver;
use crate::sources::{build_adapters, build_http_client, SearchAdapter};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Per-run switches that do not belong to the query itself
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Attempt PDF resolution
    pub download_pdfs: bool,
    /// Run folder; a timestamped folder under the output root when `None`
    pub output_dir: Option<PathBuf>,
    /// Write `results.json` and `notes.txt`
    pub write_files: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            download_pdfs: true,
            output_dir: None,
            write_files: true,
        }
    }
}

/// Results gathered from the search adapters
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Merged, deduplicated records in database order
    pub records: Vec<PaperRecord>,
    pub failed: Vec<Database>,
    pub notes: Vec<String>,
}

/// Drives one search run
pub struct Orchestrator {
    config: Config,
    store: MetricStore,
    limits: SourceLimits,
    adapters: Vec<Arc<dyn SearchAdapter>>,
}

impl Orchestrator {
    /// Build with one adapter per supported database
    pub fn new(config: Config, store: MetricStore) -> Result<Self> {
        config.validate()?;
        let client = build_http_client(&config)?;
        let limits = SourceLimits::from_config(&config);
        let adapters = build_adapters(&config, &client, &limits, &Database::ALL);
        Ok(Self {
            config,
            store,
            limits,
            adapters,
        })
    }

    /// Replace the adapters (tests, alternative providers)
    pub fn with_adapters(mut self, adapters: Vec<Arc<dyn SearchAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Query every requested database concurrently.
    ///
    /// A failing database contributes zero records and a note. If every
    /// requested database fails the run is fatal.
    pub async fn search_all(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let mut selected: Vec<Arc<dyn SearchAdapter>> = Vec::new();
        for db in &query.databases {
            match self.adapters.iter().find(|a| a.database() == *db) {
                Some(adapter) => selected.push(adapter.clone()),
                None => return Err(PaperError::UnsupportedDatabase(db.to_string())),
            }
        }

        let cap = query.per_database_cap();
        info!(query = %query.text, databases = selected.len(), per_database = cap, "Starting search");

        let futures: Vec<_> = selected
            .iter()
            .map(|adapter| async move {
                let started = Instant::now();
                let result = adapter.search(query, cap).await;
                (adapter.database(), result, started.elapsed())
            })
            .collect();
        let results = join_all(futures).await;

        let mut outcome = SearchOutcome::default();
        let mut batches = Vec::with_capacity(results.len());
        for (db, result, elapsed) in results {
            match result {
                Ok(records) => {
                    info!(
                        database = %db,
                        count = records.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database searched"
                    );
                    batches.push(records);
                }
                Err(e) => {
                    let failure = PaperError::search(db, e);
                    warn!(error = %failure, "Search failed, continuing without it");
                    outcome.failed.push(db);
                    outcome
                        .notes
                        .push(format!("{} could not be searched; results exclude it.", db.label()));
                }
            }
        }

        if !selected.is_empty() && outcome.failed.len() == selected.len() {
            return Err(PaperError::AllSourcesFailed);
        }

        outcome.records = merge_duplicates(batches);
        Ok(outcome)
    }

    /// Resolve PDFs for `records` into `pdf_dir`, bounded by the configured
    /// download concurrency. Each task owns one record index.
    pub async fn resolve_all(&self, records: &mut [PaperRecord], pdf_dir: &Path) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(pdf_dir).await?;
        let resolver = Resolver::new(&self.config, self.limits.clone(), pdf_dir.to_path_buf())?;
        let resolver = &resolver;

        info!(count = records.len(), "Resolving PDFs");
        let outcomes: Vec<_> = stream::iter(records.iter().enumerate())
            .map(|(idx, record)| async move { (idx, resolver.resolve(record).await) })
            .buffer_unordered(self.config.max_concurrent_downloads)
            .collect()
            .await;

        for (idx, resolved) in outcomes {
            if let (Some(pdf), Some(record)) = (resolved, records.get_mut(idx)) {
                record.set_resolved(pdf.path, pdf.provenance);
            }
        }

        let found = records.iter().filter(|r| r.resolved().is_some()).count();
        info!(found, total = records.len(), "PDF resolution complete");
        Ok(())
    }

    /// Search → dedup → filter → limit → resolve → report
    pub async fn run(&self, query: &SearchQuery, options: &RunOptions) -> Result<RunReport> {
        if query.limit == 0 {
            return Err(PaperError::Validation("limit must be at least 1".to_string()));
        }

        let searched = self.search_all(query).await?;
        let mut notes = searched.notes;

        let filtered = filter::apply(searched.records, query, &self.store);
        notes.extend(filtered.notes);
        let mut records = filtered.records;
        records.truncate(query.limit);

        let output_dir = match &options.output_dir {
            Some(dir) => dir.clone(),
            None => timestamped_dir(&self.config.output_root),
        };
        let pdf_dir = output_dir.join("pdfs");

        if options.download_pdfs {
            self.resolve_all(&mut records, &pdf_dir).await?;
        }

        let report = RunReport::build(query, &records, &searched.failed, notes, options.download_pdfs)
            .with_output(&output_dir, options.download_pdfs.then_some(pdf_dir.as_path()));
        if options.write_files {
            report.write_files()?;
        }
        Ok(report)
    }
}

/// `<root>/search_YYYYmmdd_HHMMSS`
pub fn timestamped_dir(root: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    root.join(format!("search_{}", stamp))
}

/// Concatenate batches in order, keeping the first record per dedup key and
/// folding later duplicates into it
pub fn merge_duplicates(batches: Vec<Vec<PaperRecord>>) -> Vec<PaperRecord> {
    let mut merged: Vec<PaperRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in batches.into_iter().flatten() {
        // A record may be reachable under its DOI key and its native key
        let keys = alias_keys(&record);
        match keys.iter().find_map(|k| index.get(k).copied()) {
            Some(pos) => {
                merged[pos].merge_duplicate(&record);
                for k in alias_keys(&merged[pos]) {
                    index.entry(k).or_insert(pos);
                }
            }
            None => {
                let pos = merged.len();
                for k in keys {
                    index.entry(k).or_insert(pos);
                }
                merged.push(record);
            }
        }
    }

    merged
}

/// Every identifier key under which a record could be recognised
fn alias_keys(record: &PaperRecord) -> Vec<String> {
    let mut keys = vec![record.dedup_key()];
    let ids = &record.identifiers;
    if let Some(pmid) = &ids.pmid {
        keys.push(format!("pmid:{}", pmid));
    }
    if let Some(arxiv) = &ids.arxiv_id {
        keys.push(format!("arxiv:{}", arxiv));
    }
    keys.dedup();
    keys
}
