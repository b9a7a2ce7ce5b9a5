//! Run report: the JSON handed back to the caller plus a plain-text notes
//! sidecar for the end user.

use crate::error::Result;
use crate::metrics::QualitySummary;
use crate::models::{Database, Identifiers, PaperRecord, Provenance, SearchQuery};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Characters of abstract kept in the report
pub const ABSTRACT_EXCERPT_CHARS: usize = 500;

/// File names inside a run folder
pub const RESULTS_FILE: &str = "results.json";
pub const NOTES_FILE: &str = "notes.txt";

/// One paper at the boundary
#[derive(Debug, Clone, Serialize)]
pub struct PaperEntry {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    #[serde(rename = "abstract")]
    pub abstract_excerpt: String,
    pub database: Database,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    pub identifiers: Identifiers,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_band: Option<String>,
}

impl From<&PaperRecord> for PaperEntry {
    fn from(record: &PaperRecord) -> Self {
        Self {
            title: record.title.clone(),
            authors: record.authors.clone(),
            year: record.year,
            abstract_excerpt: excerpt(&record.abstract_text, ABSTRACT_EXCERPT_CHARS),
            database: record.database,
            journal: record.journal.clone(),
            identifiers: record.identifiers.clone(),
            urls: record.urls.clone(),
            pdf_path: record.pdf_path().map(Path::to_path_buf),
            provenance: record.provenance(),
            quality_score: record.quality.as_ref().map(|q| q.score),
            quality_band: record.quality.as_ref().and_then(|q| q.band.clone()),
        }
    }
}

/// First `max` characters plus `...` when the text was cut
pub fn excerpt(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

/// Final report for one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: &'static str,
    pub query: String,
    pub total: usize,
    pub by_database: BTreeMap<Database, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_databases: Vec<Database>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_dir: Option<PathBuf>,
    pub pdfs_downloaded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_summary: Option<QualitySummary>,
    pub notes: Vec<String>,
    /// Titles no strategy could fetch
    pub unresolved: Vec<String>,
    pub papers: Vec<PaperEntry>,
}

impl RunReport {
    /// Assemble the report from the final record list
    ///
    /// # Arguments
    ///
    /// * `query` - The request, echoed back
    /// * `records` - Filtered, deduplicated, possibly resolved records
    /// * `failed` - Databases whose search failed
    /// * `notes` - Advisories gathered during the run
    /// * `resolution_ran` - Whether PDF resolution was attempted
    pub fn build(
        query: &SearchQuery,
        records: &[PaperRecord],
        failed: &[Database],
        mut notes: Vec<String>,
        resolution_ran: bool,
    ) -> Self {
        let mut by_database: BTreeMap<Database, usize> =
            query.databases.iter().map(|db| (*db, 0)).collect();
        for record in records {
            *by_database.entry(record.database).or_insert(0) += 1;
        }

        let pdfs_downloaded = records.iter().filter(|r| r.resolved().is_some()).count();
        let unresolved: Vec<String> = if resolution_ran {
            records
                .iter()
                .filter(|r| r.resolved().is_none())
                .map(|r| r.title.clone())
                .collect()
        } else {
            Vec::new()
        };

        if records.is_empty() {
            notes.push("No papers matched the query.".to_string());
        } else if resolution_ran {
            notes.push(format!(
                "PDF available for {} of {} papers.",
                pdfs_downloaded,
                records.len()
            ));
        } else {
            notes.push("PDF download was skipped.".to_string());
        }

        let scores: Vec<f64> = records
            .iter()
            .filter_map(|r| r.quality.as_ref().map(|q| q.score))
            .collect();

        Self {
            status: "success",
            query: query.text.clone(),
            total: records.len(),
            by_database,
            failed_databases: failed.to_vec(),
            output_dir: None,
            json_file: None,
            pdf_dir: None,
            pdfs_downloaded,
            quality_summary: QualitySummary::from_scores(&scores),
            notes,
            unresolved,
            papers: records.iter().map(PaperEntry::from).collect(),
        }
    }

    /// Record where the run's files live
    pub fn with_output(mut self, output_dir: &Path, pdf_dir: Option<&Path>) -> Self {
        self.json_file = Some(output_dir.join(RESULTS_FILE));
        self.output_dir = Some(output_dir.to_path_buf());
        self.pdf_dir = pdf_dir.map(Path::to_path_buf);
        self
    }

    /// Human-readable sidecar text
    pub fn notes_text(&self) -> String {
        let mut out = format!("Query: {}\nPapers: {}\n", self.query, self.total);
        for (db, count) in &self.by_database {
            out.push_str(&format!("  {}: {}\n", db.label(), count));
        }
        out.push('\n');
        for note in &self.notes {
            out.push_str(note);
            out.push('\n');
        }
        if !self.unresolved.is_empty() {
            out.push_str("\nCould not fetch:\n");
            for title in &self.unresolved {
                out.push_str(&format!("  - {}\n", title));
            }
        }
        out
    }

    /// Write `results.json` and `notes.txt` into the output folder, if set
    pub fn write_files(&self) -> Result<()> {
        let Some(dir) = &self.output_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let json_path = dir.join(RESULTS_FILE);
        std::fs::write(&json_path, serde_json::to_string_pretty(self)?)?;
        std::fs::write(dir.join(NOTES_FILE), self.notes_text())?;
        info!(path = %json_path.display(), "Report written");
        Ok(())
    }
}

/// JSON body printed for a fatal error
pub fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "error": message,
    })
}
