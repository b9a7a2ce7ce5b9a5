//! Journal quality metric store.
//!
//! Backed by an operator-supplied delimited table (a Scimago SJR export or
//! the normalised table written by `metrics import`). Loaded once at startup
//! and read-only afterwards. Journal names are normalised before lookup so
//! that provider strings like "Nature Medicine." match "NATURE MEDICINE".

use crate::error::{PaperError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// One journal's quality metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEntry {
    /// Journal title as it appears in the table
    pub journal: String,
    /// Numeric quality score (SJR)
    pub score: f64,
    /// Best quartile band ("Q1".."Q4")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quartile: Option<String>,
    /// Year the score applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// ISSNs, hyphen-free and upper-case
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issns: Vec<String>,
    /// Subject areas
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<String>,
}

/// Outcome of reading a table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportStats {
    pub rows: usize,
    pub imported: usize,
    pub skipped: usize,
}

/// In-memory journal lookup
#[derive(Debug, Clone, Default)]
pub struct MetricStore {
    by_name: HashMap<String, MetricEntry>,
    by_issn: HashMap<String, String>,
}

/// Lowercase, map `&` to "and", replace punctuation with spaces and collapse
/// whitespace.
pub fn normalize_journal(name: &str) -> String {
    name.to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip hyphens/spaces from an ISSN; `None` unless 8 characters remain
pub fn normalize_issn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    (cleaned.len() == 8).then_some(cleaned)
}

/// Parse a score that may use a decimal comma ("1,234" → 1.234)
fn parse_score(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let value = if raw.contains(',') && !raw.contains('.') {
        raw.replace(',', ".").parse::<f64>().ok()?
    } else {
        raw.parse::<f64>().ok()?
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Pick the delimiter that occurs most often in the header line
fn detect_delimiter(header: &str) -> u8 {
    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|d| {
            let count = header.bytes().filter(|b| b == d).count();
            // ties resolve towards ';' (Scimago's default)
            (count, *d == b';')
        })
        .unwrap_or(b';')
}

/// Column positions resolved from the header row
struct Columns {
    title: usize,
    score: usize,
    quartile: Option<usize>,
    issn: Option<usize>,
    areas: Option<usize>,
    year: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let title = find(&["title", "journal"])
            .ok_or_else(|| PaperError::Validation("metric table has no Title column".to_string()))?;
        let score = find(&["sjr", "score"])
            .ok_or_else(|| PaperError::Validation("metric table has no SJR column".to_string()))?;
        Ok(Self {
            title,
            score,
            quartile: find(&["sjr best quartile", "quartile"]),
            issn: find(&["issn", "issns"]),
            areas: find(&["areas", "area"]),
            year: find(&["year"]),
        })
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table at `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Metric table not found, quality filtering disabled");
            return Ok(Self::new());
        }
        let file = fs::File::open(path)?;
        let (store, stats) = Self::from_reader(file, None)?;
        info!(
            path = %path.display(),
            journals = store.len(),
            skipped = stats.skipped,
            "Loaded metric table"
        );
        Ok(store)
    }

    /// Parse a delimited table
    ///
    /// # Arguments
    ///
    /// * `reader` - Table contents (SJR export or normalised table)
    /// * `default_year` - Year assigned to rows without a Year column
    pub fn from_reader<R: Read>(mut reader: R, default_year: Option<i32>) -> Result<(Self, ImportStats)> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let text = text.trim_start_matches('\u{feff}');

        let header_line = text.lines().next().unwrap_or_default();
        let delimiter = detect_delimiter(header_line);
        debug!(delimiter = %(delimiter as char).escape_default(), "Detected metric table delimiter");

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(text.as_bytes());

        let columns = Columns::resolve(csv_reader.headers()?)?;
        let mut store = Self::new();
        let mut stats = ImportStats::default();

        for row in csv_reader.records() {
            stats.rows += 1;
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable metric row");
                    stats.skipped += 1;
                    continue;
                }
            };
            match entry_from_row(&row, &columns, default_year) {
                Some(entry) => {
                    store.insert(entry);
                    stats.imported += 1;
                }
                None => stats.skipped += 1,
            }
        }

        Ok((store, stats))
    }

    /// Read an SJR export and return the normalised store
    pub fn import_file(path: &Path, year: Option<i32>) -> Result<(Self, ImportStats)> {
        let file = fs::File::open(path)?;
        let (store, stats) = Self::from_reader(file, year)?;
        info!(
            path = %path.display(),
            rows = stats.rows,
            imported = stats.imported,
            skipped = stats.skipped,
            "Imported metric table"
        );
        Ok((store, stats))
    }

    /// Insert an entry. For a journal already present, the later year wins.
    pub fn insert(&mut self, entry: MetricEntry) {
        let key = normalize_journal(&entry.journal);
        if key.is_empty() {
            return;
        }
        if let Some(existing) = self.by_name.get(&key) {
            if existing.year.unwrap_or(i32::MIN) >= entry.year.unwrap_or(i32::MIN) {
                return;
            }
        }
        for issn in &entry.issns {
            self.by_issn.insert(issn.clone(), key.clone());
        }
        self.by_name.insert(key, entry);
    }

    /// Look up a journal by name
    pub fn lookup(&self, journal: &str) -> Option<&MetricEntry> {
        self.by_name.get(&normalize_journal(journal))
    }

    /// Look up a journal by ISSN (hyphen-insensitive)
    pub fn lookup_issn(&self, issn: &str) -> Option<&MetricEntry> {
        let key = self.by_issn.get(&normalize_issn(issn)?)?;
        self.by_name.get(key)
    }

    /// Name first, then ISSN
    pub fn lookup_any(&self, journal: Option<&str>, issn: Option<&str>) -> Option<&MetricEntry> {
        journal
            .and_then(|j| self.lookup(j))
            .or_else(|| issn.and_then(|i| self.lookup_issn(i)))
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Highest-scoring journals, optionally restricted to a subject area
    pub fn top(&self, limit: usize, area: Option<&str>) -> Vec<&MetricEntry> {
        let area = area.map(str::to_lowercase);
        let mut entries: Vec<&MetricEntry> = self
            .by_name
            .values()
            .filter(|e| match &area {
                Some(a) => e.areas.iter().any(|x| x.to_lowercase().contains(a.as_str())),
                None => true,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.journal.cmp(&b.journal))
        });
        entries.truncate(limit);
        entries
    }

    /// Write the normalised table (comma-delimited) to `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["journal", "issn", "score", "quartile", "year", "areas"])?;

        let mut entries: Vec<&MetricEntry> = self.by_name.values().collect();
        entries.sort_by(|a, b| a.journal.cmp(&b.journal));
        for e in entries {
            writer.write_record([
                e.journal.clone(),
                e.issns.join(" "),
                e.score.to_string(),
                e.quartile.clone().unwrap_or_default(),
                e.year.map(|y| y.to_string()).unwrap_or_default(),
                e.areas.join("; "),
            ])?;
        }
        writer.flush()?;
        info!(path = %path.display(), journals = self.len(), "Wrote metric table");
        Ok(())
    }
}

fn entry_from_row(row: &csv::StringRecord, columns: &Columns, default_year: Option<i32>) -> Option<MetricEntry> {
    let field = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(str::trim).filter(|s| !s.is_empty());

    let journal = field(Some(columns.title))?.to_string();
    let score = parse_score(field(Some(columns.score))?)?;
    let quartile = field(columns.quartile)
        .filter(|q| q.starts_with('Q'))
        .map(str::to_string);
    let year = match field(columns.year) {
        Some(y) => Some(y.parse::<i32>().ok()?),
        None => default_year,
    };
    let issns = field(columns.issn)
        .map(|raw| {
            raw.split([',', ' '])
                .filter_map(normalize_issn)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let areas = field(columns.areas)
        .map(|raw| {
            raw.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Some(MetricEntry {
        journal,
        score,
        quartile,
        year,
        issns,
        areas,
    })
}

/// Check if an entry meets a minimum score
///
/// # Arguments
///
/// * `entry` - The journal's entry, if any
/// * `threshold` - Minimum score
pub fn passes_threshold(entry: Option<&MetricEntry>, threshold: f64) -> bool {
    entry.map(|e| e.score >= threshold).unwrap_or(false)
}

/// Summary statistics over quality scores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl QualitySummary {
    /// `None` when there are no scores
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Some(Self {
            count,
            mean: sorted.iter().sum::<f64>() / count as f64,
            median,
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SJR_SAMPLE: &str = "Rank;Sourceid;Title;Type;Issn;SJR;SJR Best Quartile;H index;Areas\n\
1;28773;\"Ca-A Cancer Journal for Clinicians\";journal;\"15424863, 00079235\";62,937;Q1;168;Medicine\n\
2;19434;\"Nature Reviews Drug Discovery\";journal;\"14741776, 14741784\";21,309;Q1;300;\"Chemistry; Pharmacology\"\n\
3;1111;\"Broken Row Journal\";journal;\"12345678\";n/a;Q2;10;Medicine\n\
4;2222;\"Journal of Minor Results\";journal;\"87654321\";1,05;Q3;12;Medicine\n";

    fn sample_store() -> MetricStore {
        let (store, _) = MetricStore::from_reader(SJR_SAMPLE.as_bytes(), Some(2023)).expect("parse");
        store
    }

    #[test]
    fn test_normalize_journal() {
        assert_eq!(normalize_journal("Nature Medicine."), "nature medicine");
        assert_eq!(
            normalize_journal("IEEE Trans. on Pattern Analysis & Machine Intelligence"),
            "ieee trans on pattern analysis and machine intelligence"
        );
        assert_eq!(normalize_journal("  "), "");
    }

    #[test]
    fn test_import_sjr_export() {
        let (store, stats) = MetricStore::from_reader(SJR_SAMPLE.as_bytes(), Some(2023)).expect("parse");
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.imported, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.len(), 3);

        let entry = store.lookup("CA: A Cancer Journal for Clinicians").expect("entry");
        assert_eq!(entry.score, 62.937);
        assert_eq!(entry.quartile.as_deref(), Some("Q1"));
        assert_eq!(entry.year, Some(2023));
        assert_eq!(entry.issns, vec!["15424863", "00079235"]);
    }

    #[test]
    fn test_lookup_by_issn() {
        let store = sample_store();
        let entry = store.lookup_issn("1474-1776").expect("issn");
        assert_eq!(entry.journal, "Nature Reviews Drug Discovery");
        assert!(store.lookup_issn("0000-0000").is_none());
        assert!(store.lookup_any(Some("Unknown"), Some("8765-4321")).is_some());
    }

    #[test]
    fn test_top_by_area() {
        let store = sample_store();
        let top = store.top(10, None);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].journal, "Ca-A Cancer Journal for Clinicians");

        let chem = store.top(10, Some("pharmacology"));
        assert_eq!(chem.len(), 1);
        assert_eq!(store.top(1, Some("medicine")).len(), 1);
    }

    #[test]
    fn test_later_year_wins() {
        let table = "Title,SJR,Year\nJournal A,1.0,2021\nJournal A,2.0,2023\nJournal A,3.0,2022\n";
        let (store, stats) = MetricStore::from_reader(table.as_bytes(), None).expect("parse");
        assert_eq!(stats.imported, 3);
        let entry = store.lookup("journal a").expect("entry");
        assert_eq!(entry.score, 2.0);
        assert_eq!(entry.year, Some(2023));
    }

    #[test]
    fn test_missing_columns_rejected() {
        let table = "Name;Value\nA;1\n";
        assert!(matches!(
            MetricStore::from_reader(table.as_bytes(), None),
            Err(PaperError::Validation(_))
        ));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sjr.csv");
        sample_store().write(&path).expect("write");

        let loaded = MetricStore::load(&path).expect("load");
        assert_eq!(loaded.len(), 3);
        let entry = loaded.lookup("journal of minor results").expect("entry");
        assert_eq!(entry.score, 1.05);
        assert_eq!(entry.quartile.as_deref(), Some("Q3"));
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetricStore::load(&dir.path().join("absent.csv")).expect("load");
        assert!(store.is_empty());
        assert!(store.lookup("Nature").is_none());
    }

    #[test]
    fn test_passes_threshold() {
        let store = sample_store();
        assert!(passes_threshold(store.lookup("Nature Reviews Drug Discovery"), 5.0));
        assert!(!passes_threshold(store.lookup("Journal of Minor Results"), 2.0));
        assert!(!passes_threshold(None, 0.5));
    }

    #[test]
    fn test_quality_summary() {
        assert!(QualitySummary::from_scores(&[]).is_none());
        let s = QualitySummary::from_scores(&[3.0, 1.0, 2.0, 6.0]).expect("summary");
        assert_eq!(s.count, 4);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.mean, 3.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 6.0);
    }
}
