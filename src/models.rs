//! Core data model shared by every pipeline stage.
//!
//! A [`PaperRecord`] is created by a search adapter and then changed in place:
//! the filter may drop it or attach a quality score, and the resolver may
//! attach a downloaded file. Path and provenance live together in
//! [`ResolvedPdf`], so a record never has one without the other.

use crate::error::{PaperError, Result};
use crate::query::QueryExpr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Bibliographic databases with a search adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Arxiv,
    Pubmed,
    Acm,
}

impl Database {
    /// Every supported database, in default query order
    pub const ALL: [Database; 3] = [Database::Arxiv, Database::Pubmed, Database::Acm];

    /// Tag used in JSON and on the command line
    pub fn tag(&self) -> &'static str {
        match self {
            Database::Arxiv => "arxiv",
            Database::Pubmed => "pubmed",
            Database::Acm => "acm",
        }
    }

    /// Human-facing name
    pub fn label(&self) -> &'static str {
        match self {
            Database::Arxiv => "arXiv",
            Database::Pubmed => "PubMed",
            Database::Acm => "ACM",
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Database {
    type Err = PaperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(Database::Arxiv),
            "pubmed" => Ok(Database::Pubmed),
            "acm" => Ok(Database::Acm),
            other => Err(PaperError::UnsupportedDatabase(other.to_string())),
        }
    }
}

/// Parse a comma-separated database list (e.g. "arxiv,pubmed")
pub fn parse_databases(list: &str) -> Result<Vec<Database>> {
    let mut out = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let db: Database = part.parse()?;
        if !out.contains(&db) {
            out.push(db);
        }
    }
    if out.is_empty() {
        return Err(PaperError::Validation("no database selected".to_string()));
    }
    Ok(out)
}

/// Identifiers a record may carry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identifiers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
}

impl Identifiers {
    /// Fill in identifiers this record lacks from another copy of the same paper
    pub fn absorb(&mut self, other: &Identifiers) {
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.pmid.is_none() {
            self.pmid = other.pmid.clone();
        }
        if self.pmcid.is_none() {
            self.pmcid = other.pmcid.clone();
        }
        if self.arxiv_id.is_none() {
            self.arxiv_id = other.arxiv_id.clone();
        }
    }
}

/// Strip resolver prefixes and lowercase a DOI
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|p| lower.strip_prefix(p))
        .unwrap_or(&lower)
        .trim();
    if stripped.starts_with("10.") {
        Some(stripped.to_string())
    } else {
        None
    }
}

/// Acquisition strategy that produced a downloaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "unpaywall")]
    Unpaywall,
    #[serde(rename = "pmc")]
    Pmc,
    #[serde(rename = "direct link")]
    DirectLink,
    #[serde(rename = "institutional proxy")]
    InstitutionalProxy,
    #[serde(rename = "existing file")]
    ExistingFile,
}

impl Provenance {
    pub fn tag(&self) -> &'static str {
        match self {
            Provenance::Unpaywall => "unpaywall",
            Provenance::Pmc => "pmc",
            Provenance::DirectLink => "direct link",
            Provenance::InstitutionalProxy => "institutional proxy",
            Provenance::ExistingFile => "existing file",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A downloaded file and the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPdf {
    pub path: PathBuf,
    pub provenance: Provenance,
}

/// Journal quality attached from the metric store
#[derive(Debug, Clone, PartialEq)]
pub struct Quality {
    pub score: f64,
    pub band: Option<String>,
}

/// One paper as returned by a search adapter
#[derive(Debug, Clone, PartialEq)]
pub struct PaperRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub abstract_text: String,
    pub database: Database,
    pub identifiers: Identifiers,
    /// Journal / venue name as reported by the provider
    pub journal: Option<String>,
    pub issn: Option<String>,
    pub urls: Vec<String>,
    /// Provider-reported hint that a free copy exists
    pub open_access: bool,
    pub quality: Option<Quality>,
    resolved: Option<ResolvedPdf>,
}

impl PaperRecord {
    pub fn new(database: Database, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            authors: Vec::new(),
            year: None,
            abstract_text: String::new(),
            database,
            identifiers: Identifiers::default(),
            journal: None,
            issn: None,
            urls: Vec::new(),
            open_access: false,
            quality: None,
            resolved: None,
        }
    }

    /// Deduplication key: DOI if present, else (database, native id), else title
    pub fn dedup_key(&self) -> String {
        if let Some(doi) = self.identifiers.doi.as_deref().and_then(normalize_doi) {
            return format!("doi:{}", doi);
        }
        let native = match self.database {
            Database::Arxiv => self.identifiers.arxiv_id.clone(),
            Database::Pubmed => self.identifiers.pmid.clone(),
            Database::Acm => None,
        };
        match native {
            Some(id) => format!("{}:{}", self.database, id),
            None => format!(
                "{}:title:{}",
                self.database,
                self.title.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
            ),
        }
    }

    /// Append a candidate URL unless already present
    pub fn push_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.urls.contains(&url) {
            self.urls.push(url);
        }
    }

    /// Merge a duplicate of this paper found elsewhere into this record
    pub fn merge_duplicate(&mut self, other: &PaperRecord) {
        for url in &other.urls {
            self.push_url(url.clone());
        }
        self.identifiers.absorb(&other.identifiers);
        self.open_access |= other.open_access;
        if self.journal.is_none() {
            self.journal = other.journal.clone();
        }
        if self.issn.is_none() {
            self.issn = other.issn.clone();
        }
        if self.abstract_text.is_empty() {
            self.abstract_text = other.abstract_text.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
    }

    pub fn set_resolved(&mut self, path: PathBuf, provenance: Provenance) {
        self.resolved = Some(ResolvedPdf { path, provenance });
    }

    pub fn resolved(&self) -> Option<&ResolvedPdf> {
        self.resolved.as_ref()
    }

    pub fn pdf_path(&self) -> Option<&Path> {
        self.resolved.as_ref().map(|r| r.path.as_path())
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.resolved.as_ref().map(|r| r.provenance)
    }
}

/// Inclusive publication-year window; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearRange {
    pub start: Option<i32>,
    pub end: Option<i32>,
}

impl YearRange {
    pub fn new(start: Option<i32>, end: Option<i32>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(PaperError::Validation(format!(
                    "year range start {} is after end {}",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Unknown years never fall inside a constrained range
    pub fn contains(&self, year: Option<i32>) -> bool {
        if self.is_open() {
            return true;
        }
        match year {
            Some(y) => self.start.map_or(true, |s| y >= s) && self.end.map_or(true, |e| y <= e),
            None => false,
        }
    }
}

impl FromStr for YearRange {
    type Err = PaperError;

    /// Accepts "2020", "2018-2022", "2018-" and "-2022"
    fn from_str(s: &str) -> Result<Self> {
        let parse_year = |p: &str| -> Result<Option<i32>> {
            let p = p.trim();
            if p.is_empty() {
                return Ok(None);
            }
            p.parse::<i32>()
                .map(Some)
                .map_err(|_| PaperError::Validation(format!("invalid year '{}'", p)))
        };

        match s.split_once('-') {
            Some((a, b)) => YearRange::new(parse_year(a)?, parse_year(b)?),
            None => {
                let y = parse_year(s)?;
                YearRange::new(y, y)
            }
        }
    }
}

/// One invocation's search request
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query text as given by the caller
    pub text: String,
    /// Parsed form of `text`
    pub expr: QueryExpr,
    /// Ceiling on the number of papers in the report
    pub limit: usize,
    /// Optional ceiling per database; defaults to `limit`
    pub limit_per_database: Option<usize>,
    pub years: YearRange,
    pub open_access_only: bool,
    pub min_quality: Option<f64>,
    pub databases: Vec<Database>,
}

impl SearchQuery {
    /// Parse the query text; malformed text is an input error
    pub fn new(text: &str) -> Result<Self> {
        let expr = crate::query::parse(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            expr,
            limit: 10,
            limit_per_database: None,
            years: YearRange::default(),
            open_access_only: false,
            min_quality: None,
            databases: Database::ALL.to_vec(),
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_limit_per_database(mut self, limit: Option<usize>) -> Self {
        self.limit_per_database = limit;
        self
    }

    pub fn with_years(mut self, years: YearRange) -> Self {
        self.years = years;
        self
    }

    pub fn with_open_access_only(mut self, flag: bool) -> Self {
        self.open_access_only = flag;
        self
    }

    /// A threshold of zero or less disables the quality filter
    pub fn with_min_quality(mut self, min: Option<f64>) -> Self {
        self.min_quality = min.filter(|m| *m > 0.0);
        self
    }

    pub fn with_databases(mut self, databases: Vec<Database>) -> Self {
        self.databases = databases;
        self
    }

    /// Number of results to request from each adapter
    pub fn per_database_cap(&self) -> usize {
        self.limit_per_database.unwrap_or(self.limit)
    }
}
