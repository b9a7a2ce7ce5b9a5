//! PubMed search via NCBI E-utilities.
//!
//! `esearch` (JSON) returns PMIDs for the rendered Entrez query, `efetch`
//! (XML) returns the article records. NCBI allows 3 requests/s without an
//! API key and 10 with one. A PMCID on a record means a free full-text copy
//! sits in PubMed Central, which is the open-access hint.

use super::{normalize_whitespace, send_with_retry, SearchAdapter};
use crate::config::Config;
use crate::error::{PaperError, Result};
use crate::models::{normalize_doi, Database, PaperRecord, SearchQuery, YearRange};
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tool name reported to NCBI
const TOOL: &str = "rustpapers";

/// PMIDs per efetch call
const FETCH_BATCH: usize = 200;

/// PubMed search adapter
pub struct PubmedAdapter {
    client: reqwest::Client,
    eutils: String,
    email: String,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl PubmedAdapter {
    pub fn new(client: reqwest::Client, config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            eutils: config.endpoints.eutils.trim_end_matches('/').to_string(),
            email: config.contact_email.clone(),
            api_key: config.ncbi_api_key.clone(),
            limiter,
        }
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("tool", TOOL.to_string()),
            ("email", self.email.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Search PubMed and return a list of PMIDs
    async fn esearch(&self, term: &str, max: usize) -> Result<Vec<String>> {
        let url = format!("{}/esearch.fcgi", self.eutils);
        let mut params = self.base_params();
        params.push(("term", term.to_string()));
        params.push(("retmax", max.to_string()));
        params.push(("retmode", "json".to_string()));
        params.push(("sort", "relevance".to_string()));

        let response = send_with_retry(&self.limiter, || self.client.get(&url).query(&params)).await?;
        let data: EsearchResponse = response.json().await?;

        if let Some(error) = data.esearchresult.error_list.and_then(|e| e.phrasesnotfound.first().cloned()) {
            debug!(phrase = %error, "PubMed could not match phrase");
        }
        debug!(count = data.esearchresult.idlist.len(), "PubMed esearch returned PMIDs");
        Ok(data.esearchresult.idlist)
    }

    /// Fetch article XML for PMIDs and parse it
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<PaperRecord>> {
        let url = format!("{}/efetch.fcgi", self.eutils);
        let mut records = Vec::with_capacity(pmids.len());

        for batch in pmids.chunks(FETCH_BATCH) {
            let mut params = self.base_params();
            params.push(("id", batch.join(",")));
            params.push(("retmode", "xml".to_string()));
            params.push(("rettype", "abstract".to_string()));

            let response = send_with_retry(&self.limiter, || self.client.get(&url).query(&params)).await?;
            let xml = response.text().await?;
            records.extend(parse_articles(&xml)?);
        }

        Ok(records)
    }
}

#[async_trait]
impl SearchAdapter for PubmedAdapter {
    fn database(&self) -> Database {
        Database::Pubmed
    }

    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<PaperRecord>> {
        let term = build_term(query);
        debug!(term = %term, "PubMed query");

        let pmids = self.esearch(&term, max_results).await?;
        if pmids.is_empty() {
            info!(database = "pubmed", count = 0, "Search complete");
            return Ok(Vec::new());
        }

        let mut records = self.efetch(&pmids).await?;
        // efetch does not promise esearch's relevance order
        records.sort_by_key(|r| {
            r.identifiers
                .pmid
                .as_ref()
                .and_then(|p| pmids.iter().position(|x| x == p))
                .unwrap_or(usize::MAX)
        });
        records.truncate(max_results);

        info!(database = "pubmed", count = records.len(), "Search complete");
        Ok(records)
    }
}

/// Entrez term with optional publication-date and free-full-text filters
pub fn build_term(query: &SearchQuery) -> String {
    let mut term = query.expr.to_pubmed();
    if let Some(dates) = date_filter(&query.years) {
        term = format!("({}) AND {}", term, dates);
    }
    if query.open_access_only {
        term.push_str(" AND (\"free full text\"[Filter])");
    }
    term
}

fn date_filter(years: &YearRange) -> Option<String> {
    if years.is_open() {
        return None;
    }
    let start = years.start.map(|y| y.to_string()).unwrap_or_else(|| "1800".to_string());
    let end = years.end.map(|y| y.to_string()).unwrap_or_else(|| "3000".to_string());
    Some(format!("({}:{}[Date - Publication])", start, end))
}

// === E-utilities Response Types ===

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "errorlist", default)]
    error_list: Option<EsearchErrors>,
}

#[derive(Debug, Deserialize)]
struct EsearchErrors {
    #[serde(default)]
    phrasesnotfound: Vec<String>,
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    abstract_parts: Vec<String>,
    authors: Vec<String>,
    last_name: String,
    fore_name: String,
    collective_name: String,
    journal: String,
    issn: Option<String>,
    year: Option<i32>,
    doi: Option<String>,
    pmcid: Option<String>,
}

impl ArticleBuilder {
    fn finish(self) -> Option<PaperRecord> {
        let pmid = self.pmid?;
        let title = normalize_whitespace(&self.title);
        if title.is_empty() {
            return None;
        }

        let mut record = PaperRecord::new(Database::Pubmed, title);
        record.authors = self.authors;
        record.abstract_text = normalize_whitespace(&self.abstract_parts.join(" "));
        record.year = self.year;
        record.journal = Some(normalize_whitespace(&self.journal)).filter(|j| !j.is_empty());
        record.issn = self.issn;
        record.open_access = self.pmcid.is_some();
        if let Some(doi) = &self.doi {
            record.push_url(format!("https://doi.org/{}", doi));
        }
        record.push_url(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid));
        record.identifiers.doi = self.doi;
        record.identifiers.pmcid = self.pmcid;
        record.identifiers.pmid = Some(pmid);
        Some(record)
    }

    fn close_author(&mut self) {
        let name = if !self.collective_name.is_empty() {
            normalize_whitespace(&self.collective_name)
        } else if self.fore_name.is_empty() {
            self.last_name.trim().to_string()
        } else {
            format!("{} {}", self.fore_name.trim(), self.last_name.trim())
        };
        if !name.is_empty() {
            self.authors.push(name);
        }
        self.last_name.clear();
        self.fore_name.clear();
        self.collective_name.clear();
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn first_year(text: &str) -> Option<i32> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 4)
        .and_then(|y| y.parse().ok())
}

/// Parse an efetch `PubmedArticleSet` document
pub fn parse_articles(xml: &str) -> Result<Vec<PaperRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut path: Vec<String> = Vec::new();
    // IdType / EIdType of the identifier element being read
    let mut id_type: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "PubmedArticle" => current = Some(ArticleBuilder::default()),
                    "ArticleId" => id_type = attr_value(e, b"IdType"),
                    "ELocationID" => id_type = attr_value(e, b"EIdType"),
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let Some(article) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let text = e
                    .unescape()
                    .map_err(|err| PaperError::Parse(format!("PubMed XML: {}", err)))?;
                apply_text(article, &path, id_type.as_deref(), &text);
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"PubmedArticle" => {
                        if let Some(record) = current.take().and_then(ArticleBuilder::finish) {
                            records.push(record);
                        }
                    }
                    b"Author" => {
                        if let Some(article) = current.as_mut() {
                            if path.iter().any(|p| p == "AuthorList") {
                                article.close_author();
                            }
                        }
                    }
                    b"ArticleId" | b"ELocationID" => id_type = None,
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PaperError::Parse(format!("PubMed XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn apply_text(article: &mut ArticleBuilder, path: &[String], id_type: Option<&str>, text: &str) {
    let leaf = path.last().map(String::as_str).unwrap_or_default();
    let parent = path
        .len()
        .checked_sub(2)
        .and_then(|i| path.get(i))
        .map(String::as_str)
        .unwrap_or_default();
    let inside = |name: &str| path.iter().any(|p| p == name);

    if inside("CommentsCorrectionsList") || inside("ReferenceList") {
        return;
    }

    if leaf == "PMID" && parent == "MedlineCitation" && article.pmid.is_none() {
        article.pmid = Some(text.trim().to_string());
    } else if inside("ArticleTitle") {
        if !article.title.is_empty() {
            article.title.push(' ');
        }
        article.title.push_str(text);
    } else if inside("AbstractText") {
        article.abstract_parts.push(text.to_string());
    } else if inside("Author") {
        match leaf {
            "LastName" => article.last_name.push_str(text),
            "ForeName" => article.fore_name.push_str(text),
            "CollectiveName" => article.collective_name.push_str(text),
            _ => {}
        }
    } else if leaf == "Title" && parent == "Journal" {
        article.journal.push_str(text);
    } else if leaf == "ISSN" && article.issn.is_none() {
        article.issn = Some(text.trim().to_string());
    } else if inside("PubDate") && (leaf == "Year" || leaf == "MedlineDate") {
        if article.year.is_none() {
            article.year = first_year(text);
        }
    } else if leaf == "ArticleId" || leaf == "ELocationID" {
        match id_type {
            Some("doi") if article.doi.is_none() => article.doi = normalize_doi(text),
            Some("pmc") if article.pmcid.is_none() => {
                let id = text.trim();
                article.pmcid = Some(if id.starts_with("PMC") {
                    id.to_string()
                } else {
                    format!("PMC{}", id)
                });
            }
            _ => {}
        }
    }
}
