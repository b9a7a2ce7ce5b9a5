//! ACM Digital Library search through Crossref.
//!
//! ACM does not offer a public search API, so the adapter asks Crossref for
//! works under ACM's DOI prefix (10.1145). Crossref has no boolean syntax;
//! the positive query terms are sent as free text. Results carry the
//! publisher's full-text links, and a Creative Commons license marks the
//! paper as open access.

use super::{normalize_whitespace, send_with_retry, SearchAdapter};
use crate::config::Config;
use crate::error::{PaperError, Result};
use crate::models::{normalize_doi, Database, PaperRecord, SearchQuery};
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// ACM's Crossref DOI prefix
const ACM_PREFIX: &str = "10.1145";

/// Crossref's maximum `rows`
const PAGE_SIZE: usize = 100;

/// ACM search adapter (Crossref-backed)
pub struct AcmAdapter {
    client: reqwest::Client,
    endpoint: String,
    mailto: String,
    limiter: Arc<RateLimiter>,
}

impl AcmAdapter {
    pub fn new(client: reqwest::Client, config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            endpoint: config.endpoints.crossref.clone(),
            mailto: config.contact_email.clone(),
            limiter,
        }
    }

    async fn fetch_page(&self, params: &[(&'static str, String)]) -> Result<CrossrefMessage> {
        let response =
            send_with_retry(&self.limiter, || self.client.get(&self.endpoint).query(params)).await?;

        if let Some(limit) = response.headers().get("X-Rate-Limit-Limit") {
            debug!(limit = ?limit, "Crossref rate limit");
        }

        let data: CrossrefResponse = response.json().await?;
        Ok(data.message)
    }
}

#[async_trait]
impl SearchAdapter for AcmAdapter {
    fn database(&self) -> Database {
        Database::Acm
    }

    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<PaperRecord>> {
        let text = query.expr.to_free_text();
        if text.trim().is_empty() {
            return Err(PaperError::Query("no positive terms to search ACM with".to_string()));
        }

        let mut records = Vec::new();
        let mut offset = 0;
        while records.len() < max_results {
            let rows = (max_results - records.len()).min(PAGE_SIZE);
            let params = build_params(query, &text, &self.mailto, rows, offset);
            let message = self.fetch_page(&params).await?;
            let got = message.items.len();
            offset += got;

            records.extend(message.items.into_iter().filter_map(parse_item));

            let exhausted = message.total_results.map(|t| offset >= t).unwrap_or(false);
            if got < rows || exhausted {
                break;
            }
        }
        records.truncate(max_results);

        info!(database = "acm", count = records.len(), "Search complete");
        Ok(records)
    }
}

/// Crossref `works` query parameters
fn build_params(
    query: &SearchQuery,
    text: &str,
    mailto: &str,
    rows: usize,
    offset: usize,
) -> Vec<(&'static str, String)> {
    let mut filters = vec![format!("prefix:{}", ACM_PREFIX)];
    if let Some(start) = query.years.start {
        filters.push(format!("from-pub-date:{}-01-01", start));
    }
    if let Some(end) = query.years.end {
        filters.push(format!("until-pub-date:{}-12-31", end));
    }

    vec![
        ("query.bibliographic", text.to_string()),
        ("filter", filters.join(",")),
        ("rows", rows.to_string()),
        ("offset", offset.to_string()),
        (
            "select",
            "DOI,title,author,container-title,ISSN,published,issued,abstract,link,license,URL"
                .to_string(),
        ),
        ("mailto", mailto.to_string()),
    ]
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(rename = "total-results", default)]
    total_results: Option<usize>,
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(rename = "DOI", default)]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(rename = "ISSN", default)]
    issn: Vec<String>,
    #[serde(default)]
    published: Option<CrossrefDate>,
    #[serde(default)]
    issued: Option<CrossrefDate>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    link: Vec<CrossrefLink>,
    #[serde(default)]
    license: Vec<CrossrefLicense>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: String,
    #[serde(default)]
    family: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first()?.first().copied().flatten()
    }
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL", default)]
    url: String,
    #[serde(rename = "content-type", default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLicense {
    #[serde(rename = "URL", default)]
    url: String,
}

/// Map one Crossref work to a record; works without DOI or title are dropped
fn parse_item(item: CrossrefItem) -> Option<PaperRecord> {
    let doi = normalize_doi(&item.doi)?;
    let title = item
        .title
        .first()
        .map(|t| normalize_whitespace(&strip_html_tags(t)))
        .filter(|t| !t.is_empty())?;

    let mut record = PaperRecord::new(Database::Acm, title);
    record.authors = item
        .author
        .iter()
        .map(|a| match &a.name {
            Some(name) => name.trim().to_string(),
            None => format!("{} {}", a.given, a.family).trim().to_string(),
        })
        .filter(|s| !s.is_empty())
        .collect();
    record.year = item
        .published
        .as_ref()
        .and_then(CrossrefDate::year)
        .or_else(|| item.issued.as_ref().and_then(CrossrefDate::year));
    record.journal = item.container_title.into_iter().next();
    record.issn = item.issn.into_iter().next();
    record.abstract_text = item
        .abstract_text
        .map(|s| normalize_whitespace(&strip_html_tags(&s)))
        .unwrap_or_default();
    record.open_access = item
        .license
        .iter()
        .any(|l| l.url.contains("creativecommons.org"));

    record.push_url(format!("https://doi.org/{}", doi));
    for link in &item.link {
        let is_pdf = link
            .content_type
            .as_deref()
            .map(|c| c.contains("pdf"))
            .unwrap_or(false)
            || link.url.contains("/pdf/");
        if is_pdf {
            record.push_url(link.url.clone());
        }
    }
    if let Some(url) = item.url {
        record.push_url(url);
    }
    record.identifiers.doi = Some(doi);
    Some(record)
}

/// Strip JATS/HTML tags from text
fn strip_html_tags(text: &str) -> String {
    match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, " ").to_string(),
        Err(_) => text.to_string(),
    }
}
