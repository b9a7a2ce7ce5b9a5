//! arXiv search via the Atom query API.
//!
//! Results are paged 100 at a time. arXiv asks clients to leave three
//! seconds between calls; the shared limiter enforces that. Every arXiv
//! paper is open access.

use super::{normalize_whitespace, send_with_retry, SearchAdapter};
use crate::error::{PaperError, Result};
use crate::models::{Database, PaperRecord, SearchQuery, YearRange};
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use chrono::Datelike;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::sync::Arc;
use tracing::{debug, info};

const PAGE_SIZE: usize = 100;

/// Earliest submission year in arXiv
const FIRST_YEAR: i32 = 1991;

/// arXiv search adapter
pub struct ArxivAdapter {
    client: reqwest::Client,
    endpoint: String,
    limiter: Arc<RateLimiter>,
}

impl ArxivAdapter {
    pub fn new(client: reqwest::Client, endpoint: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            limiter,
        }
    }

    async fn fetch_page(&self, search_query: &str, start: usize, max: usize) -> Result<String> {
        let start = start.to_string();
        let max = max.to_string();
        let response = send_with_retry(&self.limiter, || {
            self.client.get(&self.endpoint).query(&[
                ("search_query", search_query),
                ("start", start.as_str()),
                ("max_results", max.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
        })
        .await?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SearchAdapter for ArxivAdapter {
    fn database(&self) -> Database {
        Database::Arxiv
    }

    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<PaperRecord>> {
        let search_query = build_search_query(query);
        debug!(search_query = %search_query, "arXiv query");

        let mut records = Vec::new();
        let mut start = 0;
        while records.len() < max_results {
            let want = (max_results - records.len()).min(PAGE_SIZE);
            let xml = self.fetch_page(&search_query, start, want).await?;
            let page = parse_feed(&xml)?;
            // Offsets count raw entries, including ones skipped as incomplete
            let got = page.entries;
            start += got;
            records.extend(page.records);

            let exhausted = page.total.map(|total| start >= total).unwrap_or(false);
            if got < want || exhausted {
                break;
            }
        }
        records.truncate(max_results);

        info!(database = "arxiv", count = records.len(), "Search complete");
        Ok(records)
    }
}

/// Render the query plus an optional `submittedDate` window
pub fn build_search_query(query: &SearchQuery) -> String {
    let base = query.expr.to_arxiv();
    match date_clause(&query.years) {
        Some(clause) => format!("({}) AND {}", base, clause),
        None => base,
    }
}

fn date_clause(years: &YearRange) -> Option<String> {
    if years.is_open() {
        return None;
    }
    let start = years.start.unwrap_or(FIRST_YEAR);
    let end = years.end.unwrap_or_else(|| chrono::Utc::now().year());
    Some(format!(
        "submittedDate:[{}01010000 TO {}12312359]",
        start, end
    ))
}

/// `http://arxiv.org/abs/2101.00001v2` → `2101.00001`
pub fn arxiv_id_from_url(url: &str) -> Option<String> {
    let tail = url.split("/abs/").nth(1)?.trim().trim_end_matches('/');
    if tail.is_empty() {
        return None;
    }
    Some(strip_version(tail).to_string())
}

/// `2101.00001v2` → `2101.00001`
fn strip_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos) if pos + 1 < id.len() && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => &id[..pos],
        _ => id,
    }
}

/// One parsed feed page
#[derive(Debug, Default)]
pub struct FeedPage {
    pub records: Vec<PaperRecord>,
    /// `<entry>` elements seen, kept or not
    pub entries: usize,
    /// `opensearch:totalResults`
    pub total: Option<usize>,
}

#[derive(Default)]
struct EntryBuilder {
    id_url: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    author_name: String,
    doi: Option<String>,
    journal_ref: Option<String>,
}

impl EntryBuilder {
    fn finish(self) -> Result<Option<PaperRecord>> {
        if self.id_url.contains("/api/errors") {
            return Err(PaperError::Api {
                code: 400,
                message: format!("arXiv rejected the query: {}", normalize_whitespace(&self.summary)),
            });
        }
        let Some(arxiv_id) = arxiv_id_from_url(&self.id_url) else {
            return Ok(None);
        };
        let title = normalize_whitespace(&self.title);
        if title.is_empty() {
            return Ok(None);
        }

        let mut record = PaperRecord::new(Database::Arxiv, title);
        record.authors = self.authors;
        record.abstract_text = normalize_whitespace(&self.summary);
        record.year = self.published.get(..4).and_then(|y| y.parse().ok());
        record.journal = self.journal_ref.map(|j| normalize_whitespace(&j));
        record.open_access = true;
        record.push_url(format!("https://arxiv.org/abs/{}", arxiv_id));
        record.push_url(format!("https://arxiv.org/pdf/{}", arxiv_id));
        if let Some(doi) = &self.doi {
            record.push_url(format!("https://doi.org/{}", doi));
        }
        record.identifiers.doi = self.doi;
        record.identifiers.arxiv_id = Some(arxiv_id);
        Ok(Some(record))
    }
}

/// Parse one Atom response page
pub fn parse_feed(xml: &str) -> Result<FeedPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = FeedPage::default();
    let mut current: Option<EntryBuilder> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"entry" {
                    current = Some(EntryBuilder::default());
                } else if name == b"author" {
                    if let Some(entry) = current.as_mut() {
                        entry.author_name.clear();
                    }
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(entry) = current.as_mut() {
                    apply_link(entry, e);
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| PaperError::Parse(format!("arXiv feed: {}", err)))?;
                let leaf = path.last().map(Vec::as_slice).unwrap_or_default();
                match current.as_mut() {
                    Some(entry) => match leaf {
                        b"id" => entry.id_url.push_str(&text),
                        b"title" => push_spaced(&mut entry.title, &text),
                        b"summary" => push_spaced(&mut entry.summary, &text),
                        b"published" => entry.published.push_str(&text),
                        b"name" => push_spaced(&mut entry.author_name, &text),
                        b"doi" => entry.doi = Some(text.trim().to_string()),
                        b"journal_ref" => entry.journal_ref = Some(text.to_string()),
                        _ => {}
                    },
                    None if leaf == b"totalResults" => {
                        page.total = text.trim().parse().ok();
                    }
                    None => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            page.entries += 1;
                            if let Some(record) = entry.finish()? {
                                page.records.push(record);
                            }
                        }
                    }
                    b"author" => {
                        if let Some(entry) = current.as_mut() {
                            let author = normalize_whitespace(&entry.author_name);
                            if !author.is_empty() {
                                entry.authors.push(author);
                            }
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PaperError::Parse(format!("arXiv feed: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

/// `<link title="pdf" href=".."/>` and friends; only the DOI link matters
/// since abs/pdf URLs are rebuilt from the id
fn apply_link(entry: &mut EntryBuilder, e: &BytesStart<'_>) {
    if e.local_name().as_ref() != b"link" {
        return;
    }
    let mut href = None;
    let mut title = None;
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().ok().map(|v| v.to_string());
        match attr.key.as_ref() {
            b"href" => href = value,
            b"title" => title = value,
            _ => {}
        }
    }
    if title.as_deref() == Some("doi") && entry.doi.is_none() {
        entry.doi = href.and_then(|h| crate::models::normalize_doi(&h));
    }
}

fn push_spaced(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=all:AI</title>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v2</id>
    <published>2021-01-01T00:00:00Z</published>
    <title>Attention Is
      All You Need &amp; More</title>
    <summary>  We propose a new
      architecture.</summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <arxiv:doi>10.1000/xyz123</arxiv:doi>
    <link href="http://arxiv.org/abs/2101.00001v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2101.00001v2" rel="related" type="application/pdf"/>
    <arxiv:journal_ref>NeurIPS 2021</arxiv:journal_ref>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-04T00:00:00Z</published>
    <title>String Theory</title>
    <summary>Old style identifier.</summary>
    <author><name>E. Witten</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let page = parse_feed(FEED).expect("parse");
        assert_eq!(page.total, Some(2));
        assert_eq!(page.entries, 2);
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.title, "Attention Is All You Need & More");
        assert_eq!(first.abstract_text, "We propose a new architecture.");
        assert_eq!(first.authors, vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(first.year, Some(2021));
        assert_eq!(first.identifiers.arxiv_id.as_deref(), Some("2101.00001"));
        assert_eq!(first.identifiers.doi.as_deref(), Some("10.1000/xyz123"));
        assert_eq!(first.journal.as_deref(), Some("NeurIPS 2021"));
        assert!(first.open_access);
        assert!(first.urls.contains(&"https://arxiv.org/pdf/2101.00001".to_string()));

        let second = &page.records[1];
        assert_eq!(second.identifiers.arxiv_id.as_deref(), Some("hep-th/9901001"));
        assert!(second.identifiers.doi.is_none());
    }

    #[test]
    fn test_untitled_entry_still_counted() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2101.00003v1</id>
    <title>   </title>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00004v1</id>
    <title>Kept</title>
  </entry>
</feed>"#;
        let page = parse_feed(xml).expect("parse");
        assert_eq!(page.entries, 2);
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_error_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        assert!(matches!(parse_feed(xml), Err(PaperError::Api { code: 400, .. })));
    }

    #[test]
    fn test_empty_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><opensearch:totalResults xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">0</opensearch:totalResults></feed>"#;
        let page = parse_feed(xml).expect("parse");
        assert!(page.records.is_empty());
        assert_eq!(page.total, Some(0));
    }

    #[test]
    fn test_build_search_query_with_years() {
        let query = SearchQuery::new("[graph] AND [\"neural network\"]")
            .expect("query")
            .with_years(YearRange::new(Some(2019), Some(2021)).expect("years"));
        assert_eq!(
            build_search_query(&query),
            "(all:graph AND all:\"neural network\") AND submittedDate:[201901010000 TO 202112312359]"
        );

        let open = SearchQuery::new("[AI]").expect("query");
        assert_eq!(build_search_query(&open), "all:AI");
    }

    #[test]
    fn test_arxiv_id_from_url() {
        assert_eq!(arxiv_id_from_url("http://arxiv.org/abs/2301.12345v3").as_deref(), Some("2301.12345"));
        assert_eq!(arxiv_id_from_url("http://arxiv.org/abs/cs/0601001").as_deref(), Some("cs/0601001"));
        assert_eq!(arxiv_id_from_url("http://example.org/2301.12345"), None);
    }
}
