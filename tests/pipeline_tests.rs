//! End-to-end runs of the orchestrator against mocked databases.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rustpapers::ratelimit::SourceLimits;
use rustpapers::sources::{build_http_client, ArxivAdapter, SearchAdapter};
use rustpapers::{
    Config, Database, MetricStore, Orchestrator, PaperError, PaperRecord, Provenance, RunOptions,
    SearchQuery, YearRange,
};

// =============================================================================
// Fixtures
// =============================================================================

const PDF_BODY: &[u8] = b"%PDF-1.5\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

fn arxiv_feed(entries: &[(&str, &str, Option<&str>)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
"#,
    );
    xml.push_str(&format!(
        "  <opensearch:totalResults>{}</opensearch:totalResults>\n",
        entries.len()
    ));
    for (id, title, doi) in entries {
        xml.push_str(&format!(
            "  <entry>\n    <id>http://arxiv.org/abs/{id}v1</id>\n    <published>2021-03-01T00:00:00Z</published>\n    <title>{title}</title>\n    <summary>Abstract of {title}.</summary>\n    <author><name>Grace Hopper</name></author>\n"
        ));
        if let Some(doi) = doi {
            xml.push_str(&format!("    <arxiv:doi>{doi}</arxiv:doi>\n"));
        }
        xml.push_str("  </entry>\n");
    }
    xml.push_str("</feed>\n");
    xml
}

fn pubmed_set(articles: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<PubmedArticleSet>\n");
    for (pmid, title, journal) in articles {
        xml.push_str(&format!(
            r#"  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">{pmid}</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><Year>2022</Year></PubDate></JournalIssue>
          <Title>{journal}</Title>
        </Journal>
        <ArticleTitle>{title}</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
"#
        ));
    }
    xml.push_str("</PubmedArticleSet>\n");
    xml
}

fn crossref_works(items: serde_json::Value) -> serde_json::Value {
    let total = items.as_array().map(Vec::len).unwrap_or(0);
    json!({
        "status": "ok",
        "message-type": "work-list",
        "message": {"total-results": total, "items": items}
    })
}

async fn mount_arxiv(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/arxiv/api/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/atom+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_pubmed(server: &MockServer, pmids: &[&str], efetch: String) {
    Mock::given(method("GET"))
        .and(path("/eutils/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "header": {"type": "esearch"},
            "esearchresult": {"count": pmids.len().to_string(), "idlist": pmids}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/eutils/efetch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/xml")
                .set_body_string(efetch),
        )
        .mount(server)
        .await;
}

async fn mount_crossref(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/crossref/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(crossref_works(items)))
        .mount(server)
        .await;
}

fn no_download(dir: &std::path::Path) -> RunOptions {
    RunOptions {
        download_pdfs: false,
        output_dir: Some(dir.to_path_buf()),
        write_files: true,
    }
}

fn metric_store(csv: &str) -> MetricStore {
    MetricStore::from_reader(csv.as_bytes(), Some(2023))
        .expect("metric table")
        .0
}

// =============================================================================
// Adapter paging
// =============================================================================

/// `count` entries numbered from `first`; the one at `untitled` has no title
fn arxiv_page(total: usize, first: usize, count: usize, untitled: Option<usize>) -> String {
    let mut xml = format!(
        "<feed xmlns=\"http://www.w3.org/2005/Atom\" xmlns:opensearch=\"http://a9.com/-/spec/opensearch/1.1/\">\n  <opensearch:totalResults>{}</opensearch:totalResults>\n",
        total
    );
    for n in first..first + count {
        let title = if Some(n) == untitled { String::new() } else { format!("Paper {}", n) };
        xml.push_str(&format!(
            "  <entry>\n    <id>http://arxiv.org/abs/2101.{:05}v1</id>\n    <title>{}</title>\n  </entry>\n",
            n, title
        ));
    }
    xml.push_str("</feed>\n");
    xml
}

#[tokio::test]
async fn test_arxiv_paging_counts_skipped_entries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/arxiv/api/query"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(arxiv_page(150, 0, 100, Some(42))))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/arxiv/api/query"))
        .and(query_param("start", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(arxiv_page(150, 100, 50, None)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = Config::for_testing(&mock_server.uri());
    let limits = SourceLimits::from_config(&config);
    let adapter = ArxivAdapter::new(
        build_http_client(&config).expect("client"),
        &config.endpoints.arxiv_api,
        limits.arxiv.clone(),
    );

    let query = SearchQuery::new("[AI]").expect("query");
    let records = adapter.search(&query, 150).await.expect("search");

    assert_eq!(records.len(), 149);
    assert_eq!(records[0].title, "Paper 0");
    assert_eq!(records[42].title, "Paper 43");
    assert_eq!(records[99].title, "Paper 100");
    let mut ids: Vec<_> = records.iter().filter_map(|r| r.identifiers.arxiv_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 149);
}

// =============================================================================
// Search and merge
// =============================================================================

#[tokio::test]
async fn test_no_results_anywhere_is_success() {
    let mock_server = MockServer::start().await;
    mount_arxiv(&mock_server, arxiv_feed(&[])).await;
    mount_pubmed(&mock_server, &[], pubmed_set(&[])).await;
    mount_crossref(&mock_server, json!([])).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[zzzqqqxxx]").expect("query");
    let options = RunOptions {
        output_dir: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };

    let report = orchestrator.run(&query, &options).await.expect("run");
    assert_eq!(report.status, "success");
    assert_eq!(report.total, 0);
    assert!(report.papers.is_empty());
    assert!(report.failed_databases.is_empty());
    assert_eq!(report.by_database.len(), 3);
    assert!(report.by_database.values().all(|n| *n == 0));
    assert!(report.notes.iter().any(|n| n == "No papers matched the query."));
    assert!(dir.path().join("results.json").exists());
    assert!(dir.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_duplicate_doi_across_arxiv_and_acm() {
    let mock_server = MockServer::start().await;
    mount_arxiv(
        &mock_server,
        arxiv_feed(&[("2103.00001", "Graph Learning at Scale", Some("10.1145/3000001"))]),
    )
    .await;
    mount_crossref(
        &mock_server,
        json!([{
            "DOI": "10.1145/3000001",
            "title": ["Graph Learning at Scale"],
            "container-title": ["Proceedings of KDD"],
            "published": {"date-parts": [[2021, 8]]},
            "link": [{"URL": "https://dl.acm.org/doi/pdf/10.1145/3000001", "content-type": "application/pdf"}]
        }]),
    )
    .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[graph] AND [learning]")
        .expect("query")
        .with_databases(vec![Database::Arxiv, Database::Acm]);

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    assert_eq!(report.total, 1);

    let paper = &report.papers[0];
    assert_eq!(paper.database, Database::Arxiv);
    assert_eq!(paper.identifiers.doi.as_deref(), Some("10.1145/3000001"));
    assert_eq!(paper.identifiers.arxiv_id.as_deref(), Some("2103.00001"));
    assert!(paper.urls.iter().any(|u| u == "https://arxiv.org/pdf/2103.00001"));
    assert!(paper.urls.iter().any(|u| u == "https://dl.acm.org/doi/pdf/10.1145/3000001"));
    assert_eq!(report.by_database[&Database::Arxiv], 1);
    assert_eq!(report.by_database[&Database::Acm], 0);
    assert!(report.notes.iter().any(|n| n == "PDF download was skipped."));
}

#[tokio::test]
async fn test_limit_caps_each_database_and_the_report() {
    let mock_server = MockServer::start().await;

    let ids: Vec<String> = (1..=7).map(|i| format!("2201.0000{}", i)).collect();
    let titles: Vec<String> = (1..=7).map(|i| format!("Paper number {}", i)).collect();
    let entries: Vec<(&str, &str, Option<&str>)> = ids
        .iter()
        .zip(&titles)
        .map(|(id, title)| (id.as_str(), title.as_str(), None))
        .collect();

    Mock::given(method("GET"))
        .and(path("/arxiv/api/query"))
        .and(query_param("max_results", "5"))
        .and(query_param("search_query", "all:AI"))
        .respond_with(ResponseTemplate::new(200).set_body_string(arxiv_feed(&entries)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[AI]")
        .expect("query")
        .with_limit(5)
        .with_databases(vec![Database::Arxiv]);

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    assert_eq!(report.total, 5);
    let mut seen: Vec<&str> = report.papers.iter().map(|p| p.title.as_str()).collect();
    seen.dedup();
    assert_eq!(seen.len(), 5);
    // no quality threshold, no quality annotation
    assert!(report.papers.iter().all(|p| p.quality_score.is_none()));
    assert!(report.quality_summary.is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_one_failing_database_is_reported_not_fatal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/arxiv/api/query"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    mount_pubmed(&mock_server, &[], pubmed_set(&[])).await;
    mount_crossref(
        &mock_server,
        json!([{"DOI": "10.1145/42", "title": ["Surviving paper"]}]),
    )
    .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[survival]").expect("query");

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    assert_eq!(report.status, "success");
    assert_eq!(report.total, 1);
    assert_eq!(report.failed_databases, vec![Database::Arxiv]);
    assert!(report.notes.iter().any(|n| n.contains("arXiv")));
}

#[tokio::test]
async fn test_all_databases_failing_is_fatal() {
    // Nothing mounted: every request gets a 404
    let mock_server = MockServer::start().await;
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[anything]").expect("query");

    let dir = tempfile::tempdir().expect("tempdir");
    let err = orchestrator
        .run(&query, &no_download(dir.path()))
        .await
        .expect_err("must fail");
    assert!(matches!(err, PaperError::AllSourcesFailed));
    assert_eq!(err.exit_code(), 2);
    assert!(!dir.path().join("results.json").exists());
}

#[tokio::test]
async fn test_zero_limit_is_rejected() {
    let mock_server = MockServer::start().await;
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[AI]").expect("query").with_limit(0);

    let err = orchestrator
        .run(&query, &RunOptions::default())
        .await
        .expect_err("must fail");
    assert!(matches!(err, PaperError::Validation(_)));
    assert!(mock_server.received_requests().await.unwrap_or_default().is_empty());
}

// =============================================================================
// Filtering
// =============================================================================

#[tokio::test]
async fn test_quality_threshold_drops_low_scoring_journal() {
    let mock_server = MockServer::start().await;
    mount_pubmed(
        &mock_server,
        &["101", "102"],
        pubmed_set(&[
            ("101", "Strong result.", "Journal of High Impact"),
            ("102", "Weak result.", "Journal of Low Impact"),
        ]),
    )
    .await;

    let store = metric_store("Title;SJR;SJR Best Quartile\nJournal of High Impact;3,0;Q1\nJournal of Low Impact;1,0;Q3\n");
    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), store).expect("orchestrator");
    let query = SearchQuery::new("[result]")
        .expect("query")
        .with_databases(vec![Database::Pubmed])
        .with_min_quality(Some(2.0));

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    assert_eq!(report.total, 1);
    let paper = &report.papers[0];
    assert_eq!(paper.title, "Strong result.");
    assert_eq!(paper.quality_score, Some(3.0));
    assert_eq!(paper.quality_band.as_deref(), Some("Q1"));
    assert_eq!(report.quality_summary.as_ref().map(|s| s.count), Some(1));
}

#[tokio::test]
async fn test_quality_threshold_without_table_keeps_everything() {
    let mock_server = MockServer::start().await;
    mount_pubmed(
        &mock_server,
        &["201", "202"],
        pubmed_set(&[
            ("201", "First.", "Journal A"),
            ("202", "Second.", "Journal B"),
        ]),
    )
    .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[anything]")
        .expect("query")
        .with_databases(vec![Database::Pubmed])
        .with_min_quality(Some(2.0));

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    assert_eq!(report.total, 2);
    // esearch order is kept
    assert_eq!(report.papers[0].identifiers.pmid.as_deref(), Some("201"));
    assert!(report.notes.iter().any(|n| n.contains("Quality filtering")));
}

/// Serves a fixed record list
struct StaticAdapter {
    database: Database,
    records: Vec<PaperRecord>,
}

#[async_trait]
impl SearchAdapter for StaticAdapter {
    fn database(&self) -> Database {
        self.database
    }

    async fn search(&self, _query: &SearchQuery, max_results: usize) -> rustpapers::Result<Vec<PaperRecord>> {
        Ok(self.records.iter().take(max_results).cloned().collect())
    }
}

fn dated(db: Database, title: &str, year: Option<i32>, open_access: bool) -> PaperRecord {
    let mut r = PaperRecord::new(db, title);
    r.year = year;
    r.open_access = open_access;
    r
}

#[tokio::test]
async fn test_year_and_open_access_filters_with_custom_adapters() {
    let mock_server = MockServer::start().await;
    let adapters: Vec<Arc<dyn SearchAdapter>> = vec![
        Arc::new(StaticAdapter {
            database: Database::Pubmed,
            records: vec![
                dated(Database::Pubmed, "In range, free", Some(2020), true),
                dated(Database::Pubmed, "In range, closed", Some(2021), false),
                dated(Database::Pubmed, "Too old", Some(2010), true),
            ],
        }),
        Arc::new(StaticAdapter {
            database: Database::Acm,
            records: vec![dated(Database::Acm, "Undated", None, true)],
        }),
    ];

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new())
        .expect("orchestrator")
        .with_adapters(adapters);
    let query = SearchQuery::new("[x]")
        .expect("query")
        .with_databases(vec![Database::Pubmed, Database::Acm])
        .with_years(YearRange::new(Some(2019), Some(2022)).expect("years"))
        .with_open_access_only(true);

    let report = orchestrator.run(&query, &no_download(dir.path())).await.expect("run");
    let titles: Vec<&str> = report.papers.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["In range, free"]);
    assert_eq!(report.by_database[&Database::Acm], 0);
}

#[tokio::test]
async fn test_unknown_database_adapter_missing() {
    let mock_server = MockServer::start().await;
    let orchestrator = Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new())
        .expect("orchestrator")
        .with_adapters(Vec::new());
    let query = SearchQuery::new("[x]").expect("query");

    let err = orchestrator.search_all(&query).await.expect_err("must fail");
    assert!(matches!(err, PaperError::UnsupportedDatabase(_)));
}

// =============================================================================
// Resolution inside a run
// =============================================================================

#[tokio::test]
async fn test_run_downloads_direct_link_pdf() {
    let mock_server = MockServer::start().await;
    let pdf_url = format!("{}/acm/pdf/3000777", mock_server.uri());
    mount_crossref(
        &mock_server,
        json!([
            {
                "DOI": "10.1145/3000777",
                "title": ["Downloadable paper"],
                "link": [{"URL": pdf_url, "content-type": "application/pdf"}]
            },
            {
                "DOI": "10.1145/3000778",
                "title": ["Paywalled paper"]
            }
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/acm/pdf/3000777"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(PDF_BODY),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator =
        Orchestrator::new(Config::for_testing(&mock_server.uri()), MetricStore::new()).expect("orchestrator");
    let query = SearchQuery::new("[paper]")
        .expect("query")
        .with_databases(vec![Database::Acm]);
    let options = RunOptions {
        output_dir: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };

    let report = orchestrator.run(&query, &options).await.expect("run");
    assert_eq!(report.total, 2);
    assert_eq!(report.pdfs_downloaded, 1);
    assert_eq!(report.pdf_dir.as_deref(), Some(dir.path().join("pdfs").as_path()));
    assert_eq!(report.unresolved, vec!["Paywalled paper"]);
    assert!(report.notes.iter().any(|n| n == "PDF available for 1 of 2 papers."));

    let downloaded = &report.papers[0];
    assert_eq!(downloaded.provenance, Some(Provenance::DirectLink));
    let pdf_path = downloaded.pdf_path.as_ref().expect("pdf path");
    assert_eq!(pdf_path, &dir.path().join("pdfs").join("10_1145_3000777.pdf"));
    assert_eq!(std::fs::read(pdf_path).expect("read"), PDF_BODY);

    // Every reported provenance is backed by a non-empty file
    for paper in &report.papers {
        match (&paper.provenance, &paper.pdf_path) {
            (Some(_), Some(p)) => assert!(std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false)),
            (None, None) => {}
            other => panic!("provenance and path disagree: {:?}", other),
        }
    }

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("results.json")).expect("read"),
    )
    .expect("json");
    assert_eq!(written["papers"][0]["provenance"], "direct link");
    assert_eq!(written["pdfs_downloaded"], 1);
}
