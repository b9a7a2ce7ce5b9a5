//! Search adapters, one per bibliographic database.
//!
//! Every adapter maps its provider's native response into [`PaperRecord`]s.
//! Provider failures come back as errors; the orchestrator turns them into
//! per-database search failures and carries on with the other databases.

pub mod acm;
pub mod arxiv;
pub mod pubmed;

use crate::config::{Config, USER_AGENT};
use crate::error::{PaperError, Result};
use crate::models::{Database, PaperRecord, SearchQuery};
use crate::ratelimit::{RateLimiter, SourceLimits};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use acm::AcmAdapter;
pub use arxiv::ArxivAdapter;
pub use pubmed::PubmedAdapter;

/// Attempts per request when the provider answers 429/503
const MAX_RETRIES: u32 = 3;

/// A searchable bibliographic database
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Database this adapter serves
    fn database(&self) -> Database;

    /// Run `query` and return at most `max_results` records
    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<PaperRecord>>;
}

/// Build the shared HTTP client
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("{} (mailto:{})", USER_AGENT, config.contact_email))
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| PaperError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// One adapter per requested database, in request order
pub fn build_adapters(
    config: &Config,
    client: &reqwest::Client,
    limits: &SourceLimits,
    databases: &[Database],
) -> Vec<Arc<dyn SearchAdapter>> {
    databases
        .iter()
        .map(|db| -> Arc<dyn SearchAdapter> {
            match db {
                Database::Arxiv => Arc::new(ArxivAdapter::new(
                    client.clone(),
                    &config.endpoints.arxiv_api,
                    limits.arxiv.clone(),
                )),
                Database::Pubmed => Arc::new(PubmedAdapter::new(
                    client.clone(),
                    config,
                    limits.eutils.clone(),
                )),
                Database::Acm => Arc::new(AcmAdapter::new(
                    client.clone(),
                    config,
                    limits.crossref.clone(),
                )),
            }
        })
        .collect()
}

/// Send a request built by `build`, pacing through `limiter` and backing off
/// on 429/503.
pub(crate) async fn send_with_retry<F>(limiter: &RateLimiter, build: F) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut backoff = Duration::from_millis(500);

    for attempt in 0..MAX_RETRIES {
        let response = {
            let _permit = limiter.acquire().await;
            build().send().await?
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE;
        if !retryable {
            return Err(PaperError::Api {
                code: status.as_u16(),
                message: format!("{} returned {}", limiter.name(), status),
            });
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        if attempt + 1 == MAX_RETRIES {
            return Err(PaperError::RateLimited(retry_after.unwrap_or(backoff.as_secs().max(1))));
        }

        let wait = retry_after
            .map(Duration::from_secs)
            .unwrap_or(backoff)
            .max(backoff)
            .min(Duration::from_secs(30));
        warn!(
            source = limiter.name(),
            attempt = attempt + 1,
            wait_ms = wait.as_millis() as u64,
            "Rate limited, waiting"
        );
        tokio::time::sleep(wait).await;
        backoff *= 2;
    }

    Err(PaperError::RateLimited(backoff.as_secs()))
}

/// Collapse runs of whitespace (titles and abstracts span lines in XML feeds)
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
