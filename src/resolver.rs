//! PDF resolution.
//!
//! For one record, tries an ordered list of acquisition strategies until one
//! stores a PDF:
//!
//! 1. [`Strategy::Locator`]: Unpaywall lookup by DOI
//! 2. [`Strategy::Mirror`]: PubMed Central copy by PMCID (or PMID via the id converter)
//! 3. [`Strategy::DirectScan`]: first candidate URL that points at a document
//! 4. [`Strategy::ProxyFetch`]: candidate URL rewritten through the institutional proxy
//!
//! "Not available" and transient failures both move on to the next strategy
//! and are only logged at debug level. Nothing is retried within a run.

use crate::config::{Config, Endpoints, InstitutionalProxy, USER_AGENT};
use crate::download::{existing_pdf, fetch_pdf, pdf_filename};
use crate::error::{PaperError, Result};
use crate::models::{PaperRecord, Provenance, ResolvedPdf};
use crate::ratelimit::{RateLimiter, SourceLimits};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upper bound on Unpaywall PDF locations tried for one DOI
const MAX_LOCATOR_URLS: usize = 3;

/// One acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Open-access locator (Unpaywall)
    Locator,
    /// Repository mirror (PubMed Central)
    Mirror,
    /// First document-looking candidate URL
    DirectScan,
    /// Candidate URL through the institutional proxy
    ProxyFetch,
}

impl Strategy {
    /// Provenance tag recorded on success
    pub fn provenance(&self) -> Provenance {
        match self {
            Strategy::Locator => Provenance::Unpaywall,
            Strategy::Mirror => Provenance::Pmc,
            Strategy::DirectScan => Provenance::DirectLink,
            Strategy::ProxyFetch => Provenance::InstitutionalProxy,
        }
    }

    /// Whether the record carries what this strategy needs
    pub fn applies(&self, record: &PaperRecord) -> bool {
        let ids = &record.identifiers;
        match self {
            Strategy::Locator => ids.doi.is_some(),
            Strategy::Mirror => ids.pmcid.is_some() || ids.pmid.is_some(),
            Strategy::DirectScan => record.urls.iter().any(|u| looks_like_pdf_url(u)),
            Strategy::ProxyFetch => !record.urls.is_empty(),
        }
    }

    /// Try this strategy; `Ok(true)` means a PDF now sits at `dest`
    async fn attempt(&self, resolver: &Resolver, record: &PaperRecord, dest: &Path) -> Result<bool> {
        match self {
            Strategy::Locator => resolver.try_locator(record, dest).await,
            Strategy::Mirror => resolver.try_mirror(record, dest).await,
            Strategy::DirectScan => resolver.try_direct(record, dest).await,
            Strategy::ProxyFetch => resolver.try_proxy(record, dest).await,
        }
    }
}

/// URL path that suggests a document rather than a landing page
pub fn looks_like_pdf_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            let path = parsed.path().to_ascii_lowercase();
            path.ends_with(".pdf") || path.contains("/pdf/") || path.ends_with("/pdf")
        }
        Err(_) => false,
    }
}

/// Candidate URL handed to the proxy: DOI or PubMed link first
pub fn proxy_target(record: &PaperRecord) -> Option<&str> {
    record
        .urls
        .iter()
        .find(|u| {
            url::Url::parse(u)
                .ok()
                .and_then(|p| p.host_str().map(|h| h.ends_with("doi.org") || h.contains("pubmed")))
                .unwrap_or(false)
        })
        .or_else(|| record.urls.first())
        .map(String::as_str)
}

/// `{proxy}/{url}`, or a direct append when the prefix already ends in `=` or `/`
pub fn proxied_url(proxy: &str, target: &str) -> String {
    if proxy.ends_with('=') || proxy.ends_with('/') {
        format!("{}{}", proxy, target)
    } else {
        format!("{}/{}", proxy, target)
    }
}

/// Resolves records to local PDFs
pub struct Resolver {
    client: reqwest::Client,
    endpoints: Endpoints,
    contact_email: String,
    proxy: Option<InstitutionalProxy>,
    limits: SourceLimits,
    strategies: Vec<Strategy>,
    pdf_dir: PathBuf,
}

impl Resolver {
    /// # Arguments
    ///
    /// * `config` - Selects strategies and endpoints
    /// * `limits` - Shared per-source limiters
    /// * `pdf_dir` - Directory receiving downloaded files
    pub fn new(config: &Config, limits: SourceLimits, pdf_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{} (mailto:{})", USER_AGENT, config.contact_email))
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| PaperError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let mut strategies = Vec::with_capacity(4);
        if config.enable_unpaywall {
            strategies.push(Strategy::Locator);
        }
        strategies.push(Strategy::Mirror);
        strategies.push(Strategy::DirectScan);
        if config.proxy.is_some() {
            strategies.push(Strategy::ProxyFetch);
        }

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            contact_email: config.contact_email.clone(),
            proxy: config.proxy.clone(),
            limits,
            strategies,
            pdf_dir,
        })
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Resolve one record; `None` when every strategy missed
    pub async fn resolve(&self, record: &PaperRecord) -> Option<ResolvedPdf> {
        let dest = self.pdf_dir.join(pdf_filename(record));

        if let Some(path) = existing_pdf(&dest).await {
            debug!(title = %short(&record.title), path = %path.display(), "Reusing existing file");
            return Some(ResolvedPdf {
                path,
                provenance: Provenance::ExistingFile,
            });
        }

        for strategy in &self.strategies {
            if !strategy.applies(record) {
                continue;
            }
            match strategy.attempt(self, record, &dest).await {
                Ok(true) => {
                    // A provenance tag is only ever paired with a real file
                    if let Some(path) = existing_pdf(&dest).await {
                        info!(
                            title = %short(&record.title),
                            provenance = %strategy.provenance(),
                            "PDF saved"
                        );
                        return Some(ResolvedPdf {
                            path,
                            provenance: strategy.provenance(),
                        });
                    }
                }
                Ok(false) => {
                    debug!(title = %short(&record.title), strategy = ?strategy, "Not available");
                }
                Err(e) => {
                    debug!(title = %short(&record.title), strategy = ?strategy, error = %e, "Strategy failed");
                }
            }
        }

        debug!(title = %short(&record.title), "No PDF found");
        None
    }

    async fn download(&self, limiter: &RateLimiter, request: reqwest::RequestBuilder, dest: &Path) -> Result<bool> {
        let _permit = limiter.acquire().await;
        fetch_pdf(request, dest).await.map(|_| true)
    }

    async fn try_locator(&self, record: &PaperRecord, dest: &Path) -> Result<bool> {
        let Some(doi) = record.identifiers.doi.as_deref() else {
            return Ok(false);
        };
        let url = format!(
            "{}/{}",
            self.endpoints.unpaywall.trim_end_matches('/'),
            doi
        );

        let response = {
            let _permit = self.limits.unpaywall.acquire().await;
            self.client
                .get(&url)
                .query(&[("email", self.contact_email.as_str())])
                .send()
                .await?
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(PaperError::Api {
                code: response.status().as_u16(),
                message: "Unpaywall lookup failed".to_string(),
            });
        }
        let data: UnpaywallResponse = response.json().await?;
        let candidates = data.pdf_urls();
        if candidates.is_empty() {
            return Ok(false);
        }

        for pdf_url in candidates.iter().take(MAX_LOCATOR_URLS) {
            match self.download(&self.limits.web, self.client.get(pdf_url), dest).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => debug!(url = %pdf_url, error = %e, "Unpaywall location failed"),
            }
        }
        Ok(false)
    }

    async fn try_mirror(&self, record: &PaperRecord, dest: &Path) -> Result<bool> {
        let pmcid = match &record.identifiers.pmcid {
            Some(id) => id.clone(),
            None => match &record.identifiers.pmid {
                Some(pmid) => match self.lookup_pmcid(pmid).await? {
                    Some(id) => id,
                    None => return Ok(false),
                },
                None => return Ok(false),
            },
        };

        let url = format!(
            "{}/{}/pdf/",
            self.endpoints.pmc_articles.trim_end_matches('/'),
            pmcid
        );
        self.download(&self.limits.pmc, self.client.get(&url), dest).await
    }

    /// PMID → PMCID through the PMC id converter
    async fn lookup_pmcid(&self, pmid: &str) -> Result<Option<String>> {
        let response = {
            let _permit = self.limits.pmc.acquire().await;
            self.client
                .get(&self.endpoints.pmc_idconv)
                .query(&[
                    ("ids", pmid),
                    ("format", "json"),
                    ("tool", "rustpapers"),
                    ("email", self.contact_email.as_str()),
                ])
                .send()
                .await?
        };
        if !response.status().is_success() {
            return Err(PaperError::Api {
                code: response.status().as_u16(),
                message: "PMC id converter failed".to_string(),
            });
        }
        let data: IdconvResponse = response.json().await?;
        Ok(data
            .records
            .into_iter()
            .find_map(|r| r.pmcid)
            .filter(|id| !id.is_empty()))
    }

    async fn try_direct(&self, record: &PaperRecord, dest: &Path) -> Result<bool> {
        let Some(url) = record.urls.iter().find(|u| looks_like_pdf_url(u)) else {
            return Ok(false);
        };
        self.download(&self.limits.web, self.client.get(url), dest).await
    }

    async fn try_proxy(&self, record: &PaperRecord, dest: &Path) -> Result<bool> {
        let (Some(proxy), Some(target)) = (self.proxy.as_ref(), proxy_target(record)) else {
            return Ok(false);
        };
        let url = proxied_url(&proxy.url, target);
        let mut request = self.client.get(&url);
        if let Some(user) = &proxy.username {
            request = request.basic_auth(user, proxy.password.as_deref());
        }
        self.download(&self.limits.web, request, dest).await
    }
}

fn short(title: &str) -> String {
    title.chars().take(60).collect()
}

// === Resolver API Response Types ===

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    best_oa_location: Option<OaLocation>,
    #[serde(default)]
    oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    #[serde(default)]
    url_for_pdf: Option<String>,
}

impl UnpaywallResponse {
    /// Distinct PDF URLs, best location first
    fn pdf_urls(&self) -> Vec<String> {
        if !self.is_oa {
            return Vec::new();
        }
        let mut urls: Vec<String> = Vec::new();
        let all = self.best_oa_location.iter().chain(self.oa_locations.iter());
        for loc in all {
            if let Some(u) = loc.url_for_pdf.as_ref().filter(|u| !u.is_empty()) {
                if !urls.contains(u) {
                    urls.push(u.clone());
                }
            }
        }
        urls
    }
}

#[derive(Debug, Deserialize)]
struct IdconvResponse {
    #[serde(default)]
    records: Vec<IdconvRecord>,
}

#[derive(Debug, Deserialize)]
struct IdconvRecord {
    #[serde(default)]
    pmcid: Option<String>,
}
