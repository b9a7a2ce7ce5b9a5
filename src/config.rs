//! Run configuration.
//!
//! A [`Config`] is built once per invocation (defaults, then `.env`, then the
//! process environment, then CLI overrides applied by the binary) and passed
//! by reference to every component. Nothing below reads the environment on
//! its own.

use crate::error::{PaperError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Contact address used when none is configured
pub const DEFAULT_CONTACT_EMAIL: &str = "paper-search@example.com";

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("rustpapers/", env!("CARGO_PKG_VERSION"));

/// External service base URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// arXiv Atom query API
    pub arxiv_api: String,
    /// NCBI E-utilities base (esearch.fcgi / efetch.fcgi live below it)
    pub eutils: String,
    /// PMC identifier converter
    pub pmc_idconv: String,
    /// PMC article pages (`{base}/{PMCID}/pdf/`)
    pub pmc_articles: String,
    /// Unpaywall v2 API
    pub unpaywall: String,
    /// Crossref works API
    pub crossref: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            arxiv_api: "https://export.arxiv.org/api/query".to_string(),
            eutils: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            pmc_idconv: "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/".to_string(),
            pmc_articles: "https://www.ncbi.nlm.nih.gov/pmc/articles".to_string(),
            unpaywall: "https://api.unpaywall.org/v2".to_string(),
            crossref: "https://api.crossref.org/works".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one base URL (mock servers)
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            arxiv_api: format!("{}/arxiv/api/query", base),
            eutils: format!("{}/eutils", base),
            pmc_idconv: format!("{}/pmc/idconv/", base),
            pmc_articles: format!("{}/pmc/articles", base),
            unpaywall: format!("{}/unpaywall/v2", base),
            crossref: format!("{}/crossref/works", base),
        }
    }
}

/// Institutional proxy (e.g. EZproxy) credentials
#[derive(Debug, Clone)]
pub struct InstitutionalProxy {
    /// Prefix placed before the target URL
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Immutable configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    /// Contact email for polite-pool APIs (NCBI, Unpaywall, Crossref)
    pub contact_email: String,
    /// NCBI API key; raises the E-utilities rate limit
    pub ncbi_api_key: Option<String>,
    /// Default minimum quality score (0 disables)
    pub min_quality: f64,
    /// Path of the operator-supplied journal metric table
    pub metric_table: PathBuf,
    /// Whether the open-access locator strategy runs
    pub enable_unpaywall: bool,
    pub proxy: Option<InstitutionalProxy>,
    /// Root under which run folders are created
    pub output_root: PathBuf,
    pub endpoints: Endpoints,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    /// Upper bound on concurrent PDF resolutions
    pub max_concurrent_downloads: usize,
    /// Minimum spacing between arXiv API calls
    pub arxiv_interval: Duration,
    /// Minimum spacing between Crossref API calls
    pub crossref_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contact_email: DEFAULT_CONTACT_EMAIL.to_string(),
            ncbi_api_key: None,
            min_quality: 0.0,
            metric_table: default_metric_table_path(),
            enable_unpaywall: true,
            proxy: None,
            output_root: PathBuf::from("papers"),
            endpoints: Endpoints::default(),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            max_concurrent_downloads: 4,
            arxiv_interval: Duration::from_secs(3),
            crossref_interval: Duration::from_millis(100),
        }
    }
}

/// Default metric table location: `<data dir>/rustpapers/sjr_metrics.csv`
pub fn default_metric_table_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("rustpapers").join("sjr_metrics.csv"))
        .unwrap_or_else(|| PathBuf::from("cache").join("sjr_metrics.csv"))
}

impl Config {
    /// Load `.env` (explicit path, else `config/.env`, else `./.env`) then
    /// read the process environment on top of the defaults.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self> {
        load_dotenv(env_file)?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; used by `from_env` and tests
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(email) = get("PAPERS_CONTACT_EMAIL").or_else(|| get("NCBI_EMAIL")) {
            config.contact_email = email;
        }
        config.ncbi_api_key = get("NCBI_API_KEY");

        if let Some(raw) = get("MIN_SJR_SCORE") {
            config.min_quality = raw.parse::<f64>().map_err(|_| {
                PaperError::Config(format!("MIN_SJR_SCORE must be a number, got '{}'", raw))
            })?;
        }
        if let Some(path) = get("SJR_TABLE_PATH") {
            config.metric_table = PathBuf::from(path);
        }
        if let Some(flag) = get("ENABLE_UNPAYWALL") {
            config.enable_unpaywall = parse_bool(&flag).ok_or_else(|| {
                PaperError::Config(format!("ENABLE_UNPAYWALL must be true/false, got '{}'", flag))
            })?;
        }
        if let Some(url) = get("INSTITUTIONAL_PROXY") {
            config.proxy = Some(InstitutionalProxy {
                url,
                username: get("INSTITUTION_USERNAME"),
                password: get("INSTITUTION_PASSWORD"),
            });
        }
        if let Some(dir) = get("PAPERS_OUTPUT_DIR") {
            config.output_root = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Configuration pointing every external call at `base_url`
    pub fn for_testing(base_url: &str) -> Self {
        Self {
            endpoints: Endpoints::rooted_at(base_url),
            request_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(5),
            arxiv_interval: Duration::ZERO,
            crossref_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.contact_email.contains('@') {
            return Err(PaperError::Config(format!(
                "contact email '{}' is not an email address",
                self.contact_email
            )));
        }
        if self.min_quality < 0.0 || !self.min_quality.is_finite() {
            return Err(PaperError::Config("minimum quality score must be >= 0".to_string()));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(PaperError::Config("download concurrency must be at least 1".to_string()));
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(&proxy.url).map_err(|e| {
                PaperError::Config(format!("invalid INSTITUTIONAL_PROXY '{}': {}", proxy.url, e))
            })?;
        }
        Ok(())
    }

    /// Minimum spacing between E-utilities calls (3 req/s, 10 with a key)
    pub fn pubmed_interval(&self) -> Duration {
        if self.ncbi_api_key.is_some() {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(340)
        }
    }

    /// Human-readable status with credentials masked
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Contact email: {}", self.contact_email),
            match &self.ncbi_api_key {
                Some(key) => format!("NCBI API key: configured ({})", mask(key)),
                None => "NCBI API key: not configured (3 requests/s)".to_string(),
            },
        ];
        if self.min_quality > 0.0 {
            lines.push(format!("Minimum SJR score: {}", self.min_quality));
        } else {
            lines.push("SJR filtering: disabled".to_string());
        }
        lines.push(format!("Metric table: {}", self.metric_table.display()));
        lines.push(format!(
            "Unpaywall: {}",
            if self.enable_unpaywall { "enabled" } else { "disabled" }
        ));
        lines.push(match &self.proxy {
            Some(p) => format!(
                "Institutional access: {} (user: {})",
                p.url,
                p.username.as_deref().unwrap_or("-")
            ),
            None => "Institutional access: not configured".to_string(),
        });
        lines.push(format!("Output root: {}", self.output_root.display()));
        lines
    }
}

fn load_dotenv(explicit: Option<&Path>) -> Result<()> {
    if let Some(path) = explicit {
        dotenvy::from_path(path)
            .map_err(|e| PaperError::Config(format!("cannot load {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded env file");
        return Ok(());
    }

    let candidate = Path::new("config").join(".env");
    if candidate.exists() {
        if let Err(e) = dotenvy::from_path(&candidate) {
            debug!(path = %candidate.display(), error = %e, "Ignoring unreadable env file");
        }
    } else if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
