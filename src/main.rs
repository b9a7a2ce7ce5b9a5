//! rustpapers - multi-database paper search CLI
//!
//! Searches arXiv, PubMed and ACM, filters by journal quality, fetches
//! open-access PDFs and prints a JSON report on stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! rustpapers search "[cancer] AND [immunotherapy]" --limit 10 --min-quality 2.0
//! rustpapers search -q oncology.txt --no-pdf
//! rustpapers metrics import scimagojr_2024.csv --year 2024
//! rustpapers config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustpapers::models::parse_databases;
use rustpapers::query::{read_query_file, QUERIES_DIR};
use rustpapers::report::error_json;
use rustpapers::{Config, MetricStore, Orchestrator, PaperError, RunOptions, SearchQuery, YearRange};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Multi-database paper search with quality filtering and PDF retrieval
#[derive(Parser)]
#[command(name = "rustpapers")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Environment file to load (default: config/.env, then ./.env)
    #[arg(long, global = true, env = "PAPERS_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the databases and fetch available PDFs
    Search {
        /// Boolean query, e.g. "[AI] AND ([ethics] OR [policy])"
        #[arg(required_unless_present = "query_file")]
        query: Option<String>,

        /// Read the query from a file (looked up in ./queries/ first)
        #[arg(short = 'q', long, conflicts_with = "query")]
        query_file: Option<PathBuf>,

        /// Maximum number of papers in the report
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Maximum number of results requested from each database
        #[arg(long)]
        limit_per_db: Option<usize>,

        /// Publication years: "2020", "2018-2022", "2018-" or "-2022"
        #[arg(long)]
        years: Option<String>,

        /// Keep only papers with a free copy hint
        #[arg(long)]
        open_access: bool,

        /// Minimum journal quality (SJR) score; 0 disables
        #[arg(long)]
        min_quality: Option<f64>,

        /// Comma-separated databases
        #[arg(long, default_value = "arxiv,pubmed,acm")]
        databases: String,

        /// Skip PDF resolution
        #[arg(long)]
        no_pdf: bool,

        /// Run folder (default: <output root>/search_<timestamp>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Contact email for NCBI, Unpaywall and Crossref
        #[arg(long)]
        email: Option<String>,

        /// NCBI API key
        #[arg(long)]
        ncbi_api_key: Option<String>,

        /// Journal metric table
        #[arg(long)]
        metric_table: Option<PathBuf>,

        /// Disable the Unpaywall strategy
        #[arg(long)]
        no_unpaywall: bool,
    },

    /// Manage the journal metric table
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Import a Scimago (SJR) export as the metric table
    Import {
        /// SJR CSV export
        file: PathBuf,

        /// Year the scores apply to, for exports without a Year column
        #[arg(long)]
        year: Option<i32>,

        /// Destination (default: the configured table path)
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// List the highest-scoring journals
    Top {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Restrict to a subject area (substring match)
        #[arg(long)]
        area: Option<String>,
    },
    /// Look up one journal by name or ISSN
    Lookup {
        /// Journal name or ISSN
        journal: String,
    },
}

/// Run aborted by Ctrl-C
#[derive(Debug, thiserror::Error)]
#[error("interrupted by user")]
struct Interrupted;

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "Fatal error");
            println!("{}", error_json(&message));
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if e.chain().any(|c| c.downcast_ref::<Interrupted>().is_some()) {
        return 130;
    }
    e.chain()
        .find_map(|c| c.downcast_ref::<PaperError>())
        .map(|p| p.exit_code() as u8)
        .unwrap_or(1)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::from_env(cli.env_file.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Search {
            query,
            query_file,
            limit,
            limit_per_db,
            years,
            open_access,
            min_quality,
            databases,
            no_pdf,
            output,
            email,
            ncbi_api_key,
            metric_table,
            no_unpaywall,
        } => {
            let mut config = config;
            if let Some(email) = email {
                config.contact_email = email;
            }
            if ncbi_api_key.is_some() {
                config.ncbi_api_key = ncbi_api_key;
            }
            if let Some(path) = metric_table {
                config.metric_table = path;
            }
            if no_unpaywall {
                config.enable_unpaywall = false;
            }

            let query = match (query, query_file) {
                (Some(query), _) => query,
                (None, Some(file)) => read_query_file(&file, Path::new(QUERIES_DIR))?,
                (None, None) => {
                    return Err(PaperError::Query("provide a query or --query-file".to_string()).into())
                }
            };

            let search = SearchArgs {
                query,
                limit,
                limit_per_db,
                years,
                open_access,
                min_quality,
                databases,
            };
            let options = RunOptions {
                download_pdfs: !no_pdf,
                output_dir: output,
                write_files: true,
            };
            run_search(config, search, options).await
        }
        Commands::Metrics { action } => handle_metrics(&config, action),
        Commands::Config => {
            for line in config.status_lines() {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Search
// ============================================================================

struct SearchArgs {
    query: String,
    limit: usize,
    limit_per_db: Option<usize>,
    years: Option<String>,
    open_access: bool,
    min_quality: Option<f64>,
    databases: String,
}

impl SearchArgs {
    fn into_query(self, config: &Config) -> rustpapers::Result<SearchQuery> {
        if self.limit == 0 {
            return Err(PaperError::Validation("--limit must be at least 1".to_string()));
        }
        if self.limit_per_db == Some(0) {
            return Err(PaperError::Validation("--limit-per-db must be at least 1".to_string()));
        }
        let years = match &self.years {
            Some(raw) => raw.parse::<YearRange>()?,
            None => YearRange::default(),
        };
        Ok(SearchQuery::new(&self.query)?
            .with_limit(self.limit)
            .with_limit_per_database(self.limit_per_db)
            .with_years(years)
            .with_open_access_only(self.open_access)
            .with_min_quality(Some(self.min_quality.unwrap_or(config.min_quality)))
            .with_databases(parse_databases(&self.databases)?))
    }
}

async fn run_search(config: Config, args: SearchArgs, options: RunOptions) -> Result<()> {
    config.validate()?;
    let query = args.into_query(&config)?;
    let store = MetricStore::load(&config.metric_table).context("Failed to load metric table")?;
    let orchestrator = Orchestrator::new(config, store)?;

    let report = tokio::select! {
        result = orchestrator.run(&query, &options) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight downloads");
            return Err(Interrupted.into());
        }
    };

    info!(
        total = report.total,
        pdfs = report.pdfs_downloaded,
        output = ?report.output_dir,
        "Search finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ============================================================================
// Metric Table
// ============================================================================

fn handle_metrics(config: &Config, action: MetricsAction) -> Result<()> {
    match action {
        MetricsAction::Import { file, year, to } => {
            let (store, stats) = MetricStore::import_file(&file, year)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            let dest = to.unwrap_or_else(|| config.metric_table.clone());
            store.write(&dest)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "success",
                    "path": dest,
                    "journals": store.len(),
                    "stats": stats,
                }))?
            );
        }
        MetricsAction::Top { limit, area } => {
            let store = MetricStore::load(&config.metric_table)?;
            let top = store.top(limit, area.as_deref());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "success",
                    "total_journals": store.len(),
                    "journals": top,
                }))?
            );
        }
        MetricsAction::Lookup { journal } => {
            let store = MetricStore::load(&config.metric_table)?;
            let entry = store
                .lookup(&journal)
                .or_else(|| store.lookup_issn(&journal));
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "success",
                    "found": entry.is_some(),
                    "entry": entry,
                }))?
            );
        }
    }
    Ok(())
}
