//! # rustpapers
//!
//! Multi-database academic paper search with journal-quality filtering and
//! open-access PDF retrieval.
//!
//! ## Modules
//!
//! - [`sources`] - arXiv, PubMed and ACM search adapters
//! - [`filter`] - quality / open-access / year predicates
//! - [`metrics`] - journal metric store (SJR tables)
//! - [`resolver`] - ordered PDF acquisition strategies
//! - [`orchestrator`] - search → filter → resolve → report
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustpapers::{Config, MetricStore, Orchestrator, RunOptions, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env(None)?;
//!     let store = MetricStore::load(&config.metric_table)?;
//!     let query = SearchQuery::new("[\"machine learning\"] AND [protein]")?.with_limit(5);
//!     let report = Orchestrator::new(config, store)?
//!         .run(&query, &RunOptions::default())
//!         .await?;
//!     println!("Found {} papers", report.total);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod ratelimit;
pub mod report;
pub mod resolver;
pub mod sources;

pub use config::Config;
pub use error::{PaperError, Result};
pub use metrics::MetricStore;
pub use models::{Database, PaperRecord, Provenance, SearchQuery, YearRange};
pub use orchestrator::{Orchestrator, RunOptions};
pub use report::RunReport;
