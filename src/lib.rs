//! # codemood
//!
//! Reads a git repository's commit messages, comments and function names,
//! scores their emotional tone and aggregates the scores into a report.
//!
//! ## Features
//!
//! - Data-driven extraction for dozens of languages
//! - Offline lexicon scoring or an OpenAI-compatible remote backend
//! - Author, timeline and distribution statistics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codemood::{analyze, AnalysisOptions};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let report = analyze(std::path::Path::new("."), &AnalysisOptions::default()).await?;
//! println!("{}", report.analysis_summary.mood_category);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod aggregate;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod git;
pub mod preprocess;
pub mod report;
pub mod sentiment;
pub mod utils;

pub use crate::analyzer::{analyze, Analyzer};
pub use crate::cli::Cli;
pub use crate::config::AnalysisOptions;
pub use crate::error::{AnalysisError, Stage};
pub use crate::report::AnalysisReport;

/// The current version of codemood.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
