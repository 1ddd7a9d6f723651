//! Analyze command: runs the pipeline and writes the report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use crate::aggregate::BucketGranularity;
use crate::analyzer::Analyzer;
use crate::config::{AnalysisOptions, ClassifierBackend};
use crate::report::{format_timestamp, AnalysisReport, CommitInsight, TimestampFormat};

/// Default directory the report is written to.
pub const DEFAULT_OUTPUT_DIR: &str = "./codemood_output";

/// Insights printed per extreme in the summary.
const SUMMARY_INSIGHTS: usize = 3;

/// Analyze command options.
#[derive(Parser)]
pub struct AnalyzeCommand {
    /// Repository to analyze.
    #[arg(value_name = "REPO", default_value = ".")]
    pub repo: PathBuf,

    /// Maximum number of commits to analyze.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Sentiment backend.
    #[arg(long, value_enum)]
    pub backend: Option<ClassifierBackend>,

    /// Model name or, for the local backend, a lexicon file.
    #[arg(long)]
    pub model_name: Option<String>,

    /// API key for the remote backend (defaults to OPENAI_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Organization id for the remote backend.
    #[arg(long)]
    pub organization: Option<String>,

    /// Base URL of the remote backend.
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,

    /// Tracks token usage and estimated cost.
    #[arg(long)]
    pub show_costs: bool,

    /// Prints debug diagnostics to stderr.
    #[arg(long)]
    pub verbose: bool,

    /// Directory the report is written to.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Timeline granularity.
    #[arg(long, value_enum)]
    pub bucket: Option<BucketGranularity>,

    /// Maximum number of source files scanned for comments and functions.
    #[arg(long)]
    pub file_limit: Option<usize>,

    /// Also scores extracted comments and functions.
    #[arg(long)]
    pub classify_code_units: bool,

    /// Maximum number of concurrent classification requests.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// YAML options file (defaults to .codemood.yaml in the repository).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl AnalyzeCommand {
    /// Executes the analyze command.
    pub async fn execute(self) -> Result<()> {
        let options = self.options()?;
        debug!(
            backend = %options.classifier_backend,
            limit = options.limit,
            file_limit = options.file_limit,
            "Resolved options"
        );

        let analyzer = Analyzer::new();
        let cancel = analyzer.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted; stopping after in-flight requests");
                cancel.cancel();
            }
        });

        let report = analyzer.analyze(&self.repo, &options).await?;
        let path = report
            .save_to_file(&self.output_dir)
            .context("Failed to save report")?;

        print_summary(&report, self.show_costs);
        println!("📄 Report: {}", path.display());
        Ok(())
    }

    /// Applies the flags over the config file over the defaults.
    fn options(&self) -> Result<AnalysisOptions> {
        let mut options = AnalysisOptions::resolve(&self.repo, self.config.as_deref())?;

        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        if let Some(backend) = self.backend {
            options.classifier_backend = backend;
        }
        if let Some(model) = &self.model_name {
            options.model_name = Some(model.clone());
        }
        if let Some(key) = &self.api_key {
            options.api_key = Some(key.clone());
        }
        if let Some(org) = &self.organization {
            options.organization_id = Some(org.clone());
        }
        if let Some(base) = &self.api_base {
            options.api_base = base.clone();
        }
        if let Some(bucket) = self.bucket {
            options.bucket = bucket;
        }
        if let Some(file_limit) = self.file_limit {
            options.file_limit = file_limit;
        }
        if let Some(concurrency) = self.concurrency {
            options.concurrency = Some(concurrency);
        }
        options.track_cost |= self.show_costs;
        options.verbose |= self.verbose;
        options.classify_code_units |= self.classify_code_units;

        options.validate()?;
        Ok(options)
    }
}

fn print_summary(report: &AnalysisReport, show_costs: bool) {
    let summary = &report.analysis_summary;
    println!(
        "🔍 Collected {} commits, {} comments, {} functions",
        summary.commits_analyzed, summary.comments_found, summary.functions_found
    );
    println!(
        "🧠 Average sentiment: {:.2} ({})",
        summary.average_sentiment, summary.mood_category
    );

    print_insights("Most positive", &report.top_insights.most_positive_commits);
    print_insights("Most negative", &report.top_insights.most_negative_commits);

    if show_costs {
        match &report.cost_tracking {
            Some(cost) => {
                let estimate = cost
                    .estimated_cost_usd
                    .map_or_else(|| "unknown".to_string(), |usd| format!("${usd:.4}"));
                println!(
                    "💰 Cost tracking - Tokens used: {}, Estimated cost: {estimate}",
                    cost.tokens_used
                );
            }
            None => println!("💰 Cost tracking - not metered for this backend"),
        }
    }
}

fn print_insights(title: &str, insights: &[CommitInsight]) {
    if insights.is_empty() {
        return;
    }
    println!("{title}:");
    for insight in insights.iter().take(SUMMARY_INSIGHTS) {
        println!(
            "  {:+.2}  {}  {}",
            insight.value,
            format_timestamp(&insight.date, TimestampFormat::Date),
            insight.message
        );
    }
}
