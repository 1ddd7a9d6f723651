//! CLI interface for codemood.

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod analyze;
pub mod config;
pub mod languages;

/// codemood: sentiment analysis of a git repository's history and code.
#[derive(Parser)]
#[command(name = "codemood")]
#[command(about = "Analyze the mood of a git repository", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The main command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Main command categories.
#[derive(Subcommand)]
pub enum Commands {
    /// Analyzes a repository and writes a JSON report.
    Analyze(analyze::AnalyzeCommand),
    /// Lists the languages code units are extracted from.
    Languages(languages::LanguagesCommand),
    /// Configuration and embedded data.
    Config(config::ConfigCommand),
}

impl Cli {
    /// Whether crate diagnostics were requested.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Commands::Analyze(cmd) => cmd.verbose,
            _ => false,
        }
    }

    /// Executes the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Analyze(analyze_cmd) => analyze_cmd.execute().await,
            Commands::Languages(languages_cmd) => languages_cmd.execute(),
            Commands::Config(config_cmd) => config_cmd.execute(),
        }
    }
}
