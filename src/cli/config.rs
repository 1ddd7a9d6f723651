//! Configuration-related CLI commands.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::extract::registry::LANGUAGES_YAML;

/// Configuration operations.
#[derive(Parser)]
pub struct ConfigCommand {
    /// Configuration subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

/// Configuration subcommands.
#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Language pattern table.
    Languages(LanguagesConfigCommand),
}

/// Language table operations.
#[derive(Parser)]
pub struct LanguagesConfigCommand {
    /// Languages subcommand to execute.
    #[command(subcommand)]
    pub command: LanguagesConfigSubcommands,
}

/// Language table subcommands.
#[derive(Subcommand)]
pub enum LanguagesConfigSubcommands {
    /// Shows the embedded languages.yaml table.
    Show(ShowCommand),
}

/// Show command options.
#[derive(Parser)]
pub struct ShowCommand {}

impl ConfigCommand {
    /// Executes the config command.
    pub fn execute(self) -> Result<()> {
        match self.command {
            ConfigSubcommands::Languages(languages_cmd) => languages_cmd.execute(),
        }
    }
}

impl LanguagesConfigCommand {
    /// Executes the languages command.
    pub fn execute(self) -> Result<()> {
        match self.command {
            LanguagesConfigSubcommands::Show(show_cmd) => show_cmd.execute(),
        }
    }
}

impl ShowCommand {
    /// Executes the show command.
    pub fn execute(self) -> Result<()> {
        println!("{LANGUAGES_YAML}");
        Ok(())
    }
}
