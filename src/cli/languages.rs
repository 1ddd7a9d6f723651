//! Lists the language registry.

use anyhow::Result;
use clap::Parser;

use crate::extract::{get_language_registry, Language};

/// Languages command options.
#[derive(Parser)]
pub struct LanguagesCommand {
    /// Also prints the number of function and comment rules per language.
    #[arg(long)]
    pub rules: bool,
}

impl LanguagesCommand {
    /// Executes the languages command.
    pub fn execute(self) -> Result<()> {
        let registry = get_language_registry();
        for language in registry.languages() {
            println!("{}", self.describe(language));
        }
        println!("\n{} languages", registry.len());
        Ok(())
    }

    fn describe(&self, language: &Language) -> String {
        let mut line = format!(
            "{:<14} {:<14} {}",
            language.id(),
            language.name(),
            language.extensions().join(", ")
        );
        if self.rules {
            line.push_str(&format!(
                "  [{} function, {} comment rules]",
                language.function_rules().len(),
                language.comment_rules().len()
            ));
        }
        line
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_extensions_and_rules() {
        let python = get_language_registry().language("python").unwrap();
        let cmd = LanguagesCommand { rules: true };
        let line = cmd.describe(python);
        assert!(line.starts_with("python"));
        assert!(line.contains("py"));
        assert!(line.contains("function"));
    }
}
