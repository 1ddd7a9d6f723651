//! Text extraction from commit history and source files.

pub mod code_units;
pub mod commits;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::git::{Commit, RawCommit};

pub use code_units::CodeUnits;
pub use commits::{FilterReason, FilterStats};
pub use registry::{get_language_registry, Language, LanguageRegistry};

/// Minimum number of characters a comment body needs to be kept.
pub const MIN_COMMENT_LEN: usize = 4;

/// What a [`CodeUnit`] was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// A function, method or type name.
    Function,
    /// A comment or docstring body.
    Comment,
}

/// A piece of text pulled out of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUnit {
    /// Function name or comment body.
    pub kind: UnitKind,
    /// The extracted text.
    pub text: String,
    /// Repository-relative path of the owning file.
    pub path: String,
    /// Registry id of the file's language.
    pub language: String,
    /// 1-based line of the extracted text.
    pub line: usize,
    /// 1-based column (in characters) of the extracted text.
    pub column: usize,
}

impl CodeUnit {
    /// Stable identifier, `path:line:column`.
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.path, self.line, self.column)
    }
}

/// Turns raw history and file contents into analysable text.
#[derive(Clone, Copy)]
pub struct TextExtractor<'r> {
    registry: &'r LanguageRegistry,
}

impl Default for TextExtractor<'static> {
    fn default() -> Self {
        Self::new(get_language_registry())
    }
}

impl<'r> TextExtractor<'r> {
    /// Creates an extractor backed by the given registry.
    pub fn new(registry: &'r LanguageRegistry) -> Self {
        Self { registry }
    }

    /// Returns the registry used for language lookup.
    pub fn registry(&self) -> &'r LanguageRegistry {
        self.registry
    }

    /// Drops merges, reverts and low-information commits, cleaning the rest.
    ///
    /// Drop counts per reason are logged at `debug`.
    pub fn extract_commits(&self, raw: Vec<RawCommit>) -> Vec<Commit> {
        commits::extract_commits(raw).0
    }

    /// Returns a lazy view over the functions and comments in `content`.
    ///
    /// Files whose language is not in the registry produce an empty view.
    pub fn extract_code_units<'a>(&self, path: &'a str, content: &'a str) -> CodeUnits<'a>
    where
        'r: 'a,
    {
        CodeUnits::new(path, content, self.registry.language_for_path(path))
    }
}
