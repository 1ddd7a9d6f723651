//! Language extraction rules.
//!
//! The rules live in an embedded YAML table so that supporting a new language
//! means adding data, not code. Comment styles are declared once and shared
//! between languages by name.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};
use serde::Deserialize;

use super::{UnitKind, MIN_COMMENT_LEN};

/// The embedded language table.
pub const LANGUAGES_YAML: &str = include_str!("../templates/languages.yaml");

/// A rule as written in YAML.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleSpec {
    /// Regular expression matched against the whole file.
    pub pattern: String,
    /// Group holding the name or body; first participating group when unset.
    #[serde(default)]
    pub capture: Option<usize>,
    /// Characters trimmed from the start of each body line.
    #[serde(default)]
    pub strip_line_prefix: Option<String>,
    /// Captured names that are discarded.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A language entry as written in YAML.
#[derive(Debug, Deserialize)]
pub struct LanguageSpec {
    /// Stable identifier (e.g. "python").
    pub id: String,
    /// Display name (e.g. "Python").
    pub name: String,
    /// File extensions without the leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Exact file names such as `Makefile`.
    #[serde(default)]
    pub filenames: Vec<String>,
    /// Names of entries in the top-level `comment_styles` map.
    #[serde(default)]
    pub comment_styles: Vec<String>,
    /// Function, method and type name rules.
    #[serde(default)]
    pub functions: Vec<RuleSpec>,
}

/// Complete language table.
#[derive(Debug, Deserialize)]
pub struct LanguageTable {
    /// Table format version.
    pub version: u32,
    /// Shared comment styles by name.
    #[serde(default)]
    pub comment_styles: HashMap<String, Vec<RuleSpec>>,
    /// Supported languages.
    pub languages: Vec<LanguageSpec>,
}

/// A compiled extraction rule.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    kind: UnitKind,
    regex: Regex,
    capture: Option<usize>,
    strip_line_prefix: Option<String>,
    exclude: HashSet<String>,
}

impl ExtractionRule {
    fn compile(kind: UnitKind, spec: &RuleSpec, origin: &str) -> Result<Self> {
        let regex = Regex::new(&spec.pattern)
            .with_context(|| format!("Invalid pattern in {origin}: {}", spec.pattern))?;

        if let Some(group) = spec.capture {
            // captures_len counts the implicit whole-match group 0
            if group == 0 || group >= regex.captures_len() {
                bail!(
                    "Capture group {group} out of range in {origin} (pattern has {} groups)",
                    regex.captures_len() - 1
                );
            }
        } else if regex.captures_len() < 2 {
            bail!("Pattern in {origin} has no capture group: {}", spec.pattern);
        }

        Ok(Self {
            kind,
            regex,
            capture: spec.capture,
            strip_line_prefix: spec.strip_line_prefix.clone(),
            exclude: spec.exclude.iter().cloned().collect(),
        })
    }

    /// Whether this rule yields functions or comments.
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// The compiled pattern.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Picks the group this rule extracts from a match.
    pub(crate) fn captured<'t>(&self, caps: &Captures<'t>) -> Option<regex::Match<'t>> {
        match self.capture {
            Some(group) => caps.get(group),
            None => caps.iter().skip(1).flatten().next(),
        }
    }

    /// Turns captured text into the unit's text, or `None` when it is dropped.
    pub(crate) fn unit_text(&self, raw: &str) -> Option<String> {
        match self.kind {
            UnitKind::Function => {
                let name = raw.trim();
                if name.is_empty() || self.exclude.contains(name) {
                    None
                } else {
                    Some(name.to_string())
                }
            }
            UnitKind::Comment => {
                let prefix = self.strip_line_prefix.as_deref().unwrap_or("");
                let body = raw
                    .lines()
                    .map(|line| line.trim_start().trim_start_matches(|c| prefix.contains(c)))
                    .flat_map(str::split_whitespace)
                    .collect::<Vec<_>>()
                    .join(" ");
                if body.chars().count() < MIN_COMMENT_LEN || self.exclude.contains(&body) {
                    None
                } else {
                    Some(body)
                }
            }
        }
    }
}

/// A supported language with its compiled rules.
#[derive(Debug)]
pub struct Language {
    id: String,
    name: String,
    extensions: Vec<String>,
    functions: Vec<ExtractionRule>,
    comments: Vec<ExtractionRule>,
}

impl Language {
    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercased extensions.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Rules for function, method and type names.
    pub fn function_rules(&self) -> &[ExtractionRule] {
        &self.functions
    }

    /// Rules for comments, in declaration order.
    pub fn comment_rules(&self) -> &[ExtractionRule] {
        &self.comments
    }
}

/// Registry for looking up languages by file path.
pub struct LanguageRegistry {
    languages: Vec<Language>,
    by_extension: HashMap<String, usize>,
    by_filename: HashMap<String, usize>,
}

impl LanguageRegistry {
    /// Loads the registry from the embedded YAML table.
    pub fn load() -> Result<Self> {
        Self::from_yaml(LANGUAGES_YAML)
    }

    /// Builds a registry from a YAML table, validating every rule.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: LanguageTable =
            serde_yaml::from_str(yaml).context("Failed to parse language table")?;
        Self::from_table(table)
    }

    fn from_table(table: LanguageTable) -> Result<Self> {
        let mut styles: HashMap<&str, Vec<ExtractionRule>> = HashMap::new();
        for (name, rules) in &table.comment_styles {
            let origin = format!("comment style {name}");
            let compiled = rules
                .iter()
                .map(|rule| ExtractionRule::compile(UnitKind::Comment, rule, &origin))
                .collect::<Result<Vec<_>>>()?;
            styles.insert(name.as_str(), compiled);
        }

        let mut languages = Vec::with_capacity(table.languages.len());
        let mut by_extension = HashMap::new();
        let mut by_filename = HashMap::new();
        let mut ids = HashSet::new();

        for spec in &table.languages {
            if !ids.insert(spec.id.as_str()) {
                bail!("Duplicate language id: {}", spec.id);
            }
            let index = languages.len();

            let functions = spec
                .functions
                .iter()
                .map(|rule| {
                    ExtractionRule::compile(UnitKind::Function, rule, &format!("language {}", spec.id))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut comments = Vec::new();
            for style in &spec.comment_styles {
                let rules = styles.get(style.as_str()).with_context(|| {
                    format!("Language {} references unknown comment style {style}", spec.id)
                })?;
                comments.extend(rules.iter().cloned());
            }

            let extensions: Vec<String> = spec
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect();
            for ext in &extensions {
                if by_extension.insert(ext.clone(), index).is_some() {
                    bail!("Extension .{ext} is claimed by more than one language");
                }
            }
            for filename in &spec.filenames {
                if by_filename.insert(filename.to_lowercase(), index).is_some() {
                    bail!("File name {filename} is claimed by more than one language");
                }
            }

            languages.push(Language {
                id: spec.id.clone(),
                name: spec.name.clone(),
                extensions,
                functions,
                comments,
            });
        }

        Ok(Self {
            languages,
            by_extension,
            by_filename,
        })
    }

    /// Looks up the language for a file, trying the exact file name first and
    /// then the extension, both case-insensitively.
    pub fn language_for_path(&self, path: &str) -> Option<&Language> {
        let path = Path::new(path);
        let file_name = path.file_name()?.to_str()?.to_lowercase();
        if let Some(&index) = self.by_filename.get(&file_name) {
            return self.languages.get(index);
        }

        let ext = path.extension()?.to_str()?.to_lowercase();
        self.by_extension
            .get(&ext)
            .and_then(|&index| self.languages.get(index))
    }

    /// Returns true when the file's language is known.
    pub fn is_supported(&self, path: &str) -> bool {
        self.language_for_path(path).is_some()
    }

    /// Looks up a language by id.
    pub fn language(&self, id: &str) -> Option<&Language> {
        self.languages.iter().find(|lang| lang.id == id)
    }

    /// All languages in table order.
    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    /// Number of languages.
    pub fn len(&self) -> usize {
        self.languages.len()
    }

    /// Returns true when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

/// Global language registry instance
static LANGUAGE_REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

/// Get the global language registry instance
#[allow(clippy::expect_used)] // The embedded table is validated by tests
pub fn get_language_registry() -> &'static LanguageRegistry {
    LANGUAGE_REGISTRY
        .get_or_init(|| LanguageRegistry::load().expect("Failed to load language registry"))
}
