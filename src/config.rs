//! Analysis options and their sources.
//!
//! Options are resolved from CLI flags over an optional YAML file over the
//! defaults below. Credentials fall back to the environment and then to
//! `~/.codemood/settings.json`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::BucketGranularity;
use crate::utils::settings::get_env_var;

/// File name looked up at the repository root when no config is given.
pub const REPO_CONFIG_FILE: &str = ".codemood.yaml";

/// Default number of commits read from history.
pub const DEFAULT_LIMIT: usize = 100;

/// Default number of source files scanned for code units.
pub const DEFAULT_FILE_LIMIT: usize = 50;

/// Default remote request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default ceiling on retries of a transient remote failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base URL for the remote backend.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Environment variable holding the remote API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable holding the remote organization id.
pub const ORGANIZATION_ENV: &str = "OPENAI_ORG_ID";

/// Which sentiment backend scores text.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// Offline lexicon model.
    #[default]
    Local,
    /// OpenAI-compatible chat completions API.
    Remote,
}

impl ClassifierBackend {
    /// Model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Local => crate::sentiment::local::DEFAULT_MODEL,
            Self::Remote => crate::sentiment::remote::DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for ClassifierBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Everything that controls one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Maximum number of non-merge commits read from history.
    pub limit: usize,
    /// Backend used for scoring.
    pub classifier_backend: ClassifierBackend,
    /// Model name; the backend default when unset.
    pub model_name: Option<String>,
    /// Remote API key. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Remote organization id.
    pub organization_id: Option<String>,
    /// Remote base URL.
    pub api_base: String,
    /// Include token usage and cost in the report.
    pub track_cost: bool,
    /// Emit diagnostics.
    pub verbose: bool,
    /// Maximum number of source files scanned for code units.
    pub file_limit: usize,
    /// Granularity of the timeline.
    pub bucket: BucketGranularity,
    /// Also score extracted functions and comments.
    pub classify_code_units: bool,
    /// Classification pool size; the backend's recommendation when unset.
    pub concurrency: Option<usize>,
    /// Remote request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retry ceiling for rate limits and timeouts.
    pub max_retries: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            classifier_backend: ClassifierBackend::Local,
            model_name: None,
            api_key: None,
            organization_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
            track_cost: false,
            verbose: false,
            file_limit: DEFAULT_FILE_LIMIT,
            bucket: BucketGranularity::Day,
            classify_code_units: false,
            concurrency: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl AnalysisOptions {
    /// Parses options from YAML; missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let options: Self = serde_yaml::from_str(yaml).context("Failed to parse options")?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a YAML file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Resolves the base options for a repository.
    ///
    /// An explicit path must exist. Otherwise `.codemood.yaml` at the
    /// repository root is used when present, and the defaults when not.
    pub fn resolve(repository: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        let candidate: PathBuf = repository.join(REPO_CONFIG_FILE);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Loading repository config");
            return Self::load_from_path(candidate);
        }

        Ok(Self::default())
    }

    /// Rejects values no run can use.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            bail!("concurrency must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// The configured model, or the backend's default.
    pub fn effective_model(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| self.classifier_backend.default_model().to_string())
    }

    /// The API key from the options, the environment or the settings file.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| get_env_var(API_KEY_ENV).ok())
    }

    /// The organization id from the options, the environment or the settings file.
    pub fn resolved_organization(&self) -> Option<String> {
        self.organization_id
            .clone()
            .or_else(|| get_env_var(ORGANIZATION_ENV).ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let options = AnalysisOptions::default();
        assert_eq!(options.limit, 100);
        assert_eq!(options.file_limit, 50);
        assert_eq!(options.classifier_backend, ClassifierBackend::Local);
        assert_eq!(options.bucket, BucketGranularity::Day);
        assert_eq!(options.request_timeout_secs, 60);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.api_base, "https://api.openai.com");
        assert!(!options.track_cost);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let options = AnalysisOptions::from_yaml(
            "limit: 25\nclassifier_backend: remote\nbucket: week\nconcurrency: 2\n",
        )
        .unwrap();
        assert_eq!(options.limit, 25);
        assert_eq!(options.classifier_backend, ClassifierBackend::Remote);
        assert_eq!(options.bucket, BucketGranularity::Week);
        assert_eq!(options.concurrency, Some(2));
        assert_eq!(options.file_limit, 50);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(AnalysisOptions::from_yaml("concurrency: 0\n").is_err());
    }

    #[test]
    fn effective_model_falls_back_to_backend_default() {
        let mut options = AnalysisOptions::default();
        assert_eq!(options.effective_model(), "codemood-lexicon-v1");

        options.classifier_backend = ClassifierBackend::Remote;
        assert_eq!(options.effective_model(), "gpt-4o-mini");

        options.model_name = Some("gpt-4o".to_string());
        assert_eq!(options.effective_model(), "gpt-4o");
    }

    #[test]
    fn api_key_is_never_serialized() {
        let options = AnalysisOptions {
            api_key: Some("sk-secret".to_string()),
            ..AnalysisOptions::default()
        };
        let yaml = serde_yaml::to_string(&options).unwrap();
        assert!(!yaml.contains("sk-secret"));
    }

    #[test]
    fn resolve_prefers_repository_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(REPO_CONFIG_FILE), "limit: 7\n").unwrap();
        let options = AnalysisOptions::resolve(dir.path(), None).unwrap();
        assert_eq!(options.limit, 7);
    }

    #[test]
    fn resolve_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let options = AnalysisOptions::resolve(dir.path(), None).unwrap();
        assert_eq!(options, AnalysisOptions::default());
    }

    #[test]
    fn resolve_with_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(AnalysisOptions::resolve(dir.path(), Some(&missing)).is_err());
    }
}
