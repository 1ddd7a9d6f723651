//! The analysis pipeline: repository → extraction → classification → report.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::ScoredCommit;
use crate::config::AnalysisOptions;
use crate::error::{AnalysisError, Stage};
use crate::extract::{CodeUnit, TextExtractor};
use crate::git::{is_file_unavailable, Commit, GitRepository};
use crate::report::{AnalysisReport, ReportBuilder, RepositorySummary};
use crate::sentiment::{create_classifier, BatchScorer, RetryPolicy, SentimentClassifier};

/// Everything read from the repository before classification starts.
struct Collected {
    repository: RepositorySummary,
    commits: Vec<Commit>,
    code_units: Vec<CodeUnit>,
}

/// Runs analyses with a fixed classifier and cancellation token.
pub struct Analyzer {
    classifier: Option<Arc<dyn SentimentClassifier>>,
    extractor: TextExtractor<'static>,
    cancel: CancellationToken,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Creates an analyzer that builds its classifier from the options of each run.
    pub fn new() -> Self {
        Self {
            classifier: None,
            extractor: TextExtractor::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an analyzer that always scores with `classifier`.
    pub fn with_classifier(classifier: Arc<dyn SentimentClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
            ..Self::new()
        }
    }

    /// Uses an externally controlled cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs of this analyzer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyzes the repository at `path`.
    pub async fn analyze(&self, path: &Path, options: &AnalysisOptions) -> Result<AnalysisReport> {
        options.validate()?;
        info!(path = %path.display(), limit = options.limit, "Starting analysis");

        let collected = self.collect(path, options)?;

        let classifier = match &self.classifier {
            Some(classifier) => classifier.clone(),
            None => create_classifier(options)
                .with_context(|| Stage::Classification.failure_message())?,
        };
        let mut scorer = BatchScorer::new(classifier.clone())
            .with_retry_policy(RetryPolicy::with_max_retries(options.max_retries))
            .with_cancellation(self.cancel.clone());
        if let Some(concurrency) = options.concurrency {
            scorer = scorer.with_concurrency(concurrency);
        }
        let metadata = classifier.metadata();
        info!(
            backend = %metadata.backend,
            model = %metadata.model,
            concurrency = scorer.concurrency(),
            "Classifying commit messages"
        );

        let messages: Vec<String> = collected
            .commits
            .iter()
            .map(|c| c.cleaned_message.clone())
            .collect();
        let commit_scores = scorer
            .score_all(&messages)
            .await
            .with_context(|| Stage::Classification.failure_message())?;

        let code_scores = if options.classify_code_units {
            info!(units = collected.code_units.len(), "Classifying code units");
            let texts: Vec<String> = collected.code_units.iter().map(|u| u.text.clone()).collect();
            Some(
                scorer
                    .score_all(&texts)
                    .await
                    .with_context(|| Stage::Classification.failure_message())?,
            )
        } else {
            None
        };

        if commit_scores.len() != collected.commits.len() {
            return Err(AnalysisError::MalformedReport(format!(
                "{} scores for {} commits",
                commit_scores.len(),
                collected.commits.len()
            )))
            .with_context(|| Stage::Aggregation.failure_message());
        }
        let scored: Vec<ScoredCommit> = collected
            .commits
            .into_iter()
            .zip(commit_scores)
            .map(|(commit, score)| ScoredCommit { commit, score })
            .collect();

        let mut builder = ReportBuilder::new(options, collected.repository)
            .commits(scored)
            .code_units(collected.code_units)
            .cost(classifier.cost_info())
            .concurrency(scorer.concurrency());
        if let Some(scores) = code_scores {
            builder = builder.code_scores(scores);
        }
        let report = builder
            .build()
            .with_context(|| Stage::Report.failure_message())?;

        info!(
            commits = report.analysis_summary.commits_analyzed,
            average = report.analysis_summary.average_sentiment,
            "Analysis complete"
        );
        Ok(report)
    }

    /// Reads history and source files. Runs before any await point since the
    /// repository handle is not `Sync`.
    fn collect(&self, path: &Path, options: &AnalysisOptions) -> Result<Collected> {
        let repo =
            GitRepository::open_at(path).with_context(|| Stage::Repository.failure_message())?;

        let raw = repo
            .history(options.limit)
            .with_context(|| Stage::Repository.failure_message())?;
        let total_commits = repo
            .total_commits()
            .with_context(|| Stage::Repository.failure_message())?;
        let head = repo
            .head_commit()
            .with_context(|| Stage::Repository.failure_message())?;

        let commits = self.extractor.extract_commits(raw);

        let files = match head {
            Some(head) => repo
                .files_at(head)
                .with_context(|| Stage::Repository.failure_message())?,
            None => BTreeSet::new(),
        };

        let sources = match head {
            Some(head) => self
                .read_sources(&repo, head, &files, options.file_limit)
                .with_context(|| Stage::Extraction.failure_message())?,
            None => Vec::new(),
        };
        let repository_size = match head {
            Some(head) => repo
                .size_at(head)
                .with_context(|| Stage::Repository.failure_message())?,
            None => 0,
        };

        let extractor = self.extractor;
        let per_file: Vec<Vec<CodeUnit>> = sources
            .par_iter()
            .map(|(path, content)| extractor.extract_code_units(path, content).into_iter().collect())
            .collect();
        let code_units: Vec<CodeUnit> = per_file.into_iter().flatten().collect();
        debug!(files = sources.len(), units = code_units.len(), "Extracted code units");

        Ok(Collected {
            repository: RepositorySummary {
                path: repo.workdir_path().display().to_string(),
                total_commits,
                total_files: files.len(),
                repository_size,
            },
            commits,
            code_units,
        })
    }

    /// Reads up to `file_limit` supported files at `head`, in path order.
    fn read_sources(
        &self,
        repo: &GitRepository,
        head: git2::Oid,
        files: &BTreeSet<String>,
        file_limit: usize,
    ) -> Result<Vec<(String, String)>> {
        let registry = self.extractor.registry();

        let mut sources = Vec::new();
        for path in files
            .iter()
            .filter(|p| registry.is_supported(p))
            .take(file_limit)
        {
            match repo.content_of(path, head) {
                Ok(content) => sources.push((path.clone(), content)),
                Err(e) if is_file_unavailable(&e) => {
                    warn!(path = %path, error = %e, "Skipping file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sources)
    }
}

/// Analyzes the repository at `path` with the backend selected by `options`.
pub async fn analyze(path: &Path, options: &AnalysisOptions) -> Result<AnalysisReport> {
    Analyzer::new().analyze(path, options).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use git2::{Repository, Signature, Time};
    use tempfile::TempDir;

    use super::*;
    use crate::sentiment::test_utils::ConfigurableMockClassifier;
    use crate::sentiment::{ClassifierError, SentimentLabel, SentimentScore};

    struct Fixture {
        dir: TempDir,
        repo: Repository,
        clock: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            Self {
                dir,
                repo,
                clock: 1_700_000_000,
            }
        }

        fn commit(&mut self, files: &[(&str, &str)], message: &str) {
            for (name, content) in files {
                let path = self.dir.path().join(name);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(path, content).unwrap();
            }
            let mut index = self.repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();

            self.clock += 3600;
            let sig = Signature::new("Dev", "dev@example.com", &Time::new(self.clock, 0)).unwrap();
            let parent = self
                .repo
                .head()
                .ok()
                .and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn injected_classifier_scores_filtered_commits() {
        let mut fx = Fixture::new();
        fx.commit(&[("app.py", "def main():\n    pass\n")], "Initial parser work");
        fx.commit(&[("app.py", "def main():\n    return 1\n")], "wip");
        fx.commit(&[("notes.xyz", "whatever")], "Fix terrible crash");

        let mock = ConfigurableMockClassifier::keyed(&[
            ("Initial parser work", SentimentLabel::Positive),
            ("Fix terrible crash", SentimentLabel::Negative),
        ]);
        let handle = mock.record_handle();
        let analyzer = Analyzer::with_classifier(Arc::new(mock));

        let report = analyzer
            .analyze(fx.dir.path(), &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.analysis_summary.commits_analyzed, 2);
        assert_eq!(report.repository.total_commits, 3);
        assert_eq!(report.repository.total_files, 2);
        assert_eq!(
            report.repository.repository_size,
            ("def main():\n    return 1\n".len() + "whatever".len()) as u64
        );
        assert_eq!(report.analysis_summary.functions_found, 1);
        assert_eq!(handle.request_count(), 2);
        assert!(!handle.texts().contains(&"wip".to_string()));
    }

    #[tokio::test]
    async fn code_units_are_scored_on_request() {
        let mut fx = Fixture::new();
        fx.commit(
            &[("lib.rs", "// parse the config file\nfn load() {}\n")],
            "Add loader",
        );

        let mock = ConfigurableMockClassifier::constant(SentimentLabel::Neutral);
        let handle = mock.record_handle();
        let options = AnalysisOptions {
            classify_code_units: true,
            ..AnalysisOptions::default()
        };
        let report = Analyzer::with_classifier(Arc::new(mock))
            .analyze(fx.dir.path(), &options)
            .await
            .unwrap();

        let code = report.code_sentiment.unwrap();
        assert_eq!(code.units_scored, 2);
        assert_eq!(handle.request_count(), 3);
    }

    #[tokio::test]
    async fn file_limit_caps_scanned_files() {
        let mut fx = Fixture::new();
        fx.commit(
            &[
                ("a.py", "def alpha():\n    pass\n"),
                ("b.py", "def beta():\n    pass\n"),
                ("c.py", "def gamma():\n    pass\n"),
            ],
            "Add modules",
        );
        let options = AnalysisOptions {
            file_limit: 2,
            ..AnalysisOptions::default()
        };
        let report = Analyzer::with_classifier(Arc::new(ConfigurableMockClassifier::constant(
            SentimentLabel::Neutral,
        )))
        .analyze(fx.dir.path(), &options)
        .await
        .unwrap();

        let names: Vec<_> = report
            .extracted_data
            .sample_functions
            .iter()
            .map(|u| u.text.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn missing_repository_is_a_repository_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze(dir.path(), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "repository stage failed");
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::RepositoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_repository_yields_empty_report() {
        let fx = Fixture::new();
        let report = analyze(fx.dir.path(), &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.analysis_summary.commits_analyzed, 0);
        assert_eq!(report.repository.total_files, 0);
        assert_eq!(report.repository.repository_size, 0);
    }

    #[tokio::test]
    async fn unreadable_source_blob_is_an_extraction_failure() {
        let mut fx = Fixture::new();
        let content = "// load the settings file\nfn load() {}\n";
        fx.commit(&[("lib.rs", content)], "Add settings loader");

        let blob = git2::Oid::hash_object(git2::ObjectType::Blob, content.as_bytes())
            .unwrap()
            .to_string();
        let object = fx.dir.path().join(".git/objects").join(&blob[..2]).join(&blob[2..]);
        fs::remove_file(object).unwrap();

        let err = Analyzer::with_classifier(Arc::new(ConfigurableMockClassifier::constant(
            SentimentLabel::Neutral,
        )))
        .analyze(fx.dir.path(), &AnalysisOptions::default())
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "extraction stage failed");
        assert!(err.downcast_ref::<AnalysisError>().is_none());
    }

    #[tokio::test]
    async fn classifier_failure_is_a_classification_failure() {
        let mut fx = Fixture::new();
        fx.commit(&[("a.py", "x = 1\n")], "Add config");
        let mock = ConfigurableMockClassifier::new(vec![Err(
            ClassifierError::ApiRequestFailed("HTTP 500".to_string()),
        )]);

        let err = Analyzer::with_classifier(Arc::new(mock))
            .analyze(fx.dir.path(), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "classification stage failed");
        assert!(err.downcast_ref::<ClassifierError>().is_some());
    }

    #[tokio::test]
    async fn cancelled_run_produces_no_report() {
        let mut fx = Fixture::new();
        for i in 0..5 {
            fx.commit(&[("a.py", &format!("x = {i}\n"))], &format!("Tune parser step {i}"));
        }
        let mock = ConfigurableMockClassifier::new(vec![Ok(SentimentScore::new(
            SentimentLabel::Positive,
            0.9,
        ))])
        .with_default_delay(Duration::from_millis(10));
        let analyzer = Analyzer::with_classifier(Arc::new(mock));
        analyzer.cancellation_token().cancel();

        let err = analyzer
            .analyze(fx.dir.path(), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let fx = Fixture::new();
        let options = AnalysisOptions {
            concurrency: Some(0),
            ..AnalysisOptions::default()
        };
        assert!(analyze(fx.dir.path(), &options).await.is_err());
    }
}
