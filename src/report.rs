//! The persisted analysis report and its builder.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{
    BucketGranularity, CodeSentimentStats, CommitAggregates, MoodCategory, ScoredCommit,
    SentimentDistribution,
};
use crate::config::{AnalysisOptions, ClassifierBackend};
use crate::error::AnalysisError;
use crate::extract::{CodeUnit, UnitKind};
use crate::preprocess::Preprocessor;
use crate::sentiment::remote::CostInfo;
use crate::sentiment::{SentimentLabel, SentimentScore};

/// File name of the persisted report.
pub const REPORT_FILE_NAME: &str = "codemood_report.json";

/// Value of `metadata.analysisType`.
pub const ANALYSIS_TYPE: &str = "git_repository_sentiment";

/// Extracted comments and functions kept as samples.
pub const SAMPLE_LEN: usize = 20;

/// Keywords kept per commit and for the whole report.
pub const KEYWORDS_LEN: usize = 10;

/// Characters of a message shown in the insight lists.
pub const INSIGHT_MESSAGE_LEN: usize = 100;

/// Terminal snapshot of one analysis run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// Generation details.
    pub metadata: ReportMetadata,
    /// Repository totals.
    pub repository: RepositorySummary,
    /// Headline numbers.
    pub analysis_summary: AnalysisSummary,
    /// Label counts over analysed commits.
    pub sentiment_distribution: SentimentDistribution,
    /// Extremes.
    pub top_insights: TopInsights,
    /// Every analysed commit, most recent first.
    pub detailed_commits: Vec<DetailedCommit>,
    /// Samples of extracted code units.
    pub extracted_data: ExtractedData,
    /// Per-author statistics.
    pub author_stats: Vec<crate::aggregate::AuthorStats>,
    /// Per-bucket statistics, oldest first.
    pub timeline: Vec<crate::aggregate::TimeBucketStats>,
    /// Most frequent keywords across commits.
    pub top_keywords: Vec<KeywordCount>,
    /// Code-unit statistics, when code units were scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_sentiment: Option<CodeSentimentStats>,
    /// Token usage and cost, when requested for a metered backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_tracking: Option<CostInfo>,
}

/// Generation details.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// RFC 3339 generation time.
    pub generated_at: String,
    /// Crate version.
    pub tool_version: String,
    /// Always [`ANALYSIS_TYPE`].
    pub analysis_type: String,
    /// Effective options, without secrets.
    pub parameters: ReportParameters,
}

/// Options that shaped the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParameters {
    /// Commit limit.
    pub limit: usize,
    /// Backend used.
    pub classifier_backend: ClassifierBackend,
    /// Effective model.
    pub model_name: String,
    /// Source file limit.
    pub file_limit: usize,
    /// Timeline granularity.
    pub bucket: BucketGranularity,
    /// Whether code units were scored.
    pub classify_code_units: bool,
    /// Classification pool size.
    pub concurrency: usize,
    /// Retry ceiling.
    pub max_retries: u32,
    /// Whether cost tracking was requested.
    pub track_cost: bool,
}

impl ReportParameters {
    /// Captures the options of a run.
    pub fn from_options(options: &AnalysisOptions, concurrency: usize) -> Self {
        Self {
            limit: options.limit,
            classifier_backend: options.classifier_backend,
            model_name: options.effective_model(),
            file_limit: options.file_limit,
            bucket: options.bucket,
            classify_code_units: options.classify_code_units,
            concurrency,
            max_retries: options.max_retries,
            track_cost: options.track_cost,
        }
    }
}

/// Repository totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    /// Canonical repository path.
    pub path: String,
    /// Commits reachable from HEAD, merges included.
    pub total_commits: usize,
    /// Files in the HEAD tree.
    pub total_files: usize,
    /// Bytes of file content in the HEAD tree.
    pub repository_size: u64,
}

/// Headline numbers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    /// Commits that survived filtering.
    pub commits_analyzed: usize,
    /// Comment units extracted.
    pub comments_found: usize,
    /// Function units extracted.
    pub functions_found: usize,
    /// Mean commit value, rounded to three decimals.
    pub average_sentiment: f64,
    /// Mood of the average.
    pub mood_category: MoodCategory,
    /// Reading of the mood.
    pub mood_description: String,
}

/// The extreme commits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopInsights {
    /// Highest values first.
    pub most_positive_commits: Vec<CommitInsight>,
    /// Lowest values first.
    pub most_negative_commits: Vec<CommitInsight>,
}

/// One commit in an insight list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInsight {
    /// Full hash.
    pub hash: String,
    /// Cleaned message, shortened.
    pub message: String,
    /// Signed value.
    pub value: f64,
    /// Classifier confidence.
    pub confidence: f64,
    /// RFC 3339 author time.
    pub date: String,
    /// Author identity.
    pub author: String,
}

/// One analysed commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedCommit {
    /// Full hash.
    pub hash: String,
    /// Author identity.
    pub author: String,
    /// RFC 3339 author time.
    pub timestamp: String,
    /// Message as written.
    pub message: String,
    /// Label.
    pub sentiment: SentimentLabel,
    /// Classifier confidence.
    pub confidence: f64,
    /// Signed value.
    pub value: f64,
    /// Top keywords of the cleaned message.
    pub keywords: Vec<String>,
}

/// Samples of extracted code units.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    /// First comments, in file order.
    pub sample_comments: Vec<CodeUnit>,
    /// First functions, in file order.
    pub sample_functions: Vec<CodeUnit>,
}

/// A keyword and the number of commits mentioning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordCount {
    /// The keyword.
    pub keyword: String,
    /// Commits whose keywords include it.
    pub count: usize,
}

impl AnalysisReport {
    /// Writes the report as pretty JSON into `dir`, returning the file path.
    ///
    /// The JSON goes to a temporary file in `dir` that is then renamed over
    /// [`REPORT_FILE_NAME`], so readers never see a half-written report.
    pub fn save_to_file(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write report")?;
        tmp.flush().context("Failed to flush report")?;

        let path = dir.join(REPORT_FILE_NAME);
        tmp.persist(&path)
            .with_context(|| format!("Failed to save report to {}", path.display()))?;

        info!(path = %path.display(), "Saved report");
        Ok(path)
    }
}

/// Assembles an [`AnalysisReport`] from scored data.
pub struct ReportBuilder<'a> {
    options: &'a AnalysisOptions,
    repository: RepositorySummary,
    commits: Vec<ScoredCommit>,
    code_units: Vec<CodeUnit>,
    code_scores: Option<Vec<SentimentScore>>,
    cost: Option<CostInfo>,
    concurrency: usize,
    generated_at: DateTime<Utc>,
}

impl<'a> ReportBuilder<'a> {
    /// Starts a report for a repository.
    pub fn new(options: &'a AnalysisOptions, repository: RepositorySummary) -> Self {
        Self {
            options,
            repository,
            commits: Vec::new(),
            code_units: Vec::new(),
            code_scores: None,
            cost: None,
            concurrency: options.concurrency.unwrap_or(1),
            generated_at: Utc::now(),
        }
    }

    /// Scored commits, most recent first.
    pub fn commits(mut self, commits: Vec<ScoredCommit>) -> Self {
        self.commits = commits;
        self
    }

    /// Extracted code units, in file order.
    pub fn code_units(mut self, units: Vec<CodeUnit>) -> Self {
        self.code_units = units;
        self
    }

    /// Scores of the code units, one per unit.
    pub fn code_scores(mut self, scores: Vec<SentimentScore>) -> Self {
        self.code_scores = Some(scores);
        self
    }

    /// Cost details of a metered backend.
    pub fn cost(mut self, cost: Option<CostInfo>) -> Self {
        self.cost = cost;
        self
    }

    /// Effective classification pool size.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Overrides the generation time.
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// Builds the report, failing with [`AnalysisError::MalformedReport`] if
    /// the inputs are inconsistent.
    pub fn build(self) -> Result<AnalysisReport> {
        check_scores(self.commits.iter().map(|c| &c.score), "commit")?;
        if let Some(scores) = &self.code_scores {
            if scores.len() != self.code_units.len() {
                return Err(AnalysisError::MalformedReport(format!(
                    "{} code unit scores for {} code units",
                    scores.len(),
                    self.code_units.len()
                ))
                .into());
            }
            check_scores(scores.iter(), "code unit")?;
        }

        let aggregates = CommitAggregates::from_commits(&self.commits, self.options.bucket);
        check_aggregates(&aggregates, self.commits.len())?;

        let detailed_commits: Vec<DetailedCommit> = self
            .commits
            .iter()
            .map(|scored| DetailedCommit {
                hash: scored.commit.hash.clone(),
                author: scored.commit.author.clone(),
                timestamp: rfc3339(&scored.commit.timestamp),
                message: scored.commit.message.clone(),
                sentiment: scored.score.label,
                confidence: scored.score.confidence,
                value: scored.value(),
                keywords: Preprocessor::top_keywords(&scored.commit.cleaned_message, KEYWORDS_LEN),
            })
            .collect();
        let top_keywords = top_keywords(&detailed_commits);

        let insight = |index: &usize| {
            let scored = &self.commits[*index];
            CommitInsight {
                hash: scored.commit.hash.clone(),
                message: scored
                    .commit
                    .cleaned_message
                    .chars()
                    .take(INSIGHT_MESSAGE_LEN)
                    .collect(),
                value: scored.value(),
                confidence: scored.score.confidence,
                date: rfc3339(&scored.commit.timestamp),
                author: scored.commit.author.clone(),
            }
        };
        let top_insights = TopInsights {
            most_positive_commits: aggregates.most_positive.iter().map(insight).collect(),
            most_negative_commits: aggregates.most_negative.iter().map(insight).collect(),
        };

        let comments = self
            .code_units
            .iter()
            .filter(|u| u.kind == UnitKind::Comment);
        let functions = self
            .code_units
            .iter()
            .filter(|u| u.kind == UnitKind::Function);
        let comments_found = comments.clone().count();
        let functions_found = functions.clone().count();
        let extracted_data = ExtractedData {
            sample_comments: comments.take(SAMPLE_LEN).cloned().collect(),
            sample_functions: functions.take(SAMPLE_LEN).cloned().collect(),
        };

        let code_sentiment = self
            .code_scores
            .as_deref()
            .map(|scores| CodeSentimentStats::from_units(&self.code_units, scores));

        let cost_tracking = if self.options.track_cost {
            self.cost
        } else {
            None
        };

        debug!(
            commits = self.commits.len(),
            comments = comments_found,
            functions = functions_found,
            "Built report"
        );

        Ok(AnalysisReport {
            metadata: ReportMetadata {
                generated_at: self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                tool_version: crate::VERSION.to_string(),
                analysis_type: ANALYSIS_TYPE.to_string(),
                parameters: ReportParameters::from_options(self.options, self.concurrency),
            },
            repository: self.repository,
            analysis_summary: AnalysisSummary {
                commits_analyzed: self.commits.len(),
                comments_found,
                functions_found,
                average_sentiment: round3(aggregates.average_sentiment),
                mood_category: aggregates.mood,
                mood_description: aggregates.mood.description().to_string(),
            },
            sentiment_distribution: aggregates.distribution,
            top_insights,
            detailed_commits,
            extracted_data,
            author_stats: aggregates.authors,
            timeline: aggregates.timeline,
            top_keywords,
            code_sentiment,
            cost_tracking,
        })
    }
}

fn check_scores<'s, I>(scores: I, what: &str) -> Result<()>
where
    I: IntoIterator<Item = &'s SentimentScore>,
{
    for score in scores {
        if !(0.0..=1.0).contains(&score.confidence) {
            return Err(AnalysisError::MalformedReport(format!(
                "{what} confidence {} outside [0, 1]",
                score.confidence
            ))
            .into());
        }
    }
    Ok(())
}

fn check_aggregates(aggregates: &CommitAggregates, commits: usize) -> Result<()> {
    let malformed = |msg: String| -> Result<()> { Err(AnalysisError::MalformedReport(msg).into()) };

    if aggregates.distribution.total() != commits {
        return malformed(format!(
            "distribution counts {} units for {commits} commits",
            aggregates.distribution.total()
        ));
    }
    let by_author: usize = aggregates.authors.iter().map(|a| a.commit_count).sum();
    if by_author != commits {
        return malformed(format!("author groups hold {by_author} of {commits} commits"));
    }
    let by_bucket: usize = aggregates.timeline.iter().map(|b| b.commit_count).sum();
    if by_bucket != commits {
        return malformed(format!("time buckets hold {by_bucket} of {commits} commits"));
    }
    if aggregates
        .most_positive
        .iter()
        .any(|i| aggregates.most_negative.contains(i))
    {
        return malformed("a commit is both most positive and most negative".to_string());
    }
    Ok(())
}

/// Ranks keywords by the number of commits listing them, ties by first appearance.
fn top_keywords(commits: &[DetailedCommit]) -> Vec<KeywordCount> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut seen = 0;
    for keyword in commits.iter().flat_map(|c| c.keywords.iter()) {
        let entry = counts.entry(keyword.as_str()).or_insert((0, seen));
        entry.0 += 1;
        seen += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(keyword, (count, first))| (keyword, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(KEYWORDS_LEN)
        .map(|(keyword, count, _)| KeywordCount {
            keyword: keyword.to_string(),
            count,
        })
        .collect()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn rfc3339(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Layouts accepted by [`format_timestamp`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `2024-03-05 14:07:09`.
    #[default]
    Human,
    /// RFC 3339.
    Iso,
    /// `2024-03-05`.
    Date,
    /// `14:07:09`.
    Time,
}

impl FromStr for TimestampFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "iso" => Ok(Self::Iso),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            other => bail!("Unknown timestamp format: {other}"),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => f.write_str("human"),
            Self::Iso => f.write_str("iso"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
        }
    }
}

/// Reformats an RFC 3339 timestamp, in its own offset.
///
/// Input that does not parse is returned unchanged.
pub fn format_timestamp(timestamp: &str, format: TimestampFormat) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    match format {
        TimestampFormat::Human => parsed.format("%Y-%m-%d %H:%M:%S").to_string(),
        TimestampFormat::Iso => parsed.to_rfc3339(),
        TimestampFormat::Date => parsed.format("%Y-%m-%d").to_string(),
        TimestampFormat::Time => parsed.format("%H:%M:%S").to_string(),
    }
}
