//! Commit-level, author-level, temporal and corpus-level sentiment statistics.
//!
//! Everything here is pure: the aggregator runs after all scores are in and
//! never touches the repository or the classifier.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::{CodeUnit, UnitKind};
use crate::git::Commit;
use crate::sentiment::{Origin, ScoredText, SentimentLabel, SentimentScore};

/// Number of commits kept at each end of the sentiment range.
pub const EXTREMES_LEN: usize = 5;

/// Averages at or beyond this magnitude leave the neutral mood.
pub const MOOD_THRESHOLD: f64 = 0.15;

/// Calendar granularity of the timeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    /// `YYYY-MM-DD`.
    #[default]
    Day,
    /// ISO week, `YYYY-Www`.
    Week,
    /// `YYYY-MM`.
    Month,
}

impl BucketGranularity {
    /// Bucket key for a timestamp, taken on its UTC date.
    ///
    /// Keys of one granularity sort lexically in chronological order.
    pub fn key(self, timestamp: &DateTime<FixedOffset>) -> String {
        let date = timestamp.with_timezone(&Utc).date_naive();
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }
}

impl fmt::Display for BucketGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => f.write_str("day"),
            Self::Week => f.write_str("week"),
            Self::Month => f.write_str("month"),
        }
    }
}

/// Per-label counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    /// Units labelled positive.
    #[serde(rename = "POSITIVE")]
    pub positive: usize,
    /// Units labelled neutral.
    #[serde(rename = "NEUTRAL")]
    pub neutral: usize,
    /// Units labelled negative.
    #[serde(rename = "NEGATIVE")]
    pub negative: usize,
}

impl SentimentDistribution {
    /// Counts the labels of `scores`.
    pub fn from_scores<'a, I>(scores: I) -> Self
    where
        I: IntoIterator<Item = &'a SentimentScore>,
    {
        let mut distribution = Self::default();
        for score in scores {
            distribution.record(score.label);
        }
        distribution
    }

    /// Adds one unit.
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Neutral => self.neutral += 1,
            SentimentLabel::Negative => self.negative += 1,
        }
    }

    /// Units counted.
    pub fn total(&self) -> usize {
        self.positive + self.neutral + self.negative
    }
}

/// Overall tone of a set of commits, derived from its average value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoodCategory {
    /// Average ≥ 0.15.
    #[serde(rename = "Positive/Joyful")]
    Joyful,
    /// Between the thresholds.
    #[serde(rename = "Neutral/Mixed")]
    Neutral,
    /// Average ≤ -0.15.
    #[serde(rename = "Frustrated")]
    Frustrated,
}

impl MoodCategory {
    /// Classifies an average sentiment value.
    pub fn from_value(value: f64) -> Self {
        if value >= MOOD_THRESHOLD {
            Self::Joyful
        } else if value <= -MOOD_THRESHOLD {
            Self::Frustrated
        } else {
            Self::Neutral
        }
    }

    /// One-sentence reading of the category.
    pub fn description(self) -> &'static str {
        match self {
            Self::Joyful => "The codebase shows positive energy and enthusiasm",
            Self::Neutral => "The codebase maintains a balanced emotional tone",
            Self::Frustrated => "The codebase shows signs of frustration and stress",
        }
    }
}

impl fmt::Display for MoodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joyful => f.write_str("Positive/Joyful"),
            Self::Neutral => f.write_str("Neutral/Mixed"),
            Self::Frustrated => f.write_str("Frustrated"),
        }
    }
}

/// A filtered commit together with the score of its message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCommit {
    /// The commit.
    pub commit: Commit,
    /// Score of the cleaned message.
    pub score: SentimentScore,
}

impl ScoredCommit {
    /// Signed sentiment value of the commit.
    pub fn value(&self) -> f64 {
        self.score.value()
    }
}

/// Statistics for one author identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorStats {
    /// `Name <email>`.
    pub author: String,
    /// Commits attributed to the author.
    pub commit_count: usize,
    /// Mean commit value.
    pub average_sentiment: f64,
    /// Label counts over the author's commits.
    pub distribution: SentimentDistribution,
}

/// Statistics for one calendar bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucketStats {
    /// Bucket key, e.g. `2024-03-05`, `2024-W10` or `2024-03`.
    pub bucket: String,
    /// Commits in the bucket.
    pub commit_count: usize,
    /// Mean commit value.
    pub average_sentiment: f64,
    /// Label counts over the bucket's commits.
    pub distribution: SentimentDistribution,
}

/// Statistics over scored code units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSentimentStats {
    /// Units scored.
    pub units_scored: usize,
    /// Mean unit value.
    pub average_sentiment: f64,
    /// Label counts over all units.
    pub distribution: SentimentDistribution,
    /// Label counts over function units.
    pub functions: SentimentDistribution,
    /// Label counts over comment units.
    pub comments: SentimentDistribution,
    /// Up to five units with negative values, lowest first.
    pub most_negative_units: Vec<ScoredText>,
}

impl CodeSentimentStats {
    /// Aggregates code units paired with their scores.
    pub fn from_units(units: &[CodeUnit], scores: &[SentimentScore]) -> Self {
        let mut functions = SentimentDistribution::default();
        let mut comments = SentimentDistribution::default();
        for (unit, score) in units.iter().zip(scores) {
            match unit.kind {
                UnitKind::Function => functions.record(score.label),
                UnitKind::Comment => comments.record(score.label),
            }
        }

        let mut negative: Vec<(&CodeUnit, &SentimentScore)> = units
            .iter()
            .zip(scores)
            .filter(|(_, score)| score.value() < 0.0)
            .collect();
        // Stable sort keeps source order among equal values.
        negative.sort_by(|a, b| a.1.value().total_cmp(&b.1.value()));
        let most_negative_units = negative
            .into_iter()
            .take(EXTREMES_LEN)
            .map(|(unit, score)| ScoredText {
                origin: Origin::CodeUnit(unit.id()),
                score: *score,
            })
            .collect();

        Self {
            units_scored: scores.len(),
            average_sentiment: mean(scores.iter().map(SentimentScore::value)),
            distribution: SentimentDistribution::from_scores(scores),
            functions,
            comments,
            most_negative_units,
        }
    }
}

/// Everything derived from a set of scored commits.
///
/// Extremes are indices into the slice the aggregates were built from.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAggregates {
    /// Label counts over all commits.
    pub distribution: SentimentDistribution,
    /// Mean commit value; 0 for no commits.
    pub average_sentiment: f64,
    /// Mood of the average.
    pub mood: MoodCategory,
    /// One entry per author, most active first.
    pub authors: Vec<AuthorStats>,
    /// One entry per bucket, oldest first.
    pub timeline: Vec<TimeBucketStats>,
    /// Up to five commits with positive values, highest first.
    pub most_positive: Vec<usize>,
    /// Up to five commits with negative values, lowest first.
    pub most_negative: Vec<usize>,
}

impl CommitAggregates {
    /// Aggregates scored commits, bucketing the timeline at `granularity`.
    pub fn from_commits(commits: &[ScoredCommit], granularity: BucketGranularity) -> Self {
        let average_sentiment = mean(commits.iter().map(ScoredCommit::value));
        let (most_positive, most_negative) = extremes(commits);

        Self {
            distribution: SentimentDistribution::from_scores(commits.iter().map(|c| &c.score)),
            average_sentiment,
            mood: MoodCategory::from_value(average_sentiment),
            authors: author_stats(commits),
            timeline: timeline(commits, granularity),
            most_positive,
            most_negative,
        }
    }
}

/// Arithmetic mean, 0 for an empty input.
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn group_stats<'a, I>(commits: I) -> (usize, f64, SentimentDistribution)
where
    I: IntoIterator<Item = &'a ScoredCommit>,
{
    let group: Vec<&ScoredCommit> = commits.into_iter().collect();
    (
        group.len(),
        mean(group.iter().map(|c| c.value())),
        SentimentDistribution::from_scores(group.iter().map(|c| &c.score)),
    )
}

fn author_stats(commits: &[ScoredCommit]) -> Vec<AuthorStats> {
    let mut groups: BTreeMap<&str, Vec<&ScoredCommit>> = BTreeMap::new();
    for scored in commits {
        groups
            .entry(scored.commit.author.as_str())
            .or_default()
            .push(scored);
    }

    let mut stats: Vec<AuthorStats> = groups
        .into_iter()
        .map(|(author, group)| {
            let (commit_count, average_sentiment, distribution) = group_stats(group);
            AuthorStats {
                author: author.to_string(),
                commit_count,
                average_sentiment,
                distribution,
            }
        })
        .collect();
    // BTreeMap order already breaks ties by author.
    stats.sort_by(|a, b| b.commit_count.cmp(&a.commit_count));
    stats
}

fn timeline(commits: &[ScoredCommit], granularity: BucketGranularity) -> Vec<TimeBucketStats> {
    let mut groups: BTreeMap<String, Vec<&ScoredCommit>> = BTreeMap::new();
    for scored in commits {
        groups
            .entry(granularity.key(&scored.commit.timestamp))
            .or_default()
            .push(scored);
    }

    groups
        .into_iter()
        .map(|(bucket, group)| {
            let (commit_count, average_sentiment, distribution) = group_stats(group);
            TimeBucketStats {
                bucket,
                commit_count,
                average_sentiment,
                distribution,
            }
        })
        .collect()
}

/// Indices of the most positive and most negative commits.
///
/// Positive extremes only hold commits with a value above zero, negative ones
/// only values below zero, so the lists never share a commit. Equal values put
/// the more recent commit first, then the smaller hash.
fn extremes(commits: &[ScoredCommit]) -> (Vec<usize>, Vec<usize>) {
    let recency = |a: usize, b: usize| {
        let (ca, cb) = (&commits[a].commit, &commits[b].commit);
        cb.timestamp
            .cmp(&ca.timestamp)
            .then_with(|| ca.hash.cmp(&cb.hash))
    };

    let mut positive: Vec<usize> = (0..commits.len())
        .filter(|&i| commits[i].value() > 0.0)
        .collect();
    positive.sort_by(|&a, &b| {
        commits[b]
            .value()
            .total_cmp(&commits[a].value())
            .then_with(|| recency(a, b))
    });
    positive.truncate(EXTREMES_LEN);

    let mut negative: Vec<usize> = (0..commits.len())
        .filter(|&i| commits[i].value() < 0.0)
        .collect();
    negative.sort_by(|&a, &b| {
        commits[a]
            .value()
            .total_cmp(&commits[b].value())
            .then_with(|| recency(a, b))
    });
    negative.truncate(EXTREMES_LEN);

    (positive, negative)
}
