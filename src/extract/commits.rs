//! Commit filtering and cleaning.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::git::{Commit, RawCommit};
use crate::preprocess::Preprocessor;

/// Messages that say nothing about the change once cleaned.
const LOW_INFORMATION_MESSAGES: &[&str] = &[
    "wip", "fix", "fixes", "fixed", "update", "updates", "changes", "misc", "minor", "tmp",
    "typo", ".",
];

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static MERGE_SUBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^merge[\s:]").unwrap());

#[allow(clippy::unwrap_used)] // Compile-time constant regex pattern
static REVERT_SUBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^revert\b").unwrap());

/// Why a commit was left out of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// More than one parent, or a `Merge ...` subject.
    Merge,
    /// A `Revert ...` subject or a `This reverts commit` body.
    Revert,
    /// Nothing meaningful left after cleaning.
    Meaningless,
}

/// Per-reason counts of dropped commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Commits dropped as merges.
    pub merges: usize,
    /// Commits dropped as reverts.
    pub reverts: usize,
    /// Commits dropped for low-information messages.
    pub meaningless: usize,
}

impl FilterStats {
    /// Total number of dropped commits.
    pub fn total(&self) -> usize {
        self.merges + self.reverts + self.meaningless
    }

    fn record(&mut self, reason: FilterReason) {
        match reason {
            FilterReason::Merge => self.merges += 1,
            FilterReason::Revert => self.reverts += 1,
            FilterReason::Meaningless => self.meaningless += 1,
        }
    }
}

/// Decides whether a commit is dropped, given its cleaned message.
pub fn filter_reason(raw: &RawCommit, cleaned: &str) -> Option<FilterReason> {
    let subject = raw.subject();
    if raw.parent_count > 1 || MERGE_SUBJECT.is_match(subject) {
        return Some(FilterReason::Merge);
    }
    if REVERT_SUBJECT.is_match(subject) || raw.message.contains("This reverts commit") {
        return Some(FilterReason::Revert);
    }
    if is_meaningless(cleaned) {
        return Some(FilterReason::Meaningless);
    }
    None
}

fn is_meaningless(cleaned: &str) -> bool {
    let trimmed = cleaned.trim();
    if !Preprocessor::has_word_content(trimmed) {
        return true;
    }
    let bare = trimmed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    LOW_INFORMATION_MESSAGES.contains(&bare.as_str())
}

/// Filters and cleans history entries, preserving their order.
pub fn extract_commits(raw: Vec<RawCommit>) -> (Vec<Commit>, FilterStats) {
    let mut stats = FilterStats::default();
    let mut commits = Vec::with_capacity(raw.len());

    for entry in raw {
        let cleaned = Preprocessor::clean(&entry.message);
        if let Some(reason) = filter_reason(&entry, &cleaned) {
            debug!(hash = %entry.hash, ?reason, "Dropping commit");
            stats.record(reason);
            continue;
        }

        let author = entry.author_identity();
        commits.push(Commit {
            hash: entry.hash,
            author,
            timestamp: entry.timestamp,
            message: entry.message,
            cleaned_message: cleaned,
            changed_files: entry.changed_files,
        });
    }

    debug!(
        kept = commits.len(),
        merges = stats.merges,
        reverts = stats.reverts,
        meaningless = stats.meaningless,
        "Filtered commit history"
    );
    (commits, stats)
}
