//! Commit records read from history and the filtered commits analysed downstream.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};

/// A history entry as read from the repository, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommit {
    /// Full SHA-1 hash of the commit.
    pub hash: String,
    /// Author display name.
    pub author_name: String,
    /// Author email address.
    pub author_email: String,
    /// Author timestamp with the author's UTC offset.
    pub timestamp: DateTime<FixedOffset>,
    /// Complete commit message, subject and body.
    pub message: String,
    /// Number of parent commits (merges have more than one).
    pub parent_count: usize,
    /// Paths touched relative to the first parent.
    pub changed_files: Vec<String>,
}

/// A commit that survived filtering and takes part in the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    /// Full SHA-1 hash of the commit.
    pub hash: String,
    /// Author identity in `Name <email>` form.
    pub author: String,
    /// Author timestamp with the author's UTC offset.
    pub timestamp: DateTime<FixedOffset>,
    /// The original commit message as written by the author.
    pub message: String,
    /// Message after URL, issue-reference and tag removal.
    pub cleaned_message: String,
    /// Paths touched by the commit.
    pub changed_files: Vec<String>,
}

impl RawCommit {
    /// Creates a `RawCommit` from a `git2::Commit`.
    pub fn from_git_commit(repo: &Repository, commit: &git2::Commit) -> Result<Self> {
        let author = commit.author();
        let when = author.when();
        let offset = FixedOffset::east_opt(when.offset_minutes() * 60).unwrap_or(Utc.fix());
        let timestamp = DateTime::from_timestamp(when.seconds(), 0)
            .context("Invalid commit timestamp")?
            .with_timezone(&offset);

        Ok(Self {
            hash: commit.id().to_string(),
            author_name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            author_email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            timestamp,
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            parent_count: commit.parent_count(),
            changed_files: changed_files(repo, commit)?,
        })
    }

    /// Returns the first line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    /// Returns the author identity used for grouping.
    pub fn author_identity(&self) -> String {
        format!("{} <{}>", self.author_name, self.author_email)
    }
}

/// Lists paths changed between a commit and its first parent.
fn changed_files(repo: &Repository, commit: &git2::Commit) -> Result<Vec<String>> {
    let commit_tree = commit.tree().context("Failed to get commit tree")?;

    let parent_tree = if commit.parent_count() > 0 {
        Some(
            commit
                .parent(0)
                .context("Failed to get parent commit")?
                .tree()
                .context("Failed to get parent tree")?,
        )
    } else {
        None
    };

    let diff = repo
        .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)
        .context("Failed to create diff")?;

    Ok(diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .and_then(|p| p.to_str())
                .map(str::to_string)
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw(message: &str) -> RawCommit {
        RawCommit {
            hash: "abc123".to_string(),
            author_name: "Ada".to_string(),
            author_email: "ada@example.com".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2024-01-15T10:30:00+02:00").unwrap(),
            message: message.to_string(),
            parent_count: 1,
            changed_files: vec![],
        }
    }

    #[test]
    fn subject_is_first_line() {
        let commit = raw("Add parser\n\nLonger body here.");
        assert_eq!(commit.subject(), "Add parser");
    }

    #[test]
    fn subject_of_empty_message() {
        assert_eq!(raw("").subject(), "");
    }

    #[test]
    fn author_identity_combines_name_and_email() {
        assert_eq!(raw("x").author_identity(), "Ada <ada@example.com>");
    }

    #[test]
    fn non_utf8_message_is_decoded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let tree = repo.treebuilder(None).unwrap().write().unwrap();

        // Latin-1 encoded "café" without an encoding header.
        let mut object = format!(
            "tree {tree}\n\
             author Dev <dev@example.com> 1700000000 +0100\n\
             committer Dev <dev@example.com> 1700000000 +0100\n\n"
        )
        .into_bytes();
        object.extend_from_slice(b"Fix caf\xe9 parser crash\n");
        let oid = repo
            .odb()
            .unwrap()
            .write(git2::ObjectType::Commit, &object)
            .unwrap();
        let commit = repo.find_commit(oid).unwrap();

        let raw = RawCommit::from_git_commit(&repo, &commit).unwrap();
        assert_eq!(raw.subject(), "Fix caf\u{FFFD} parser crash");
        assert_eq!(raw.author_name, "Dev");
        assert_eq!(raw.timestamp.offset().local_minus_utc(), 3600);
        assert!(raw.changed_files.is_empty());
    }
}
