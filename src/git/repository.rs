//! Git repository operations

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{ErrorCode, ObjectType, Oid, Repository, Sort, TreeWalkMode, TreeWalkResult};
use tracing::debug;

use crate::error::AnalysisError;
use crate::git::RawCommit;

/// Files larger than this are treated as unavailable (generated bundles, data dumps).
pub const MAX_FILE_BYTES: usize = 1024 * 1024;

/// Read-only view over a local git repository.
pub struct GitRepository {
    repo: Repository,
}

impl GitRepository {
    /// Opens the repository at the specified path.
    ///
    /// Fails with [`AnalysisError::RepositoryNotFound`] when `path` is not a
    /// git working tree or bare repository.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|e| {
            debug!(path = %path.display(), error = %e, "Failed to open git repository");
            AnalysisError::RepositoryNotFound {
                path: path.display().to_string(),
            }
        })?;

        Ok(Self { repo })
    }

    /// Returns the working tree path, or the git dir for bare repositories.
    pub fn workdir_path(&self) -> PathBuf {
        let path = self.repo.workdir().unwrap_or_else(|| self.repo.path());
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Resolves HEAD to a commit id, or `None` for a repository without commits.
    pub fn head_commit(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => {
                let commit = head
                    .peel_to_commit()
                    .context("Failed to peel HEAD to commit")?;
                Ok(Some(commit.id()))
            }
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to get HEAD reference"),
        }
    }

    /// Reads up to `limit` non-merge commits reachable from HEAD, most recent first.
    pub fn history(&self, limit: usize) -> Result<Vec<RawCommit>> {
        let mut commits = Vec::new();
        let Some(head) = self.head_commit()? else {
            return Ok(commits);
        };
        if limit == 0 {
            return Ok(commits);
        }

        let mut walker = self.repo.revwalk().context("Failed to create revwalk")?;
        walker
            .set_sorting(Sort::TIME)
            .context("Failed to set revwalk sorting")?;
        walker.push(head).context("Failed to push HEAD")?;

        for oid in walker {
            let oid = oid.context("Failed to get commit OID from walker")?;
            let commit = self
                .repo
                .find_commit(oid)
                .context("Failed to find commit")?;

            // Skip merge commits
            if commit.parent_count() > 1 {
                continue;
            }

            commits.push(RawCommit::from_git_commit(&self.repo, &commit)?);
            if commits.len() >= limit {
                break;
            }
        }

        debug!(count = commits.len(), limit, "Read commit history");
        Ok(commits)
    }

    /// Counts every commit reachable from HEAD, merges included.
    pub fn total_commits(&self) -> Result<usize> {
        let Some(head) = self.head_commit()? else {
            return Ok(0);
        };
        let mut walker = self.repo.revwalk().context("Failed to create revwalk")?;
        walker.push(head).context("Failed to push HEAD")?;

        let mut total = 0;
        for oid in walker {
            oid.context("Failed to get commit OID from walker")?;
            total += 1;
        }
        Ok(total)
    }

    /// Lists the file paths in a commit's tree.
    pub fn files_at(&self, commit: Oid) -> Result<BTreeSet<String>> {
        let tree = self
            .repo
            .find_commit(commit)
            .context("Failed to find commit")?
            .tree()
            .context("Failed to get commit tree")?;

        let mut files = BTreeSet::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.insert(format!("{root}{name}"));
                }
            }
            TreeWalkResult::Ok
        })
        .context("Failed to walk commit tree")?;

        Ok(files)
    }

    /// Sums the sizes, in bytes, of the blobs in a commit's tree.
    ///
    /// Only object headers are read, so file contents are never loaded.
    pub fn size_at(&self, commit: Oid) -> Result<u64> {
        let tree = self
            .repo
            .find_commit(commit)
            .context("Failed to find commit")?
            .tree()
            .context("Failed to get commit tree")?;
        let odb = self.repo.odb().context("Failed to open object database")?;

        let mut total = 0u64;
        let mut failure = None;
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            match odb.read_header(entry.id()) {
                Ok((size, _)) => {
                    total += size as u64;
                    TreeWalkResult::Ok
                }
                Err(e) => {
                    failure = Some((format!("{root}{}", entry.name().unwrap_or("?")), e));
                    TreeWalkResult::Abort
                }
            }
        })
        .or_else(|e| if failure.is_some() { Ok(()) } else { Err(e) })
        .context("Failed to walk commit tree")?;

        if let Some((path, e)) = failure {
            return Err(e).with_context(|| format!("Failed to read object header for {path}"));
        }
        Ok(total)
    }

    /// Reads a file's text at a commit.
    ///
    /// Missing, binary, oversized and non-UTF-8 files fail with
    /// [`AnalysisError::FileUnavailable`]; callers skip those. Any other
    /// error means the repository itself could not be read.
    pub fn content_of(&self, path: &str, commit: Oid) -> Result<String> {
        let tree = self
            .repo
            .find_commit(commit)
            .context("Failed to find commit")?
            .tree()
            .context("Failed to get commit tree")?;

        let unavailable = |reason: &str| AnalysisError::FileUnavailable {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(unavailable("not present at commit").into())
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to look up {path}")),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Err(unavailable("not a regular file").into());
        }

        let blob = self
            .repo
            .find_blob(entry.id())
            .with_context(|| format!("Failed to read blob for {path}"))?;
        if blob.is_binary() {
            return Err(unavailable("binary content").into());
        }
        if blob.size() > MAX_FILE_BYTES {
            return Err(unavailable("file too large").into());
        }

        match std::str::from_utf8(blob.content()) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Err(unavailable("not valid UTF-8").into()),
        }
    }
}

/// Returns true when the error is a per-file [`AnalysisError::FileUnavailable`].
pub fn is_file_unavailable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<AnalysisError>(),
        Some(AnalysisError::FileUnavailable { .. })
    )
}
