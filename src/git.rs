//! Git operations and repository management.

pub mod commit;
pub mod repository;

pub use commit::{Commit, RawCommit};
pub use repository::{is_file_unavailable, GitRepository};
