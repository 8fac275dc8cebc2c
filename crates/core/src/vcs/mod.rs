//! Version-control port.
//!
//! The orchestrator and cascade talk to git only through
//! [`VersionControlPort`], so they can be driven by a scripted fake in
//! tests. [`GitCli`] is the production adapter.

pub mod git;

#[cfg(test)]
pub(crate) mod mock;

pub use git::GitCli;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::VcsError;

/// Result of attempting a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// `true` if the merge completed without conflicts.
    pub success: bool,
    /// Paths git left unmerged. Empty when `success` is true.
    pub conflicted_paths: Vec<String>,
}

/// Which side of a conflicted index entry to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSide {
    /// Stage 2: the branch being merged into (the fork).
    Ours,
    /// Stage 3: the branch being merged in (upstream).
    Theirs,
}

impl StageSide {
    pub fn stage_number(&self) -> i32 {
        match self {
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }
}

/// Every git primitive forksync needs.
///
/// Paths are repository-relative with forward slashes. Implementations
/// surface any failing primitive as a [`VcsError`]; callers treat those as
/// fatal.
#[async_trait]
pub trait VersionControlPort: Send + Sync {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Fetch a remote (with tags), giving up after `timeout`.
    async fn fetch(&self, remote: &str, timeout: Duration) -> Result<(), VcsError>;

    async fn current_branch(&self) -> Result<String, VcsError>;

    /// `true` if there are no staged or unstaged changes to tracked files.
    async fn is_clean(&self) -> Result<bool, VcsError>;

    async fn has_remote(&self, name: &str) -> Result<bool, VcsError>;

    async fn branch_exists(&self, name: &str) -> Result<bool, VcsError>;

    /// Create `name` at `from` and check it out.
    async fn create_branch(&self, name: &str, from: &str) -> Result<(), VcsError>;

    /// Move an existing branch out of the way. Returns the backup name, or
    /// `None` if the branch did not exist.
    async fn backup_and_delete_branch(&self, name: &str) -> Result<Option<String>, VcsError>;

    async fn checkout(&self, branch: &str) -> Result<(), VcsError>;

    /// Merge `rev` into the current branch. Conflicts are reported in the
    /// outcome, not as an error.
    async fn merge(&self, rev: &str, message: &str) -> Result<MergeOutcome, VcsError>;

    /// Paths currently unmerged in the index, sorted.
    async fn conflicted_files(&self) -> Result<Vec<String>, VcsError>;

    /// Stage the given paths, or every change to tracked files when `paths`
    /// is empty.
    async fn stage(&self, paths: &[String]) -> Result<(), VcsError>;

    /// Delete a path from the index and working tree.
    async fn remove(&self, path: &str) -> Result<(), VcsError>;

    /// Commit staged changes. Returns the new commit id.
    async fn commit(&self, message: &str) -> Result<String, VcsError>;

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), VcsError>;

    /// Resolve a conflict by taking the fork's side (deleting the file if
    /// the fork has none) and stage the result.
    async fn resolve_ours(&self, path: &str) -> Result<(), VcsError>;

    /// Resolve a conflict by taking upstream's side and stage the result.
    async fn resolve_theirs(&self, path: &str) -> Result<(), VcsError>;

    /// Text of one side of a conflicted entry. `None` if that side does
    /// not exist or is not UTF-8.
    async fn show_stage(&self, path: &str, side: StageSide) -> Result<Option<String>, VcsError>;

    /// Text of `path` at `rev`. `None` if absent or not UTF-8.
    async fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError>;

    async fn merge_base(&self, a: &str, b: &str) -> Result<String, VcsError>;

    /// Paths that differ between two revisions.
    async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>, VcsError>;

    /// Resolve a revision to a commit id, `None` if it does not exist.
    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError>;

    async fn tags_pointing_at(&self, rev: &str) -> Result<Vec<String>, VcsError>;

    /// Tag names advertised by a remote.
    async fn list_remote_tags(&self, remote: &str) -> Result<Vec<String>, VcsError>;

    /// Run an arbitrary command in the working tree. Returns stdout.
    async fn run_command(&self, argv: &[String]) -> Result<String, VcsError>;
}
