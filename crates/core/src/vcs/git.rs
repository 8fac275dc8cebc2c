//! [`VersionControlPort`] backed by a local git checkout.
//!
//! Read-only queries go through `git2`; anything that mutates the index,
//! working tree or refs shells out to the `git` binary so that hooks,
//! merge drivers and user config behave exactly as on the command line.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use git2::{BranchType, Commit, ErrorCode, Repository, StatusOptions};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{MergeOutcome, StageSide, VersionControlPort};
use crate::errors::VcsError;

/// Git adapter rooted at a working tree.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    /// Open the repository containing `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VcsError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::discover(path)
            .map_err(|_| VcsError::RepositoryNotFound(path.display().to_string()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| VcsError::RepositoryNotFound(path.display().to_string()))?
            .to_path_buf();
        Ok(Self { workdir })
    }

    fn repo(&self) -> Result<Repository, VcsError> {
        Repository::open(&self.workdir)
            .map_err(|_| VcsError::RepositoryNotFound(self.workdir.display().to_string()))
    }

    fn git(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, VcsError> {
        debug!(cmd = %format!("git {}", args.join(" ")), "running git command");
        let output = self.git(args).output().await?;
        check_output(format!("git {}", args.first().copied().unwrap_or_default()), output)
    }

    /// Take one side of a conflicted path. When the path is conflicted but
    /// that side has no index entry, the side deleted the file and the path
    /// is removed instead.
    async fn resolve_side(&self, path: &str, side: StageSide) -> Result<(), VcsError> {
        let (conflicted, present) = {
            let repo = self.repo()?;
            let index = repo.index()?;
            let p = Path::new(path);
            let conflicted = (1..=3).any(|stage| index.get_path(p, stage).is_some());
            (conflicted, index.get_path(p, side.stage_number()).is_some())
        };
        if conflicted && !present {
            debug!(path, ?side, "side deleted the file, removing");
            self.run_git(&["rm", "-f", "--ignore-unmatch", "--", path])
                .await?;
            return Ok(());
        }
        let flag = match side {
            StageSide::Ours => "--ours",
            StageSide::Theirs => "--theirs",
        };
        self.run_git(&["checkout", flag, "--", path]).await?;
        self.run_git(&["add", "--", path]).await?;
        Ok(())
    }
}

fn check_output(command: String, output: Output) -> Result<String, VcsError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        warn!(command = %command, exit_code, %stderr, "command failed");
        return Err(VcsError::CommandFailed {
            command,
            exit_code,
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn find_commit<'r>(repo: &'r Repository, rev: &str) -> Result<Commit<'r>, VcsError> {
    repo.revparse_single(rev)
        .and_then(|obj| obj.peel_to_commit())
        .map_err(|_| VcsError::RefNotFound(rev.to_string()))
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn path_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\\', "/")
}

#[async_trait]
impl VersionControlPort for GitCli {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    #[instrument(skip(self))]
    async fn fetch(&self, remote: &str, timeout: Duration) -> Result<(), VcsError> {
        let mut cmd = self.git(&["fetch", "--tags", "--force", remote]);
        cmd.kill_on_drop(true);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(remote, secs = timeout.as_secs(), "fetch timed out");
                return Err(VcsError::Timeout {
                    command: format!("git fetch {remote}"),
                    secs: timeout.as_secs(),
                });
            }
        };
        check_output("git fetch".into(), output)?;
        info!(remote, "fetch completed");
        Ok(())
    }

    async fn current_branch(&self) -> Result<String, VcsError> {
        let repo = self.repo()?;
        let head = repo.head().map_err(|_| VcsError::DetachedHead)?;
        if !head.is_branch() {
            return Err(VcsError::DetachedHead);
        }
        head.shorthand()
            .map(String::from)
            .ok_or(VcsError::DetachedHead)
    }

    async fn is_clean(&self) -> Result<bool, VcsError> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }

    async fn has_remote(&self, name: &str) -> Result<bool, VcsError> {
        Ok(self.repo()?.find_remote(name).is_ok())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, VcsError> {
        Ok(self.repo()?.find_branch(name, BranchType::Local).is_ok())
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, name: &str, from: &str) -> Result<(), VcsError> {
        self.run_git(&["checkout", "-b", name, from]).await?;
        info!(name, from, "created branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn backup_and_delete_branch(&self, name: &str) -> Result<Option<String>, VcsError> {
        if !self.branch_exists(name).await? {
            return Ok(None);
        }
        let backup = format!("{name}-backup-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        self.run_git(&["branch", "-m", name, &backup]).await?;
        info!(name, backup = %backup, "moved existing branch aside");
        Ok(Some(backup))
    }

    #[instrument(skip(self))]
    async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        self.run_git(&["checkout", branch]).await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn merge(&self, rev: &str, message: &str) -> Result<MergeOutcome, VcsError> {
        let output = self
            .git(&["merge", "--no-ff", "--no-edit", "-m", message, rev])
            .output()
            .await?;
        if output.status.success() {
            info!(rev, "merge completed cleanly");
            return Ok(MergeOutcome {
                success: true,
                conflicted_paths: Vec::new(),
            });
        }

        let conflicted_paths = self.conflicted_files().await?;
        if conflicted_paths.is_empty() {
            // Failed for a reason other than conflicts.
            check_output("git merge".into(), output)?;
        }
        info!(rev, conflicts = conflicted_paths.len(), "merge stopped with conflicts");
        Ok(MergeOutcome {
            success: false,
            conflicted_paths,
        })
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, VcsError> {
        let repo = self.repo()?;
        let index = repo.index()?;
        let mut paths = BTreeSet::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                paths.insert(path_string(&entry.path));
            }
        }
        Ok(paths.into_iter().collect())
    }

    #[instrument(skip(self))]
    async fn stage(&self, paths: &[String]) -> Result<(), VcsError> {
        if paths.is_empty() {
            self.run_git(&["add", "-u"]).await?;
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_git(&args).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> Result<(), VcsError> {
        self.run_git(&["rm", "-f", "--ignore-unmatch", "--", path])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn commit(&self, message: &str) -> Result<String, VcsError> {
        self.run_git(&["commit", "--no-verify", "-m", message]).await?;
        let sha = self
            .rev_parse("HEAD")
            .await?
            .ok_or_else(|| VcsError::RefNotFound("HEAD".into()))?;
        info!(sha = %sha, "committed");
        Ok(sha)
    }

    #[instrument(skip(self))]
    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), VcsError> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.extend([remote, branch]);
        self.run_git(&args).await?;
        info!(remote, branch, "push completed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_ours(&self, path: &str) -> Result<(), VcsError> {
        self.resolve_side(path, StageSide::Ours).await
    }

    #[instrument(skip(self))]
    async fn resolve_theirs(&self, path: &str) -> Result<(), VcsError> {
        self.resolve_side(path, StageSide::Theirs).await
    }

    async fn show_stage(&self, path: &str, side: StageSide) -> Result<Option<String>, VcsError> {
        let repo = self.repo()?;
        let index = repo.index()?;
        let Some(entry) = index.get_path(Path::new(path), side.stage_number()) else {
            return Ok(None);
        };
        let blob = repo.find_blob(entry.id)?;
        Ok(String::from_utf8(blob.content().to_vec()).ok())
    }

    async fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError> {
        let repo = self.repo()?;
        let tree = find_commit(&repo, rev)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Ok(blob) = repo.find_blob(entry.id()) else {
            return Ok(None);
        };
        Ok(String::from_utf8(blob.content().to_vec()).ok())
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<String, VcsError> {
        let repo = self.repo()?;
        let left = find_commit(&repo, a)?.id();
        let right = find_commit(&repo, b)?.id();
        Ok(repo.merge_base(left, right)?.to_string())
    }

    async fn changed_files(&self, from: &str, to: &str) -> Result<Vec<String>, VcsError> {
        let repo = self.repo()?;
        let old = find_commit(&repo, from)?.tree()?;
        let new = find_commit(&repo, to)?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&old), Some(&new), None)?;
        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                paths.insert(path.to_string_lossy().replace('\\', "/"));
            }
        }
        debug!(from, to, count = paths.len(), "collected changed files");
        Ok(paths.into_iter().collect())
    }

    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let repo = self.repo()?;
        let id = repo
            .revparse_single(rev)
            .and_then(|obj| obj.peel_to_commit())
            .map(|commit| commit.id().to_string())
            .ok();
        Ok(id)
    }

    async fn tags_pointing_at(&self, rev: &str) -> Result<Vec<String>, VcsError> {
        let output = self.run_git(&["tag", "--points-at", rev]).await?;
        Ok(lines(&output))
    }

    #[instrument(skip(self))]
    async fn list_remote_tags(&self, remote: &str) -> Result<Vec<String>, VcsError> {
        let output = self
            .run_git(&["ls-remote", "--tags", "--refs", remote])
            .await?;
        let tags: Vec<String> = output
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .filter_map(|(_, reference)| reference.trim().strip_prefix("refs/tags/"))
            .map(String::from)
            .collect();
        debug!(remote, count = tags.len(), "listed remote tags");
        Ok(tags)
    }

    #[instrument(skip(self))]
    async fn run_command(&self, argv: &[String]) -> Result<String, VcsError> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(String::new());
        };
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        check_output(argv.join(" "), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str) -> git2::Oid {
        let root = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        let parents: Vec<Commit<'_>> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_repo_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GitCli::open(dir.path().join("missing")),
            Err(VcsError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_queries() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_files(&repo, &[("README.md", "# Nimbus\n")], "initial");
        let second = commit_files(
            &repo,
            &[("README.md", "# Nimbus 2\n"), ("docs/new.md", "new\n")],
            "second",
        );

        let git = GitCli::open(dir.path()).unwrap();
        assert_eq!(git.rev_parse("HEAD").await.unwrap(), Some(second.to_string()));
        assert_eq!(git.rev_parse("no-such-ref").await.unwrap(), None);

        assert_eq!(
            git.show_file(&first.to_string(), "README.md").await.unwrap().as_deref(),
            Some("# Nimbus\n")
        );
        assert_eq!(git.show_file("HEAD", "missing.md").await.unwrap(), None);

        let changed = git
            .changed_files(&first.to_string(), &second.to_string())
            .await
            .unwrap();
        assert_eq!(changed, vec!["README.md", "docs/new.md"]);

        assert_eq!(
            git.merge_base(&first.to_string(), "HEAD").await.unwrap(),
            first.to_string()
        );

        let branch = git.current_branch().await.unwrap();
        assert!(git.branch_exists(&branch).await.unwrap());
        assert!(!git.branch_exists("forksync/nope").await.unwrap());
        assert!(!git.has_remote("upstream").await.unwrap());
        assert!(git.conflicted_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_clean_ignores_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_files(&repo, &[("a.txt", "a\n")], "initial");
        let git = GitCli::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("untracked.txt"), "x").unwrap();
        assert!(git.is_clean().await.unwrap());

        std::fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        assert!(!git.is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_command_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let git = GitCli::open(dir.path()).unwrap();
        assert_eq!(git.run_command(&[]).await.unwrap(), "");
    }
}
