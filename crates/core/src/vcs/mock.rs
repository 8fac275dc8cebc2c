//! Scripted in-memory [`VersionControlPort`] for unit tests.
//!
//! Conflict sides and file contents are seeded up front; resolutions write
//! real files under a temporary root so transforms can read them back.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{MergeOutcome, StageSide, VersionControlPort};
use crate::errors::VcsError;

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub current_branch: String,
    pub clean: bool,
    pub remotes: Vec<String>,
    pub branches: BTreeSet<String>,
    pub revs: HashMap<String, String>,
    pub files: HashMap<(String, String), String>,
    pub changed: Vec<String>,
    pub remote_tags: Vec<String>,
    pub tags_at: HashMap<String, Vec<String>>,
    /// Paths the next merge leaves conflicted.
    pub merge_conflicts: Vec<String>,
    pub ours: HashMap<String, String>,
    pub theirs: HashMap<String, String>,
    pub conflicted: BTreeSet<String>,
    /// Paths that become conflicted whenever `remove` is called.
    pub conflict_on_remove: Vec<String>,
    pub fail_fetch: bool,
    pub staged: Vec<String>,
    pub removed: Vec<String>,
    pub commits: Vec<String>,
    pub pushes: Vec<(String, String)>,
    pub commands: Vec<Vec<String>>,
    /// Every call that would change refs, the index or the working tree.
    pub mutations: Vec<String>,
}

pub(crate) struct MockVcs {
    root: PathBuf,
    pub state: Mutex<MockState>,
}

impl MockVcs {
    pub fn new(root: &Path) -> Self {
        let state = MockState {
            current_branch: "main".into(),
            clean: true,
            remotes: vec!["origin".into(), "upstream".into()],
            branches: BTreeSet::from(["main".to_string()]),
            ..MockState::default()
        };
        Self {
            root: root.to_path_buf(),
            state: Mutex::new(state),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Seed a conflicted path with both sides and conflict markers on disk.
    pub fn conflict(&self, path: &str, ours: Option<&str>, theirs: Option<&str>) {
        self.with(|s| {
            s.conflicted.insert(path.to_string());
            if let Some(o) = ours {
                s.ours.insert(path.to_string(), o.to_string());
            }
            if let Some(t) = theirs {
                s.theirs.insert(path.to_string(), t.to_string());
            }
        });
        self.write_markers(path, ours, theirs);
    }

    fn write_markers(&self, path: &str, ours: Option<&str>, theirs: Option<&str>) {
        let full = self.root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        let body = format!(
            "<<<<<<< ours\n{}=======\n{}>>>>>>> theirs\n",
            ours.unwrap_or(""),
            theirs.unwrap_or("")
        );
        std::fs::write(full, body).unwrap();
    }

    fn put(&self, path: &str, content: Option<String>) {
        let full = self.root.join(path);
        match content {
            Some(c) => {
                std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                std::fs::write(full, c).unwrap();
            }
            None => {
                let _ = std::fs::remove_file(full);
            }
        }
    }
}

#[async_trait]
impl VersionControlPort for MockVcs {
    fn workdir(&self) -> &Path {
        &self.root
    }

    async fn fetch(&self, remote: &str, timeout: Duration) -> Result<(), VcsError> {
        self.with(|s| {
            if s.fail_fetch {
                Err(VcsError::Timeout {
                    command: format!("git fetch {remote}"),
                    secs: timeout.as_secs(),
                })
            } else {
                Ok(())
            }
        })
    }

    async fn current_branch(&self) -> Result<String, VcsError> {
        Ok(self.with(|s| s.current_branch.clone()))
    }

    async fn is_clean(&self) -> Result<bool, VcsError> {
        Ok(self.with(|s| s.clean))
    }

    async fn has_remote(&self, name: &str) -> Result<bool, VcsError> {
        Ok(self.with(|s| s.remotes.iter().any(|r| r == name)))
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, VcsError> {
        Ok(self.with(|s| s.branches.contains(name)))
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), VcsError> {
        self.with(|s| {
            s.mutations.push(format!("create_branch {name} {from}"));
            s.branches.insert(name.to_string());
            s.current_branch = name.to_string();
        });
        Ok(())
    }

    async fn backup_and_delete_branch(&self, name: &str) -> Result<Option<String>, VcsError> {
        Ok(self.with(|s| {
            if !s.branches.remove(name) {
                return None;
            }
            let backup = format!("{name}-backup-test");
            s.mutations.push(format!("backup {name}"));
            s.branches.insert(backup.clone());
            Some(backup)
        }))
    }

    async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        self.with(|s| {
            s.mutations.push(format!("checkout {branch}"));
            s.current_branch = branch.to_string();
        });
        Ok(())
    }

    async fn merge(&self, rev: &str, message: &str) -> Result<MergeOutcome, VcsError> {
        let conflicts = self.with(|s| {
            s.mutations.push(format!("merge {rev}"));
            if s.merge_conflicts.is_empty() {
                s.commits.push(message.to_string());
            }
            s.merge_conflicts.clone()
        });
        for path in &conflicts {
            let (ours, theirs) = self.with(|s| (s.ours.get(path).cloned(), s.theirs.get(path).cloned()));
            self.write_markers(path, ours.as_deref(), theirs.as_deref());
            self.with(|s| s.conflicted.insert(path.clone()));
        }
        Ok(MergeOutcome {
            success: conflicts.is_empty(),
            conflicted_paths: conflicts,
        })
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, VcsError> {
        Ok(self.with(|s| s.conflicted.iter().cloned().collect()))
    }

    async fn stage(&self, paths: &[String]) -> Result<(), VcsError> {
        self.with(|s| {
            s.mutations.push(format!("stage {}", paths.join(" ")));
            if paths.is_empty() {
                s.conflicted.clear();
            }
            for path in paths {
                s.conflicted.remove(path);
                s.staged.push(path.clone());
            }
        });
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), VcsError> {
        self.with(|s| {
            s.mutations.push(format!("remove {path}"));
            s.conflicted.remove(path);
            s.removed.push(path.to_string());
            let extra = s.conflict_on_remove.clone();
            s.conflicted.extend(extra);
        });
        self.put(path, None);
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String, VcsError> {
        Ok(self.with(|s| {
            s.mutations.push("commit".into());
            s.commits.push(message.to_string());
            format!("commit{}", s.commits.len())
        }))
    }

    async fn push(&self, remote: &str, branch: &str, _set_upstream: bool) -> Result<(), VcsError> {
        self.with(|s| {
            s.mutations.push(format!("push {remote} {branch}"));
            s.pushes.push((remote.to_string(), branch.to_string()));
        });
        Ok(())
    }

    async fn resolve_ours(&self, path: &str) -> Result<(), VcsError> {
        let content = self.with(|s| {
            s.mutations.push(format!("resolve_ours {path}"));
            s.conflicted.remove(path);
            s.ours.get(path).cloned()
        });
        self.put(path, content);
        Ok(())
    }

    async fn resolve_theirs(&self, path: &str) -> Result<(), VcsError> {
        let content = self.with(|s| {
            s.mutations.push(format!("resolve_theirs {path}"));
            s.conflicted.remove(path);
            s.theirs.get(path).cloned()
        });
        self.put(path, content);
        Ok(())
    }

    async fn show_stage(&self, path: &str, side: StageSide) -> Result<Option<String>, VcsError> {
        Ok(self.with(|s| match side {
            StageSide::Ours => s.ours.get(path).cloned(),
            StageSide::Theirs => s.theirs.get(path).cloned(),
        }))
    }

    async fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>, VcsError> {
        Ok(self.with(|s| s.files.get(&(rev.to_string(), path.to_string())).cloned()))
    }

    async fn merge_base(&self, _a: &str, _b: &str) -> Result<String, VcsError> {
        Ok("base0000".into())
    }

    async fn changed_files(&self, _from: &str, _to: &str) -> Result<Vec<String>, VcsError> {
        Ok(self.with(|s| s.changed.clone()))
    }

    async fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError> {
        Ok(self.with(|s| s.revs.get(rev).cloned()))
    }

    async fn tags_pointing_at(&self, rev: &str) -> Result<Vec<String>, VcsError> {
        Ok(self.with(|s| s.tags_at.get(rev).cloned().unwrap_or_default()))
    }

    async fn list_remote_tags(&self, _remote: &str) -> Result<Vec<String>, VcsError> {
        Ok(self.with(|s| s.remote_tags.clone()))
    }

    async fn run_command(&self, argv: &[String]) -> Result<String, VcsError> {
        self.with(|s| {
            s.mutations.push(format!("run {}", argv.join(" ")));
            s.commands.push(argv.to_vec());
        });
        Ok(String::new())
    }
}
