//! End-to-end tests for upstream merges against real git repositories.
//!
//! These tests exercise `GitCli` and the real `MergeOrchestrator` with:
//! - A local "upstream" repository that publishes release tags
//! - A fork cloned from it, rebranded, with a bare "origin" for pushes
//!
//! No network I/O: every remote is a local path.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::json;
use tempfile::TempDir;

use forksync_core::config::{ForkSyncConfig, SAMPLE_CONFIG};
use forksync_core::errors::{MergeError, VcsError};
use forksync_core::models::{MergeStatus, Recommendation, TransformAction};
use forksync_core::orchestrator::{MergeOptions, MergeOrchestrator};
use forksync_core::vcs::{GitCli, StageSide, VersionControlPort};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn write_files(dir: &Path, files: &[(&str, String)]) {
    for (path, content) in files {
        let full = dir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
}

fn commit_all(dir: &Path, files: &[(&str, String)], message: &str) {
    write_files(dir, files);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
}

fn manifest(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap() + "\n"
}

fn read(dir: &Path, path: &str) -> String {
    std::fs::read_to_string(dir.join(path)).unwrap()
}

fn config() -> ForkSyncConfig {
    let mut config: ForkSyncConfig = toml::from_str(SAMPLE_CONFIG).unwrap();
    config.upstream.branch = "main".into();
    config.merge.lockfile_command = Vec::new();
    config
}

fn base_files() -> Vec<(&'static str, String)> {
    vec![
        ("README.md", "# Nimbus\n".into()),
        ("CONTRIBUTING.md", "Contribute to Nimbus.\n".into()),
        ("src/core.ts", "export const answer = 1;\n".into()),
        (
            "package.json",
            manifest(json!({
                "name": "nimbus-ai",
                "version": "1.0.0",
                "dependencies": { "lodash": "^4.17.0" }
            })),
        ),
    ]
}

/// The fork's typical rebranding of the shared base.
fn rebrand_files() -> Vec<(&'static str, String)> {
    vec![
        ("README.md", "# Cirrus\n".into()),
        ("CONTRIBUTING.md", "Contribute to Cirrus.\n".into()),
        (
            "package.json",
            manifest(json!({
                "name": "cirrus-cli",
                "version": "2.0.0",
                "dependencies": { "lodash": "^4.17.21" }
            })),
        ),
    ]
}

/// An upstream release touching every rebranded file plus source.
fn release_files() -> Vec<(&'static str, String)> {
    vec![
        ("README.md", "# Nimbus v2\n".into()),
        ("CONTRIBUTING.md", "Thanks for helping Nimbus.\n".into()),
        ("src/core.ts", "export const answer = 2;\n".into()),
        (
            "package.json",
            manifest(json!({
                "name": "nimbus-ai",
                "version": "1.1.0",
                "dependencies": { "lodash": "^4.17.5", "zod": "^3.0.0" }
            })),
        ),
    ]
}

struct Fixture {
    _tmp: TempDir,
    upstream: PathBuf,
    fork: PathBuf,
    origin: PathBuf,
}

/// Build upstream (tagged `v1.0.0` then `v1.1.0`) and a fork cloned at
/// `v1.0.0` with its own commit on `main`.
fn setup(fork_files: &[(&str, String)], upstream_files: &[(&str, String)]) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let upstream = tmp.path().join("upstream");
    let fork = tmp.path().join("fork");
    let origin = tmp.path().join("origin.git");

    std::fs::create_dir_all(&upstream).unwrap();
    git(&upstream, &["init", "-q"]);
    git(&upstream, &["checkout", "-q", "-b", "main"]);
    configure_identity(&upstream);
    commit_all(&upstream, &base_files(), "initial release");
    git(&upstream, &["tag", "v1.0.0"]);

    git(
        tmp.path(),
        &["clone", "-q", upstream.to_str().unwrap(), fork.to_str().unwrap()],
    );
    configure_identity(&fork);
    git(&fork, &["remote", "rename", "origin", "upstream"]);
    git(tmp.path(), &["init", "-q", "--bare", origin.to_str().unwrap()]);
    git(&fork, &["remote", "add", "origin", origin.to_str().unwrap()]);
    commit_all(&fork, fork_files, "rebrand");
    git(&fork, &["push", "-q", "origin", "main"]);

    commit_all(&upstream, upstream_files, "release 1.1.0");
    git(&upstream, &["tag", "v1.1.0"]);

    Fixture {
        _tmp: tmp,
        upstream,
        fork,
        origin,
    }
}

fn orchestrator(fork: &Path) -> MergeOrchestrator<GitCli> {
    let vcs = GitCli::open(fork).unwrap();
    MergeOrchestrator::new(vcs, config()).unwrap()
}

fn local_branches(dir: &Path) -> Vec<String> {
    git(dir, &["branch", "--format=%(refname:short)"])
        .lines()
        .map(String::from)
        .collect()
}

fn origin_has_branch(origin: &Path, branch: &str) -> bool {
    !git(origin, &["branch", "--list", branch]).is_empty()
}

// ===========================================================================
// Full runs
// ===========================================================================

/// Conflicts in fork-owned, branded and manifest files are all resolved by
/// the cascade and the result is pushed.
#[tokio::test]
async fn test_merge_auto_resolves_rebranded_fork() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(&rebrand_files(), &release_files());
    let orchestrator = orchestrator(&fx.fork);

    let run = orchestrator.run(&MergeOptions::default()).await.unwrap();
    assert_eq!(run.status, MergeStatus::AutoResolved);
    assert_eq!(run.report.upstream_version, "1.1.0");
    assert_eq!(run.report.merge_branch, "forksync/merge-1.1.0");
    assert!(run.report.manual_files().next().is_none());
    assert!(run.report_path.exists());

    assert_eq!(git(&fx.fork, &["rev-parse", "--abbrev-ref", "HEAD"]), "forksync/merge-1.1.0");
    assert_eq!(read(&fx.fork, "README.md"), "# Cirrus\n");
    assert_eq!(read(&fx.fork, "CONTRIBUTING.md"), "Thanks for helping Cirrus.\n");
    assert_eq!(read(&fx.fork, "src/core.ts"), "export const answer = 2;\n");

    let merged: serde_json::Value = serde_json::from_str(&read(&fx.fork, "package.json")).unwrap();
    assert_eq!(merged["name"], "cirrus-cli");
    assert_eq!(merged["version"], "2.0.0");
    assert_eq!(merged["dependencies"]["lodash"], "^4.17.21");
    assert_eq!(merged["dependencies"]["zod"], "^3.0.0");

    let vcs = orchestrator.vcs();
    assert!(vcs.conflicted_files().await.unwrap().is_empty());
    assert!(vcs.is_clean().await.unwrap());
    assert!(origin_has_branch(&fx.origin, "forksync/merge-1.1.0"));
    assert!(local_branches(&fx.fork)
        .iter()
        .any(|b| b.starts_with("forksync/backup/main-")));

    // The merge commit joins the fork and the transformed upstream branch.
    let parents = git(&fx.fork, &["rev-list", "--parents", "-n", "1", "HEAD"]);
    assert_eq!(parents.split_whitespace().count(), 3);
}

#[tokio::test]
async fn test_merge_without_conflicts_is_clean() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(
        &[("notes/fork.md", "Cirrus notes\n".to_string())],
        &[
            ("src/core.ts", "export const answer = 2;\n".to_string()),
            (
                "docs/guide.md",
                "Read the Nimbus guide at https://nimbus.dev/docs\n".to_string(),
            ),
        ],
    );
    let orchestrator = orchestrator(&fx.fork);

    let run = orchestrator.run(&MergeOptions::default()).await.unwrap();
    assert_eq!(run.status, MergeStatus::Clean);
    assert!(run.report.stage_log.is_empty());

    let guide = read(&fx.fork, "docs/guide.md");
    assert!(guide.contains("Cirrus"), "{guide}");
    assert!(!guide.to_lowercase().contains("nimbus"), "{guide}");
    assert_eq!(read(&fx.fork, "notes/fork.md"), "Cirrus notes\n");

    let log = git(&fx.fork, &["log", "--format=%s", "-n", "5"]);
    assert!(log.contains("[forksync] merge upstream 1.1.0"), "{log}");
    assert!(log.contains("[forksync] apply fork transforms to upstream 1.1.0"), "{log}");
    assert!(origin_has_branch(&fx.origin, "forksync/merge-1.1.0"));
}

/// A source file both sides changed stops the run; finalize completes it
/// after a human resolves the file.
#[tokio::test]
async fn test_residual_conflict_then_finalize() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let mut fork_files = rebrand_files();
    fork_files.push(("src/core.ts", "export const answer = 3;\n".into()));
    let fx = setup(&fork_files, &release_files());
    let orchestrator = orchestrator(&fx.fork);

    let run = orchestrator.run(&MergeOptions::default()).await.unwrap();
    assert_eq!(run.status, MergeStatus::NeedsManual);
    let manual: Vec<&str> = run.report.manual_files().map(|c| c.path.as_str()).collect();
    assert_eq!(manual, vec!["src/core.ts"]);
    assert_eq!(
        orchestrator.vcs().conflicted_files().await.unwrap(),
        vec!["src/core.ts"]
    );
    assert!(!origin_has_branch(&fx.origin, "forksync/merge-1.1.0"));

    // Finalizing too early is refused.
    let options = MergeOptions {
        target: Some("1.1.0".into()),
        ..Default::default()
    };
    let err = orchestrator.finalize(&options).await.unwrap_err();
    assert!(matches!(err, MergeError::UnresolvedConflicts(1)));

    write_files(&fx.fork, &[("src/core.ts", "export const answer = 23;\n".into())]);
    git(&fx.fork, &["add", "src/core.ts"]);

    let run = orchestrator.finalize(&options).await.unwrap();
    assert_eq!(run.status, MergeStatus::Clean);
    assert!(orchestrator.vcs().is_clean().await.unwrap());
    assert!(origin_has_branch(&fx.origin, "forksync/merge-1.1.0"));
    assert_eq!(
        git(&fx.fork, &["show", "HEAD:src/core.ts"]),
        "export const answer = 23;"
    );
    let parents = git(&fx.fork, &["rev-list", "--parents", "-n", "1", "HEAD"]);
    assert_eq!(parents.split_whitespace().count(), 3);
}

#[tokio::test]
async fn test_report_only_and_dry_run_leave_repo_untouched() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(&rebrand_files(), &release_files());
    let orchestrator = orchestrator(&fx.fork);
    let head = git(&fx.fork, &["rev-parse", "HEAD"]);

    let run = orchestrator
        .run(&MergeOptions {
            report_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(run.status, MergeStatus::Analyzed);
    let recs: Vec<(&str, Recommendation)> = run
        .report
        .conflicts
        .iter()
        .map(|c| (c.path.as_str(), c.recommendation))
        .collect();
    assert_eq!(
        recs,
        vec![
            ("CONTRIBUTING.md", Recommendation::BrandingTransform),
            ("README.md", Recommendation::KeepOurs),
            ("package.json", Recommendation::ManifestTransform),
            ("src/core.ts", Recommendation::Manual),
        ]
    );

    let run = orchestrator
        .run(&MergeOptions {
            dry_run: true,
            target: Some("v1.1.0".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(run.status, MergeStatus::DryRun);
    let contributing = run
        .report
        .transform_results
        .iter()
        .find(|r| r.file == "CONTRIBUTING.md")
        .unwrap();
    assert_eq!(contributing.action, TransformAction::Transformed);
    assert!(contributing.dry_run);

    assert_eq!(local_branches(&fx.fork), vec!["main"]);
    assert_eq!(git(&fx.fork, &["rev-parse", "HEAD"]), head);
    assert_eq!(read(&fx.fork, "CONTRIBUTING.md"), "Contribute to Cirrus.\n");
    assert!(orchestrator.vcs().is_clean().await.unwrap());
}

#[tokio::test]
async fn test_dirty_tree_fails_before_mutation() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(&rebrand_files(), &release_files());
    write_files(&fx.fork, &[("README.md", "# Cirrus (edited)\n".into())]);
    let orchestrator = orchestrator(&fx.fork);

    let err = orchestrator.run(&MergeOptions::default()).await.unwrap_err();
    assert!(matches!(err, MergeError::Precondition(_)));
    assert_eq!(local_branches(&fx.fork), vec!["main"]);

    let reports: Vec<_> = std::fs::read_dir(fx.fork.join(".forksync/reports"))
        .unwrap()
        .collect();
    assert_eq!(reports.len(), 1);
}

// ===========================================================================
// Adapter primitives
// ===========================================================================

#[tokio::test]
async fn test_git_cli_conflict_primitives() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(&rebrand_files(), &release_files());
    let vcs = GitCli::open(&fx.fork).unwrap();

    vcs.fetch("upstream", std::time::Duration::from_secs(60))
        .await
        .unwrap();
    let mut tags = vcs.list_remote_tags("upstream").await.unwrap();
    tags.sort();
    assert_eq!(tags, vec!["v1.0.0", "v1.1.0"]);
    let release = vcs.rev_parse("refs/tags/v1.1.0").await.unwrap().unwrap();
    assert_eq!(release, git(&fx.upstream, &["rev-parse", "v1.1.0"]));
    assert_eq!(vcs.tags_pointing_at(&release).await.unwrap(), vec!["v1.1.0"]);

    vcs.create_branch("integration", "main").await.unwrap();
    let outcome = vcs.merge("v1.1.0", "merge release").await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.conflicted_paths.contains(&"README.md".to_string()));

    assert_eq!(
        vcs.show_stage("README.md", StageSide::Ours).await.unwrap().as_deref(),
        Some("# Cirrus\n")
    );
    assert_eq!(
        vcs.show_stage("README.md", StageSide::Theirs).await.unwrap().as_deref(),
        Some("# Nimbus v2\n")
    );

    vcs.resolve_theirs("README.md").await.unwrap();
    assert_eq!(read(&fx.fork, "README.md"), "# Nimbus v2\n");
    vcs.resolve_ours("CONTRIBUTING.md").await.unwrap();
    assert_eq!(read(&fx.fork, "CONTRIBUTING.md"), "Contribute to Cirrus.\n");

    let remaining = vcs.conflicted_files().await.unwrap();
    assert!(!remaining.contains(&"README.md".to_string()));
    assert!(!remaining.contains(&"CONTRIBUTING.md".to_string()));

    // Moving a branch aside keeps its commits reachable.
    let backup = vcs
        .backup_and_delete_branch("main")
        .await
        .unwrap()
        .unwrap();
    assert!(backup.starts_with("main-backup-"));
    assert!(!vcs.branch_exists("main").await.unwrap());
    assert!(vcs.branch_exists(&backup).await.unwrap());
    assert_eq!(vcs.backup_and_delete_branch("main").await.unwrap(), None);
}

#[tokio::test]
async fn test_resolve_side_removes_only_deleted_sides() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(
        &rebrand_files(),
        &[("src/core.ts", "export const answer = 2;\n".to_string())],
    );
    git(&fx.upstream, &["rm", "-q", "CONTRIBUTING.md"]);
    git(&fx.upstream, &["commit", "-q", "-m", "drop contributing guide"]);
    git(&fx.upstream, &["tag", "v1.2.0"]);

    let vcs = GitCli::open(&fx.fork).unwrap();
    vcs.fetch("upstream", std::time::Duration::from_secs(60))
        .await
        .unwrap();
    let outcome = vcs.merge("v1.2.0", "merge release").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(vcs.conflicted_files().await.unwrap(), vec!["CONTRIBUTING.md"]);
    assert!(vcs
        .show_stage("CONTRIBUTING.md", StageSide::Theirs)
        .await
        .unwrap()
        .is_none());

    // A failed checkout on a path that is not conflicted is an error, not
    // a deletion.
    std::fs::write(fx.fork.join("scratch.txt"), "notes\n").unwrap();
    assert!(matches!(
        vcs.resolve_theirs("scratch.txt").await,
        Err(VcsError::CommandFailed { .. })
    ));
    assert!(fx.fork.join("scratch.txt").exists());

    vcs.resolve_theirs("CONTRIBUTING.md").await.unwrap();
    assert!(!fx.fork.join("CONTRIBUTING.md").exists());
    assert!(vcs.conflicted_files().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_fetch_times_out_on_stalled_remote() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let fx = setup(&rebrand_files(), &release_files());
    // The ssh transport hangs until the timeout kills git.
    git(&fx.fork, &["remote", "add", "stalled", "ssh://forksync.invalid/repo.git"]);
    git(&fx.fork, &["config", "core.sshCommand", "sleep 30 #"]);
    git(&fx.fork, &["config", "ssh.variant", "simple"]);

    let vcs = GitCli::open(&fx.fork).unwrap();
    let started = std::time::Instant::now();
    let err = vcs
        .fetch("stalled", std::time::Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, VcsError::Timeout { secs: 1, .. }), "{err}");
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
}
