//! Upstream merge orchestration.
//!
//! The [`MergeOrchestrator`] sequences one run:
//!
//! 1. Validate the environment (remotes, clean tree, base branch).
//! 2. Fetch upstream, bounded by a wall-clock timeout.
//! 3. Resolve the target version to a commit.
//! 4. Classify every path upstream changed since the merge base.
//! 5. Create the backup, upstream and integration branches.
//! 6. Apply transforms on the upstream branch and commit them.
//! 7. Merge into the integration branch.
//! 8. Run the conflict cascade if git stopped with conflicts.
//! 9. Finalize: regenerate lock files, commit, push.
//!
//! A report is written at the end of every run, including runs that fail.
//! Residual conflicts are not an error: the run stops with
//! [`MergeStatus::NeedsManual`] and [`MergeOrchestrator::finalize`] picks up
//! once a human has resolved them.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cascade::ConflictCascade;
use crate::classifier::Classifier;
use crate::config::ForkSyncConfig;
use crate::errors::{ConfigError, MergeError};
use crate::models::{FileClassification, FileType, MergeStatus, TransformResult};
use crate::report::{ConflictReport, ReportGenerator};
use crate::transforms::TransformLibrary;
use crate::vcs::VersionControlPort;
use crate::version::{UpstreamTarget, VersionResolver};
use crate::workspace::Workspace;

/// Per-run switches, usually taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Version, tag or commit to merge. `None` means the latest release.
    pub target: Option<String>,
    /// Preview transforms without touching branches or files.
    pub dry_run: bool,
    pub skip_push: bool,
    /// Stop after classification and write the report.
    pub report_only: bool,
    /// Overrides `merge.author_prefix`.
    pub author_prefix: Option<String>,
    /// Overrides `fork.base_branch`.
    pub base_branch: Option<String>,
}

/// Result of a run that did not abort.
#[derive(Debug, Clone)]
pub struct MergeRun {
    pub status: MergeStatus,
    pub report: ConflictReport,
    pub report_path: PathBuf,
}

pub fn merge_branch_name(version: &str) -> String {
    format!("forksync/merge-{version}")
}

pub fn upstream_branch_name(version: &str) -> String {
    format!("forksync/upstream-{version}")
}

pub fn backup_branch_name(base: &str) -> String {
    format!("forksync/backup/{base}-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Drives a merge through a [`VersionControlPort`].
pub struct MergeOrchestrator<V> {
    vcs: V,
    config: ForkSyncConfig,
    classifier: Classifier,
    reports: ReportGenerator,
}

impl<V: VersionControlPort> MergeOrchestrator<V> {
    pub fn new(vcs: V, config: ForkSyncConfig) -> Result<Self, ConfigError> {
        let classifier = Classifier::from_config(&config)?;
        let reports = ReportGenerator::new(vcs.workdir().join(&config.merge.report_dir));
        info!(workdir = %vcs.workdir().display(), "initializing merge orchestrator");
        Ok(Self {
            vcs,
            config,
            classifier,
            reports,
        })
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn config(&self) -> &ForkSyncConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn base_branch(&self, options: &MergeOptions) -> String {
        options
            .base_branch
            .clone()
            .unwrap_or_else(|| self.config.fork.base_branch.clone())
    }

    fn author_prefix(&self, options: &MergeOptions) -> String {
        options
            .author_prefix
            .clone()
            .unwrap_or_else(|| self.config.merge.author_prefix.clone())
    }

    fn should_push(&self, options: &MergeOptions) -> bool {
        self.config.merge.push && !options.skip_push
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run a merge (or an analysis / dry run, depending on `options`).
    pub async fn run(&self, options: &MergeOptions) -> Result<MergeRun, MergeError> {
        let mut report = ConflictReport::new(self.base_branch(options));
        let result = self.do_run(options, &mut report).await;
        self.conclude(report, result)
    }

    /// Complete a run after residual conflicts were resolved by hand.
    pub async fn finalize(&self, options: &MergeOptions) -> Result<MergeRun, MergeError> {
        let mut report = ConflictReport::new(self.base_branch(options));
        let result = self.do_finalize(options, &mut report).await;
        self.conclude(report, result)
    }

    /// Write the report for a finished or failed run.
    fn conclude(
        &self,
        mut report: ConflictReport,
        result: Result<MergeStatus, MergeError>,
    ) -> Result<MergeRun, MergeError> {
        match result {
            Ok(status) => {
                report.status = status;
                report.refresh_recommendations();
                let report_path = self.reports.write(&report)?;
                info!(status = %status, report = %report_path.display(), "run complete");
                Ok(MergeRun {
                    status,
                    report,
                    report_path,
                })
            }
            Err(e) => {
                error!(error = %e, "run failed");
                report.status = MergeStatus::Failed;
                report.failures.push(e.to_string());
                report.refresh_recommendations();
                if let Err(write_err) = self.reports.write(&report) {
                    error!(error = %write_err, "could not write failure report");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn do_run(
        &self,
        options: &MergeOptions,
        report: &mut ConflictReport,
    ) -> Result<MergeStatus, MergeError> {
        let base = report.base_branch.clone();
        let mutating = !options.dry_run && !options.report_only;

        self.validate_environment(&base, mutating, options).await?;

        let upstream = &self.config.upstream;
        self.vcs
            .fetch(
                &upstream.remote,
                Duration::from_secs(self.config.merge.fetch_timeout_secs),
            )
            .await?;

        let target = self.resolve_target(options).await?;
        report.upstream_version = target.version.clone();
        report.upstream_commit = target.commit.clone();

        let classifications = self.analyze(&base, &target).await?;
        report.total_conflicts = classifications.len();
        report.conflicts = classifications.clone();

        if options.report_only {
            info!(files = classifications.len(), "analysis complete (report only)");
            return Ok(MergeStatus::Analyzed);
        }

        let fork_version = self.fork_version(&base).await?;
        let library = TransformLibrary::new(&self.config, fork_version)?;

        if options.dry_run {
            let preview = self
                .preview_transforms(&library, &base, &target, &classifications, report)
                .await?;
            report.transform_results = preview;
            return Ok(MergeStatus::DryRun);
        }

        let prefix = self.author_prefix(options);
        let merge_branch = merge_branch_name(&target.version);
        let upstream_branch = upstream_branch_name(&target.version);
        report.merge_branch = merge_branch.clone();

        // Branches.
        let backup = backup_branch_name(&base);
        self.vcs.create_branch(&backup, &base).await?;
        report.backup_branch = Some(backup);
        for name in [&upstream_branch, &merge_branch] {
            if let Some(moved) = self.vcs.backup_and_delete_branch(name).await? {
                warn!(branch = %name, backup = %moved, "replaced existing branch");
            }
        }
        self.vcs
            .create_branch(&upstream_branch, &target.commit)
            .await?;

        // Pre-merge transforms on the upstream-derived branch.
        let results = self
            .pre_merge_transforms(&library, &base, &classifications, report)
            .await?;
        let changed: Vec<String> = results
            .iter()
            .filter(|r| r.changed())
            .map(|r| r.file.clone())
            .collect();
        report.transform_results.extend(results);
        if !changed.is_empty() {
            self.vcs.stage(&changed).await?;
            self.vcs
                .commit(&format!(
                    "{prefix} apply fork transforms to upstream {}",
                    target.version
                ))
                .await?;
            info!(files = changed.len(), "committed pre-merge transforms");
        }

        // Merge.
        self.vcs.create_branch(&merge_branch, &base).await?;
        let merge_message = format!("{prefix} merge upstream {}", target.version);
        let outcome = self.vcs.merge(&upstream_branch, &merge_message).await?;

        let touches_dependencies = classifications
            .iter()
            .any(|c| c.file_type == FileType::Manifest || self.classifier.is_lockfile(&c.path));

        if outcome.success {
            info!(version = %target.version, "merge completed without conflicts");
            report.total_conflicts = 0;
            report.conflicts.clear();
            self.complete(&merge_branch, &merge_message, touches_dependencies, false, options)
                .await?;
            return Ok(MergeStatus::Clean);
        }

        info!(conflicts = outcome.conflicted_paths.len(), "running conflict cascade");
        let cascade = ConflictCascade::new(&self.vcs, &self.classifier, &library)
            .run()
            .await?;
        report.total_conflicts = outcome.conflicted_paths.len();
        report.conflicts = cascade
            .resolved
            .iter()
            .chain(cascade.remaining.iter())
            .cloned()
            .collect();
        report.stage_log = cascade.stage_log.clone();
        report.transform_results.extend(cascade.transform_results.iter().cloned());
        report.dependency_notes.extend(cascade.dependency_notes.iter().cloned());
        report.lockfiles_flagged = cascade.lockfiles_flagged.clone();

        if !cascade.converged() {
            warn!(
                remaining = cascade.remaining.len(),
                branch = %merge_branch,
                "merge needs manual resolution"
            );
            return Ok(MergeStatus::NeedsManual);
        }

        let regenerate = touches_dependencies || !cascade.lockfiles_flagged.is_empty();
        self.complete(&merge_branch, &merge_message, regenerate, true, options)
            .await?;
        Ok(MergeStatus::AutoResolved)
    }

    async fn do_finalize(
        &self,
        options: &MergeOptions,
        report: &mut ConflictReport,
    ) -> Result<MergeStatus, MergeError> {
        let base = report.base_branch.clone();
        let target = self.resolve_target(options).await?;
        report.upstream_version = target.version.clone();
        report.upstream_commit = target.commit.clone();

        let merge_branch = merge_branch_name(&target.version);
        report.merge_branch = merge_branch.clone();
        if self.vcs.current_branch().await? != merge_branch {
            if !self.vcs.branch_exists(&merge_branch).await? {
                return Err(MergeError::Precondition(format!(
                    "integration branch '{merge_branch}' does not exist; run `forksync merge` first"
                )));
            }
            self.vcs.checkout(&merge_branch).await?;
        }

        let classifications = self.analyze(&base, &target).await?;
        let touches_dependencies = classifications
            .iter()
            .any(|c| c.file_type == FileType::Manifest || self.classifier.is_lockfile(&c.path));

        let message = format!(
            "{} merge upstream {}",
            self.author_prefix(options),
            target.version
        );
        let committed = self
            .complete(&merge_branch, &message, touches_dependencies, false, options)
            .await?;
        debug!(committed, "finalize complete");
        Ok(MergeStatus::Clean)
    }

    async fn validate_environment(
        &self,
        base: &str,
        mutating: bool,
        options: &MergeOptions,
    ) -> Result<(), MergeError> {
        let upstream = &self.config.upstream.remote;
        if !self.vcs.has_remote(upstream).await? {
            return Err(MergeError::Precondition(format!(
                "remote '{upstream}' is not configured; add it with `git remote add {upstream} <url>`"
            )));
        }
        if !self.vcs.branch_exists(base).await? {
            return Err(MergeError::Precondition(format!(
                "base branch '{base}' does not exist"
            )));
        }
        if !mutating {
            return Ok(());
        }
        if !self.vcs.is_clean().await? {
            return Err(MergeError::Precondition(
                "working tree has uncommitted changes".into(),
            ));
        }
        let fork = &self.config.fork.remote;
        if self.should_push(options) && !self.vcs.has_remote(fork).await? {
            return Err(MergeError::Precondition(format!(
                "remote '{fork}' is not configured; pass --skip-push or add it"
            )));
        }
        debug!("environment validated");
        Ok(())
    }

    async fn resolve_target(&self, options: &MergeOptions) -> Result<UpstreamTarget, MergeError> {
        let input = options.target.as_deref().unwrap_or("latest");
        let resolver = VersionResolver::new(&self.vcs, &self.config.upstream);
        let target = resolver
            .resolve(input)
            .await?
            .ok_or_else(|| MergeError::UnresolvableVersion(input.to_string()))?;
        info!(version = %target.version, commit = %target.commit, "resolved upstream target");
        Ok(target)
    }

    /// Classify everything upstream changed since it diverged from `base`.
    async fn analyze(
        &self,
        base: &str,
        target: &UpstreamTarget,
    ) -> Result<Vec<FileClassification>, MergeError> {
        let merge_base = self.vcs.merge_base(base, &target.commit).await?;
        let changed = self.vcs.changed_files(&merge_base, &target.commit).await?;
        let classifications = self.classifier.classify_all(&changed);
        info!(
            merge_base = %merge_base,
            changed = classifications.len(),
            "classified upstream changes"
        );
        Ok(classifications)
    }

    /// The fork's release version: configured, or read from the root
    /// manifest on the base branch.
    async fn fork_version(&self, base: &str) -> Result<Option<String>, MergeError> {
        if let Some(version) = &self.config.fork.release_version {
            return Ok(Some(version.clone()));
        }
        let Some(text) = self.vcs.show_file(base, &self.config.manifest.root).await? else {
            return Ok(None);
        };
        let version = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("version")?.as_str().map(String::from));
        debug!(version = ?version, "read fork release version");
        Ok(version)
    }

    async fn fork_side(
        &self,
        base: &str,
        c: &FileClassification,
    ) -> Result<Option<String>, MergeError> {
        if c.file_type != FileType::Manifest {
            return Ok(None);
        }
        Ok(self.vcs.show_file(base, &c.path).await?)
    }

    async fn pre_merge_transforms(
        &self,
        library: &TransformLibrary,
        base: &str,
        classifications: &[FileClassification],
        report: &mut ConflictReport,
    ) -> Result<Vec<TransformResult>, MergeError> {
        let workspace = Workspace::new(self.vcs.workdir());
        let mut results = Vec::new();
        for c in classifications.iter().filter(|c| c.recommendation.is_transform()) {
            let ours = self.fork_side(base, c).await?;
            let applied = library.apply(&workspace, c, ours.as_deref(), false);
            report
                .dependency_notes
                .extend(applied.notes.iter().map(|n| format!("{}: {n}", c.path)));
            results.push(applied.result);
        }
        Ok(results)
    }

    async fn preview_transforms(
        &self,
        library: &TransformLibrary,
        base: &str,
        target: &UpstreamTarget,
        classifications: &[FileClassification],
        report: &mut ConflictReport,
    ) -> Result<Vec<TransformResult>, MergeError> {
        let mut results = Vec::new();
        for c in classifications.iter().filter(|c| c.recommendation.is_transform()) {
            let Some(content) = self.vcs.show_file(&target.commit, &c.path).await? else {
                results.push(TransformResult::skipped(&c.path, c.recommendation, true));
                continue;
            };
            let ours = self.fork_side(base, c).await?;
            let applied = library.apply_to_content(c, &content, ours.as_deref(), true);
            report
                .dependency_notes
                .extend(applied.notes.iter().map(|n| format!("{}: {n}", c.path)));
            results.push(applied.result);
        }
        let changing = results.iter().filter(|r| r.changed()).count();
        info!(files = results.len(), changing, "dry run preview complete");
        Ok(results)
    }

    /// Regenerate lock files if needed, commit, and push. Returns whether a
    /// commit was made.
    async fn complete(
        &self,
        merge_branch: &str,
        message: &str,
        regenerate: bool,
        merge_in_progress: bool,
        options: &MergeOptions,
    ) -> Result<bool, MergeError> {
        let remaining = self.vcs.conflicted_files().await?;
        if !remaining.is_empty() {
            return Err(MergeError::UnresolvedConflicts(remaining.len()));
        }

        let command = &self.config.merge.lockfile_command;
        if regenerate && !command.is_empty() {
            info!(command = %command.join(" "), "regenerating lock files");
            self.vcs
                .run_command(command)
                .await
                .map_err(|e| MergeError::LockfileRegeneration(e.to_string()))?;
        }

        self.vcs.stage(&[]).await?;
        let committed = if merge_in_progress || !self.vcs.is_clean().await? {
            self.vcs.commit(message).await?;
            true
        } else {
            debug!("nothing to commit");
            false
        };

        if self.should_push(options) {
            self.vcs
                .push(&self.config.fork.remote, merge_branch, true)
                .await?;
        } else {
            info!(branch = merge_branch, "skipping push");
        }
        Ok(committed)
    }
}
