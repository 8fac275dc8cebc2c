//! Run report: the audit record of one orchestrator run.
//!
//! A [`ConflictReport`] is filled in as the run progresses and written
//! exactly once, as Markdown, by [`ReportGenerator`]. Files are never
//! overwritten: a second report with the same name gets a numeric suffix.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cascade::StageRecord;
use crate::errors::ReportError;
use crate::models::{FileClassification, MergeStatus, Recommendation, TransformAction, TransformResult};

/// Everything known about one run.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub timestamp: DateTime<Utc>,
    pub status: MergeStatus,
    pub upstream_version: String,
    pub upstream_commit: String,
    pub base_branch: String,
    pub merge_branch: String,
    pub backup_branch: Option<String>,
    /// Files git could not merge (or, for analysis-only runs, every changed
    /// file).
    pub total_conflicts: usize,
    /// Classified files, with residual conflicts re-labelled `manual`.
    pub conflicts: Vec<FileClassification>,
    pub recommendations: Vec<String>,
    pub transform_results: Vec<TransformResult>,
    pub stage_log: Vec<StageRecord>,
    pub dependency_notes: Vec<String>,
    pub lockfiles_flagged: Vec<String>,
    pub failures: Vec<String>,
}

impl ConflictReport {
    pub fn new(base_branch: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: MergeStatus::Analyzed,
            upstream_version: String::new(),
            upstream_commit: String::new(),
            base_branch: base_branch.into(),
            merge_branch: String::new(),
            backup_branch: None,
            total_conflicts: 0,
            conflicts: Vec::new(),
            recommendations: Vec::new(),
            transform_results: Vec::new(),
            stage_log: Vec::new(),
            dependency_notes: Vec::new(),
            lockfiles_flagged: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Classifications that still need a human.
    pub fn manual_files(&self) -> impl Iterator<Item = &FileClassification> {
        self.conflicts
            .iter()
            .filter(|c| c.recommendation == Recommendation::Manual)
    }

    /// Fill `recommendations` with next steps derived from the current state.
    pub fn refresh_recommendations(&mut self) {
        let mut out = Vec::new();
        let manual = self.manual_files().count();
        let failed = self
            .transform_results
            .iter()
            .filter(|r| r.action == TransformAction::Failed)
            .count();

        match self.status {
            MergeStatus::NeedsManual => {
                out.push(format!(
                    "Resolve {manual} file(s) by hand on `{}`, stage them, then run `forksync finalize --target {}`.",
                    self.merge_branch, self.upstream_version
                ));
            }
            MergeStatus::Analyzed if manual > 0 => {
                out.push(format!(
                    "{manual} changed file(s) have no automatic rule and will need review if they conflict."
                ));
            }
            MergeStatus::Failed => {
                out.push("The run aborted; fix the failure below and re-run `forksync merge`.".into());
                if let Some(backup) = &self.backup_branch {
                    out.push(format!("The base branch was backed up to `{backup}`."));
                }
            }
            MergeStatus::Clean | MergeStatus::AutoResolved => {
                out.push(format!(
                    "Review `{}` and open a pull request into `{}`.",
                    self.merge_branch, self.base_branch
                ));
            }
            _ => {}
        }
        if failed > 0 {
            out.push(format!("{failed} transform(s) failed; see the transform table."));
        }
        if !self.lockfiles_flagged.is_empty() {
            out.push(format!(
                "Lock files were taken from the fork and must be regenerated: {}.",
                self.lockfiles_flagged.join(", ")
            ));
        }
        self.recommendations = out;
    }
}

/// Renders and persists reports into one directory.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Markdown rendering, grouped by recommendation.
    pub fn render(&self, report: &ConflictReport) -> String {
        let mut md = String::new();
        let version = if report.upstream_version.is_empty() {
            "unresolved"
        } else {
            report.upstream_version.as_str()
        };
        md.push_str(&format!("# Upstream merge report: {version}\n\n"));

        md.push_str("| Field | Value |\n|---|---|\n");
        let generated = report.timestamp.to_rfc3339();
        let total = report.total_conflicts.to_string();
        let status = report.status.to_string();
        let rows = [
            ("Generated", generated.as_str()),
            ("Status", status.as_str()),
            ("Upstream version", version),
            ("Upstream commit", report.upstream_commit.as_str()),
            ("Base branch", report.base_branch.as_str()),
            ("Merge branch", report.merge_branch.as_str()),
            ("Backup branch", report.backup_branch.as_deref().unwrap_or("")),
            ("Total conflicts", total.as_str()),
        ];
        for (field, value) in rows {
            if !value.is_empty() {
                md.push_str(&format!("| {field} | {value} |\n"));
            }
        }

        if !report.recommendations.is_empty() {
            md.push_str("\n## Recommendations\n\n");
            for line in &report.recommendations {
                md.push_str(&format!("- {line}\n"));
            }
        }

        if !report.failures.is_empty() {
            md.push_str("\n## Failures\n\n");
            for failure in &report.failures {
                md.push_str(&format!("- {failure}\n"));
            }
        }

        md.push_str("\n## Files\n");
        if report.conflicts.is_empty() {
            md.push_str("\nNo files.\n");
        }
        for rec in Recommendation::ALL {
            let group: Vec<&FileClassification> = report
                .conflicts
                .iter()
                .filter(|c| c.recommendation == rec)
                .collect();
            if group.is_empty() {
                continue;
            }
            md.push_str(&format!("\n### {} ({})\n\n", rec, group.len()));
            for c in group {
                md.push_str(&format!("- `{}` ({}): {}\n", c.path, c.file_type, c.reason));
            }
        }

        if !report.stage_log.is_empty() {
            md.push_str("\n## Cascade\n\n| Stage | Before | After | Resolved |\n|---|---|---|---|\n");
            for record in &report.stage_log {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    record.stage,
                    record.before,
                    record.after,
                    record.resolved.len()
                ));
            }
        }

        let interesting: Vec<&TransformResult> = report
            .transform_results
            .iter()
            .filter(|r| r.action != TransformAction::Skipped)
            .collect();
        if !interesting.is_empty() {
            md.push_str("\n## Transforms\n\n| File | Transform | Action | Replacements | Error |\n|---|---|---|---|---|\n");
            for r in interesting {
                md.push_str(&format!(
                    "| `{}` | {} | {}{} | {} | {} |\n",
                    r.file,
                    r.transform,
                    r.action,
                    if r.dry_run { " (dry run)" } else { "" },
                    r.replacements,
                    r.error.as_deref().unwrap_or("")
                ));
            }
        }

        if !report.dependency_notes.is_empty() {
            md.push_str("\n## Dependency decisions\n\n");
            for note in &report.dependency_notes {
                md.push_str(&format!("- {note}\n"));
            }
        }

        if !report.lockfiles_flagged.is_empty() {
            md.push_str("\n## Lock files to regenerate\n\n");
            for path in &report.lockfiles_flagged {
                md.push_str(&format!("- `{path}`\n"));
            }
        }

        md
    }

    /// Write the report under a fresh name and return its path.
    pub fn write(&self, report: &ConflictReport) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ReportError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let version = sanitize(if report.upstream_version.is_empty() {
            "unresolved"
        } else {
            &report.upstream_version
        });
        let stem = format!(
            "upstream-merge-{version}-{}",
            report.timestamp.format("%Y%m%d-%H%M%S")
        );
        let body = self.render(report);

        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{stem}.md")
            } else {
                format!("{stem}-{suffix}.md")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())
                        .map_err(|source| ReportError::Io {
                            path: path.display().to_string(),
                            source,
                        })?;
                    info!(path = %path.display(), status = %report.status, "report written");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(source) => {
                    return Err(ReportError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
