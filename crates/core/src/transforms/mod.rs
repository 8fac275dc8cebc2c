//! Content transforms that carry fork identity into upstream files.
//!
//! [`TransformLibrary`] dispatches a classified file to the matching
//! transform: the JSON-aware [`ManifestTransform`] for manifests, and the
//! shared [`LineRewriter`] with a category [`RuleTable`] for everything
//! else. A transform that fails on one file reports `failed` for that file
//! and never aborts the batch.

pub mod manifest;
pub mod rules;

pub use manifest::ManifestTransform;
pub use rules::{LineRewriter, Rewrite, RewriteRule, RuleCategory, RuleSet, RuleTable};

use std::io;

use tracing::{debug, info, warn};

use crate::config::ForkSyncConfig;
use crate::errors::{ConfigError, TransformError};
use crate::models::{FileClassification, FileType, Recommendation, TransformAction, TransformResult};
use crate::workspace::Workspace;

/// A transform result together with the decisions it logged.
#[derive(Debug, Clone)]
pub struct AppliedTransform {
    pub result: TransformResult,
    /// New content, present only when the transform changed something.
    pub content: Option<String>,
    pub notes: Vec<String>,
}

/// Every transform, configured for one upstream/fork pair.
#[derive(Debug, Clone)]
pub struct TransformLibrary {
    rules: RuleSet,
    rewriter: LineRewriter,
    manifest: ManifestTransform,
}

impl TransformLibrary {
    /// Build the library. `fork_version` is the release version manifests
    /// are pinned to; `None` leaves versions alone.
    pub fn new(config: &ForkSyncConfig, fork_version: Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            rules: RuleSet::from_branding(&config.branding)?,
            rewriter: LineRewriter::from_branding(&config.branding),
            manifest: ManifestTransform::new(&config.manifest, &config.branding, fork_version),
        })
    }

    /// Whether `recommendation` has a transform that accepts `file_type`.
    pub fn handles(recommendation: Recommendation, file_type: FileType) -> bool {
        if recommendation == Recommendation::ManifestTransform {
            return file_type == FileType::Manifest;
        }
        RuleCategory::from_recommendation(recommendation)
            .is_some_and(|category| category.handles(file_type))
    }

    /// Rewrite `content` according to the classification. `ours` is the
    /// fork's copy and is only consulted by the manifest transform.
    ///
    /// `Ok(None)` means no transform applies to this file.
    pub fn transform_content(
        &self,
        classification: &FileClassification,
        content: &str,
        ours: Option<&str>,
    ) -> Result<Option<Rewrite>, TransformError> {
        let rec = classification.recommendation;
        if !Self::handles(rec, classification.file_type) {
            return Ok(None);
        }
        if rec == Recommendation::ManifestTransform {
            return self
                .manifest
                .transform(&classification.path, content, ours)
                .map(Some);
        }
        let Some(table) = RuleCategory::from_recommendation(rec).and_then(|c| self.rules.table(c))
        else {
            return Ok(None);
        };
        Ok(Some(self.rewriter.rewrite(table, content)))
    }

    /// Transform in-memory content and describe the outcome.
    pub fn apply_to_content(
        &self,
        classification: &FileClassification,
        content: &str,
        ours: Option<&str>,
        dry_run: bool,
    ) -> AppliedTransform {
        let path = classification.path.as_str();
        let rec = classification.recommendation;
        match self.transform_content(classification, content, ours) {
            Ok(Some(rewrite)) if rewrite.replacements > 0 => {
                info!(
                    path,
                    transform = %rec,
                    replacements = rewrite.replacements,
                    dry_run,
                    "transformed"
                );
                AppliedTransform {
                    result: TransformResult {
                        file: path.to_string(),
                        transform: rec,
                        action: TransformAction::Transformed,
                        replacements: rewrite.replacements,
                        dry_run,
                        error: None,
                    },
                    content: Some(rewrite.content),
                    notes: rewrite.notes,
                }
            }
            Ok(Some(_)) => {
                debug!(path, transform = %rec, "no substitutions");
                skipped(path, rec, dry_run)
            }
            Ok(None) => {
                debug!(path, transform = %rec, file_type = %classification.file_type, "transform not applicable");
                skipped(path, rec, dry_run)
            }
            Err(e) => {
                warn!(path, transform = %rec, error = %e, "transform failed");
                AppliedTransform {
                    result: TransformResult::failed(path, rec, dry_run, e.to_string()),
                    content: None,
                    notes: Vec::new(),
                }
            }
        }
    }

    /// Transform a file in the working tree. Writes only when something
    /// changed and `dry_run` is false.
    pub fn apply(
        &self,
        workspace: &Workspace,
        classification: &FileClassification,
        ours: Option<&str>,
        dry_run: bool,
    ) -> AppliedTransform {
        let path = classification.path.as_str();
        let rec = classification.recommendation;

        let content = match workspace.read(path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                debug!(path, "file absent; nothing to transform");
                return skipped(path, rec, dry_run);
            }
            Err(e) => {
                let err = if e.kind() == io::ErrorKind::InvalidData {
                    TransformError::NotText(path.to_string())
                } else {
                    TransformError::Io {
                        path: path.to_string(),
                        source: e,
                    }
                };
                warn!(path, error = %err, "cannot read file for transform");
                return AppliedTransform {
                    result: TransformResult::failed(path, rec, dry_run, err.to_string()),
                    content: None,
                    notes: Vec::new(),
                };
            }
        };

        let applied = self.apply_to_content(classification, &content, ours, dry_run);
        if dry_run {
            return applied;
        }
        if let Some(new_content) = &applied.content {
            if let Err(e) = workspace.write(path, new_content) {
                let err = TransformError::Io {
                    path: path.to_string(),
                    source: e,
                };
                warn!(path, error = %err, "failed to write transformed file");
                return AppliedTransform {
                    result: TransformResult::failed(path, rec, dry_run, err.to_string()),
                    content: None,
                    notes: applied.notes,
                };
            }
        }
        applied
    }
}

fn skipped(path: &str, rec: Recommendation, dry_run: bool) -> AppliedTransform {
    AppliedTransform {
        result: TransformResult::skipped(path, rec, dry_run),
        content: None,
        notes: Vec::new(),
    }
}
