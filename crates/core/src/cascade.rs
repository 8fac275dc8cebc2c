//! Post-merge conflict cascade.
//!
//! After a merge stops with conflicts, [`ConflictCascade`] walks a fixed list
//! of stages. Each stage handles the still-conflicted files whose
//! classification it owns, then the conflicted set is re-read from git. A
//! file resolved by one stage is never seen by a later one, and the
//! conflicted count may never grow between stages. Whatever is left at the
//! end is reported as `manual`; the cascade never guesses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::errors::CascadeError;
use crate::models::{FileClassification, FileType, Recommendation, TransformAction, TransformResult};
use crate::transforms::TransformLibrary;
use crate::vcs::{StageSide, VersionControlPort};
use crate::workspace::Workspace;

/// One stage's effect on the conflicted set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub before: usize,
    pub after: usize,
    pub resolved: Vec<String>,
}

/// Everything the cascade did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeOutcome {
    /// Files still conflicted, re-labelled `manual`.
    pub remaining: Vec<FileClassification>,
    /// Files the cascade resolved, with the classification that did it.
    pub resolved: Vec<FileClassification>,
    pub stage_log: Vec<StageRecord>,
    pub transform_results: Vec<TransformResult>,
    pub dependency_notes: Vec<String>,
    /// Lock files taken from the fork that must be regenerated.
    pub lockfiles_flagged: Vec<String>,
}

impl CascadeOutcome {
    pub fn converged(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Skip,
    KeepOurs,
    Transform(Recommendation),
    Lockfile,
}

const STAGES: [Stage; 10] = [
    Stage::Skip,
    Stage::KeepOurs,
    Stage::Transform(Recommendation::I18nTransform),
    Stage::Transform(Recommendation::BrandingTransform),
    Stage::Transform(Recommendation::PlatformTransform),
    Stage::Transform(Recommendation::ManifestTransform),
    Stage::Transform(Recommendation::ScriptTransform),
    Stage::Transform(Recommendation::ExtensionTransform),
    Stage::Transform(Recommendation::WebTransform),
    Stage::Lockfile,
];

impl Stage {
    fn name(&self) -> String {
        match self {
            Self::Skip => "skip".into(),
            Self::KeepOurs => "keep-ours".into(),
            Self::Transform(rec) => rec.label().into(),
            Self::Lockfile => "lockfile".into(),
        }
    }
}

pub struct ConflictCascade<'a, V> {
    vcs: &'a V,
    classifier: &'a Classifier,
    transforms: &'a TransformLibrary,
    workspace: Workspace,
}

impl<'a, V: VersionControlPort> ConflictCascade<'a, V> {
    pub fn new(vcs: &'a V, classifier: &'a Classifier, transforms: &'a TransformLibrary) -> Self {
        Self {
            vcs,
            classifier,
            transforms,
            workspace: Workspace::new(vcs.workdir()),
        }
    }

    fn owns(&self, stage: Stage, c: &FileClassification) -> bool {
        match stage {
            Stage::Skip => c.recommendation == Recommendation::Skip,
            Stage::KeepOurs => {
                c.recommendation == Recommendation::KeepOurs && !self.classifier.is_lockfile(&c.path)
            }
            Stage::Transform(rec) => c.recommendation == rec,
            Stage::Lockfile => self.classifier.is_lockfile(&c.path),
        }
    }

    /// Run every stage against the current conflicted set.
    pub async fn run(&self) -> Result<CascadeOutcome, CascadeError> {
        let mut outcome = CascadeOutcome::default();
        let mut unresolved_reasons: HashMap<String, String> = HashMap::new();
        let mut conflicted = self.vcs.conflicted_files().await?;
        info!(count = conflicted.len(), "starting conflict cascade");

        for stage in STAGES {
            if conflicted.is_empty() {
                break;
            }
            let before = conflicted.len();
            let owned: Vec<FileClassification> = conflicted
                .iter()
                .map(|path| self.classifier.classify(path))
                .filter(|c| self.owns(stage, c))
                .collect();

            let mut resolved = Vec::new();
            for classification in owned {
                match self.resolve(stage, &classification, &mut outcome).await? {
                    Ok(()) => {
                        resolved.push(classification.path.clone());
                        outcome.resolved.push(classification);
                    }
                    Err(reason) => {
                        debug!(path = %classification.path, stage = %stage.name(), %reason, "left conflicted");
                        unresolved_reasons.insert(classification.path.clone(), reason);
                    }
                }
            }

            conflicted = self.vcs.conflicted_files().await?;
            let after = conflicted.len();
            if after > before {
                error!(stage = %stage.name(), before, after, "conflicted set grew");
                return Err(CascadeError::NotMonotonic {
                    stage: stage.name(),
                    before,
                    after,
                });
            }
            info!(stage = %stage.name(), before, after, resolved = resolved.len(), "cascade stage complete");
            outcome.stage_log.push(StageRecord {
                stage: stage.name(),
                before,
                after,
                resolved,
            });
        }

        outcome.remaining = conflicted
            .iter()
            .map(|path| {
                let original = self.classifier.classify(path);
                let reason = match unresolved_reasons.get(path) {
                    Some(detail) => format!("{} could not resolve: {detail}", original.recommendation),
                    None => format!("no automatic rule ({})", original.reason),
                };
                original.escalated(reason)
            })
            .collect();

        if outcome.converged() {
            info!("cascade resolved every conflict");
        } else {
            warn!(remaining = outcome.remaining.len(), "files need manual resolution");
        }
        Ok(outcome)
    }

    /// Resolve one file. The inner `Err` is a per-file reason to leave the
    /// file conflicted; the outer one is a fatal git failure.
    async fn resolve(
        &self,
        stage: Stage,
        c: &FileClassification,
        outcome: &mut CascadeOutcome,
    ) -> Result<Result<(), String>, CascadeError> {
        let path = c.path.as_str();
        match stage {
            Stage::Skip => {
                self.vcs.remove(path).await?;
            }
            Stage::KeepOurs => {
                self.vcs.resolve_ours(path).await?;
            }
            Stage::Lockfile => {
                self.vcs.resolve_ours(path).await?;
                outcome.lockfiles_flagged.push(path.to_string());
            }
            Stage::Transform(rec) => {
                if !TransformLibrary::handles(rec, c.file_type) {
                    return Ok(Err(format!("{rec} does not handle {} files", c.file_type)));
                }
                let Some(theirs) = self.vcs.show_stage(path, StageSide::Theirs).await? else {
                    return Ok(Err("upstream side is missing or not text".into()));
                };
                let ours = if c.file_type == FileType::Manifest {
                    self.vcs.show_stage(path, StageSide::Ours).await?
                } else {
                    None
                };

                let applied = self
                    .transforms
                    .apply_to_content(c, &theirs, ours.as_deref(), false);
                outcome
                    .dependency_notes
                    .extend(applied.notes.iter().map(|n| format!("{path}: {n}")));
                let failure = applied.result.error.clone();
                outcome.transform_results.push(applied.result);
                if let Some(err) = failure {
                    return Ok(Err(err));
                }

                // Zero substitutions: upstream's text is already correct.
                let took_upstream = applied.content.is_none();
                let content = applied.content.unwrap_or(theirs);
                if took_upstream {
                    if let Some(last) = outcome.transform_results.last_mut() {
                        last.action = TransformAction::TookUpstream;
                    }
                }
                if let Err(e) = self.workspace.write(path, &content) {
                    warn!(path, error = %e, "failed to write resolved file");
                    let message = e.to_string();
                    if let Some(last) = outcome.transform_results.last_mut() {
                        last.action = TransformAction::Failed;
                        last.error = Some(message.clone());
                    }
                    return Ok(Err(message));
                }
                self.vcs.stage(&[path.to_string()]).await?;
            }
        }
        debug!(path, stage = %stage.name(), "resolved");
        Ok(Ok(()))
    }
}
