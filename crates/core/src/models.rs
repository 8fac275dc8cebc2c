//! Domain model types shared by the classifier, transforms, cascade and
//! report.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File type
// ---------------------------------------------------------------------------

/// Coarse category of a changed path, derived from its location and
/// extension only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    Markdown,
    Manifest,
    Code,
    Config,
    I18n,
    PlatformConfig,
    Script,
    Extension,
    WebDoc,
    Other,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Manifest => write!(f, "manifest"),
            Self::Code => write!(f, "code"),
            Self::Config => write!(f, "config"),
            Self::I18n => write!(f, "i18n"),
            Self::PlatformConfig => write!(f, "platform-config"),
            Self::Script => write!(f, "script"),
            Self::Extension => write!(f, "extension"),
            Self::WebDoc => write!(f, "web-doc"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// How a path should be reconciled with the fork.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    /// Path does not exist in the fork; drop upstream's change.
    Skip,
    /// Fork owns the file; discard upstream's version.
    KeepOurs,
    /// Take upstream's version unchanged.
    KeepTheirs,
    /// No automatic rule is trusted; a human must resolve it.
    Manual,
    /// Needs a code-aware rewrite that forksync does not perform.
    Codemod,
    I18nTransform,
    BrandingTransform,
    PlatformTransform,
    ManifestTransform,
    ScriptTransform,
    ExtensionTransform,
    WebTransform,
}

impl Recommendation {
    /// Every recommendation, in report order.
    pub const ALL: [Recommendation; 12] = [
        Self::Manual,
        Self::Codemod,
        Self::Skip,
        Self::KeepOurs,
        Self::KeepTheirs,
        Self::ManifestTransform,
        Self::I18nTransform,
        Self::BrandingTransform,
        Self::PlatformTransform,
        Self::ScriptTransform,
        Self::ExtensionTransform,
        Self::WebTransform,
    ];

    /// `true` if a content transform implements this recommendation.
    pub fn is_transform(&self) -> bool {
        matches!(
            self,
            Self::I18nTransform
                | Self::BrandingTransform
                | Self::PlatformTransform
                | Self::ManifestTransform
                | Self::ScriptTransform
                | Self::ExtensionTransform
                | Self::WebTransform
        )
    }

    /// Kebab-case label used in reports and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::KeepOurs => "keep-ours",
            Self::KeepTheirs => "keep-theirs",
            Self::Manual => "manual",
            Self::Codemod => "codemod",
            Self::I18nTransform => "i18n-transform",
            Self::BrandingTransform => "branding-transform",
            Self::PlatformTransform => "platform-transform",
            Self::ManifestTransform => "manifest-transform",
            Self::ScriptTransform => "script-transform",
            Self::ExtensionTransform => "extension-transform",
            Self::WebTransform => "web-transform",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The classifier's verdict for one path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileClassification {
    pub path: String,
    pub file_type: FileType,
    pub recommendation: Recommendation,
    pub reason: String,
}

impl FileClassification {
    pub fn new(
        path: impl Into<String>,
        file_type: FileType,
        recommendation: Recommendation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            file_type,
            recommendation,
            reason: reason.into(),
        }
    }

    /// Copy of this classification re-labelled as needing a human.
    pub fn escalated(&self, reason: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            file_type: self.file_type,
            recommendation: Recommendation::Manual,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transform results
// ---------------------------------------------------------------------------

/// What happened when a transform was applied to a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformAction {
    Transformed,
    Skipped,
    /// A conflicted file resolved to upstream's text, which needed no
    /// substitutions.
    TookUpstream,
    Failed,
}

impl std::fmt::Display for TransformAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transformed => write!(f, "transformed"),
            Self::Skipped => write!(f, "skipped"),
            Self::TookUpstream => write!(f, "took upstream"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One (file, transform) application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformResult {
    pub file: String,
    pub transform: Recommendation,
    pub action: TransformAction,
    /// Exact number of substitutions made. Zero means the file was not
    /// written, except for `TookUpstream`.
    pub replacements: usize,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransformResult {
    pub fn skipped(file: impl Into<String>, transform: Recommendation, dry_run: bool) -> Self {
        Self {
            file: file.into(),
            transform,
            action: TransformAction::Skipped,
            replacements: 0,
            dry_run,
            error: None,
        }
    }

    pub fn failed(
        file: impl Into<String>,
        transform: Recommendation,
        dry_run: bool,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            transform,
            action: TransformAction::Failed,
            replacements: 0,
            dry_run,
            error: Some(error.into()),
        }
    }

    /// `true` if the file content changed (or would change, in a dry run).
    pub fn changed(&self) -> bool {
        self.action == TransformAction::Transformed && self.replacements > 0
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Terminal state of one orchestrator run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStatus {
    /// Analysis only; nothing was mutated.
    Analyzed,
    /// The merge produced no conflicts.
    Clean,
    /// Every conflict was resolved by the cascade.
    AutoResolved,
    /// Files remain conflicted and need a human.
    NeedsManual,
    /// The run aborted on a fatal error.
    Failed,
    /// Preview only; nothing was mutated.
    DryRun,
}

impl MergeStatus {
    /// `true` for every status that should exit 0.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::NeedsManual | Self::Failed)
    }
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyzed => write!(f, "analyzed"),
            Self::Clean => write!(f, "clean"),
            Self::AutoResolved => write!(f, "auto-resolved"),
            Self::NeedsManual => write!(f, "needs-manual"),
            Self::Failed => write!(f, "failed"),
            Self::DryRun => write!(f, "dry-run"),
        }
    }
}
