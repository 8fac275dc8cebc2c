//! Path classification for upstream changes.
//!
//! Provides [`Classifier`] which assigns every changed path a [`FileType`]
//! and a [`Recommendation`]. Classification looks at the path only, never at
//! file content, so it is stable across re-runs and can be computed before
//! any checkout happens.
//!
//! # Decision model
//!
//! Rules are evaluated in order; the first match wins:
//!
//! | Condition | Recommendation |
//! |-----------|----------------|
//! | Path matches a skip pattern | `skip` |
//! | Path matches a keep-ours pattern or lies in a fork-only directory | `keep-ours` |
//! | Path matches a branding-only regex | `branding-transform` |
//! | Manifest glob | `manifest-transform` |
//! | Lock-file glob | `keep-ours` (regenerated after the merge) |
//! | i18n / platform / extension / web / script glob | matching transform |
//! | Anything else | `manual` |
//!
//! Unrecognised paths always fall through to `manual`. Markdown is no
//! exception: prose the fork edited cannot be told apart from prose that
//! only differs in naming, so docs are opted in through `branding_only`.

use regex_lite::Regex;
use tracing::debug;

use crate::config::{ForkSyncConfig, PathsConfig};
use crate::errors::ConfigError;
use crate::models::{FileClassification, FileType, Recommendation};

const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts", "rs", "go", "py", "rb", "java", "kt",
    "swift", "c", "h", "cc", "cpp", "hpp", "cs", "vue", "svelte", "astro", "css", "scss", "less",
    "html", "sql", "lua", "zig",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "jsonc", "json5", "yaml", "yml", "toml", "ini", "env", "xml", "plist", "lock", "conf",
    "cfg", "properties",
];

/// Assigns a [`FileClassification`] to every path.
///
/// Built once from the `[paths]` config section. Holds compiled regexes, so
/// construction can fail; classification itself never does.
#[derive(Debug, Clone)]
pub struct Classifier {
    keep_ours: Vec<String>,
    skip: Vec<String>,
    fork_only_dirs: Vec<String>,
    branding_only: Vec<Regex>,
    manifests: Vec<String>,
    lockfiles: Vec<String>,
    i18n: Vec<String>,
    platform: Vec<String>,
    extension: Vec<String>,
    web: Vec<String>,
    script: Vec<String>,
}

impl Classifier {
    /// Build a classifier from the `[paths]` section.
    pub fn new(paths: &PathsConfig) -> Result<Self, ConfigError> {
        let branding_only = paths
            .branding_only
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    field: "paths.branding_only".into(),
                    pattern: pattern.clone(),
                    detail: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keep_ours: paths.keep_ours.clone(),
            skip: paths.skip.clone(),
            fork_only_dirs: paths
                .fork_only_dirs
                .iter()
                .map(|d| normalize(d).trim_end_matches('/').to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            branding_only,
            manifests: paths.manifests.clone(),
            lockfiles: paths.lockfiles.clone(),
            i18n: paths.i18n.clone(),
            platform: paths.platform.clone(),
            extension: paths.extension.clone(),
            web: paths.web.clone(),
            script: paths.script.clone(),
        })
    }

    /// Build a classifier from a full configuration.
    pub fn from_config(config: &ForkSyncConfig) -> Result<Self, ConfigError> {
        Self::new(&config.paths)
    }

    /// Classify a single path.
    pub fn classify(&self, path: &str) -> FileClassification {
        let path = normalize(path);
        let classification = self.classify_normalized(&path);
        debug!(
            path = %classification.path,
            file_type = %classification.file_type,
            recommendation = %classification.recommendation,
            "classified"
        );
        classification
    }

    /// Classify many paths, preserving input order.
    pub fn classify_all<I, S>(&self, paths: I) -> Vec<FileClassification>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths.into_iter().map(|p| self.classify(p.as_ref())).collect()
    }

    /// `true` if the path is a package-manager lock file.
    pub fn is_lockfile(&self, path: &str) -> bool {
        let path = normalize(path);
        any_glob(&self.lockfiles, &path)
    }

    fn classify_normalized(&self, path: &str) -> FileClassification {
        let file_type = self.file_type(path);

        // 1. Skip wins over everything, including keep-ours.
        if let Some(pattern) = self.skip.iter().find(|p| matches_loose(path, p)) {
            return FileClassification::new(
                path,
                file_type,
                Recommendation::Skip,
                format!("does not exist in fork (skip pattern '{pattern}')"),
            );
        }

        // 2. Fork-owned paths.
        if let Some(pattern) = self.keep_ours.iter().find(|p| matches_loose(path, p)) {
            return FileClassification::new(
                path,
                file_type,
                Recommendation::KeepOurs,
                format!("fork-owned file (keep-ours pattern '{pattern}')"),
            );
        }
        if let Some(dir) = self
            .fork_only_dirs
            .iter()
            .find(|d| path.starts_with(&format!("{d}/")))
        {
            return FileClassification::new(
                path,
                file_type,
                Recommendation::KeepOurs,
                format!("inside fork-only directory '{dir}'"),
            );
        }

        // 3. Files known to differ only in product naming.
        if let Some(re) = self.branding_only.iter().find(|re| re.is_match(path)) {
            return FileClassification::new(
                path,
                file_type,
                Recommendation::BrandingTransform,
                format!("branding-only path ('{}')", re.as_str()),
            );
        }

        // 4. File-type heuristics.
        let (recommendation, reason) = match file_type {
            FileType::Manifest => (
                Recommendation::ManifestTransform,
                "package manifest: rename packages and merge dependency versions".to_string(),
            ),
            FileType::I18n => (
                Recommendation::I18nTransform,
                "translation file: rebrand user-facing strings".to_string(),
            ),
            FileType::PlatformConfig => (
                Recommendation::PlatformTransform,
                "platform configuration: rebrand identifiers".to_string(),
            ),
            FileType::Extension => (
                Recommendation::ExtensionTransform,
                "editor extension: rebrand publisher and command ids".to_string(),
            ),
            FileType::WebDoc => (
                Recommendation::WebTransform,
                "web/docs content: rebrand URLs and product names".to_string(),
            ),
            FileType::Script => (
                Recommendation::ScriptTransform,
                "script: rebrand binaries, env vars and repository URLs".to_string(),
            ),
            FileType::Markdown => (
                Recommendation::Manual,
                "markdown prose may carry fork edits (opt in via branding_only)".to_string(),
            ),
            FileType::Config if self.is_lockfile(path) => (
                Recommendation::KeepOurs,
                "lock file: accept ours and regenerate after merge".to_string(),
            ),
            FileType::Code => (
                Recommendation::Manual,
                "source code with no known-safe rule".to_string(),
            ),
            FileType::Config => (
                Recommendation::Manual,
                "configuration with no known-safe rule".to_string(),
            ),
            FileType::Other => (
                Recommendation::Manual,
                "unrecognised file type".to_string(),
            ),
        };

        FileClassification::new(path, file_type, recommendation, reason)
    }

    /// Determine the file type from path segments and extension.
    fn file_type(&self, path: &str) -> FileType {
        if any_glob(&self.manifests, path) {
            return FileType::Manifest;
        }
        if any_glob(&self.lockfiles, path) {
            return FileType::Config;
        }
        if any_glob(&self.i18n, path) {
            return FileType::I18n;
        }
        if any_glob(&self.platform, path) {
            return FileType::PlatformConfig;
        }
        if any_glob(&self.extension, path) {
            return FileType::Extension;
        }
        if any_glob(&self.web, path) {
            return FileType::WebDoc;
        }
        if any_glob(&self.script, path) {
            return FileType::Script;
        }

        let file_name = path.rsplit('/').next().unwrap_or(path);
        let ext = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            // Dotfiles such as `.gitignore` or `.npmrc`.
            Some(_) => return FileType::Config,
            None => return FileType::Other,
        };

        match ext.as_str() {
            "md" | "markdown" => FileType::Markdown,
            e if CODE_EXTENSIONS.contains(&e) => FileType::Code,
            e if CONFIG_EXTENSIONS.contains(&e) => FileType::Config,
            _ => FileType::Other,
        }
    }
}

/// Normalize to forward slashes without a leading `./`.
fn normalize(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

fn any_glob(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| glob_match::glob_match(p, path))
}

/// Exact, `*`-glob, or substring match (skip / keep-ours lists).
fn matches_loose(path: &str, pattern: &str) -> bool {
    let pattern = normalize(pattern);
    if pattern.is_empty() {
        return false;
    }
    if path == pattern {
        return true;
    }
    if pattern.contains('*') {
        return glob_match::glob_match(&pattern, path);
    }
    path.contains(pattern.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
