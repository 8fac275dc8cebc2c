//! TOML-based configuration for forksync.
//!
//! Everything that depends on the particular upstream/fork pair lives here:
//! product and organisation names, the path pattern lists that drive
//! classification, the manifest rename tables, and merge behaviour. The
//! engine itself contains no project-specific names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::transforms::rules::RuleCategory;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSyncConfig {
    /// Upstream remote and tag settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Fork remote and branch settings.
    #[serde(default)]
    pub fork: ForkConfig,

    /// Path pattern lists used by the classifier.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Product / organisation naming used by the rewrite rule tables.
    pub branding: BrandingConfig,

    /// Package-manifest merge settings.
    #[serde(default)]
    pub manifest: ManifestConfig,

    /// Merge run behaviour.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// Upstream / fork
// ---------------------------------------------------------------------------

/// Where upstream lives and how its releases are tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Remote name of the upstream repository (default `upstream`).
    #[serde(default = "default_upstream_remote")]
    pub remote: String,

    /// Upstream development branch, used when no tag exists (default `dev`).
    #[serde(default = "default_upstream_branch")]
    pub branch: String,

    /// Prefix stripped from release tags (default `v`).
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

fn default_upstream_remote() -> String {
    "upstream".into()
}
fn default_upstream_branch() -> String {
    "dev".into()
}
fn default_tag_prefix() -> String {
    "v".into()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            remote: default_upstream_remote(),
            branch: default_upstream_branch(),
            tag_prefix: default_tag_prefix(),
        }
    }
}

/// The fork's own remote and integration base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Remote the integration branch is pushed to (default `origin`).
    #[serde(default = "default_fork_remote")]
    pub remote: String,

    /// Branch the merge is built on (default `main`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// The fork's current release version. When unset, the `version` field
    /// of the root manifest on the base branch is used.
    #[serde(default)]
    pub release_version: Option<String>,
}

fn default_fork_remote() -> String {
    "origin".into()
}
fn default_base_branch() -> String {
    "main".into()
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            remote: default_fork_remote(),
            base_branch: default_base_branch(),
            release_version: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Pattern lists consumed by the classifier.
///
/// `keep_ours` and `skip` accept exact paths, substrings, or `*` globs.
/// `branding_only` entries are regular expressions. All other lists are
/// globs matched against the forward-slash relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Files the fork owns outright; upstream's version is discarded.
    #[serde(default)]
    pub keep_ours: Vec<String>,

    /// Files the fork deleted; upstream changes to them are dropped.
    #[serde(default)]
    pub skip: Vec<String>,

    /// Directories that only exist in the fork.
    #[serde(default)]
    pub fork_only_dirs: Vec<String>,

    /// Regexes for files known to differ from upstream only in naming.
    #[serde(default = "default_branding_only")]
    pub branding_only: Vec<String>,

    #[serde(default = "default_manifests")]
    pub manifests: Vec<String>,

    #[serde(default = "default_lockfiles")]
    pub lockfiles: Vec<String>,

    #[serde(default = "default_i18n")]
    pub i18n: Vec<String>,

    #[serde(default = "default_platform")]
    pub platform: Vec<String>,

    #[serde(default = "default_extension")]
    pub extension: Vec<String>,

    #[serde(default = "default_web")]
    pub web: Vec<String>,

    #[serde(default = "default_script")]
    pub script: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_branding_only() -> Vec<String> {
    strings(&[
        r"(^|/)components/.+\.(tsx|jsx|vue|svelte)$",
        r"(^|/)context/.+\.(ts|tsx)$",
        r"(^|/)e2e/",
        r"^scripts?/dev[^/]*$",
        r"(^|/)src-tauri/src/.+\.rs$",
    ])
}
fn default_manifests() -> Vec<String> {
    strings(&["package.json", "**/package.json"])
}
fn default_lockfiles() -> Vec<String> {
    strings(&[
        "bun.lock",
        "bun.lockb",
        "package-lock.json",
        "pnpm-lock.yaml",
        "yarn.lock",
        "**/bun.lock",
        "**/bun.lockb",
        "**/package-lock.json",
        "**/pnpm-lock.yaml",
        "**/yarn.lock",
    ])
}
fn default_i18n() -> Vec<String> {
    strings(&[
        "i18n/**",
        "**/i18n/**",
        "locales/**",
        "**/locales/**",
        "**/locale/**",
        "**/*.po",
    ])
}
fn default_platform() -> Vec<String> {
    strings(&[
        "**/tauri.conf.json",
        "**/tauri.*.conf.json",
        "**/capabilities/*.json",
        "**/Info.plist",
        "**/*.entitlements",
        "**/AndroidManifest.xml",
        "**/electron-builder.*",
        "**/*.desktop",
        "**/*.wxs",
    ])
}
fn default_extension() -> Vec<String> {
    strings(&["sdks/vscode/**", "extensions/**", "**/vscode-extension/**"])
}
fn default_web() -> Vec<String> {
    strings(&["**/*.mdx", "docs/**", "packages/web/**", "packages/docs/**"])
}
fn default_script() -> Vec<String> {
    strings(&["script/**", "scripts/**", "**/*.sh", "**/*.ps1", "install"])
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            keep_ours: Vec::new(),
            skip: Vec::new(),
            fork_only_dirs: Vec::new(),
            branding_only: default_branding_only(),
            manifests: default_manifests(),
            lockfiles: default_lockfiles(),
            i18n: default_i18n(),
            platform: default_platform(),
            extension: default_extension(),
            web: default_web(),
            script: default_script(),
        }
    }
}

// ---------------------------------------------------------------------------
// Branding
// ---------------------------------------------------------------------------

/// One side's naming: organisation, repository, product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandNames {
    /// GitHub organisation (e.g. `nimbus-dev`).
    pub org: String,
    /// Repository name (e.g. `nimbus`).
    pub repo: String,
    /// Display name (e.g. `Nimbus`).
    pub product: String,
    /// Lowercase identifier used in binaries, ids and paths (e.g. `nimbus`).
    pub slug: String,
    /// Environment variable prefix (e.g. `NIMBUS_`).
    #[serde(default)]
    pub env_prefix: Option<String>,
    /// Website / docs domain (e.g. `nimbus.dev`).
    #[serde(default)]
    pub domain: Option<String>,
    /// npm scope without the `@` (defaults to `org`).
    #[serde(default)]
    pub npm_scope: Option<String>,
    /// Reverse-DNS bundle identifier prefix (e.g. `dev.nimbus`).
    #[serde(default)]
    pub bundle_id: Option<String>,
}

impl BrandNames {
    /// The npm scope, falling back to the organisation name.
    pub fn scope(&self) -> &str {
        self.npm_scope.as_deref().unwrap_or(&self.org)
    }
}

/// A project-specific rewrite rule added in front of a category table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraRule {
    pub category: RuleCategory,
    pub pattern: String,
    pub replacement: String,
}

/// Naming used by the branding-style rule tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingConfig {
    pub upstream: BrandNames,
    pub fork: BrandNames,

    /// Lines containing this marker are never rewritten.
    #[serde(default = "default_preserve_marker")]
    pub preserve_marker: String,

    /// Tokens that must never be renamed (e.g. an upstream API key variable).
    #[serde(default)]
    pub env_allowlist: Vec<String>,

    #[serde(default)]
    pub extra_rules: Vec<ExtraRule>,
}

fn default_preserve_marker() -> String {
    "forksync:preserve".into()
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Package-manifest merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Path of the workspace root manifest (default `package.json`).
    #[serde(default = "default_root_manifest")]
    pub root: String,

    /// Upstream package name → fork package name.
    #[serde(default)]
    pub package_renames: BTreeMap<String, String>,

    /// Manifest path → dependencies that only exist in the fork.
    #[serde(default)]
    pub fork_only_dependencies: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_root_manifest() -> String {
    "package.json".into()
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            root: default_root_manifest(),
            package_renames: BTreeMap::new(),
            fork_only_dependencies: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge behaviour
// ---------------------------------------------------------------------------

/// Merge run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Directory (relative to the repo root) where reports are written.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Wall-clock limit for `git fetch` in seconds (default 300).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Prefix for commit messages created by forksync.
    #[serde(default = "default_author_prefix")]
    pub author_prefix: String,

    /// Push the integration branch after a successful merge.
    #[serde(default = "default_true")]
    pub push: bool,

    /// Command (argv) that regenerates lock files, e.g. `["bun", "install"]`.
    #[serde(default)]
    pub lockfile_command: Vec<String>,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".forksync/reports")
}
fn default_fetch_timeout() -> u64 {
    300
}
fn default_author_prefix() -> String {
    "[forksync]".into()
}
fn default_true() -> bool {
    true
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
            fetch_timeout_secs: default_fetch_timeout(),
            author_prefix: default_author_prefix(),
            push: true,
            lockfile_command: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

/// Commented starting point written by `forksync init`.
pub const SAMPLE_CONFIG: &str = r#"# forksync configuration

[upstream]
remote = "upstream"
branch = "dev"
tag_prefix = "v"

[fork]
remote = "origin"
base_branch = "main"
# release_version = "1.4.0"   # default: root package.json on the base branch

[paths]
keep_ours = ["README.md", ".github/workflows/*"]
skip = ["packages/enterprise/*"]
fork_only_dirs = ["packages/fork-extras"]
# Regexes for files that differ from upstream only in naming. Setting this
# replaces the built-in list. Markdown not listed here is left for review.
branding_only = [
    '(^|/)components/.+\.(tsx|jsx|vue|svelte)$',
    '(^|/)context/.+\.(ts|tsx)$',
    '(^|/)e2e/',
    '^scripts?/dev[^/]*$',
    '(^|/)src-tauri/src/.+\.rs$',
    '^CONTRIBUTING\.md$',
]

[branding]
preserve_marker = "forksync:preserve"
env_allowlist = ["NIMBUS_API_KEY"]

[branding.upstream]
org = "nimbus-dev"
repo = "nimbus"
product = "Nimbus"
slug = "nimbus"
env_prefix = "NIMBUS_"
domain = "nimbus.dev"
bundle_id = "dev.nimbus"

[branding.fork]
org = "cirrus-labs"
repo = "cirrus"
product = "Cirrus"
slug = "cirrus"
env_prefix = "CIRRUS_"
domain = "cirrus.sh"
bundle_id = "sh.cirrus"

[manifest]
root = "package.json"

[manifest.package_renames]
"nimbus-ai" = "cirrus-cli"

[merge]
report_dir = ".forksync/reports"
fetch_timeout_secs = 300
author_prefix = "[forksync]"
push = true
lockfile_command = ["bun", "install"]
"#;

impl ForkSyncConfig {
    /// Load a [`ForkSyncConfig`] from a TOML file at the given path.
    ///
    /// This does **not** validate -- call [`validate`](Self::validate)
    /// afterwards, or use [`load_and_validate`](Self::load_and_validate).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ForkSyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (side, names) in [
            ("upstream", &self.branding.upstream),
            ("fork", &self.branding.fork),
        ] {
            for (field, value) in [
                ("org", &names.org),
                ("repo", &names.repo),
                ("product", &names.product),
                ("slug", &names.slug),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("branding.{side}.{field}"),
                        detail: "must not be empty".into(),
                    });
                }
            }
        }

        // A fork name containing any upstream name would be rewritten again
        // on the next pass.
        let up = &self.branding.upstream;
        let fork = &self.branding.fork;
        let upstream_names: Vec<String> = brand_fields(up)
            .into_iter()
            .filter_map(|(_, value)| value)
            .map(|v| v.to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        for (field, value) in brand_fields(fork) {
            let Some(value) = value else { continue };
            let lower = value.to_lowercase();
            if let Some(name) = upstream_names.iter().find(|n| lower.contains(n.as_str())) {
                return Err(ConfigError::InvalidValue {
                    field: format!("branding.fork.{field}"),
                    detail: format!("'{value}' contains the upstream name '{name}'"),
                });
            }
        }

        if self.branding.preserve_marker.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "branding.preserve_marker".into(),
                detail: "preserve marker must not be empty".into(),
            });
        }

        for pattern in &self.paths.branding_only {
            check_regex("paths.branding_only", pattern)?;
        }
        for rule in &self.branding.extra_rules {
            check_regex("branding.extra_rules", &rule.pattern)?;
        }

        if self.merge.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "merge.fetch_timeout_secs".into(),
                detail: "fetch timeout must be > 0".into(),
            });
        }
        if let Some(program) = self.merge.lockfile_command.first() {
            if program.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "merge.lockfile_command".into(),
                    detail: "program name must not be empty".into(),
                });
            }
        }
        if self.fork.base_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "fork.base_branch".into(),
                detail: "base branch must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Every naming field that feeds a rewrite rule.
fn brand_fields(names: &BrandNames) -> [(&'static str, Option<&str>); 8] {
    [
        ("org", Some(names.org.as_str())),
        ("repo", Some(names.repo.as_str())),
        ("product", Some(names.product.as_str())),
        ("slug", Some(names.slug.as_str())),
        ("env_prefix", names.env_prefix.as_deref()),
        ("domain", names.domain.as_deref()),
        ("npm_scope", names.npm_scope.as_deref()),
        ("bundle_id", names.bundle_id.as_deref()),
    ]
}

fn check_regex(field: &str, pattern: &str) -> Result<(), ConfigError> {
    regex_lite::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern {
            field: field.into(),
            pattern: pattern.into(),
            detail: e.to_string(),
        })
}
