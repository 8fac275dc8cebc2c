//! Error types for the forksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`MergeError`] wraps the ones that can abort a run.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Version control errors
// ---------------------------------------------------------------------------

/// Errors from version-control operations (git2 or the `git` binary).
#[derive(Debug, Error)]
pub enum VcsError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// An external command (`git` or the lock regeneration command) exited
    /// with a non-zero status.
    #[error("'{command}' failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// An external command did not finish within its time budget.
    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// HEAD is detached or unborn where a branch was required.
    #[error("HEAD is not on a branch")]
    DetachedHead,

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A configured regular expression does not compile.
    #[error("invalid pattern '{pattern}' in '{field}': {detail}")]
    InvalidPattern {
        field: String,
        pattern: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Transform errors
// ---------------------------------------------------------------------------

/// Errors raised while rewriting a single file.
///
/// These never abort a batch: the caller records the file as `failed` and
/// moves on.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A manifest could not be parsed as JSON.
    #[error("malformed JSON manifest '{path}': {detail}")]
    InvalidJson { path: String, detail: String },

    /// A manifest parsed but its top level is not an object.
    #[error("manifest '{0}' is not a JSON object")]
    NotAnObject(String),

    /// The file contents are not valid UTF-8 text.
    #[error("'{0}' is not a UTF-8 text file")]
    NotText(String),

    /// Reading or writing the file failed.
    #[error("transform I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Cascade errors
// ---------------------------------------------------------------------------

/// Errors from the post-merge conflict cascade.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// A stage left more files conflicted than it started with.
    #[error("stage '{stage}' increased conflicted files from {before} to {after}")]
    NotMonotonic {
        stage: String,
        before: usize,
        after: usize,
    },

    /// A version-control primitive failed mid-cascade.
    #[error("cascade git error: {0}")]
    Vcs(#[from] VcsError),
}

// ---------------------------------------------------------------------------
// Orchestrator errors
// ---------------------------------------------------------------------------

/// Errors from the merge orchestrator.
#[derive(Debug, Error)]
pub enum MergeError {
    /// An environment precondition does not hold; nothing was mutated.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The requested upstream version could not be resolved.
    #[error("could not resolve upstream version '{0}'")]
    UnresolvableVersion(String),

    /// Finalize was requested while files are still conflicted.
    #[error("{0} file(s) are still conflicted; resolve them before finalizing")]
    UnresolvedConflicts(usize),

    /// The lock-file regeneration command failed.
    #[error("lock file regeneration failed: {0}")]
    LockfileRegeneration(String),

    /// Underlying version-control error.
    #[error("merge git error: {0}")]
    Vcs(#[from] VcsError),

    /// Rule tables could not be built from the configuration.
    #[error("merge configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Underlying cascade error.
    #[error("merge cascade error: {0}")]
    Cascade(#[from] CascadeError),

    /// Underlying report error.
    #[error("merge report error: {0}")]
    Report(#[from] ReportError),
}

// ---------------------------------------------------------------------------
// Report errors
// ---------------------------------------------------------------------------

/// Errors from writing the run report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The report directory or file could not be written.
    #[error("report I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
