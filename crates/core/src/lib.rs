//! forksync core library.
//!
//! This crate provides the building blocks for merging an upstream project
//! into a rebranded fork: path classification, rewrite transforms,
//! dependency version merging, the post-merge conflict cascade, run reports,
//! and the orchestrator that sequences them over a version-control port.

pub mod cascade;
pub mod classifier;
pub mod config;
pub mod deps;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod transforms;
pub mod vcs;
pub mod version;
pub mod workspace;

// Re-exports for convenience.
pub use classifier::Classifier;
pub use config::ForkSyncConfig;
pub use deps::DependencyMerger;
pub use orchestrator::{MergeOptions, MergeOrchestrator, MergeRun};
pub use report::{ConflictReport, ReportGenerator};
pub use transforms::TransformLibrary;
pub use vcs::{GitCli, VersionControlPort};
pub use version::VersionResolver;
