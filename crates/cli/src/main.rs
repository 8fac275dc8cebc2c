//! forksync command-line tool.
//!
//! Provides subcommands for analyzing upstream changes, running and
//! finalizing an upstream merge, listing upstream releases, and generating /
//! validating configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use forksync_core::config::{ForkSyncConfig, SAMPLE_CONFIG};
use forksync_core::models::TransformAction;
use forksync_core::orchestrator::{MergeOptions, MergeOrchestrator, MergeRun};
use forksync_core::vcs::GitCli;
use forksync_core::version::VersionResolver;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Merge upstream releases into a rebranded fork.
#[derive(Parser, Debug)]
#[command(name = "forksync", version, about = "Merge upstream releases into a rebranded fork")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "forksync.toml")]
    config: PathBuf,

    /// Path inside the fork's git working tree.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Log progress at info level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify upstream changes and write a report without merging.
    Analyze {
        /// Upstream version, tag or commit (default: latest release).
        #[arg(short, long)]
        target: Option<String>,

        /// Print classifications as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Merge an upstream version into a new integration branch.
    Merge(MergeArgs),

    /// Commit and push a merge after residual conflicts were resolved.
    Finalize {
        #[arg(short, long)]
        target: Option<String>,

        #[arg(long)]
        skip_push: bool,

        #[arg(long)]
        base_branch: Option<String>,
    },

    /// List upstream release tags, newest first.
    ListVersions {
        /// Maximum number of versions to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate a sample configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./forksync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Upstream version, tag or commit (default: latest release).
    #[arg(short, long)]
    target: Option<String>,

    /// Preview transforms without creating branches or writing files.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    skip_push: bool,

    /// Stop after classification and write the report.
    #[arg(long)]
    report_only: bool,

    /// Prefix for generated commit messages.
    #[arg(long)]
    author_prefix: Option<String>,

    /// Fork branch to merge into (default: `fork.base_branch`).
    #[arg(long)]
    base_branch: Option<String>,
}

impl From<MergeArgs> for MergeOptions {
    fn from(args: MergeArgs) -> Self {
        Self {
            target: args.target,
            dry_run: args.dry_run,
            skip_push: args.skip_push,
            report_only: args.report_only,
            author_prefix: args.author_prefix,
            base_branch: args.base_branch,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output).map(|()| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(&cli.config).map(|()| ExitCode::SUCCESS),
        Commands::ListVersions { limit } => {
            let config = load_config(&cli.config)?;
            let vcs = open_repo(&cli.repo)?;
            cmd_list_versions(&vcs, &config, limit).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Analyze { target, json } => {
            let orchestrator = orchestrator(&cli.config, &cli.repo)?;
            let options = MergeOptions {
                target,
                report_only: true,
                ..Default::default()
            };
            let run = orchestrator.run(&options).await.context("analysis failed")?;
            if json {
                let out = serde_json::to_string_pretty(&run.report.conflicts)
                    .context("failed to serialize classifications")?;
                println!("{out}");
            } else {
                print_classifications(&run);
                print_summary(&run);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Merge(args) => {
            let orchestrator = orchestrator(&cli.config, &cli.repo)?;
            let options = MergeOptions::from(args);
            let run = orchestrator.run(&options).await.context("merge failed")?;
            if options.dry_run {
                print_transforms(&run);
            }
            print_summary(&run);
            Ok(exit_code(&run))
        }
        Commands::Finalize {
            target,
            skip_push,
            base_branch,
        } => {
            let orchestrator = orchestrator(&cli.config, &cli.repo)?;
            let options = MergeOptions {
                target,
                skip_push,
                base_branch,
                ..Default::default()
            };
            let run = orchestrator
                .finalize(&options)
                .await
                .context("finalize failed")?;
            print_summary(&run);
            Ok(exit_code(&run))
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<ForkSyncConfig> {
    ForkSyncConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_repo(path: &Path) -> Result<GitCli> {
    GitCli::open(path).context("failed to open git repository")
}

fn orchestrator(config: &Path, repo: &Path) -> Result<MergeOrchestrator<GitCli>> {
    let config = load_config(config)?;
    let vcs = open_repo(repo)?;
    MergeOrchestrator::new(vcs, config).context("failed to build merge rules")
}

fn exit_code(run: &MergeRun) -> ExitCode {
    if run.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, SAMPLE_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Sample configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the [branding] section with the upstream and fork names");
    println!("  2. Add the upstream remote: git remote add upstream <url>");
    println!(
        "  3. Validate with: forksync validate --config {}",
        output.display()
    );
    println!(
        "  4. Preview a merge: forksync analyze --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        ForkSyncConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    match config.validate() {
        Ok(()) => println!("  {}", style::success("All required fields are valid")),
        Err(e) => {
            println!("  {}", style::error(&format!("Validation error: {e}")));
            anyhow::bail!("configuration validation failed");
        }
    }

    let branding = &config.branding;
    println!();
    println!("{}", style::header("Configuration summary"));
    println!(
        "  Upstream      : {} ({}/{})",
        config.upstream.remote, branding.upstream.org, branding.upstream.repo
    );
    println!(
        "  Fork          : {} ({}/{})",
        config.fork.remote, branding.fork.org, branding.fork.repo
    );
    println!(
        "  Product       : {} -> {}",
        branding.upstream.product, branding.fork.product
    );
    println!("  Base branch   : {}", config.fork.base_branch);
    println!(
        "  Release pin   : {}",
        config
            .fork
            .release_version
            .as_deref()
            .unwrap_or("from root manifest")
    );
    println!("  Report dir    : {}", config.merge.report_dir.display());
    println!(
        "  Lock command  : {}",
        if config.merge.lockfile_command.is_empty() {
            "none".to_string()
        } else {
            config.merge.lockfile_command.join(" ")
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_list_versions(vcs: &GitCli, config: &ForkSyncConfig, limit: usize) -> Result<()> {
    let resolver = VersionResolver::new(vcs, &config.upstream);
    let releases = resolver
        .list_versions()
        .await
        .context("failed to list upstream tags")?;

    if releases.is_empty() {
        println!("No upstream release tags found on '{}'.", config.upstream.remote);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Version", "Tag", "Channel"]);
    for release in releases.iter().take(limit) {
        table.add_row(vec![
            Cell::new(&release.version),
            Cell::new(&release.tag),
            Cell::new(if release.prerelease { "prerelease" } else { "stable" }),
        ]);
    }
    println!("{table}");
    println!("{}", style::dim(&format!("{} release(s) upstream", releases.len())));

    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_classifications(run: &MergeRun) {
    if run.report.conflicts.is_empty() {
        println!("No upstream changes since the merge base.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Type", "Recommendation", "Reason"]);
    for c in &run.report.conflicts {
        table.add_row(vec![
            Cell::new(&c.path),
            Cell::new(c.file_type),
            style::recommendation_cell(c.recommendation),
            Cell::new(&c.reason),
        ]);
    }
    println!("{table}");
}

fn print_transforms(run: &MergeRun) {
    let results: Vec<_> = run
        .report
        .transform_results
        .iter()
        .filter(|r| r.action != TransformAction::Skipped)
        .collect();
    if results.is_empty() {
        println!("No transforms would change any file.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Transform", "Action", "Replacements", "Error"]);
    for r in results {
        table.add_row(vec![
            Cell::new(&r.file),
            Cell::new(r.transform.label()),
            style::action_cell(r.action, r.dry_run),
            Cell::new(r.replacements),
            Cell::new(r.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
}

fn print_summary(run: &MergeRun) {
    let report = &run.report;
    println!();
    println!("{}", style::status_line(run.status));
    println!(
        "  Upstream : {} ({})",
        report.upstream_version,
        short(&report.upstream_commit)
    );
    if !report.merge_branch.is_empty() {
        println!("  Branch   : {}", report.merge_branch);
    }
    if let Some(backup) = &report.backup_branch {
        println!("  Backup   : {backup}");
    }
    println!("  Files    : {}", report.conflicts.len());
    println!("  Report   : {}", run.report_path.display());

    let manual: Vec<_> = report.manual_files().collect();
    if !manual.is_empty() && run.status.is_success() {
        println!("  Manual   : {}", manual.len());
    } else if !manual.is_empty() {
        println!();
        println!("{}", style::warn("Files needing manual resolution:"));
        for c in manual {
            println!("  - {} {}", c.path, style::dim(&format!("({})", c.reason)));
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("{}", style::header("Next steps"));
        for line in &report.recommendations {
            println!("  - {line}");
        }
    }
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}
