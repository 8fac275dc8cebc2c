//! Shared styling utilities for terminal output.

use comfy_table::{Cell, Color};
use console::Style;

use forksync_core::models::{MergeStatus, Recommendation, TransformAction};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// One-line summary of a finished run.
pub fn status_line(status: MergeStatus) -> String {
    let label = format!("Status: {status}");
    match status {
        MergeStatus::Clean | MergeStatus::AutoResolved => success(&label),
        MergeStatus::NeedsManual => warn(&label),
        MergeStatus::Failed => error(&label),
        MergeStatus::Analyzed | MergeStatus::DryRun => header(&label),
    }
}

pub fn recommendation_cell(rec: Recommendation) -> Cell {
    let cell = Cell::new(rec.label());
    match rec {
        Recommendation::Manual | Recommendation::Codemod => cell.fg(Color::Red),
        Recommendation::Skip | Recommendation::KeepOurs | Recommendation::KeepTheirs => {
            cell.fg(Color::DarkGrey)
        }
        _ => cell.fg(Color::Green),
    }
}

pub fn action_cell(action: TransformAction, dry_run: bool) -> Cell {
    let text = if dry_run {
        format!("{action} (dry run)")
    } else {
        action.to_string()
    };
    match action {
        TransformAction::Transformed => Cell::new(text).fg(Color::Green),
        TransformAction::Failed => Cell::new(text).fg(Color::Red),
        TransformAction::TookUpstream => Cell::new(text).fg(Color::Yellow),
        TransformAction::Skipped => Cell::new(text),
    }
}
