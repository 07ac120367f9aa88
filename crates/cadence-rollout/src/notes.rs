//! Markdown release notes.

use std::fmt;
use std::path::{Path, PathBuf};

use cadence_registry::{ReleaseStatus, ServiceResult, ServiceStatus};

use crate::coordinator::ReleaseResult;

/// Render a release summary as Markdown.
pub fn render(result: &ReleaseResult) -> String {
    ReleaseNotes(result).to_string()
}

/// Markdown view of a [`ReleaseResult`].
pub struct ReleaseNotes<'a>(pub &'a ReleaseResult);

impl fmt::Display for ReleaseNotes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        writeln!(f, "# Release {}", result.release_name)?;
        writeln!(f)?;
        writeln!(f, "- Release ID: `{}`", result.release_id)?;
        writeln!(f, "- Environment: {}", result.environment)?;
        writeln!(f, "- Strategy: {}", result.strategy)?;
        writeln!(f, "- Status: {}", result.status)?;
        writeln!(f, "- Overall health: {}", result.overall_health)?;
        writeln!(f, "- Duration: {} ms", result.duration_ms)?;
        if !result.notify_channels.is_empty() {
            writeln!(f, "- Notify: {}", result.notify_channels.join(", "))?;
        }

        section(f, "Batches")?;
        for (i, batch) in result.batches.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, batch.join(", "))?;
        }

        section(f, "Services")?;
        writeln!(f, "| Service | Version | Status | Duration (ms) | Notes |")?;
        writeln!(f, "|---|---|---|---|---|")?;
        for r in &result.service_results {
            writeln!(
                f,
                "| {} | {} | {} | {} | {} |",
                r.service,
                r.version,
                status_label(r),
                r.duration_ms,
                r.error.as_deref().unwrap_or("")
            )?;
        }
        for service in &result.skipped {
            writeln!(f, "| {service} | | skipped | | |")?;
        }

        if !result.warnings.is_empty() {
            section(f, "Warnings")?;
            for w in &result.warnings {
                writeln!(f, "- {w}")?;
            }
        }

        if result.status == ReleaseStatus::RolledBack {
            writeln!(f)?;
            writeln!(f, "All deployed services were rolled back.")?;
        }
        Ok(())
    }
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "## {title}")?;
    writeln!(f)
}

fn status_label(result: &ServiceResult) -> &'static str {
    match result.status {
        ServiceStatus::Success => "success",
        ServiceStatus::Failed => "failed",
        ServiceStatus::RolledBack => "rolled-back",
    }
}

/// `<dir>/<release-name>-<release-id>.md`, with the name made path-safe.
pub fn notes_path(dir: &Path, release_name: &str, release_id: &str) -> PathBuf {
    let safe: String = release_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    dir.join(format!("{safe}-{release_id}.md"))
}

/// Write the notes for `result` into `dir`, returning the file path.
pub async fn write(dir: &Path, result: &ReleaseResult) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = notes_path(dir, &result.release_name, &result.release_id);
    tokio::fs::write(&path, render(result)).await?;
    Ok(path)
}
