//! Run one retention sweep

use super::SUCCESS;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use console::style;
use darkroom::jobs::SweepReport;
use darkroom::state::DarkroomState;

/// Run one retention sweep
#[derive(Debug, Args)]
pub struct SweepCommand {
    /// Sweep as of this RFC 3339 instant instead of now
    #[arg(long)]
    pub at: Option<String>,
}

impl SweepCommand {
    /// Execute the sweep command
    ///
    /// # Errors
    ///
    /// Returns an error if `--at` is malformed or the record store fails.
    pub async fn execute(&self, state: &DarkroomState) -> Result<()> {
        let report = self.run(state).await?;

        println!("{} {}", SUCCESS, style("Retention sweep finished").green().bold());
        println!();
        println!("  Expired:        {}", style(report.expired).cyan());
        println!("  Deleted:        {}", style(report.deleted).green());
        println!("  Retained:       {}", style(report.retained).yellow());
        println!("  Blobs deleted:  {}", style(report.blobs_deleted).green());
        println!("  Blobs missing:  {}", style(report.blob_misses).dim());
        println!("  Blob errors:    {}", style(report.blob_errors).red());
        Ok(())
    }

    /// Sweep once
    ///
    /// # Errors
    ///
    /// Returns an error if `--at` is malformed or the record store fails.
    pub async fn run(&self, state: &DarkroomState) -> Result<SweepReport> {
        let now = match &self.at {
            Some(at) => DateTime::parse_from_rfc3339(at)
                .with_context(|| format!("Invalid timestamp: {at}"))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let report = state.sweeper().sweep(now).await?;
        Ok(report)
    }
}
