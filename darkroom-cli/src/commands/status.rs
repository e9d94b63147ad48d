//! Show one job record

use anyhow::{Context, Result};
use clap::Args;
use darkroom::jobs::{Job, JobId};
use darkroom::state::DarkroomState;

/// Print one job record as JSON
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Job ID
    pub job_id: String,
}

impl StatusCommand {
    /// Execute the status command
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is malformed or the job does not exist.
    pub async fn execute(&self, state: &DarkroomState) -> Result<()> {
        let job = self.run(state).await?;
        println!("{}", serde_json::to_string_pretty(&job)?);
        Ok(())
    }

    /// Look the job up
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is malformed or the job does not exist.
    pub async fn run(&self, state: &DarkroomState) -> Result<Job> {
        let id: JobId = self
            .job_id
            .parse()
            .with_context(|| format!("Invalid job ID: {}", self.job_id))?;
        let job = state.pipeline().get_status(id).await?;
        Ok(job)
    }
}
