//! List an owner's jobs

use super::INFO;
use anyhow::Result;
use clap::Args;
use console::style;
use darkroom::jobs::{Job, JobState, OwnerId};
use darkroom::state::DarkroomState;

/// List an owner's jobs
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Owner whose jobs to list
    #[arg(short, long)]
    pub owner: String,

    /// Filter by state (pending, processing, completed, failed)
    #[arg(short, long)]
    pub state: Option<JobState>,

    /// Limit number of results
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

impl ListCommand {
    /// Execute the list command
    ///
    /// # Errors
    ///
    /// Returns an error if the record store is unavailable.
    pub async fn execute(&self, state: &DarkroomState) -> Result<()> {
        let jobs = self.run(state).await?;

        let header = self.state.map_or_else(
            || format!("Jobs for {}", style(&self.owner).cyan()),
            |s| format!("{} jobs for {}", style(s).cyan(), style(&self.owner).cyan()),
        );
        println!("{}", style(header).bold());
        println!();

        if jobs.is_empty() {
            println!("{} {}", INFO, style("(No jobs to display)").dim());
            return Ok(());
        }

        println!(
            "  {:<36}  {:<24}  {:<10}  {:<20}  {:>5}  ERROR",
            "ID", "SOURCE", "STATE", "UPDATED", "RETRY"
        );
        for job in &jobs {
            let state = match job.state {
                JobState::Pending => style(job.state).blue(),
                JobState::Processing => style(job.state).yellow(),
                JobState::Completed => style(job.state).green(),
                JobState::Failed => style(job.state).red(),
            };
            println!(
                "  {:<36}  {:<24}  {:<10}  {:<20}  {:>5}  {}",
                job.id,
                job.source_name.as_deref().unwrap_or("-"),
                state,
                job.updated_at.format("%Y-%m-%d %H:%M:%S"),
                job.redispatch_count,
                job.error.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }

    /// Most recently updated jobs first, filtered and truncated
    ///
    /// # Errors
    ///
    /// Returns an error if the record store is unavailable.
    pub async fn run(&self, state: &DarkroomState) -> Result<Vec<Job>> {
        let mut jobs = state
            .pipeline()
            .list_jobs(&OwnerId::new(self.owner.clone()))
            .await?;

        if let Some(filter) = self.state {
            jobs.retain(|job| job.state == filter);
        }
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(self.limit);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::memory_state;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        list: ListCommand,
    }

    #[test]
    fn test_state_filter_parses() {
        let parsed = Wrapper::try_parse_from(["list", "--owner", "a", "--state", "failed"]).unwrap();
        assert_eq!(parsed.list.state, Some(JobState::Failed));
        assert!(Wrapper::try_parse_from(["list", "--owner", "a", "--state", "lost"]).is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_state() {
        let state = memory_state();
        for owner in ["alice", "alice", "alice", "bob"] {
            state
                .pipeline()
                .submit_bytes(OwnerId::from(owner), None, b"img".to_vec())
                .await
                .unwrap();
        }

        let all = ListCommand {
            owner: "alice".to_string(),
            state: None,
            limit: 20,
        };
        assert_eq!(all.run(&state).await.unwrap().len(), 3);

        let limited = ListCommand { limit: 2, ..all };
        assert_eq!(limited.run(&state).await.unwrap().len(), 2);

        let completed = ListCommand {
            owner: "alice".to_string(),
            state: Some(JobState::Completed),
            limit: 20,
        };
        assert!(completed.run(&state).await.unwrap().is_empty());
    }
}
