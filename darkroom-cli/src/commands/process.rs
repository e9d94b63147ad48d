//! Submit images and wait for their results

use super::{FAILURE, INFO, SUCCESS};
use anyhow::{bail, Context, Result};
use clap::Args;
use console::style;
use darkroom::jobs::{Job, JobId, JobState, OwnerId};
use darkroom::state::DarkroomState;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Submit images, wait for them and report the outcome
#[derive(Debug, Args)]
pub struct ProcessCommand {
    /// Owner the jobs are recorded under
    #[arg(short, long)]
    pub owner: String,

    /// Images to submit
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory to write completed results into
    #[arg(short = 'O', long)]
    pub output: Option<PathBuf>,

    /// Seconds to wait for all jobs to finish
    #[arg(short, long, default_value = "120")]
    pub timeout: u64,
}

/// What happened to one input file
#[derive(Debug)]
pub struct Outcome {
    /// The submitted file
    pub file: PathBuf,
    /// Final record, or why there is none
    pub result: std::result::Result<Job, String>,
    /// Where the output was written, if it was
    pub written: Option<PathBuf>,
}

impl Outcome {
    fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(job) if job.state == JobState::Completed)
    }
}

impl ProcessCommand {
    /// Execute the process command
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An input file cannot be read
    /// - The output directory cannot be created
    /// - Any job did not complete
    pub async fn execute(&self, state: &DarkroomState) -> Result<()> {
        println!(
            "{} {} {}",
            style("Processing").green().bold(),
            style(self.files.len()).cyan().bold(),
            style("image(s)").bold()
        );
        println!();

        let outcomes = self.run(state).await?;
        Self::print_outcomes(&outcomes);

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed > 0 {
            bail!("{failed} of {} job(s) did not complete", outcomes.len());
        }
        Ok(())
    }

    /// Submit every file, wait for all of them and write the results
    ///
    /// # Errors
    ///
    /// Returns an error if an input file cannot be read or a result cannot be
    /// written. Per-job failures are reported in the outcomes instead.
    pub async fn run(&self, state: &DarkroomState) -> Result<Vec<Outcome>> {
        if let Some(dir) = &self.output {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let progress = ProgressBar::new(self.files.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .context("Failed to set progress style")?
                .progress_chars("=> "),
        );
        progress.enable_steady_tick(Duration::from_millis(100));

        let runtime = state.start();
        let outcomes = self.submit_and_wait(state, &progress).await;
        progress.finish_and_clear();

        if !runtime.shutdown(SHUTDOWN_GRACE).await.is_graceful() {
            println!(
                "{} {}",
                INFO,
                style("Some workers were still busy at exit").yellow()
            );
        }

        outcomes
    }

    async fn submit_and_wait(
        &self,
        state: &DarkroomState,
        progress: &ProgressBar,
    ) -> Result<Vec<Outcome>> {
        let owner = OwnerId::new(self.owner.clone());

        progress.set_message("submitting");
        let mut submitted: Vec<(PathBuf, std::result::Result<JobId, String>)> = Vec::new();
        for file in &self.files {
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let source_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            let id = state
                .pipeline()
                .submit_bytes(owner.clone(), source_name, bytes)
                .await
                .map_err(|e| e.to_string());
            submitted.push((file.clone(), id));
        }

        progress.set_message("waiting");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.timeout);
        let mut outcomes = Vec::with_capacity(submitted.len());
        for (file, id) in submitted {
            let result = match id {
                Ok(id) => {
                    let remaining =
                        deadline.saturating_duration_since(tokio::time::Instant::now());
                    state
                        .pipeline()
                        .wait_for_terminal(id, POLL_INTERVAL, remaining)
                        .await
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e),
            };

            let written = match (&result, &self.output) {
                (Ok(job), Some(dir)) if job.state == JobState::Completed => {
                    Some(Self::write_result(state, job, &file, dir).await?)
                }
                _ => None,
            };

            progress.inc(1);
            outcomes.push(Outcome {
                file,
                result,
                written,
            });
        }

        Ok(outcomes)
    }

    async fn write_result(
        state: &DarkroomState,
        job: &Job,
        file: &Path,
        dir: &Path,
    ) -> Result<PathBuf> {
        let bytes = state
            .pipeline()
            .fetch_result(job.id)
            .await
            .with_context(|| format!("Failed to fetch result of job {}", job.id))?;

        let stem = file
            .file_stem()
            .map_or_else(|| job.id.to_string(), |s| s.to_string_lossy().into_owned());
        let path = dir.join(format!("{stem}.jpg"));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn print_outcomes(outcomes: &[Outcome]) {
        for outcome in outcomes {
            let name = outcome.file.display();
            match &outcome.result {
                Ok(job) if job.state == JobState::Completed => {
                    print!("{} {} {}", SUCCESS, style(name).green(), style(job.id).dim());
                    if let Some(path) = &outcome.written {
                        print!(" -> {}", style(path.display()).cyan());
                    }
                    println!();
                }
                Ok(job) => println!(
                    "{} {} {}: {}",
                    FAILURE,
                    style(name).red(),
                    style(job.id).dim(),
                    job.error.as_deref().unwrap_or("unknown error")
                ),
                Err(e) => println!("{} {}: {}", FAILURE, style(name).red(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::memory_state;

    fn command(owner: &str, files: Vec<PathBuf>, output: Option<PathBuf>) -> ProcessCommand {
        ProcessCommand {
            owner: owner.to_string(),
            files,
            output,
            timeout: 10,
        }
    }

    #[tokio::test]
    async fn test_process_writes_completed_results() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        std::fs::write(&input, b"abc").unwrap();
        let out = dir.path().join("out");

        let state = memory_state();
        let outcomes = command("alice", vec![input], Some(out.clone()))
            .run(&state)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].succeeded());
        let written = outcomes[0].written.clone().unwrap();
        assert_eq!(written, out.join("cat.jpg"));
        assert_eq!(std::fs::read(written).unwrap(), b"cba");

        let listed = state
            .pipeline()
            .list_jobs(&OwnerId::from("alice"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_name.as_deref(), Some("cat.png"));
    }

    #[tokio::test]
    async fn test_process_reports_failed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        std::fs::write(&good, b"fine").unwrap();
        std::fs::write(&bad, b"bad bytes").unwrap();

        let state = memory_state();
        let cmd = command("bob", vec![good, bad], None);
        let outcomes = cmd.run(&state).await.unwrap();

        assert!(outcomes[0].succeeded());
        assert!(outcomes[0].written.is_none());
        let failed = outcomes[1].result.as_ref().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error.as_deref().unwrap().starts_with("ExecutorError"));

        assert!(cmd.execute(&state).await.is_err());
    }

    #[tokio::test]
    async fn test_workers_stop_when_an_input_cannot_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        std::fs::write(&good, b"fine").unwrap();

        let state = memory_state();
        let cmd = command("dave", vec![good, PathBuf::from("/nonexistent/x.png")], None);
        assert!(cmd.run(&state).await.is_err());

        // Nothing picks up work once the command has returned
        let id = state
            .pipeline()
            .submit_bytes(OwnerId::from("dave"), None, b"late".to_vec())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            state.pipeline().get_status(id).await.unwrap().state,
            JobState::Pending
        );
    }

    #[tokio::test]
    async fn test_process_missing_file_is_an_error() {
        let state = memory_state();
        let result = command("carol", vec![PathBuf::from("/nonexistent/x.png")], None)
            .run(&state)
            .await;
        assert!(result.is_err());
    }
}
