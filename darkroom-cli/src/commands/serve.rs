//! Run the pipeline until interrupted

use super::{INFO, SUCCESS};
use anyhow::{Context, Result};
use clap::Args;
use console::style;
use darkroom::jobs::PipelineMetrics;
use darkroom::state::DarkroomState;
use std::time::Duration;

/// Run workers, watchdog and sweeper until interrupted
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Seconds to wait for in-flight jobs on shutdown
    #[arg(long, default_value = "30")]
    pub grace: u64,
}

impl ServeCommand {
    /// Execute the serve command
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt handler cannot be installed.
    pub async fn execute(&self, state: &DarkroomState) -> Result<()> {
        let settings = &state.config().pipeline;
        println!(
            "{} {} {} workers, queue capacity {}",
            style("Serving").green().bold(),
            style("darkroom:").bold(),
            style(settings.worker_pool_size).cyan(),
            style(settings.queue_capacity).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());

        let runtime = state.start();
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;

        println!();
        println!("{} Shutting down...", INFO);
        let result = runtime.shutdown(Duration::from_secs(self.grace)).await;
        if result.is_graceful() {
            println!("{} {}", SUCCESS, style("All workers stopped").green());
        } else {
            println!(
                "{} {}",
                INFO,
                style(format!("Shutdown forced: {result:?}")).yellow()
            );
        }

        print_metrics(&state.pipeline().metrics());
        Ok(())
    }
}

fn print_metrics(metrics: &PipelineMetrics) {
    println!();
    println!("{}", style("Pipeline Metrics").bold().underlined());
    println!("  Submitted:      {}", style(metrics.jobs_submitted).cyan());
    println!("  Rejected:       {}", style(metrics.jobs_rejected).yellow());
    println!("  Completed:      {}", style(metrics.jobs_completed).green());
    println!("  Failed:         {}", style(metrics.jobs_failed).red());
    println!("  Re-dispatched:  {}", style(metrics.jobs_redispatched).yellow());
    println!(
        "  Avg execution:  {}ms",
        style(metrics.avg_execution_time_ms).cyan()
    );
    println!(
        "  Failure rate:   {}%",
        style(format!("{:.1}", metrics.failure_rate())).cyan()
    );
}
