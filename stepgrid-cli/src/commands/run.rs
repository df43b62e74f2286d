use crate::output;

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use color_eyre::Result;

use workflow_service::execution::LogLevel;
use workflow_service::{
    progress_channel, ExecutionEvent, ExecutorConfig, JobStatus, RunStatus, StepStatus,
    TriggerEvent, WorkflowExecutor, WorkflowParser,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Live progress on the terminal
    Text,
    /// The full result as JSON on stdout
    Json,
}

/// Run a workflow locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Triggering event kind
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the event refers to
    #[arg(long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Stub scripts and unknown actions instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Limit concurrently running jobs in every matrix
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Working directory for execution
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Set an environment variable (can be repeated, format: KEY=VALUE)
    #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", workflow_path.display());
    }

    let text = args.format == OutputFormat::Text;

    let mut config = ExecutorConfig::default()
        .with_dry_run(args.dry_run)
        .with_max_parallel(args.max_parallel);

    for pair in &args.env {
        match pair.split_once('=') {
            Some((key, value)) => config = config.with_env(key, value),
            None => color_eyre::eyre::bail!(
                "Invalid environment format '{}'. Expected KEY=VALUE",
                pair
            ),
        }
    }

    if let Some(dir) = &args.working_dir {
        config = config.with_working_dir(dir.clone());
    }

    if text {
        output::status("Parsing", &format!("{}", workflow_path.display()));
    }
    let workflow = WorkflowParser::load(workflow_path)?;

    let mut event = TriggerEvent::new(&args.event);
    if let Some(branch) = &args.branch {
        event = event.with_branch(branch.clone());
    }

    let (tx, mut rx) = progress_channel();
    let executor = WorkflowExecutor::new().with_config(config).with_progress(tx);

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { executor.execute(&workflow, &event).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        if text {
            print_event(&event);
        }
    }

    let result = exec_handle.await??;

    if text {
        println!();
        if !result.triggered {
            output::warning(&format!(
                "Workflow '{}' is not triggered by '{}'",
                result.workflow, result.event
            ));
        } else {
            let message = format!(
                "Workflow '{}' {} in {:.2}s",
                result.workflow,
                result.status,
                result.duration.as_secs_f64()
            );
            match result.status {
                RunStatus::Succeeded => output::success(&message),
                _ => output::failure(&message),
            }
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            job_id,
            total_jobs,
            fail_fast,
        } => {
            println!();
            output::run_header(job_id, *total_jobs, *fail_fast);
        }

        ExecutionEvent::RunCompleted {
            job_id,
            status,
            duration,
        } => {
            let message = format!(
                "  Matrix '{}' {} ({:.2}s)",
                job_id,
                status,
                duration.as_secs_f64()
            );
            if *status == RunStatus::Succeeded {
                output::dim_success(&message);
            } else {
                output::dim_failure(&message);
            }
        }

        ExecutionEvent::JobStarted { job, total_steps } => {
            println!("    Job '{}' ({} steps)", job.name, total_steps);
        }

        ExecutionEvent::JobCompleted {
            job,
            status,
            duration,
        } => {
            let symbol = match status {
                JobStatus::Succeeded => "OK",
                JobStatus::Failed => "FAIL",
                JobStatus::Cancelled => "CANCELLED",
                _ => "DONE",
            };
            let message = format!(
                "    Job '{}' {} ({:.2}s)",
                job.name,
                symbol,
                duration.as_secs_f64()
            );
            if *status == JobStatus::Succeeded {
                output::dim_success(&message);
            } else {
                output::dim_failure(&message);
            }
        }

        ExecutionEvent::JobCancelled { job, reason } => {
            output::warning(&format!("    Job '{}' cancelled: {}", job.name, reason));
        }

        ExecutionEvent::StepStarted {
            step_index,
            display_name,
            ..
        } => {
            println!("      [Step {}] {}", step_index + 1, display_name);
        }

        ExecutionEvent::StepOutput {
            output, is_error, ..
        } => {
            for line in output.lines() {
                if *is_error {
                    output::step_error(line);
                } else {
                    output::step_output(line);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            status,
            duration,
            error,
            ..
        } => {
            let line = format!(
                "        {} ({:.2}s)",
                if *status == StepStatus::Succeeded { "OK" } else { "FAIL" },
                duration.as_secs_f64()
            );
            if *status == StepStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
                if let Some(error) = error {
                    output::dim_failure(&format!("        {}", error));
                }
            }
        }

        ExecutionEvent::StepSkipped {
            step_index,
            display_name,
            status,
            reason,
            ..
        } => {
            output::dim(&format!(
                "      [Step {}] {} {}: {}",
                step_index + 1,
                display_name,
                status,
                reason
            ));
        }

        ExecutionEvent::Log { level, message, .. } => {
            let message = match event.job() {
                Some(job) => format!("[{}] {}", job.name, message),
                None => message.clone(),
            };
            match level {
                LogLevel::Error => output::error(&message),
                LogLevel::Warning => output::warning(&message),
                _ => output::dim(&message),
            }
        }
    }
}
