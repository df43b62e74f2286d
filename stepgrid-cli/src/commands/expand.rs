use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use workflow_service::{MatrixExpander, WorkflowParser};

/// Print the jobs each matrix expands into, in execution order
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Only expand this job definition
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Print the expansion as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ExpandArgs) -> Result<()> {
    let workflow = WorkflowParser::load(&args.workflow)?;

    if let Some(job) = &args.job {
        if !workflow.jobs.contains_key(job) {
            color_eyre::eyre::bail!("Job '{}' not found in workflow", job);
        }
    }

    let mut expanded = serde_json::Map::new();

    for (job_id, job) in &workflow.jobs {
        if args.job.as_ref().is_some_and(|only| only != job_id) {
            continue;
        }

        let instances = MatrixExpander::expand_job(job)?;

        if args.json {
            let jobs: Vec<serde_json::Value> = instances
                .iter()
                .map(|instance| {
                    let bindings: serde_json::Map<String, serde_json::Value> = instance
                        .bindings
                        .iter()
                        .map(|(axis, value)| (axis.clone(), serde_json::Value::from(value)))
                        .collect();
                    serde_json::Value::Object(bindings)
                })
                .collect();
            expanded.insert(job_id.clone(), serde_json::Value::Array(jobs));
            continue;
        }

        output::header(&format!("{} ({} jobs)", job_id, instances.len()));
        for instance in &instances {
            let label = if instance.name.is_empty() {
                job_id.clone()
            } else {
                format!("{} {}", job_id, instance.name)
            };
            println!("  {:>3}  {}", instance.index + 1, label);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&expanded)?);
    }

    Ok(())
}
