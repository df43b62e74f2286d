use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use workflow_service::{MatrixExpander, WorkflowParser};

/// Validate a workflow YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", workflow_path.display());
    }

    output::status("Validating", &format!("{}", workflow_path.display()));

    // Step 1: Parse YAML syntax
    let workflow = match WorkflowParser::from_file(workflow_path) {
        Ok(w) => w,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };

    output::check("YAML syntax valid");

    let steps_count: usize = workflow.jobs.values().map(|j| j.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} steps, triggered by {}",
        workflow.jobs.len(),
        steps_count,
        workflow.on.events().join(", ")
    ));

    // Step 2: Semantic validation
    if let Err(e) = WorkflowParser::validate(&workflow) {
        output::error(&e.to_string());
        std::process::exit(1);
    }

    output::check("Semantic validation passed");

    // Step 3: Matrix expansion
    for (job_id, job) in &workflow.jobs {
        match MatrixExpander::expand_job(job) {
            Ok(instances) => {
                output::check(&format!("Job '{}' expands to {} jobs", job_id, instances.len()))
            }
            Err(e) => {
                output::error(&format!("Job '{}': {}", job_id, e));
                std::process::exit(1);
            }
        }
    }

    println!();
    output::success("Workflow is valid");

    Ok(())
}
