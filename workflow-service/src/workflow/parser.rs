use crate::expression::ExpressionEngine;
use crate::workflow::models::{Job, Step, Workflow};
use crate::{ConfigurationError, ServiceError, ServiceResult};

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parser for declarative workflow YAML files.
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Workflow> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse(content: &str) -> ServiceResult<Workflow> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        Ok(workflow)
    }

    /// Parse and validate a workflow from a YAML string.
    pub fn parse_and_validate(content: &str) -> ServiceResult<Workflow> {
        let workflow = Self::parse(content)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Read, parse and validate a workflow file.
    pub fn load<P: AsRef<Path>>(path: P) -> ServiceResult<Workflow> {
        let workflow = Self::from_file(path)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Structural checks run before any job is expanded or executed.
    pub fn validate(workflow: &Workflow) -> ServiceResult<()> {
        if workflow.jobs.is_empty() {
            return Err(ServiceError::InvalidInput(
                "workflow has an empty 'jobs' map".to_string(),
            ));
        }

        workflow
            .jobs
            .iter()
            .try_for_each(|(job_id, job)| Self::validate_job(job_id, job))
    }

    fn validate_job(job_id: &str, job: &Job) -> ServiceResult<()> {
        if job.steps.is_empty() {
            return Err(ServiceError::InvalidInput(format!(
                "job '{}' has no steps to run",
                job_id
            )));
        }

        if let Some(strategy) = &job.strategy {
            if let Some(matrix) = &strategy.matrix {
                if let Some((axis, _)) = matrix.dimensions.iter().find(|(_, v)| v.is_empty()) {
                    return Err(ConfigurationError::EmptyAxis(axis.clone()).into());
                }
            }
            if strategy.max_parallel == Some(0) {
                return Err(ServiceError::InvalidInput(format!(
                    "job '{}': max-parallel must be at least 1",
                    job_id
                )));
            }
        }

        let mut ids = HashSet::new();
        for (index, step) in job.steps.iter().enumerate() {
            let label = step
                .id
                .clone()
                .or_else(|| step.name.clone())
                .unwrap_or_else(|| format!("{}#{}", job_id, index + 1));

            Self::validate_step(&label, step)?;

            if let Some(id) = &step.id {
                if !ids.insert(id.as_str()) {
                    return Err(invalid_step(
                        &label,
                        format!("id is used twice in job '{}'", job_id),
                    ));
                }
            }
        }

        Ok(())
    }

    fn validate_step(label: &str, step: &Step) -> ServiceResult<()> {
        match (&step.run, &step.uses) {
            (None, None) => return Err(invalid_step(label, "declares neither 'run' nor 'uses'")),
            (Some(_), Some(_)) => return Err(invalid_step(label, "declares both 'run' and 'uses'")),
            _ => {}
        }

        if let Some(guard) = &step.if_condition {
            ExpressionEngine::parse(guard)
                .map_err(|e| ConfigurationError::invalid_expression(guard.clone(), e.to_string()))?;
        }

        Ok(())
    }
}

fn invalid_step(step: &str, message: impl Into<String>) -> ServiceError {
    ConfigurationError::InvalidStep {
        step: step.to_string(),
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "Hello"
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        assert!(workflow.name.is_none());
        assert!(workflow.jobs.contains_key("build"));
    }

    #[test]
    fn test_validate_empty_job() {
        let yaml = r#"
on: push
jobs:
  empty:
    runs-on: ubuntu-latest
    steps: []
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let result = WorkflowParser::validate(&workflow);
        assert!(result.unwrap_err().to_string().contains("no steps to run"));
    }

    #[test]
    fn test_validate_empty_axis() {
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [ubuntu]
        rust: []
    steps:
      - run: cargo test
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Configuration(ConfigurationError::EmptyAxis(ref axis)) if axis == "rust"
        ));
    }

    #[test]
    fn test_validate_step_without_run_or_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - name: Invalid step
        env:
          FOO: bar
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: invalid step 'Invalid step': declares neither 'run' nor 'uses'"
        );
    }

    #[test]
    fn test_validate_step_with_both_run_and_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - name: Invalid step
        run: echo "Hello"
        uses: actions/checkout@v4
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(err.to_string().contains("declares both 'run' and 'uses'"));
    }

    #[test]
    fn test_validate_duplicate_step_id() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - id: setup
        run: echo one
      - id: setup
        run: echo two
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: invalid step 'setup': id is used twice in job 'build'"
        );
    }

    #[test]
    fn test_validate_malformed_guard() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - run: echo hi
        if: matrix.rust ==
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Configuration(ConfigurationError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.yml");
        std::fs::write(
            &path,
            "on: push\njobs:\n  build:\n    steps:\n      - uses: actions/checkout@v4\n",
        )
        .unwrap();

        let workflow = WorkflowParser::load(&path).unwrap();
        assert_eq!(workflow.jobs.len(), 1);

        let missing = WorkflowParser::load(dir.path().join("missing.yml"));
        assert!(matches!(missing, Err(ServiceError::Io(_))));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = WorkflowParser::parse("on: [push\njobs: {");
        assert!(matches!(result, Err(ServiceError::Yaml(_))));
    }

    #[test]
    fn test_parse_and_validate_rust_ci() {
        let yaml = r#"
name: Rust CI

on:
  push:
    branches: [main]
  pull_request:

env:
  CARGO_TERM_COLOR: always

jobs:
  test:
    name: test ${{ matrix.os }} / ${{ matrix.rust }}
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [ubuntu-latest, macos-latest, windows-latest]
        rust: [stable, beta, nightly, msrv]
    steps:
      - uses: actions/checkout@v4
      - id: msrv
        if: matrix.rust == 'msrv'
        uses: read-file
        with:
          path: rust-version
      - run: cargo test
"#;
        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        assert_eq!(workflow.name, Some("Rust CI".to_string()));
        let matrix = workflow.jobs["test"]
            .strategy
            .as_ref()
            .and_then(|s| s.matrix.as_ref())
            .unwrap();
        assert_eq!(matrix.dimensions["rust"].len(), 4);
    }
}
