// Job Execution Context
// Axis bindings and step outputs visible to guards and parameters of one job

use crate::error::ConfigurationError;
use crate::execution::results::{StepResult, StepStatus};
use crate::expression::{
    EvalError, ExpressionContext, ExpressionEngine, GithubContext, JobStatusContext, StepContext,
    Value,
};

use indexmap::IndexMap;

/// Execution state of a single job.
///
/// Outputs recorded here belong to this job only; every job gets its own
/// context.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    /// Axis bindings of this job
    pub bindings: IndexMap<String, Value>,

    /// Workflow and job environment
    pub env: IndexMap<String, String>,

    /// Triggering event
    pub github: GithubContext,

    /// Results of steps that reached a terminal state, by step id
    steps: IndexMap<String, StepContext>,

    failed: bool,
    cancelled: bool,
}

impl JobContext {
    pub fn new(bindings: IndexMap<String, Value>) -> Self {
        Self {
            bindings,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_github(mut self, github: GithubContext) -> Self {
        self.github = github;
        self
    }

    /// Record a terminal step result; outputs become visible to later steps.
    pub fn record_step(&mut self, result: &StepResult) {
        if result.status == StepStatus::Failed && !result.continued {
            self.failed = true;
        }

        if let Some(id) = &result.step_id {
            let conclusion = if result.continued {
                StepStatus::Succeeded.outcome()
            } else {
                result.status.outcome()
            };

            self.steps.insert(
                id.clone(),
                StepContext {
                    outputs: result.outputs.clone(),
                    outcome: result.status.outcome().to_string(),
                    conclusion: conclusion.to_string(),
                },
            );
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Whether a non-continuable step has failed
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Outputs recorded for a step id
    pub fn outputs(&self, step_id: &str) -> Option<&IndexMap<String, String>> {
        self.steps.get(step_id).map(|s| &s.outputs)
    }

    /// Build an ExpressionContext, layering `step_env` over the job env
    pub fn to_expression_context(&self, step_env: &IndexMap<String, String>) -> ExpressionContext {
        let mut env = self.env.clone();
        env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        ExpressionContext {
            matrix: self.bindings.clone(),
            steps: self.steps.clone(),
            env,
            github: self.github.clone(),
            job: JobStatusContext {
                failed: self.failed,
                cancelled: self.cancelled,
            },
        }
    }

    /// Decide whether a step runs.
    ///
    /// No guard means "run while nothing has failed". A guard that does not
    /// call a status function is implicitly `success() && guard`. A guard
    /// that reaches a reference to a missing output resolves to false.
    /// Malformed guards are configuration errors.
    pub fn resolve_conditional(&self, guard: Option<&str>) -> Result<bool, ConfigurationError> {
        let healthy = !self.failed && !self.cancelled;

        let Some(guard) = guard.map(str::trim).filter(|g| !g.is_empty()) else {
            return Ok(healthy);
        };

        let expr = ExpressionEngine::parse(guard)
            .map_err(|e| ConfigurationError::invalid_expression(guard, e.to_string()))?;

        if !expr.uses_status_function() && !healthy {
            return Ok(false);
        }

        let context = self.to_expression_context(&IndexMap::new());
        match crate::expression::Evaluator::new(&context).eval(&expr) {
            Ok(value) => Ok(value.is_truthy()),
            Err(EvalError::Unresolved(_)) => Ok(false),
            Err(e) => Err(ConfigurationError::invalid_expression(guard, e.to_string())),
        }
    }

    /// Interpolate `${{ }}` spans; unresolved references are errors.
    pub fn interpolate(&self, template: &str) -> Result<String, ConfigurationError> {
        self.interpolate_with_env(template, &IndexMap::new())
    }

    pub fn interpolate_with_env(
        &self,
        template: &str,
        step_env: &IndexMap<String, String>,
    ) -> Result<String, ConfigurationError> {
        if !template.contains("${{") {
            return Ok(template.to_string());
        }

        ExpressionEngine::new(self.to_expression_context(step_env))
            .interpolate(template)
            .map_err(|e| match e {
                EvalError::Unresolved(path) => ConfigurationError::UnresolvedReference(path),
                EvalError::Invalid(message) => {
                    ConfigurationError::invalid_expression(template, message)
                }
            })
    }

    /// Interpolate a parameter value; non-string values are passed through
    /// in their string form.
    pub fn interpolate_value(
        &self,
        value: &serde_json::Value,
        step_env: &IndexMap<String, String>,
    ) -> Result<String, ConfigurationError> {
        match value {
            serde_json::Value::String(s) => self.interpolate_with_env(s, step_env),
            other => Ok(Value::from(other).as_string()),
        }
    }
}
