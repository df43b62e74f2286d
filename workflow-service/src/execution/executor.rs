// Workflow Executor
// Runs the steps of each job in order and the jobs of each matrix concurrently

use crate::error::{ConfigurationError, ServiceError};
use crate::execution::board::StatusBoard;
use crate::execution::context::JobContext;
use crate::execution::events::{EventSender, ExecutionEvent, JobLabel, LogLevel, ProgressSender};
use crate::execution::matrix::{MatrixExpander, MatrixInstance};
use crate::execution::results::{
    JobResult, JobStatus, RunResult, RunStatus, StepResult, StepStatus, WorkflowResult,
};
use crate::expression::{ExpressionEngine, GithubContext};
use crate::runners::{Action, ActionInvocation, ActionRunner, RunnerRegistry};
use crate::workflow::models::{Job, Step, TriggerEvent, Workflow};

use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Configuration for workflow execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory steps run in
    pub working_dir: PathBuf,
    /// Stub scripts and unknown actions instead of running them
    pub dry_run: bool,
    /// Overrides every job's `max-parallel`
    pub max_parallel: Option<usize>,
    /// Extra environment, applied over workflow and job `env`
    pub env: IndexMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            dry_run: false,
            max_parallel: None,
            env: IndexMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Runs the steps of one job, and the jobs of one matrix.
///
/// Cheap to clone; every spawned job gets its own copy.
#[derive(Clone)]
pub struct StepSequencer {
    runner: Arc<dyn ActionRunner>,
    event_tx: Option<ProgressSender>,
    working_dir: PathBuf,
    /// Workflow-level environment
    env: IndexMap<String, String>,
    /// Applied after job `env`
    overrides: IndexMap<String, String>,
    github: GithubContext,
}

impl StepSequencer {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            runner,
            event_tx: None,
            working_dir: PathBuf::from("."),
            env: IndexMap::new(),
            overrides: IndexMap::new(),
            github: GithubContext::default(),
        }
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_overrides(mut self, overrides: IndexMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_github(mut self, github: GithubContext) -> Self {
        self.github = github;
        self
    }

    /// Run one job to completion
    pub async fn run_job(&self, job_id: &str, job: &Job, instance: &MatrixInstance) -> JobResult {
        self.run_job_until(job_id, job, instance, &|| false).await
    }

    /// Run one job, checking `cancelled` before each step.
    ///
    /// A step already in flight is never interrupted. Once cancellation is
    /// seen, the remaining steps are Cancelled and so is the job, unless a
    /// step had already failed it.
    pub async fn run_job_until(
        &self,
        job_id: &str,
        job: &Job,
        instance: &MatrixInstance,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> JobResult {
        let start = Instant::now();
        let name = job_display_name(job_id, job, instance);
        let label = JobLabel::new(job_id, instance.index, name.clone());
        let deadline = job
            .timeout_minutes
            .map(|m| start + Duration::from_secs(u64::from(m) * 60));

        let mut context = self.job_context(job_id, job, instance);
        let mut steps = Vec::with_capacity(job.steps.len());

        self.event_tx
            .send_event(ExecutionEvent::job_started(&label, job.steps.len()));
        debug!(job = %name, steps = job.steps.len(), "job started");

        for (step_index, step) in job.steps.iter().enumerate() {
            if !context.is_cancelled() && cancelled() {
                debug!(job = %name, "cancellation observed");
                context.mark_cancelled();
            }

            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if timed_out && !context.has_failed() && !context.is_cancelled() {
                let result = StepResult::not_run(
                    step.id.clone(),
                    step.display_name(),
                    StepStatus::Failed,
                    Some("job timed out".to_string()),
                );
                self.finish_step(&label, step_index, &result);
                context.record_step(&result);
                steps.push(result);
                continue;
            }

            let result = self
                .run_step(&label, step_index, step, &context, deadline)
                .await;

            context.record_step(&result);
            steps.push(result);
        }

        let status = if context.has_failed() {
            JobStatus::Failed
        } else if context.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Succeeded
        };

        let duration = start.elapsed();
        self.event_tx
            .send_event(ExecutionEvent::job_completed(&label, status, duration));
        info!(job = %name, %status, ?duration, "job finished");

        JobResult {
            job_id: job_id.to_string(),
            index: instance.index,
            name,
            bindings: string_bindings(instance),
            status,
            steps,
            duration,
        }
    }

    /// Launch every instance of `job` and wait for all of them.
    ///
    /// Jobs start in expansion order, at most `max_parallel` at a time. With
    /// `fail_fast`, the first Failed job cancels the run: jobs that have not
    /// started become Cancelled without running, and running jobs stop
    /// before their next step.
    pub async fn run_matrix(
        &self,
        job_id: &str,
        job: &Job,
        instances: Vec<MatrixInstance>,
        fail_fast: bool,
        max_parallel: Option<usize>,
    ) -> RunResult {
        let start = Instant::now();
        let total = instances.len();
        let board = Arc::new(StatusBoard::new(total, fail_fast));
        let limit = max_parallel.filter(|n| *n > 0).unwrap_or(total).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let job = Arc::new(job.clone());

        self.event_tx
            .send_event(ExecutionEvent::run_started(job_id, total, fail_fast));
        info!(job = job_id, jobs = total, fail_fast, max_parallel = limit, "run started");

        let mut results: Vec<JobResult> = Vec::with_capacity(total);
        let mut handles = Vec::new();

        for instance in instances {
            // Skip waiting for a slot once the run is already cancelled
            let permit = if board.is_cancelled() {
                None
            } else {
                semaphore.clone().acquire_owned().await.ok()
            };

            // Fails once the run is cancelled; the job is then Cancelled on the board
            if !board.start(instance.index) {
                results.push(self.cancelled_job(job_id, &job, &instance));
                continue;
            }

            let meta = (
                instance.index,
                job_display_name(job_id, &job, &instance),
                job_id.to_string(),
            );
            let sequencer = self.clone();
            let job = Arc::clone(&job);
            let board = Arc::clone(&board);
            let job_id = job_id.to_string();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let cancelled = || board.is_cancelled();
                let result = sequencer
                    .run_job_until(&job_id, &job, &instance, &cancelled)
                    .await;
                board.finish(result.index, result.status);
                if board.tripped_by() == Some(result.index) {
                    sequencer.event_tx.send_event(ExecutionEvent::log(
                        LogLevel::Warning,
                        format!("'{}' failed, cancelling remaining jobs", result.name),
                        None,
                    ));
                }
                result
            });

            handles.push((meta, handle));
        }

        for ((index, name, job_id), handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(job = %name, error = %e, "job task panicked");
                    board.finish(index, JobStatus::Failed);
                    results.push(JobResult {
                        job_id,
                        index,
                        name,
                        bindings: IndexMap::new(),
                        status: JobStatus::Failed,
                        steps: Vec::new(),
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        results.sort_by_key(|r| r.index);

        let status = board.run_status();
        let duration = start.elapsed();

        self.event_tx
            .send_event(ExecutionEvent::run_completed(job_id, status, duration));
        info!(job = job_id, %status, ?duration, "run finished");

        RunResult {
            job_id: job_id.to_string(),
            fail_fast,
            status,
            jobs: results,
            duration,
        }
    }

    fn job_context(&self, job_id: &str, job: &Job, instance: &MatrixInstance) -> JobContext {
        let mut env = self.env.clone();
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut github = self.github.clone();
        github.job = Some(job_id.to_string());

        JobContext::new(instance.bindings.clone())
            .with_env(env)
            .with_github(github)
    }

    /// A job cancelled before it started: every step is Cancelled
    fn cancelled_job(&self, job_id: &str, job: &Job, instance: &MatrixInstance) -> JobResult {
        let name = job_display_name(job_id, job, instance);
        let label = JobLabel::new(job_id, instance.index, name.clone());

        self.event_tx.send_event(ExecutionEvent::job_cancelled(
            &label,
            "a sibling job failed and fail-fast is enabled",
        ));
        debug!(job = %name, "job cancelled before start");

        JobResult {
            job_id: job_id.to_string(),
            index: instance.index,
            name,
            bindings: string_bindings(instance),
            status: JobStatus::Cancelled,
            steps: job
                .steps
                .iter()
                .map(|step| {
                    StepResult::not_run(
                        step.id.clone(),
                        step.display_name(),
                        StepStatus::Cancelled,
                        None,
                    )
                })
                .collect(),
            duration: Duration::ZERO,
        }
    }

    async fn run_step(
        &self,
        label: &JobLabel,
        step_index: usize,
        step: &Step,
        context: &JobContext,
        deadline: Option<Instant>,
    ) -> StepResult {
        let display_name = step.display_name();
        let guard = step.if_condition.as_deref();

        // Not even status-function guards run once the job is cancelled
        if context.is_cancelled() {
            let result = StepResult::not_run(
                step.id.clone(),
                display_name,
                StepStatus::Cancelled,
                Some("run cancelled".to_string()),
            );
            self.finish_step(label, step_index, &result);
            return result;
        }

        // The guard is decided before any parameter is resolved
        match context.resolve_conditional(guard) {
            Ok(true) => {}
            Ok(false) => {
                let (status, reason) = if context.has_failed() && !guard_checks_status(guard) {
                    (StepStatus::Aborted, "an earlier step failed".to_string())
                } else {
                    (
                        StepStatus::Skipped,
                        format!("condition '{}' is false", guard.unwrap_or_default()),
                    )
                };
                let result =
                    StepResult::not_run(step.id.clone(), display_name, status, Some(reason));
                self.finish_step(label, step_index, &result);
                return result;
            }
            Err(e) => return self.configuration_failure(label, step_index, step, e),
        }

        let invocation = match self.build_invocation(label, step, context, deadline) {
            Ok(invocation) => invocation,
            Err(e) => return self.configuration_failure(label, step_index, step, e),
        };

        self.event_tx.send_event(ExecutionEvent::step_started(
            label,
            step_index,
            display_name.clone(),
        ));

        let start = Instant::now();
        let outcome = self.runner.run(&invocation).await;

        for line in outcome.stdout.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(label, step_index, line, false));
        }
        for line in outcome.stderr.lines() {
            self.event_tx
                .send_event(ExecutionEvent::step_output(label, step_index, line, true));
        }

        let mut status = if outcome.success {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        let mut error = outcome.error.clone();
        let mut outputs = outcome.outputs;

        // Declared outputs are mapped from the action's outputs
        if status == StepStatus::Succeeded {
            match declared_outputs(step, context, &outputs) {
                Ok(declared) => outputs.extend(declared),
                Err(e) => {
                    status = StepStatus::Failed;
                    error = Some(e.to_string());
                }
            }
        }

        let result = StepResult {
            step_id: step.id.clone(),
            display_name,
            status,
            output: outcome.stdout,
            error,
            duration: start.elapsed(),
            exit_code: outcome.exit_code,
            outputs,
            continued: status == StepStatus::Failed && step.continue_on_error,
        };

        self.finish_step(label, step_index, &result);
        result
    }

    fn build_invocation(
        &self,
        label: &JobLabel,
        step: &Step,
        context: &JobContext,
        deadline: Option<Instant>,
    ) -> Result<ActionInvocation, ConfigurationError> {
        let mut step_env = IndexMap::new();
        for (key, value) in &step.env {
            step_env.insert(key.clone(), context.interpolate(value)?);
        }

        let action = match (&step.run, &step.uses) {
            (Some(script), None) => Action::Run {
                script: context.interpolate_with_env(script, &step_env)?,
                shell: step.shell.clone(),
            },
            (None, Some(uses)) => Action::Uses(uses.clone()),
            _ => {
                return Err(ConfigurationError::InvalidStep {
                    step: step.display_name(),
                    message: "a step needs exactly one of 'run' or 'uses'".to_string(),
                })
            }
        };

        let mut params = IndexMap::new();
        for (key, value) in &step.with {
            params.insert(key.clone(), context.interpolate_value(value, &step_env)?);
        }

        let working_directory = match &step.working_directory {
            Some(dir) => Some(context.interpolate_with_env(dir, &step_env)?),
            None => None,
        };

        let mut env = context.env.clone();
        env.extend(step_env);
        env.insert("CI".to_string(), "true".to_string());
        env.insert(
            "GITHUB_EVENT_NAME".to_string(),
            context.github.event_name.clone(),
        );
        if let Some(git_ref) = &context.github.git_ref {
            env.insert("GITHUB_REF".to_string(), git_ref.clone());
        }
        env.insert(
            "GITHUB_WORKSPACE".to_string(),
            self.working_dir.display().to_string(),
        );

        let step_timeout = step
            .timeout_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60));
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let timeout = match (step_timeout, remaining) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut invocation = ActionInvocation::new(action, &self.working_dir)
            .with_env(env)
            .with_timeout(timeout);
        invocation.params = params;
        invocation.working_directory = working_directory;
        invocation.job = label.name.clone();
        invocation.step_id = step.id.clone();
        invocation.bindings = context
            .bindings
            .iter()
            .map(|(k, v)| (k.clone(), v.as_string()))
            .collect();

        Ok(invocation)
    }

    /// A configuration error fails only the step it was found in
    fn configuration_failure(
        &self,
        label: &JobLabel,
        step_index: usize,
        step: &Step,
        error: ConfigurationError,
    ) -> StepResult {
        warn!(job = %label.name, step = %step.display_name(), error = %error, "step misconfigured");

        let mut result = StepResult::not_run(
            step.id.clone(),
            step.display_name(),
            StepStatus::Failed,
            Some(error.to_string()),
        );
        result.continued = step.continue_on_error;

        self.finish_step(label, step_index, &result);
        result
    }

    fn finish_step(&self, label: &JobLabel, step_index: usize, result: &StepResult) {
        let event = match result.status {
            StepStatus::Succeeded | StepStatus::Failed => ExecutionEvent::step_completed(
                label,
                step_index,
                result.status,
                result.duration,
                result.error.clone(),
            ),
            status => ExecutionEvent::step_skipped(
                label,
                step_index,
                result.display_name.clone(),
                status,
                result.error.clone().unwrap_or_default(),
            ),
        };
        self.event_tx.send_event(event);
    }
}

/// Executes workflows triggered by an event
pub struct WorkflowExecutor {
    config: ExecutorConfig,
    runner: Option<Arc<dyn ActionRunner>>,
    event_tx: Option<ProgressSender>,
}

impl WorkflowExecutor {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            runner: None,
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom action runner instead of the local registry
    pub fn with_runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Sequencer configured for `workflow` and `event`
    pub fn sequencer(&self, workflow: &Workflow, event: &TriggerEvent) -> StepSequencer {
        let runner = self.runner.clone().unwrap_or_else(|| {
            Arc::new(RunnerRegistry::new().with_dry_run(self.config.dry_run))
        });

        StepSequencer::new(runner)
            .with_progress(self.event_tx.clone())
            .with_working_dir(self.config.working_dir.clone())
            .with_env(workflow.env.clone())
            .with_overrides(self.config.env.clone())
            .with_github(GithubContext {
                event_name: event.kind.clone(),
                git_ref: event.git_ref(),
                workflow: workflow.name.clone(),
                job: None,
            })
    }

    /// Run every job definition of `workflow` for `event`.
    ///
    /// Each definition becomes its own matrix run with its own fail-fast
    /// scope; runs execute concurrently. All matrices are expanded before
    /// anything runs, so an expansion error starts nothing.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
    ) -> Result<WorkflowResult, ServiceError> {
        let start = Instant::now();
        let workflow_name = workflow.name.clone().unwrap_or_else(|| "workflow".to_string());

        if !workflow.on.matches(event) {
            info!(workflow = %workflow_name, event = %event.kind, "trigger did not match");
            return Ok(WorkflowResult {
                workflow: workflow_name,
                event: event.kind.clone(),
                triggered: false,
                status: RunStatus::Succeeded,
                runs: Vec::new(),
                duration: start.elapsed(),
            });
        }

        let mut plans = Vec::with_capacity(workflow.jobs.len());
        for (job_id, job) in &workflow.jobs {
            let instances = MatrixExpander::expand_job(job)?;
            plans.push((job_id.clone(), job.clone(), instances));
        }

        let sequencer = self.sequencer(workflow, event);
        let mut handles = Vec::with_capacity(plans.len());

        for (job_id, job, instances) in plans {
            let sequencer = sequencer.clone();
            let fail_fast = job.fail_fast();
            let max_parallel = self
                .config
                .max_parallel
                .or_else(|| job.max_parallel().map(|n| n as usize));

            handles.push(tokio::spawn(async move {
                sequencer
                    .run_matrix(&job_id, &job, instances, fail_fast, max_parallel)
                    .await
            }));
        }

        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            let run = handle
                .await
                .map_err(|e| ServiceError::InvalidInput(format!("run task failed: {}", e)))?;
            runs.push(run);
        }

        let status = runs
            .iter()
            .fold(RunStatus::Succeeded, |acc, run| acc.combine(run.status));

        Ok(WorkflowResult {
            workflow: workflow_name,
            event: event.kind.clone(),
            triggered: true,
            status,
            runs,
            duration: start.elapsed(),
        })
    }
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// `name` with matrix values, e.g. `test (ubuntu, stable)`
fn job_display_name(job_id: &str, job: &Job, instance: &MatrixInstance) -> String {
    match &job.name {
        Some(name) if name.contains("${{") => {
            let context = JobContext::new(instance.bindings.clone());
            context.interpolate(name).unwrap_or_else(|_| name.clone())
        }
        Some(name) if instance.name.is_empty() => name.clone(),
        Some(name) => format!("{} {}", name, instance.name),
        None if instance.name.is_empty() => job_id.to_string(),
        None => format!("{} {}", job_id, instance.name),
    }
}

fn string_bindings(instance: &MatrixInstance) -> IndexMap<String, String> {
    instance
        .bindings
        .iter()
        .map(|(k, v)| (k.clone(), v.as_string()))
        .collect()
}

/// Whether a guard calls a status function and so may run after a failure
fn guard_checks_status(guard: Option<&str>) -> bool {
    guard
        .and_then(|g| ExpressionEngine::parse(g).ok())
        .is_some_and(|expr| expr.uses_status_function())
}

fn declared_outputs(
    step: &Step,
    context: &JobContext,
    produced: &IndexMap<String, String>,
) -> Result<IndexMap<String, String>, ConfigurationError> {
    let mut declared = IndexMap::new();
    for (name, template) in &step.outputs {
        let value = match produced.get(template.trim()) {
            // A bare output name re-exports the action's output
            Some(value) => value.clone(),
            None => context.interpolate(template)?,
        };
        declared.insert(name.clone(), value);
    }
    Ok(declared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::runners::ActionOutcome;
    use crate::workflow::WorkflowParser;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every invocation as `(job name, action)`; fails the ones that
    /// match a `(axis, value, action marker)` rule.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, String)>>,
        failing: Vec<(String, String, String)>,
        trip: Option<(String, Arc<AtomicBool>)>,
    }

    impl RecordingRunner {
        fn failing(axis: &str, value: &str, marker: &str) -> Self {
            Self {
                failing: vec![(axis.to_string(), value.to_string(), marker.to_string())],
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, job: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|(name, _)| name == job)
                .map(|(_, action)| action)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl ActionRunner for RecordingRunner {
        async fn run(&self, invocation: &ActionInvocation) -> ActionOutcome {
            let action = match &invocation.action {
                Action::Run { script, .. } => script.clone(),
                Action::Uses(uses) => uses.clone(),
            };
            self.calls
                .lock()
                .unwrap()
                .push((invocation.job.clone(), action.clone()));

            if let Some((marker, flag)) = &self.trip {
                if action.contains(marker.as_str()) {
                    flag.store(true, Ordering::SeqCst);
                }
            }

            let fails = self.failing.iter().any(|(axis, value, marker)| {
                invocation.bindings.get(axis) == Some(value) && action.contains(marker.as_str())
            });
            if fails {
                return ActionOutcome::failed("exit code 1");
            }

            if action == "read-file" {
                return ActionOutcome::succeeded().with_output("content", "1.70");
            }

            ActionOutcome::succeeded().with_stdout(format!("ran {}", action))
        }
    }

    const CI: &str = r#"
name: CI
on: [push, pull_request]
jobs:
  test:
    strategy:
      matrix:
        os: [A, B]
        channel: [stable, msrv]
    steps:
      - uses: actions/checkout@v4
      - id: msrv
        if: matrix.channel == 'msrv'
        uses: read-file
        with:
          path: rust-version
      - if: matrix.channel != 'msrv'
        run: rustup toolchain install ${{ matrix.channel }}
      - if: matrix.channel == 'msrv'
        run: rustup toolchain install ${{ steps.msrv.outputs.content }}
      - run: cargo check
      - run: cargo test
"#;

    fn sequencer(runner: &Arc<RecordingRunner>) -> StepSequencer {
        let runner: Arc<dyn ActionRunner> = runner.clone();
        StepSequencer::new(runner)
    }

    fn job_from(yaml: &str) -> Job {
        let workflow = WorkflowParser::parse(yaml).unwrap();
        workflow.jobs.values().next().unwrap().clone()
    }

    fn single_job(steps: &str) -> Job {
        job_from(&format!("on: push\njobs:\n  build:\n    steps:\n{}", steps))
    }

    fn no_bindings() -> MatrixInstance {
        MatrixExpander::expand(&Default::default()).unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_concrete_matrix_scenario() {
        let runner = Arc::new(RecordingRunner::default());
        let workflow = WorkflowParser::parse_and_validate(CI).unwrap();
        let executor = WorkflowExecutor::new().with_runner(runner.clone());

        let result = executor
            .execute(&workflow, &TriggerEvent::new("push"))
            .await
            .unwrap();

        assert!(result.triggered);
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.runs.len(), 1);

        let run = &result.runs[0];
        let names: Vec<&str> = run.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "test (A, stable)",
                "test (A, msrv)",
                "test (B, stable)",
                "test (B, msrv)"
            ]
        );

        let stable = &run.jobs[0];
        assert_eq!(stable.status, JobStatus::Succeeded);
        assert_eq!(
            stable.statuses(),
            vec![
                StepStatus::Succeeded,
                StepStatus::Skipped,
                StepStatus::Succeeded,
                StepStatus::Skipped,
                StepStatus::Succeeded,
                StepStatus::Succeeded,
            ]
        );
        assert_eq!(
            runner.calls_for("test (A, stable)"),
            vec![
                "actions/checkout@v4",
                "rustup toolchain install stable",
                "cargo check",
                "cargo test"
            ]
        );

        let msrv = &run.jobs[1];
        assert_eq!(msrv.step("msrv").unwrap().outputs["content"], "1.70");
        assert!(runner
            .calls_for("test (A, msrv)")
            .contains(&"rustup toolchain install 1.70".to_string()));
    }

    #[tokio::test]
    async fn test_job_fails_when_a_later_step_fails() {
        let runner = Arc::new(RecordingRunner::failing("channel", "stable", "cargo test"));
        let job = job_from(CI);
        let instances = MatrixExpander::expand_job(&job).unwrap();

        let result = sequencer(&runner).run_job("test", &job, &instances[0]).await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.steps[5].status, StepStatus::Failed);
        assert_eq!(result.steps[4].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_guard_on_skipped_output_skips() {
        let runner = Arc::new(RecordingRunner::default());
        let job = single_job(
            r#"      - id: msrv
        if: github.event_name == 'release'
        uses: read-file
      - if: steps.msrv.outputs.content != ''
        run: rustup toolchain install ${{ steps.msrv.outputs.content }}
      - run: cargo test
"#,
        );

        let result = sequencer(&runner).run_job("build", &job, &no_bindings()).await;

        assert_eq!(
            result.statuses(),
            vec![StepStatus::Skipped, StepStatus::Skipped, StepStatus::Succeeded]
        );
        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(runner.calls_for("build"), vec!["cargo test"]);
    }

    #[tokio::test]
    async fn test_unresolved_parameter_fails_only_that_step() {
        let runner = Arc::new(RecordingRunner::default());
        let job = single_job(
            r#"      - run: echo first
      - uses: echo
        with:
          message: ${{ steps.nope.outputs.value }}
      - run: echo last
"#,
        );

        let result = sequencer(&runner).run_job("build", &job, &no_bindings()).await;

        assert_eq!(
            result.statuses(),
            vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Aborted]
        );
        assert!(result.steps[1]
            .error
            .as_deref()
            .unwrap()
            .contains("steps.nope.outputs.value"));
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(runner.calls_for("build"), vec!["echo first"]);
    }

    #[tokio::test]
    async fn test_status_functions_run_after_failure() {
        let runner = Arc::new(RecordingRunner::failing("os", "A", "cargo build"));
        let job = job_from(
            r#"
on: push
jobs:
  build:
    strategy:
      matrix:
        os: [A]
    steps:
      - run: cargo build
      - run: cargo test
      - if: always()
        run: echo cleanup
      - if: failure()
        run: echo report
      - if: success()
        run: echo publish
"#,
        );
        let instances = MatrixExpander::expand_job(&job).unwrap();

        let result = sequencer(&runner).run_job("build", &job, &instances[0]).await;

        assert_eq!(
            result.statuses(),
            vec![
                StepStatus::Failed,
                StepStatus::Aborted,
                StepStatus::Succeeded,
                StepStatus::Succeeded,
                StepStatus::Skipped,
            ]
        );
        assert_eq!(result.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_continue_on_error_keeps_job_going() {
        let runner = Arc::new(RecordingRunner::failing("os", "A", "cargo clippy"));
        let job = job_from(
            r#"
on: push
jobs:
  lint:
    strategy:
      matrix:
        os: [A]
    steps:
      - id: clippy
        run: cargo clippy
        continue-on-error: true
      - if: steps.clippy.outcome == 'failure'
        run: echo clippy failed
"#,
        );
        let instances = MatrixExpander::expand_job(&job).unwrap();

        let result = sequencer(&runner).run_job("lint", &job, &instances[0]).await;

        assert_eq!(
            result.statuses(),
            vec![StepStatus::Failed, StepStatus::Succeeded]
        );
        assert!(result.steps[0].continued);
        assert_eq!(result.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_declared_outputs_feed_later_steps() {
        let runner = Arc::new(RecordingRunner::default());
        let job = job_from(
            r#"
on: push
jobs:
  build:
    strategy:
      matrix:
        channel: [beta]
    steps:
      - id: meta
        run: echo meta
        outputs:
          toolchain: ${{ matrix.channel }}
      - run: rustup default ${{ steps.meta.outputs.toolchain }}
"#,
        );
        let instances = MatrixExpander::expand_job(&job).unwrap();

        let result = sequencer(&runner).run_job("build", &job, &instances[0]).await;

        assert_eq!(result.status, JobStatus::Succeeded);
        assert_eq!(result.step("meta").unwrap().outputs["toolchain"], "beta");
        assert_eq!(
            runner.calls_for("build (beta)"),
            vec!["echo meta", "rustup default beta"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_between_steps() {
        let flag = Arc::new(AtomicBool::new(false));
        let runner = Arc::new(RecordingRunner {
            trip: Some(("cargo check".to_string(), flag.clone())),
            ..Default::default()
        });
        let job = single_job(
            r#"      - run: cargo check
      - run: cargo test
      - if: always()
        run: echo cleanup
"#,
        );

        let cancelled = || flag.load(Ordering::SeqCst);
        let result = sequencer(&runner)
            .run_job_until("build", &job, &no_bindings(), &cancelled)
            .await;

        // The in-flight step finishes; nothing after it is scheduled
        assert_eq!(
            result.statuses(),
            vec![
                StepStatus::Succeeded,
                StepStatus::Cancelled,
                StepStatus::Cancelled
            ]
        );
        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(runner.calls_for("build"), vec!["cargo check"]);
    }

    #[tokio::test]
    async fn test_status_guards_do_not_run_after_cancellation() {
        let runner = Arc::new(RecordingRunner::default());
        let job = single_job(
            r#"      - run: cargo test
      - run: cargo doc
      - if: always()
        run: echo cleanup
      - if: cancelled()
        run: echo notify
"#,
        );

        let cancelled = || true;
        let result = sequencer(&runner)
            .run_job_until("build", &job, &no_bindings(), &cancelled)
            .await;

        assert!(result.statuses().iter().all(|s| *s == StepStatus::Cancelled));
        assert_eq!(result.statuses().len(), 4);
        assert_eq!(result.status, JobStatus::Cancelled);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_step_outputs_stay_within_their_job() {
        let runner = Arc::new(RecordingRunner::default());
        let job = job_from(
            r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: false
      matrix:
        channel: [msrv, stable]
    steps:
      - id: msrv
        if: matrix.channel == 'msrv'
        uses: read-file
        with:
          path: rust-version
      - if: steps.msrv.outputs.content == '1.70'
        run: echo pinned
      - if: matrix.channel == 'stable'
        run: rustup toolchain install ${{ steps.msrv.outputs.content }}
"#,
        );
        let instances = MatrixExpander::expand_job(&job).unwrap();

        // One job at a time, so the msrv job has finished before stable starts
        let run = sequencer(&runner)
            .run_matrix("test", &job, instances, job.fail_fast(), Some(1))
            .await;

        let msrv = &run.jobs[0];
        assert_eq!(msrv.name, "test (msrv)");
        assert_eq!(
            msrv.statuses(),
            vec![StepStatus::Succeeded, StepStatus::Succeeded, StepStatus::Skipped]
        );

        let stable = &run.jobs[1];
        assert_eq!(stable.name, "test (stable)");
        assert_eq!(
            stable.statuses(),
            vec![StepStatus::Skipped, StepStatus::Skipped, StepStatus::Failed]
        );
        assert_eq!(
            stable.steps[2].error.as_deref(),
            Some(
                ConfigurationError::UnresolvedReference("steps.msrv.outputs.content".to_string())
                    .to_string()
                    .as_str()
            )
        );
        assert_eq!(stable.status, JobStatus::Failed);
        assert_eq!(runner.calls_for("test (msrv)"), vec!["read-file", "echo pinned"]);
        assert!(runner.calls_for("test (stable)").is_empty());
    }

    const THREE_JOBS: &str = r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: FAIL_FAST
      max-parallel: 1
      matrix:
        os: [A, B, C]
    steps:
      - run: cargo test
"#;

    #[tokio::test]
    async fn test_fail_fast_never_starts_queued_jobs() {
        let runner = Arc::new(RecordingRunner::failing("os", "B", "cargo test"));
        let job = job_from(&THREE_JOBS.replace("FAIL_FAST", "true"));
        let instances = MatrixExpander::expand_job(&job).unwrap();
        let (tx, mut rx) = progress_channel();

        let run = sequencer(&runner)
            .with_progress(Some(tx))
            .run_matrix("test", &job, instances, job.fail_fast(), Some(1))
            .await;

        let statuses: Vec<JobStatus> = run.jobs.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Succeeded, JobStatus::Failed, JobStatus::Cancelled]
        );
        assert_eq!(run.status, RunStatus::PartiallyCancelled);
        assert!(runner.calls_for("test (C)").is_empty());
        assert_eq!(run.jobs[2].statuses(), vec![StepStatus::Cancelled]);

        let mut cancelled = Vec::new();
        let mut started = Vec::new();
        let mut warnings = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecutionEvent::JobCancelled { job, .. } => cancelled.push(job.name),
                ExecutionEvent::JobStarted { job, .. } => started.push(job.name),
                ExecutionEvent::Log {
                    level: LogLevel::Warning,
                    message,
                    ..
                } => warnings.push(message),
                _ => {}
            }
        }
        assert_eq!(cancelled, vec!["test (C)"]);
        assert_eq!(warnings, vec!["'test (B)' failed, cancelling remaining jobs"]);
        assert_eq!(started, vec!["test (A)", "test (B)"]);
    }

    #[tokio::test]
    async fn test_without_fail_fast_all_jobs_finish() {
        let runner = Arc::new(RecordingRunner::failing("os", "B", "cargo test"));
        let job = job_from(&THREE_JOBS.replace("FAIL_FAST", "false"));
        let instances = MatrixExpander::expand_job(&job).unwrap();

        let run = sequencer(&runner)
            .run_matrix("test", &job, instances, job.fail_fast(), None)
            .await;

        let statuses: Vec<JobStatus> = run.jobs.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Succeeded, JobStatus::Failed, JobStatus::Succeeded]
        );
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(runner.calls_for("test (C)"), vec!["cargo test"]);
    }

    #[tokio::test]
    async fn test_untriggered_workflow_has_no_runs() {
        let runner = Arc::new(RecordingRunner::default());
        let workflow = WorkflowParser::parse(CI).unwrap();
        let executor = WorkflowExecutor::new().with_runner(runner.clone());

        let result = executor
            .execute(&workflow, &TriggerEvent::new("schedule"))
            .await
            .unwrap();

        assert!(!result.triggered);
        assert!(result.runs.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_axis_starts_nothing() {
        let runner = Arc::new(RecordingRunner::default());
        let workflow = WorkflowParser::parse(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: []
    steps:
      - run: cargo test
"#,
        )
        .unwrap();
        let executor = WorkflowExecutor::new().with_runner(runner.clone());

        let err = executor
            .execute(&workflow, &TriggerEvent::new("push"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Configuration(ConfigurationError::EmptyAxis(_))
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_executor_config_builders() {
        let config = ExecutorConfig::default()
            .with_working_dir("/tmp/work")
            .with_dry_run(true)
            .with_max_parallel(Some(2))
            .with_env("RUSTFLAGS", "-Dwarnings");

        assert_eq!(config.working_dir, PathBuf::from("/tmp/work"));
        assert!(config.dry_run);
        assert_eq!(config.max_parallel, Some(2));
        assert_eq!(config.env["RUSTFLAGS"], "-Dwarnings");
    }
}
