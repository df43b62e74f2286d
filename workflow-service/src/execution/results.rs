// Execution Results
// Terminal states and per-step logs for steps, jobs, runs and workflows

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Guard evaluated to false
    Skipped,
    Succeeded,
    Failed,
    /// Not attempted because an earlier step failed
    Aborted,
    /// Not attempted because the job was cancelled
    Cancelled,
}

impl StepStatus {
    /// Outcome string exposed to later guards as `steps.<id>.outcome`
    pub fn outcome(&self) -> &'static str {
        match self {
            StepStatus::Skipped | StepStatus::Aborted => "skipped",
            StepStatus::Succeeded => "success",
            StepStatus::Failed => "failure",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Aborted => "aborted",
            StepStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Job state machine: `Pending -> Running -> {Succeeded, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate status of one matrix run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every job succeeded
    Succeeded,
    /// At least one job failed and none were cancelled
    Failed,
    /// Some jobs never ran (or stopped early) because of cancellation
    PartiallyCancelled,
}

impl RunStatus {
    /// Aggregate job states into a run status.
    pub fn from_jobs<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut failed = false;
        let mut cancelled = false;

        for status in statuses {
            match status {
                JobStatus::Failed => failed = true,
                JobStatus::Cancelled => cancelled = true,
                _ => {}
            }
        }

        if cancelled {
            RunStatus::PartiallyCancelled
        } else if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Combine two aggregate states; the more severe one wins.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        match (self, other) {
            (RunStatus::PartiallyCancelled, _) | (_, RunStatus::PartiallyCancelled) => {
                RunStatus::PartiallyCancelled
            }
            (RunStatus::Failed, _) | (_, RunStatus::Failed) => RunStatus::Failed,
            _ => RunStatus::Succeeded,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::PartiallyCancelled => "partially cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: Option<String>,
    pub display_name: String,
    pub status: StepStatus,
    /// Captured stdout
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub outputs: IndexMap<String, String>,
    /// Failed but marked continue-on-error
    pub continued: bool,
}

impl StepResult {
    /// A step that never ran: skipped, aborted or cancelled
    pub fn not_run(
        step_id: Option<String>,
        display_name: impl Into<String>,
        status: StepStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            step_id,
            display_name: display_name.into(),
            status,
            output: String::new(),
            error: reason,
            duration: Duration::ZERO,
            exit_code: None,
            outputs: IndexMap::new(),
            continued: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job definition id in the workflow
    pub job_id: String,
    /// Position in matrix expansion order
    pub index: usize,
    /// Display name with interpolated matrix values
    pub name: String,
    pub bindings: IndexMap<String, String>,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    pub duration: Duration,
}

impl JobResult {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id.as_deref() == Some(id))
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|s| s.status).collect()
    }
}

/// Result of one matrix run for one job definition
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub job_id: String,
    pub fail_fast: bool,
    pub status: RunStatus,
    pub jobs: Vec<JobResult>,
    pub duration: Duration,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

/// Result of every matrix run triggered by one event
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow: String,
    pub event: String,
    /// False when the trigger did not match the event
    pub triggered: bool,
    pub status: RunStatus,
    pub runs: Vec<RunResult>,
    pub duration: Duration,
}

impl WorkflowResult {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
