// Execution Events
// Progress reporting for matrix runs, jobs and steps

use crate::execution::results::{JobStatus, RunStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Unbounded, so emitting never blocks a running job
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Identifies one expanded job within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLabel {
    /// Job definition id
    pub job_id: String,
    /// Position in expansion order
    pub index: usize,
    /// Display name
    pub name: String,
}

impl JobLabel {
    pub fn new(job_id: impl Into<String>, index: usize, name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            index,
            name: name.into(),
        }
    }
}

/// Progress of a workflow, from matrix runs down to step output
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A job definition's matrix run started
    RunStarted {
        job_id: String,
        total_jobs: usize,
        fail_fast: bool,
    },

    /// A job definition's matrix run reached its aggregate state
    RunCompleted {
        job_id: String,
        status: RunStatus,
        duration: Duration,
    },

    /// Job moved from Pending to Running
    JobStarted { job: JobLabel, total_steps: usize },

    /// Job reached a terminal state after running
    JobCompleted {
        job: JobLabel,
        status: JobStatus,
        duration: Duration,
    },

    /// Job was cancelled before it started
    JobCancelled { job: JobLabel, reason: String },

    StepStarted {
        job: JobLabel,
        step_index: usize,
        display_name: String,
    },

    /// Captured stdout or stderr of a finished action
    StepOutput {
        job: JobLabel,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    StepCompleted {
        job: JobLabel,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        error: Option<String>,
    },

    /// Step did not run: guard false, aborted or cancelled
    StepSkipped {
        job: JobLabel,
        step_index: usize,
        display_name: String,
        status: StepStatus,
        reason: String,
    },

    Log {
        level: LogLevel,
        message: String,
        job: Option<JobLabel>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(job_id: impl Into<String>, total_jobs: usize, fail_fast: bool) -> Self {
        Self::RunStarted {
            job_id: job_id.into(),
            total_jobs,
            fail_fast,
        }
    }

    pub fn run_completed(job_id: impl Into<String>, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            job_id: job_id.into(),
            status,
            duration,
        }
    }

    pub fn job_started(job: &JobLabel, total_steps: usize) -> Self {
        Self::JobStarted {
            job: job.clone(),
            total_steps,
        }
    }

    pub fn job_completed(job: &JobLabel, status: JobStatus, duration: Duration) -> Self {
        Self::JobCompleted {
            job: job.clone(),
            status,
            duration,
        }
    }

    pub fn job_cancelled(job: &JobLabel, reason: impl Into<String>) -> Self {
        Self::JobCancelled {
            job: job.clone(),
            reason: reason.into(),
        }
    }

    pub fn step_started(job: &JobLabel, step_index: usize, display_name: impl Into<String>) -> Self {
        Self::StepStarted {
            job: job.clone(),
            step_index,
            display_name: display_name.into(),
        }
    }

    pub fn step_output(
        job: &JobLabel,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            job: job.clone(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    pub fn step_completed(
        job: &JobLabel,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        Self::StepCompleted {
            job: job.clone(),
            step_index,
            status,
            duration,
            error,
        }
    }

    pub fn step_skipped(
        job: &JobLabel,
        step_index: usize,
        display_name: impl Into<String>,
        status: StepStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            job: job.clone(),
            step_index,
            display_name: display_name.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>, job: Option<&JobLabel>) -> Self {
        Self::Log {
            level,
            message: message.into(),
            job: job.cloned(),
        }
    }

    /// The expanded job an event belongs to; run-level events have none.
    pub fn job(&self) -> Option<&JobLabel> {
        match self {
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
            Self::JobStarted { job, .. }
            | Self::JobCompleted { job, .. }
            | Self::JobCancelled { job, .. }
            | Self::StepStarted { job, .. }
            | Self::StepOutput { job, .. }
            | Self::StepCompleted { job, .. }
            | Self::StepSkipped { job, .. } => Some(job),
            Self::Log { job, .. } => job.as_ref(),
        }
    }
}

/// Best-effort delivery: a closed or missing receiver drops the event.
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
