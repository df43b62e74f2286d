// Run Status Board
// Single synchronization point for job states and the fail-fast flag

use crate::execution::results::{JobStatus, RunStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug)]
struct BoardState {
    jobs: Vec<JobStatus>,
    cancelled: bool,
    tripped_by: Option<usize>,
}

/// Shared status board for one matrix run.
///
/// Every job transition goes through the board's lock, so when several jobs
/// fail close together exactly one of them trips the fail-fast flag and no
/// job can start after it has been tripped.
#[derive(Debug)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
    fail_fast: bool,
}

impl StatusBoard {
    /// A board with `job_count` jobs, all Pending
    pub fn new(job_count: usize, fail_fast: bool) -> Self {
        Self {
            state: Mutex::new(BoardState {
                jobs: vec![JobStatus::Pending; job_count],
                cancelled: false,
                tripped_by: None,
            }),
            fail_fast,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a Pending job to Running.
    ///
    /// Returns false when the run has been cancelled; the job is then marked
    /// Cancelled and never becomes Running.
    pub fn start(&self, index: usize) -> bool {
        let mut state = self.lock();
        let cancelled = state.cancelled;

        let Some(status) = state.jobs.get_mut(index) else {
            warn!(index, "start requested for unknown job");
            return false;
        };

        if *status != JobStatus::Pending {
            warn!(index, %status, "start requested for job that is not pending");
            return false;
        }

        if cancelled {
            *status = JobStatus::Cancelled;
            return false;
        }

        *status = JobStatus::Running;
        true
    }

    /// Move a Running job to a terminal state.
    ///
    /// A Failed job on a fail-fast board trips the cancellation flag before
    /// the lock is released. Returns false for an invalid transition.
    pub fn finish(&self, index: usize, outcome: JobStatus) -> bool {
        if !outcome.is_terminal() {
            warn!(index, %outcome, "finish requested with non-terminal status");
            return false;
        }

        let mut state = self.lock();

        let Some(status) = state.jobs.get_mut(index) else {
            warn!(index, "finish requested for unknown job");
            return false;
        };

        if *status != JobStatus::Running {
            warn!(index, %status, "finish requested for job that is not running");
            return false;
        }

        *status = outcome;

        if outcome == JobStatus::Failed && self.fail_fast && !state.cancelled {
            debug!(index, "job failed, cancelling remaining jobs");
            state.cancelled = true;
            state.tripped_by = Some(index);
        }

        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// The job whose failure tripped fail-fast, if any
    pub fn tripped_by(&self) -> Option<usize> {
        self.lock().tripped_by
    }

    pub fn status(&self, index: usize) -> Option<JobStatus> {
        self.lock().jobs.get(index).copied()
    }

    /// Aggregate status over the current job states
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from_jobs(self.lock().jobs.iter())
    }
}
