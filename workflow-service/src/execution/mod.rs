// Execution Engine Module
// Matrix expansion, step sequencing, fail-fast coordination and progress events

pub mod board;
pub mod context;
pub mod events;
pub mod executor;
pub mod matrix;
pub mod results;

// Re-export key types
pub use board::StatusBoard;
pub use context::JobContext;
pub use events::{
    progress_channel, EventSender, ExecutionEvent, JobLabel, LogLevel, ProgressReceiver,
    ProgressSender,
};
pub use executor::{ExecutorConfig, StepSequencer, WorkflowExecutor};
pub use matrix::{Axes, MatrixExpander, MatrixInstance};
pub use results::{
    JobResult, JobStatus, RunResult, RunStatus, StepResult, StepStatus, WorkflowResult,
};
