// Workflow Service Library
// Matrix expansion and step sequencing for declarative CI workflows

pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod workflow;

// Re-export commonly used types
pub use error::{ConfigurationError, ServiceError, ServiceResult};

// Re-export workflow types
pub use workflow::{Job, Matrix, Step, Strategy, Trigger, TriggerEvent, Workflow, WorkflowParser};

// Re-export expression types
pub use expression::{EvalError, ExpressionContext, ExpressionEngine, Value};

// Re-export execution types
pub use execution::{
    progress_channel, EventSender, ExecutionEvent, ExecutorConfig, JobContext, JobLabel,
    JobResult, JobStatus, MatrixExpander, MatrixInstance, ProgressReceiver, ProgressSender,
    RunResult, RunStatus, StatusBoard, StepResult, StepSequencer, StepStatus, WorkflowExecutor,
    WorkflowResult,
};

// Re-export runner types
pub use runners::{Action, ActionInvocation, ActionOutcome, ActionRunner, RunnerRegistry, ShellRunner};
