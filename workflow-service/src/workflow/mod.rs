pub mod models;
pub mod parser;

pub use models::{
    EventConfig, Job, Matrix, RunsOn, Step, Strategy, Trigger, TriggerEvent, Workflow,
};
pub use parser::WorkflowParser;
