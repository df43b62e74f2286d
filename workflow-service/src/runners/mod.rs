// Runners Module
// The external substrate that actually performs a step's action

pub mod builtin;
pub mod shell;

pub use builtin::BuiltinAction;
pub use shell::{Shell, ShellConfig, ShellOutput, ShellRunner};

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// What a step asks the runner to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A reusable action, e.g. `read-file` or `actions/checkout@v4`
    Uses(String),
    /// An inline script
    Run {
        script: String,
        shell: Option<String>,
    },
}

/// A fully interpolated action, ready to run
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub action: Action,
    /// Interpolated `with:` parameters
    pub params: IndexMap<String, String>,
    /// Merged workflow, job and step environment
    pub env: IndexMap<String, String>,
    pub working_dir: PathBuf,
    /// Step `working-directory`, relative to `working_dir`
    pub working_directory: Option<String>,
    pub timeout: Option<Duration>,
    /// Display name of the job this step belongs to
    pub job: String,
    pub step_id: Option<String>,
    /// Axis bindings of the job, as strings
    pub bindings: IndexMap<String, String>,
}

impl ActionInvocation {
    pub fn new(action: Action, working_dir: impl AsRef<Path>) -> Self {
        Self {
            action,
            params: IndexMap::new(),
            env: IndexMap::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            working_directory: None,
            timeout: None,
            job: String::new(),
            step_id: None,
            bindings: IndexMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What the runner reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub outputs: IndexMap<String, String>,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

/// Performs step actions. Implementations must be safe to share between
/// concurrently running jobs.
#[async_trait::async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, invocation: &ActionInvocation) -> ActionOutcome;
}

/// Runner registry dispatching actions to the shell and builtin runners
pub struct RunnerRegistry {
    shell: ShellRunner,
    dry_run: bool,
}

impl RunnerRegistry {
    /// Create a new runner registry with the default shell runner
    pub fn new() -> Self {
        Self {
            shell: ShellRunner::new(),
            dry_run: false,
        }
    }

    /// Stub scripts and unknown actions instead of running them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_shell_runner(mut self, shell: ShellRunner) -> Self {
        self.shell = shell;
        self
    }

    async fn run_script(
        &self,
        script: &str,
        shell: Option<&str>,
        invocation: &ActionInvocation,
    ) -> ActionOutcome {
        let shell = match shell {
            Some(name) => match Shell::from_name(name) {
                Some(shell) => shell,
                None => return ActionOutcome::failed(format!("unsupported shell '{}'", name)),
            },
            None => self.shell.default_shell(),
        };

        if self.dry_run {
            return ActionOutcome::succeeded()
                .with_stdout(format!("[dry-run] {:?}: {}", shell, script.trim()));
        }

        let config = ShellConfig {
            working_dir: invocation.working_directory.clone(),
            timeout: invocation.timeout,
        };

        self.shell
            .run_with_shell(
                shell,
                script,
                &invocation.env,
                &invocation.working_dir,
                &config,
            )
            .await
            .into_outcome()
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ActionRunner for RunnerRegistry {
    async fn run(&self, invocation: &ActionInvocation) -> ActionOutcome {
        match &invocation.action {
            Action::Run { script, shell } => {
                debug!(job = %invocation.job, step = ?invocation.step_id, "running script");
                self.run_script(script, shell.as_deref(), invocation).await
            }
            Action::Uses(uses) => match BuiltinAction::resolve(uses) {
                Some(builtin) => {
                    debug!(job = %invocation.job, action = %uses, "running builtin action");
                    builtin.run(invocation).await
                }
                None if self.dry_run => {
                    ActionOutcome::succeeded().with_stdout(format!("[dry-run] uses: {}", uses))
                }
                None => ActionOutcome::failed(format!("unknown action '{}'", uses)),
            },
        }
    }
}
