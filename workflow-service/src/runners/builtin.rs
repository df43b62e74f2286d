// Builtin Actions
// `uses:` actions the local runner implements in-process

use crate::runners::{ActionInvocation, ActionOutcome};

use tracing::debug;

/// Actions resolved without spawning a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    /// `actions/checkout`: the workspace is already the working directory
    Checkout,
    /// `read-file`: `path` param to `content` output
    ReadFile,
    /// `echo`: `message` param to stdout
    Echo,
}

impl BuiltinAction {
    /// Resolve a `uses:` reference, ignoring any `@version` suffix
    pub fn resolve(uses: &str) -> Option<Self> {
        let name = uses.split('@').next().unwrap_or(uses).trim();
        let name = name.strip_prefix("./").unwrap_or(name);

        match name {
            "actions/checkout" => Some(BuiltinAction::Checkout),
            "read-file" | "actions/read-file" => Some(BuiltinAction::ReadFile),
            "echo" | "actions/echo" => Some(BuiltinAction::Echo),
            _ => None,
        }
    }

    pub async fn run(&self, invocation: &ActionInvocation) -> ActionOutcome {
        match self {
            BuiltinAction::Checkout => {
                debug!(dir = %invocation.working_dir.display(), "checkout is a no-op locally");
                ActionOutcome::succeeded()
            }
            BuiltinAction::ReadFile => read_file(invocation).await,
            BuiltinAction::Echo => {
                let message = invocation.params.get("message").cloned().unwrap_or_default();
                ActionOutcome::succeeded().with_stdout(message)
            }
        }
    }
}

async fn read_file(invocation: &ActionInvocation) -> ActionOutcome {
    let Some(path) = invocation.params.get("path") else {
        return ActionOutcome::failed("read-file requires a 'path' parameter");
    };

    let full_path = invocation.working_dir.join(path);
    match tokio::fs::read_to_string(&full_path).await {
        Ok(content) => {
            ActionOutcome::succeeded().with_output("content", content.trim().to_string())
        }
        Err(e) => ActionOutcome::failed(format!(
            "failed to read '{}': {}",
            full_path.display(),
            e
        )),
    }
}
