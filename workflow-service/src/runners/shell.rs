// Shell Runner
// Executes `run:` steps with bash, sh, pwsh or python

use crate::runners::ActionOutcome;

use indexmap::IndexMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// Default shell (bash if available, sh otherwise)
    Default,
    Bash,
    Sh,
    /// PowerShell Core
    Pwsh,
    Python,
}

impl Shell {
    /// Parse a `shell:` value; unknown names yield None
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bash" => Some(Shell::Bash),
            "sh" => Some(Shell::Sh),
            "pwsh" | "powershell" => Some(Shell::Pwsh),
            "python" | "python3" => Some(Shell::Python),
            _ => None,
        }
    }

    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if which::which("bash").is_ok() {
                    ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"])
                } else {
                    ("sh", &["-e", "-c"])
                }
            }
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
            Shell::Python => {
                if which::which("python3").is_ok() {
                    ("python3", &["-c"])
                } else {
                    ("python", &["-c"])
                }
            }
        }
    }
}

/// Configuration for shell execution
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Working directory for the script, relative to the runner's directory
    pub working_dir: Option<String>,
    /// Timeout (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Output collected during script execution
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if killed or never spawned)
    pub exit_code: Option<i32>,
    /// Outputs written to `$GITHUB_OUTPUT` or via `::set-output`
    pub outputs: IndexMap<String, String>,
    pub timed_out: bool,
}

impl ShellOutput {
    fn spawn_failure(message: String) -> Self {
        Self {
            stderr: message,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn into_outcome(self) -> ActionOutcome {
        let error = if self.timed_out {
            Some(self.stderr.clone())
        } else if self.success() {
            None
        } else {
            match self.exit_code {
                Some(code) => Some(format!("process exited with code {}", code)),
                None => Some(self.stderr.clone()),
            }
        };

        ActionOutcome {
            success: self.success(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            outputs: self.outputs,
            error,
        }
    }
}

/// Shell runner for executing scripts
pub struct ShellRunner {
    default_shell: Shell,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            default_shell: Shell::Default,
        }
    }

    /// Create a shell runner with a specific default shell
    pub fn with_default_shell(shell: Shell) -> Self {
        Self {
            default_shell: shell,
        }
    }

    pub fn default_shell(&self) -> Shell {
        self.default_shell
    }

    /// Execute a script using the default shell
    pub async fn run_script(
        &self,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
    ) -> ShellOutput {
        self.run_with_shell(self.default_shell, script, env, working_dir, config)
            .await
    }

    /// Execute a script with a specific shell, capturing its output
    pub async fn run_with_shell(
        &self,
        shell: Shell,
        script: &str,
        env: &IndexMap<String, String>,
        working_dir: &Path,
        config: &ShellConfig,
    ) -> ShellOutput {
        let (shell_cmd, shell_args) = shell.get_command();

        let work_dir = match &config.working_dir {
            Some(dir) => working_dir.join(dir),
            None => working_dir.to_path_buf(),
        };

        // Steps append `name=value` lines to this file
        let output_file = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                return ShellOutput::spawn_failure(format!(
                    "Failed to create output file: {}",
                    e
                ))
            }
        };

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        cmd.current_dir(&work_dir);
        cmd.envs(env);
        cmd.env("GITHUB_OUTPUT", output_file.path());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(shell = shell_cmd, dir = %work_dir.display(), "spawning step process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ShellOutput::spawn_failure(format!(
                    "Failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return ShellOutput::spawn_failure("Failed to capture process output".to_string());
        };

        let stdout_handle = tokio::spawn(collect_lines(stdout));
        let stderr_handle = tokio::spawn(collect_lines(stderr));

        let wait_result = if let Some(timeout) = config.timeout {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?timeout, "step process timed out, killing");
                    let _ = child.kill().await;
                    return ShellOutput {
                        stdout: stdout_handle.await.unwrap_or_default(),
                        stderr: format!("Process timed out after {:?}", timeout),
                        exit_code: None,
                        outputs: IndexMap::new(),
                        timed_out: true,
                    };
                }
            }
        } else {
            child.wait().await
        };

        let exit_code = wait_result.ok().and_then(|s| s.code());
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        let mut outputs = parse_set_output_commands(&stdout);
        match tokio::fs::read_to_string(output_file.path()).await {
            Ok(content) => outputs.extend(parse_output_file(&content)),
            Err(e) => warn!(error = %e, "failed to read step output file"),
        }

        ShellOutput {
            stdout,
            stderr,
            exit_code,
            outputs,
            timed_out: false,
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect_lines<R>(reader: R) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push(line);
    }
    collected.join("\n")
}

/// Parse `::set-output name=key::value` workflow commands
fn parse_set_output_commands(output: &str) -> IndexMap<String, String> {
    let mut outputs = IndexMap::new();

    for line in output.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("::set-output name=") {
            if let Some((name, value)) = rest.split_once("::") {
                outputs.insert(name.trim().to_string(), value.to_string());
            }
        }
    }

    outputs
}

/// Parse `$GITHUB_OUTPUT` content: `name=value` lines and
/// `name<<DELIM` ... `DELIM` heredoc blocks
fn parse_output_file(content: &str) -> IndexMap<String, String> {
    let mut outputs = IndexMap::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some((name, delimiter)) = line.split_once("<<") {
            let mut value = Vec::new();
            for body in lines.by_ref() {
                if body == delimiter {
                    break;
                }
                value.push(body);
            }
            outputs.insert(name.trim().to_string(), value.join("\n"));
        } else if let Some((name, value)) = line.split_once('=') {
            outputs.insert(name.trim().to_string(), value.to_string());
        }
    }

    outputs
}
