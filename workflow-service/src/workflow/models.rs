use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative CI workflow definition.
///
/// Maps keep their declaration order: the order of matrix axes decides the
/// order of expanded jobs, and the order of `jobs` decides reporting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: Option<String>,
    pub on: Trigger,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Each job is expanded into its own matrix run
    pub jobs: IndexMap<String, Job>,
}

/// The `on:` key: a single event, a list of events, or a map of events
/// to branch filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Single(String),
    Multiple(Vec<String>),
    Detailed(IndexMap<String, Option<EventConfig>>),
}

/// Branch filters attached to one event under `on:`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct EventConfig {
    /// Accepted branches; empty accepts every branch
    pub branches: Vec<String>,
    pub branches_ignore: Vec<String>,
}

/// An incoming repository event that may activate a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Event kind, e.g. `push` or `pull_request`
    pub kind: String,
    /// Branch the event refers to, when known
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: normalize_event(&kind.into()),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// The git ref for the event's branch, e.g. `refs/heads/main`.
    pub fn git_ref(&self) -> Option<String> {
        self.branch.as_ref().map(|b| format!("refs/heads/{}", b))
    }
}

fn normalize_event(kind: &str) -> String {
    kind.trim().replace('-', "_").to_lowercase()
}

fn branch_matches(pattern: &str, branch: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => branch.starts_with(prefix),
        None => pattern == branch,
    }
}

impl Trigger {
    /// Event kinds this trigger listens for, normalized.
    pub fn events(&self) -> Vec<String> {
        match self {
            Trigger::Single(event) => vec![normalize_event(event)],
            Trigger::Multiple(events) => events.iter().map(|e| normalize_event(e)).collect(),
            Trigger::Detailed(events) => events.keys().map(|e| normalize_event(e)).collect(),
        }
    }

    /// Whether an incoming event activates the workflow.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let kind = normalize_event(&event.kind);
        match self {
            Trigger::Single(_) | Trigger::Multiple(_) => self.events().contains(&kind),
            Trigger::Detailed(events) => {
                let config = events
                    .iter()
                    .find(|(name, _)| normalize_event(name) == kind)
                    .map(|(_, config)| config);

                match config {
                    None => false,
                    Some(None) => true,
                    Some(Some(config)) => config.accepts_branch(event.branch.as_deref()),
                }
            }
        }
    }
}

impl EventConfig {
    fn accepts_branch(&self, branch: Option<&str>) -> bool {
        // Events without a branch cannot be filtered out by branch patterns
        let Some(branch) = branch else {
            return true;
        };

        if self
            .branches_ignore
            .iter()
            .any(|pattern| branch_matches(pattern, branch))
        {
            return false;
        }

        self.branches.is_empty()
            || self
                .branches
                .iter()
                .any(|pattern| branch_matches(pattern, branch))
    }
}

/// One job template; a matrix turns it into many concrete jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct Job {
    /// Display name template, may interpolate `${{ matrix.* }}`
    pub name: Option<String>,
    /// Informational; every job runs on the local machine
    pub runs_on: Option<RunsOn>,
    pub env: IndexMap<String, String>,
    pub strategy: Option<Strategy>,
    pub steps: Vec<Step>,
    pub timeout_minutes: Option<u32>,
}

impl Job {
    /// Whether the matrix cancels its siblings on the first failure.
    pub fn fail_fast(&self) -> bool {
        self.strategy.as_ref().map_or(true, |s| s.fail_fast)
    }

    pub fn max_parallel(&self) -> Option<u32> {
        self.strategy.as_ref().and_then(|s| s.max_parallel)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Label(String),
    Labels(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Strategy {
    pub matrix: Option<Matrix>,
    /// Cancel pending siblings once one job fails
    pub fail_fast: bool,
    /// Upper bound on concurrently running jobs of this matrix
    pub max_parallel: Option<u32>,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            matrix: None,
            fail_fast: true,
            max_parallel: None,
        }
    }
}

/// Named axes plus `include`/`exclude` adjustments.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Matrix {
    /// Every key other than `include`/`exclude`, in declaration order
    #[serde(flatten)]
    pub dimensions: IndexMap<String, Vec<Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,
}

/// A single unit of work in a job: either an inline script or a named action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct Step {
    /// Lets later steps read this step's outputs as `steps.<id>.outputs`
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "if")]
    pub if_condition: Option<String>,
    pub run: Option<String>,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    /// Action reference, e.g. `read-file` or `actions/checkout@v4`
    pub uses: Option<String>,
    pub with: IndexMap<String, Value>,
    pub env: IndexMap<String, String>,
    /// Declared outputs, interpolated after the action succeeds
    pub outputs: IndexMap<String, String>,
    pub continue_on_error: bool,
    pub timeout_minutes: Option<u32>,
}

impl Step {
    /// Label used in progress output when the step has no `name`.
    pub fn display_name(&self) -> String {
        const WIDTH: usize = 50;

        if let Some(name) = &self.name {
            return name.clone();
        }
        let summary = match (&self.uses, &self.run) {
            (Some(uses), _) => uses.clone(),
            (None, Some(run)) => {
                let line = run.lines().find(|l| !l.trim().is_empty()).unwrap_or_default().trim();
                if line.chars().count() > WIDTH {
                    format!("{}...", line.chars().take(WIDTH - 3).collect::<String>())
                } else {
                    line.to_string()
                }
            }
            (None, None) => return "Unnamed step".to_string(),
        };
        format!("Run {}", summary)
    }

    pub fn is_run(&self) -> bool {
        self.run.is_some()
    }

    pub fn is_uses(&self) -> bool {
        self.uses.is_some()
    }
}
