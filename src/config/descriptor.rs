//! Service descriptors and declared communication pairs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable description of one externally-built service under orchestration.
///
/// Descriptors are pure data: the executable is launched by the
/// [`ProcessController`](crate::runtime::process::ProcessController) with the
/// harness build directory as working directory, and reached over
/// `http://localhost:{port}` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique registry key.
    pub id: String,

    /// Human-readable name used in logs and verdicts. Defaults to `id`.
    #[serde(default)]
    pub display_name: String,

    /// Executable path; relative paths resolve against the build directory.
    pub executable: PathBuf,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// TCP port the service listens on. Unique across the registry.
    pub port: u16,

    /// Health surface path, e.g. `/health`.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// How long the process gets to come up before liveness is judged.
    #[serde(
        rename = "startup_budget_secs",
        with = "duration_secs",
        default = "default_startup_budget"
    )]
    pub startup_budget: Duration,

    /// Ids of services that must be started (and gated) first.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// A critical service's start/health failure aborts the entire run.
    #[serde(default)]
    pub critical: bool,
}

impl ServiceDescriptor {
    /// Create a descriptor with defaults (`/health`, 10 s budget, no
    /// dependencies, non-critical).
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        executable: impl Into<PathBuf>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            executable: executable.into(),
            args: Vec::new(),
            port,
            health_path: default_health_path(),
            startup_budget: default_startup_budget(),
            dependencies: Vec::new(),
            critical: false,
        }
    }

    /// Set the argument vector (fluent API)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the health surface path (fluent API)
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Set the startup budget (fluent API)
    pub fn with_startup_budget(mut self, budget: Duration) -> Self {
        self.startup_budget = budget;
        self
    }

    /// Set the dependency list (fluent API)
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the service as critical (fluent API)
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

/// A declared inter-service communication check: the source is instructed to
/// contact the target over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunicationPair {
    pub source: String,
    pub target: String,
}

impl CommunicationPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Stable key used in verdicts, `source->target`.
    pub fn id(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_startup_budget() -> Duration {
    Duration::from_secs(10)
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
