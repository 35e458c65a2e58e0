//! Error types for registry validation, process control, and probing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Registry-level configuration errors. Always surfaced before any process
/// is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate service id '{id}' in registry")]
    DuplicateId { id: String },

    #[error("port {port} declared by both '{first}' and '{second}'")]
    DuplicatePort { port: u16, first: String, second: String },

    #[error("service '{id}' declares port 0")]
    InvalidPort { id: String },

    #[error("service '{id}' depends on undeclared service '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("dependency cycle among services: {services}")]
    DependencyCycle { services: String },

    #[error("communication pair references undeclared service '{id}'")]
    UnknownPairEndpoint { id: String },

    #[error("failed to read registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse registry JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures while launching a service process.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("executable not found: {path}")]
    ExecutableNotFound { path: PathBuf },

    #[error("service '{id}' is already running")]
    AlreadyRunning { id: String },

    #[error("failed to spawn '{id}': {source}")]
    Spawn {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("'{id}' exited during startup ({status}): {stderr_tail}")]
    ExitedDuringStartup {
        id: String,
        status: String,
        stderr_tail: String,
    },
}

/// Failures while terminating a service process. Collected during teardown,
/// never fatal to the run.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("failed to force-kill '{id}': {source}")]
    Kill {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to reap '{id}': {source}")]
    Wait {
        id: String,
        #[source]
        source: io::Error,
    },
}

/// Failures of an individual probe request. Recorded as a failed check,
/// never aborts sibling probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status HTTP {status}")]
    Status { status: u16 },
}
