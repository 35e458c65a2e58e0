//! Fleet Integration Test Harness
//!
//! Orchestrates a fleet of externally-built service processes: starts them
//! in dependency order, gates each on a health check, runs performance and
//! stress probes, exercises declared communication pairs, and tears
//! everything down deterministically. The run always ends in a finalized
//! [`TestVerdict`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use fleet_tester::{
//!     CancelToken, HealthGate, Orchestrator, ProbeRunner, ProbeSettings,
//!     ProcessController, RegistryBuilder, ServiceDescriptor,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new()
//!     .service(ServiceDescriptor::new("mesh", "Mesh Network", "mesh_demo", 8081))
//!     .service(
//!         ServiceDescriptor::new("fcc", "Flight Control", "fcc_demo", 8082)
//!             .with_dependencies(["mesh"])
//!             .with_critical(true),
//!     )
//!     .communication_pair("fcc", "mesh")
//!     .build()?;
//!
//! let orchestrator = Orchestrator::new(
//!     registry,
//!     ProcessController::new("build"),
//!     HealthGate::new(Duration::from_secs(5)),
//!     ProbeRunner::new(ProbeSettings::default()),
//! );
//!
//! let verdict = orchestrator.run(CancelToken::new()).await?;
//! assert!(verdict.overall_passed);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod runtime;
pub mod signals;
pub mod traits;
pub mod verdict;

// Main interfaces - re-exported at crate root for convenience
pub use config::{CommunicationPair, RegistryBuilder, ServiceDescriptor, ServiceRegistry};
pub use error::{ConfigError, ProbeError, StartError, StopError};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Phase};
pub use runtime::{HealthGate, HealthStatus, ProbeRunner, ProbeSettings, ProcessController, ServiceState};
pub use signals::CancelToken;
pub use verdict::{
    CheckOutcome, LatencyStats, PairOutcome, ProbeResult, TestVerdict, VerdictBuilder,
};

#[cfg(unix)]
pub use runtime::CleanupManager;
