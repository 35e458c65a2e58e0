//! Trait seams for dependency injection and testing.
//!
//! The orchestrator is generic over these traits; production wires in the
//! real runtime services, tests substitute mocks.

use async_trait::async_trait;

use crate::config::ServiceDescriptor;
use crate::error::{ProbeError, StartError, StopError};
use crate::runtime::health::HealthStatus;
use crate::verdict::ProbeResult;

/// Process lifecycle abstraction over
/// [`ProcessController`](crate::runtime::process::ProcessController).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the service and wait out its startup budget; returns the pid.
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<u32, StartError>;

    /// Graceful-then-forced stop. Idempotent.
    async fn stop(&self, id: &str) -> Result<(), StopError>;

    /// Best-effort stop of every service in the given order, collecting
    /// failures instead of aborting.
    async fn stop_all(&self, order: &[String]) -> Vec<(String, StopError)>;

    async fn is_running(&self, id: &str) -> bool;
}

/// Readiness check abstraction over
/// [`HealthGate`](crate::runtime::health::HealthGate).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, port: u16, health_path: &str) -> HealthStatus;
}

/// Probe abstraction over [`ProbeRunner`](crate::runtime::probes::ProbeRunner).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Probes: Send + Sync {
    async fn performance(&self, port: u16) -> Result<ProbeResult, ProbeError>;

    async fn stress(&self, port: u16) -> ProbeResult;

    async fn communication(&self, source_port: u16, target_port: u16) -> bool;
}

#[async_trait]
impl<T> ProcessControl for std::sync::Arc<T>
where
    T: ProcessControl + ?Sized,
{
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<u32, StartError> {
        (**self).start(descriptor).await
    }

    async fn stop(&self, id: &str) -> Result<(), StopError> {
        (**self).stop(id).await
    }

    async fn stop_all(&self, order: &[String]) -> Vec<(String, StopError)> {
        (**self).stop_all(order).await
    }

    async fn is_running(&self, id: &str) -> bool {
        (**self).is_running(id).await
    }
}
