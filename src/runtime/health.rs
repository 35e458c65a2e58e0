//! Health gate: single bounded readiness check against a service's health
//! surface. Retry policy belongs to the orchestrator, not here.

use std::time::Duration;

/// Result of one health check attempt, with the concrete failure recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

pub struct HealthGate {
    client: reqwest::Client,
}

impl HealthGate {
    /// `attempt_timeout` bounds every individual check.
    pub fn new(attempt_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    /// Issue one `GET http://localhost:{port}{health_path}`. A 2xx response
    /// is healthy; any other status or transport failure is unhealthy.
    pub async fn check(&self, port: u16, health_path: &str) -> HealthStatus {
        let url = format!("http://localhost:{port}{health_path}");
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) => {
                HealthStatus::Unhealthy(format!("HTTP {}", response.status().as_u16()))
            }
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}

impl Default for HealthGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl crate::traits::HealthCheck for HealthGate {
    async fn check(&self, port: u16, health_path: &str) -> HealthStatus {
        HealthGate::check(self, port, health_path).await
    }
}
