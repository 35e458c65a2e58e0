//! Performance, stress, and communication probes against running services.
//!
//! The stress probe is the only point of structured parallelism in a run: a
//! bounded pool fans requests out and joins before the probe returns.

use futures_util::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::ProbeError;
use crate::runtime::resources::ResourceMonitor;
use crate::verdict::{LatencyStats, ProbeResult};

/// Timeouts, fan-out bounds, and pass thresholds for all probe kinds.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub performance_timeout: Duration,
    /// Independent timeout for each stress request.
    pub stress_timeout: Duration,
    pub communication_timeout: Duration,
    /// Concurrent workers in the stress pool.
    pub stress_concurrency: usize,
    pub stress_total_requests: usize,
    /// Minimum stress success rate (percent) to pass.
    pub stress_pass_threshold: f64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            performance_timeout: Duration::from_secs(30),
            stress_timeout: Duration::from_secs(5),
            communication_timeout: Duration::from_secs(10),
            stress_concurrency: 10,
            stress_total_requests: 50,
            stress_pass_threshold: 95.0,
        }
    }
}

pub struct ProbeRunner {
    client: reqwest::Client,
    settings: ProbeSettings,
    monitor: Mutex<ResourceMonitor>,
}

impl ProbeRunner {
    pub fn new(settings: ProbeSettings) -> Self {
        // Per-request timeouts are set on each request; the client itself
        // carries no global deadline.
        let client = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            settings,
            monitor: Mutex::new(ResourceMonitor::new()),
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// One timed `GET /performance_test`. The endpoint's JSON payload is
    /// returned merged with the measured round-trip time.
    pub async fn performance(&self, port: u16) -> Result<ProbeResult, ProbeError> {
        let url = format!("http://localhost:{port}/performance_test");
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.settings.performance_timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                status: status.as_u16(),
            });
        }

        let mut payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProbeError::Transport(format!("invalid JSON payload: {e}")))?;
        let elapsed = started.elapsed();

        if let serde_json::Value::Object(map) = &mut payload {
            map.insert(
                "measured_response_time_ms".to_string(),
                serde_json::json!(elapsed.as_secs_f64() * 1000.0),
            );
        }

        let latencies = vec![elapsed];
        let resources = self.monitor.lock().await.snapshot();
        Ok(ProbeResult {
            sample_count: 1,
            stats: LatencyStats::from_latencies(&latencies),
            latencies,
            success_rate: 100.0,
            passed: true,
            payload: Some(payload),
            resources,
        })
    }

    /// Fan `stress_total_requests` `GET /stress_test` requests out across a
    /// pool of `stress_concurrency` workers and join. Errors and timeouts
    /// count as failed samples; they never abort the batch.
    pub async fn stress(&self, port: u16) -> ProbeResult {
        let total = self.settings.stress_total_requests;
        let url = format!("http://localhost:{port}/stress_test");

        let completed: Vec<(usize, Option<Duration>)> = stream::iter((0..total).map(|slot| {
            let client = self.client.clone();
            let url = url.clone();
            let timeout = self.settings.stress_timeout;
            async move {
                let started = Instant::now();
                match client.get(&url).timeout(timeout).send().await {
                    Ok(response) if response.status().is_success() => {
                        (slot, Some(started.elapsed()))
                    }
                    _ => (slot, None),
                }
            }
        }))
        .buffer_unordered(self.settings.stress_concurrency.max(1))
        .collect()
        .await;

        // Completion order is unordered; attribute every sample back to its
        // logical slot before aggregating.
        let mut slots: Vec<Option<Duration>> = vec![None; total];
        let mut latencies = Vec::with_capacity(total);
        for (slot, latency) in completed {
            if let Some(duration) = latency {
                latencies.push(duration);
            }
            slots[slot] = latency;
        }

        let successes = slots.iter().filter(|slot| slot.is_some()).count();
        let success_rate = if total > 0 {
            successes as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let passed = success_rate >= self.settings.stress_pass_threshold;

        tracing::debug!(
            "🧨 Stress probe on port {}: {}/{} succeeded ({:.1}%)",
            port,
            successes,
            total,
            success_rate
        );

        let resources = self.monitor.lock().await.snapshot();
        ProbeResult {
            sample_count: total,
            stats: LatencyStats::from_latencies(&latencies),
            latencies,
            success_rate,
            passed,
            payload: None,
            resources,
        }
    }

    /// Instruct the source service to contact the target. A 2xx from the
    /// source means the source reached the target; what was exchanged is the
    /// services' business.
    pub async fn communication(&self, source_port: u16, target_port: u16) -> bool {
        let url = format!("http://localhost:{source_port}/test_communication");
        let body = serde_json::json!({
            "target": format!("http://localhost:{target_port}"),
        });

        match self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.settings.communication_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(
                    "📡 Communication probe {} -> {} failed: {}",
                    source_port,
                    target_port,
                    e
                );
                false
            }
        }
    }
}

impl Default for ProbeRunner {
    fn default() -> Self {
        Self::new(ProbeSettings::default())
    }
}

#[async_trait::async_trait]
impl crate::traits::Probes for ProbeRunner {
    async fn performance(&self, port: u16) -> Result<ProbeResult, ProbeError> {
        ProbeRunner::performance(self, port).await
    }

    async fn stress(&self, port: u16) -> ProbeResult {
        ProbeRunner::stress(self, port).await
    }

    async fn communication(&self, source_port: u16, target_port: u16) -> bool {
        ProbeRunner::communication(self, source_port, target_port).await
    }
}
