//! Run orchestration state machine.
//!
//! A run walks `Idle → Starting → Probing → Communicating → TearingDown →
//! Done`, with a side transition to `Aborting` from any state on
//! cancellation or a critical service failure. Whatever path is taken,
//! teardown runs to completion and a finalized [`TestVerdict`] comes out.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{ServiceDescriptor, ServiceRegistry};
use crate::error::ConfigError;
use crate::runtime::health::HealthStatus;
use crate::signals::CancelToken;
use crate::traits::{HealthCheck, ProcessControl, Probes};
use crate::verdict::{CheckOutcome, PairOutcome, TestVerdict, VerdictBuilder};

/// Orchestration phase. `Aborting` is reachable from any active phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Probing,
    Communicating,
    TearingDown,
    Aborting,
    Done,
}

/// Retry and pacing policy owned by the orchestrator (the health gate itself
/// is a single check).
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Health gate attempts per service after its startup budget.
    pub health_attempts: u32,
    pub health_retry_delay: Duration,
    /// Settle time between the last start and the first probe.
    pub probe_settle_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            health_attempts: 3,
            health_retry_delay: Duration::from_secs(1),
            probe_settle_delay: Duration::from_secs(2),
        }
    }
}

/// What the starting phase achieved.
#[derive(Debug, Default)]
struct StartReport {
    /// Start order actually achieved; teardown is its reverse.
    started: Vec<String>,
    healthy: HashSet<String>,
    attempted: HashSet<String>,
    aborted: bool,
}

/// Drives one orchestration session over injected runtime services.
pub struct Orchestrator<P, H, R>
where
    P: ProcessControl,
    H: HealthCheck,
    R: Probes,
{
    registry: ServiceRegistry,
    processes: P,
    health: H,
    probes: R,
    settings: OrchestratorSettings,
    phase: Phase,
}

impl<P, H, R> Orchestrator<P, H, R>
where
    P: ProcessControl,
    H: HealthCheck,
    R: Probes,
{
    pub fn new(registry: ServiceRegistry, processes: P, health: H, probes: R) -> Self {
        Self {
            registry,
            processes,
            health,
            probes,
            settings: OrchestratorSettings::default(),
            phase: Phase::Idle,
        }
    }

    /// Override retry/pacing policy (fluent API)
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Execute the full session. Consumes the orchestrator: one session, one
    /// verdict. The only early return is a [`ConfigError`], raised before
    /// any process is spawned; every other failure degrades the verdict.
    pub async fn run(mut self, cancel: CancelToken) -> Result<TestVerdict, ConfigError> {
        let order = self.registry.start_order()?;
        let mut verdict = VerdictBuilder::new();

        tracing::info!(
            "🧪 Orchestrating {} services, {} communication pairs",
            self.registry.len(),
            self.registry.communication_pairs().len()
        );

        self.phase = Phase::Starting;
        let report = self.start_services(&order, &cancel, &mut verdict).await;

        let mut aborted = report.aborted;
        if !aborted {
            self.phase = Phase::Probing;
            aborted = self.probe_services(&report, &cancel, &mut verdict).await;
        }
        if !aborted {
            self.phase = Phase::Communicating;
            aborted = self
                .check_communication(&report, &cancel, &mut verdict)
                .await;
        }

        self.phase = if aborted {
            Phase::Aborting
        } else {
            Phase::TearingDown
        };
        self.teardown(&report.started).await;

        // Anything the run never reached is recorded as skipped, not failed.
        for service in self.registry.services() {
            if !report.attempted.contains(&service.id) {
                verdict.record_service_skipped(&service.id, &service.display_name);
            }
        }
        for pair in self.registry.communication_pairs() {
            verdict.record_pair_skipped(pair.id());
        }

        self.phase = Phase::Done;
        let verdict = verdict.finalize(aborted);
        tracing::info!(
            "🏁 Run complete: {}/{} checks passed ({:.1}%) — {}",
            verdict.passed_checks,
            verdict.total_checks,
            verdict.success_rate,
            if verdict.overall_passed {
                "PASSED"
            } else {
                "FAILED"
            }
        );
        Ok(verdict)
    }

    /// Start services in topological order, gating each on health. A
    /// critical failure aborts remaining starts; a non-critical one excludes
    /// the service from probing and moves on.
    async fn start_services(
        &self,
        order: &[String],
        cancel: &CancelToken,
        verdict: &mut VerdictBuilder,
    ) -> StartReport {
        let mut report = StartReport::default();

        for id in order {
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Cancellation observed before starting '{}'", id);
                report.aborted = true;
                return report;
            }
            let Some(descriptor) = self.registry.get(id) else {
                continue;
            };
            report.attempted.insert(id.clone());

            tracing::info!(
                "🚀 Starting {} on port {}",
                descriptor.display_name,
                descriptor.port
            );
            match self.processes.start(descriptor).await {
                Ok(_pid) => {
                    report.started.push(id.clone());
                    match self.await_healthy(descriptor, cancel).await {
                        HealthStatus::Healthy => {
                            tracing::info!("💚 {} is healthy", descriptor.display_name);
                            verdict.record_health(id, &descriptor.display_name, CheckOutcome::Passed);
                            report.healthy.insert(id.clone());
                        }
                        HealthStatus::Unhealthy(reason) => {
                            tracing::warn!(
                                "💔 {} failed its health gate: {}",
                                descriptor.display_name,
                                reason
                            );
                            verdict.record_health(
                                id,
                                &descriptor.display_name,
                                CheckOutcome::Failed(reason),
                            );
                            if descriptor.critical {
                                tracing::error!(
                                    "❌ Critical service '{}' unhealthy, aborting run",
                                    id
                                );
                                report.aborted = true;
                                return report;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to start '{}': {}", id, e);
                    verdict.record_health(
                        id,
                        &descriptor.display_name,
                        CheckOutcome::Failed(e.to_string()),
                    );
                    if descriptor.critical {
                        tracing::error!("❌ Critical service '{}' failed to start, aborting run", id);
                        report.aborted = true;
                        return report;
                    }
                }
            }
        }
        report
    }

    /// Bounded health gate retries; each attempt is one check.
    async fn await_healthy(
        &self,
        descriptor: &ServiceDescriptor,
        cancel: &CancelToken,
    ) -> HealthStatus {
        let attempts = self.settings.health_attempts.max(1);
        let mut last = HealthStatus::Unhealthy("no health attempts made".to_string());
        for attempt in 1..=attempts {
            last = self
                .health
                .check(descriptor.port, &descriptor.health_path)
                .await;
            if last.is_healthy() || cancel.is_cancelled() || attempt == attempts {
                break;
            }
            tracing::debug!(
                "💤 Health attempt {}/{} for '{}' failed, retrying",
                attempt,
                attempts,
                descriptor.id
            );
            sleep(self.settings.health_retry_delay).await;
        }
        last
    }

    /// Performance then stress probes for every healthy service, in start
    /// order. One probe's failure never stops the next service's probes.
    /// Returns true when cancellation interrupted the phase.
    async fn probe_services(
        &self,
        report: &StartReport,
        cancel: &CancelToken,
        verdict: &mut VerdictBuilder,
    ) -> bool {
        if report.healthy.is_empty() {
            return false;
        }
        if !self.settings.probe_settle_delay.is_zero() {
            sleep(self.settings.probe_settle_delay).await;
        }

        for id in &report.started {
            if !report.healthy.contains(id) {
                continue;
            }
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Cancellation observed before probing '{}'", id);
                return true;
            }
            let Some(descriptor) = self.registry.get(id) else {
                continue;
            };
            tracing::info!("🔬 Probing {}", descriptor.display_name);

            match self.probes.performance(descriptor.port).await {
                Ok(result) => {
                    tracing::info!(
                        "📈 Performance probe for {} completed in {:?}",
                        descriptor.display_name,
                        result.latencies.first().copied().unwrap_or_default()
                    );
                    verdict.record_performance(id, CheckOutcome::Passed, Some(result));
                }
                Err(e) => {
                    tracing::warn!(
                        "📉 Performance probe for {} failed: {}",
                        descriptor.display_name,
                        e
                    );
                    verdict.record_performance(id, CheckOutcome::Failed(e.to_string()), None);
                }
            }

            if cancel.is_cancelled() {
                tracing::warn!("🛑 Cancellation observed before stressing '{}'", id);
                return true;
            }
            let stress = self.probes.stress(descriptor.port).await;
            let outcome = if stress.passed {
                CheckOutcome::Passed
            } else {
                CheckOutcome::Failed(format!(
                    "success rate {:.1}% below threshold",
                    stress.success_rate
                ))
            };
            verdict.record_stress(id, outcome, Some(stress));
        }
        false
    }

    /// Declared communication pairs, each gated on both endpoints being
    /// started and healthy. Gated-out pairs are skipped, not failed.
    async fn check_communication(
        &self,
        report: &StartReport,
        cancel: &CancelToken,
        verdict: &mut VerdictBuilder,
    ) -> bool {
        for pair in self.registry.communication_pairs() {
            if cancel.is_cancelled() {
                tracing::warn!("🛑 Cancellation observed before pair {}", pair.id());
                return true;
            }
            let pair_id = pair.id();
            if !report.healthy.contains(&pair.source) || !report.healthy.contains(&pair.target) {
                tracing::info!("⏭️ Skipping communication check {} (endpoint unavailable)", pair_id);
                verdict.record_pair(pair_id, PairOutcome::Skipped);
                continue;
            }
            let (Some(source), Some(target)) =
                (self.registry.get(&pair.source), self.registry.get(&pair.target))
            else {
                continue;
            };

            let reached = self.probes.communication(source.port, target.port).await;
            if reached {
                tracing::info!("🔗 Communication check {} passed", pair_id);
            } else {
                tracing::warn!("⛓️ Communication check {} failed", pair_id);
            }
            verdict.record_pair(
                pair_id,
                if reached {
                    PairOutcome::Passed
                } else {
                    PairOutcome::Failed
                },
            );
        }
        false
    }

    /// Stop everything that started, in reverse achieved order. Failures are
    /// logged and swallowed: teardown is total.
    async fn teardown(&self, started: &[String]) {
        let teardown_order: Vec<String> = started.iter().rev().cloned().collect();
        let failures = self.processes.stop_all(&teardown_order).await;
        for (id, e) in &failures {
            tracing::warn!("⚠️ Teardown: failed to stop '{}': {}", id, e);
        }
        if failures.is_empty() && !teardown_order.is_empty() {
            tracing::info!("✅ All started services stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistryBuilder, ServiceDescriptor};
    use crate::error::StartError;
    use crate::runtime::resources::ResourceSnapshot;
    use crate::traits::{MockHealthCheck, MockProcessControl, MockProbes};
    use crate::verdict::ProbeResult;

    fn fast_settings() -> OrchestratorSettings {
        OrchestratorSettings {
            health_attempts: 1,
            health_retry_delay: Duration::from_millis(1),
            probe_settle_delay: Duration::ZERO,
        }
    }

    fn probe_result(success_rate: f64, passed: bool) -> ProbeResult {
        ProbeResult {
            sample_count: 50,
            latencies: vec![Duration::from_millis(5)],
            stats: None,
            success_rate,
            passed,
            payload: None,
            resources: ResourceSnapshot::default(),
        }
    }

    fn spawn_error(id: &str) -> StartError {
        StartError::Spawn {
            id: id.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        }
    }

    fn chain_registry(critical_first: bool) -> ServiceRegistry {
        RegistryBuilder::new()
            .service(
                ServiceDescriptor::new("a", "A", "a_demo", 9001).with_critical(critical_first),
            )
            .service(ServiceDescriptor::new("b", "B", "b_demo", 9002).with_dependencies(["a"]))
            .service(ServiceDescriptor::new("c", "C", "c_demo", 9003).with_dependencies(["b"]))
            .build()
            .expect("valid registry")
    }

    #[tokio::test]
    async fn happy_path_counts_every_check() {
        let registry = RegistryBuilder::new()
            .service(ServiceDescriptor::new("a", "A", "a_demo", 9001))
            .service(ServiceDescriptor::new("b", "B", "b_demo", 9002).with_dependencies(["a"]))
            .communication_pair("a", "b")
            .build()
            .unwrap();

        let mut processes = MockProcessControl::new();
        processes.expect_start().times(2).returning(|_| Ok(7));
        processes
            .expect_stop_all()
            .withf(|order: &[String]| order == ["b".to_string(), "a".to_string()])
            .times(1)
            .returning(|_| Vec::new());

        let mut health = MockHealthCheck::new();
        health
            .expect_check()
            .times(2)
            .returning(|_, _| HealthStatus::Healthy);

        let mut probes = MockProbes::new();
        probes
            .expect_performance()
            .times(2)
            .returning(|_| Ok(probe_result(100.0, true)));
        probes
            .expect_stress()
            .times(2)
            .returning(|_| probe_result(100.0, true));
        probes
            .expect_communication()
            .times(1)
            .returning(|_, _| true);

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(CancelToken::new())
            .await
            .expect("valid config");

        assert_eq!(verdict.total_checks, 7);
        assert_eq!(verdict.passed_checks, 7);
        assert!(verdict.overall_passed);
        assert!(!verdict.aborted);
    }

    #[tokio::test]
    async fn critical_start_failure_aborts_remaining_starts() {
        let registry = chain_registry(true);

        let mut processes = MockProcessControl::new();
        processes
            .expect_start()
            .withf(|d: &ServiceDescriptor| d.id == "a")
            .times(1)
            .returning(|_| Err(spawn_error("a")));
        processes
            .expect_stop_all()
            .withf(|order: &[String]| order.is_empty())
            .times(1)
            .returning(|_| Vec::new());

        // Health and probes must never be touched.
        let health = MockHealthCheck::new();
        let probes = MockProbes::new();

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(CancelToken::new())
            .await
            .unwrap();

        assert!(verdict.aborted);
        assert!(!verdict.overall_passed);
        assert_eq!(verdict.total_checks, 1);
        assert_eq!(verdict.per_service["b"].health, CheckOutcome::Skipped);
        assert_eq!(verdict.per_service["c"].health, CheckOutcome::Skipped);
    }

    #[tokio::test]
    async fn critical_health_failure_tears_down_what_started() {
        let registry = chain_registry(true);

        let mut processes = MockProcessControl::new();
        processes
            .expect_start()
            .withf(|d: &ServiceDescriptor| d.id == "a")
            .times(1)
            .returning(|_| Ok(7));
        processes
            .expect_stop_all()
            .withf(|order: &[String]| order == ["a".to_string()])
            .times(1)
            .returning(|_| Vec::new());

        let mut health = MockHealthCheck::new();
        health
            .expect_check()
            .times(1)
            .returning(|_, _| HealthStatus::Unhealthy("HTTP 503".to_string()));

        let probes = MockProbes::new();

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(CancelToken::new())
            .await
            .unwrap();

        assert!(verdict.aborted);
        assert!(!verdict.overall_passed);
        assert_eq!(
            verdict.per_service["a"].health,
            CheckOutcome::Failed("HTTP 503".to_string())
        );
        assert_eq!(verdict.per_service["b"].health, CheckOutcome::Skipped);
    }

    #[tokio::test]
    async fn non_critical_failure_does_not_block_other_services() {
        let registry = RegistryBuilder::new()
            .service(ServiceDescriptor::new("flaky", "Flaky", "flaky_demo", 9001))
            .service(ServiceDescriptor::new("solid", "Solid", "solid_demo", 9002))
            .build()
            .unwrap();

        let mut processes = MockProcessControl::new();
        processes
            .expect_start()
            .times(2)
            .returning(|d: &ServiceDescriptor| {
                if d.id == "flaky" {
                    Err(spawn_error("flaky"))
                } else {
                    Ok(7)
                }
            });
        processes
            .expect_stop_all()
            .withf(|order: &[String]| order == ["solid".to_string()])
            .times(1)
            .returning(|_| Vec::new());

        let mut health = MockHealthCheck::new();
        health
            .expect_check()
            .times(1)
            .returning(|_, _| HealthStatus::Healthy);

        let mut probes = MockProbes::new();
        probes
            .expect_performance()
            .times(1)
            .returning(|_| Ok(probe_result(100.0, true)));
        probes
            .expect_stress()
            .times(1)
            .returning(|_| probe_result(96.0, true));

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(CancelToken::new())
            .await
            .unwrap();

        assert!(!verdict.aborted);
        assert_eq!(verdict.total_checks, 4);
        assert_eq!(verdict.passed_checks, 3);
        assert!(verdict.per_service["solid"].health.passed());
    }

    #[tokio::test]
    async fn pair_with_unhealthy_endpoint_is_skipped_not_failed() {
        let registry = RegistryBuilder::new()
            .service(ServiceDescriptor::new("a", "A", "a_demo", 9001))
            .service(ServiceDescriptor::new("c", "C", "c_demo", 9003))
            .communication_pair("a", "c")
            .build()
            .unwrap();

        let mut processes = MockProcessControl::new();
        processes.expect_start().times(2).returning(|_| Ok(7));
        processes
            .expect_stop_all()
            .times(1)
            .returning(|_| Vec::new());

        let mut health = MockHealthCheck::new();
        health.expect_check().times(2).returning(|port, _| {
            if port == 9003 {
                HealthStatus::Unhealthy("connection refused".to_string())
            } else {
                HealthStatus::Healthy
            }
        });

        let mut probes = MockProbes::new();
        probes
            .expect_performance()
            .times(1)
            .returning(|_| Ok(probe_result(100.0, true)));
        probes
            .expect_stress()
            .times(1)
            .returning(|_| probe_result(100.0, true));
        // No communication expectation: a skipped pair never issues a request.

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(CancelToken::new())
            .await
            .unwrap();

        assert_eq!(verdict.per_pair["a->c"], PairOutcome::Skipped);
        // a health + c health + a perf + a stress; the skipped pair adds nothing.
        assert_eq!(verdict.total_checks, 4);
    }

    #[tokio::test]
    async fn pre_cancelled_run_starts_nothing() {
        let registry = chain_registry(false);

        let mut processes = MockProcessControl::new();
        processes
            .expect_stop_all()
            .withf(|order: &[String]| order.is_empty())
            .times(1)
            .returning(|_| Vec::new());

        let health = MockHealthCheck::new();
        let probes = MockProbes::new();

        let cancel = CancelToken::new();
        cancel.cancel();

        let verdict = Orchestrator::new(registry, processes, health, probes)
            .with_settings(fast_settings())
            .run(cancel)
            .await
            .unwrap();

        assert!(verdict.aborted);
        assert_eq!(verdict.total_checks, 0);
        assert!(verdict
            .per_service
            .values()
            .all(|report| report.health == CheckOutcome::Skipped));
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_spawn() {
        let registry = ServiceRegistry::new(
            vec![
                ServiceDescriptor::new("a", "A", "a_demo", 9001).with_dependencies(["b"]),
                ServiceDescriptor::new("b", "B", "b_demo", 9002).with_dependencies(["a"]),
            ],
            vec![],
        );
        // The registry itself refuses the graph; no orchestrator, no spawns.
        assert!(matches!(registry, Err(ConfigError::DependencyCycle { .. })));
    }
}
