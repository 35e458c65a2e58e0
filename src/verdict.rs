//! Probe results and the aggregate run verdict.
//!
//! A [`VerdictBuilder`] accumulates check outcomes over the course of a run;
//! [`VerdictBuilder::finalize`] consumes it and yields the immutable
//! [`TestVerdict`] that external reporters consume.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::runtime::resources::ResourceSnapshot;

/// A run passes overall when at least this share of checks passed.
pub const OVERALL_PASS_THRESHOLD: f64 = 90.0;

/// Outcome of a single check. `Skipped` entries never count toward totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed(String),
    Skipped,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed)
    }
}

/// Outcome of a declared communication pair check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Latency aggregates over a probe's samples, nearest-rank percentiles.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencyStats {
    /// `None` when there are no samples.
    pub fn from_latencies(latencies: &[Duration]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        let mut sorted = latencies.to_vec();
        sorted.sort();
        let total: Duration = sorted.iter().sum();
        Some(Self {
            mean: total / sorted.len() as u32,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Quantified result of one probe against one service. Immutable once
/// computed.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// Number of requests issued, including failures.
    pub sample_count: usize,
    /// Successful-request latencies in completion order.
    pub latencies: Vec<Duration>,
    pub stats: Option<LatencyStats>,
    /// Successes over samples, 0–100.
    pub success_rate: f64,
    pub passed: bool,
    /// The endpoint's self-reported payload, merged with the measured
    /// round-trip where applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub resources: ResourceSnapshot,
}

/// Probe outcome plus its quantified result (absent when the probe never
/// produced one, e.g. a transport failure).
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProbeResult>,
}

/// Per-service section of the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub display_name: String,
    pub health: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<ProbeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stress: Option<ProbeOutcome>,
}

/// Finalized, immutable aggregate result of one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct TestVerdict {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub per_service: BTreeMap<String, ServiceReport>,
    pub per_pair: BTreeMap<String, PairOutcome>,
    /// Passed checks over counted checks, 0–100.
    pub success_rate: f64,
    /// True when the run terminated through the aborting path.
    pub aborted: bool,
    pub overall_passed: bool,
}

/// Incremental verdict accumulator. Consumed by [`finalize`](Self::finalize),
/// after which the verdict can no longer change.
#[derive(Debug)]
pub struct VerdictBuilder {
    started_at: DateTime<Utc>,
    total_checks: usize,
    passed_checks: usize,
    failed_checks: usize,
    per_service: BTreeMap<String, ServiceReport>,
    per_pair: BTreeMap<String, PairOutcome>,
}

impl VerdictBuilder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_checks: 0,
            passed_checks: 0,
            failed_checks: 0,
            per_service: BTreeMap::new(),
            per_pair: BTreeMap::new(),
        }
    }

    fn count(&mut self, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::Passed => {
                self.total_checks += 1;
                self.passed_checks += 1;
            }
            CheckOutcome::Failed(_) => {
                self.total_checks += 1;
                self.failed_checks += 1;
            }
            CheckOutcome::Skipped => {}
        }
    }

    /// Record a service's health gate outcome, creating its report entry.
    pub fn record_health(&mut self, id: &str, display_name: &str, outcome: CheckOutcome) {
        self.count(&outcome);
        self.per_service.insert(
            id.to_string(),
            ServiceReport {
                display_name: display_name.to_string(),
                health: outcome,
                performance: None,
                stress: None,
            },
        );
    }

    /// Mark a service that was never attempted. No effect on an existing entry.
    pub fn record_service_skipped(&mut self, id: &str, display_name: &str) {
        self.per_service
            .entry(id.to_string())
            .or_insert_with(|| ServiceReport {
                display_name: display_name.to_string(),
                health: CheckOutcome::Skipped,
                performance: None,
                stress: None,
            });
    }

    pub fn record_performance(
        &mut self,
        id: &str,
        outcome: CheckOutcome,
        result: Option<ProbeResult>,
    ) {
        self.count(&outcome);
        if let Some(report) = self.per_service.get_mut(id) {
            report.performance = Some(ProbeOutcome { outcome, result });
        }
    }

    pub fn record_stress(&mut self, id: &str, outcome: CheckOutcome, result: Option<ProbeResult>) {
        self.count(&outcome);
        if let Some(report) = self.per_service.get_mut(id) {
            report.stress = Some(ProbeOutcome { outcome, result });
        }
    }

    pub fn record_pair(&mut self, pair_id: String, outcome: PairOutcome) {
        match outcome {
            PairOutcome::Passed => {
                self.total_checks += 1;
                self.passed_checks += 1;
            }
            PairOutcome::Failed => {
                self.total_checks += 1;
                self.failed_checks += 1;
            }
            PairOutcome::Skipped => {}
        }
        self.per_pair.insert(pair_id, outcome);
    }

    /// Mark a pair that was never attempted. No effect on an existing entry.
    pub fn record_pair_skipped(&mut self, pair_id: String) {
        self.per_pair.entry(pair_id).or_insert(PairOutcome::Skipped);
    }

    /// Consume the builder and produce the immutable verdict. An aborted run
    /// never passes overall, whatever its success rate.
    pub fn finalize(self, aborted: bool) -> TestVerdict {
        let success_rate = if self.total_checks > 0 {
            self.passed_checks as f64 / self.total_checks as f64 * 100.0
        } else {
            0.0
        };
        TestVerdict {
            started_at: self.started_at,
            finished_at: Utc::now(),
            total_checks: self.total_checks,
            passed_checks: self.passed_checks,
            failed_checks: self.failed_checks,
            per_service: self.per_service,
            per_pair: self.per_pair,
            success_rate,
            aborted,
            overall_passed: !aborted && success_rate >= OVERALL_PASS_THRESHOLD,
        }
    }
}

impl Default for VerdictBuilder {
    fn default() -> Self {
        Self::new()
    }
}
