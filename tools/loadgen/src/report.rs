use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LoadGenConfig;
use crate::stats::StatsSnapshot;
use crate::worker::WorkerSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub target: String,
    pub duration_ms: u128,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub health_interval_ms: u64,
    pub health_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub weights: BTreeMap<String, u32>,
    pub seed: Option<u64>,
    pub max_error_rate: f64,
}

impl From<&LoadGenConfig> for RunConfigSnapshot {
    fn from(config: &LoadGenConfig) -> Self {
        Self {
            target: config.target.clone(),
            duration_ms: config.duration.as_millis(),
            concurrency: config.concurrency,
            timeout_ms: config.timeout_ms,
            health_interval_ms: config.health_interval_ms,
            health_retries: config.health_retries,
            min_delay_ms: config.min_delay_ms,
            max_delay_ms: config.max_delay_ms,
            weights: config
                .mix
                .weights()
                .map(|(op, weight)| (op.name().to_string(), weight))
                .collect(),
            seed: config.seed,
            max_error_rate: config.max_error_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    pub throughput_per_sec: f64,
    pub latency_p50_ms: Option<u128>,
    pub latency_p95_ms: Option<u128>,
    pub latency_p99_ms: Option<u128>,
    pub success_rate: f64,
    pub error_rate: f64,
}

impl RuntimeStats {
    pub fn compute(workers: &[WorkerSummary], elapsed: Duration, totals: &StatsSnapshot) -> Self {
        let duration_secs = elapsed.as_secs_f64().max(1e-9);
        let mut latencies = workers
            .iter()
            .flat_map(|worker| worker.latencies_ms.iter().copied())
            .collect::<Vec<_>>();
        latencies.sort_unstable();

        Self {
            duration_ms: elapsed.as_millis(),
            throughput_per_sec: totals.total_requests as f64 / duration_secs,
            latency_p50_ms: percentile(&latencies, 0.50),
            latency_p95_ms: percentile(&latencies, 0.95),
            latency_p99_ms: percentile(&latencies, 0.99),
            success_rate: totals.success_rate(),
            error_rate: totals.error_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadGenReport {
    pub config: RunConfigSnapshot,
    pub passed: bool,
    pub interrupted: bool,
    pub totals: StatsSnapshot,
    pub stats: RuntimeStats,
    pub workers: Vec<WorkerSummary>,
}

impl LoadGenReport {
    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("Item API load test report\n");
        output.push_str(&format!(
            "status: {}{}\n",
            if self.passed { "PASS" } else { "FAIL" },
            if self.interrupted { " (interrupted)" } else { "" }
        ));
        output.push_str(&format!(
            "target: {} workers={} planned={}ms\n",
            self.config.target, self.config.concurrency, self.config.duration_ms
        ));
        output.push_str(&format!(
            "requests: total={} success={} failed={}\n",
            self.totals.total_requests, self.totals.success_requests, self.totals.failed_requests
        ));
        output.push_str(&format!(
            "by kind: create={} read={} update={} delete={} health={}\n",
            self.totals.create_count,
            self.totals.read_count,
            self.totals.update_count,
            self.totals.delete_count,
            self.totals.health_count
        ));
        output.push_str(&format!("active items: {}\n", self.totals.known_ids));
        output.push_str(&format!(
            "rates: success {:.2}% error {:.2}% (max {:.2}%)\n",
            self.stats.success_rate * 100.0,
            self.stats.error_rate * 100.0,
            self.config.max_error_rate * 100.0
        ));
        output.push_str(&format!(
            "timing: duration={}ms throughput={:.2}/s p50={:?}ms p95={:?}ms p99={:?}ms\n",
            self.stats.duration_ms,
            self.stats.throughput_per_sec,
            self.stats.latency_p50_ms,
            self.stats.latency_p95_ms,
            self.stats.latency_p99_ms
        ));

        for worker in &self.workers {
            output.push_str(&format!(
                "worker {}: ops={} failures={} known_ids={}\n",
                worker.worker_id, worker.operations, worker.failures, worker.known_ids
            ));
        }
        output
    }
}

pub(crate) fn percentile(values: &[u128], p: f64) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[7], 0.99), Some(7));
        let values = (1..=100).collect::<Vec<u128>>();
        assert_eq!(percentile(&values, 0.50), Some(51));
        assert_eq!(percentile(&values, 0.95), Some(95));
        assert_eq!(percentile(&values, 0.99), Some(99));
    }

    #[test]
    fn stats_merge_worker_latencies() {
        let workers = vec![
            WorkerSummary {
                worker_id: 0,
                operations: 2,
                failures: 0,
                known_ids: 1,
                latencies_ms: vec![30, 10],
            },
            WorkerSummary {
                worker_id: 1,
                operations: 1,
                failures: 1,
                known_ids: 0,
                latencies_ms: vec![20],
            },
        ];
        let totals = StatsSnapshot {
            total_requests: 3,
            success_requests: 2,
            failed_requests: 1,
            create_count: 3,
            ..StatsSnapshot::default()
        };
        let stats = RuntimeStats::compute(&workers, Duration::from_secs(1), &totals);
        assert_eq!(stats.latency_p50_ms, Some(20));
        assert_eq!(stats.latency_p99_ms, Some(30));
        assert_eq!(stats.throughput_per_sec, 3.0);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
    }
}
