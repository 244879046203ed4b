use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::config::{DEFAULT_DURATION, LoadGenConfig};
use crate::report::{LoadGenReport, RunConfigSnapshot, RuntimeStats};
use crate::stats::RunStatistics;
use crate::worker::{Worker, WorkerContext};

/// The run never got past the health gate, no load was generated.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("{target} not healthy after {attempts} attempts, last error: {last_error}")]
    Unhealthy {
        target: String,
        attempts: usize,
        last_error: String,
    },
    #[error("interrupted while waiting for {target} to become healthy")]
    Interrupted { target: String },
}

pub async fn run(
    config: LoadGenConfig,
    token: CancellationToken,
) -> Result<LoadGenReport, StartupError> {
    let client = ApiClient::new(&config.target, config.timeout())?;
    wait_for_target(
        &client,
        config.health_interval(),
        config.health_retries,
        &token,
    )
    .await?;

    let started = Instant::now();
    // one deadline for every worker
    let end = run_deadline(started, config.duration);
    let stats = Arc::new(RunStatistics::new());
    info!(
        target_url = %config.target,
        concurrency = config.concurrency,
        duration = ?config.duration,
        "starting load generation"
    );

    let reporter_token = CancellationToken::new();
    let reporter = tokio::spawn(report_periodically(
        stats.clone(),
        config.report_interval,
        reporter_token.clone(),
    ));

    let mut tasks = JoinSet::new();
    for id in 0..config.concurrency {
        let ctx = WorkerContext {
            client: client.clone(),
            stats: stats.clone(),
            mix: config.mix.clone(),
            end,
            delay_ms: config.min_delay_ms..=config.max_delay_ms,
            seed: config.seed,
            token: token.clone(),
        };
        tasks.spawn(Worker::new(id, ctx).run());
    }

    let mut workers = Vec::with_capacity(config.concurrency);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(summary) => workers.push(summary),
            Err(err) => error!(?err, "worker task failed"),
        }
    }
    workers.sort_by_key(|worker| worker.worker_id);

    reporter_token.cancel();
    if let Err(err) = reporter.await {
        error!(?err, "reporter task failed");
    }

    let totals = stats.snapshot();
    let stats = RuntimeStats::compute(&workers, started.elapsed(), &totals);
    let interrupted = token.is_cancelled();
    let passed = stats.error_rate <= config.max_error_rate;
    info!(
        total = totals.total_requests,
        success = totals.success_requests,
        failed = totals.failed_requests,
        interrupted,
        "load generation finished"
    );

    Ok(LoadGenReport {
        config: RunConfigSnapshot::from(&config),
        passed,
        interrupted,
        totals,
        stats,
        workers,
    })
}

/// `started + duration`, or the default run length when that is not a
/// representable instant.
pub(crate) fn run_deadline(started: Instant, duration: Duration) -> Instant {
    started.checked_add(duration).unwrap_or_else(|| {
        warn!(?duration, fallback = ?DEFAULT_DURATION, "run duration out of range, using default");
        started + DEFAULT_DURATION
    })
}

/// Poll `/health` until it answers 200, at most `retries` times.
pub async fn wait_for_target(
    client: &ApiClient,
    interval: Duration,
    retries: usize,
    token: &CancellationToken,
) -> Result<(), StartupError> {
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=retries {
        match client.health().await {
            Ok(health) => {
                info!(
                    attempt,
                    status = %health.status,
                    item_count = health.item_count,
                    "target is healthy"
                );
                return Ok(());
            }
            Err(err) => {
                debug!(attempt, retries, %err, "target not ready");
                last_error = err.to_string();
            }
        }
        if attempt == retries {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => {
                return Err(StartupError::Interrupted {
                    target: client.base().to_string(),
                });
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Err(StartupError::Unhealthy {
        target: client.base().to_string(),
        attempts: retries,
        last_error,
    })
}

async fn report_periodically(
    stats: Arc<RunStatistics>,
    every: Duration,
    token: CancellationToken,
) {
    let now = Instant::now();
    let mut ticker = tokio::time::interval_at(now.checked_add(every).unwrap_or(now), every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let snap = stats.snapshot();
                info!(
                    total = snap.total_requests,
                    success = snap.success_requests,
                    failed = snap.failed_requests,
                    create = snap.create_count,
                    read = snap.read_count,
                    update = snap.update_count,
                    delete = snap.delete_count,
                    health = snap.health_count,
                    active_items = snap.known_ids,
                    success_rate = snap.success_rate(),
                    "load test progress"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_survives_huge_durations() {
        let started = Instant::now();
        assert_eq!(
            run_deadline(started, Duration::from_secs(90)),
            started + Duration::from_secs(90)
        );
        assert_eq!(
            run_deadline(started, Duration::from_secs(u64::MAX)),
            started + DEFAULT_DURATION
        );
    }
}
