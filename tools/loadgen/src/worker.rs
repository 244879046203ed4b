use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, RequestError};
use crate::operation::{Operation, OperationMix};
use crate::stats::RunStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub operations: u64,
    pub failures: u64,
    pub known_ids: usize,
    #[serde(skip)]
    pub latencies_ms: Vec<u128>,
}

/// Everything a worker shares with its siblings
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub client: ApiClient,
    pub stats: Arc<RunStatistics>,
    pub mix: OperationMix,
    pub end: Instant,
    pub delay_ms: RangeInclusive<u64>,
    pub seed: Option<u64>,
    pub token: CancellationToken,
}

pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    state: WorkerState,
    rng: StdRng,
    known_ids: Vec<String>,
    operations: u64,
    failures: u64,
    latencies_ms: Vec<u128>,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        let rng = match ctx.seed {
            // distinct but reproducible stream per worker
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        Self {
            id,
            ctx,
            state: WorkerState::Running,
            rng,
            known_ids: Vec::new(),
            operations: 0,
            failures: 0,
            latencies_ms: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub async fn run(mut self) -> WorkerSummary {
        info!(worker = self.id, "worker started");
        while self.state == WorkerState::Running {
            if self.should_stop() {
                self.state = WorkerState::Finished;
                break;
            }
            let op = self
                .ctx
                .mix
                .choose(&mut self.rng, !self.known_ids.is_empty());
            self.execute(op).await;
            self.pause().await;
        }
        info!(
            worker = self.id,
            operations = self.operations,
            failures = self.failures,
            interrupted = self.ctx.token.is_cancelled(),
            "worker finished"
        );
        WorkerSummary {
            worker_id: self.id,
            operations: self.operations,
            failures: self.failures,
            known_ids: self.known_ids.len(),
            latencies_ms: self.latencies_ms,
        }
    }

    fn should_stop(&self) -> bool {
        self.ctx.token.is_cancelled() || Instant::now() >= self.ctx.end
    }

    /// Random think time, cut short by the end of the run or an interrupt.
    async fn pause(&mut self) {
        let pause = Duration::from_millis(self.rng.gen_range(self.ctx.delay_ms.clone()));
        let wake = (Instant::now() + pause).min(self.ctx.end);
        tokio::select! {
            _ = self.ctx.token.cancelled() => {}
            _ = tokio::time::sleep_until(wake) => {}
        }
    }

    async fn execute(&mut self, mut op: Operation) {
        let started = Instant::now();
        let known_before = self.known_ids.len();
        let result = match op {
            Operation::Health => self.ctx.client.health().await.map(|_| ()),
            Operation::Create => self.create().await,
            Operation::List => self.list().await,
            Operation::Get | Operation::Update | Operation::Delete => {
                let target = self.known_ids.choose(&mut self.rng).cloned();
                match target {
                    Some(id) => self.targeted(op, id).await,
                    // nothing to aim at, counted as the create it becomes
                    None => {
                        op = Operation::Create;
                        self.create().await
                    }
                }
            }
        };
        self.latencies_ms.push(started.elapsed().as_millis());
        self.operations += 1;
        self.ctx.stats.record(op, result.is_ok());
        self.ctx
            .stats
            .track_known_ids(known_before, self.known_ids.len());

        match result {
            Ok(()) => debug!(worker = self.id, %op, "operation ok"),
            Err(err) => {
                self.failures += 1;
                if err.is_not_found() {
                    debug!(worker = self.id, %op, "item already gone");
                } else {
                    warn!(worker = self.id, %op, %err, "operation failed");
                }
            }
        }
    }

    async fn create(&mut self) -> Result<(), RequestError> {
        let name = format!("Load Test Item {}", self.rng.gen_range(0..10_000));
        let description = format!(
            "Generated by load test worker {} (op {})",
            self.id, self.operations
        );
        let item = self.ctx.client.create(&name, &description).await?;
        self.known_ids.push(item.id);
        Ok(())
    }

    async fn list(&mut self) -> Result<(), RequestError> {
        let list = self.ctx.client.list().await?;
        self.known_ids = list.items.into_iter().map(|item| item.id).collect();
        Ok(())
    }

    async fn targeted(&mut self, op: Operation, id: String) -> Result<(), RequestError> {
        let result = match op {
            Operation::Get => self.ctx.client.get(&id).await.map(|_| ()),
            Operation::Update => {
                let name = format!("Updated Item {}", self.rng.gen_range(0..10_000));
                self.ctx
                    .client
                    .update(&id, &name, "Updated by load test")
                    .await
                    .map(|_| ())
            }
            _ => self.ctx.client.delete(&id).await,
        };
        match &result {
            Ok(()) if op == Operation::Delete => self.forget(&id),
            Err(err) if err.is_not_found() => self.forget(&id),
            _ => {}
        }
        result
    }

    fn forget(&mut self, id: &str) {
        self.known_ids.retain(|known| known != id);
    }
}
