use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Counter bucket an operation lands in. `list` and `get` both count as reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Create,
    Read,
    Update,
    Delete,
    Health,
}

/// Run-wide counters shared by every worker.
///
/// Only ever incremented, never reset. `total` is bumped last so a
/// concurrent [`snapshot`](Self::snapshot) can lag but never report more
/// finished requests than were classified.
#[derive(Debug, Default)]
pub struct RunStatistics {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    create: AtomicU64,
    read: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    health: AtomicU64,
    /// ids currently cached across all workers
    known_ids: AtomicU64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: Operation, success: bool) {
        self.kind(op.stat_kind()).fetch_add(1, Ordering::Relaxed);
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Release);
    }

    /// Fold one worker's cache size change into the run-wide id count.
    pub fn track_known_ids(&self, before: usize, after: usize) {
        if after > before {
            self.known_ids
                .fetch_add((after - before) as u64, Ordering::Relaxed);
        } else if before > after {
            self.known_ids
                .fetch_sub((before - after) as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_requests = self.total.load(Ordering::Acquire);
        StatsSnapshot {
            total_requests,
            success_requests: self.success.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            create_count: self.create.load(Ordering::Relaxed),
            read_count: self.read.load(Ordering::Relaxed),
            update_count: self.update.load(Ordering::Relaxed),
            delete_count: self.delete.load(Ordering::Relaxed),
            health_count: self.health.load(Ordering::Relaxed),
            known_ids: self.known_ids.load(Ordering::Relaxed),
        }
    }

    fn kind(&self, kind: StatKind) -> &AtomicU64 {
        match kind {
            StatKind::Create => &self.create,
            StatKind::Read => &self.read,
            StatKind::Update => &self.update,
            StatKind::Delete => &self.delete,
            StatKind::Health => &self.health,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub create_count: u64,
    pub read_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub health_count: u64,
    #[serde(default)]
    pub known_ids: u64,
}

impl StatsSnapshot {
    pub fn kinds_total(&self) -> u64 {
        self.create_count + self.read_count + self.update_count + self.delete_count + self.health_count
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.success_requests, self.total_requests)
    }

    pub fn error_rate(&self) -> f64 {
        ratio(self.failed_requests, self.total_requests)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
