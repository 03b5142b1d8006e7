//! Bounded sliding window of recent storage operations.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default number of records kept in the window
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Get,
    Set,
    Remove,
    Clear,
    Sync,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::Set => "set",
            OperationKind::Remove => "remove",
            OperationKind::Clear => "clear",
            OperationKind::Sync => "sync",
        }
    }
}

/// One completed facade operation
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub duration: Duration,
    /// For reads: whether the key was found
    pub hit: Option<bool>,
    pub success: bool,
    pub at: Instant,
}

impl OperationRecord {
    pub fn new(kind: OperationKind, duration: Duration, success: bool) -> Self {
        Self {
            kind,
            duration,
            hit: None,
            success,
            at: Instant::now(),
        }
    }

    pub fn read(duration: Duration, hit: bool) -> Self {
        Self {
            hit: Some(hit),
            ..Self::new(OperationKind::Get, duration, true)
        }
    }
}

/// Aggregates over the current window contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowStats {
    pub operations: usize,
    pub errors: usize,
    pub hits: usize,
    pub misses: usize,
    pub operations_per_sec: f64,
    pub average_access_time: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl WindowStats {
    /// Reads that found their key, as a fraction of all reads
    pub fn hit_rate(&self) -> Option<f64> {
        let lookups = self.hits + self.misses;
        (lookups > 0).then(|| self.hits as f64 / lookups as f64)
    }
}

/// FIFO window; pushing past capacity drops the oldest record
#[derive(Debug)]
pub struct OperationWindow {
    records: VecDeque<OperationRecord>,
    capacity: usize,
}

impl OperationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_WINDOW_SIZE)),
            capacity,
        }
    }

    pub fn push(&mut self, record: OperationRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> WindowStats {
        self.stats_at(Instant::now())
    }

    /// Aggregate as seen at `now`; throughput is measured from the oldest record
    pub fn stats_at(&self, now: Instant) -> WindowStats {
        if self.records.is_empty() {
            return WindowStats::default();
        }

        let mut durations: Vec<Duration> = self.records.iter().map(|r| r.duration).collect();
        durations.sort_unstable();

        let total: Duration = durations.iter().sum();
        let operations = durations.len();

        let span = self
            .records
            .front()
            .map(|oldest| now.saturating_duration_since(oldest.at))
            .unwrap_or_default();
        let operations_per_sec = if span.as_secs_f64() > 0.0 {
            operations as f64 / span.as_secs_f64()
        } else {
            operations as f64
        };

        WindowStats {
            operations,
            errors: self.records.iter().filter(|r| !r.success).count(),
            hits: self.records.iter().filter(|r| r.hit == Some(true)).count(),
            misses: self.records.iter().filter(|r| r.hit == Some(false)).count(),
            operations_per_sec,
            average_access_time: total / operations as u32,
            p50: percentile(&durations, 50.0),
            p95: percentile(&durations, 95.0),
            p99: percentile(&durations, 99.0),
        }
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
