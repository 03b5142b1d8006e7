//! Periodic performance sampling with threshold warnings
//!
//! The collector is fed one [`OperationRecord`] per facade call and turns the
//! window into [`PerformanceMetrics`] snapshots. Each snapshot is checked
//! against the configured [`MetricsThresholds`]; breaches are logged at warn
//! level and returned to the caller, never raised as errors.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

use super::window::{OperationRecord, OperationWindow};
use crate::config::{MetricsConfig, MetricsThresholds};

/// Growth between first and last sample above which a leak is suspected
pub const LEAK_GROWTH_THRESHOLD: f64 = 0.20;

/// Point-in-time view of the facade's health
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    /// Resident memory of this process in bytes
    pub heap_used: u64,
    pub item_count: usize,
    pub operations: usize,
    pub operations_per_sec: f64,
    pub average_access_time: Duration,
    pub hit_rate: Option<f64>,
    pub miss_rate: Option<f64>,
    pub error_count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdBreach {
    HeapUsage { used: u64, limit: u64 },
    ItemCount { count: usize, limit: usize },
    HitRate { rate: f64, minimum: f64 },
    AccessTime { average: Duration, limit: Duration },
}

/// Memory movement across the most recent samples
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTrend {
    pub samples: usize,
    pub first: u64,
    pub last: u64,
    /// (last - first) / first
    pub growth: f64,
    pub leak_suspected: bool,
}

impl MemoryTrend {
    pub fn is_increasing(&self) -> bool {
        self.last > self.first
    }
}

pub struct MetricsCollector {
    window: Mutex<OperationWindow>,
    history: Mutex<VecDeque<PerformanceMetrics>>,
    history_size: usize,
    thresholds: MetricsThresholds,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("window", &self.window.lock().len())
            .field("history", &self.history.lock().len())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(&MetricsConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            window: Mutex::new(OperationWindow::new(config.window_size)),
            history: Mutex::new(VecDeque::with_capacity(config.history_size.min(1024))),
            history_size: config.history_size.max(1),
            thresholds: config.thresholds.clone(),
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn thresholds(&self) -> &MetricsThresholds {
        &self.thresholds
    }

    /// Add one completed operation to the sliding window
    pub fn record(&self, record: OperationRecord) {
        self.window.lock().push(record);
    }

    /// Resident memory of the current process, 0 when it cannot be read
    pub fn heap_used(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Take a sample using the live process memory
    pub fn sample(&self, item_count: usize) -> PerformanceMetrics {
        let heap_used = self.heap_used();
        self.observe(heap_used, item_count)
    }

    /// Build a snapshot from the given readings, store it and check thresholds
    pub fn observe(&self, heap_used: u64, item_count: usize) -> PerformanceMetrics {
        let stats = self.window.lock().stats();
        let hit_rate = stats.hit_rate();

        let snapshot = PerformanceMetrics {
            heap_used,
            item_count,
            operations: stats.operations,
            operations_per_sec: stats.operations_per_sec,
            average_access_time: stats.average_access_time,
            hit_rate,
            miss_rate: hit_rate.map(|rate| 1.0 - rate),
            error_count: stats.errors,
            p50: stats.p50,
            p95: stats.p95,
            p99: stats.p99,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        {
            let mut history = self.history.lock();
            while history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
        }

        for breach in self.check_thresholds(&snapshot) {
            tracing::warn!(?breach, "storage metrics threshold exceeded");
        }

        snapshot
    }

    /// Thresholds the snapshot violates; an empty list means healthy
    pub fn check_thresholds(&self, snapshot: &PerformanceMetrics) -> Vec<ThresholdBreach> {
        let limits = &self.thresholds;
        let mut breaches = Vec::new();

        if snapshot.heap_used > limits.max_heap_usage {
            breaches.push(ThresholdBreach::HeapUsage {
                used: snapshot.heap_used,
                limit: limits.max_heap_usage,
            });
        }
        if snapshot.item_count > limits.max_item_count {
            breaches.push(ThresholdBreach::ItemCount {
                count: snapshot.item_count,
                limit: limits.max_item_count,
            });
        }
        if let Some(rate) = snapshot.hit_rate {
            if rate < limits.min_hit_rate {
                breaches.push(ThresholdBreach::HitRate {
                    rate,
                    minimum: limits.min_hit_rate,
                });
            }
        }
        if snapshot.operations > 0 && snapshot.average_access_time > limits.max_access_time {
            breaches.push(ThresholdBreach::AccessTime {
                average: snapshot.average_access_time,
                limit: limits.max_access_time,
            });
        }
        breaches
    }

    /// Most recent snapshot, if any sample was taken
    pub fn latest(&self) -> Option<PerformanceMetrics> {
        self.history.lock().back().cloned()
    }

    /// All retained snapshots, oldest first
    pub fn history(&self) -> Vec<PerformanceMetrics> {
        self.history.lock().iter().cloned().collect()
    }

    /// Compare memory between the first and last of the last `samples` snapshots
    ///
    /// Returns `None` with fewer than two snapshots. Growth above 20% marks a
    /// suspected leak and logs a warning.
    pub fn memory_trend(&self, samples: usize) -> Option<MemoryTrend> {
        let history = self.history.lock();
        let take = samples.min(history.len());
        if take < 2 {
            return None;
        }

        let first = history[history.len() - take].heap_used;
        let last = history[history.len() - 1].heap_used;
        let growth = (last as f64 - first as f64) / first.max(1) as f64;

        let trend = MemoryTrend {
            samples: take,
            first,
            last,
            growth,
            leak_suspected: growth > LEAK_GROWTH_THRESHOLD,
        };
        if trend.leak_suspected {
            tracing::warn!(
                first,
                last,
                growth_pct = growth * 100.0,
                samples = take,
                "possible memory leak: heap grew across recent samples"
            );
        }
        Some(trend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OperationKind;

    fn collector_with(thresholds: MetricsThresholds) -> MetricsCollector {
        MetricsCollector::new(&MetricsConfig {
            history_size: 5,
            thresholds,
            ..MetricsConfig::default()
        })
    }

    #[test]
    fn test_heap_breach_reported_not_raised() {
        let collector = collector_with(MetricsThresholds {
            max_heap_usage: 1024,
            ..MetricsThresholds::default()
        });

        let snapshot = collector.observe(4096, 0);
        let breaches = collector.check_thresholds(&snapshot);
        assert_eq!(
            breaches,
            vec![ThresholdBreach::HeapUsage {
                used: 4096,
                limit: 1024
            }]
        );
    }

    #[test]
    fn test_hit_rate_breach() {
        let collector = collector_with(MetricsThresholds {
            min_hit_rate: 0.9,
            ..MetricsThresholds::default()
        });
        collector.record(OperationRecord::read(Duration::from_micros(1), true));
        collector.record(OperationRecord::read(Duration::from_micros(1), false));

        let snapshot = collector.observe(0, 2);
        assert_eq!(snapshot.hit_rate, Some(0.5));
        assert_eq!(snapshot.miss_rate, Some(0.5));
        assert!(matches!(
            collector.check_thresholds(&snapshot).as_slice(),
            [ThresholdBreach::HitRate { .. }]
        ));
    }

    #[test]
    fn test_access_time_breach() {
        let collector = collector_with(MetricsThresholds {
            max_access_time: Duration::from_millis(1),
            ..MetricsThresholds::default()
        });
        collector.record(OperationRecord::new(OperationKind::Set, Duration::from_millis(5), true));

        let snapshot = collector.observe(0, 1);
        assert!(collector
            .check_thresholds(&snapshot)
            .iter()
            .any(|b| matches!(b, ThresholdBreach::AccessTime { .. })));
    }

    #[test]
    fn test_history_is_capped() {
        let collector = collector_with(MetricsThresholds::default());
        for heap in 1..=8u64 {
            collector.observe(heap, 0);
        }

        let history = collector.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].heap_used, 4);
        assert_eq!(collector.latest().unwrap().heap_used, 8);
    }

    #[test]
    fn test_leak_detection() {
        let collector = collector_with(MetricsThresholds {
            max_heap_usage: u64::MAX,
            ..MetricsThresholds::default()
        });
        for heap in [100, 110, 120, 130] {
            collector.observe(heap, 0);
        }

        let trend = collector.memory_trend(4).unwrap();
        assert_eq!(trend.first, 100);
        assert_eq!(trend.last, 130);
        assert!(trend.is_increasing());
        assert!(trend.leak_suspected);

        // Only the last two: 120 -> 130 is under 20%
        assert!(!collector.memory_trend(2).unwrap().leak_suspected);
    }

    #[test]
    fn test_trend_needs_two_samples() {
        let collector = MetricsCollector::default();
        assert!(collector.memory_trend(10).is_none());
        collector.observe(1, 0);
        assert!(collector.memory_trend(10).is_none());
    }
}
