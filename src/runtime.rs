//! Background task owner
//!
//! [`StashRuntime`] is the composition root: it builds the metrics collector
//! and the storage facade from one [`StashConfig`] and spawns every periodic
//! task (metrics sampling, sync flush, memory check) plus the one-off startup
//! benchmark. It holds all of their handles; [`StashRuntime::shutdown`] stops
//! them and dropping the runtime aborts whatever is left.
//!
//! Starting a runtime spawns Tokio tasks, so it must happen inside a Tokio
//! runtime context.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::BackendKind;
use crate::benchmark::Benchmark;
use crate::config::{MemoryConfig, StashConfig};
use crate::error::StorageError;
use crate::manager::StorageManager;
use crate::metrics::MetricsCollector;

/// How long `shutdown` waits for a task before aborting it
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Process memory relative to the configured budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal,
    /// At or above `warning_threshold`
    Warning,
    /// At or above `cleanup_threshold`
    Critical,
}

impl MemoryPressure {
    pub fn classify(heap_used: u64, config: &MemoryConfig) -> Self {
        if config.max_usage == 0 {
            return MemoryPressure::Normal;
        }
        let usage = heap_used as f64 / config.max_usage as f64;
        if usage >= config.cleanup_threshold {
            MemoryPressure::Critical
        } else if usage >= config.warning_threshold {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        }
    }
}

/// Classify `heap_used`, warn on pressure and purge expired items when
/// cleanup is enabled and pressure is critical
pub async fn check_memory(
    manager: &StorageManager,
    config: &MemoryConfig,
    heap_used: u64,
) -> Result<MemoryPressure, StorageError> {
    let pressure = MemoryPressure::classify(heap_used, config);
    if pressure >= MemoryPressure::Warning {
        tracing::warn!(
            heap_used,
            max_usage = config.max_usage,
            ?pressure,
            "memory usage above warning threshold"
        );
    }
    if pressure == MemoryPressure::Critical && config.auto_cleanup {
        manager.purge_expired().await?;
    }
    Ok(pressure)
}

pub struct StashRuntime {
    manager: Arc<StorageManager>,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl std::fmt::Debug for StashRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashRuntime")
            .field("manager", &self.manager)
            .field("tasks", &self.task_names())
            .finish()
    }
}

impl StashRuntime {
    /// Build the collector and facade from `config`, then start the tasks
    pub fn open(config: StashConfig) -> Result<Self, StorageError> {
        let metrics = Arc::new(MetricsCollector::new(&config.metrics));
        let manager = Arc::new(StorageManager::from_config(config, Arc::clone(&metrics))?);
        Ok(Self::start(manager, metrics))
    }

    /// Start the background tasks the manager's configuration asks for
    pub fn start(manager: Arc<StorageManager>, metrics: Arc<MetricsCollector>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut runtime = Self {
            manager,
            metrics,
            shutdown,
            tasks: Vec::new(),
        };
        let config = runtime.manager.config().clone();

        {
            let manager = Arc::clone(&runtime.manager);
            let metrics = Arc::clone(&runtime.metrics);
            let trend_samples = config.metrics.trend_samples;
            runtime.spawn_periodic("metrics", config.metrics.interval, move || {
                let manager = Arc::clone(&manager);
                let metrics = Arc::clone(&metrics);
                async move {
                    let items = match manager.len().await {
                        Ok(items) => items,
                        Err(e) => {
                            tracing::warn!(error = %e, "could not count items for metrics sample");
                            0
                        }
                    };
                    metrics.sample(items);
                    metrics.memory_trend(trend_samples);
                }
            });
        }

        if config.sync.enabled {
            let interval = match runtime.manager.sync_target_kind() {
                Some(BackendKind::Cloud) => config.cloud.sync_interval,
                _ => config.sync.interval,
            };
            let manager = Arc::clone(&runtime.manager);
            runtime.spawn_periodic("sync", interval, move || {
                let manager = Arc::clone(&manager);
                async move {
                    // Transiently failed changes stay queued for the next tick
                    let _ = manager.sync().await;
                }
            });
        }

        {
            let manager = Arc::clone(&runtime.manager);
            let metrics = Arc::clone(&runtime.metrics);
            let memory = config.memory.clone();
            runtime.spawn_periodic("memory", memory.check_interval, move || {
                let manager = Arc::clone(&manager);
                let metrics = Arc::clone(&metrics);
                let memory = memory.clone();
                async move {
                    let heap_used = metrics.heap_used();
                    if let Err(e) = check_memory(&manager, &memory, heap_used).await {
                        tracing::warn!(error = %e, "memory cleanup failed");
                    }
                }
            });
        }

        if config.benchmark.run_at_startup {
            let benchmark = Benchmark::new(Arc::clone(&runtime.manager));
            runtime.spawn_once("startup-benchmark", async move {
                benchmark.baseline().await;
            });
        }

        tracing::info!(
            backend = %runtime.manager.backend_kind(),
            tasks = ?runtime.task_names(),
            "storage runtime started"
        );
        runtime
    }

    pub fn manager(&self) -> &Arc<StorageManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Names of the tasks still running
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Signal every task to stop, wait briefly, then abort stragglers
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for (name, mut handle) in std::mem::take(&mut self.tasks) {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => tracing::debug!(task = name, "background task stopped"),
                Err(_) => {
                    handle.abort();
                    tracing::warn!(task = name, "background task aborted after grace period");
                }
            }
        }
        tracing::info!("storage runtime stopped");
    }

    fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            tracing::debug!(task = name, "zero interval; task not started");
            return;
        }
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }
                // Work in flight is dropped on shutdown; sync keeps unreplayed
                // changes queued when cancelled
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tick() => {}
                }
            }
        });
        self.tasks.push((name, handle));
    }

    fn spawn_once<Fut>(&mut self, name: &'static str, work: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = stop.changed() => {}
                _ = work => {}
            }
        });
        self.tasks.push((name, handle));
    }
}

impl Drop for StashRuntime {
    fn drop(&mut self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}
