//! Benchmark harness
//!
//! Times the facade's write and read paths and the raw compression and
//! encryption transforms. Each iteration issues `concurrency` operations at
//! once and is timed as a unit. Scratch keys live under [`BENCH_PREFIX`],
//! never enter the change queue and are removed when the suite finishes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;

use crate::compression;
use crate::config::BenchmarkConfig;
use crate::encryption::PayloadCipher;
use crate::error::StorageError;
use crate::manager::{ItemOptions, StorageManager};

/// Prefix of every key the harness writes
pub const BENCH_PREFIX: &str = "__bench__/";

/// Iterations per suite in the startup battery
pub const BASELINE_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkSuite {
    Write,
    Read,
    Compress,
    Encrypt,
}

impl BenchmarkSuite {
    pub const ALL: [BenchmarkSuite; 4] = [
        BenchmarkSuite::Write,
        BenchmarkSuite::Read,
        BenchmarkSuite::Compress,
        BenchmarkSuite::Encrypt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkSuite::Write => "write",
            BenchmarkSuite::Read => "read",
            BenchmarkSuite::Compress => "compress",
            BenchmarkSuite::Encrypt => "encrypt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkOptions {
    pub iterations: usize,
    /// Payload length in bytes
    pub payload_size: usize,
    /// Operations issued together per iteration
    pub concurrency: usize,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self::from(&BenchmarkConfig::default())
    }
}

impl From<&BenchmarkConfig> for BenchmarkOptions {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            iterations: config.iterations,
            payload_size: config.payload_size,
            concurrency: config.concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub suite: BenchmarkSuite,
    pub iterations: usize,
    pub concurrency: usize,
    pub payload_size: usize,
    /// Individual operations performed
    pub operations: usize,
    pub total: Duration,
    /// Mean iteration time
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
    pub ops_per_sec: f64,
}

impl BenchmarkReport {
    fn from_samples(suite: BenchmarkSuite, options: &BenchmarkOptions, samples: &[Duration]) -> Self {
        let total: Duration = samples.iter().sum();
        let operations = samples.len() * options.concurrency;
        let average = if samples.is_empty() {
            Duration::ZERO
        } else {
            total / samples.len() as u32
        };
        let ops_per_sec = if total.is_zero() {
            0.0
        } else {
            operations as f64 / total.as_secs_f64()
        };

        Self {
            suite,
            iterations: samples.len(),
            concurrency: options.concurrency,
            payload_size: options.payload_size,
            operations,
            total,
            average,
            min: samples.iter().min().copied().unwrap_or_default(),
            max: samples.iter().max().copied().unwrap_or_default(),
            ops_per_sec,
        }
    }
}

/// Deterministic printable payload of `size` bytes
fn payload(size: usize) -> String {
    (0..size)
        .map(|i| (b'a' + ((i * 17 + 31) % 26) as u8) as char)
        .collect()
}

fn bench_key(suite: BenchmarkSuite, iteration: usize, slot: usize) -> String {
    format!("{BENCH_PREFIX}{}/{iteration}/{slot}", suite.as_str())
}

#[derive(Debug, Clone)]
pub struct Benchmark {
    manager: Arc<StorageManager>,
}

impl Benchmark {
    pub fn new(manager: Arc<StorageManager>) -> Self {
        Self { manager }
    }

    /// Run one suite
    pub async fn run(
        &self,
        suite: BenchmarkSuite,
        options: &BenchmarkOptions,
    ) -> Result<BenchmarkReport, StorageError> {
        if options.iterations == 0 {
            return Err(StorageError::Validation("benchmark needs at least one iteration".into()));
        }
        let options = BenchmarkOptions {
            concurrency: options.concurrency.max(1),
            ..options.clone()
        };

        let samples = match suite {
            BenchmarkSuite::Write | BenchmarkSuite::Read => {
                let result = self.storage_samples(suite, &options).await;
                self.cleanup(suite, &options).await;
                result?
            }
            BenchmarkSuite::Compress => compress_samples(&options).await?,
            BenchmarkSuite::Encrypt => encrypt_samples(&options).await?,
        };

        let report = BenchmarkReport::from_samples(suite, &options, &samples);
        tracing::debug!(
            suite = suite.as_str(),
            iterations = report.iterations,
            avg_us = report.average.as_micros() as u64,
            "benchmark suite finished"
        );
        Ok(report)
    }

    /// Run every suite in order
    pub async fn run_full(&self, options: &BenchmarkOptions) -> Result<Vec<BenchmarkReport>, StorageError> {
        let mut reports = Vec::with_capacity(BenchmarkSuite::ALL.len());
        for suite in BenchmarkSuite::ALL {
            reports.push(self.run(suite, options).await?);
        }
        Ok(reports)
    }

    /// Startup battery: every suite at [`BASELINE_ITERATIONS`] iterations
    ///
    /// Results are logged; a failing suite is logged and skipped.
    pub async fn baseline(&self) -> Vec<BenchmarkReport> {
        let options = BenchmarkOptions {
            iterations: BASELINE_ITERATIONS,
            ..BenchmarkOptions::from(&self.manager.config().benchmark)
        };

        let mut reports = Vec::new();
        for suite in BenchmarkSuite::ALL {
            match self.run(suite, &options).await {
                Ok(report) => {
                    tracing::info!(
                        suite = suite.as_str(),
                        avg_us = report.average.as_micros() as u64,
                        min_us = report.min.as_micros() as u64,
                        max_us = report.max.as_micros() as u64,
                        ops_per_sec = report.ops_per_sec,
                        "baseline benchmark"
                    );
                    reports.push(report);
                }
                Err(e) => tracing::warn!(suite = suite.as_str(), error = %e, "baseline benchmark failed"),
            }
        }
        reports
    }

    async fn storage_samples(
        &self,
        suite: BenchmarkSuite,
        options: &BenchmarkOptions,
    ) -> Result<Vec<Duration>, StorageError> {
        let value = payload(options.payload_size);
        let write_options = ItemOptions::new().unqueued();
        let read_options = ItemOptions::new();
        let manager = &self.manager;

        if suite == BenchmarkSuite::Read {
            for iteration in 0..options.iterations {
                for slot in 0..options.concurrency {
                    manager
                        .set_item(&bench_key(suite, iteration, slot), &value, &write_options)
                        .await?;
                }
            }
        }

        let mut samples = Vec::with_capacity(options.iterations);
        for iteration in 0..options.iterations {
            let keys: Vec<String> = (0..options.concurrency)
                .map(|slot| bench_key(suite, iteration, slot))
                .collect();

            let started = Instant::now();
            if suite == BenchmarkSuite::Write {
                let writes = keys.iter().map(|key| manager.set_item(key, &value, &write_options));
                join_all(writes).await.into_iter().collect::<Result<Vec<_>, _>>()?;
            } else {
                let reads = keys.iter().map(|key| manager.get_item::<String>(key, &read_options));
                for read in join_all(reads).await {
                    if read?.is_none() {
                        return Err(StorageError::Validation("benchmark key vanished during read".into()));
                    }
                }
            }
            samples.push(started.elapsed());
        }
        Ok(samples)
    }

    async fn cleanup(&self, suite: BenchmarkSuite, options: &BenchmarkOptions) {
        for iteration in 0..options.iterations {
            for slot in 0..options.concurrency {
                let key = bench_key(suite, iteration, slot);
                if let Err(e) = self.manager.discard_item(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to remove benchmark key");
                }
            }
        }
    }
}

async fn compress_samples(options: &BenchmarkOptions) -> Result<Vec<Duration>, StorageError> {
    let data = payload(options.payload_size).into_bytes();
    let mut samples = Vec::with_capacity(options.iterations);
    for _ in 0..options.iterations {
        let started = Instant::now();
        let rounds = (0..options.concurrency)
            .map(|_| async { compression::compress(&data).and_then(|frame| compression::decompress(&frame)) });
        for round in join_all(rounds).await {
            round?;
        }
        samples.push(started.elapsed());
    }
    Ok(samples)
}

async fn encrypt_samples(options: &BenchmarkOptions) -> Result<Vec<Duration>, StorageError> {
    let cipher = PayloadCipher::ephemeral()?;
    let data = payload(options.payload_size).into_bytes();
    let mut samples = Vec::with_capacity(options.iterations);
    for _ in 0..options.iterations {
        let started = Instant::now();
        let rounds = (0..options.concurrency).map(|_| async {
            cipher
                .seal(&data, BENCH_PREFIX.as_bytes())
                .and_then(|sealed| cipher.open(&sealed, BENCH_PREFIX.as_bytes()))
        });
        for round in join_all(rounds).await {
            round?;
        }
        samples.push(started.elapsed());
    }
    Ok(samples)
}
