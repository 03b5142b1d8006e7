//! Quick throughput check - run with: cargo run --release --example bench_throughput
//!
//! Runs every benchmark suite over an in-memory store at a few payload sizes,
//! then prints raw transform throughput for the same payloads.
//! `RUST_LOG=stashkit_core=debug` shows per-suite logs.

use std::sync::Arc;
use std::time::Instant;

use stashkit_core::backend::BackendKind;
use stashkit_core::compression;
use stashkit_core::integrity;
use stashkit_core::{Benchmark, BenchmarkOptions, MetricsCollector, PayloadCipher, StashConfig, StorageManager};

fn size_label(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{}MB", size / 1024 / 1024)
    } else if size >= 1024 {
        format!("{}KB", size / 1024)
    } else {
        format!("{}B", size)
    }
}

fn gbps(bytes: usize, iterations: usize, started: Instant) -> f64 {
    (bytes * iterations) as f64 / started.elapsed().as_secs_f64() / 1e9
}

fn raw_transforms(size: usize, iterations: usize) -> Result<(), Box<dyn std::error::Error>> {
    // Compressible data (repeating pattern)
    let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();

    let started = Instant::now();
    for _ in 0..iterations {
        compression::compress(&data)?;
    }
    println!(
        "LZ4 compress:    {:.2} GB/s (ratio {:.1}x)",
        gbps(size, iterations, started),
        compression::estimate_ratio(&data)?
    );

    let frame = compression::compress(&data)?;
    let started = Instant::now();
    for _ in 0..iterations {
        compression::decompress(&frame)?;
    }
    println!("LZ4 decompress:  {:.2} GB/s", gbps(size, iterations, started));

    let started = Instant::now();
    for _ in 0..iterations {
        integrity::checksum(&data);
    }
    println!("xxHash3-64:      {:.2} GB/s", gbps(size, iterations, started));

    let cipher = PayloadCipher::ephemeral()?;
    let started = Instant::now();
    for _ in 0..iterations {
        cipher.seal(&data, b"bench")?;
    }
    println!("AES-GCM seal:    {:.2} GB/s", gbps(size, iterations, started));

    let sealed = cipher.seal(&data, b"bench")?;
    let started = Instant::now();
    for _ in 0..iterations {
        cipher.open(&sealed, b"bench")?;
    }
    println!("AES-GCM open:    {:.2} GB/s", gbps(size, iterations, started));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = StashConfig {
        backend: BackendKind::Memory,
        encryption_key: "bench-throughput-secret-material".into(),
        ..StashConfig::default()
    };
    config.benchmark.run_at_startup = false;

    let metrics = Arc::new(MetricsCollector::new(&config.metrics));
    let manager = Arc::new(StorageManager::from_config(config, metrics)?);
    let benchmark = Benchmark::new(manager);

    for (size, iterations) in [(1024, 10_000), (64 * 1024, 1_000), (1024 * 1024, 50)] {
        println!("\n=== {} payload, {} iterations ===", size_label(size), iterations);

        let options = BenchmarkOptions {
            iterations,
            payload_size: size,
            concurrency: 4,
        };
        for report in benchmark.run_full(&options).await? {
            println!(
                "{:<9} avg {:>8.1}us  min {:>8.1}us  max {:>8.1}us  {:>10.0} ops/s",
                report.suite.as_str(),
                report.average.as_secs_f64() * 1e6,
                report.min.as_secs_f64() * 1e6,
                report.max.as_secs_f64() * 1e6,
                report.ops_per_sec,
            );
        }

        raw_transforms(size, iterations)?;
    }

    println!("\nNote: 1KB shows call overhead; larger sizes show peak throughput.");
    Ok(())
}
