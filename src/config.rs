//! Configuration for the storage facade, its backends and background tasks
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration. Durations are expressed in milliseconds.
//! `StashConfig::from_env()` overlays the secret and cloud settings from the
//! environment; missing variables fall back to empty strings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::StorageError;

pub const ENV_ENCRYPTION_KEY: &str = "STASHKIT_ENCRYPTION_KEY";
pub const ENV_CLOUD_ENDPOINT: &str = "STASHKIT_CLOUD_ENDPOINT";
pub const ENV_CLOUD_BUCKET: &str = "STASHKIT_CLOUD_BUCKET";
pub const ENV_CLOUD_ACCESS_KEY: &str = "STASHKIT_CLOUD_ACCESS_KEY";
pub const ENV_CLOUD_SECRET_KEY: &str = "STASHKIT_CLOUD_SECRET_KEY";

/// Default chunk size for large payloads (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Top-level configuration
///
/// `Debug` output redacts the secret, matching what serialization skips.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Backend the facade reads and writes
    pub backend: BackendKind,

    /// Directory for the `local` backend
    pub local_dir: PathBuf,

    /// Namespace mixed into key derivation
    pub namespace: String,

    /// Secret the payload key is derived from; empty disables encryption
    #[serde(skip_serializing)]
    pub encryption_key: String,

    /// Default time-to-live for written items (None = no expiry)
    #[serde(with = "duration_ms_opt")]
    pub ttl: Option<Duration>,

    pub encryption_enabled: bool,
    pub compression_enabled: bool,
    pub chunk_size: usize,

    pub sync: SyncConfig,
    pub cloud: CloudConfig,
    pub memory: MemoryConfig,
    pub metrics: MetricsConfig,
    pub benchmark: BenchmarkConfig,
}

/// Stand-in for a secret in `Debug` output
fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl std::fmt::Debug for StashConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashConfig")
            .field("backend", &self.backend)
            .field("local_dir", &self.local_dir)
            .field("namespace", &self.namespace)
            .field("encryption_key", &redacted(&self.encryption_key))
            .field("ttl", &self.ttl)
            .field("encryption_enabled", &self.encryption_enabled)
            .field("compression_enabled", &self.compression_enabled)
            .field("chunk_size", &self.chunk_size)
            .field("sync", &self.sync)
            .field("cloud", &self.cloud)
            .field("memory", &self.memory)
            .field("metrics", &self.metrics)
            .field("benchmark", &self.benchmark)
            .finish()
    }
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local_dir: PathBuf::from(".stashkit"),
            namespace: "default".to_string(),
            encryption_key: String::new(),
            ttl: None,
            encryption_enabled: false,
            compression_enabled: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync: SyncConfig::default(),
            cloud: CloudConfig::default(),
            memory: MemoryConfig::default(),
            metrics: MetricsConfig::default(),
            benchmark: BenchmarkConfig::default(),
        }
    }
}

impl StashConfig {
    /// Parse a JSON document; absent fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Defaults with the environment overlaid
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay environment variables onto this configuration
    ///
    /// Only variables that are set and non-empty replace existing values.
    pub fn with_env(mut self) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(secret) = read(ENV_ENCRYPTION_KEY) {
            self.encryption_key = secret;
            self.encryption_enabled = true;
        }
        if let Some(endpoint) = read(ENV_CLOUD_ENDPOINT) {
            self.cloud.endpoint = endpoint;
        }
        if let Some(bucket) = read(ENV_CLOUD_BUCKET) {
            self.cloud.bucket = bucket;
        }
        if let Some(access_key) = read(ENV_CLOUD_ACCESS_KEY) {
            self.cloud.credentials.access_key = access_key;
        }
        if let Some(secret_key) = read(ENV_CLOUD_SECRET_KEY) {
            self.cloud.credentials.secret_key = secret_key;
        }
        self
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.chunk_size == 0 {
            return Err(StorageError::Config("chunk_size must be greater than zero".into()));
        }
        if self.encryption_enabled && self.encryption_key.is_empty() {
            return Err(StorageError::Config(format!(
                "encryption is enabled but {ENV_ENCRYPTION_KEY} is empty"
            )));
        }
        if self.sync.enabled && self.sync.interval.is_zero() {
            return Err(StorageError::Config("sync.interval must be non-zero".into()));
        }
        if self.backend == BackendKind::Cloud && !self.cloud.is_configured() {
            return Err(StorageError::Config(
                "cloud backend selected without cloud.endpoint and cloud.bucket".into(),
            ));
        }
        self.memory.validate()?;
        self.metrics.thresholds.validate()?;
        Ok(())
    }
}

/// Change-queue replication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// Extra attempts per entry on transient backend errors
    pub max_retries: u32,
    /// Base delay between attempts, doubled each retry
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudCredentials {
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &redacted(&self.secret_key))
            .finish()
    }
}

/// Remote object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub endpoint: String,
    pub credentials: CloudCredentials,
    pub bucket: String,
    /// Interval of the upload flush when the cloud store is the sync target
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credentials: CloudCredentials::default(),
            bucket: String::new(),
            sync_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CloudConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.bucket.is_empty()
    }
}

/// Process memory watch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory budget in bytes
    pub max_usage: u64,
    /// Fraction of `max_usage` that triggers a warning
    pub warning_threshold: f64,
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,
    /// Purge expired items when usage crosses `cleanup_threshold`
    pub auto_cleanup: bool,
    pub cleanup_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_usage: 512 * 1024 * 1024,
            warning_threshold: 0.8,
            check_interval: Duration::from_secs(30),
            auto_cleanup: true,
            cleanup_threshold: 0.9,
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<(), StorageError> {
        for (name, value) in [
            ("memory.warning_threshold", self.warning_threshold),
            ("memory.cleanup_threshold", self.cleanup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StorageError::Config(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        Ok(())
    }
}

/// Limits checked on every metrics sample
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsThresholds {
    pub max_heap_usage: u64,
    pub max_item_count: usize,
    pub min_hit_rate: f64,
    #[serde(with = "duration_ms")]
    pub max_access_time: Duration,
}

impl Default for MetricsThresholds {
    fn default() -> Self {
        Self {
            max_heap_usage: 256 * 1024 * 1024,
            max_item_count: 100_000,
            min_hit_rate: 0.5,
            max_access_time: Duration::from_millis(100),
        }
    }
}

impl MetricsThresholds {
    fn validate(&self) -> Result<(), StorageError> {
        if !(0.0..=1.0).contains(&self.min_hit_rate) {
            return Err(StorageError::Config(format!(
                "metrics.thresholds.min_hit_rate must be within 0..=1, got {}",
                self.min_hit_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// Snapshots kept for trend queries
    pub history_size: usize,
    /// Operation records kept in the sliding window
    pub window_size: usize,
    /// Samples compared by the leak check
    pub trend_samples: usize,
    pub thresholds: MetricsThresholds,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            history_size: 100,
            window_size: crate::metrics::DEFAULT_WINDOW_SIZE,
            trend_samples: 12,
            thresholds: MetricsThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub run_at_startup: bool,
    pub iterations: usize,
    pub payload_size: usize,
    pub concurrency: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            run_at_startup: true,
            iterations: 10,
            payload_size: 1024,
            concurrency: 1,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
