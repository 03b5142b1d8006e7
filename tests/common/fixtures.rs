//! Test fixtures and helpers for stashkit-core tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;

use stashkit_core::{
    Backend, BackendError, BackendKind, MemoryBackend, MetricsCollector, StashConfig, StorageManager,
};

// ============================================================================
// Common Test Data
// ============================================================================

/// Small data - typical short string for basic validation
pub const SMALL_TEXT: &str = "hello world";

/// Unicode data - validates UTF-8 handling with emoji and international characters
pub const UNICODE_TEXT: &str = "Hello 世界 🚀 Rust";

/// Secret long enough to pass key derivation checks
pub const TEST_SECRET: &str = "stashkit-test-secret-0123456789abcdef";

/// Test master key for raw cipher tests (32 bytes for AES-256)
pub const TEST_MASTER_KEY: &[u8; 32] = &[
    0x3e, 0x5a, 0x89, 0x7f, 0x2c, 0x1d, 0x4b, 0x91, 0xa2, 0x6f, 0x3c, 0xd4, 0x8e, 0x5b, 0x72, 0x19,
    0xf6, 0x4a, 0x21, 0x98, 0xc7, 0x65, 0x3d, 0xb0, 0x84, 0x59, 0x2e, 0xd1, 0xa6, 0x7b, 0x30, 0xe5,
];

/// Structured value used by most round-trip tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub age: u32,
    pub tags: Vec<String>,
}

pub fn profile(name: &str) -> Profile {
    Profile {
        name: name.to_string(),
        age: 42,
        tags: vec!["admin".into(), "beta".into()],
    }
}

/// Generate random-looking incompressible data (for chunking and compression tests)
///
/// Uses a simple PRNG (not cryptographically secure). Deterministic seed
/// ensures reproducibility.
pub fn generate_incompressible_data(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = SimplePcg::new(seed);
    (0..size).map(|_| rng.next_byte()).collect()
}

/// Random-looking printable text; serializes to JSON at its own length plus quotes
pub fn generate_text(size: usize, seed: u64) -> String {
    let mut rng = SimplePcg::new(seed);
    (0..size)
        .map(|_| (b'a' + rng.next_byte() % 26) as char)
        .collect()
}

// Simple PCG random number generator (deterministic, not crypto-secure)
struct SimplePcg {
    state: u64,
}

impl SimplePcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_byte(&mut self) -> u8 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let xor_shifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        (xor_shifted.rotate_right(rot) & 0xff) as u8
    }
}

// ============================================================================
// Configurations and Builders
// ============================================================================

pub fn memory_config() -> StashConfig {
    let mut config = StashConfig {
        backend: BackendKind::Memory,
        ..StashConfig::default()
    };
    config.benchmark.run_at_startup = false;
    config
}

pub fn encrypted_config() -> StashConfig {
    StashConfig {
        encryption_key: TEST_SECRET.to_string(),
        encryption_enabled: true,
        ..memory_config()
    }
}

pub fn sync_config() -> StashConfig {
    let mut config = memory_config();
    config.sync.enabled = true;
    config.sync.max_retries = 3;
    config.sync.retry_delay = Duration::from_millis(1);
    config
}

/// Manager over `backend`; the backend stays reachable for inspection
pub fn manager_over(backend: Arc<dyn Backend>, config: StashConfig) -> Arc<StorageManager> {
    let metrics = Arc::new(MetricsCollector::new(&config.metrics));
    Arc::new(StorageManager::new(backend, config, metrics).expect("manager should build"))
}

pub fn memory_manager(config: StashConfig) -> (Arc<StorageManager>, MemoryBackend) {
    let backend = MemoryBackend::new();
    (manager_over(Arc::new(backend.clone()), config), backend)
}

/// Raw keys of `backend`, sorted for comparison
pub async fn sorted_keys(backend: &dyn Backend) -> Vec<String> {
    let mut keys = backend.keys().await.expect("backend should list keys");
    keys.sort();
    keys
}

/// Install a test-writer subscriber once; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log sink for asserting on emitted events
///
/// [`LogCapture::install`] routes events at `WARN` and above on the current
/// thread into the buffer until the guard drops.
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Fault Injection
// ============================================================================

/// Memory backend whose writes fail according to a script
///
/// Each `set`/`remove` pops the next scripted outcome; `None` lets the call
/// through, `Some(error)` fails it. An empty script lets everything through.
/// Writes to a rejected key always fail permanently.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    script: Mutex<VecDeque<Option<FailureKind>>>,
    rejected: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes with `kind`
    pub fn fail_next(&self, count: usize, kind: FailureKind) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(Some(kind));
        }
    }

    /// Refuse every write to `key` with a permanent error
    pub fn reject_key(&self, key: &str) {
        self.rejected.lock().insert(key.to_string());
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<(), BackendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().contains(key) {
            return Err(BackendError::Misconfigured(format!("{key} refused by target")));
        }
        match self.script.lock().pop_front().flatten() {
            None => Ok(()),
            Some(FailureKind::Transient) => Err(BackendError::Unavailable("injected outage".into())),
            Some(FailureKind::Permanent) => Err(BackendError::Misconfigured("injected rejection".into())),
        }
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.check(key)?;
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        self.inner.keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_incompressible_data() {
        let data1 = generate_incompressible_data(1000, 12345);
        let data2 = generate_incompressible_data(1000, 12345);
        let data3 = generate_incompressible_data(1000, 54321);

        assert_eq!(data1, data2);
        assert_ne!(data1, data3);

        let unique_bytes: std::collections::HashSet<u8> = data1.iter().copied().collect();
        assert!(unique_bytes.len() > 10, "Incompressible data should have variety");
    }

    #[test]
    fn test_generate_text_is_printable() {
        let text = generate_text(500, 7);
        assert_eq!(text.len(), 500);
        assert!(text.bytes().all(|b| b.is_ascii_lowercase()));
    }
}
