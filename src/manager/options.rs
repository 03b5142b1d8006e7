//! Per-call options for reads and writes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bytes handled so far out of the full stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    pub written: usize,
    pub total: usize,
}

impl WriteProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.written as f64 / self.total as f64
        }
    }
}

/// One chunk of a payload, as handed to a chunk handler
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub key: &'a str,
    pub index: u32,
    pub total: u32,
    pub data: &'a [u8],
}

pub type ChunkHandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type ProgressFn = Arc<dyn Fn(WriteProgress) + Send + Sync>;
pub type ChunkHandler = Arc<dyn Fn(&Chunk<'_>) -> Result<(), ChunkHandlerError> + Send + Sync>;

/// Overrides for one `set_item` / `get_item` call
///
/// Unset fields fall back to the manager's configuration.
#[derive(Clone, Default)]
pub struct ItemOptions {
    pub encrypt: Option<bool>,
    pub compress: Option<bool>,
    pub chunk_size: Option<usize>,
    pub ttl: Option<Duration>,
    pub metadata: BTreeMap<String, String>,
    /// Called after each chunk is written
    pub progress: Option<ProgressFn>,
    /// Sees every chunk before the write continues; an error aborts the write
    pub chunk_handler: Option<ChunkHandler>,
    pub(crate) skip_change_queue: bool,
}

impl ItemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_progress(mut self, progress: impl Fn(WriteProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn on_chunk(
        mut self,
        handler: impl Fn(&Chunk<'_>) -> Result<(), ChunkHandlerError> + Send + Sync + 'static,
    ) -> Self {
        self.chunk_handler = Some(Arc::new(handler));
        self
    }

    pub(crate) fn unqueued(mut self) -> Self {
        self.skip_change_queue = true;
        self
    }

    pub(crate) fn report(&self, written: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(WriteProgress { written, total });
        }
    }
}

impl fmt::Debug for ItemOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemOptions")
            .field("encrypt", &self.encrypt)
            .field("compress", &self.compress)
            .field("chunk_size", &self.chunk_size)
            .field("ttl", &self.ttl)
            .field("metadata", &self.metadata)
            .field("progress", &self.progress.is_some())
            .field("chunk_handler", &self.chunk_handler.is_some())
            .finish()
    }
}
