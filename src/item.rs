//! Stored item envelope and the codec that builds and opens it.
//!
//! Writing runs serialize → compress → encrypt → checksum; reading verifies
//! the checksum first and then undoes the transforms in reverse. The
//! checksum always covers the bytes exactly as stored, so corruption is
//! caught before any decryption or decompression is attempted.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::compression;
use crate::config::StashConfig;
use crate::encryption::{derive_storage_key, PayloadCipher};
use crate::error::StorageError;
use crate::integrity;
use crate::metrics::TransformMetrics;

/// Envelope schema version written by this crate
pub const ITEM_VERSION: u32 = 1;

/// Suffix separating an item key from its chunk index
pub const CHUNK_MARKER: &str = "#chunk";

/// Backend key of chunk `index` of `key`
pub fn chunk_key(key: &str, index: u32) -> String {
    format!("{key}{CHUNK_MARKER}{index}")
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("envelope encoding failed: {0}")]
    Encoding(String),

    #[error("envelope decoding failed: {0}")]
    Decoding(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("chunk {index} of {total} is missing")]
    MissingChunk { index: u32, total: u32 },
}

impl ItemError {
    /// Attach the item key, turning the failure into a facade error
    pub fn for_key(self, key: &str) -> StorageError {
        match self {
            ItemError::Encoding(message) => StorageError::Serialization(message),
            other => StorageError::integrity(key, other.to_string()),
        }
    }
}

/// Envelope around one stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub key: String,
    /// Payload after transforms; empty when the payload lives in chunks
    pub value: Vec<u8>,
    /// Write time, ms since the Unix epoch
    pub timestamp: u64,
    pub version: u32,
    /// xxHash3-64 hex of the full stored payload
    pub checksum: String,
    pub encrypted: bool,
    pub compressed: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    /// Chunk records holding the payload (0 = inline)
    #[serde(default)]
    pub chunks: u32,
}

impl StorageItem {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    pub fn is_chunked(&self) -> bool {
        self.chunks > 0
    }

    /// MessagePack encoding written to the backend
    pub fn to_bytes(&self) -> Result<Vec<u8>, ItemError> {
        rmp_serde::to_vec(self).map_err(|e| ItemError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ItemError> {
        let item: StorageItem =
            rmp_serde::from_slice(bytes).map_err(|e| ItemError::Decoding(e.to_string()))?;
        if item.version != ITEM_VERSION {
            return Err(ItemError::UnsupportedVersion(item.version));
        }
        Ok(item)
    }

    /// Check the stored checksum against a fresh hash of `value`
    pub fn verify(&self) -> Result<(), ItemError> {
        if integrity::verify(&self.value, &self.checksum) {
            Ok(())
        } else {
            Err(ItemError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual: integrity::checksum(&self.value),
            })
        }
    }
}

/// Builds and opens [`StorageItem`] envelopes
pub struct ItemCodec {
    cipher: Option<PayloadCipher>,
    last_metrics: Mutex<TransformMetrics>,
}

impl std::fmt::Debug for ItemCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemCodec")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl ItemCodec {
    pub fn new(cipher: Option<PayloadCipher>) -> Self {
        Self {
            cipher,
            last_metrics: Mutex::new(TransformMetrics::new()),
        }
    }

    /// Codec with the payload key derived from the configured secret
    ///
    /// No cipher is built when the secret is empty; encrypted writes then
    /// fail with a configuration error.
    pub fn from_config(config: &StashConfig) -> Result<Self, StorageError> {
        if config.encryption_key.is_empty() {
            return Ok(Self::new(None));
        }
        let mut key = derive_storage_key(&config.encryption_key, &config.namespace)?;
        let cipher = PayloadCipher::new(&key);
        key.zeroize();
        Ok(Self::new(Some(cipher?)))
    }

    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }

    fn cipher(&self) -> Result<&PayloadCipher, StorageError> {
        self.cipher
            .as_ref()
            .ok_or_else(|| StorageError::Config("encryption requested but no encryption key is configured".into()))
    }

    /// Transform `value` into an inline envelope stamped with the current time
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        encrypt: bool,
        compress: bool,
    ) -> Result<StorageItem, StorageError> {
        let started = Instant::now();
        let mut payload = serde_json::to_vec(value)?;
        let mut metrics = TransformMetrics::new()
            .with_serialization(started.elapsed().as_micros() as u64, payload.len());

        if compress {
            let started = Instant::now();
            let compressed = compression::compress(&payload)?;
            metrics = metrics.with_compression(
                started.elapsed().as_micros() as u64,
                payload.len(),
                compressed.len(),
            );
            payload = compressed;
        }

        if encrypt {
            let started = Instant::now();
            payload = self.cipher()?.seal_to_json(&payload, key.as_bytes())?;
            metrics = metrics.with_encryption(started.elapsed().as_micros() as u64);
        }

        let started = Instant::now();
        let checksum = integrity::checksum(&payload);
        metrics = metrics.with_checksum(started.elapsed().as_micros() as u64, payload.len());
        *self.last_metrics.lock() = metrics;

        Ok(StorageItem {
            key: key.to_string(),
            value: payload,
            timestamp: now_millis(),
            version: ITEM_VERSION,
            checksum,
            encrypted: encrypt,
            compressed: compress,
            metadata: BTreeMap::new(),
            expires_at: None,
            chunks: 0,
        })
    }

    /// Verify and open an envelope whose `value` holds the full payload
    pub fn decode<T: DeserializeOwned>(&self, item: &StorageItem) -> Result<T, StorageError> {
        let started = Instant::now();
        item.verify().map_err(|e| e.for_key(&item.key))?;
        let mut metrics = TransformMetrics::new()
            .with_checksum(started.elapsed().as_micros() as u64, item.value.len());

        let mut payload = if item.encrypted {
            let started = Instant::now();
            let plain = self.cipher()?.open_json(&item.value, item.key.as_bytes())?;
            metrics = metrics.with_encryption(started.elapsed().as_micros() as u64);
            plain
        } else {
            item.value.clone()
        };

        if item.compressed {
            let started = Instant::now();
            let decompressed = compression::decompress(&payload)?;
            metrics = metrics.with_compression(
                started.elapsed().as_micros() as u64,
                decompressed.len(),
                payload.len(),
            );
            payload = decompressed;
        }

        let started = Instant::now();
        let value = serde_json::from_slice(&payload)?;
        *self.last_metrics.lock() = metrics
            .with_serialization(started.elapsed().as_micros() as u64, payload.len());
        Ok(value)
    }

    /// Timings of the most recent encode or decode
    pub fn last_metrics(&self) -> TransformMetrics {
        self.last_metrics.lock().clone()
    }
}
