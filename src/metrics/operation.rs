//! Per-call transform timings
//!
//! Captures what the codec spent on one encode/decode: serialization,
//! compression, encryption and checksumming. Exposed through
//! `ItemCodec::last_metrics()` and used by the benchmark harness.

use serde::{Deserialize, Serialize};

/// Timings of the payload transforms for the most recent codec call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformMetrics {
    /// JSON (de)serialization time in microseconds
    pub serialize_micros: u64,

    /// Compression time in microseconds (0 if not performed)
    pub compression_micros: u64,

    /// original_size / compressed_size; above 1.0 means compression helped
    pub compression_ratio: f64,

    /// Encryption time in microseconds (None if not performed)
    pub encryption_micros: Option<u64>,

    /// xxHash3 checksum time in microseconds
    pub checksum_micros: u64,

    /// Serialized payload size before transforms
    pub payload_bytes: usize,

    /// Size actually written to the backend
    pub stored_bytes: usize,
}

impl TransformMetrics {
    pub fn new() -> Self {
        TransformMetrics {
            serialize_micros: 0,
            compression_micros: 0,
            compression_ratio: 1.0,
            encryption_micros: None,
            checksum_micros: 0,
            payload_bytes: 0,
            stored_bytes: 0,
        }
    }

    pub fn with_serialization(mut self, micros: u64, payload_bytes: usize) -> Self {
        self.serialize_micros = micros;
        self.payload_bytes = payload_bytes;
        self
    }

    pub fn with_compression(mut self, micros: u64, original_size: usize, compressed_size: usize) -> Self {
        self.compression_micros = micros;
        if compressed_size > 0 {
            self.compression_ratio = original_size as f64 / compressed_size as f64;
        }
        self
    }

    pub fn with_encryption(mut self, micros: u64) -> Self {
        self.encryption_micros = Some(micros);
        self
    }

    pub fn with_checksum(mut self, micros: u64, stored_bytes: usize) -> Self {
        self.checksum_micros = micros;
        self.stored_bytes = stored_bytes;
        self
    }

    /// Total transform time in microseconds
    pub fn total_micros(&self) -> u64 {
        self.serialize_micros
            + self.compression_micros
            + self.checksum_micros
            + self.encryption_micros.unwrap_or(0)
    }
}

impl Default for TransformMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let metrics = TransformMetrics::new();
        assert_eq!(metrics.compression_micros, 0);
        assert_eq!(metrics.compression_ratio, 1.0);
        assert_eq!(metrics.encryption_micros, None);
    }

    #[test]
    fn test_compression_ratio() {
        let metrics = TransformMetrics::new().with_compression(100, 1000, 250);
        assert!((metrics.compression_ratio - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_total() {
        let metrics = TransformMetrics::new()
            .with_serialization(10, 64)
            .with_compression(100, 1000, 250)
            .with_checksum(50, 250)
            .with_encryption(200);

        assert_eq!(metrics.total_micros(), 360);
        assert_eq!(metrics.stored_bytes, 250);
    }
}
