//! LZ4 payload compression with decompression-bomb protection.
//!
//! Frame layout: `[original_size: u32 BE][lz4 block]`.
//!
//! Limits enforced on both sides:
//! - 512MB maximum for the uncompressed and the compressed payload
//! - 1000:1 maximum claimed expansion ratio, checked with integer arithmetic
//!   before any allocation happens

use thiserror::Error;

/// Errors raised by the compression helper
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompressionError {
    #[error("input exceeds maximum size")]
    InputTooLarge,

    #[error("decompression ratio exceeds safety limit")]
    DecompressionBomb,

    #[error("compressed frame is truncated")]
    TruncatedFrame,

    #[error("decompression failed")]
    DecompressionFailed,

    #[error("decompressed size does not match frame header")]
    SizeMismatch,
}

pub const MAX_UNCOMPRESSED_SIZE: usize = 512 * 1024 * 1024;
pub const MAX_COMPRESSED_SIZE: usize = 512 * 1024 * 1024;
/// Maximum allowed expansion (1000:1), kept as u64 so the check never touches floats
pub const MAX_COMPRESSION_RATIO: u64 = 1000;

const HEADER_LEN: usize = 4;

/// Compress `data` into a size-prefixed LZ4 frame
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if data.len() > MAX_UNCOMPRESSED_SIZE {
        return Err(CompressionError::InputTooLarge);
    }

    let block = lz4_flex::compress(data);
    if block.len() > MAX_COMPRESSED_SIZE {
        return Err(CompressionError::InputTooLarge);
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + block.len());
    frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
    frame.extend_from_slice(&block);
    Ok(frame)
}

/// Decompress a frame produced by [`compress`]
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if frame.len() > MAX_COMPRESSED_SIZE + HEADER_LEN {
        return Err(CompressionError::InputTooLarge);
    }
    if frame.len() < HEADER_LEN {
        return Err(CompressionError::TruncatedFrame);
    }

    let (header, block) = frame.split_at(HEADER_LEN);
    let original_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;

    if original_size > MAX_UNCOMPRESSED_SIZE {
        return Err(CompressionError::InputTooLarge);
    }
    check_ratio(original_size as u64, block.len() as u64)?;

    let decompressed = lz4_flex::decompress(block, original_size)
        .map_err(|_| CompressionError::DecompressionFailed)?;

    if decompressed.len() != original_size {
        return Err(CompressionError::SizeMismatch);
    }
    Ok(decompressed)
}

/// Reject frames whose claimed size is out of proportion to the block
///
/// An empty block is only legal for an empty payload; lz4 always emits at
/// least one token byte, so zero-length blocks claiming data are bombs.
fn check_ratio(original_size: u64, block_size: u64) -> Result<(), CompressionError> {
    if block_size == 0 {
        return Err(CompressionError::DecompressionBomb);
    }

    let max_allowed = MAX_COMPRESSION_RATIO
        .checked_mul(block_size)
        .ok_or(CompressionError::DecompressionBomb)?;

    if original_size > max_allowed {
        return Err(CompressionError::DecompressionBomb);
    }
    Ok(())
}

/// Ratio original/compressed for `data`; values above 1.0 mean compression helps
pub fn estimate_ratio(data: &[u8]) -> Result<f64, CompressionError> {
    if data.len() > MAX_UNCOMPRESSED_SIZE {
        return Err(CompressionError::InputTooLarge);
    }
    let compressed = lz4_flex::compress(data);
    Ok(data.len() as f64 / compressed.len().max(1) as f64)
}
