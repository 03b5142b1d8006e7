//! xxHash3-64 content checksums for stored payloads.
//!
//! The checksum is taken over the payload exactly as it is written to a
//! backend (after compression and encryption), so corruption anywhere between
//! write and read is caught before any transform is reversed.
//!
//! xxHash3 is non-cryptographic. Tamper resistance comes from the AES-GCM tag
//! when encryption is enabled; the checksum only detects corruption.

use xxhash_rust::xxh3::xxh3_64;

/// Length of a rendered checksum (8 bytes as lowercase hex)
pub const CHECKSUM_HEX_LEN: usize = 16;

/// Compute the checksum of `data` as 16 lowercase hex characters
///
/// Big-endian byte order matches the canonical xxhash rendering.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(xxh3_64(data).to_be_bytes())
}

/// Check `data` against a previously rendered checksum
pub fn verify(data: &[u8], expected: &str) -> bool {
    expected.len() == CHECKSUM_HEX_LEN && checksum(data).eq_ignore_ascii_case(expected)
}
