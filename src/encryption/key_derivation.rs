//! HKDF-SHA256 key derivation (RFC 5869)
//!
//! The storage key is never the raw secret from the environment. It is
//! expanded with HKDF using a length-prefixed salt of
//! `[prefix][domain_len:u8][domain][salt_len:u16BE][salt]`, which keeps
//! `("foo", "bar")` and `("foob", "ar")` apart.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

use super::STORAGE_KEY_DOMAIN;

pub const MAX_DOMAIN_LENGTH: usize = 255;
pub const MAX_SALT_LENGTH: usize = 1024;
/// Shortest secret accepted as master key material
pub const MIN_MASTER_KEY_LENGTH: usize = 16;

const SALT_PREFIX: &[u8] = b"stashkit_v1_";

#[derive(Error, Debug)]
pub enum KeyDerivationError {
    #[error("Invalid master key length: expected at least 16 bytes, got {0}")]
    InvalidMasterKeyLength(usize),

    #[error("Invalid domain string: {0}")]
    InvalidDomain(String),

    #[error("Invalid salt length: expected at least 1 byte, got {0}")]
    InvalidSaltLength(usize),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Domain exceeds maximum length")]
    DomainTooLong,

    #[error("Salt exceeds maximum length")]
    SaltTooLong,
}

/// Derive a 256-bit key for `domain` from `master_key` and `salt`
pub fn derive_domain_key(
    master_key: &[u8],
    domain: &str,
    salt: &[u8],
) -> Result<[u8; 32], KeyDerivationError> {
    if master_key.len() < MIN_MASTER_KEY_LENGTH {
        return Err(KeyDerivationError::InvalidMasterKeyLength(master_key.len()));
    }
    if domain.is_empty() {
        return Err(KeyDerivationError::InvalidDomain("Domain cannot be empty".into()));
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(KeyDerivationError::DomainTooLong);
    }
    if salt.is_empty() {
        return Err(KeyDerivationError::InvalidSaltLength(0));
    }
    if salt.len() > MAX_SALT_LENGTH {
        return Err(KeyDerivationError::SaltTooLong);
    }

    let mut salt_data = Vec::with_capacity(SALT_PREFIX.len() + 3 + domain.len() + salt.len());
    salt_data.extend_from_slice(SALT_PREFIX);
    salt_data.push(domain.len() as u8);
    salt_data.extend_from_slice(domain.as_bytes());
    salt_data.extend_from_slice(&(salt.len() as u16).to_be_bytes());
    salt_data.extend_from_slice(salt);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt_data), master_key);
    let mut key = [0u8; 32];
    hkdf.expand(domain.as_bytes(), &mut key)
        .map_err(|_| KeyDerivationError::DerivationFailed("HKDF expand failed".into()))?;

    Ok(key)
}

/// Derive the payload key for a storage namespace from the configured secret
pub fn derive_storage_key(secret: &str, namespace: &str) -> Result<[u8; 32], KeyDerivationError> {
    let mut master = secret.as_bytes().to_vec();
    let key = derive_domain_key(&master, STORAGE_KEY_DOMAIN, namespace.as_bytes());
    master.zeroize();
    key
}

/// Stable 16-byte identifier for a key that reveals nothing about it
pub fn key_fingerprint(key: &[u8]) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(b"stashkit_fingerprint_v1");
    hasher.update(key);
    let hash = hasher.finalize();

    let mut fingerprint = [0u8; 16];
    fingerprint.copy_from_slice(&hash[..16]);
    fingerprint
}
