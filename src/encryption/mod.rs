//! Payload encryption
//!
//! AES-256-GCM via `ring`, keyed by an HKDF-SHA256 derivation of the
//! environment-supplied secret. Sealed payloads travel as the JSON document
//! `{"iv": .., "ciphertext": .., "auth_tag": ..}` with hex-encoded fields.

pub mod core;
pub mod key_derivation;
pub mod sealed;

pub use core::{EncryptionError, PayloadCipher};
pub use key_derivation::{derive_domain_key, derive_storage_key, key_fingerprint, KeyDerivationError};
pub use sealed::SealedPayload;

/// Key derivation domain for storage payload keys
pub const STORAGE_KEY_DOMAIN: &str = "storage";
