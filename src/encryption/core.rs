//! AES-256-GCM payload cipher
//!
//! Seals item payloads with `ring`'s AES-256-GCM. The item key is passed as
//! associated data, so a ciphertext copied under another key fails
//! authentication instead of decrypting.
//!
//! # Nonce uniqueness
//!
//! GCM loses both confidentiality and integrity if a nonce is ever used
//! twice with one key. Nonces are therefore counters, never random draws:
//!
//! ```text
//! [ instance_id: u64 BE ][ counter: u32 BE ]   = 12 bytes
//! ```
//!
//! - `instance_id` comes from a process-wide atomic counter, one value per
//!   [`PayloadCipher`]. Two ciphers built from the same derived key (for
//!   example one per storage manager) still never share a nonce.
//! - The counter's upper 32 bits are seeded randomly when first touched, so
//!   a restarted process starts from a different instance ID range.
//! - `counter` is per instance and runs from 0 to `u32::MAX - 1`. Once spent
//!   the cipher returns [`EncryptionError::NonceCounterExhausted`] on every
//!   further seal; a new instance is required.
//!
//! Within one process this yields 2^64 instances of 2^32 nonces each.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
};
use thiserror::Error;
use zeroize::Zeroize;

use super::key_derivation::key_fingerprint;
use super::sealed::{SealedPayload, IV_LEN, TAG_LEN};
use crate::metrics::TransformMetrics;

/// Source of per-cipher instance IDs
///
/// Monotonic within the process. Upper 32 bits start random, lower 32 bits
/// at zero.
static GLOBAL_INSTANCE_COUNTER: LazyLock<AtomicU64> = LazyLock::new(|| {
    let rng = SystemRandom::new();
    let mut random_seed = [0u8; 4];
    // RNG failure leaves the seed at zero; IDs stay unique within the process
    let _ = rng.fill(&mut random_seed);
    AtomicU64::new((u32::from_be_bytes(random_seed) as u64) << 32)
});

/// Errors that can occur during encryption operations
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Random number generation failed")]
    RngFailure,

    #[error("Invalid ciphertext format: {0}")]
    InvalidCiphertext(String),

    #[error("Authentication verification failed")]
    AuthenticationFailed,

    #[error("Nonce counter exhausted - a new cipher instance is required")]
    NonceCounterExhausted,
}

/// AES-256-GCM cipher bound to one derived key
///
/// Safe to share across threads; `seal` and `open` take `&self`. Only the
/// expanded `ring` key and a 16-byte fingerprint are retained, and `Debug`
/// shows the fingerprint, never key material.
pub struct PayloadCipher {
    key: LessSafeKey,
    fingerprint: [u8; 16],
    /// Nonces handed out by this instance
    ///
    /// Only the low 32 bits reach the nonce. The counter is 64 bits wide so
    /// that `fetch_add` past `u32::MAX` keeps counting upward: every later
    /// call sees a value `>= u32::MAX` and fails. A 32-bit counter would wrap
    /// to zero and reissue nonce 0.
    nonce_counter: AtomicU64,
    instance_id: u64,
    last_metrics: Arc<Mutex<TransformMetrics>>,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("fingerprint", &hex::encode(self.fingerprint))
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl PayloadCipher {
    /// Build a cipher from 32 bytes of key material
    ///
    /// The caller's copy is left untouched; the cipher keeps only the
    /// expanded `ring` key and a fingerprint.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != 32 {
            return Err(EncryptionError::InvalidKeyLength(key.len()));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| EncryptionError::EncryptionFailed("Invalid key".into()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            fingerprint: key_fingerprint(key),
            nonce_counter: AtomicU64::new(0),
            instance_id: GLOBAL_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst),
            last_metrics: Arc::new(Mutex::new(TransformMetrics::new())),
        })
    }

    /// Build a cipher around a freshly generated random key
    ///
    /// Used for benchmarking and tests where nothing is persisted.
    pub fn ephemeral() -> Result<Self, EncryptionError> {
        let mut key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| EncryptionError::RngFailure)?;
        let cipher = Self::new(&key);
        key.zeroize();
        cipher
    }

    /// Fingerprint of the key this cipher was built from
    pub fn fingerprint(&self) -> [u8; 16] {
        self.fingerprint
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Number of nonces handed out so far
    pub fn nonce_counter(&self) -> u64 {
        self.nonce_counter.load(Ordering::SeqCst)
    }

    /// Reserve the next nonce of this instance
    ///
    /// `fetch_add` hands each concurrent caller a distinct counter value, so
    /// no lock is needed.
    fn next_nonce(&self) -> Result<[u8; IV_LEN], EncryptionError> {
        let counter = self.nonce_counter.fetch_add(1, Ordering::SeqCst);
        if counter >= u32::MAX as u64 {
            return Err(EncryptionError::NonceCounterExhausted);
        }

        let mut nonce = [0u8; IV_LEN];
        nonce[0..8].copy_from_slice(&self.instance_id.to_be_bytes());
        nonce[8..12].copy_from_slice(&(counter as u32).to_be_bytes());
        Ok(nonce)
    }

    /// Encrypt `plaintext`, binding it to `aad`
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload, EncryptionError> {
        let started = Instant::now();
        let iv = self.next_nonce()?;

        let mut in_out = plaintext.to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(iv), Aad::from(aad), &mut in_out)
            .map_err(|e| EncryptionError::EncryptionFailed(format!("AES-GCM seal failed: {e:?}")))?;

        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(tag.as_ref());

        self.store_metrics(started);
        Ok(SealedPayload {
            iv,
            ciphertext: in_out,
            auth_tag,
        })
    }

    /// Decrypt and authenticate a sealed payload
    pub fn open(&self, sealed: &SealedPayload, aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let started = Instant::now();

        let mut in_out = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(&sealed.ciphertext);
        in_out.extend_from_slice(&sealed.auth_tag);

        let plaintext_len = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(sealed.iv), Aad::from(aad), &mut in_out)
            .map_err(|_| EncryptionError::AuthenticationFailed)?
            .len();
        in_out.truncate(plaintext_len);

        self.store_metrics(started);
        Ok(in_out)
    }

    /// Seal and render as the JSON envelope in one step
    pub fn seal_to_json(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.seal(plaintext, aad)?.to_json()
    }

    /// Parse the JSON envelope and open it
    pub fn open_json(&self, sealed_json: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let sealed = SealedPayload::from_json(sealed_json)?;
        self.open(&sealed, aad)
    }

    fn store_metrics(&self, started: Instant) {
        let micros = started.elapsed().as_micros() as u64;
        if let Ok(mut metrics) = self.last_metrics.lock() {
            *metrics = TransformMetrics::new().with_encryption(micros);
        }
    }

    /// Metrics of the most recent seal/open on this instance
    pub fn last_metrics(&self) -> TransformMetrics {
        self.last_metrics
            .lock()
            .map(|metrics| metrics.clone())
            .unwrap_or_else(|_| TransformMetrics::new())
    }
}
