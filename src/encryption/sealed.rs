//! Wire form of an encrypted payload.

use serde::{Deserialize, Serialize};

use super::core::EncryptionError;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AES-GCM output split into its three parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

#[derive(Serialize, Deserialize)]
struct SealedJson {
    iv: String,
    ciphertext: String,
    auth_tag: String,
}

impl SealedPayload {
    /// Serialize as the JSON envelope stored in place of the plaintext
    pub fn to_json(&self) -> Result<Vec<u8>, EncryptionError> {
        let doc = SealedJson {
            iv: hex::encode(self.iv),
            ciphertext: hex::encode(&self.ciphertext),
            auth_tag: hex::encode(self.auth_tag),
        };
        serde_json::to_vec(&doc).map_err(|e| EncryptionError::InvalidCiphertext(e.to_string()))
    }

    /// Parse the JSON envelope; any malformed field is an invalid ciphertext
    pub fn from_json(bytes: &[u8]) -> Result<Self, EncryptionError> {
        let doc: SealedJson = serde_json::from_slice(bytes)
            .map_err(|e| EncryptionError::InvalidCiphertext(e.to_string()))?;

        let iv = decode_fixed::<IV_LEN>(&doc.iv, "iv")?;
        let auth_tag = decode_fixed::<TAG_LEN>(&doc.auth_tag, "auth_tag")?;
        let ciphertext = hex::decode(&doc.ciphertext)
            .map_err(|e| EncryptionError::InvalidCiphertext(format!("ciphertext: {e}")))?;

        Ok(Self {
            iv,
            ciphertext,
            auth_tag,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, name: &str) -> Result<[u8; N], EncryptionError> {
    let bytes = hex::decode(field)
        .map_err(|e| EncryptionError::InvalidCiphertext(format!("{name}: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        EncryptionError::InvalidCiphertext(format!("{name}: expected {N} bytes, got {}", v.len()))
    })
}
