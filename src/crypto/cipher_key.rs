//! The symmetric key that protects every record payload
//!
//! A `CipherKey` lives only in process memory and wipes itself on drop. The
//! server never sees it; it only sees a `KeyProof`, a one-way fingerprint it
//! can compare to refuse writes made under a different key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a cipher key in bytes (AES-256)
pub const KEY_LEN: usize = 32;

const PROOF_DOMAIN: &[u8] = b"cipherbook-key-proof-v1";

/// A 256-bit payload key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey {
    bytes: [u8; KEY_LEN],
}

impl CipherKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Fingerprint of this key that is safe to send to the server
    pub fn proof(&self) -> KeyProof {
        let mut hasher = Sha256::new();
        hasher.update(PROOF_DOMAIN);
        hasher.update(self.bytes);
        KeyProof(hex::encode(hasher.finalize()))
    }
}

impl PartialEq for CipherKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for CipherKey {}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKey")
            .field("proof", &self.proof().short())
            .finish()
    }
}

/// Hex SHA-256 fingerprint of a cipher key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyProof(String);

impl KeyProof {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for logs
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for KeyProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
