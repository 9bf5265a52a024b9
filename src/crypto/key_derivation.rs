//! Key derivation using Argon2id
//!
//! Derives the payload key from the user's password. Derivation must be
//! deterministic: logging in again (on any device) has to reconstruct the
//! exact key that encrypted the data already on the server. The salt is
//! therefore derived from the account name instead of being random.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::cipher_key::{CipherKey, KEY_LEN};
use super::secure_memory::Credential;
use crate::error::{CipherbookError, CipherbookResult};

const SALT_DOMAIN: &str = "cipherbook:";
const SALT_LEN: usize = 16;

/// Parameters for key derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Create params with specific values
    pub fn with_values(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    fn argon2_params(&self) -> CipherbookResult<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CipherbookError::Config(format!("Invalid Argon2 parameters: {}", e)))
    }
}

/// Turns a credential into the account's cipher key
///
/// Pure: no I/O, no retained state besides the account salt and cost
/// parameters.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
    salt: [u8; SALT_LEN],
}

impl CredentialHasher {
    /// Build a hasher for `username`, validating the cost parameters up front
    pub fn new(username: &str, params: &KeyDerivationParams) -> CipherbookResult<Self> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CipherbookError::Validation("Username cannot be empty".into()));
        }

        let digest = Sha256::digest(format!("{}{}", SALT_DOMAIN, username).as_bytes());
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&digest[..SALT_LEN]);

        Ok(Self {
            params: params.argon2_params()?,
            salt,
        })
    }

    /// Derive the cipher key for `credential`
    ///
    /// The same credential always yields the same key for a given account.
    pub fn derive(&self, credential: &Credential) -> CipherbookResult<CipherKey> {
        if credential.is_empty() {
            return Err(CipherbookError::Validation("Password cannot be empty".into()));
        }

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let mut output = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(credential.expose().as_bytes(), &self.salt, &mut output[..])
            .map_err(|e| CipherbookError::Encryption(format!("Key derivation failed: {}", e)))?;

        Ok(CipherKey::from_bytes(*output))
    }
}
