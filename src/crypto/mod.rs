//! Cryptographic functions for cipherbook
//!
//! Provides Argon2id key derivation from the user's password, the in-memory
//! key slot, and AES-256-GCM encryption of record payloads.

pub mod cipher_key;
pub mod encryption;
pub mod key_derivation;
pub mod key_store;
pub mod secure_memory;

pub use cipher_key::{CipherKey, KeyProof, KEY_LEN};
pub use encryption::{decrypt, encrypt, open, seal, EncryptedData};
pub use key_derivation::{CredentialHasher, KeyDerivationParams};
pub use key_store::KeyStore;
pub use secure_memory::Credential;
