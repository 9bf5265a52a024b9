//! AES-256-GCM encryption/decryption of record payloads
//!
//! Each encryption operation generates a unique nonce. The record id is bound
//! as associated data so a payload copied onto another id fails to open.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use super::cipher_key::CipherKey;
use crate::error::{CipherbookError, CipherbookResult};

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Encrypted data with associated metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// The nonce used for this encryption (base64 encoded)
    pub nonce: String,
    /// The encrypted ciphertext with authentication tag (base64 encoded)
    pub ciphertext: String,
    /// Version for future algorithm upgrades
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    1
}

impl EncryptedData {
    fn new(nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
            version: 1,
        }
    }

    fn decode_nonce(&self) -> CipherbookResult<Vec<u8>> {
        STANDARD
            .decode(&self.nonce)
            .map_err(|e| CipherbookError::Encryption(format!("Invalid nonce encoding: {}", e)))
    }

    fn decode_ciphertext(&self) -> CipherbookResult<Vec<u8>> {
        STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| CipherbookError::Encryption(format!("Invalid ciphertext encoding: {}", e)))
    }
}

fn cipher_for(key: &CipherKey) -> CipherbookResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CipherbookError::Encryption(format!("Failed to create cipher: {}", e)))
}

/// Encrypt plaintext bound to `aad`
pub fn encrypt(plaintext: &[u8], aad: &[u8], key: &CipherKey) -> CipherbookResult<EncryptedData> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CipherbookError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData::new(&nonce_bytes, &ciphertext))
}

/// Decrypt ciphertext that was bound to `aad`
pub fn decrypt(encrypted: &EncryptedData, aad: &[u8], key: &CipherKey) -> CipherbookResult<Vec<u8>> {
    if encrypted.version != 1 {
        return Err(CipherbookError::Encryption(format!(
            "Unsupported encryption version: {}",
            encrypted.version
        )));
    }

    let cipher = cipher_for(key)?;

    let nonce_bytes = encrypted.decode_nonce()?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CipherbookError::Encryption(format!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = encrypted.decode_ciphertext()?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext.as_ref(),
                aad,
            },
        )
        .map_err(|_| {
            CipherbookError::Encryption("Decryption failed: invalid key or corrupted data".into())
        })
}

/// Serialize a record and encrypt it under `key`, bound to its id
pub fn seal<T: Serialize>(record: &T, id: &str, key: &CipherKey) -> CipherbookResult<EncryptedData> {
    let plaintext = Zeroizing::new(serde_json::to_vec(record)?);
    encrypt(&plaintext, id.as_bytes(), key)
}

/// Decrypt a payload stored under `id` and deserialize the record
pub fn open<T: DeserializeOwned>(
    encrypted: &EncryptedData,
    id: &str,
    key: &CipherKey,
) -> CipherbookResult<T> {
    let plaintext = Zeroizing::new(decrypt(encrypted, id.as_bytes(), key)?);
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher_key::KEY_LEN;
    use crate::models::{AccountId, Category, Money, Transaction};
    use chrono::NaiveDate;

    fn key(byte: u8) -> CipherKey {
        CipherKey::from_bytes([byte; KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt() {
        let k = key(1);
        let encrypted = encrypt(b"Hello, World!", b"id-1", &k).unwrap();
        let decrypted = decrypt(&encrypted, b"id-1", &k).unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_record_round_trip() {
        let k = key(2);
        let txn = Transaction::new(
            AccountId::new(),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            Money::from_cents(-4599),
        )
        .named("Groceries");
        let id = txn.id.wire();

        let sealed = seal(&txn, &id, &k).unwrap();
        let opened: Transaction = open(&sealed, &id, &k).unwrap();
        assert_eq!(opened, txn);
    }

    #[test]
    fn test_different_nonces() {
        let k = key(3);
        let a = encrypt(b"same", b"", &k).unwrap();
        let b = encrypt(b"same", b"", &k).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(b"secret", b"id", &key(4)).unwrap();
        assert!(decrypt(&encrypted, b"id", &key(5)).is_err());
    }

    #[test]
    fn test_payload_bound_to_id() {
        let k = key(6);
        let category = Category::new("Rent");
        let sealed = seal(&category, &category.id.wire(), &k).unwrap();
        let other = Category::new("Other");
        assert!(open::<Category>(&sealed, &other.id.wire(), &k).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let k = key(7);
        let mut encrypted = encrypt(b"Hello", b"id", &k).unwrap();

        let mut ciphertext = STANDARD.decode(&encrypted.ciphertext).unwrap();
        ciphertext[0] ^= 0xFF;
        encrypted.ciphertext = STANDARD.encode(&ciphertext);

        assert!(decrypt(&encrypted, b"id", &k).is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let k = key(8);
        let mut encrypted = encrypt(b"Hello", b"id", &k).unwrap();
        encrypted.version = 2;
        assert!(decrypt(&encrypted, b"id", &k).is_err());
    }
}
