//! Holder of the single active cipher key
//!
//! There is exactly one slot. Installing a key drops (and wipes) whatever was
//! there before; no history is kept, so a superseded key can never be used
//! again by accident. Only the session and the rotation coordinator hold a
//! `&mut KeyStore`; repositories get a shared reference for reads.

use std::fmt;

use zeroize::Zeroize;

use super::cipher_key::CipherKey;
use crate::error::{CipherbookError, CipherbookResult};

#[derive(Default)]
pub struct KeyStore {
    active: Option<CipherKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` the active key, discarding the previous one
    pub fn install(&mut self, key: CipherKey) {
        if let Some(mut previous) = self.active.replace(key) {
            previous.zeroize();
        }
    }

    /// The active key, if any
    pub fn current(&self) -> Option<&CipherKey> {
        self.active.as_ref()
    }

    /// The active key, or `Unauthenticated`
    pub fn require(&self) -> CipherbookResult<&CipherKey> {
        self.active.as_ref().ok_or(CipherbookError::Unauthenticated)
    }

    /// Wipe and drop the active key
    pub fn clear(&mut self) {
        if let Some(mut key) = self.active.take() {
            key.zeroize();
        }
    }

    pub fn is_installed(&self) -> bool {
        self.active.is_some()
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active {
            Some(key) => write!(f, "KeyStore({})", key.proof().short()),
            None => write!(f, "KeyStore(empty)"),
        }
    }
}
