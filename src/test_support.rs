//! Fixtures shared by unit tests

use std::sync::Arc;

use url::Url;

use crate::crypto::{CipherKey, Credential, KeyDerivationParams, KeyStore, KEY_LEN};
use crate::remote::{AuthTransport, MemoryRemote, ServerContext};

pub(crate) const USER: &str = "alice";
pub(crate) const PASSWORD: &str = "alice123";

pub(crate) fn server_url() -> Url {
    Url::parse("http://localhost:8000").unwrap()
}

/// Cheap Argon2 parameters
pub(crate) fn fast_kdf() -> KeyDerivationParams {
    KeyDerivationParams::with_values(1024, 1, 1)
}

pub(crate) fn key(byte: u8) -> CipherKey {
    CipherKey::from_bytes([byte; KEY_LEN])
}

pub(crate) fn keys_with(key: CipherKey) -> KeyStore {
    let mut keys = KeyStore::new();
    keys.install(key);
    keys
}

pub(crate) fn remote_with_alice() -> Arc<MemoryRemote> {
    Arc::new(MemoryRemote::new().with_user(USER, PASSWORD))
}

pub(crate) async fn connect(remote: &MemoryRemote) -> ServerContext {
    let token = remote
        .verify(&server_url(), USER, &Credential::from(PASSWORD))
        .await
        .unwrap();
    ServerContext::new(server_url(), token)
}
