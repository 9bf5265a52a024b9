//! External collaborators: the authentication service and the per-entity
//! record endpoints
//!
//! The server only ever sees record ids, encrypted payloads and key
//! fingerprints. Two implementations live here: `http` talks to the real REST
//! API, `memory` is an in-process stand-in used by tests and offline mode.

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto::{Credential, EncryptedData, KeyProof};
use crate::error::CipherbookResult;
use crate::models::EntityKind;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Bearer token issued by the authentication service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken([REDACTED])")
    }
}

/// Where to send authenticated calls
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub url: Url,
    pub token: AuthToken,
}

impl ServerContext {
    pub fn new(url: Url, token: AuthToken) -> Self {
        Self { url, token }
    }
}

/// One record as the server stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: String,
    pub payload: EncryptedData,
}

/// Body of a bulk write: every payload was sealed under the key `key_proof`
/// fingerprints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkWrite {
    pub key_proof: KeyProof,
    pub records: Vec<EncryptedRecord>,
}

/// Body of a server-mediated re-encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchange {
    pub old_key_proof: KeyProof,
    pub new_key_proof: KeyProof,
    pub records: Vec<EncryptedRecord>,
}

/// Issues and manages bearer tokens
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange a username and credential for a token
    async fn verify(
        &self,
        server_url: &Url,
        username: &str,
        credential: &Credential,
    ) -> CipherbookResult<AuthToken>;

    /// Make `new_credential` the one checked at next login
    async fn change_credential(
        &self,
        server: &ServerContext,
        new_credential: &Credential,
    ) -> CipherbookResult<()>;

    /// Invalidate the token in `server`
    async fn revoke(&self, server: &ServerContext) -> CipherbookResult<()>;
}

/// The four per-entity record endpoints
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every stored record of `kind`
    async fn fetch_all(
        &self,
        server: &ServerContext,
        kind: EntityKind,
    ) -> CipherbookResult<Vec<EncryptedRecord>>;

    /// Upsert records; accepted all-or-nothing
    async fn bulk_write(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        write: BulkWrite,
    ) -> CipherbookResult<()>;

    /// Replace every stored payload of `kind`, moving the repository from the
    /// old key fingerprint to the new one
    async fn reencrypt(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        exchange: KeyExchange,
    ) -> CipherbookResult<()>;

    async fn delete(&self, server: &ServerContext, kind: EntityKind, id: &str)
        -> CipherbookResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AuthToken::new("abc123");
        assert_eq!(format!("{:?}", token), "AuthToken([REDACTED])");
        assert_eq!(token.as_str(), "abc123");
    }

    #[test]
    fn test_bulk_write_wire_shape() {
        let write = BulkWrite {
            key_proof: crate::crypto::CipherKey::from_bytes([1u8; 32]).proof(),
            records: vec![],
        };
        let json = serde_json::to_value(&write).unwrap();
        assert!(json["key_proof"].is_string());
        assert!(json["records"].as_array().unwrap().is_empty());
    }
}
