//! In-process sync server
//!
//! Behaves like the real server where the key lifecycle cares: it only holds
//! ciphertext, it remembers which key fingerprint each collection is under,
//! and it refuses writes that would leave a collection holding payloads from
//! two different keys. Faults can be injected per entity kind.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{
    AuthToken, AuthTransport, BulkWrite, EncryptedRecord, KeyExchange, RemoteStore,
    ServerContext,
};
use crate::crypto::{Credential, EncryptedData, KeyProof};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::EntityKind;

#[derive(Debug, Default)]
struct Collection {
    key_proof: Option<KeyProof>,
    records: BTreeMap<String, EncryptedData>,
}

#[derive(Debug, Default, Clone)]
struct Fault {
    reject_writes: Option<String>,
    transport_failures: u32,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct ServerState {
    users: HashMap<String, String>,
    tokens: HashMap<String, String>,
    collections: HashMap<(String, EntityKind), Collection>,
    faults: HashMap<EntityKind, Fault>,
    reject_credential_change: Option<String>,
}

impl ServerState {
    fn user_for(&self, token: &AuthToken) -> CipherbookResult<String> {
        self.tokens
            .get(token.as_str())
            .cloned()
            .ok_or_else(|| CipherbookError::Auth("Invalid token".into()))
    }

    /// Apply injected write faults for `kind`
    fn check_write(&mut self, kind: EntityKind) -> CipherbookResult<()> {
        let Some(fault) = self.faults.get_mut(&kind) else {
            return Ok(());
        };
        if let Some(message) = &fault.reject_writes {
            return Err(CipherbookError::Validation(message.clone()));
        }
        if fault.transport_failures > 0 {
            fault.transport_failures -= 1;
            return Err(CipherbookError::Transport(format!(
                "connection reset while writing {}",
                kind.endpoint()
            )));
        }
        Ok(())
    }

    fn collection(&mut self, user: String, kind: EntityKind) -> &mut Collection {
        self.collections.entry((user, kind)).or_default()
    }
}

fn check_records(records: &[EncryptedRecord]) -> CipherbookResult<()> {
    for record in records {
        if record.id.trim().is_empty() {
            return Err(CipherbookError::Validation("record id may not be blank".into()));
        }
        if record.payload.ciphertext.is_empty() || record.payload.nonce.is_empty() {
            return Err(CipherbookError::Validation(format!(
                "record {} has an empty payload",
                record.id
            )));
        }
    }
    Ok(())
}

/// An in-memory server implementing both collaborator traits
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<ServerState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account
    pub fn with_user(self, username: &str, password: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.users.insert(username.to_string(), password.to_string());
        }
        self
    }

    fn state(&self) -> CipherbookResult<MutexGuard<'_, ServerState>> {
        self.state
            .lock()
            .map_err(|_| CipherbookError::Storage("in-memory server state poisoned".into()))
    }

    fn update_fault(&self, kind: EntityKind, f: impl FnOnce(&mut Fault)) {
        if let Ok(mut state) = self.state.lock() {
            f(state.faults.entry(kind).or_default());
        }
    }

    /// Every write to `kind` is rejected as malformed
    pub fn reject_writes(&self, kind: EntityKind, message: &str) {
        self.update_fault(kind, |fault| fault.reject_writes = Some(message.to_string()));
    }

    /// The next `times` writes to `kind` fail at the transport level
    pub fn fail_transport(&self, kind: EntityKind, times: u32) {
        self.update_fault(kind, |fault| fault.transport_failures = times);
    }

    /// Every call touching `kind` waits `delay` first
    pub fn delay(&self, kind: EntityKind, delay: Duration) {
        self.update_fault(kind, |fault| fault.delay = Some(delay));
    }

    /// Storing a new credential fails
    pub fn reject_credential_change(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_credential_change = Some(message.to_string());
        }
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.clear();
            state.reject_credential_change = None;
        }
    }

    /// Key fingerprint `kind` is currently stored under for `username`
    pub fn key_proof(&self, username: &str, kind: EntityKind) -> Option<KeyProof> {
        let state = self.state.lock().ok()?;
        state
            .collections
            .get(&(username.to_string(), kind))
            .and_then(|c| c.key_proof.clone())
    }

    /// Ids stored for `username` under `kind`
    pub fn stored_ids(&self, username: &str, kind: EntityKind) -> Vec<String> {
        self.state
            .lock()
            .map(|state| {
                state
                    .collections
                    .get(&(username.to_string(), kind))
                    .map(|c| c.records.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Whether `credential` is the one the server will accept for `username`
    pub fn accepts(&self, username: &str, credential: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.users.get(username).map(String::as_str) == Some(credential))
            .unwrap_or(false)
    }

    pub fn is_token_valid(&self, token: &AuthToken) -> bool {
        self.state
            .lock()
            .map(|state| state.tokens.contains_key(token.as_str()))
            .unwrap_or(false)
    }

    async fn pause_for(&self, kind: EntityKind) -> CipherbookResult<()> {
        let delay = self.state()?.faults.get(&kind).and_then(|f| f.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl AuthTransport for MemoryRemote {
    async fn verify(
        &self,
        _server_url: &Url,
        username: &str,
        credential: &Credential,
    ) -> CipherbookResult<AuthToken> {
        let mut state = self.state()?;
        if state.users.get(username).map(String::as_str) != Some(credential.expose()) {
            return Err(CipherbookError::Auth(
                "Unable to log in with the provided credentials".into(),
            ));
        }
        let token = Uuid::new_v4().simple().to_string();
        state.tokens.insert(token.clone(), username.to_string());
        Ok(AuthToken::new(token))
    }

    async fn change_credential(
        &self,
        server: &ServerContext,
        new_credential: &Credential,
    ) -> CipherbookResult<()> {
        let mut state = self.state()?;
        let user = state.user_for(&server.token)?;
        if let Some(message) = &state.reject_credential_change {
            return Err(CipherbookError::Transport(message.clone()));
        }
        if new_credential.is_empty() {
            return Err(CipherbookError::Validation("new_password1: This field may not be blank".into()));
        }
        state.users.insert(user, new_credential.expose().to_string());
        Ok(())
    }

    async fn revoke(&self, server: &ServerContext) -> CipherbookResult<()> {
        let mut state = self.state()?;
        state
            .tokens
            .remove(server.token.as_str())
            .map(|_| ())
            .ok_or_else(|| CipherbookError::Auth("Invalid token".into()))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_all(
        &self,
        server: &ServerContext,
        kind: EntityKind,
    ) -> CipherbookResult<Vec<EncryptedRecord>> {
        self.pause_for(kind).await?;
        let mut state = self.state()?;
        let user = state.user_for(&server.token)?;
        let collection = state.collection(user, kind);
        Ok(collection
            .records
            .iter()
            .map(|(id, payload)| EncryptedRecord {
                id: id.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    async fn bulk_write(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        write: BulkWrite,
    ) -> CipherbookResult<()> {
        self.pause_for(kind).await?;
        let mut state = self.state()?;
        let user = state.user_for(&server.token)?;
        state.check_write(kind)?;
        check_records(&write.records)?;

        let collection = state.collection(user, kind);
        if let Some(current) = &collection.key_proof {
            if *current != write.key_proof {
                // A write under another key must replace everything stored
                let incoming: BTreeSet<&str> = write.records.iter().map(|r| r.id.as_str()).collect();
                let uncovered = collection
                    .records
                    .keys()
                    .filter(|id| !incoming.contains(id.as_str()))
                    .count();
                if uncovered > 0 {
                    return Err(CipherbookError::Validation(format!(
                        "key_proof does not match the collection key and {} stored record(s) would be left under the old key",
                        uncovered
                    )));
                }
                debug!(kind = %kind, proof = write.key_proof.short(), "collection re-keyed by bulk write");
            }
        }

        collection.key_proof = Some(write.key_proof);
        for record in write.records {
            collection.records.insert(record.id, record.payload);
        }
        Ok(())
    }

    async fn reencrypt(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        exchange: KeyExchange,
    ) -> CipherbookResult<()> {
        self.pause_for(kind).await?;
        let mut state = self.state()?;
        let user = state.user_for(&server.token)?;
        state.check_write(kind)?;
        check_records(&exchange.records)?;

        let collection = state.collection(user, kind);
        if let Some(current) = &collection.key_proof {
            if *current != exchange.old_key_proof {
                return Err(CipherbookError::Validation(
                    "old_key_proof does not match the collection key".into(),
                ));
            }
        }

        let stored: BTreeSet<&str> = collection.records.keys().map(String::as_str).collect();
        let incoming: BTreeSet<&str> = exchange.records.iter().map(|r| r.id.as_str()).collect();
        if stored != incoming {
            return Err(CipherbookError::Validation(
                "records must match the stored ids exactly".into(),
            ));
        }

        collection.key_proof = Some(exchange.new_key_proof);
        collection.records = exchange
            .records
            .into_iter()
            .map(|r| (r.id, r.payload))
            .collect();
        Ok(())
    }

    async fn delete(
        &self,
        server: &ServerContext,
        kind: EntityKind,
        id: &str,
    ) -> CipherbookResult<()> {
        self.pause_for(kind).await?;
        let mut state = self.state()?;
        let user = state.user_for(&server.token)?;
        state.check_write(kind)?;
        state
            .collection(user, kind)
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CipherbookError::Validation(format!("No {} with id {}", kind, id)))
    }
}
