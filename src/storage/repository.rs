//! Generic encrypted entity repository
//!
//! One `EntityRepository<T>` per record kind. The remote copy is always
//! ciphertext; the local cache holds decrypted records for the lifetime of a
//! session and is dropped by `flush()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::crypto::{decrypt, encrypt, open, seal, CipherKey, KeyStore};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::{Entity, EntityKind};
use crate::remote::{BulkWrite, EncryptedRecord, KeyExchange, RemoteStore, ServerContext};

fn lock_error<E: std::fmt::Display>(e: E) -> CipherbookError {
    CipherbookError::Storage(format!("Failed to acquire cache lock: {}", e))
}

/// Cache plus remote sync for one record kind
pub struct EntityRepository<T: Entity> {
    remote: Arc<dyn RemoteStore>,
    /// `None` until the first successful read after login
    cache: RwLock<Option<BTreeMap<String, T>>>,
    /// Bumped by every flush so an in-flight read can tell it lost the race
    generation: AtomicU64,
    /// Set when an aborted rotation may have re-keyed the server copy
    diverged: AtomicBool,
}

impl<T: Entity> EntityRepository<T> {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
            diverged: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    /// Whether the snapshot has been loaded this session
    pub fn is_materialized(&self) -> bool {
        self.cache
            .read()
            .map(|cache| cache.is_some())
            .unwrap_or(false)
    }

    pub fn is_diverged(&self) -> bool {
        self.diverged.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_diverged(&self) {
        self.diverged.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_diverged(&self) {
        self.diverged.store(false, Ordering::SeqCst);
    }

    /// Number of cached records, `None` if not materialized
    pub fn cached_len(&self) -> CipherbookResult<Option<usize>> {
        let cache = self.cache.read().map_err(lock_error)?;
        Ok(cache.as_ref().map(BTreeMap::len))
    }

    fn decrypt_failure(&self, err: CipherbookError) -> CipherbookError {
        match err {
            CipherbookError::Encryption(_) if self.is_diverged() => {
                CipherbookError::PartialRotationInconsistency { kind: T::KIND }
            }
            other => other,
        }
    }

    fn filter_cached<F>(&self, criteria: &F) -> CipherbookResult<Option<Vec<T>>>
    where
        F: Fn(&T) -> bool,
    {
        let cache = self.cache.read().map_err(lock_error)?;
        Ok(cache
            .as_ref()
            .map(|records| records.values().filter(|r| criteria(r)).cloned().collect()))
    }

    async fn fetch_decrypted(
        &self,
        server: &ServerContext,
        key: &CipherKey,
    ) -> CipherbookResult<BTreeMap<String, T>> {
        let fetched = self.remote.fetch_all(server, T::KIND).await?;
        fetched
            .into_iter()
            .map(|record| {
                let value: T = open(&record.payload, &record.id, key)
                    .map_err(|e| self.decrypt_failure(e))?;
                Ok((record.id, value))
            })
            .collect()
    }

    /// Records matching `criteria`, decrypted under the active key
    ///
    /// The first read after login fetches and caches the whole snapshot;
    /// later reads are served from the cache.
    #[instrument(skip_all, fields(kind = %T::KIND))]
    pub async fn read<F>(
        &self,
        keys: &KeyStore,
        server: &ServerContext,
        criteria: F,
    ) -> CipherbookResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        let key = keys.require()?;
        if let Some(records) = self.filter_cached(&criteria)? {
            return Ok(records);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let fetched = self.fetch_decrypted(server, key).await?;

        let mut cache = self.cache.write().map_err(lock_error)?;
        if self.generation.load(Ordering::SeqCst) != generation {
            warn!("cache flushed during read, discarding fetched records");
            return Err(CipherbookError::InvalidState(format!(
                "{} cache was flushed while a read was in flight",
                T::KIND
            )));
        }
        debug!(count = fetched.len(), "snapshot materialized");
        let records = cache.get_or_insert(fetched);
        Ok(records.values().filter(|r| criteria(r)).cloned().collect())
    }

    /// Every record
    pub async fn read_all(
        &self,
        keys: &KeyStore,
        server: &ServerContext,
    ) -> CipherbookResult<Vec<T>> {
        self.read(keys, server, |_| true).await
    }

    /// A single record by wire id
    pub async fn get(
        &self,
        keys: &KeyStore,
        server: &ServerContext,
        id: &str,
    ) -> CipherbookResult<T> {
        self.read(keys, server, |r| r.record_id() == id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CipherbookError::record_not_found(T::KIND, id))
    }

    /// Encrypt `record` under the active key, store it remotely, then cache it
    #[instrument(skip_all, fields(kind = %T::KIND))]
    pub async fn put(
        &self,
        keys: &KeyStore,
        server: &ServerContext,
        record: T,
    ) -> CipherbookResult<()> {
        let key = keys.require()?;
        record.validate()?;
        let id = record.record_id();
        let payload = seal(&record, &id, key)?;

        self.remote
            .bulk_write(
                server,
                T::KIND,
                BulkWrite {
                    key_proof: key.proof(),
                    records: vec![EncryptedRecord {
                        id: id.clone(),
                        payload,
                    }],
                },
            )
            .await?;

        let mut cache = self.cache.write().map_err(lock_error)?;
        if let Some(records) = cache.as_mut() {
            records.insert(id, record);
        }
        Ok(())
    }

    /// Delete a record remotely, then drop it from the cache
    #[instrument(skip(self, keys, server), fields(kind = %T::KIND))]
    pub async fn remove(
        &self,
        keys: &KeyStore,
        server: &ServerContext,
        id: &str,
    ) -> CipherbookResult<()> {
        keys.require()?;
        self.remote.delete(server, T::KIND, id).await?;

        let mut cache = self.cache.write().map_err(lock_error)?;
        if let Some(records) = cache.as_mut() {
            records.remove(id);
        }
        Ok(())
    }

    /// Drop the cache and invalidate any in-flight read
    ///
    /// Idempotent. Never fails: a poisoned lock is still cleared.
    pub fn flush(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Push the cached snapshot re-encrypted under `new_key`
    ///
    /// Plaintext and ids are untouched locally whether or not the write is
    /// accepted.
    #[instrument(skip_all, fields(kind = %T::KIND, proof = new_key.proof().short()))]
    pub async fn encrypt_under(
        &self,
        new_key: &CipherKey,
        server: &ServerContext,
    ) -> CipherbookResult<()> {
        let records = {
            let cache = self.cache.read().map_err(lock_error)?;
            let snapshot = cache
                .as_ref()
                .ok_or(CipherbookError::NotMaterialized(T::KIND))?;
            snapshot
                .iter()
                .map(|(id, record)| {
                    Ok(EncryptedRecord {
                        id: id.clone(),
                        payload: seal(record, id, new_key)?,
                    })
                })
                .collect::<CipherbookResult<Vec<_>>>()?
        };

        debug!(count = records.len(), "pushing re-encrypted snapshot");
        self.remote
            .bulk_write(
                server,
                T::KIND,
                BulkWrite {
                    key_proof: new_key.proof(),
                    records,
                },
            )
            .await
    }

    /// Re-key the server copy without a local snapshot
    ///
    /// Payloads are fetched, opened under `old_key` and sealed under
    /// `new_key` transiently; nothing is cached.
    #[instrument(skip_all, fields(kind = %T::KIND, proof = new_key.proof().short()))]
    pub async fn update_server_encryption(
        &self,
        server: &ServerContext,
        new_key: &CipherKey,
        old_key: &CipherKey,
    ) -> CipherbookResult<()> {
        let fetched = self.remote.fetch_all(server, T::KIND).await?;

        // An earlier attempt landed but its acknowledgement was lost
        if !fetched.is_empty()
            && fetched.iter().all(|r| {
                decrypt(&r.payload, r.id.as_bytes(), new_key)
                    .map(Zeroizing::new)
                    .is_ok()
            })
        {
            debug!("server copy is already under the new key");
            return Ok(());
        }

        let records = fetched
            .into_iter()
            .map(|record| {
                let aad = record.id.as_bytes();
                let plaintext = Zeroizing::new(
                    decrypt(&record.payload, aad, old_key).map_err(|e| self.decrypt_failure(e))?,
                );
                let payload = encrypt(&plaintext, aad, new_key)?;
                Ok(EncryptedRecord {
                    id: record.id,
                    payload,
                })
            })
            .collect::<CipherbookResult<Vec<_>>>()?;

        debug!(count = records.len(), "requesting server key exchange");
        self.remote
            .reencrypt(
                server,
                T::KIND,
                KeyExchange {
                    old_key_proof: old_key.proof(),
                    new_key_proof: new_key.proof(),
                    records,
                },
            )
            .await
    }
}

/// The view of a repository the rotation coordinator works with
#[async_trait]
pub trait RotationParticipant: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn is_materialized(&self) -> bool;

    async fn encrypt_under(
        &self,
        new_key: &CipherKey,
        server: &ServerContext,
    ) -> CipherbookResult<()>;

    async fn update_server_encryption(
        &self,
        server: &ServerContext,
        new_key: &CipherKey,
        old_key: &CipherKey,
    ) -> CipherbookResult<()>;

    /// The server copy may no longer be under the active key
    fn mark_diverged(&self);

    /// The server copy is known to be under the active key again
    fn clear_diverged(&self);
}

#[async_trait]
impl<T: Entity> RotationParticipant for EntityRepository<T> {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    fn is_materialized(&self) -> bool {
        EntityRepository::is_materialized(self)
    }

    async fn encrypt_under(
        &self,
        new_key: &CipherKey,
        server: &ServerContext,
    ) -> CipherbookResult<()> {
        EntityRepository::encrypt_under(self, new_key, server).await
    }

    async fn update_server_encryption(
        &self,
        server: &ServerContext,
        new_key: &CipherKey,
        old_key: &CipherKey,
    ) -> CipherbookResult<()> {
        EntityRepository::update_server_encryption(self, server, new_key, old_key).await
    }

    fn mark_diverged(&self) {
        EntityRepository::mark_diverged(self);
    }

    fn clear_diverged(&self) {
        EntityRepository::clear_diverged(self);
    }
}
