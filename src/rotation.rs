//! Credential rotation across every entity repository
//!
//! A rotation derives the new key, re-keys all four server collections
//! concurrently and only then stores the new credential and installs the new
//! key. Any failure leaves the old key active. Repositories that were already
//! re-keyed when another one failed are reported as diverged; nothing tries to
//! roll them back.
//!
//! The fan-out runs in its own task. If the caller stops waiting, the sweep
//! still finishes and the coordinator refuses new rotations until it has.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::crypto::{CipherKey, Credential, CredentialHasher, KeyProof, KeyStore};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::EntityKind;
use crate::remote::{AuthToken, AuthTransport, ServerContext};
use crate::storage::RotationParticipant;

/// Where the coordinator is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Idle,
    Hashing,
    Rotating,
    Committed,
    Aborted,
}

impl RotationPhase {
    /// A rotation is underway and a new one must be refused
    pub fn is_busy(&self) -> bool {
        matches!(self, RotationPhase::Hashing | RotationPhase::Rotating)
    }
}

/// Deadline and retry budget for each repository call
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub call_timeout: Duration,
    pub max_attempts: u32,
}

impl RotationPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            call_timeout: settings.rotation_timeout(),
            max_attempts: settings.rotation_max_attempts.max(1),
        }
    }
}

/// Everything a sweep needs; built once per credential change
pub struct RotationRequest {
    pub old_key: CipherKey,
    pub new_key: CipherKey,
    pub new_credential: Credential,
    pub token: AuthToken,
    pub server_url: Url,
}

impl RotationRequest {
    fn server(&self) -> ServerContext {
        ServerContext::new(self.server_url.clone(), self.token.clone())
    }
}

/// How a repository was moved to the new key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// The cached snapshot was re-encrypted locally and bulk-written
    Snapshot,
    /// Payloads were fetched, re-encrypted and swapped through the key exchange
    ServerExchange,
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStrategy::Snapshot => write!(f, "snapshot"),
            RotationStrategy::ServerExchange => write!(f, "server exchange"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOutcome {
    pub kind: EntityKind,
    pub strategy: RotationStrategy,
    pub attempts: u32,
}

/// Report of a committed rotation
#[derive(Debug, Clone)]
pub struct RotationCommit {
    /// Fingerprint of the key now active
    pub key_proof: KeyProof,
    /// One entry per repository, in `EntityKind` order
    pub repositories: Vec<RepositoryOutcome>,
}

type SweepOutcome = CipherbookResult<RotationCommit>;

/// Run Argon2 on the blocking pool
pub(crate) async fn derive_off_thread(
    hasher: CredentialHasher,
    credential: Credential,
) -> CipherbookResult<CipherKey> {
    tokio::task::spawn_blocking(move || hasher.derive(&credential))
        .await
        .map_err(|e| CipherbookError::Encryption(format!("Key derivation task failed: {}", e)))?
}

fn set_phase(phase: &Mutex<RotationPhase>, next: RotationPhase) {
    *phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Resets the phase to `Idle` if hashing is abandoned or fails
struct HashingGuard {
    phase: Arc<Mutex<RotationPhase>>,
    armed: bool,
}

impl HashingGuard {
    fn hand_off(mut self) {
        set_phase(&self.phase, RotationPhase::Rotating);
        self.armed = false;
    }
}

impl Drop for HashingGuard {
    fn drop(&mut self) {
        if self.armed {
            set_phase(&self.phase, RotationPhase::Idle);
        }
    }
}

pub struct RotationCoordinator {
    phase: Arc<Mutex<RotationPhase>>,
    auth: Arc<dyn AuthTransport>,
    policy: RotationPolicy,
}

impl RotationCoordinator {
    pub fn new(auth: Arc<dyn AuthTransport>, policy: RotationPolicy) -> Self {
        Self {
            phase: Arc::new(Mutex::new(RotationPhase::Idle)),
            auth,
            policy,
        }
    }

    pub fn phase(&self) -> RotationPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> CipherbookResult<HashingGuard> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.is_busy() {
            return Err(CipherbookError::RotationInProgress);
        }
        *phase = RotationPhase::Hashing;
        Ok(HashingGuard {
            phase: self.phase.clone(),
            armed: true,
        })
    }

    /// Move every participant to the key derived from `new_credential`
    ///
    /// On success the new key is installed in `keys`. On failure `keys` is
    /// untouched and the error is `RotationAborted` (or a rejection raised
    /// before any repository was contacted).
    pub async fn rotate(
        &self,
        keys: &mut KeyStore,
        hasher: CredentialHasher,
        new_credential: Credential,
        server: &ServerContext,
        participants: Vec<Arc<dyn RotationParticipant>>,
    ) -> CipherbookResult<RotationCommit> {
        let old_key = keys.require()?.clone();
        let guard = self.begin()?;

        let new_key = derive_off_thread(hasher, new_credential.clone()).await?;

        if new_key == old_key {
            return Err(CipherbookError::Validation(
                "The new password must differ from the current one".into(),
            ));
        }

        let request = Arc::new(RotationRequest {
            old_key,
            new_key,
            new_credential,
            token: server.token.clone(),
            server_url: server.url.clone(),
        });

        info!(
            proof = request.new_key.proof().short(),
            repositories = participants.len(),
            "starting credential rotation"
        );
        guard.hand_off();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(sweep(
            request.clone(),
            participants,
            self.auth.clone(),
            self.policy.clone(),
            self.phase.clone(),
            tx,
        ));

        let outcome = rx.await.map_err(|_| {
            set_phase(&self.phase, RotationPhase::Aborted);
            CipherbookError::Storage("Rotation sweep ended without reporting an outcome".into())
        })?;
        let commit = outcome?;

        keys.install(request.new_key.clone());
        info!(proof = commit.key_proof.short(), "credential rotation committed");
        Ok(commit)
    }
}

/// Run the fan-out to completion, record the final phase and report
async fn sweep(
    request: Arc<RotationRequest>,
    participants: Vec<Arc<dyn RotationParticipant>>,
    auth: Arc<dyn AuthTransport>,
    policy: RotationPolicy,
    phase: Arc<Mutex<RotationPhase>>,
    tx: oneshot::Sender<SweepOutcome>,
) {
    let outcome = run_sweep(&request, &participants, auth.as_ref(), &policy).await;
    let committed = outcome.is_ok();
    set_phase(
        &phase,
        if committed {
            RotationPhase::Committed
        } else {
            RotationPhase::Aborted
        },
    );

    if tx.send(outcome).is_err() {
        warn!("rotation finished after its caller went away");
        if committed {
            // The server moved on but nobody will install the new key
            for participant in &participants {
                participant.mark_diverged();
            }
        }
    }
}

async fn run_sweep(
    request: &Arc<RotationRequest>,
    participants: &[Arc<dyn RotationParticipant>],
    auth: &dyn AuthTransport,
    policy: &RotationPolicy,
) -> SweepOutcome {
    let mut tasks = JoinSet::new();
    for participant in participants.iter().cloned() {
        let request = request.clone();
        let policy = policy.clone();
        tasks.spawn(async move {
            let result = rotate_one(participant.as_ref(), &request, &policy).await;
            (participant, result)
        });
    }

    let mut succeeded: Vec<(Arc<dyn RotationParticipant>, RepositoryOutcome)> = Vec::new();
    let mut first_failure: Option<CipherbookError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((participant, Ok(outcome))) => {
                debug!(kind = %outcome.kind, strategy = %outcome.strategy, "repository re-keyed");
                succeeded.push((participant, outcome));
            }
            Ok((participant, Err(err))) => {
                warn!(kind = %participant.kind(), error = %err, "repository failed to re-key");
                first_failure.get_or_insert(err);
            }
            Err(join_err) => {
                first_failure.get_or_insert(CipherbookError::Storage(format!(
                    "Rotation task failed: {}",
                    join_err
                )));
            }
        }
    }
    succeeded.sort_by_key(|(_, outcome)| outcome.kind);

    if let Some(cause) = first_failure {
        let diverged: Vec<EntityKind> = succeeded.iter().map(|(_, o)| o.kind).collect();
        for (participant, _) in &succeeded {
            participant.mark_diverged();
        }
        warn!(?diverged, "credential rotation aborted");
        return Err(CipherbookError::RotationAborted {
            cause: Box::new(cause),
            diverged,
        });
    }

    let server = request.server();
    let stored = match timeout(
        policy.call_timeout,
        auth.change_credential(&server, &request.new_credential),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(CipherbookError::Timeout(
            "Storing the new credential timed out".into(),
        )),
    };
    if let Err(cause) = stored {
        for participant in participants {
            participant.mark_diverged();
        }
        warn!(error = %cause, "every repository re-keyed but the credential was not stored");
        return Err(CipherbookError::RotationAborted {
            cause: Box::new(cause),
            diverged: participants.iter().map(|p| p.kind()).collect(),
        });
    }

    for participant in participants {
        participant.clear_diverged();
    }
    Ok(RotationCommit {
        key_proof: request.new_key.proof(),
        repositories: succeeded.into_iter().map(|(_, outcome)| outcome).collect(),
    })
}

/// Re-key one repository, retrying transport failures within the budget
async fn rotate_one(
    participant: &dyn RotationParticipant,
    request: &RotationRequest,
    policy: &RotationPolicy,
) -> CipherbookResult<RepositoryOutcome> {
    let kind = participant.kind();
    let server = request.server();
    let mut strategy = if participant.is_materialized() {
        RotationStrategy::Snapshot
    } else {
        RotationStrategy::ServerExchange
    };
    let mut attempts = 0;

    loop {
        attempts += 1;
        let call = async {
            match strategy {
                RotationStrategy::Snapshot => {
                    participant.encrypt_under(&request.new_key, &server).await
                }
                RotationStrategy::ServerExchange => {
                    participant
                        .update_server_encryption(&server, &request.new_key, &request.old_key)
                        .await
                }
            }
        };

        let result = match timeout(policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CipherbookError::Timeout(format!(
                "{} repository did not answer within {:?}",
                kind, policy.call_timeout
            ))),
        };

        match result {
            Ok(()) => {
                return Ok(RepositoryOutcome {
                    kind,
                    strategy,
                    attempts,
                })
            }
            // Flushed between the strategy choice and the call
            Err(CipherbookError::NotMaterialized(_)) if strategy == RotationStrategy::Snapshot => {
                strategy = RotationStrategy::ServerExchange;
                attempts -= 1;
            }
            Err(err) => {
                if matches!(err, CipherbookError::Transport(_) | CipherbookError::Timeout(_)) {
                    // The write may have landed before the failure
                    participant.mark_diverged();
                }
                if !(err.is_retryable() && attempts < policy.max_attempts) {
                    return Err(err);
                }
                warn!(kind = %kind, attempts, error = %err, "retrying repository re-key");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountId, Category, Change, Goal, Money, Transaction};
    use crate::remote::{BulkWrite, EncryptedRecord, KeyExchange, MemoryRemote, RemoteStore};
    use crate::storage::Repositories;
    use crate::test_support::{connect, fast_kdf, remote_with_alice, PASSWORD, USER};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Applies the first goal key exchange, then reports a reset connection
    struct LostAck {
        inner: Arc<MemoryRemote>,
        pending: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for LostAck {
        async fn fetch_all(
            &self,
            server: &ServerContext,
            kind: EntityKind,
        ) -> CipherbookResult<Vec<EncryptedRecord>> {
            self.inner.fetch_all(server, kind).await
        }

        async fn bulk_write(
            &self,
            server: &ServerContext,
            kind: EntityKind,
            write: BulkWrite,
        ) -> CipherbookResult<()> {
            self.inner.bulk_write(server, kind, write).await
        }

        async fn reencrypt(
            &self,
            server: &ServerContext,
            kind: EntityKind,
            exchange: KeyExchange,
        ) -> CipherbookResult<()> {
            self.inner.reencrypt(server, kind, exchange).await?;
            if kind == EntityKind::Goal && self.pending.swap(false, Ordering::SeqCst) {
                return Err(CipherbookError::Transport("connection reset".into()));
            }
            Ok(())
        }

        async fn delete(
            &self,
            server: &ServerContext,
            kind: EntityKind,
            id: &str,
        ) -> CipherbookResult<()> {
            self.inner.delete(server, kind, id).await
        }
    }

    /// Same records as `fixture`, with repositories talking through `LostAck`
    async fn lost_ack_fixture() -> Fixture {
        let remote = remote_with_alice();
        let lossy = Arc::new(LostAck {
            inner: remote.clone(),
            pending: AtomicBool::new(true),
        });
        let server = connect(&remote).await;
        let repos = Repositories::new(lossy);
        let hasher = CredentialHasher::new(USER, &fast_kdf()).unwrap();
        let mut keys = KeyStore::new();
        keys.install(hasher.derive(&Credential::from(PASSWORD)).unwrap());

        let rent = Category::new("Rent");
        let change = Change::created(&rent);
        repos.categories.put(&keys, &server, rent).await.unwrap();
        repos.changes.put(&keys, &server, change).await.unwrap();
        repos
            .goals
            .put(&keys, &server, Goal::new("Holiday", Money::from_cents(200000)))
            .await
            .unwrap();

        Fixture {
            remote,
            server,
            repos,
            keys,
            hasher,
        }
    }

    struct Fixture {
        remote: Arc<MemoryRemote>,
        server: ServerContext,
        repos: Repositories,
        keys: KeyStore,
        hasher: CredentialHasher,
    }

    impl Fixture {
        fn coordinator(&self, call_timeout: Duration) -> RotationCoordinator {
            RotationCoordinator::new(
                self.remote.clone(),
                RotationPolicy {
                    call_timeout,
                    max_attempts: 2,
                },
            )
        }

        async fn rotate_to(
            &mut self,
            coordinator: &RotationCoordinator,
            credential: &str,
        ) -> CipherbookResult<RotationCommit> {
            coordinator
                .rotate(
                    &mut self.keys,
                    self.hasher.clone(),
                    Credential::from(credential),
                    &self.server,
                    self.repos.participants(),
                )
                .await
        }
    }

    /// One record per kind under the old key; categories and transactions
    /// materialized, change log and goals not
    async fn fixture() -> Fixture {
        let remote = remote_with_alice();
        let server = connect(&remote).await;
        let repos = Repositories::new(remote.clone());
        let hasher = CredentialHasher::new(USER, &fast_kdf()).unwrap();
        let mut keys = KeyStore::new();
        keys.install(hasher.derive(&Credential::from(PASSWORD)).unwrap());

        let rent = Category::new("Rent");
        let txn = Transaction::new(
            AccountId::new(),
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            Money::from_cents(-150000),
        )
        .named("May rent")
        .in_category(rent.id);
        let change = Change::created(&txn);
        let goal = Goal::new("Holiday", Money::from_cents(200000));

        repos.categories.put(&keys, &server, rent).await.unwrap();
        repos.transactions.put(&keys, &server, txn).await.unwrap();
        repos.changes.put(&keys, &server, change).await.unwrap();
        repos.goals.put(&keys, &server, goal).await.unwrap();

        repos.categories.read_all(&keys, &server).await.unwrap();
        repos.transactions.read_all(&keys, &server).await.unwrap();

        Fixture {
            remote,
            server,
            repos,
            keys,
            hasher,
        }
    }

    #[tokio::test]
    async fn test_all_repositories_succeed_commits() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();

        let commit = fx.rotate_to(&coordinator, "alice456").await.unwrap();
        let new = fx.hasher.derive(&Credential::from("alice456")).unwrap();

        assert_eq!(coordinator.phase(), RotationPhase::Committed);
        assert_eq!(fx.keys.current(), Some(&new));
        assert_ne!(fx.keys.current(), Some(&old));
        assert_eq!(commit.key_proof, new.proof());
        assert!(fx.remote.accepts(USER, "alice456"));

        let strategies: Vec<_> = commit
            .repositories
            .iter()
            .map(|o| (o.kind, o.strategy))
            .collect();
        assert_eq!(
            strategies,
            vec![
                (EntityKind::Category, RotationStrategy::Snapshot),
                (EntityKind::Transaction, RotationStrategy::Snapshot),
                (EntityKind::Change, RotationStrategy::ServerExchange),
                (EntityKind::Goal, RotationStrategy::ServerExchange),
            ]
        );
        for kind in EntityKind::ALL {
            assert_eq!(fx.remote.key_proof(USER, kind), Some(new.proof()));
        }

        // Fresh reads open under the new key
        fx.repos.flush_all();
        let txns = fx.repos.transactions.read_all(&fx.keys, &fx.server).await.unwrap();
        assert_eq!(txns[0].name, "May rent");
        assert_eq!(fx.repos.goals.read_all(&fx.keys, &fx.server).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_and_keeps_old_key() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();
        fx.remote
            .reject_writes(EntityKind::Change, "records: payload is not valid");

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();

        assert_eq!(coordinator.phase(), RotationPhase::Aborted);
        assert_eq!(fx.keys.current(), Some(&old));
        assert!(fx.remote.accepts(USER, PASSWORD));
        match err {
            CipherbookError::RotationAborted { cause, diverged } => {
                assert!(cause.is_validation());
                assert_eq!(
                    diverged,
                    vec![EntityKind::Category, EntityKind::Transaction, EntityKind::Goal]
                );
            }
            other => panic!("expected RotationAborted, got {:?}", other),
        }
        assert_eq!(fx.remote.key_proof(USER, EntityKind::Change), Some(old.proof()));
        assert_eq!(
            fx.repos.diverged(),
            vec![EntityKind::Category, EntityKind::Transaction, EntityKind::Goal]
        );

        // The old key still serves cached and untouched repositories
        assert_eq!(fx.repos.categories.read_all(&fx.keys, &fx.server).await.unwrap().len(), 1);
        assert_eq!(fx.repos.changes.read_all(&fx.keys, &fx.server).await.unwrap().len(), 1);

        // A diverged server copy is reported as such
        fx.repos.goals.flush();
        let err = fx.repos.goals.read_all(&fx.keys, &fx.server).await.unwrap_err();
        assert!(matches!(
            err,
            CipherbookError::PartialRotationInconsistency { kind: EntityKind::Goal }
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        fx.remote.fail_transport(EntityKind::Goal, 1);

        let commit = fx.rotate_to(&coordinator, "alice456").await.unwrap();
        let goal = commit
            .repositories
            .iter()
            .find(|o| o.kind == EntityKind::Goal)
            .unwrap();
        assert_eq!(goal.attempts, 2);
        let category = commit
            .repositories
            .iter()
            .find(|o| o.kind == EntityKind::Category)
            .unwrap();
        assert_eq!(category.attempts, 1);
    }

    #[tokio::test]
    async fn test_lost_exchange_ack_counts_as_rekeyed() {
        let mut fx = lost_ack_fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));

        let commit = fx.rotate_to(&coordinator, "alice456").await.unwrap();
        let new = fx.hasher.derive(&Credential::from("alice456")).unwrap();

        let goal = commit
            .repositories
            .iter()
            .find(|o| o.kind == EntityKind::Goal)
            .unwrap();
        assert_eq!(goal.attempts, 2);
        assert_eq!(fx.keys.current(), Some(&new));
        assert!(fx.repos.diverged().is_empty());
        assert_eq!(fx.repos.goals.read_all(&fx.keys, &fx.server).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_exchange_ack_in_aborted_rotation_is_diverged() {
        let mut fx = lost_ack_fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();
        let new = fx.hasher.derive(&Credential::from("alice456")).unwrap();
        fx.remote.reject_writes(EntityKind::Change, "records: payload is not valid");

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();
        match err {
            CipherbookError::RotationAborted { cause, diverged } => {
                assert!(cause.is_validation());
                assert!(diverged.contains(&EntityKind::Goal));
            }
            other => panic!("expected RotationAborted, got {:?}", other),
        }
        assert_eq!(fx.keys.current(), Some(&old));
        assert_eq!(fx.remote.key_proof(USER, EntityKind::Goal), Some(new.proof()));
        assert!(fx.repos.goals.is_diverged());

        let err = fx.repos.goals.read_all(&fx.keys, &fx.server).await.unwrap_err();
        assert!(matches!(
            err,
            CipherbookError::PartialRotationInconsistency { kind: EntityKind::Goal }
        ));
    }

    #[tokio::test]
    async fn test_transport_failures_past_budget_abort() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();
        fx.remote.fail_transport(EntityKind::Transaction, 5);

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();
        assert!(err.root_cause().is_retryable());
        assert_eq!(fx.keys.current(), Some(&old));
        assert!(fx.repos.transactions.is_diverged());
    }

    #[tokio::test]
    async fn test_timed_out_call_aborts_without_retry() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_millis(100));
        let old = fx.keys.current().cloned().unwrap();
        fx.remote.delay(EntityKind::Category, Duration::from_secs(2));

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();
        assert!(matches!(err.root_cause(), CipherbookError::Timeout(_)));
        assert_eq!(fx.keys.current(), Some(&old));
        assert!(fx.repos.categories.is_diverged());
    }

    #[tokio::test]
    async fn test_same_credential_rejected_before_any_call() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();

        let err = fx.rotate_to(&coordinator, PASSWORD).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(coordinator.phase(), RotationPhase::Idle);
        assert_eq!(fx.keys.current(), Some(&old));
        assert_eq!(fx.remote.key_proof(USER, EntityKind::Goal), Some(old.proof()));
    }

    #[tokio::test]
    async fn test_rotation_without_key_is_unauthenticated() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        fx.keys.clear();

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();
        assert!(err.is_unauthenticated());
        assert_eq!(coordinator.phase(), RotationPhase::Idle);
    }

    #[tokio::test]
    async fn test_credential_store_failure_reports_everything_diverged() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();
        fx.remote.reject_credential_change("service unavailable");

        let err = fx.rotate_to(&coordinator, "alice456").await.unwrap_err();
        match err {
            CipherbookError::RotationAborted { diverged, .. } => {
                assert_eq!(diverged, EntityKind::ALL.to_vec())
            }
            other => panic!("expected RotationAborted, got {:?}", other),
        }
        assert_eq!(fx.keys.current(), Some(&old));
        assert!(fx.remote.accepts(USER, PASSWORD));
    }

    #[tokio::test]
    async fn test_concurrent_rotation_rejected() {
        let mut first = fixture().await;
        let mut second = fixture().await;
        first.remote.delay(EntityKind::Goal, Duration::from_millis(200));
        let coordinator = first.coordinator(Duration::from_secs(5));

        let (a, b) = tokio::join!(
            first.rotate_to(&coordinator, "alice456"),
            second.rotate_to(&coordinator, "alice789"),
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(CipherbookError::RotationInProgress)));
        assert_eq!(coordinator.phase(), RotationPhase::Committed);
    }

    #[tokio::test]
    async fn test_abandoned_rotation_finishes_before_next_one() {
        let mut fx = fixture().await;
        let coordinator = fx.coordinator(Duration::from_secs(5));
        let old = fx.keys.current().cloned().unwrap();
        fx.remote.delay(EntityKind::Change, Duration::from_millis(300));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            fx.rotate_to(&coordinator, "alice456"),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(coordinator.phase().is_busy());

        let err = fx.rotate_to(&coordinator, "alice789").await.unwrap_err();
        assert!(matches!(err, CipherbookError::RotationInProgress));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(coordinator.phase(), RotationPhase::Committed);
        // The caller never installed the new key
        assert_eq!(fx.keys.current(), Some(&old));
        assert_eq!(fx.repos.diverged(), EntityKind::ALL.to_vec());
    }
}
