//! Session lifecycle: login, recovery, credential change and logout
//!
//! The session owns the `KeyStore` outright. Repositories borrow it for reads
//! and the rotation coordinator borrows it mutably for the final install, so
//! there is a single writer for key material by construction.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::crypto::{Credential, CredentialHasher, KeyDerivationParams, KeyProof, KeyStore};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::EntityKind;
use crate::remote::{AuthToken, AuthTransport, RemoteStore, ServerContext};
use crate::rotation::{
    derive_off_thread, RotationCommit, RotationCoordinator, RotationPhase, RotationPolicy,
};
use crate::storage::Repositories;

const SIGNAL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    /// Waiting on the authentication service
    LoggingIn,
    /// Token and key both present
    Active,
    /// Token present, deliberately no key
    Recovering,
}

/// Events for whatever presents the session to the user
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    StateChanged(SessionState),
    RotationCommitted {
        key_proof: KeyProof,
    },
    RotationAborted {
        reason: String,
        diverged: Vec<EntityKind>,
    },
}

pub struct SessionLifecycle {
    server_url: Url,
    key_derivation: KeyDerivationParams,
    auth: Arc<dyn AuthTransport>,
    state: SessionState,
    keys: KeyStore,
    server: Option<ServerContext>,
    username: Option<String>,
    repositories: Repositories,
    coordinator: RotationCoordinator,
    signals: broadcast::Sender<SessionSignal>,
}

impl SessionLifecycle {
    pub fn new(
        settings: &Settings,
        auth: Arc<dyn AuthTransport>,
        remote: Arc<dyn RemoteStore>,
    ) -> CipherbookResult<Self> {
        settings.validate()?;
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);

        Ok(Self {
            server_url: settings.server_url()?,
            key_derivation: settings.key_derivation.clone(),
            coordinator: RotationCoordinator::new(
                auth.clone(),
                RotationPolicy::from_settings(settings),
            ),
            auth,
            state: SessionState::LoggedOut,
            keys: KeyStore::new(),
            server: None,
            username: None,
            repositories: Repositories::new(remote),
            signals,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn token(&self) -> Option<&AuthToken> {
        self.server.as_ref().map(|s| &s.token)
    }

    /// Server context for authenticated calls
    pub fn server(&self) -> CipherbookResult<&ServerContext> {
        self.server.as_ref().ok_or(CipherbookError::Unauthenticated)
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    pub fn rotation_phase(&self) -> RotationPhase {
        self.coordinator.phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.signals.subscribe()
    }

    fn emit(&self, signal: SessionSignal) {
        // No subscribers is fine
        let _ = self.signals.send(signal);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            self.state = next;
            self.emit(SessionSignal::StateChanged(next));
        }
    }

    fn hasher_for(&self, username: &str) -> CipherbookResult<CredentialHasher> {
        CredentialHasher::new(username, &self.key_derivation)
    }

    /// Verify the credential and install the key derived from it
    pub async fn login(
        &mut self,
        username: &str,
        credential: &Credential,
    ) -> CipherbookResult<AuthToken> {
        if self.state == SessionState::Active {
            return Err(CipherbookError::InvalidState(
                "Already logged in; log out first".into(),
            ));
        }
        let hasher = self.hasher_for(username)?;
        let previous = self.state;
        self.set_state(SessionState::LoggingIn);

        let verified = match self.auth.verify(&self.server_url, username, credential).await {
            Ok(token) => derive_off_thread(hasher, credential.clone())
                .await
                .map(|key| (token, key)),
            Err(e) => Err(e),
        };

        match verified {
            Ok((token, key)) => {
                info!(user = username, proof = key.proof().short(), "logged in");
                self.keys.install(key);
                self.server = Some(ServerContext::new(self.server_url.clone(), token.clone()));
                self.username = Some(username.trim().to_string());
                self.set_state(SessionState::Active);
                Ok(token)
            }
            Err(e) => {
                warn!(user = username, error = %e, "login failed");
                self.set_state(previous);
                Err(e)
            }
        }
    }

    /// Obtain a token without installing a key
    pub async fn recover(
        &mut self,
        username: &str,
        credential: &Credential,
    ) -> CipherbookResult<AuthToken> {
        if self.state == SessionState::Active {
            return Err(CipherbookError::InvalidState(
                "Log out before starting a recovery session".into(),
            ));
        }
        let previous = self.state;
        self.set_state(SessionState::LoggingIn);

        match self.auth.verify(&self.server_url, username, credential).await {
            Ok(token) => {
                info!(user = username, "recovery session started");
                self.keys.clear();
                self.server = Some(ServerContext::new(self.server_url.clone(), token.clone()));
                self.username = Some(username.trim().to_string());
                self.set_state(SessionState::Recovering);
                Ok(token)
            }
            Err(e) => {
                self.set_state(previous);
                Err(e)
            }
        }
    }

    /// Forget the key and every decrypted record
    ///
    /// Caches are flushed before `LoggedOut` is signalled.
    pub fn logout(&mut self) {
        self.keys.clear();
        self.repositories.flush_all();
        self.server = None;
        self.username = None;
        self.set_state(SessionState::LoggedOut);
        info!("logged out");
    }

    /// Rotate every repository to the key derived from `new`
    ///
    /// `current` must re-derive the active key. A failed rotation leaves the
    /// session usable under the current credential.
    pub async fn change_credential(
        &mut self,
        current: &Credential,
        new: &Credential,
    ) -> CipherbookResult<RotationCommit> {
        if self.state != SessionState::Active {
            return Err(CipherbookError::Unauthenticated);
        }
        let username = self.username.clone().ok_or(CipherbookError::Unauthenticated)?;
        let server = self.server()?.clone();
        let hasher = self.hasher_for(&username)?;

        let current_key = derive_off_thread(hasher.clone(), current.clone()).await?;
        if self.keys.current() != Some(&current_key) {
            return Err(CipherbookError::Auth("Current password is incorrect".into()));
        }

        let result = self
            .coordinator
            .rotate(
                &mut self.keys,
                hasher,
                new.clone(),
                &server,
                self.repositories.participants(),
            )
            .await;

        match &result {
            Ok(commit) => self.emit(SessionSignal::RotationCommitted {
                key_proof: commit.key_proof.clone(),
            }),
            Err(CipherbookError::RotationAborted { cause, diverged }) => {
                self.emit(SessionSignal::RotationAborted {
                    reason: cause.to_string(),
                    diverged: diverged.clone(),
                })
            }
            Err(_) => {}
        }
        result
    }

    /// Revoke the token remotely, then log out
    pub async fn revoke_token(&mut self) -> CipherbookResult<()> {
        let server = self.server()?.clone();
        self.auth.revoke(&server).await?;
        self.logout();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountId, Category, Change, Goal, Money, Transaction};
    use crate::remote::MemoryRemote;
    use crate::test_support::{fast_kdf, remote_with_alice, PASSWORD, USER};
    use chrono::NaiveDate;

    fn session(remote: &Arc<MemoryRemote>) -> SessionLifecycle {
        let settings = Settings {
            key_derivation: fast_kdf(),
            ..Settings::default()
        };
        SessionLifecycle::new(&settings, remote.clone(), remote.clone()).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<SessionSignal>) -> Vec<SessionSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    fn expected_key(credential: &str) -> crate::crypto::CipherKey {
        CredentialHasher::new(USER, &fast_kdf())
            .unwrap()
            .derive(&Credential::from(credential))
            .unwrap()
    }

    /// Logged-in session with one record in every repository
    async fn seeded(remote: &Arc<MemoryRemote>) -> SessionLifecycle {
        let mut s = session(remote);
        s.login(USER, &Credential::from(PASSWORD)).await.unwrap();
        let server = s.server().unwrap().clone();
        let keys = s.key_store();
        let repos = s.repositories();

        let groceries = Category::new("Groceries");
        let txn = Transaction::new(
            AccountId::new(),
            NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
            Money::from_cents(-8423),
        )
        .named("Market")
        .in_category(groceries.id);
        repos.changes.put(keys, &server, Change::created(&txn)).await.unwrap();
        repos.categories.put(keys, &server, groceries).await.unwrap();
        repos.transactions.put(keys, &server, txn).await.unwrap();
        repos
            .goals
            .put(keys, &server, Goal::new("Bike", Money::from_cents(90000)))
            .await
            .unwrap();
        s
    }

    #[tokio::test]
    async fn test_login_installs_derived_key() {
        let remote = remote_with_alice();
        let mut s = session(&remote);
        let mut rx = s.subscribe();

        s.login(USER, &Credential::from(PASSWORD)).await.unwrap();

        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.key_store().current(), Some(&expected_key(PASSWORD)));
        assert!(s.token().is_some());
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionSignal::StateChanged(SessionState::LoggingIn),
                SessionSignal::StateChanged(SessionState::Active),
            ]
        );

        let err = s.login(USER, &Credential::from(PASSWORD)).await.unwrap_err();
        assert!(matches!(err, CipherbookError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_failed_login_surfaces_auth_error() {
        let remote = remote_with_alice();
        let mut s = session(&remote);

        let err = s.login(USER, &Credential::from("wrong")).await.unwrap_err();
        assert!(matches!(err, CipherbookError::Auth(_)));
        assert_eq!(s.state(), SessionState::LoggedOut);
        assert!(s.key_store().current().is_none());
    }

    #[tokio::test]
    async fn test_credential_change_commits_new_key() {
        let remote = remote_with_alice();
        let mut s = seeded(&remote).await;
        let k1 = expected_key(PASSWORD);
        let k2 = expected_key("alice456");
        assert_ne!(k1, k2);

        let server = s.server().unwrap().clone();
        let before = s
            .repositories()
            .transactions
            .read_all(s.key_store(), &server)
            .await
            .unwrap();
        assert_eq!(before[0].name, "Market");

        let mut rx = s.subscribe();
        s.change_credential(&Credential::from(PASSWORD), &Credential::from("alice456"))
            .await
            .unwrap();

        assert_eq!(s.key_store().current(), Some(&k2));
        assert_eq!(s.rotation_phase(), RotationPhase::Committed);
        assert_eq!(
            drain(&mut rx),
            vec![SessionSignal::RotationCommitted { key_proof: k2.proof() }]
        );

        s.repositories().flush_all();
        let after = s
            .repositories()
            .transactions
            .read_all(s.key_store(), &server)
            .await
            .unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_change_log_rejection_aborts_rotation() {
        let remote = remote_with_alice();
        let mut s = seeded(&remote).await;
        let k1 = expected_key(PASSWORD);
        remote.reject_writes(EntityKind::Change, "payload: malformed entry");

        let mut rx = s.subscribe();
        let err = s
            .change_credential(&Credential::from(PASSWORD), &Credential::from("alice456"))
            .await
            .unwrap_err();

        assert!(matches!(err, CipherbookError::RotationAborted { .. }));
        assert!(err.root_cause().is_validation());
        assert_eq!(s.key_store().current(), Some(&k1));
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.rotation_phase(), RotationPhase::Aborted);

        match drain(&mut rx).as_slice() {
            [SessionSignal::RotationAborted { reason, diverged }] => {
                assert!(reason.contains("malformed entry"));
                assert!(!diverged.contains(&EntityKind::Change));
                assert_eq!(diverged.len(), 3);
            }
            other => panic!("unexpected signals: {:?}", other),
        }

        // Still usable under the old credential
        let server = s.server().unwrap().clone();
        let changes = s
            .repositories()
            .changes
            .read_all(s.key_store(), &server)
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert!(remote.accepts(USER, PASSWORD));
    }

    #[tokio::test]
    async fn test_wrong_current_credential_rejected() {
        let remote = remote_with_alice();
        let mut s = seeded(&remote).await;

        let err = s
            .change_credential(&Credential::from("guess"), &Credential::from("alice456"))
            .await
            .unwrap_err();
        assert!(matches!(err, CipherbookError::Auth(_)));
        assert_eq!(s.rotation_phase(), RotationPhase::Idle);
        assert!(remote.accepts(USER, PASSWORD));
    }

    #[tokio::test]
    async fn test_recover_leaves_no_key() {
        let remote = remote_with_alice();
        let mut s = session(&remote);

        let token = s.recover(USER, &Credential::from(PASSWORD)).await.unwrap();
        assert!(remote.is_token_valid(&token));
        assert_eq!(s.state(), SessionState::Recovering);
        assert!(s.key_store().current().is_none());

        let server = s.server().unwrap().clone();
        let err = s
            .repositories()
            .goals
            .read_all(s.key_store(), &server)
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());

        let err = s
            .change_credential(&Credential::from(PASSWORD), &Credential::from("x"))
            .await
            .unwrap_err();
        assert!(err.is_unauthenticated());

        // Completing the recovery with a login installs the key
        s.login(USER, &Credential::from(PASSWORD)).await.unwrap();
        assert_eq!(s.state(), SessionState::Active);
        assert!(s.key_store().is_installed());

        let err = s.recover(USER, &Credential::from(PASSWORD)).await.unwrap_err();
        assert!(matches!(err, CipherbookError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_logout_flushes_everything() {
        let remote = remote_with_alice();
        let mut s = seeded(&remote).await;
        let server = s.server().unwrap().clone();
        {
            let repos = s.repositories();
            let keys = s.key_store();
            repos.categories.read_all(keys, &server).await.unwrap();
            repos.transactions.read_all(keys, &server).await.unwrap();
            repos.changes.read_all(keys, &server).await.unwrap();
            repos.goals.read_all(keys, &server).await.unwrap();
        }
        assert_eq!(s.repositories().materialized().len(), 4);

        let mut rx = s.subscribe();
        s.logout();

        assert_eq!(s.state(), SessionState::LoggedOut);
        assert!(s.key_store().current().is_none());
        assert!(s.token().is_none());
        assert!(s.repositories().materialized().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![SessionSignal::StateChanged(SessionState::LoggedOut)]
        );

        let repos = s.repositories();
        let keys = s.key_store();
        assert!(repos.categories.read_all(keys, &server).await.unwrap_err().is_unauthenticated());
        assert!(repos.transactions.read_all(keys, &server).await.unwrap_err().is_unauthenticated());
        assert!(repos.changes.read_all(keys, &server).await.unwrap_err().is_unauthenticated());
        assert!(repos.goals.read_all(keys, &server).await.unwrap_err().is_unauthenticated());

        // Logging out twice is harmless
        s.logout();
        assert_eq!(s.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_new_credential_works_on_next_login() {
        let remote = remote_with_alice();
        let mut s = seeded(&remote).await;
        s.change_credential(&Credential::from(PASSWORD), &Credential::from("alice456"))
            .await
            .unwrap();
        s.logout();

        let err = s.login(USER, &Credential::from(PASSWORD)).await.unwrap_err();
        assert!(matches!(err, CipherbookError::Auth(_)));

        s.login(USER, &Credential::from("alice456")).await.unwrap();
        let server = s.server().unwrap().clone();
        let goals = s
            .repositories()
            .goals
            .read_all(s.key_store(), &server)
            .await
            .unwrap();
        assert_eq!(goals[0].name, "Bike");
    }

    #[tokio::test]
    async fn test_revoke_token_logs_out() {
        let remote = remote_with_alice();
        let mut s = session(&remote);
        let token = s.login(USER, &Credential::from(PASSWORD)).await.unwrap();

        s.revoke_token().await.unwrap();
        assert!(!remote.is_token_valid(&token));
        assert_eq!(s.state(), SessionState::LoggedOut);
        assert!(s.revoke_token().await.unwrap_err().is_unauthenticated());
    }
}
