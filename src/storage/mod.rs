//! Encrypted record storage
//!
//! Four repositories, one per record kind, all sharing the same remote
//! endpoint set and reading the same session `KeyStore`.

pub mod repository;

use std::sync::Arc;

use crate::models::{Category, Change, EntityKind, Goal, Transaction};
use crate::remote::RemoteStore;

pub use repository::{EntityRepository, RotationParticipant};

/// The four entity repositories of a session
pub struct Repositories {
    pub categories: Arc<EntityRepository<Category>>,
    pub transactions: Arc<EntityRepository<Transaction>>,
    pub changes: Arc<EntityRepository<Change>>,
    pub goals: Arc<EntityRepository<Goal>>,
}

impl Repositories {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            categories: Arc::new(EntityRepository::new(remote.clone())),
            transactions: Arc::new(EntityRepository::new(remote.clone())),
            changes: Arc::new(EntityRepository::new(remote.clone())),
            goals: Arc::new(EntityRepository::new(remote)),
        }
    }

    /// Every repository, in `EntityKind::ALL` order
    pub fn participants(&self) -> Vec<Arc<dyn RotationParticipant>> {
        EntityKind::ALL
            .iter()
            .map(|kind| self.participant(*kind))
            .collect()
    }

    pub fn participant(&self, kind: EntityKind) -> Arc<dyn RotationParticipant> {
        match kind {
            EntityKind::Category => self.categories.clone(),
            EntityKind::Transaction => self.transactions.clone(),
            EntityKind::Change => self.changes.clone(),
            EntityKind::Goal => self.goals.clone(),
        }
    }

    /// Drop every cache
    pub fn flush_all(&self) {
        self.categories.flush();
        self.transactions.flush();
        self.changes.flush();
        self.goals.flush();
    }

    /// Kinds whose snapshot is currently loaded
    pub fn materialized(&self) -> Vec<EntityKind> {
        self.participants()
            .into_iter()
            .filter(|p| p.is_materialized())
            .map(|p| p.kind())
            .collect()
    }

    /// Kinds whose server copy may be under a key other than the active one
    pub fn diverged(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        if self.categories.is_diverged() {
            kinds.push(EntityKind::Category);
        }
        if self.transactions.is_diverged() {
            kinds.push(EntityKind::Transaction);
        }
        if self.changes.is_diverged() {
            kinds.push(EntityKind::Change);
        }
        if self.goals.is_diverged() {
            kinds.push(EntityKind::Goal);
        }
        kinds
    }
}
