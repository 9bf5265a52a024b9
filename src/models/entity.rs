//! The common shape of every record kept in an entity repository

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CipherbookResult;

/// The four independently synchronized record stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Category,
    Transaction,
    Change,
    Goal,
}

impl EntityKind {
    /// Every kind, in the order repositories are listed and reported
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Category,
        EntityKind::Transaction,
        EntityKind::Change,
        EntityKind::Goal,
    ];

    /// REST collection name for this kind
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Category => "categories",
            EntityKind::Transaction => "transactions",
            EntityKind::Change => "changes",
            EntityKind::Goal => "goals",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Category => "Category",
            EntityKind::Transaction => "Transaction",
            EntityKind::Change => "Change",
            EntityKind::Goal => "Goal",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category" | "categories" => Ok(EntityKind::Category),
            "transaction" | "transactions" | "txn" => Ok(EntityKind::Transaction),
            "change" | "changes" | "changelog" => Ok(EntityKind::Change),
            "goal" | "goals" => Ok(EntityKind::Goal),
            other => Err(format!("unknown record kind '{}'", other)),
        }
    }
}

/// A record that can live, encrypted, in one of the entity repositories
///
/// The plaintext form is the serde JSON encoding of the record. The id is
/// never encrypted: it is the stable handle the server indexes payloads by.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Which repository this record belongs to
    const KIND: EntityKind;

    /// Stable identifier, as sent to the server
    fn record_id(&self) -> String;

    /// Reject records that must never be written
    fn validate(&self) -> CipherbookResult<()> {
        Ok(())
    }
}
