//! Core data models for cipherbook
//!
//! The four record types held by the entity repositories (categories,
//! transactions, change-log entries, goals) plus the shared id and money
//! types. Records are plain serde structs; encryption happens in `storage`.

pub mod category;
pub mod change;
pub mod entity;
pub mod goal;
pub mod ids;
pub mod money;
pub mod transaction;

pub use category::Category;
pub use change::{generate_diff, Change, Operation};
pub use entity::{Entity, EntityKind};
pub use goal::Goal;
pub use ids::{AccountId, CategoryId, ChangeId, GoalId, TransactionId};
pub use money::Money;
pub use transaction::{Transaction, TransactionFilter};
