//! Category model
//!
//! Categories label transactions and group spending. The server only ever
//! sees them as encrypted payloads indexed by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{Entity, EntityKind};
use super::ids::CategoryId;
use crate::error::{CipherbookError, CipherbookResult};

/// A spending or income category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Unique identifier
    pub id: CategoryId,

    /// Category name
    pub name: String,

    /// Optional parent for nested categories
    #[serde(default)]
    pub parent_id: Option<CategoryId>,

    /// Display color (hex, e.g. "#4caf50")
    #[serde(default)]
    pub color: Option<String>,

    /// Whether this category is an income category
    #[serde(default)]
    pub income: bool,

    /// When the category was created
    pub created_at: DateTime<Utc>,

    /// When the category was last modified
    pub updated_at: DateTime<Utc>,
}

impl Category {
    /// Create a new category
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CategoryId::new(),
            name: name.into(),
            parent_id: None,
            color: None,
            income: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new category nested under `parent`
    pub fn child_of(name: impl Into<String>, parent: CategoryId) -> Self {
        let mut category = Self::new(name);
        category.parent_id = Some(parent);
        category
    }
}

impl Entity for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn record_id(&self) -> String {
        self.id.wire()
    }

    /// Validate the category
    fn validate(&self) -> CipherbookResult<()> {
        if self.name.trim().is_empty() {
            return Err(CipherbookError::Validation(
                "Category name cannot be empty".into(),
            ));
        }
        if self.name.len() > 50 {
            return Err(CipherbookError::Validation(format!(
                "Category name too long ({} chars, max 50)",
                self.name.len()
            )));
        }
        if self.parent_id == Some(self.id) {
            return Err(CipherbookError::Validation(
                "Category cannot be its own parent".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
