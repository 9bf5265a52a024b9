//! Savings goal model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{Entity, EntityKind};
use super::ids::{CategoryId, GoalId};
use super::money::Money;
use crate::error::{CipherbookError, CipherbookResult};

/// A savings goal: an amount to reach, optionally by a date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub name: String,

    /// Amount to reach
    pub target: Money,

    /// Amount set aside so far
    #[serde(default)]
    pub saved: Money,

    /// Optional deadline
    #[serde(default)]
    pub due: Option<NaiveDate>,

    /// Category the goal draws from
    #[serde(default)]
    pub category_id: Option<CategoryId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new goal
    pub fn new(name: impl Into<String>, target: Money) -> Self {
        let now = Utc::now();
        Self {
            id: GoalId::new(),
            name: name.into(),
            target,
            saved: Money::zero(),
            due: None,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still missing (never negative)
    pub fn remaining(&self) -> Money {
        if self.saved >= self.target {
            Money::zero()
        } else {
            self.target.saturating_sub(self.saved)
        }
    }

    /// Progress in whole percent, capped at 100
    pub fn progress_percent(&self) -> u8 {
        if self.target.cents() <= 0 {
            return 100;
        }
        let pct = i128::from(self.saved.cents().max(0)) * 100 / i128::from(self.target.cents());
        pct.min(100) as u8
    }

    pub fn is_reached(&self) -> bool {
        self.saved >= self.target
    }
}

impl Entity for Goal {
    const KIND: EntityKind = EntityKind::Goal;

    fn record_id(&self) -> String {
        self.id.wire()
    }

    /// Validate the goal
    fn validate(&self) -> CipherbookResult<()> {
        if self.name.trim().is_empty() {
            return Err(CipherbookError::Validation("Goal name cannot be empty".into()));
        }
        if self.target.cents() <= 0 {
            return Err(CipherbookError::Validation(
                "Goal target must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.saved, self.target)
    }
}
