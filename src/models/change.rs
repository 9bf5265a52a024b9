//! Change-log entries
//!
//! Every local edit is recorded as a `Change` so other devices can replay or
//! reconcile offline edits. The change log is itself an encrypted repository:
//! entries carry ids and a human-readable diff, never key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::entity::{Entity, EntityKind};
use super::ids::ChangeId;

/// Types of edits recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single change-log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,

    /// When the edit happened (UTC)
    pub timestamp: DateTime<Utc>,

    pub operation: Operation,

    /// Repository the edited record lives in
    pub entity_kind: EntityKind,

    /// Wire id of the edited record
    pub entity_id: String,

    /// Human-readable diff summary (updates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Change {
    fn new<T: Entity>(operation: Operation, record: &T, summary: Option<String>) -> Self {
        Self {
            id: ChangeId::new(),
            timestamp: Utc::now(),
            operation,
            entity_kind: T::KIND,
            entity_id: record.record_id(),
            summary,
        }
    }

    /// Record the creation of `record`
    pub fn created<T: Entity>(record: &T) -> Self {
        Self::new(Operation::Create, record, None)
    }

    /// Record an update, summarizing the top-level fields that changed
    pub fn updated<T: Entity>(before: &T, after: &T) -> Self {
        let summary = match (serde_json::to_value(before), serde_json::to_value(after)) {
            (Ok(b), Ok(a)) => generate_diff(&b, &a),
            _ => None,
        };
        Self::new(Operation::Update, after, summary)
    }

    /// Record the deletion of `record`
    pub fn deleted<T: Entity>(record: &T) -> Self {
        Self::new(Operation::Delete, record, None)
    }
}

impl Entity for Change {
    const KIND: EntityKind = EntityKind::Change;

    fn record_id(&self) -> String {
        self.id.wire()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            self.entity_kind,
            self.entity_id
        )?;
        if let Some(summary) = &self.summary {
            write!(f, " ({})", summary)?;
        }
        Ok(())
    }
}

/// Describe top-level field changes between two JSON objects
///
/// `updated_at` is ignored: it changes on every edit and says nothing.
pub fn generate_diff(before: &Value, after: &Value) -> Option<String> {
    let (Value::Object(before_obj), Value::Object(after_obj)) = (before, after) else {
        return (before != after)
            .then(|| format!("{} -> {}", format_value(before), format_value(after)));
    };

    let mut changes = Vec::new();
    for (key, before_val) in before_obj {
        if key == "updated_at" {
            continue;
        }
        match after_obj.get(key) {
            Some(after_val) if after_val != before_val => changes.push(format!(
                "{}: {} -> {}",
                key,
                format_value(before_val),
                format_value(after_val)
            )),
            Some(_) => {}
            None => changes.push(format!("{}: {} -> (removed)", key, format_value(before_val))),
        }
    }
    for (key, after_val) in after_obj {
        if !before_obj.contains_key(key) {
            changes.push(format!("{}: (added) -> {}", key, format_value(after_val)));
        }
    }

    (!changes.is_empty()).then(|| changes.join(", "))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) if s.chars().count() > 50 => {
            let head: String = s.chars().take(47).collect();
            format!("\"{}...\"", head)
        }
        Value::String(s) => format!("\"{}\"", s),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
        other => other.to_string(),
    }
}
