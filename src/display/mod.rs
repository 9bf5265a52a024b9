//! Display formatting for terminal output
//!
//! Decrypted records and rotation reports rendered as plain tables.

pub mod records;
pub mod rotation;

pub use records::{format_categories, format_changes, format_goals, format_transactions};
pub use rotation::{format_key_check, format_rotation_aborted, format_rotation_commit};
