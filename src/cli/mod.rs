//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with a session against either the
//! configured sync server or an in-process demo server.

pub mod connect;
pub mod credential;
pub mod records;

pub use connect::{open_session, read_secret, resolve_username, Backend};
pub use credential::{handle_change_password, handle_recover, handle_revoke, AccountArgs};
pub use records::{handle_list, ListArgs};
