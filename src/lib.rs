//! cipherbook - personal-finance client with client-side encryption
//!
//! Every record the client syncs (categories, transactions, change-log
//! entries, goals) is encrypted under a key derived from the user's
//! credential. The server stores ciphertext plus a fingerprint of the key
//! each collection is encrypted under, and never sees the key itself.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `crypto`: Key derivation, the active key slot, payload encryption
//! - `models`: The four record types and their ids
//! - `remote`: Server collaborators (HTTP and in-memory)
//! - `storage`: Per-kind encrypted repositories with snapshot caches
//! - `rotation`: Re-encrypting every repository when the credential changes
//! - `session`: Login, recovery and logout transitions
//!
//! # Example
//!
//! ```rust,ignore
//! use cipherbook::config::{CipherbookPaths, Settings};
//! use cipherbook::remote::HttpRemote;
//! use cipherbook::session::SessionLifecycle;
//!
//! let paths = CipherbookPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let http = Arc::new(HttpRemote::new(settings.request_timeout())?);
//! let mut session = SessionLifecycle::new(&settings, http.clone(), http)?;
//! session.login("alice", &Credential::from("alice123")).await?;
//! ```

pub mod cli;
pub mod config;
pub mod crypto;
pub mod display;
pub mod error;
pub mod models;
pub mod remote;
pub mod rotation;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use error::{CipherbookError, CipherbookResult};
pub use session::{SessionLifecycle, SessionSignal, SessionState};
