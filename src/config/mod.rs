//! Configuration module for cipherbook
//!
//! This module provides configuration management including:
//! - Config directory resolution
//! - User settings persistence

pub mod paths;
pub mod settings;

pub use paths::CipherbookPaths;
pub use settings::Settings;
