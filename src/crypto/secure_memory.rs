//! Secure memory handling for user credentials
//!
//! A `Credential` is the user's password. It is never stored and never
//! logged; its heap buffer is wiped when the value is dropped.

use std::fmt;

use zeroize::Zeroizing;

/// A password held only for as long as it takes to hash or verify it
#[derive(Clone)]
pub struct Credential {
    inner: Zeroizing<String>,
}

impl Credential {
    /// Wrap a secret string
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: Zeroizing::new(secret.into()),
        }
    }

    /// Borrow the secret for hashing or for the authentication transport
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// Don't print the contents in Debug output
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED {} bytes]", self.inner.len())
    }
}
