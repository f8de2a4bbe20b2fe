//! Caller identity
//!
//! Authentication happens upstream. A trusted proxy forwards the resolved
//! user and its capabilities as headers; this module turns them into a
//! [`Principal`].

mod middleware;

pub use middleware::{CAPABILITIES_HEADER, USER_HEADER};

use serde::Serialize;

/// Capability that grants every workflow action
pub const ADMIN_CAPABILITY: &str = "admin";

/// The resolved caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub username: String,
    pub capabilities: Vec<String>,
}

impl Principal {
    pub fn new<I, S>(username: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            username: username.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn is_admin(&self) -> bool {
        self.has_capability(ADMIN_CAPABILITY)
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}
