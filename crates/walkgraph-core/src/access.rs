//! Access Control
//!
//! Decides whether the current caller may see an anchor. Levels gate
//! visibility across sessions; anchors created in this process, or loaded
//! through the owner path, are always visible to it.

use crate::anchor::{AccessLevel, Anchor};
use walkgraph_config::AccessConfig;

/// Outcome of an access check. Denial is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted)
    }
}

/// Who is running the current context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Authenticated identity; `None` is anonymous
    pub identity: Option<String>,
    /// Owner access to every anchor in the namespace
    pub elevated: bool,
}

impl Caller {
    /// The namespace owner
    pub fn owner() -> Self {
        Self {
            identity: None,
            elevated: true,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn identified(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            elevated: false,
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self {
            identity: config.identity.clone(),
            elevated: config.elevated,
        }
    }
}

/// Per-context access policy.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    caller: Caller,
}

impl AccessGuard {
    pub fn new(caller: Caller) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Check whether the caller may read `anchor`.
    pub fn validate_access(&self, anchor: &Anchor) -> Access {
        if self.caller.elevated || anchor.is_local_owner() {
            return Access::Granted;
        }
        let granted = match anchor.access() {
            AccessLevel::Public => true,
            AccessLevel::Protected => self.caller.identity.is_some(),
            AccessLevel::Private => false,
        };
        if granted {
            Access::Granted
        } else {
            Access::Denied
        }
    }
}
