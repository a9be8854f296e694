//! Capability scopes and the attenuation rule
//!
//! A scope is a set of capability strings such as `read:db`. Authority can
//! only shrink as it is delegated: a child's scope must be a subset of its
//! parent's.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{AppError, Result};

/// A set of capability strings (order irrelevant, duplicates collapsed)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope {
    capabilities: BTreeSet<String>,
}

impl Scope {
    /// Create a new empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this scope grants a capability
    pub fn allows(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_subset(&self, other: &Scope) -> bool {
        self.capabilities.is_subset(&other.capabilities)
    }

    /// Capabilities in `self` that `other` does not grant
    pub fn difference(&self, other: &Scope) -> Scope {
        Scope {
            capabilities: self
                .capabilities
                .difference(&other.capabilities)
                .cloned()
                .collect(),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.capabilities.iter().cloned().collect()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, cap) in self.capabilities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cap)?;
        }
        write!(f, "]")
    }
}

impl<S: Into<String>> FromIterator<S> for Scope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for Scope {
    fn from(capabilities: Vec<S>) -> Self {
        capabilities.into_iter().collect()
    }
}

/// Check that `requested` only narrows `parent`.
///
/// Fails with [`AppError::InvalidScope`] naming every requested capability
/// the parent does not hold. An empty request is always valid.
pub fn attenuate(parent: &Scope, requested: &Scope) -> Result<()> {
    let offending = requested.difference(parent);
    if offending.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidScope { offending })
    }
}
