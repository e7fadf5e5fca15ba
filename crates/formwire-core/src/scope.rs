#![forbid(unsafe_code)]

//! Container identity and lineage.
//!
//! Every container that owns fields (a form, a wizard step, one repeated line
//! item) gets a [`Scope`]. A scope carries its own opaque [`ScopeId`] plus the
//! ids of all enclosing scopes, outermost first, so routing decisions such as
//! "is this announcement inside my subtree" need no shared lookup table.
//!
//! Scopes are allocated by the [`Bus`](crate::bus::Bus) that the session owns,
//! which keeps ids unique for the lifetime of one form session.

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ScopeId
// ---------------------------------------------------------------------------

/// Opaque identity of one container.
///
/// Ids are only meaningful within the bus that allocated them. Id 0 is never
/// handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScopeId(u64);

impl ScopeId {
    /// Create an id from a raw value (for testing/deserialization).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A container identity together with its ancestor chain.
///
/// Cloning is cheap: the lineage is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scope {
    id: ScopeId,
    /// Enclosing scopes, outermost first. Empty for a root scope.
    lineage: Arc<[ScopeId]>,
}

impl Scope {
    pub(crate) fn root(id: ScopeId) -> Self {
        Self {
            id,
            lineage: Arc::from(Vec::new()),
        }
    }

    pub(crate) fn child(&self, id: ScopeId) -> Self {
        let mut lineage = Vec::with_capacity(self.lineage.len() + 1);
        lineage.extend_from_slice(&self.lineage);
        lineage.push(self.id);
        Self {
            id,
            lineage: Arc::from(lineage),
        }
    }

    /// This scope's own id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The immediately enclosing scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.lineage.last().copied()
    }

    /// Enclosing scope ids, outermost first.
    #[must_use]
    pub fn ancestors(&self) -> &[ScopeId] {
        &self.lineage
    }

    /// Nesting depth; 0 for a root scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lineage.len()
    }

    /// Returns `true` if this scope's id is exactly `id`.
    #[must_use]
    pub fn is(&self, id: ScopeId) -> bool {
        self.id == id
    }

    /// Returns `true` if this scope is `ancestor` or nested anywhere inside it.
    #[must_use]
    pub fn is_within(&self, ancestor: ScopeId) -> bool {
        self.id == ancestor || self.lineage.contains(&ancestor)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ancestor in self.lineage.iter() {
            write!(f, "{}/", ancestor.raw())?;
        }
        write!(f, "{}", self.id.raw())
    }
}
