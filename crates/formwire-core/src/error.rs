#![forbid(unsafe_code)]

//! Bus error types.

use std::fmt;

use crate::scope::ScopeId;

/// A configuration error detected while publishing.
///
/// User input errors never surface here; they are field state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Re-entrant publishing went deeper than the configured limit, which
    /// means derived fields are feeding each other in a cycle.
    CycleDetected {
        /// Name on the announcement that crossed the limit.
        name: String,
        depth: usize,
        limit: usize,
    },
    /// One drain delivered more announcements than the configured budget.
    DeliveryBudgetExhausted { deliveries: usize, limit: usize },
    /// Two fields mounted with the same name inside one scope.
    ///
    /// The second mount is still delivered (last writer wins).
    DuplicateField { name: String, scope: ScopeId },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { name, depth, limit } => write!(
                f,
                "publish depth {depth} exceeds limit {limit} at field `{name}` (derived field cycle?)"
            ),
            Self::DeliveryBudgetExhausted { deliveries, limit } => write!(
                f,
                "delivery budget exhausted after {deliveries} deliveries (limit {limit})"
            ),
            Self::DuplicateField { name, scope } => {
                write!(f, "field `{name}` mounted twice in {scope}")
            }
        }
    }
}

impl std::error::Error for BusError {}

/// Failure reported by a single subscriber.
///
/// The bus logs it and keeps delivering to the remaining subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let cycle = BusError::CycleDetected {
            name: "pop".into(),
            depth: 33,
            limit: 32,
        };
        assert!(cycle.to_string().contains("depth 33 exceeds limit 32"));

        let dup = BusError::DuplicateField {
            name: "number".into(),
            scope: ScopeId::from_raw(4),
        };
        assert_eq!(dup.to_string(), "field `number` mounted twice in scope#4");

        assert_eq!(HandlerError::new("boom").to_string(), "boom");
    }
}
