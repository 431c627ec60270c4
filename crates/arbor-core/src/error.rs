use thiserror::Error;

/// Communication-layer failures.
///
/// Only two kinds exist on purpose:
/// - `Timeout`: no reply arrived before the deadline. Always retryable; cyclic
///   queries count these against their missed-message budget.
/// - `Runtime`: any other transport or protocol failure. Always terminal for
///   the cyclic query that observed it and surfaced to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommunicationError {
    #[error("{message}")]
    Timeout { message: String },

    #[error("{message}")]
    Runtime { message: String },
}

impl CommunicationError {
    /// Timeout with the default message.
    pub fn timeout_default() -> Self {
        Self::timeout("the response did not come before timeout")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_runtime_are_distinct() {
        let t = CommunicationError::timeout_default();
        let r = CommunicationError::runtime("boom");
        assert!(t.is_timeout());
        assert!(!r.is_timeout());
        assert_ne!(t, r);
    }

    #[test]
    fn display_uses_message() {
        let e = CommunicationError::runtime("router gone");
        assert_eq!(e.to_string(), "router gone");
    }
}
