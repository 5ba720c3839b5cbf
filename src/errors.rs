//! Error types for dispatch operations
//!
//! Every actor-facing failure is a typed, recoverable rejection. Delivery
//! failures never appear here synchronously; they are handled inside the
//! notification dispatcher and surface only as a manager-facing alert once
//! the retry budget is spent.

use thiserror::Error;

/// Errors that can occur in dispatch operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Attempted edge is not in the state transition table
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// Acting role lacks permission for the attempted action
    #[error("Unauthorized actor: {role} may not {action}")]
    UnauthorizedActor {
        /// Role the actor acted under
        role: String,
        /// The action that was refused
        action: String,
    },

    /// Invariant violation, e.g. reporting a second active issue
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown trip or issue id
    #[error("Not found: {entity} with id {id}")]
    NotFound {
        /// Kind of entity that wasn't found
        entity: String,
        /// ID that was searched for
        id: String,
    },

    /// Intent is missing its idempotency key or a required payload field
    #[error("Malformed intent: {0}")]
    MalformedIntent(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistence collaborator failed
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

impl DispatchError {
    /// Create a not-found error for a trip id
    pub fn trip_not_found(id: impl std::fmt::Display) -> Self {
        DispatchError::NotFound {
            entity: "Trip".to_string(),
            id: id.to_string(),
        }
    }

    /// Create a not-found error for an issue id
    pub fn issue_not_found(id: impl std::fmt::Display) -> Self {
        DispatchError::NotFound {
            entity: "Issue".to_string(),
            id: id.to_string(),
        }
    }

    /// Check if this error is an actor-facing rejection (recoverable,
    /// returned to the caller rather than logged as a system fault)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidTransition { .. }
                | DispatchError::UnauthorizedActor { .. }
                | DispatchError::Conflict(_)
                | DispatchError::NotFound { .. }
                | DispatchError::MalformedIntent(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = DispatchError::InvalidTransition {
            from: "Created".to_string(),
            to: "Delivered".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid transition from Created to Delivered");

        let err = DispatchError::UnauthorizedActor {
            role: "Shipper".to_string(),
            action: "assign_driver".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unauthorized actor: Shipper may not assign_driver"
        );

        let err = DispatchError::Conflict("active issue already open".to_string());
        assert_eq!(err.to_string(), "Conflict: active issue already open");

        let err = DispatchError::NotFound {
            entity: "Trip".to_string(),
            id: "t-123".to_string(),
        };
        assert_eq!(err.to_string(), "Not found: Trip with id t-123");

        let err = DispatchError::MalformedIntent("missing idempotency key".to_string());
        assert_eq!(err.to_string(), "Malformed intent: missing idempotency key");

        let err = DispatchError::Storage("write failed".to_string());
        assert_eq!(err.to_string(), "Storage error: write failed");
    }

    #[test]
    fn test_is_rejection() {
        assert!(DispatchError::InvalidTransition {
            from: "A".to_string(),
            to: "B".to_string(),
        }
        .is_rejection());
        assert!(DispatchError::UnauthorizedActor {
            role: "Driver".to_string(),
            action: "complete_trip".to_string(),
        }
        .is_rejection());
        assert!(DispatchError::Conflict("dup".to_string()).is_rejection());
        assert!(DispatchError::trip_not_found("t-1").is_rejection());
        assert!(DispatchError::MalformedIntent("no key".to_string()).is_rejection());

        // System faults are not rejections
        assert!(!DispatchError::Storage("disk".to_string()).is_rejection());
        assert!(!DispatchError::Serialization("bad json".to_string()).is_rejection());
    }

    #[test]
    fn test_not_found_constructors() {
        let err = DispatchError::trip_not_found("abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Trip with id abc");

        let err = DispatchError::issue_not_found("xyz");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Issue with id xyz");

        assert!(!DispatchError::Conflict("x".to_string()).is_not_found());
    }

    #[test]
    fn test_serde_json_conversion() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{ nope }").unwrap_err();
        let err: DispatchError = serde_err.into();
        match err {
            DispatchError::Serialization(msg) => assert!(!msg.is_empty()),
            other => panic!("expected Serialization, got {other:?}"),
        }
    }

    #[test]
    fn test_all_errors_clone() {
        let errors = vec![
            DispatchError::InvalidTransition {
                from: "A".to_string(),
                to: "B".to_string(),
            },
            DispatchError::UnauthorizedActor {
                role: "Driver".to_string(),
                action: "create_trip".to_string(),
            },
            DispatchError::Conflict("test".to_string()),
            DispatchError::trip_not_found("1"),
            DispatchError::MalformedIntent("test".to_string()),
            DispatchError::Serialization("test".to_string()),
            DispatchError::Storage("test".to_string()),
        ];

        for error in errors {
            let cloned = error.clone();
            assert_eq!(error, cloned);
        }
    }
}
