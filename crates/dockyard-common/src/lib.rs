// Shared error taxonomy, lifecycle outcome vocabulary, and the authorization
// predicate used by every crate in the workspace.

use std::fmt::Display;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockyardError {
    #[error("access denied")]
    AccessDenied,

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("engine call failed: {0}")]
    Engine(String),

    #[error("engine call timed out after {0}ms")]
    EngineTimeout(u64),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("local store and engine state diverged: {0}")]
    Consistency(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DockyardError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

// Define the primary Result type for panel operations
pub type Result<T> = std::result::Result<T, DockyardError>;

/// Lifecycle operations the engine is asked to perform on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOp {
    Start,
    Stop,
    Restart,
    Remove,
}

/// The closed vocabulary every raw engine status code is mapped into before
/// any result reaches a caller. Raw codes never leak past this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOutcome {
    Started,
    AlreadyStarted,
    Stopped,
    Restarted,
    Removed,
    StopBeforeRemoving,
    NotFound,
    BadParameter,
    ServerError,
    Unknown,
}

impl LifecycleOutcome {
    /// Map an engine HTTP status code to an outcome for the given operation.
    ///
    /// 204 is the engine's generic success; 304 means the container was
    /// already in the requested state, which for stop is still "stopped".
    pub fn from_status(op: LifecycleOp, status: u16) -> Self {
        match (op, status) {
            (LifecycleOp::Start, 204) => Self::Started,
            (LifecycleOp::Start, 304) => Self::AlreadyStarted,
            (LifecycleOp::Stop, 204 | 304) => Self::Stopped,
            (LifecycleOp::Restart, 204) => Self::Restarted,
            (LifecycleOp::Remove, 204) => Self::Removed,
            (LifecycleOp::Remove, 409) => Self::StopBeforeRemoving,
            (_, 404) => Self::NotFound,
            (_, 400) => Self::BadParameter,
            (_, 500) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::Started | Self::AlreadyStarted | Self::Stopped | Self::Restarted | Self::Removed
        )
    }
}

impl Display for LifecycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::AlreadyStarted => "already_started",
            Self::Stopped => "stopped",
            Self::Restarted => "restarted",
            Self::Removed => "removed",
            Self::StopBeforeRemoving => "stop_before_removing",
            Self::NotFound => "not_found",
            Self::BadParameter => "bad_parameter",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The identity a request acts as, resolved from the store at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Actor {
    pub fn new(user_id: i64, is_admin: bool) -> Self {
        Self { user_id, is_admin }
    }
}

/// The single ownership rule: an actor may operate on an entity iff the actor
/// is an administrator or is among the entity's recorded owners.
///
/// Every lifecycle and telemetry operation goes through this one predicate;
/// nothing re-implements the check per handler.
pub fn can_access(actor: &Actor, owner_ids: &[i64]) -> bool {
    actor.is_admin || owner_ids.contains(&actor.user_id)
}

/// Guard form of [`can_access`] for use with `?`.
pub fn authorize(actor: &Actor, owner_ids: &[i64]) -> Result<()> {
    if can_access(actor, owner_ids) {
        Ok(())
    } else {
        Err(DockyardError::AccessDenied)
    }
}

/// Guard that only administrators pass.
pub fn authorize_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(DockyardError::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_mapping_start() {
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Start, 204),
            LifecycleOutcome::Started
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Start, 304),
            LifecycleOutcome::AlreadyStarted
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Start, 404),
            LifecycleOutcome::NotFound
        );
    }

    #[test]
    fn outcome_mapping_stop_is_idempotent() {
        // Stopping an already-stopped container (304) reports "stopped" too.
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Stop, 204),
            LifecycleOutcome::Stopped
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Stop, 304),
            LifecycleOutcome::Stopped
        );
    }

    #[test]
    fn outcome_mapping_remove() {
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Remove, 204),
            LifecycleOutcome::Removed
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Remove, 409),
            LifecycleOutcome::StopBeforeRemoving
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Remove, 500),
            LifecycleOutcome::ServerError
        );
        assert_eq!(
            LifecycleOutcome::from_status(LifecycleOp::Remove, 418),
            LifecycleOutcome::Unknown
        );
    }

    #[test]
    fn authorization_predicate_exhaustive() {
        let owner = Actor::new(1, false);
        let other = Actor::new(2, false);
        let admin = Actor::new(3, true);
        let owners = vec![1i64];

        // single-owner entity (Image-shaped)
        assert!(can_access(&owner, &owners));
        assert!(!can_access(&other, &owners));
        assert!(can_access(&admin, &owners));

        // multi-owner entity (Container-shaped)
        let shared = vec![1i64, 2];
        assert!(can_access(&owner, &shared));
        assert!(can_access(&other, &shared));
        assert!(can_access(&admin, &shared));
        assert!(!can_access(&Actor::new(9, false), &shared));
    }

    #[test]
    fn authorize_denies_with_error() {
        let actor = Actor::new(7, false);
        assert!(matches!(
            authorize(&actor, &[1]),
            Err(DockyardError::AccessDenied)
        ));
        assert!(matches!(
            authorize_admin(&actor),
            Err(DockyardError::AccessDenied)
        ));
        assert!(authorize_admin(&Actor::new(7, true)).is_ok());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleOutcome::StopBeforeRemoving).unwrap();
        assert_eq!(json, "\"stop_before_removing\"");
    }
}
