//! Error types for the governance domain.
//!
//! Lookups that may legitimately find nothing return `Option`; the variants
//! here are reserved for operations that cannot proceed. State predicates
//! such as [`crate::types::AccessRequestStatus::is_already_processed`] are
//! plain booleans, never errors.

use signet_core::{EntitlementId, GroupId, IdentityId, PersonId};
use thiserror::Error;

/// Errors raised by governance services.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// An operation referenced a person that does not exist.
    #[error("Person not found: {0}")]
    PersonNotFound(PersonId),

    /// An operation referenced an identity that does not exist.
    #[error("Identity not found: {0}")]
    IdentityNotFound(IdentityId),

    /// An operation referenced an entitlement that does not exist.
    #[error("Entitlement not found: {0}")]
    EntitlementNotFound(EntitlementId),

    /// An operation referenced a group that does not exist.
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// An operation referenced a membership handle that does not exist.
    #[error("Membership not found: {0}")]
    MembershipNotFound(String),

    /// An operation referenced a request handle that does not exist.
    #[error("Access request not found: {0}")]
    AccessRequestNotFound(String),

    /// An operation referenced a group request handle that does not exist.
    #[error("Group access request not found: {0}")]
    GroupAccessRequestNotFound(String),

    /// The record's current status does not permit the attempted action.
    ///
    /// Carries the current status (rendered) and the action that was refused.
    #[error("Cannot {action} while in status {status}")]
    InvalidTransition {
        /// Current status of the record.
        status: String,
        /// The action that was attempted.
        action: &'static str,
    },

    /// A decision was attempted on a request that already reached a decision.
    #[error("Request already processed: status is {0}")]
    AlreadyProcessed(String),

    /// The requester and the approver are the same person.
    #[error("Requesters cannot decide their own requests")]
    SelfApprovalNotAllowed,

    /// Declining requires a reason.
    #[error("A reason is required to decline")]
    DeclineReasonRequired,

    /// A live (pending or approved) group already uses this name.
    #[error("Group name already in use: {0}")]
    GroupNameExists(String),

    /// The person already holds a live membership in the group.
    #[error("Person already has a live membership in this group")]
    MembershipExists,

    /// The person already holds a live request for this entitlement.
    #[error("Person already has a live request for this entitlement")]
    AccessRequestExists,

    /// The group already holds a live request for this entitlement.
    #[error("Group already has a live request for this entitlement")]
    GroupAccessRequestExists,

    /// Another request already carries this external request id.
    #[error("Request id already in use: {0}")]
    DuplicateRequestId(String),

    /// The person already has an active identity for this integration.
    #[error("Person already has an active identity for {0}")]
    ActiveIdentityExists(String),

    /// No access module is registered under the given tag.
    #[error("No access module registered for tag: {0}")]
    ModuleNotRegistered(String),

    /// A storage backend failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GovernanceError {
    /// Check if this error reports a missing record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GovernanceError::PersonNotFound(_)
                | GovernanceError::IdentityNotFound(_)
                | GovernanceError::EntitlementNotFound(_)
                | GovernanceError::GroupNotFound(_)
                | GovernanceError::MembershipNotFound(_)
                | GovernanceError::AccessRequestNotFound(_)
                | GovernanceError::GroupAccessRequestNotFound(_)
        )
    }

    /// Check if this error reports a refused state transition.
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            GovernanceError::InvalidTransition { .. }
                | GovernanceError::AlreadyProcessed(_)
                | GovernanceError::SelfApprovalNotAllowed
                | GovernanceError::DeclineReasonRequired
        )
    }

    /// Check if this error reports a uniqueness or liveness conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GovernanceError::GroupNameExists(_)
                | GovernanceError::MembershipExists
                | GovernanceError::AccessRequestExists
                | GovernanceError::GroupAccessRequestExists
                | GovernanceError::DuplicateRequestId(_)
                | GovernanceError::ActiveIdentityExists(_)
        )
    }
}

/// Type alias for Results using [`GovernanceError`].
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_includes_handle() {
        let err = GovernanceError::AccessRequestNotFound("ada-individual-0".to_string());
        assert!(err.to_string().contains("ada-individual-0"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = GovernanceError::InvalidTransition {
            status: "declined".to_string(),
            action: "approve",
        };
        assert_eq!(err.to_string(), "Cannot approve while in status declined");
        assert!(err.is_invalid_transition());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_self_approval_is_invalid_transition() {
        let err = GovernanceError::SelfApprovalNotAllowed;
        assert!(err.is_invalid_transition());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_conflict_predicates() {
        let err = GovernanceError::GroupNameExists("data-eng".to_string());
        assert!(err.is_conflict());
        assert!(!err.is_invalid_transition());
    }
}
