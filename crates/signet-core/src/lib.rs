//! Signet Core Library
//!
//! Shared identifier types for the signet access-governance workspace.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (PersonId, GroupId, AccessRequestId, ...)
//!
//! # Example
//!
//! ```
//! use signet_core::{AccessRequestId, PersonId};
//!
//! let person_id = PersonId::new();
//! let request_id = AccessRequestId::new();
//!
//! // Ids of different entities are distinct types and cannot be mixed up.
//! let rendered = format!("{person_id}/{request_id}");
//! assert_eq!(rendered.len(), 73);
//! ```

pub mod ids;

// Re-export main types for convenient access
pub use ids::{
    AccessRequestId, AuditEventId, EntitlementId, GroupAccessRequestId, GroupId, IdentityId,
    MembershipId, ParseIdError, PermissionId, PersonId, RoleId,
};
