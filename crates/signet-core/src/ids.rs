//! Strongly-typed identifiers used across the workspace.
//!
//! Every entity gets its own newtype over [`Uuid`] so that a person id can
//! never be passed where a group id is expected. All id types serialize
//! transparently as plain UUID strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when parsing an id from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    id_type: &'static str,
    message: String,
}

impl ParseIdError {
    /// The name of the id type that failed to parse.
    #[must_use]
    pub fn id_type(&self) -> &'static str {
        self.id_type
    }
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing [`Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying [`Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Unwraps the id into its underlying [`Uuid`].
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    message: e.to_string(),
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifies a person known to the governance engine.
    PersonId
}

define_id! {
    /// Identifies a role a person can hold.
    RoleId
}

define_id! {
    /// Identifies a named permission granted through roles.
    PermissionId
}

define_id! {
    /// Identifies a per-integration identity of a person.
    IdentityId
}

define_id! {
    /// Identifies a grantable entitlement in the catalog.
    EntitlementId
}

define_id! {
    /// Identifies a governed group.
    GroupId
}

define_id! {
    /// Identifies a person's membership in a group.
    MembershipId
}

define_id! {
    /// Identifies an individual access request.
    AccessRequestId
}

define_id! {
    /// Identifies a group-scoped access request.
    GroupAccessRequestId
}

define_id! {
    /// Identifies a recorded audit event.
    AuditEventId
}
