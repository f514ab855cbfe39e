//! Database entity models for signet-db.
//!
//! Each module pairs a row struct for one table with the
//! PostgreSQL-backed implementation of the matching store trait
//! from signet-governance.

pub mod access_request;
pub mod audit_event;
pub mod entitlement;
pub mod group;
pub mod group_access_request;
pub mod identity;
pub mod membership;
pub mod person;

pub use access_request::{AccessRequestRow, PgAccessRequestStore};
pub use audit_event::{AuditEventRow, PgAuditStore};
pub use entitlement::{EntitlementRow, PgEntitlementStore};
pub use group::{GroupRow, PgGroupStore};
pub use group_access_request::{GroupAccessRequestRow, PgGroupAccessRequestStore};
pub use identity::{IdentityRow, PgIdentityStore};
pub use membership::{MembershipRow, PgMembershipStore};
pub use person::{PermissionRow, PersonRow, PgPersonStore};
