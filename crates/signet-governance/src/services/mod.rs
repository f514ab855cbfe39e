//! Business logic services for access governance.

pub mod approval;
pub mod catalog;
pub mod group;
pub mod group_request;
pub mod identity;
pub mod offboarding;
pub mod person;
pub mod request;

pub use approval::{
    ApprovalService, ALLOW_USER_OFFBOARD_PERMISSION, DEFAULT_APPROVER_PERMISSION,
};
pub use catalog::{CatalogService, CreateEntitlementInput, Entitlement, ListOptions};
pub use group::{
    CreateGroupInput, Group, GroupService, Membership, MembershipFilter, PendingGroupCreation,
};
pub use group_request::{
    GroupAccessRequest, GroupAccessRequestDetails, GroupAccessRequestService,
};
pub use identity::{Identity, IdentityReplication, IdentityService};
pub use offboarding::{OffboardingService, OffboardingStats};
pub use person::{EnsurePersonInput, Permission, Person, PersonService, Role, UpdatePersonInput};
pub use request::{
    AccessRequest, AccessRequestDetails, AccessRequestService, CreateAccessRequestInput,
    APPROVAL_SLA_HOURS,
};
