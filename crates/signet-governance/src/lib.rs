//! Access governance domain logic.
//!
//! This crate provides the core domain logic for an internal access
//! management tool: individual and group access requests, self-service
//! groups with memberships, per-integration identities, approval policy
//! evaluation, and offboarding.
//!
//! # Features
//!
//! - Individual access requests with a two-tier approval ladder and
//!   explicit grant/revoke pipeline states
//! - Group access requests that fan out to per-member individual requests
//!   on approval
//! - Self-service groups whose creation is itself an approvable request
//! - One active identity per person and integration, with grant
//!   replication when an identity is re-pointed
//! - Pluggable integrations through the [`registry::AccessModule`] trait
//! - Set-based offboarding sweeps with explicit completion
//! - Audit logging for every state transition
//!
//! # Services
//!
//! The [`services`] module provides business logic for:
//! - [`services::PersonService`] - Person lifecycle, roles, and permissions
//! - [`services::CatalogService`] - Entitlement catalog per integration
//! - [`services::IdentityService`] - Per-integration identities and grant
//!   replication
//! - [`services::AccessRequestService`] - The individual request state
//!   machine
//! - [`services::GroupService`] - Group lifecycle and memberships
//! - [`services::GroupAccessRequestService`] - Group requests and member
//!   fan-out
//! - [`services::ApprovalService`] - Who may approve what
//! - [`services::OffboardingService`] - Walking a person out of the system
//!
//! # Audit
//!
//! The [`audit`] module records every decision and transition:
//! - [`audit::AuditStore`] trait for pluggable storage backends
//! - [`audit::InMemoryAuditStore`] for testing
//! - [`audit::GovernanceAuditEvent`] for tracking changes

pub mod audit;
pub mod error;
pub mod registry;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use error::{GovernanceError, Result};
pub use types::{
    AccessRequestStatus,
    AccessType,
    ApprovalTier,
    GroupAccessStatus,
    GroupStatus,
    IdentityStatus,
    MembershipStatus,
    PersonState,
};

// Re-export service types
pub use services::{
    AccessRequest,
    AccessRequestDetails,
    AccessRequestService,
    ApprovalService,
    CatalogService,
    CreateAccessRequestInput,
    CreateEntitlementInput,
    CreateGroupInput,
    EnsurePersonInput,
    Entitlement,
    Group,
    GroupAccessRequest,
    GroupAccessRequestDetails,
    GroupAccessRequestService,
    GroupService,
    Identity,
    IdentityReplication,
    IdentityService,
    ListOptions,
    Membership,
    OffboardingService,
    OffboardingStats,
    Permission,
    Person,
    PersonService,
    Role,
    ALLOW_USER_OFFBOARD_PERMISSION,
    APPROVAL_SLA_HOURS,
    DEFAULT_APPROVER_PERMISSION,
};

// Re-export module registry types
pub use registry::{AccessModule, ApproverPermissions, ModuleRegistry, PendingAccessObjects};

// Re-export audit types
pub use audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEvent, InMemoryAuditStore};
