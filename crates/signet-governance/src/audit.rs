//! Audit logging for governance operations.
//!
//! Every state change recorded by the services lands here as an immutable
//! event: who acted, what the record looked like before and after, and when.
//!
//! # Example
//!
//! ```rust,ignore
//! use signet_governance::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput, InMemoryAuditStore};
//! use signet_core::PersonId;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryAuditStore::new());
//! let input = GovernanceAuditEventInput {
//!     action: GovernanceAuditAction::RequestCreated,
//!     actor_id: Some(PersonId::new()),
//!     ..Default::default()
//! };
//! let event = store.log_event(input).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{
    AccessRequestId, AuditEventId, EntitlementId, GroupAccessRequestId, GroupId, IdentityId,
    MembershipId, PersonId,
};

use crate::error::Result;

/// Action recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceAuditAction {
    /// An individual access request was raised.
    #[default]
    RequestCreated,
    /// An approval step was recorded on an individual request.
    RequestApproved,
    /// An individual request was declined.
    RequestDeclined,
    /// A grant landed on the integration.
    GrantCompleted,
    /// A grant attempt failed.
    GrantFailed,
    /// A failed grant was queued again.
    GrantRetried,
    /// An approved request entered the offboarding queue.
    RequestOffboarding,
    /// A revoke was put in flight.
    RevokeInitiated,
    /// A revoke landed on the integration.
    RevokeCompleted,
    /// A revoke attempt failed.
    RevokeFailed,
    /// A failed revoke was queued again.
    RevokeRetried,
    /// A group access request was raised.
    GroupRequestCreated,
    /// A group access request was approved.
    GroupRequestApproved,
    /// A group access request was declined.
    GroupRequestDeclined,
    /// A group access request was revoked.
    GroupRequestRevoked,
    /// Member requests were fanned out from an approved group request.
    GroupRequestFannedOut,
    /// A group creation was requested.
    GroupCreated,
    /// A group creation was approved.
    GroupApproved,
    /// A group creation was declined.
    GroupDeclined,
    /// An approved group was sent back to pending.
    GroupUnapproved,
    /// A group was retired.
    GroupDeprecated,
    /// A group lost its last owner.
    GroupOwnerless,
    /// A membership was requested.
    MembershipRequested,
    /// A membership was approved.
    MembershipApproved,
    /// A membership was declined.
    MembershipDeclined,
    /// A membership was revoked.
    MembershipRevoked,
    /// An approved membership was sent back to pending.
    MembershipUnapproved,
    /// An identity was registered for an integration.
    IdentityCreated,
    /// An identity was retired.
    IdentityDeactivated,
    /// Grants were replicated onto a fresh identity.
    IdentityReplicated,
    /// A person was registered.
    PersonCreated,
    /// Offboarding was started for a person.
    PersonOffboarded,
    /// Offboarding finished; the person holds nothing.
    OffboardingCompleted,
    /// An entitlement was added to the catalog.
    EntitlementCreated,
}

impl std::fmt::Display for GovernanceAuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestCreated => write!(f, "request_created"),
            Self::RequestApproved => write!(f, "request_approved"),
            Self::RequestDeclined => write!(f, "request_declined"),
            Self::GrantCompleted => write!(f, "grant_completed"),
            Self::GrantFailed => write!(f, "grant_failed"),
            Self::GrantRetried => write!(f, "grant_retried"),
            Self::RequestOffboarding => write!(f, "request_offboarding"),
            Self::RevokeInitiated => write!(f, "revoke_initiated"),
            Self::RevokeCompleted => write!(f, "revoke_completed"),
            Self::RevokeFailed => write!(f, "revoke_failed"),
            Self::RevokeRetried => write!(f, "revoke_retried"),
            Self::GroupRequestCreated => write!(f, "group_request_created"),
            Self::GroupRequestApproved => write!(f, "group_request_approved"),
            Self::GroupRequestDeclined => write!(f, "group_request_declined"),
            Self::GroupRequestRevoked => write!(f, "group_request_revoked"),
            Self::GroupRequestFannedOut => write!(f, "group_request_fanned_out"),
            Self::GroupCreated => write!(f, "group_created"),
            Self::GroupApproved => write!(f, "group_approved"),
            Self::GroupDeclined => write!(f, "group_declined"),
            Self::GroupUnapproved => write!(f, "group_unapproved"),
            Self::GroupDeprecated => write!(f, "group_deprecated"),
            Self::GroupOwnerless => write!(f, "group_ownerless"),
            Self::MembershipRequested => write!(f, "membership_requested"),
            Self::MembershipApproved => write!(f, "membership_approved"),
            Self::MembershipDeclined => write!(f, "membership_declined"),
            Self::MembershipRevoked => write!(f, "membership_revoked"),
            Self::MembershipUnapproved => write!(f, "membership_unapproved"),
            Self::IdentityCreated => write!(f, "identity_created"),
            Self::IdentityDeactivated => write!(f, "identity_deactivated"),
            Self::IdentityReplicated => write!(f, "identity_replicated"),
            Self::PersonCreated => write!(f, "person_created"),
            Self::PersonOffboarded => write!(f, "person_offboarded"),
            Self::OffboardingCompleted => write!(f, "offboarding_completed"),
            Self::EntitlementCreated => write!(f, "entitlement_created"),
        }
    }
}

impl std::str::FromStr for GovernanceAuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request_created" => Ok(Self::RequestCreated),
            "request_approved" => Ok(Self::RequestApproved),
            "request_declined" => Ok(Self::RequestDeclined),
            "grant_completed" => Ok(Self::GrantCompleted),
            "grant_failed" => Ok(Self::GrantFailed),
            "grant_retried" => Ok(Self::GrantRetried),
            "request_offboarding" => Ok(Self::RequestOffboarding),
            "revoke_initiated" => Ok(Self::RevokeInitiated),
            "revoke_completed" => Ok(Self::RevokeCompleted),
            "revoke_failed" => Ok(Self::RevokeFailed),
            "revoke_retried" => Ok(Self::RevokeRetried),
            "group_request_created" => Ok(Self::GroupRequestCreated),
            "group_request_approved" => Ok(Self::GroupRequestApproved),
            "group_request_declined" => Ok(Self::GroupRequestDeclined),
            "group_request_revoked" => Ok(Self::GroupRequestRevoked),
            "group_request_fanned_out" => Ok(Self::GroupRequestFannedOut),
            "group_created" => Ok(Self::GroupCreated),
            "group_approved" => Ok(Self::GroupApproved),
            "group_declined" => Ok(Self::GroupDeclined),
            "group_unapproved" => Ok(Self::GroupUnapproved),
            "group_deprecated" => Ok(Self::GroupDeprecated),
            "group_ownerless" => Ok(Self::GroupOwnerless),
            "membership_requested" => Ok(Self::MembershipRequested),
            "membership_approved" => Ok(Self::MembershipApproved),
            "membership_declined" => Ok(Self::MembershipDeclined),
            "membership_revoked" => Ok(Self::MembershipRevoked),
            "membership_unapproved" => Ok(Self::MembershipUnapproved),
            "identity_created" => Ok(Self::IdentityCreated),
            "identity_deactivated" => Ok(Self::IdentityDeactivated),
            "identity_replicated" => Ok(Self::IdentityReplicated),
            "person_created" => Ok(Self::PersonCreated),
            "person_offboarded" => Ok(Self::PersonOffboarded),
            "offboarding_completed" => Ok(Self::OffboardingCompleted),
            "entitlement_created" => Ok(Self::EntitlementCreated),
            _ => Err(format!("Unknown audit action: {s}")),
        }
    }
}

/// An audit event for governance operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceAuditEvent {
    /// Unique identifier for the event.
    pub id: AuditEventId,
    /// Action performed.
    pub action: GovernanceAuditAction,
    /// Person who performed the action, if it was not system-driven.
    pub actor_id: Option<PersonId>,
    /// The person the action was about (if any).
    pub person_id: Option<PersonId>,
    /// The entitlement involved (if any).
    pub entitlement_id: Option<EntitlementId>,
    /// The individual request involved (if any).
    pub request_id: Option<AccessRequestId>,
    /// The group request involved (if any).
    pub group_request_id: Option<GroupAccessRequestId>,
    /// The group involved (if any).
    pub group_id: Option<GroupId>,
    /// The membership involved (if any).
    pub membership_id: Option<MembershipId>,
    /// The identity involved (if any).
    pub identity_id: Option<IdentityId>,
    /// State before the change (JSON).
    pub before_state: Option<serde_json::Value>,
    /// State after the change (JSON).
    pub after_state: Option<serde_json::Value>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Additional metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Input for creating an audit event.
#[derive(Debug, Clone, Default)]
pub struct GovernanceAuditEventInput {
    /// Action performed.
    pub action: GovernanceAuditAction,
    /// Person who performed the action, if it was not system-driven.
    pub actor_id: Option<PersonId>,
    /// The person the action was about (if any).
    pub person_id: Option<PersonId>,
    /// The entitlement involved (if any).
    pub entitlement_id: Option<EntitlementId>,
    /// The individual request involved (if any).
    pub request_id: Option<AccessRequestId>,
    /// The group request involved (if any).
    pub group_request_id: Option<GroupAccessRequestId>,
    /// The group involved (if any).
    pub group_id: Option<GroupId>,
    /// The membership involved (if any).
    pub membership_id: Option<MembershipId>,
    /// The identity involved (if any).
    pub identity_id: Option<IdentityId>,
    /// State before the change (JSON).
    pub before_state: Option<serde_json::Value>,
    /// State after the change (JSON).
    pub after_state: Option<serde_json::Value>,
    /// Additional metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditEventFilter {
    /// Filter by the subject person.
    pub person_id: Option<PersonId>,
    /// Filter by individual request.
    pub request_id: Option<AccessRequestId>,
    /// Filter by group request.
    pub group_request_id: Option<GroupAccessRequestId>,
    /// Filter by group.
    pub group_id: Option<GroupId>,
    /// Filter by actor.
    pub actor_id: Option<PersonId>,
    /// Filter by action type.
    pub action: Option<GovernanceAuditAction>,
    /// Filter by events after this date.
    pub from_date: Option<DateTime<Utc>>,
    /// Filter by events before this date.
    pub to_date: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: Option<usize>,
}

/// Trait for audit event storage backends.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Log an audit event.
    async fn log_event(&self, input: GovernanceAuditEventInput) -> Result<GovernanceAuditEvent>;

    /// Query audit events, most recent first.
    async fn query_events(&self, filter: AuditEventFilter) -> Result<Vec<GovernanceAuditEvent>>;

    /// Get a specific audit event by ID.
    async fn get_event(&self, event_id: AuditEventId) -> Result<Option<GovernanceAuditEvent>>;
}

/// In-memory audit store for testing.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    events: Arc<RwLock<HashMap<AuditEventId, GovernanceAuditEvent>>>,
}

impl InMemoryAuditStore {
    /// Create a new in-memory audit store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the count of events in the store.
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clear all events (for testing).
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    /// Get all events (for testing).
    #[must_use]
    pub fn get_all(&self) -> Vec<GovernanceAuditEvent> {
        // Use try_read to avoid blocking
        self.events
            .try_read()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn log_event(&self, input: GovernanceAuditEventInput) -> Result<GovernanceAuditEvent> {
        let event = GovernanceAuditEvent {
            id: AuditEventId::new(),
            action: input.action,
            actor_id: input.actor_id,
            person_id: input.person_id,
            entitlement_id: input.entitlement_id,
            request_id: input.request_id,
            group_request_id: input.group_request_id,
            group_id: input.group_id,
            membership_id: input.membership_id,
            identity_id: input.identity_id,
            before_state: input.before_state,
            after_state: input.after_state,
            timestamp: Utc::now(),
            metadata: input.metadata,
        };

        self.events.write().await.insert(event.id, event.clone());
        Ok(event)
    }

    async fn query_events(&self, filter: AuditEventFilter) -> Result<Vec<GovernanceAuditEvent>> {
        let events = self.events.read().await;
        let mut results: Vec<_> = events
            .values()
            .filter(|e| filter.person_id.is_none_or(|id| e.person_id == Some(id)))
            .filter(|e| filter.request_id.is_none_or(|id| e.request_id == Some(id)))
            .filter(|e| {
                filter
                    .group_request_id
                    .is_none_or(|id| e.group_request_id == Some(id))
            })
            .filter(|e| filter.group_id.is_none_or(|id| e.group_id == Some(id)))
            .filter(|e| filter.actor_id.is_none_or(|id| e.actor_id == Some(id)))
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .filter(|e| filter.from_date.is_none_or(|d| e.timestamp >= d))
            .filter(|e| filter.to_date.is_none_or(|d| e.timestamp <= d))
            .cloned()
            .collect();

        // Sort by timestamp descending (most recent first)
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        // Apply offset and limit
        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);

        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_event(&self, event_id: AuditEventId) -> Result<Option<GovernanceAuditEvent>> {
        let events = self.events.read().await;
        Ok(events.get(&event_id).cloned())
    }
}
