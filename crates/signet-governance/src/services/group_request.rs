//! Group access request state machine and member fan-out.
//!
//! A group access request asks for one entitlement on behalf of a whole
//! group. It walks Pending, optionally SecondaryPending, then Approved;
//! there is no grant tier at this level. The grant work happens on the
//! individual rows the fan-out creates for every approved member, which
//! then live their own lifecycle in [`super::request`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{EntitlementId, GroupAccessRequestId, GroupId, PersonId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::registry::ModuleRegistry;
use crate::types::{
    AccessRequestStatus, AccessType, ApprovalTier, GroupAccessStatus, GroupStatus,
    MembershipStatus,
};

use super::catalog::{EntitlementStore, ListOptions};
use super::group::{GroupStore, MembershipFilter, MembershipStore};
use super::identity::IdentityService;
use super::person::PersonStore;
use super::request::{AccessRequestService, CreateAccessRequestInput};

/// Statuses under which a group access request still occupies its
/// (group, entitlement) slot and still shows up for approvers.
pub const GROUP_REQUEST_ACTIVE_STATUSES: [GroupAccessStatus; 4] = [
    GroupAccessStatus::Approved,
    GroupAccessStatus::Pending,
    GroupAccessStatus::Declined,
    GroupAccessStatus::SecondaryPending,
];

// ============================================================================
// Domain Types
// ============================================================================

/// An access request raised on behalf of a whole group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAccessRequest {
    /// Unique identifier.
    pub id: GroupAccessRequestId,
    /// External handle, unique.
    pub request_id: String,
    /// The group the access is for.
    pub group_id: GroupId,
    /// The entitlement being requested.
    pub entitlement_id: EntitlementId,
    /// Integration tag of the entitlement, denormalized for filtering.
    pub access_tag: String,
    /// Who raised the request.
    pub requested_by_id: PersonId,
    /// Lifecycle status.
    pub status: GroupAccessStatus,
    /// Primary approver, once recorded.
    pub approver_1_id: Option<PersonId>,
    /// Secondary approver, once recorded.
    pub approver_2_id: Option<PersonId>,
    /// Why the group needs the access.
    pub request_reason: String,
    /// Why the request was declined, if it was.
    pub decline_reason: Option<String>,
    /// Who withdrew the access, if anyone.
    pub revoker_id: Option<PersonId>,
    /// When the request was raised.
    pub requested_on: DateTime<Utc>,
    /// When the request last changed.
    pub updated_on: DateTime<Utc>,
}

impl GroupAccessRequest {
    /// Check if the candidate would be deciding a request they raised.
    #[must_use]
    pub fn is_self_approval(&self, candidate: PersonId) -> bool {
        self.requested_by_id == candidate
    }
}

/// Fields that can change on a stored group access request.
#[derive(Debug, Clone, Default)]
pub struct UpdateGroupAccessRequestInput {
    /// New status.
    pub status: Option<GroupAccessStatus>,
    /// Primary approver.
    pub approver_1_id: Option<PersonId>,
    /// Secondary approver.
    pub approver_2_id: Option<PersonId>,
    /// Decline reason.
    pub decline_reason: Option<String>,
    /// Who withdrew the access.
    pub revoker_id: Option<PersonId>,
}

/// Filter options for listing group access requests.
#[derive(Debug, Clone, Default)]
pub struct GroupAccessRequestFilter {
    /// Filter by group.
    pub group_id: Option<GroupId>,
    /// Filter by entitlement.
    pub entitlement_id: Option<EntitlementId>,
    /// Filter by integration tag.
    pub access_tag: Option<String>,
    /// Filter by exact status.
    pub status: Option<GroupAccessStatus>,
    /// Filter by a set of statuses.
    pub statuses: Option<Vec<GroupAccessStatus>>,
    /// Filter by a substring of the external handle.
    pub request_id_contains: Option<String>,
}

/// A group access request rendered for review surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct GroupAccessRequestDetails {
    /// External handle.
    pub request_id: String,
    /// Integration tag.
    pub access_tag: String,
    /// Email of the requester.
    pub user_email: String,
    /// Name of the group.
    pub group_name: String,
    /// Why the group needs the access.
    pub reason: String,
    /// When the request was raised.
    pub requested_on: DateTime<Utc>,
    /// What the integration grants.
    pub access_description: String,
    /// Combined label description.
    pub access_category: String,
    /// Combined label metadata.
    pub access_meta: serde_json::Value,
    /// Current status.
    pub status: String,
    /// Who to ask about grants, comma separated.
    pub grant_owner: String,
    /// Who to ask about revokes, comma separated.
    pub revoke_owner: String,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for group access request storage backends.
#[async_trait::async_trait]
pub trait GroupAccessRequestStore: Send + Sync {
    /// Get a request by ID.
    async fn get(&self, id: GroupAccessRequestId) -> Result<Option<GroupAccessRequest>>;

    /// Get a request by its external handle.
    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<GroupAccessRequest>>;

    /// Insert a new request.
    ///
    /// A duplicate handle or a second active request for the same
    /// (group, entitlement) pair is a conflict.
    async fn insert(&self, request: GroupAccessRequest) -> Result<GroupAccessRequest>;

    /// Apply an update to a request.
    async fn update(
        &self,
        id: GroupAccessRequestId,
        input: UpdateGroupAccessRequestInput,
    ) -> Result<Option<GroupAccessRequest>>;

    /// List requests with filtering and pagination, newest first.
    async fn list(
        &self,
        filter: &GroupAccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<GroupAccessRequest>>;

    /// Count requests matching a filter.
    async fn count(&self, filter: &GroupAccessRequestFilter) -> Result<i64>;

    /// Move every request matching the filter to the given status.
    async fn bulk_update_status(
        &self,
        filter: &GroupAccessRequestFilter,
        to: GroupAccessStatus,
    ) -> Result<u64>;
}

fn request_matches(request: &GroupAccessRequest, filter: &GroupAccessRequestFilter) -> bool {
    filter.group_id.is_none_or(|id| request.group_id == id)
        && filter
            .entitlement_id
            .is_none_or(|id| request.entitlement_id == id)
        && filter
            .access_tag
            .as_ref()
            .is_none_or(|tag| &request.access_tag == tag)
        && filter.status.is_none_or(|s| request.status == s)
        && filter
            .statuses
            .as_ref()
            .is_none_or(|set| set.contains(&request.status))
        && filter
            .request_id_contains
            .as_ref()
            .is_none_or(|fragment| request.request_id.contains(fragment.as_str()))
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory group access request store for testing.
#[derive(Debug, Default)]
pub struct InMemoryGroupAccessRequestStore {
    requests: Arc<RwLock<HashMap<GroupAccessRequestId, GroupAccessRequest>>>,
}

impl InMemoryGroupAccessRequestStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.requests.write().await.clear();
    }
}

#[async_trait::async_trait]
impl GroupAccessRequestStore for InMemoryGroupAccessRequestStore {
    async fn get(&self, id: GroupAccessRequestId) -> Result<Option<GroupAccessRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<GroupAccessRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.request_id == request_id)
            .cloned())
    }

    async fn insert(&self, request: GroupAccessRequest) -> Result<GroupAccessRequest> {
        let mut requests = self.requests.write().await;
        if requests.values().any(|r| r.request_id == request.request_id) {
            return Err(GovernanceError::DuplicateRequestId(request.request_id));
        }
        if GROUP_REQUEST_ACTIVE_STATUSES.contains(&request.status)
            && requests.values().any(|r| {
                r.group_id == request.group_id
                    && r.entitlement_id == request.entitlement_id
                    && GROUP_REQUEST_ACTIVE_STATUSES.contains(&r.status)
            })
        {
            return Err(GovernanceError::GroupAccessRequestExists);
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        id: GroupAccessRequestId,
        input: UpdateGroupAccessRequestInput,
    ) -> Result<Option<GroupAccessRequest>> {
        let mut requests = self.requests.write().await;

        if let Some(request) = requests.get_mut(&id) {
            if let Some(status) = input.status {
                request.status = status;
            }
            if let Some(approver) = input.approver_1_id {
                request.approver_1_id = Some(approver);
            }
            if let Some(approver) = input.approver_2_id {
                request.approver_2_id = Some(approver);
            }
            if let Some(reason) = input.decline_reason {
                request.decline_reason = Some(reason);
            }
            if let Some(revoker) = input.revoker_id {
                request.revoker_id = Some(revoker);
            }
            request.updated_on = Utc::now();
            Ok(Some(request.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list(
        &self,
        filter: &GroupAccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<GroupAccessRequest>> {
        let requests = self.requests.read().await;

        let mut results: Vec<GroupAccessRequest> = requests
            .values()
            .filter(|r| request_matches(r, filter))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.requested_on
                .cmp(&a.requested_on)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });

        Ok(results
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &GroupAccessRequestFilter) -> Result<i64> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|r| request_matches(r, filter))
            .count() as i64)
    }

    async fn bulk_update_status(
        &self,
        filter: &GroupAccessRequestFilter,
        to: GroupAccessStatus,
    ) -> Result<u64> {
        let mut requests = self.requests.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for request in requests.values_mut() {
            if request_matches(request, filter) {
                request.status = to;
                request.updated_on = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for the group access request lifecycle.
pub struct GroupAccessRequestService {
    store: Arc<dyn GroupAccessRequestStore>,
    groups: Arc<dyn GroupStore>,
    memberships: Arc<dyn MembershipStore>,
    persons: Arc<dyn PersonStore>,
    entitlements: Arc<dyn EntitlementStore>,
    registry: Arc<ModuleRegistry>,
    identities: Arc<IdentityService>,
    requests: Arc<AccessRequestService>,
    audit_store: Arc<dyn AuditStore>,
}

impl GroupAccessRequestService {
    /// Create a new group access request service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn GroupAccessRequestStore>,
        groups: Arc<dyn GroupStore>,
        memberships: Arc<dyn MembershipStore>,
        persons: Arc<dyn PersonStore>,
        entitlements: Arc<dyn EntitlementStore>,
        registry: Arc<ModuleRegistry>,
        identities: Arc<IdentityService>,
        requests: Arc<AccessRequestService>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            store,
            groups,
            memberships,
            persons,
            entitlements,
            registry,
            identities,
            requests,
            audit_store,
        }
    }

    async fn require(&self, request_id: &str) -> Result<GroupAccessRequest> {
        self.store
            .get_by_request_id(request_id)
            .await?
            .ok_or_else(|| GovernanceError::GroupAccessRequestNotFound(request_id.to_string()))
    }

    async fn log_group_request_event(
        &self,
        action: GovernanceAuditAction,
        actor_id: Option<PersonId>,
        request: &GroupAccessRequest,
        before_state: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action,
                actor_id,
                entitlement_id: Some(request.entitlement_id),
                group_request_id: Some(request.id),
                group_id: Some(request.group_id),
                before_state,
                after_state: Some(serde_json::to_value(request).unwrap_or_default()),
                metadata,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Raise an access request on behalf of an approved group.
    ///
    /// One active request per (group, entitlement) pair; declined requests
    /// keep occupying the slot until revoked or inactivated. Groups created
    /// without the access-approval step land Approved immediately and fan
    /// out on the spot.
    pub async fn add_access(
        &self,
        group_id: GroupId,
        request_id: &str,
        requested_by_id: PersonId,
        reason: &str,
        entitlement_id: EntitlementId,
    ) -> Result<GroupAccessRequest> {
        let group = self
            .groups
            .get(group_id)
            .await?
            .ok_or(GovernanceError::GroupNotFound(group_id))?;
        if group.status != GroupStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "request access for a group",
            });
        }

        let entitlement = self
            .entitlements
            .get(entitlement_id)
            .await?
            .ok_or(GovernanceError::EntitlementNotFound(entitlement_id))?;

        let occupied = self
            .store
            .count(&GroupAccessRequestFilter {
                group_id: Some(group.id),
                entitlement_id: Some(entitlement.id),
                statuses: Some(GROUP_REQUEST_ACTIVE_STATUSES.to_vec()),
                ..Default::default()
            })
            .await?;
        if occupied > 0 {
            return Err(GovernanceError::GroupAccessRequestExists);
        }

        let status = if group.needs_access_approve {
            GroupAccessStatus::Pending
        } else {
            GroupAccessStatus::Approved
        };

        let now = Utc::now();
        let request = GroupAccessRequest {
            id: GroupAccessRequestId::new(),
            request_id: request_id.to_string(),
            group_id: group.id,
            entitlement_id: entitlement.id,
            access_tag: entitlement.access_tag.clone(),
            requested_by_id,
            status,
            approver_1_id: None,
            approver_2_id: None,
            request_reason: reason.to_string(),
            decline_reason: None,
            revoker_id: None,
            requested_on: now,
            updated_on: now,
        };
        let request = self.store.insert(request).await?;

        self.log_group_request_event(
            GovernanceAuditAction::GroupRequestCreated,
            Some(requested_by_id),
            &request,
            None,
            None,
        )
        .await?;

        if request.status == GroupAccessStatus::Approved {
            self.fan_out(&request).await?;
        }

        Ok(request)
    }

    /// Record one approval step.
    ///
    /// A primary approval lands on Approved directly unless the entitlement
    /// needs a second pair of eyes, in which case it parks the request in
    /// SecondaryPending. Reaching Approved triggers the member fan-out.
    pub async fn record_approval(
        &self,
        request_id: &str,
        tier: ApprovalTier,
        approver_id: PersonId,
        needs_secondary: bool,
    ) -> Result<GroupAccessRequest> {
        let request = self.require(request_id).await?;

        if request.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(request.status.to_string()));
        }
        if request.is_self_approval(approver_id) {
            return Err(GovernanceError::SelfApprovalNotAllowed);
        }

        let update = match (request.status, tier) {
            (GroupAccessStatus::Pending, ApprovalTier::Primary) if needs_secondary => {
                UpdateGroupAccessRequestInput {
                    status: Some(GroupAccessStatus::SecondaryPending),
                    approver_1_id: Some(approver_id),
                    ..Default::default()
                }
            }
            (GroupAccessStatus::Pending, ApprovalTier::Primary) => UpdateGroupAccessRequestInput {
                status: Some(GroupAccessStatus::Approved),
                approver_1_id: Some(approver_id),
                ..Default::default()
            },
            (GroupAccessStatus::SecondaryPending, ApprovalTier::Secondary) => {
                UpdateGroupAccessRequestInput {
                    status: Some(GroupAccessStatus::Approved),
                    approver_2_id: Some(approver_id),
                    ..Default::default()
                }
            }
            _ => {
                return Err(GovernanceError::InvalidTransition {
                    status: request.status.to_string(),
                    action: match tier {
                        ApprovalTier::Primary => "record a primary approval",
                        ApprovalTier::Secondary => "record a secondary approval",
                    },
                });
            }
        };

        let updated = self
            .store
            .update(request.id, update)
            .await?
            .ok_or_else(|| GovernanceError::GroupAccessRequestNotFound(request_id.to_string()))?;

        self.log_group_request_event(
            GovernanceAuditAction::GroupRequestApproved,
            Some(approver_id),
            &updated,
            Some(serde_json::to_value(&request).unwrap_or_default()),
            Some(serde_json::json!({"tier": tier.to_string()})),
        )
        .await?;

        if updated.status == GroupAccessStatus::Approved {
            self.fan_out(&updated).await?;
        }

        Ok(updated)
    }

    /// Decline an undecided group access request. A reason is mandatory.
    pub async fn decline(
        &self,
        request_id: &str,
        reason: &str,
        decliner_id: PersonId,
    ) -> Result<GroupAccessRequest> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::DeclineReasonRequired);
        }

        let request = self.require(request_id).await?;

        if request.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(request.status.to_string()));
        }
        if !matches!(
            request.status,
            GroupAccessStatus::Pending | GroupAccessStatus::SecondaryPending
        ) {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "decline a group access request",
            });
        }

        let updated = self
            .store
            .update(
                request.id,
                UpdateGroupAccessRequestInput {
                    status: Some(GroupAccessStatus::Declined),
                    decline_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| GovernanceError::GroupAccessRequestNotFound(request_id.to_string()))?;

        self.log_group_request_event(
            GovernanceAuditAction::GroupRequestDeclined,
            Some(decliner_id),
            &updated,
            Some(serde_json::to_value(&request).unwrap_or_default()),
            None,
        )
        .await?;

        Ok(updated)
    }

    /// Withdraw an approved group access and start revoking the member
    /// rows that were fanned out from it.
    ///
    /// Member rows still mid-grant are left for the worker to finish and
    /// are skipped here; calling this again picks them up once they are
    /// revocable. Already revoked requests are a no-op.
    pub async fn mark_revoked(
        &self,
        request_id: &str,
        revoker_id: PersonId,
    ) -> Result<GroupAccessRequest> {
        let request = self.require(request_id).await?;

        match request.status {
            GroupAccessStatus::Revoked => return Ok(request),
            GroupAccessStatus::Approved => {}
            GroupAccessStatus::Declined => {
                return Err(GovernanceError::AlreadyProcessed(request.status.to_string()));
            }
            GroupAccessStatus::Pending
            | GroupAccessStatus::SecondaryPending
            | GroupAccessStatus::Inactive => {
                return Err(GovernanceError::InvalidTransition {
                    status: request.status.to_string(),
                    action: "revoke a group access request",
                });
            }
        }

        let updated = self
            .store
            .update(
                request.id,
                UpdateGroupAccessRequestInput {
                    status: Some(GroupAccessStatus::Revoked),
                    revoker_id: Some(revoker_id),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| GovernanceError::GroupAccessRequestNotFound(request_id.to_string()))?;

        let prefix = format!("{}-", updated.request_id);
        let fanned_out = self.requests.requests_matching_handle(&prefix).await?;
        let mut members_revoked = 0u64;
        for row in fanned_out
            .iter()
            .filter(|r| r.request_id.starts_with(&prefix))
        {
            match self.requests.initiate_revoke(&row.request_id, revoker_id).await {
                Ok(_) => members_revoked += 1,
                Err(err) if err.is_invalid_transition() => continue,
                Err(err) => return Err(err),
            }
        }

        self.log_group_request_event(
            GovernanceAuditAction::GroupRequestRevoked,
            Some(revoker_id),
            &updated,
            Some(serde_json::to_value(&request).unwrap_or_default()),
            Some(serde_json::json!({"member_requests_revoked": members_revoked})),
        )
        .await?;

        Ok(updated)
    }

    /// Retire a group access request. Already inactive requests are a no-op.
    pub async fn mark_inactive(&self, request_id: &str) -> Result<GroupAccessRequest> {
        let request = self.require(request_id).await?;

        match request.status {
            GroupAccessStatus::Inactive => Ok(request),
            GroupAccessStatus::Pending
            | GroupAccessStatus::SecondaryPending
            | GroupAccessStatus::Approved => {
                let updated = self
                    .store
                    .update(
                        request.id,
                        UpdateGroupAccessRequestInput {
                            status: Some(GroupAccessStatus::Inactive),
                            ..Default::default()
                        },
                    )
                    .await?
                    .ok_or_else(|| {
                        GovernanceError::GroupAccessRequestNotFound(request_id.to_string())
                    })?;
                Ok(updated)
            }
            GroupAccessStatus::Declined | GroupAccessStatus::Revoked => Err(
                GovernanceError::AlreadyProcessed(request.status.to_string()),
            ),
        }
    }

    /// Create individual rows for every approved member of the group.
    ///
    /// Members whose identity already holds a row for the entitlement in
    /// any status other than Declined or Revoked are skipped, which makes
    /// the fan-out safe to re-run after a partial failure. Returns the
    /// number of rows created.
    pub async fn fan_out_approved(&self, request_id: &str) -> Result<u64> {
        let request = self.require(request_id).await?;
        if request.status != GroupAccessStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "fan out a group access request",
            });
        }
        self.fan_out(&request).await
    }

    async fn fan_out(&self, request: &GroupAccessRequest) -> Result<u64> {
        let members = self
            .memberships
            .list(
                &MembershipFilter {
                    group_id: Some(request.group_id),
                    status: Some(MembershipStatus::Approved),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await?;

        let mut created = 0u64;
        for membership in members {
            let person = self
                .persons
                .get(membership.person_id)
                .await?
                .ok_or(GovernanceError::PersonNotFound(membership.person_id))?;
            let identity = self
                .identities
                .get_or_create_active(person.id, &request.access_tag)
                .await?;

            let existing = self.requests.requests_for_identity(identity.id).await?;
            let already_live = existing.iter().any(|r| {
                r.entitlement_id == request.entitlement_id
                    && !matches!(
                        r.status,
                        AccessRequestStatus::Declined | AccessRequestStatus::Revoked
                    )
            });
            if already_live {
                continue;
            }

            self.requests
                .create_request(
                    request.requested_by_id,
                    CreateAccessRequestInput {
                        request_id: format!("{}-{}", request.request_id, person.username),
                        identity_id: identity.id,
                        entitlement_id: request.entitlement_id,
                        approver_1_id: request.approver_1_id,
                        approver_2_id: request.approver_2_id,
                        reason: request.request_reason.clone(),
                        access_type: AccessType::Group,
                        status: Some(AccessRequestStatus::Processing),
                    },
                )
                .await?;
            created += 1;
        }

        tracing::info!(
            request_id = %request.request_id,
            group_id = %request.group_id,
            created,
            "fanned out group access request"
        );
        self.log_group_request_event(
            GovernanceAuditAction::GroupRequestFannedOut,
            None,
            request,
            None,
            Some(serde_json::json!({"created": created})),
        )
        .await?;

        Ok(created)
    }

    /// Get a request by ID.
    pub async fn get(&self, id: GroupAccessRequestId) -> Result<Option<GroupAccessRequest>> {
        self.store.get(id).await
    }

    /// Find a request by its external handle.
    pub async fn find_by_request_id(&self, request_id: &str) -> Result<Option<GroupAccessRequest>> {
        self.store.get_by_request_id(request_id).await
    }

    /// Undecided requests whose handle contains the fragment.
    pub async fn search_pending(&self, fragment: &str) -> Result<Vec<GroupAccessRequest>> {
        self.store
            .list(
                &GroupAccessRequestFilter {
                    statuses: Some(vec![
                        GroupAccessStatus::Pending,
                        GroupAccessStatus::SecondaryPending,
                    ]),
                    request_id_contains: Some(fragment.to_string()),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Every undecided group access request.
    pub async fn pending_requests(&self) -> Result<Vec<GroupAccessRequest>> {
        self.store
            .list(
                &GroupAccessRequestFilter {
                    statuses: Some(vec![
                        GroupAccessStatus::Pending,
                        GroupAccessStatus::SecondaryPending,
                    ]),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// List requests with filtering and pagination.
    pub async fn list(
        &self,
        filter: &GroupAccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<GroupAccessRequest>> {
        self.store.list(filter, options).await
    }

    /// Render a request for review surfaces.
    pub async fn access_request_details(
        &self,
        request_id: &str,
    ) -> Result<GroupAccessRequestDetails> {
        let request = self.require(request_id).await?;
        let module = self.registry.require(&request.access_tag).await?;
        let entitlement = self
            .entitlements
            .get(request.entitlement_id)
            .await?
            .ok_or(GovernanceError::EntitlementNotFound(request.entitlement_id))?;
        let requested_by = self
            .persons
            .get(request.requested_by_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(request.requested_by_id))?;
        let group = self
            .groups
            .get(request.group_id)
            .await?
            .ok_or(GovernanceError::GroupNotFound(request.group_id))?;

        let labels = std::slice::from_ref(&entitlement.label);
        Ok(GroupAccessRequestDetails {
            request_id: request.request_id.clone(),
            access_tag: request.access_tag.clone(),
            user_email: requested_by.email,
            group_name: group.name,
            reason: request.request_reason.clone(),
            requested_on: request.requested_on,
            access_description: module.access_description(),
            access_category: module.combine_labels_description(labels),
            access_meta: module.combine_labels_meta(labels),
            status: request.status.to_string(),
            grant_owner: module.grant_owners().join(","),
            revoke_owner: module.revoke_owners().join(","),
        })
    }
}

fn unbounded() -> ListOptions {
    ListOptions {
        limit: i64::MAX,
        offset: 0,
    }
}

// ============================================================================
// Tests
// ============================================================================
