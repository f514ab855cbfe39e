//! Individual access request state machine.
//!
//! A request ties one per-integration identity to one entitlement and walks
//! a fixed lifecycle: approval (one or two tiers), grant execution on the
//! integration, and eventually revocation. Grant and revoke outcomes are
//! recorded as statuses (`GrantFailed`, `RevokeFailed`), never surfaced as
//! errors; the external drivers retry through the `retry_*` operations.
//!
//! The `request_id` string is the external handle for a request. Decision
//! and worker operations key on it; `Declined` and `Revoked` rows keep
//! their handle forever, and replication mints fresh handles instead of
//! reusing them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{AccessRequestId, EntitlementId, IdentityId, PersonId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::registry::ModuleRegistry;
use crate::types::{render_label_fields, AccessRequestStatus, AccessType, ApprovalTier};

use super::catalog::{EntitlementStore, ListOptions};
use super::identity::IdentityStore;
use super::person::{Person, PersonStore};

/// Hours a request may sit undecided before it counts as an SLA breach.
pub const APPROVAL_SLA_HOURS: i64 = 24;

// ============================================================================
// Domain Types
// ============================================================================

/// An individual access request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Unique identifier.
    pub id: AccessRequestId,
    /// External handle, unique across all requests.
    pub request_id: String,
    /// The identity the access is granted to.
    pub identity_id: IdentityId,
    /// The person behind the identity.
    pub person_id: PersonId,
    /// The entitlement being requested.
    pub entitlement_id: EntitlementId,
    /// Tag of the integration the entitlement belongs to.
    pub access_tag: String,
    /// Current lifecycle status.
    pub status: AccessRequestStatus,
    /// How the request came to exist.
    pub access_type: AccessType,
    /// Primary approver, once recorded.
    pub approver_1_id: Option<PersonId>,
    /// Secondary approver, once recorded.
    pub approver_2_id: Option<PersonId>,
    /// Why the access was requested.
    pub request_reason: String,
    /// Why the request was declined, if it was.
    pub decline_reason: Option<String>,
    /// Why the last grant or revoke attempt failed, if it did.
    pub fail_reason: Option<String>,
    /// Who initiated the revoke, once one is in flight.
    pub revoker_id: Option<PersonId>,
    /// Free-form metadata map.
    pub meta_data: serde_json::Value,
    /// When the request was raised.
    pub requested_on: DateTime<Utc>,
    /// When the grant first landed. Written exactly once.
    pub approved_on: Option<DateTime<Utc>>,
    /// When the request last changed.
    pub updated_on: DateTime<Utc>,
}

impl AccessRequest {
    /// Check if the candidate would be deciding their own request.
    #[must_use]
    pub fn is_self_approval(&self, candidate: PersonId) -> bool {
        self.person_id == candidate
    }

    /// Check if the request had been waiting for a decision longer than the
    /// SLA at the given instant.
    #[must_use]
    pub fn sla_breached_at(&self, now: DateTime<Utc>) -> bool {
        now - self.requested_on >= Duration::hours(APPROVAL_SLA_HOURS)
    }

    /// Check if the request is past the approval SLA right now.
    #[must_use]
    pub fn sla_breached(&self) -> bool {
        self.sla_breached_at(Utc::now())
    }
}

/// Input for creating an access request.
#[derive(Debug, Clone)]
pub struct CreateAccessRequestInput {
    /// External handle. Must be unique.
    pub request_id: String,
    /// The identity receiving the access.
    pub identity_id: IdentityId,
    /// The entitlement being requested.
    pub entitlement_id: EntitlementId,
    /// Pre-recorded primary approver (group fan-out).
    pub approver_1_id: Option<PersonId>,
    /// Pre-recorded secondary approver (group fan-out).
    pub approver_2_id: Option<PersonId>,
    /// Why the access is requested.
    pub reason: String,
    /// How the request came to exist.
    pub access_type: AccessType,
    /// Starting status. `None` means `Pending` with a live-duplicate check.
    pub status: Option<AccessRequestStatus>,
}

/// Input for updating an access request.
#[derive(Debug, Clone, Default)]
pub struct UpdateAccessRequestInput {
    /// New status.
    pub status: Option<AccessRequestStatus>,
    /// Primary approver.
    pub approver_1_id: Option<PersonId>,
    /// Secondary approver.
    pub approver_2_id: Option<PersonId>,
    /// Decline reason.
    pub decline_reason: Option<String>,
    /// Grant or revoke failure reason.
    pub fail_reason: Option<String>,
    /// Who is revoking.
    pub revoker_id: Option<PersonId>,
    /// First grant time. Stores write it through as given.
    pub approved_on: Option<DateTime<Utc>>,
}

/// Filter options for listing access requests.
#[derive(Debug, Clone, Default)]
pub struct AccessRequestFilter {
    /// Filter by identity.
    pub identity_id: Option<IdentityId>,
    /// Filter by person.
    pub person_id: Option<PersonId>,
    /// Filter by entitlement.
    pub entitlement_id: Option<EntitlementId>,
    /// Filter by integration tag.
    pub access_tag: Option<String>,
    /// Filter by exact status.
    pub status: Option<AccessRequestStatus>,
    /// Filter by a set of statuses.
    pub statuses: Option<Vec<AccessRequestStatus>>,
    /// Exclude a set of statuses.
    pub exclude_statuses: Option<Vec<AccessRequestStatus>>,
    /// Filter by access type.
    pub access_type: Option<AccessType>,
    /// Filter by substring of the external handle.
    pub request_id_contains: Option<String>,
}

/// A request rendered for display, with integration-supplied context.
///
/// Timestamps the UI shows as text are pre-rendered; secret label fields
/// are already stripped.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRequestDetails {
    /// External handle.
    pub request_id: String,
    /// Integration tag.
    pub access_tag: String,
    /// Display name of the requesting person.
    pub person_name: String,
    /// Email of the requesting person.
    pub person_email: String,
    /// Why the access was requested.
    pub reason: String,
    /// When the request was raised.
    pub requested_on: DateTime<Utc>,
    /// Integration description.
    pub access_description: String,
    /// Combined label description from the integration module.
    pub access_category: String,
    /// Combined label metadata from the integration module.
    pub access_meta: serde_json::Value,
    /// Rendered label fields, secrets stripped.
    pub access_labels: Vec<String>,
    /// Rendered access type.
    pub access_type: String,
    /// Approver usernames, comma separated. Empty if undecided.
    pub approvers: String,
    /// When the grant first landed.
    pub approved_on: Option<DateTime<Utc>>,
    /// Last change, rendered as `YYYY-MM-DD HH:MM:SSUTC`.
    pub updated_on: String,
    /// Rendered status.
    pub status: String,
    /// Username of the revoker, if a revoke was initiated.
    pub revoker: Option<String>,
    /// Rendered offboarding start date of the person, if offboarding.
    pub offboarding_date: Option<String>,
    /// Teams that drive grants for this integration, comma joined.
    pub grant_owner: String,
    /// Teams that drive revokes for this integration, comma joined.
    pub revoke_owner: String,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for access request storage backends.
#[async_trait::async_trait]
pub trait AccessRequestStore: Send + Sync {
    /// Get a request by ID.
    async fn get(&self, id: AccessRequestId) -> Result<Option<AccessRequest>>;

    /// Get a request by its external handle.
    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<AccessRequest>>;

    /// Insert a new request. A duplicate handle is a conflict.
    async fn insert(&self, request: AccessRequest) -> Result<AccessRequest>;

    /// Update a request.
    async fn update(
        &self,
        id: AccessRequestId,
        input: UpdateAccessRequestInput,
    ) -> Result<Option<AccessRequest>>;

    /// Set one key in the metadata map, atomically with the save.
    async fn update_meta_data(
        &self,
        id: AccessRequestId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Option<AccessRequest>>;

    /// List requests with filtering and pagination, newest first.
    async fn list(
        &self,
        filter: &AccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<AccessRequest>>;

    /// Count requests matching a filter.
    async fn count(&self, filter: &AccessRequestFilter) -> Result<i64>;

    /// Move every matching request to the given status in one sweep.
    ///
    /// Returns the number of rows changed. `decline_reason` and `revoker_id`
    /// are written where provided; `approved_on` is never touched.
    async fn bulk_update_status(
        &self,
        filter: &AccessRequestFilter,
        to: AccessRequestStatus,
        decline_reason: Option<String>,
        revoker_id: Option<PersonId>,
    ) -> Result<u64>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

fn matches_filter(request: &AccessRequest, filter: &AccessRequestFilter) -> bool {
    filter.identity_id.is_none_or(|id| request.identity_id == id)
        && filter.person_id.is_none_or(|id| request.person_id == id)
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
            .exclude_statuses
            .as_ref()
            .is_none_or(|set| !set.contains(&request.status))
        && filter.access_type.is_none_or(|t| request.access_type == t)
        && filter
            .request_id_contains
            .as_ref()
            .is_none_or(|fragment| request.request_id.contains(fragment.as_str()))
}

/// In-memory access request store for testing.
#[derive(Debug, Default)]
pub struct InMemoryAccessRequestStore {
    requests: Arc<RwLock<HashMap<AccessRequestId, AccessRequest>>>,
}

impl InMemoryAccessRequestStore {
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
impl AccessRequestStore for InMemoryAccessRequestStore {
    async fn get(&self, id: AccessRequestId) -> Result<Option<AccessRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<AccessRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.request_id == request_id)
            .cloned())
    }

    async fn insert(&self, request: AccessRequest) -> Result<AccessRequest> {
        let mut requests = self.requests.write().await;
        if requests
            .values()
            .any(|r| r.request_id == request.request_id)
        {
            return Err(GovernanceError::DuplicateRequestId(request.request_id));
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        id: AccessRequestId,
        input: UpdateAccessRequestInput,
    ) -> Result<Option<AccessRequest>> {
        let mut requests = self.requests.write().await;

        if let Some(request) = requests.get_mut(&id) {
            if let Some(status) = input.status {
                request.status = status;
            }
            if let Some(approver_1_id) = input.approver_1_id {
                request.approver_1_id = Some(approver_1_id);
            }
            if let Some(approver_2_id) = input.approver_2_id {
                request.approver_2_id = Some(approver_2_id);
            }
            if let Some(decline_reason) = input.decline_reason {
                request.decline_reason = Some(decline_reason);
            }
            if let Some(fail_reason) = input.fail_reason {
                request.fail_reason = Some(fail_reason);
            }
            if let Some(revoker_id) = input.revoker_id {
                request.revoker_id = Some(revoker_id);
            }
            if let Some(approved_on) = input.approved_on {
                request.approved_on = Some(approved_on);
            }
            request.updated_on = Utc::now();

            Ok(Some(request.clone()))
        } else {
            Ok(None)
        }
    }

    async fn update_meta_data(
        &self,
        id: AccessRequestId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Option<AccessRequest>> {
        let mut requests = self.requests.write().await;

        if let Some(request) = requests.get_mut(&id) {
            if !request.meta_data.is_object() {
                request.meta_data = serde_json::json!({});
            }
            if let Some(map) = request.meta_data.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            request.updated_on = Utc::now();

            Ok(Some(request.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list(
        &self,
        filter: &AccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<AccessRequest>> {
        let requests = self.requests.read().await;

        let mut results: Vec<AccessRequest> = requests
            .values()
            .filter(|r| matches_filter(r, filter))
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

    async fn count(&self, filter: &AccessRequestFilter) -> Result<i64> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|r| matches_filter(r, filter))
            .count() as i64)
    }

    async fn bulk_update_status(
        &self,
        filter: &AccessRequestFilter,
        to: AccessRequestStatus,
        decline_reason: Option<String>,
        revoker_id: Option<PersonId>,
    ) -> Result<u64> {
        let mut requests = self.requests.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for request in requests.values_mut() {
            if !matches_filter(request, filter) {
                continue;
            }
            request.status = to;
            if let Some(reason) = &decline_reason {
                request.decline_reason = Some(reason.clone());
            }
            if let Some(revoker) = revoker_id {
                request.revoker_id = Some(revoker);
            }
            request.updated_on = now;
            changed += 1;
        }

        Ok(changed)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service driving individual access requests through their lifecycle.
pub struct AccessRequestService {
    store: Arc<dyn AccessRequestStore>,
    identities: Arc<dyn IdentityStore>,
    persons: Arc<dyn PersonStore>,
    entitlements: Arc<dyn EntitlementStore>,
    registry: Arc<ModuleRegistry>,
    audit_store: Arc<dyn AuditStore>,
}

impl AccessRequestService {
    /// Create a new access request service.
    pub fn new(
        store: Arc<dyn AccessRequestStore>,
        identities: Arc<dyn IdentityStore>,
        persons: Arc<dyn PersonStore>,
        entitlements: Arc<dyn EntitlementStore>,
        registry: Arc<ModuleRegistry>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            store,
            identities,
            persons,
            entitlements,
            registry,
            audit_store,
        }
    }

    async fn require(&self, request_id: &str) -> Result<AccessRequest> {
        self.store
            .get_by_request_id(request_id)
            .await?
            .ok_or_else(|| GovernanceError::AccessRequestNotFound(request_id.to_string()))
    }

    async fn apply(
        &self,
        request: &AccessRequest,
        input: UpdateAccessRequestInput,
    ) -> Result<AccessRequest> {
        self.store
            .update(request.id, input)
            .await?
            .ok_or_else(|| GovernanceError::AccessRequestNotFound(request.request_id.clone()))
    }

    async fn log_request_event(
        &self,
        action: GovernanceAuditAction,
        actor_id: Option<PersonId>,
        request: &AccessRequest,
        before_state: Option<serde_json::Value>,
    ) -> Result<()> {
        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action,
                actor_id,
                person_id: Some(request.person_id),
                entitlement_id: Some(request.entitlement_id),
                request_id: Some(request.id),
                identity_id: Some(request.identity_id),
                before_state,
                after_state: Some(serde_json::to_value(request).unwrap_or_default()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Raise a new access request.
    ///
    /// With `status: None` the request starts `Pending` and a live duplicate
    /// (a Pending or Approved request for the same identity and entitlement)
    /// is refused. Callers that pre-set a status, such as group fan-out and
    /// identity replication, skip that guard and do their own.
    pub async fn create_request(
        &self,
        actor_id: PersonId,
        input: CreateAccessRequestInput,
    ) -> Result<AccessRequest> {
        let identity = self
            .identities
            .get(input.identity_id)
            .await?
            .ok_or(GovernanceError::IdentityNotFound(input.identity_id))?;
        let entitlement = self
            .entitlements
            .get(input.entitlement_id)
            .await?
            .ok_or(GovernanceError::EntitlementNotFound(input.entitlement_id))?;

        if input.status.is_none() {
            let live = self
                .store
                .count(&AccessRequestFilter {
                    identity_id: Some(identity.id),
                    entitlement_id: Some(entitlement.id),
                    statuses: Some(vec![
                        AccessRequestStatus::Pending,
                        AccessRequestStatus::Approved,
                    ]),
                    ..Default::default()
                })
                .await?;
            if live > 0 {
                return Err(GovernanceError::AccessRequestExists);
            }
        }

        let now = Utc::now();
        let request = AccessRequest {
            id: AccessRequestId::new(),
            request_id: input.request_id,
            identity_id: identity.id,
            person_id: identity.person_id,
            entitlement_id: entitlement.id,
            access_tag: entitlement.access_tag.clone(),
            status: input.status.unwrap_or(AccessRequestStatus::Pending),
            access_type: input.access_type,
            approver_1_id: input.approver_1_id,
            approver_2_id: input.approver_2_id,
            request_reason: input.reason,
            decline_reason: None,
            fail_reason: None,
            revoker_id: None,
            meta_data: serde_json::json!({}),
            requested_on: now,
            approved_on: None,
            updated_on: now,
        };
        let request = self.store.insert(request).await?;

        self.log_request_event(
            GovernanceAuditAction::RequestCreated,
            Some(actor_id),
            &request,
            None,
        )
        .await?;

        Ok(request)
    }

    /// Record one approval step.
    ///
    /// A Pending request takes a primary approval and moves to Processing,
    /// or to SecondaryPending when the entitlement needs a second tier. A
    /// SecondaryPending request takes a secondary approval and moves to
    /// Processing. Requesters cannot approve their own requests.
    pub async fn record_approval(
        &self,
        request_id: &str,
        tier: ApprovalTier,
        approver_id: PersonId,
        needs_secondary: bool,
    ) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(request.status.to_string()));
        }
        if request.is_self_approval(approver_id) {
            return Err(GovernanceError::SelfApprovalNotAllowed);
        }

        let update = match (request.status, tier) {
            (AccessRequestStatus::Pending, ApprovalTier::Primary) => UpdateAccessRequestInput {
                status: Some(if needs_secondary {
                    AccessRequestStatus::SecondaryPending
                } else {
                    AccessRequestStatus::Processing
                }),
                approver_1_id: Some(approver_id),
                ..Default::default()
            },
            (AccessRequestStatus::SecondaryPending, ApprovalTier::Secondary) => {
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Processing),
                    approver_2_id: Some(approver_id),
                    ..Default::default()
                }
            }
            _ => {
                return Err(GovernanceError::InvalidTransition {
                    status: request.status.to_string(),
                    action: "record an approval",
                })
            }
        };

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self.apply(&request, update).await?;
        self.log_request_event(
            GovernanceAuditAction::RequestApproved,
            Some(approver_id),
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Mark a grant as landed on the integration.
    ///
    /// `approved_on` is written on the first completed grant only; rows
    /// replicated from an earlier identity keep their original time.
    pub async fn complete_grant(&self, request_id: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::Processing {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "complete a grant",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Approved),
                    approved_on: if request.approved_on.is_none() {
                        Some(Utc::now())
                    } else {
                        None
                    },
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::GrantCompleted,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Record a grant failure from the integration.
    pub async fn fail_grant(&self, request_id: &str, reason: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::Processing {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "record a grant failure",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::GrantFailed),
                    fail_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::GrantFailed,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Queue a failed grant for another attempt.
    pub async fn retry_grant(&self, request_id: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::GrantFailed {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "retry a grant",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::GrantRetried,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Decline a request. A reason is mandatory.
    pub async fn decline(
        &self,
        request_id: &str,
        reason: &str,
        decliner_id: PersonId,
    ) -> Result<AccessRequest> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::DeclineReasonRequired);
        }

        let request = self.require(request_id).await?;

        if request.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(request.status.to_string()));
        }
        match request.status {
            AccessRequestStatus::Pending
            | AccessRequestStatus::SecondaryPending
            | AccessRequestStatus::GrantFailed => {}
            _ => {
                return Err(GovernanceError::InvalidTransition {
                    status: request.status.to_string(),
                    action: "decline",
                })
            }
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Declined),
                    decline_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RequestDeclined,
            Some(decliner_id),
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Move an approved request into the offboarding queue.
    pub async fn mark_offboarding(&self, request_id: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "mark for offboarding",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Offboarding),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RequestOffboarding,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Put a revoke in flight.
    ///
    /// Valid from Approved, Offboarding, and GrantFailed. A request already
    /// Revoked or with a revoke in flight is left as is, so offboarding
    /// sweeps can re-run safely.
    pub async fn initiate_revoke(
        &self,
        request_id: &str,
        revoker_id: PersonId,
    ) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        match request.status {
            AccessRequestStatus::Revoked | AccessRequestStatus::ProcessingRevoke => {
                return Ok(request)
            }
            AccessRequestStatus::Approved
            | AccessRequestStatus::Offboarding
            | AccessRequestStatus::GrantFailed => {}
            _ => {
                return Err(GovernanceError::InvalidTransition {
                    status: request.status.to_string(),
                    action: "initiate a revoke",
                })
            }
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::ProcessingRevoke),
                    revoker_id: Some(revoker_id),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RevokeInitiated,
            Some(revoker_id),
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Mark a revoke as landed on the integration. Revoked is terminal.
    pub async fn complete_revoke(&self, request_id: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status == AccessRequestStatus::Revoked {
            return Ok(request);
        }
        if request.status != AccessRequestStatus::ProcessingRevoke {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "complete a revoke",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Revoked),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RevokeCompleted,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Record a revoke failure from the integration.
    pub async fn fail_revoke(&self, request_id: &str, reason: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::ProcessingRevoke {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "record a revoke failure",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::RevokeFailed),
                    fail_reason: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RevokeFailed,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Queue a failed revoke for another attempt.
    pub async fn retry_revoke(&self, request_id: &str) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;

        if request.status != AccessRequestStatus::RevokeFailed {
            return Err(GovernanceError::InvalidTransition {
                status: request.status.to_string(),
                action: "retry a revoke",
            });
        }

        let before = serde_json::to_value(&request).unwrap_or_default();
        let updated = self
            .apply(
                &request,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::ProcessingRevoke),
                    ..Default::default()
                },
            )
            .await?;
        self.log_request_event(
            GovernanceAuditAction::RevokeRetried,
            None,
            &updated,
            Some(before),
        )
        .await?;

        Ok(updated)
    }

    /// Set one key in the request's metadata map.
    pub async fn update_metadata(
        &self,
        request_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<AccessRequest> {
        let request = self.require(request_id).await?;
        self.store
            .update_meta_data(request.id, key, value)
            .await?
            .ok_or_else(|| GovernanceError::AccessRequestNotFound(request_id.to_string()))
    }

    /// Get a request by ID.
    pub async fn get(&self, id: AccessRequestId) -> Result<Option<AccessRequest>> {
        self.store.get(id).await
    }

    /// Find a request by its external handle.
    pub async fn find_by_request_id(&self, request_id: &str) -> Result<Option<AccessRequest>> {
        self.store.get_by_request_id(request_id).await
    }

    /// Find a request by handle unless it has been revoked.
    pub async fn find_unrevoked(&self, request_id: &str) -> Result<Option<AccessRequest>> {
        let request = self.store.get_by_request_id(request_id).await?;
        Ok(request.filter(|r| r.status != AccessRequestStatus::Revoked))
    }

    /// Every request of a person, newest first.
    pub async fn requests_for_person(&self, person_id: PersonId) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    person_id: Some(person_id),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Every request of an identity, newest first.
    pub async fn requests_for_identity(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Requests of a person under one integration, restricted to a status set.
    pub async fn requests_for_person_in_statuses(
        &self,
        person_id: PersonId,
        access_tag: &str,
        statuses: Vec<AccessRequestStatus>,
    ) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    person_id: Some(person_id),
                    access_tag: Some(access_tag.to_string()),
                    statuses: Some(statuses),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Every request that has not been declined.
    pub async fn list_not_declined(&self, options: &ListOptions) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    exclude_statuses: Some(vec![AccessRequestStatus::Declined]),
                    ..Default::default()
                },
                options,
            )
            .await
    }

    /// Undecided requests whose handle contains the given fragment.
    pub async fn search_pending(&self, fragment: &str) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    statuses: Some(vec![
                        AccessRequestStatus::Pending,
                        AccessRequestStatus::SecondaryPending,
                    ]),
                    request_id_contains: Some(fragment.to_string()),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Every request whose handle contains the fragment, any status.
    pub async fn requests_matching_handle(&self, fragment: &str) -> Result<Vec<AccessRequest>> {
        self.store
            .list(
                &AccessRequestFilter {
                    request_id_contains: Some(fragment.to_string()),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Undecided requests that have been waiting past the approval SLA.
    pub async fn pending_sla_breaches(&self) -> Result<Vec<AccessRequest>> {
        let now = Utc::now();
        let mut pending = self
            .store
            .list(
                &AccessRequestFilter {
                    statuses: Some(vec![
                        AccessRequestStatus::Pending,
                        AccessRequestStatus::SecondaryPending,
                    ]),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await?;
        pending.retain(|r| r.sla_breached_at(now));
        Ok(pending)
    }

    /// How many grants are sitting in GrantFailed.
    ///
    /// Only administrators and the operations team see the real number.
    pub async fn failed_grants_count(&self, viewer: &Person) -> Result<i64> {
        if !viewer.is_admin_or_ops() {
            return Ok(0);
        }
        self.store
            .count(&AccessRequestFilter {
                status: Some(AccessRequestStatus::GrantFailed),
                ..Default::default()
            })
            .await
    }

    /// How many revokes are sitting in RevokeFailed.
    ///
    /// Only administrators and the operations team see the real number.
    pub async fn failed_revokes_count(&self, viewer: &Person) -> Result<i64> {
        if !viewer.is_admin_or_ops() {
            return Ok(0);
        }
        self.store
            .count(&AccessRequestFilter {
                status: Some(AccessRequestStatus::RevokeFailed),
                ..Default::default()
            })
            .await
    }

    /// Render one request for display.
    pub async fn access_request_details(&self, request_id: &str) -> Result<AccessRequestDetails> {
        let request = self.require(request_id).await?;
        self.render_details(&request).await
    }

    /// Render a person's full request history, newest first.
    ///
    /// Requests under integrations with no registered module are skipped.
    pub async fn person_access_history(
        &self,
        person_id: PersonId,
    ) -> Result<Vec<AccessRequestDetails>> {
        let requests = self.requests_for_person(person_id).await?;

        let mut history = Vec::with_capacity(requests.len());
        for request in requests {
            if self.registry.get(&request.access_tag).await.is_none() {
                tracing::debug!(
                    request_id = %request.request_id,
                    access_tag = %request.access_tag,
                    "skipping history entry for unregistered integration"
                );
                continue;
            }
            history.push(self.render_details(&request).await?);
        }
        Ok(history)
    }

    async fn render_details(&self, request: &AccessRequest) -> Result<AccessRequestDetails> {
        let person = self
            .persons
            .get(request.person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(request.person_id))?;
        let entitlement = self
            .entitlements
            .get(request.entitlement_id)
            .await?
            .ok_or(GovernanceError::EntitlementNotFound(request.entitlement_id))?;
        let module = self.registry.require(&request.access_tag).await?;

        let mut approver_names = Vec::new();
        for approver_id in [request.approver_1_id, request.approver_2_id]
            .into_iter()
            .flatten()
        {
            if let Some(approver) = self.persons.get(approver_id).await? {
                approver_names.push(approver.username);
            }
        }

        let revoker = match request.revoker_id {
            Some(revoker_id) => self
                .persons
                .get(revoker_id)
                .await?
                .map(|p| p.username),
            None => None,
        };

        let labels = std::slice::from_ref(&entitlement.label);

        Ok(AccessRequestDetails {
            request_id: request.request_id.clone(),
            access_tag: request.access_tag.clone(),
            person_name: person.name,
            person_email: person.email,
            reason: request.request_reason.clone(),
            requested_on: request.requested_on,
            access_description: module.access_description(),
            access_category: module.combine_labels_description(labels),
            access_meta: module.combine_labels_meta(labels),
            access_labels: render_label_fields(&entitlement.label),
            access_type: request.access_type.to_string(),
            approvers: approver_names.join(", "),
            approved_on: request.approved_on,
            updated_on: format!("{}UTC", request.updated_on.format("%Y-%m-%d %H:%M:%S")),
            status: request.status.to_string(),
            revoker,
            offboarding_date: person
                .offboard_date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()),
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
