//! Per-integration identity registry.
//!
//! A person holds at most one active identity per integration tag. Changing
//! the identity payload never edits in place: the old identity is
//! deactivated, a fresh one is created, and its request rows are replicated
//! onto the new identity so granted access is re-driven against the new
//! payload. Request rows on the old identity stay untouched for history.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{AccessRequestId, EntitlementId, IdentityId, PersonId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::types::{handle_timestamp, AccessRequestStatus, IdentityStatus};

use super::catalog::ListOptions;
use super::person::PersonStore;
use super::request::{AccessRequest, AccessRequestFilter, AccessRequestStore};

// ============================================================================
// Domain Types
// ============================================================================

/// A person's identity on one integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique identifier.
    pub id: IdentityId,
    /// The person this identity belongs to.
    pub person_id: PersonId,
    /// Tag of the integration.
    pub access_tag: String,
    /// Integration-defined payload (usernames, keys, machine names).
    pub identity: serde_json::Value,
    /// Whether this identity is the current one for the (person, tag) pair.
    pub status: IdentityStatus,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of replicating grants onto a fresh identity.
#[derive(Debug, Clone)]
pub struct IdentityReplication {
    /// The new active identity.
    pub identity: Identity,
    /// The request rows created on the new identity.
    pub replicated: Vec<AccessRequest>,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for identity storage backends.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Get an identity by ID.
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>>;

    /// Find the active identity for a (person, tag) pair.
    async fn find_active(&self, person_id: PersonId, access_tag: &str)
        -> Result<Option<Identity>>;

    /// Every identity of a person, active or not.
    async fn list_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>>;

    /// The active identities of a person.
    async fn list_active_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>>;

    /// Insert a new identity.
    ///
    /// Inserting an active identity while another active one exists for the
    /// same (person, tag) pair is a conflict.
    async fn insert(&self, identity: Identity) -> Result<Identity>;

    /// Mark an identity inactive.
    async fn deactivate(&self, id: IdentityId) -> Result<Option<Identity>>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory identity store for testing.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identities: Arc<RwLock<HashMap<IdentityId, Identity>>>,
}

impl InMemoryIdentityStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.identities.write().await.clear();
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn find_active(
        &self,
        person_id: PersonId,
        access_tag: &str,
    ) -> Result<Option<Identity>> {
        let identities = self.identities.read().await;
        Ok(identities
            .values()
            .find(|i| {
                i.person_id == person_id
                    && i.access_tag == access_tag
                    && i.status == IdentityStatus::Active
            })
            .cloned())
    }

    async fn list_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>> {
        let identities = self.identities.read().await;
        let mut results: Vec<Identity> = identities
            .values()
            .filter(|i| i.person_id == person_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            a.access_tag
                .cmp(&b.access_tag)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(results)
    }

    async fn list_active_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>> {
        let all = self.list_for_person(person_id).await?;
        Ok(all
            .into_iter()
            .filter(|i| i.status == IdentityStatus::Active)
            .collect())
    }

    async fn insert(&self, identity: Identity) -> Result<Identity> {
        let mut identities = self.identities.write().await;

        if identity.status == IdentityStatus::Active
            && identities.values().any(|i| {
                i.person_id == identity.person_id
                    && i.access_tag == identity.access_tag
                    && i.status == IdentityStatus::Active
            })
        {
            return Err(GovernanceError::ActiveIdentityExists(identity.access_tag));
        }

        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn deactivate(&self, id: IdentityId) -> Result<Option<Identity>> {
        let mut identities = self.identities.write().await;

        if let Some(identity) = identities.get_mut(&id) {
            identity.status = IdentityStatus::Inactive;
            identity.updated_at = Utc::now();
            Ok(Some(identity.clone()))
        } else {
            Ok(None)
        }
    }
}

// ============================================================================
// Service
// ============================================================================

const ACTIVE_STATUSES: [AccessRequestStatus; 4] = [
    AccessRequestStatus::Approved,
    AccessRequestStatus::Pending,
    AccessRequestStatus::SecondaryPending,
    AccessRequestStatus::GrantFailed,
];

const GRANTED_STATUSES: [AccessRequestStatus; 3] = [
    AccessRequestStatus::Approved,
    AccessRequestStatus::Processing,
    AccessRequestStatus::Offboarding,
];

const NON_APPROVED_STATUSES: [AccessRequestStatus; 3] = [
    AccessRequestStatus::Pending,
    AccessRequestStatus::SecondaryPending,
    AccessRequestStatus::GrantFailed,
];

/// Service managing per-integration identities and their request rows.
pub struct IdentityService {
    identities: Arc<dyn IdentityStore>,
    requests: Arc<dyn AccessRequestStore>,
    persons: Arc<dyn PersonStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl IdentityService {
    /// Create a new identity service.
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        requests: Arc<dyn AccessRequestStore>,
        persons: Arc<dyn PersonStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            identities,
            requests,
            persons,
            audit_store,
        }
    }

    /// Get an identity by ID.
    pub async fn get(&self, id: IdentityId) -> Result<Option<Identity>> {
        self.identities.get(id).await
    }

    /// Get or create the active identity for a (person, tag) pair.
    ///
    /// Newly created identities start with an empty payload; the payload is
    /// filled in later through [`IdentityService::replicate_active_grants`].
    pub async fn get_or_create_active(
        &self,
        person_id: PersonId,
        access_tag: &str,
    ) -> Result<Identity> {
        if let Some(existing) = self.identities.find_active(person_id, access_tag).await? {
            return Ok(existing);
        }

        let person = self
            .persons
            .get(person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))?;

        let now = Utc::now();
        let identity = Identity {
            id: IdentityId::new(),
            person_id: person.id,
            access_tag: access_tag.to_string(),
            identity: serde_json::json!({}),
            status: IdentityStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let identity = self.identities.insert(identity).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::IdentityCreated,
                actor_id: Some(person.id),
                person_id: Some(person.id),
                identity_id: Some(identity.id),
                after_state: Some(serde_json::to_value(&identity).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(identity)
    }

    /// Mark an identity inactive. Already inactive identities are left as is.
    pub async fn deactivate(&self, identity_id: IdentityId) -> Result<Identity> {
        let identity = self
            .identities
            .get(identity_id)
            .await?
            .ok_or(GovernanceError::IdentityNotFound(identity_id))?;

        if identity.status == IdentityStatus::Inactive {
            return Ok(identity);
        }

        let deactivated = self
            .identities
            .deactivate(identity_id)
            .await?
            .ok_or(GovernanceError::IdentityNotFound(identity_id))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::IdentityDeactivated,
                person_id: Some(deactivated.person_id),
                identity_id: Some(deactivated.id),
                after_state: Some(serde_json::to_value(&deactivated).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(deactivated)
    }

    /// Replace an identity's payload by forking it.
    ///
    /// The source identity is deactivated, a fresh active identity is
    /// created with the new payload, and every non-Revoked request row of
    /// the source is replicated onto it under a fresh handle. Approved rows
    /// come back as Processing so the grant is re-driven against the new
    /// payload; their original `approved_on` is carried over. Source rows
    /// are left untouched.
    pub async fn replicate_active_grants(
        &self,
        actor_id: PersonId,
        source_identity_id: IdentityId,
        new_payload: serde_json::Value,
    ) -> Result<IdentityReplication> {
        let source = self
            .identities
            .get(source_identity_id)
            .await?
            .ok_or(GovernanceError::IdentityNotFound(source_identity_id))?;

        if source.status == IdentityStatus::Inactive {
            return Err(GovernanceError::InvalidTransition {
                status: source.status.to_string(),
                action: "replicate grants from an inactive identity",
            });
        }

        let person = self
            .persons
            .get(source.person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(source.person_id))?;

        self.identities
            .deactivate(source.id)
            .await?
            .ok_or(GovernanceError::IdentityNotFound(source.id))?;

        let now = Utc::now();
        let fresh = Identity {
            id: IdentityId::new(),
            person_id: source.person_id,
            access_tag: source.access_tag.clone(),
            identity: new_payload,
            status: IdentityStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let fresh = self.identities.insert(fresh).await?;

        let rows = self
            .requests
            .list(
                &AccessRequestFilter {
                    identity_id: Some(source.id),
                    exclude_statuses: Some(vec![AccessRequestStatus::Revoked]),
                    ..Default::default()
                },
                &ListOptions {
                    limit: i64::MAX,
                    offset: 0,
                },
            )
            .await?;

        let stamp = handle_timestamp(now);
        let mut replicated = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let status = if row.status == AccessRequestStatus::Approved {
                AccessRequestStatus::Processing
            } else {
                row.status
            };
            let copy = AccessRequest {
                id: AccessRequestId::new(),
                request_id: format!(
                    "{}-{}-{}-{}",
                    person.username, row.access_type, stamp, index
                ),
                identity_id: fresh.id,
                person_id: row.person_id,
                entitlement_id: row.entitlement_id,
                access_tag: row.access_tag.clone(),
                status,
                access_type: row.access_type,
                approver_1_id: row.approver_1_id,
                approver_2_id: row.approver_2_id,
                request_reason: row.request_reason.clone(),
                decline_reason: row.decline_reason.clone(),
                fail_reason: row.fail_reason.clone(),
                revoker_id: None,
                meta_data: row.meta_data.clone(),
                requested_on: now,
                approved_on: row.approved_on,
                updated_on: now,
            };
            replicated.push(self.requests.insert(copy).await?);
        }

        tracing::info!(
            person = %person.username,
            access_tag = %fresh.access_tag,
            replicated = replicated.len(),
            "replicated grants onto a fresh identity"
        );
        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::IdentityReplicated,
                actor_id: Some(actor_id),
                person_id: Some(source.person_id),
                identity_id: Some(fresh.id),
                before_state: Some(serde_json::to_value(&source).unwrap_or_default()),
                after_state: Some(serde_json::to_value(&fresh).unwrap_or_default()),
                metadata: Some(serde_json::json!({
                    "source_identity_id": source.id,
                    "replicated": replicated.len(),
                })),
                ..Default::default()
            })
            .await?;

        Ok(IdentityReplication {
            identity: fresh,
            replicated,
        })
    }

    /// Requests on this identity that are live from the requester's point of
    /// view: granted, still undecided, or failing to grant.
    pub async fn active_requests(&self, identity_id: IdentityId) -> Result<Vec<AccessRequest>> {
        self.requests_in(identity_id, &ACTIVE_STATUSES).await
    }

    /// Requests on this identity that the integration currently honors.
    pub async fn granted_requests(&self, identity_id: IdentityId) -> Result<Vec<AccessRequest>> {
        self.requests_in(identity_id, &GRANTED_STATUSES).await
    }

    /// Requests on this identity with no decision or a failed grant.
    pub async fn non_approved_requests(
        &self,
        identity_id: IdentityId,
    ) -> Result<Vec<AccessRequest>> {
        self.requests_in(identity_id, &NON_APPROVED_STATUSES).await
    }

    async fn requests_in(
        &self,
        identity_id: IdentityId,
        statuses: &[AccessRequestStatus],
    ) -> Result<Vec<AccessRequest>> {
        self.requests
            .list(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    statuses: Some(statuses.to_vec()),
                    ..Default::default()
                },
                &ListOptions {
                    limit: i64::MAX,
                    offset: 0,
                },
            )
            .await
    }

    /// Decline every undecided or grant-failed request on this identity.
    pub async fn decline_all_non_approved(
        &self,
        identity_id: IdentityId,
        reason: &str,
    ) -> Result<u64> {
        self.requests
            .bulk_update_status(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    statuses: Some(NON_APPROVED_STATUSES.to_vec()),
                    ..Default::default()
                },
                AccessRequestStatus::Declined,
                Some(reason.to_string()),
                None,
            )
            .await
    }

    /// Decline undecided or grant-failed requests for one entitlement.
    pub async fn decline_non_approved_for_entitlement(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
        reason: &str,
    ) -> Result<u64> {
        self.requests
            .bulk_update_status(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    entitlement_id: Some(entitlement_id),
                    statuses: Some(NON_APPROVED_STATUSES.to_vec()),
                    ..Default::default()
                },
                AccessRequestStatus::Declined,
                Some(reason.to_string()),
                None,
            )
            .await
    }

    /// Queue approved requests for one entitlement into offboarding.
    pub async fn offboard_granted_for_entitlement(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
    ) -> Result<u64> {
        self.requests
            .bulk_update_status(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    entitlement_id: Some(entitlement_id),
                    statuses: Some(vec![AccessRequestStatus::Approved]),
                    ..Default::default()
                },
                AccessRequestStatus::Offboarding,
                None,
                None,
            )
            .await
    }

    /// Put revokes in flight for granted requests on one entitlement.
    pub async fn revoke_granted_for_entitlement(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
        revoker_id: PersonId,
    ) -> Result<u64> {
        self.requests
            .bulk_update_status(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    entitlement_id: Some(entitlement_id),
                    statuses: Some(vec![
                        AccessRequestStatus::Approved,
                        AccessRequestStatus::Offboarding,
                    ]),
                    ..Default::default()
                },
                AccessRequestStatus::ProcessingRevoke,
                None,
                Some(revoker_id),
            )
            .await
    }

    /// Record a revoke failure for every in-flight revoke on one entitlement.
    pub async fn mark_revoke_failed_for_entitlement(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
    ) -> Result<u64> {
        self.requests
            .bulk_update_status(
                &AccessRequestFilter {
                    identity_id: Some(identity_id),
                    entitlement_id: Some(entitlement_id),
                    statuses: Some(vec![AccessRequestStatus::ProcessingRevoke]),
                    ..Default::default()
                },
                AccessRequestStatus::RevokeFailed,
                None,
                None,
            )
            .await
    }

    /// Check if the identity already holds a pending or approved request for
    /// the entitlement.
    pub async fn access_request_exists(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
    ) -> Result<bool> {
        let count = self
            .requests
            .count(&AccessRequestFilter {
                identity_id: Some(identity_id),
                entitlement_id: Some(entitlement_id),
                statuses: Some(vec![
                    AccessRequestStatus::Approved,
                    AccessRequestStatus::Pending,
                ]),
                ..Default::default()
            })
            .await?;
        Ok(count > 0)
    }

    /// Check if the integration currently honors this entitlement for the
    /// identity.
    pub async fn has_granted_access(
        &self,
        identity_id: IdentityId,
        entitlement_id: EntitlementId,
    ) -> Result<bool> {
        let count = self
            .requests
            .count(&AccessRequestFilter {
                identity_id: Some(identity_id),
                entitlement_id: Some(entitlement_id),
                statuses: Some(GRANTED_STATUSES.to_vec()),
                ..Default::default()
            })
            .await?;
        Ok(count > 0)
    }

    /// The active identity of a person on one integration, if any.
    pub async fn active_identity(
        &self,
        person_id: PersonId,
        access_tag: &str,
    ) -> Result<Option<Identity>> {
        self.identities.find_active(person_id, access_tag).await
    }

    /// Every identity of a person, active or not.
    pub async fn identities_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>> {
        self.identities.list_for_person(person_id).await
    }

    /// The active identities of a person.
    pub async fn active_identities_for_person(
        &self,
        person_id: PersonId,
    ) -> Result<Vec<Identity>> {
        self.identities.list_active_for_person(person_id).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::services::person::{InMemoryPersonStore, Person};
    use crate::services::request::InMemoryAccessRequestStore;
    use crate::types::{AccessType, PersonState};
    use serde_json::json;

    struct TestContext {
        service: IdentityService,
        identities: Arc<InMemoryIdentityStore>,
        requests: Arc<InMemoryAccessRequestStore>,
        persons: Arc<InMemoryPersonStore>,
        audit: Arc<InMemoryAuditStore>,
    }

    fn create_test_context() -> TestContext {
        let identities = Arc::new(InMemoryIdentityStore::new());
        let requests = Arc::new(InMemoryAccessRequestStore::new());
        let persons = Arc::new(InMemoryPersonStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let service = IdentityService::new(
            identities.clone(),
            requests.clone(),
            persons.clone(),
            audit.clone(),
        );
        TestContext {
            service,
            identities,
            requests,
            persons,
            audit,
        }
    }

    async fn seed_person(ctx: &TestContext, username: &str) -> Person {
        let now = Utc::now();
        ctx.persons
            .insert(Person {
                id: PersonId::new(),
                username: username.to_string(),
                name: username.to_string(),
                email: format!("{username}@example.com"),
                state: PersonState::Active,
                is_ops: false,
                is_admin: false,
                login_enabled: true,
                avatar: None,
                offboard_date: None,
                revoker_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    async fn seed_request(
        ctx: &TestContext,
        identity: &Identity,
        handle: &str,
        status: AccessRequestStatus,
        approved_on: Option<DateTime<Utc>>,
    ) -> AccessRequest {
        let now = Utc::now();
        ctx.requests
            .insert(AccessRequest {
                id: AccessRequestId::new(),
                request_id: handle.to_string(),
                identity_id: identity.id,
                person_id: identity.person_id,
                entitlement_id: EntitlementId::new(),
                access_tag: identity.access_tag.clone(),
                status,
                access_type: AccessType::Individual,
                approver_1_id: Some(PersonId::new()),
                approver_2_id: None,
                request_reason: "needed for on-call".to_string(),
                decline_reason: None,
                fail_reason: None,
                revoker_id: None,
                meta_data: json!({}),
                requested_on: now,
                approved_on,
                updated_on: now,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_active_is_idempotent() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;

        let first = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();
        let second = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.identity, json!({}));
        assert_eq!(first.status, IdentityStatus::Active);
        assert_eq!(ctx.audit.count().await, 1);
    }

    #[tokio::test]
    async fn test_second_active_identity_conflicts() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let existing = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        let now = Utc::now();
        let result = ctx
            .identities
            .insert(Identity {
                id: IdentityId::new(),
                person_id: person.id,
                access_tag: "github_access".to_string(),
                identity: json!({"username": "ada2"}),
                status: IdentityStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await;
        assert!(matches!(
            result,
            Err(GovernanceError::ActiveIdentityExists(_))
        ));

        // Deactivating the current one frees the slot
        ctx.service.deactivate(existing.id).await.unwrap();
        ctx.identities
            .insert(Identity {
                id: IdentityId::new(),
                person_id: person.id,
                access_tag: "github_access".to_string(),
                identity: json!({"username": "ada2"}),
                status: IdentityStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let identity = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        let first = ctx.service.deactivate(identity.id).await.unwrap();
        assert_eq!(first.status, IdentityStatus::Inactive);

        let second = ctx.service.deactivate(identity.id).await.unwrap();
        assert_eq!(second.status, IdentityStatus::Inactive);
    }

    #[tokio::test]
    async fn test_replicate_active_grants_forks_rows() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let source = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        let granted_at = Utc::now();
        seed_request(
            &ctx,
            &source,
            "ada-individual-1",
            AccessRequestStatus::Approved,
            Some(granted_at),
        )
        .await;
        seed_request(
            &ctx,
            &source,
            "ada-individual-2",
            AccessRequestStatus::Pending,
            None,
        )
        .await;
        seed_request(
            &ctx,
            &source,
            "ada-individual-3",
            AccessRequestStatus::Revoked,
            None,
        )
        .await;

        let outcome = ctx
            .service
            .replicate_active_grants(person.id, source.id, json!({"username": "ada-new"}))
            .await
            .unwrap();

        assert_eq!(outcome.identity.identity, json!({"username": "ada-new"}));
        assert_eq!(outcome.identity.status, IdentityStatus::Active);
        assert_eq!(outcome.replicated.len(), 2);

        let statuses: Vec<AccessRequestStatus> =
            outcome.replicated.iter().map(|r| r.status).collect();
        assert!(statuses.contains(&AccessRequestStatus::Processing));
        assert!(statuses.contains(&AccessRequestStatus::Pending));

        // The re-driven grant keeps its original grant time
        let processing = outcome
            .replicated
            .iter()
            .find(|r| r.status == AccessRequestStatus::Processing)
            .unwrap();
        assert_eq!(processing.approved_on, Some(granted_at));
        assert!(processing.request_id.starts_with("ada-individual-"));
        assert_ne!(processing.request_id, "ada-individual-1");

        // Source identity retired, its rows untouched
        let retired = ctx.service.get(source.id).await.unwrap().unwrap();
        assert_eq!(retired.status, IdentityStatus::Inactive);
        let original = ctx
            .requests
            .get_by_request_id("ada-individual-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.status, AccessRequestStatus::Approved);
        assert_eq!(original.identity_id, source.id);
    }

    #[tokio::test]
    async fn test_replicate_from_inactive_identity_fails() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let identity = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();
        ctx.service.deactivate(identity.id).await.unwrap();

        let result = ctx
            .service
            .replicate_active_grants(person.id, identity.id, json!({"username": "ada-new"}))
            .await;
        assert!(matches!(
            result,
            Err(GovernanceError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_scoped_request_sets() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let identity = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        seed_request(&ctx, &identity, "r-1", AccessRequestStatus::Approved, None).await;
        seed_request(&ctx, &identity, "r-2", AccessRequestStatus::Pending, None).await;
        seed_request(&ctx, &identity, "r-3", AccessRequestStatus::Processing, None).await;
        seed_request(&ctx, &identity, "r-4", AccessRequestStatus::GrantFailed, None).await;
        seed_request(&ctx, &identity, "r-5", AccessRequestStatus::Revoked, None).await;

        assert_eq!(ctx.service.active_requests(identity.id).await.unwrap().len(), 3);
        assert_eq!(
            ctx.service.granted_requests(identity.id).await.unwrap().len(),
            2
        );
        assert_eq!(
            ctx.service
                .non_approved_requests(identity.id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_decline_all_non_approved_leaves_grants() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let identity = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        seed_request(&ctx, &identity, "r-1", AccessRequestStatus::Pending, None).await;
        seed_request(&ctx, &identity, "r-2", AccessRequestStatus::GrantFailed, None).await;
        seed_request(&ctx, &identity, "r-3", AccessRequestStatus::Approved, None).await;

        let declined = ctx
            .service
            .decline_all_non_approved(identity.id, "identity replaced")
            .await
            .unwrap();
        assert_eq!(declined, 2);

        let kept = ctx
            .requests
            .get_by_request_id("r-3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.status, AccessRequestStatus::Approved);

        let swept = ctx
            .requests
            .get_by_request_id("r-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swept.status, AccessRequestStatus::Declined);
        assert_eq!(swept.decline_reason.as_deref(), Some("identity replaced"));
    }

    #[tokio::test]
    async fn test_access_request_exists_covers_pending_and_approved() {
        let ctx = create_test_context();
        let person = seed_person(&ctx, "ada").await;
        let identity = ctx
            .service
            .get_or_create_active(person.id, "github_access")
            .await
            .unwrap();

        let pending =
            seed_request(&ctx, &identity, "r-1", AccessRequestStatus::Pending, None).await;
        assert!(ctx
            .service
            .access_request_exists(identity.id, pending.entitlement_id)
            .await
            .unwrap());
        assert!(!ctx
            .service
            .has_granted_access(identity.id, pending.entitlement_id)
            .await
            .unwrap());

        let declined =
            seed_request(&ctx, &identity, "r-2", AccessRequestStatus::Declined, None).await;
        assert!(!ctx
            .service
            .access_request_exists(identity.id, declined.entitlement_id)
            .await
            .unwrap());
    }
}
