//! Offboarding orchestration.
//!
//! Offboarding a person is a sweep over everything they hold: their
//! granted individual requests enter the revoke pipeline, their undecided
//! requests are declined, and their memberships are revoked. The sweep is
//! set-based and safe to re-run; a second pass finds nothing left to move.
//! The person only reaches Offboarded through [`OffboardingService::finalize`],
//! once the integration workers have confirmed every revoke.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use signet_core::PersonId;

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::types::{AccessRequestStatus, MembershipStatus, PersonState};

use super::catalog::ListOptions;
use super::group::{MembershipFilter, MembershipStore};
use super::person::{Person, PersonStore, UpdatePersonInput};
use super::request::{AccessRequestFilter, AccessRequestStore};

/// Decline reason stamped on undecided requests swept by an offboarding.
const OFFBOARD_DECLINE_REASON: &str = "Person offboarded";

/// Counts of what one offboarding sweep moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OffboardingStats {
    /// Approved requests moved into Offboarding.
    pub requests_offboarded: u64,
    /// Requests pushed into the revoke pipeline.
    pub revokes_initiated: u64,
    /// Undecided requests declined.
    pub requests_declined: u64,
    /// Live memberships revoked.
    pub memberships_revoked: u64,
}

impl OffboardingStats {
    /// Fold another sweep's counts into this one.
    pub fn merge(&mut self, other: OffboardingStats) {
        self.requests_offboarded += other.requests_offboarded;
        self.revokes_initiated += other.revokes_initiated;
        self.requests_declined += other.requests_declined;
        self.memberships_revoked += other.memberships_revoked;
    }
}

/// Service that walks a person out of the system.
pub struct OffboardingService {
    persons: Arc<dyn PersonStore>,
    requests: Arc<dyn AccessRequestStore>,
    memberships: Arc<dyn MembershipStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl OffboardingService {
    /// Create a new offboarding service.
    pub fn new(
        persons: Arc<dyn PersonStore>,
        requests: Arc<dyn AccessRequestStore>,
        memberships: Arc<dyn MembershipStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            persons,
            requests,
            memberships,
            audit_store,
        }
    }

    async fn require_person(&self, person_id: PersonId) -> Result<Person> {
        self.persons
            .get(person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))
    }

    /// Start offboarding a person.
    ///
    /// Moves the person to Offboarding (recording the revoker, the
    /// offboard date, and disabling sign-in), pushes every granted request
    /// into the revoke pipeline, declines the undecided ones, and revokes
    /// every live membership. Re-running the sweep is harmless: the person
    /// write is skipped once they left Active, and the set-based updates
    /// find nothing left to move.
    #[tracing::instrument(skip(self))]
    pub async fn offboard(
        &self,
        person_id: PersonId,
        revoker_id: PersonId,
    ) -> Result<OffboardingStats> {
        let person = self.require_person(person_id).await?;

        if person.state == PersonState::Active {
            self.persons
                .update(
                    person.id,
                    UpdatePersonInput {
                        state: Some(PersonState::Offboarding),
                        login_enabled: Some(false),
                        offboard_date: Some(Utc::now()),
                        revoker_id: Some(revoker_id),
                        ..Default::default()
                    },
                )
                .await?
                .ok_or(GovernanceError::PersonNotFound(person.id))?;
        }

        let requests_offboarded = self
            .requests
            .bulk_update_status(
                &AccessRequestFilter {
                    person_id: Some(person.id),
                    statuses: Some(vec![AccessRequestStatus::Approved]),
                    ..Default::default()
                },
                AccessRequestStatus::Offboarding,
                None,
                None,
            )
            .await?;
        let revokes_initiated = self
            .requests
            .bulk_update_status(
                &AccessRequestFilter {
                    person_id: Some(person.id),
                    statuses: Some(vec![AccessRequestStatus::Offboarding]),
                    ..Default::default()
                },
                AccessRequestStatus::ProcessingRevoke,
                None,
                Some(revoker_id),
            )
            .await?;
        let requests_declined = self
            .requests
            .bulk_update_status(
                &AccessRequestFilter {
                    person_id: Some(person.id),
                    statuses: Some(vec![
                        AccessRequestStatus::Pending,
                        AccessRequestStatus::SecondaryPending,
                        AccessRequestStatus::GrantFailed,
                    ]),
                    ..Default::default()
                },
                AccessRequestStatus::Declined,
                Some(OFFBOARD_DECLINE_REASON.to_string()),
                None,
            )
            .await?;
        let owned_before = self
            .memberships
            .list(
                &MembershipFilter {
                    person_id: Some(person.id),
                    status: Some(MembershipStatus::Approved),
                    is_owner: Some(true),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await?;
        let memberships_revoked = self.memberships.revoke_all_for_person(person.id).await?;

        for membership in &owned_before {
            let owners_left = self
                .memberships
                .count(&MembershipFilter {
                    group_id: Some(membership.group_id),
                    status: Some(MembershipStatus::Approved),
                    is_owner: Some(true),
                    ..Default::default()
                })
                .await?;
            if owners_left == 0 {
                tracing::warn!(
                    group_id = %membership.group_id,
                    person_id = %person.id,
                    "offboarding left the group without an approved owner"
                );
                self.audit_store
                    .log_event(GovernanceAuditEventInput {
                        action: GovernanceAuditAction::GroupOwnerless,
                        actor_id: Some(revoker_id),
                        person_id: Some(person.id),
                        group_id: Some(membership.group_id),
                        ..Default::default()
                    })
                    .await?;
            }
        }

        let stats = OffboardingStats {
            requests_offboarded,
            revokes_initiated,
            requests_declined,
            memberships_revoked,
        };

        tracing::info!(
            person_id = %person.id,
            requests_offboarded = stats.requests_offboarded,
            revokes_initiated = stats.revokes_initiated,
            requests_declined = stats.requests_declined,
            memberships_revoked = stats.memberships_revoked,
            "offboarding sweep finished"
        );
        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::PersonOffboarded,
                actor_id: Some(revoker_id),
                person_id: Some(person.id),
                metadata: Some(serde_json::to_value(stats).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(stats)
    }

    /// Close out an offboarding once nothing is left in flight.
    ///
    /// Returns whether the person is Offboarded afterwards. The move
    /// happens only when every request row of the person is terminal and
    /// no live membership remains; until then the call reports `false`
    /// and changes nothing.
    pub async fn finalize(&self, person_id: PersonId) -> Result<bool> {
        let person = self.require_person(person_id).await?;

        match person.state {
            PersonState::Offboarded => return Ok(true),
            PersonState::Offboarding => {}
            PersonState::Active => {
                return Err(GovernanceError::InvalidTransition {
                    status: person.state.to_string(),
                    action: "finalize offboarding",
                });
            }
        }

        let in_flight = self
            .requests
            .count(&AccessRequestFilter {
                person_id: Some(person.id),
                exclude_statuses: Some(vec![
                    AccessRequestStatus::Declined,
                    AccessRequestStatus::Revoked,
                ]),
                ..Default::default()
            })
            .await?;
        if in_flight > 0 {
            return Ok(false);
        }

        let live_memberships = self
            .memberships
            .count(&MembershipFilter {
                person_id: Some(person.id),
                statuses: Some(vec![MembershipStatus::Pending, MembershipStatus::Approved]),
                ..Default::default()
            })
            .await?;
        if live_memberships > 0 {
            return Ok(false);
        }

        self.persons
            .update(
                person.id,
                UpdatePersonInput {
                    state: Some(PersonState::Offboarded),
                    ..Default::default()
                },
            )
            .await?
            .ok_or(GovernanceError::PersonNotFound(person.id))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::OffboardingCompleted,
                actor_id: None,
                person_id: Some(person.id),
                ..Default::default()
            })
            .await?;

        Ok(true)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;
    use crate::services::group::{
        Group, GroupStore, InMemoryGroupStore, InMemoryMembershipStore, Membership,
    };
    use crate::services::person::InMemoryPersonStore;
    use crate::services::request::{
        AccessRequest, InMemoryAccessRequestStore, UpdateAccessRequestInput,
    };
    use crate::types::{AccessType, GroupStatus};
    use chrono::Utc;
    use signet_core::{AccessRequestId, EntitlementId, GroupId, IdentityId, MembershipId};

    struct TestContext {
        service: OffboardingService,
        persons: Arc<InMemoryPersonStore>,
        requests: Arc<InMemoryAccessRequestStore>,
        groups: Arc<InMemoryGroupStore>,
        memberships: Arc<InMemoryMembershipStore>,
        audit: Arc<InMemoryAuditStore>,
    }

    fn create_test_context() -> TestContext {
        let persons = Arc::new(InMemoryPersonStore::new());
        let requests = Arc::new(InMemoryAccessRequestStore::new());
        let groups = Arc::new(InMemoryGroupStore::new());
        let memberships = Arc::new(InMemoryMembershipStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let service = OffboardingService::new(
            persons.clone(),
            requests.clone(),
            memberships.clone(),
            audit.clone(),
        );
        TestContext {
            service,
            persons,
            requests,
            groups,
            memberships,
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
        person: &Person,
        handle: &str,
        status: AccessRequestStatus,
    ) -> AccessRequest {
        let now = Utc::now();
        ctx.requests
            .insert(AccessRequest {
                id: AccessRequestId::new(),
                request_id: handle.to_string(),
                identity_id: IdentityId::new(),
                person_id: person.id,
                entitlement_id: EntitlementId::new(),
                access_tag: "github_access".to_string(),
                status,
                access_type: AccessType::Individual,
                approver_1_id: None,
                approver_2_id: None,
                request_reason: "seeded".to_string(),
                decline_reason: None,
                fail_reason: None,
                revoker_id: None,
                meta_data: serde_json::json!({}),
                requested_on: now,
                approved_on: None,
                updated_on: now,
            })
            .await
            .unwrap()
    }

    async fn seed_membership(
        ctx: &TestContext,
        person: &Person,
        handle: &str,
        status: MembershipStatus,
        is_owner: bool,
    ) -> Membership {
        let now = Utc::now();
        let group = ctx
            .groups
            .insert(Group {
                id: GroupId::new(),
                group_key: format!("{handle}-group"),
                name: format!("{handle}-group"),
                description: "seeded".to_string(),
                status: GroupStatus::Approved,
                requester_id: person.id,
                approver_id: None,
                decline_reason: None,
                needs_access_approve: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        ctx.memberships
            .insert(Membership {
                id: MembershipId::new(),
                membership_id: handle.to_string(),
                group_id: group.id,
                person_id: person.id,
                is_owner,
                status,
                requested_by_id: person.id,
                approver_id: None,
                reason: "seeded".to_string(),
                decline_reason: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_offboard_sweeps_requests_and_memberships() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;
        let ops = seed_person(&ctx, "ops").await;

        seed_request(&ctx, &ada, "ada-github-1", AccessRequestStatus::Approved).await;
        seed_request(&ctx, &ada, "ada-github-2", AccessRequestStatus::Approved).await;
        seed_request(&ctx, &ada, "ada-github-3", AccessRequestStatus::Pending).await;
        seed_request(&ctx, &ada, "ada-github-4", AccessRequestStatus::GrantFailed).await;
        seed_membership(&ctx, &ada, "m1", MembershipStatus::Approved, false).await;
        seed_membership(&ctx, &ada, "m2", MembershipStatus::Pending, false).await;

        let stats = ctx.service.offboard(ada.id, ops.id).await.unwrap();
        assert_eq!(stats.requests_offboarded, 2);
        assert_eq!(stats.revokes_initiated, 2);
        assert_eq!(stats.requests_declined, 2);
        assert_eq!(stats.memberships_revoked, 2);

        let person = ctx.persons.get(ada.id).await.unwrap().unwrap();
        assert_eq!(person.state, PersonState::Offboarding);
        assert!(!person.login_enabled);
        assert_eq!(person.revoker_id, Some(ops.id));
        assert!(person.offboard_date.is_some());

        let granted = ctx
            .requests
            .get_by_request_id("ada-github-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(granted.status, AccessRequestStatus::ProcessingRevoke);
        assert_eq!(granted.revoker_id, Some(ops.id));

        let pending = ctx
            .requests
            .get_by_request_id("ada-github-3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.status, AccessRequestStatus::Declined);
        assert_eq!(
            pending.decline_reason.as_deref(),
            Some("Person offboarded")
        );
    }

    #[tokio::test]
    async fn test_offboard_rerun_finds_nothing_left() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;
        let ops = seed_person(&ctx, "ops").await;

        seed_request(&ctx, &ada, "ada-github-1", AccessRequestStatus::Approved).await;
        seed_membership(&ctx, &ada, "m1", MembershipStatus::Approved, false).await;

        let first = ctx.service.offboard(ada.id, ops.id).await.unwrap();
        assert_eq!(first.requests_offboarded, 1);

        let second = ctx.service.offboard(ada.id, ops.id).await.unwrap();
        assert_eq!(second, OffboardingStats::default());

        let person = ctx.persons.get(ada.id).await.unwrap().unwrap();
        assert_eq!(person.state, PersonState::Offboarding);
    }

    #[tokio::test]
    async fn test_offboard_owner_surfaces_ownerless_group() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;
        let bob = seed_person(&ctx, "bob").await;
        let ops = seed_person(&ctx, "ops").await;

        let solo = seed_membership(&ctx, &ada, "ada-solo", MembershipStatus::Approved, true).await;
        let shared =
            seed_membership(&ctx, &ada, "ada-shared", MembershipStatus::Approved, true).await;
        let now = Utc::now();
        ctx.memberships
            .insert(Membership {
                id: MembershipId::new(),
                membership_id: "bob-shared".to_string(),
                group_id: shared.group_id,
                person_id: bob.id,
                is_owner: true,
                status: MembershipStatus::Approved,
                requested_by_id: bob.id,
                approver_id: None,
                reason: "seeded".to_string(),
                decline_reason: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let stats = ctx.service.offboard(ada.id, ops.id).await.unwrap();
        assert_eq!(stats.memberships_revoked, 2);

        let events = ctx
            .audit
            .query_events(crate::audit::AuditEventFilter {
                action: Some(GovernanceAuditAction::GroupOwnerless),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].group_id, Some(solo.group_id));
    }

    #[tokio::test]
    async fn test_offboard_leaves_other_persons_alone() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;
        let bob = seed_person(&ctx, "bob").await;
        let ops = seed_person(&ctx, "ops").await;

        seed_request(&ctx, &ada, "ada-github-1", AccessRequestStatus::Approved).await;
        seed_request(&ctx, &bob, "bob-github-1", AccessRequestStatus::Approved).await;

        ctx.service.offboard(ada.id, ops.id).await.unwrap();

        let untouched = ctx
            .requests
            .get_by_request_id("bob-github-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, AccessRequestStatus::Approved);
        let bob_row = ctx.persons.get(bob.id).await.unwrap().unwrap();
        assert_eq!(bob_row.state, PersonState::Active);
    }

    #[tokio::test]
    async fn test_finalize_waits_for_terminal_rows() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;
        let ops = seed_person(&ctx, "ops").await;

        let request = seed_request(&ctx, &ada, "ada-github-1", AccessRequestStatus::Approved).await;
        ctx.service.offboard(ada.id, ops.id).await.unwrap();

        // Revoke still in flight
        assert!(!ctx.service.finalize(ada.id).await.unwrap());

        ctx.requests
            .update(
                request.id,
                UpdateAccessRequestInput {
                    status: Some(AccessRequestStatus::Revoked),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(ctx.service.finalize(ada.id).await.unwrap());
        let person = ctx.persons.get(ada.id).await.unwrap().unwrap();
        assert_eq!(person.state, PersonState::Offboarded);

        // Finalizing an offboarded person stays true
        assert!(ctx.service.finalize(ada.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_finalize_rejects_active_person() {
        let ctx = create_test_context();
        let ada = seed_person(&ctx, "ada").await;

        let result = ctx.service.finalize(ada.id).await;
        assert!(matches!(
            result,
            Err(GovernanceError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_offboard_unknown_person() {
        let ctx = create_test_context();
        let ops = seed_person(&ctx, "ops").await;

        let result = ctx.service.offboard(PersonId::new(), ops.id).await;
        assert!(matches!(result, Err(GovernanceError::PersonNotFound(_))));
    }

    #[test]
    fn test_stats_merge_adds_counts() {
        let mut stats = OffboardingStats {
            requests_offboarded: 1,
            revokes_initiated: 2,
            requests_declined: 0,
            memberships_revoked: 1,
        };
        stats.merge(OffboardingStats {
            requests_offboarded: 2,
            revokes_initiated: 1,
            requests_declined: 3,
            memberships_revoked: 0,
        });
        assert_eq!(stats.requests_offboarded, 3);
        assert_eq!(stats.revokes_initiated, 3);
        assert_eq!(stats.requests_declined, 3);
        assert_eq!(stats.memberships_revoked, 1);
    }
}
