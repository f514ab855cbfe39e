//! Integration tests for the governance audit trail.
//!
//! These tests verify actor attribution across operations, the system
//! events written without an actor, event metadata, and the query filter
//! combinations.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use signet_governance::audit::AuditEventFilter;
use signet_governance::services::group::CreateGroupInput;
use signet_governance::types::ApprovalTier;
use signet_governance::{AuditStore, GovernanceAuditAction};

use common::fixtures::{approved_group, open_pending_request, setup_basic_fixtures};
use common::TestContext;

// ============================================================================
// Request Lifecycle Attribution
// ============================================================================

/// Test actor attribution along an individual request.
///
/// Creation is attributed to the requester and approval to the approver,
/// while the grant landing is system-driven and carries no actor.
#[tokio::test]
async fn test_request_lifecycle_attribution() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");

    let request =
        open_pending_request(&ctx, "REQ-4001", alice, fixtures.entitlement("github-dev")).await;
    ctx.services
        .request
        .record_approval("REQ-4001", ApprovalTier::Primary, bob.id, false)
        .await
        .expect("Failed to record approval");
    ctx.services
        .request
        .complete_grant("REQ-4001")
        .await
        .expect("Failed to complete grant");

    let events = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            request_id: Some(request.id),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(events.len(), 3);

    let created = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::RequestCreated)
        .expect("Creation event missing");
    assert_eq!(created.actor_id, Some(alice.id));
    assert_eq!(created.person_id, Some(alice.id));
    assert!(created.before_state.is_none());
    assert!(created.after_state.is_some());

    let approved = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::RequestApproved)
        .expect("Approval event missing");
    assert_eq!(approved.actor_id, Some(bob.id));
    assert!(approved.before_state.is_some());

    let granted = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::GrantCompleted)
        .expect("Grant event missing");
    assert_eq!(granted.actor_id, None);
}

// ============================================================================
// Group Request Events and Fan-Out Metadata
// ============================================================================

/// Test the events written along a group access request.
///
/// The fan-out event is system-driven and records how many member
/// requests it created; the approval event records the tier.
#[tokio::test]
async fn test_group_request_events_and_fan_out_metadata() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");

    let group = approved_group(&ctx, alice, bob, "platform", vec![dana]).await;
    let request = ctx
        .services
        .group_request
        .add_access(
            group.id,
            "GR-6001",
            alice.id,
            "Team repository access",
            fixtures.entitlement("github-dev").id,
        )
        .await
        .expect("Failed to add access");
    ctx.services
        .group_request
        .record_approval("GR-6001", ApprovalTier::Primary, bob.id, false)
        .await
        .expect("Failed to approve group request");

    let events = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            group_request_id: Some(request.id),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");

    let created = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::GroupRequestCreated)
        .expect("Creation event missing");
    assert_eq!(created.actor_id, Some(alice.id));

    let approved = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::GroupRequestApproved)
        .expect("Approval event missing");
    assert_eq!(approved.actor_id, Some(bob.id));
    assert_eq!(approved.metadata, Some(json!({"tier": "primary"})));

    let fanned = events
        .iter()
        .find(|e| e.action == GovernanceAuditAction::GroupRequestFannedOut)
        .expect("Fan-out event missing");
    assert_eq!(fanned.actor_id, None);
    assert_eq!(fanned.metadata, Some(json!({"created": 2})));
}

// ============================================================================
// Group Approval Metadata
// ============================================================================

/// Test that approving a group records the membership cascade size.
#[tokio::test]
async fn test_group_approval_metadata() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");

    let group = ctx
        .services
        .group
        .create_group(
            alice.id,
            CreateGroupInput {
                name: "platform".to_string(),
                description: "Platform team".to_string(),
                needs_access_approve: true,
                reason: "Team formation".to_string(),
                initial_member_ids: vec![dana.id],
            },
        )
        .await
        .expect("Failed to create group");
    ctx.services
        .group
        .approve_group(group.id, bob.id)
        .await
        .expect("Failed to approve group");

    let creations = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            group_id: Some(group.id),
            action: Some(GovernanceAuditAction::GroupCreated),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(creations.len(), 1);
    assert_eq!(creations[0].actor_id, Some(alice.id));

    let requested = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            group_id: Some(group.id),
            action: Some(GovernanceAuditAction::MembershipRequested),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(requested.len(), 2);

    let approvals = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            group_id: Some(group.id),
            action: Some(GovernanceAuditAction::GroupApproved),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].actor_id, Some(bob.id));
    assert_eq!(
        approvals[0].metadata,
        Some(json!({"members_approved": 2}))
    );
}

// ============================================================================
// Offboarding Events
// ============================================================================

/// Test offboarding attribution and the system-driven completion event.
#[tokio::test]
async fn test_offboarding_events() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");

    let stats = ctx
        .services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to offboard");
    ctx.services
        .offboarding
        .finalize(alice.id)
        .await
        .expect("Failed to finalize");

    let offboarded = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(alice.id),
            action: Some(GovernanceAuditAction::PersonOffboarded),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(offboarded.len(), 1);
    assert_eq!(offboarded[0].actor_id, Some(bob.id));
    assert_eq!(
        offboarded[0].metadata,
        Some(serde_json::to_value(stats).expect("Failed to serialize stats"))
    );

    let completed = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(alice.id),
            action: Some(GovernanceAuditAction::OffboardingCompleted),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].actor_id, None);
}

// ============================================================================
// Filter Combinations
// ============================================================================

/// Test actor, date, and pagination filters.
#[tokio::test]
async fn test_filter_combinations() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");
    let before = Utc::now() - Duration::seconds(1);

    open_pending_request(&ctx, "REQ-4005", alice, fixtures.entitlement("github-dev")).await;
    open_pending_request(&ctx, "REQ-4006", dana, fixtures.entitlement("github-dev")).await;
    ctx.services
        .request
        .record_approval("REQ-4005", ApprovalTier::Primary, bob.id, false)
        .await
        .expect("Failed to record approval");

    // Bob carries his provisioning event and the approval he recorded.
    let by_actor = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            actor_id: Some(bob.id),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(by_actor.len(), 2);
    assert!(by_actor
        .iter()
        .any(|e| e.action == GovernanceAuditAction::RequestApproved));

    let conjunction = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            actor_id: Some(bob.id),
            action: Some(GovernanceAuditAction::RequestApproved),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(conjunction.len(), 1);

    let in_window = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(dana.id),
            from_date: Some(before),
            to_date: Some(Utc::now() + Duration::seconds(1)),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert!(!in_window.is_empty());

    let out_of_window = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(dana.id),
            to_date: Some(before - Duration::hours(1)),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert!(out_of_window.is_empty());

    let limited = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(alice.id),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(limited.len(), 1);

    let all_for_alice = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(alice.id),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    let skipped = ctx
        .stores
        .audit_store
        .query_events(AuditEventFilter {
            person_id: Some(alice.id),
            offset: Some(1),
            ..Default::default()
        })
        .await
        .expect("Failed to query events");
    assert_eq!(skipped.len(), all_for_alice.len() - 1);
}
