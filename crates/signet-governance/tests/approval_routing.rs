//! Integration tests for approver eligibility and routing.
//!
//! These tests cover the permission checks that gate approvals, the
//! aggregate approver inbox count, and the group-scoped permission
//! gates used by the administrative surfaces.

mod common;

use signet_governance::services::group::CreateGroupInput;
use signet_governance::services::{ALLOW_USER_OFFBOARD_PERMISSION, DEFAULT_APPROVER_PERMISSION};
use signet_governance::types::ApprovalTier;

use common::fixtures::{
    approved_group, grant_permission, seed_admin, seed_person, setup_basic_fixtures,
};
use common::TestContext;

// ============================================================================
// Possible Approver Permissions
// ============================================================================

/// Test that the union of module permissions is collected, sorted.
#[tokio::test]
async fn test_possible_approver_permissions() {
    let ctx = TestContext::new().await;

    let possible = ctx.services.approval.possible_approver_permissions().await;
    assert_eq!(
        possible,
        vec![
            DEFAULT_APPROVER_PERMISSION.to_string(),
            "AWS_APPROVE_1".to_string(),
            "AWS_APPROVE_2".to_string(),
        ]
    );
}

// ============================================================================
// Approver Eligibility per Module
// ============================================================================

/// Test tier eligibility against the fixture integrations.
///
/// bob holds the default permission, which the github integration
/// accepts; the aws integration wants its own pair, which carol holds.
#[tokio::test]
async fn test_approver_eligibility_per_module() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let carol = fixtures.person("carol");

    let approval = &ctx.services.approval;
    assert!(approval
        .is_primary_approver_for_module(bob, "github", None)
        .await
        .expect("Failed to check eligibility"));
    assert!(!approval
        .is_primary_approver_for_module(bob, "aws", None)
        .await
        .expect("Failed to check eligibility"));

    // The github integration has no secondary tier at all.
    assert!(!approval
        .is_secondary_approver_for_module(bob, "github", None)
        .await
        .expect("Failed to check eligibility"));

    assert!(approval
        .is_approver_for_module(carol, "aws", None, ApprovalTier::Primary)
        .await
        .expect("Failed to check eligibility"));
    assert!(approval
        .is_approver_for_module(carol, "aws", None, ApprovalTier::Secondary)
        .await
        .expect("Failed to check eligibility"));

    assert!(!approval
        .is_an_approver(alice)
        .await
        .expect("Failed to check approver"));
    assert!(approval
        .is_an_approver(bob)
        .await
        .expect("Failed to check approver"));
    assert!(approval
        .is_an_approver(carol)
        .await
        .expect("Failed to check approver"));

    assert!(approval
        .check_person_permissions(carol, &["AWS_APPROVE_1", "SOMETHING_ELSE"])
        .await
        .expect("Failed to check permissions"));
    assert!(!approval
        .check_person_permissions(alice, &[DEFAULT_APPROVER_PERMISSION])
        .await
        .expect("Failed to check permissions"));
}

// ============================================================================
// Approver Inbox Count
// ============================================================================

/// Test the aggregate count of items waiting on a person.
///
/// Holders of the default permission see pending group creations and
/// pending memberships of approved groups; others see none from either.
#[tokio::test]
async fn test_approver_inbox_count() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let carol = fixtures.person("carol");
    let dana = fixtures.person("dana");
    let erin = seed_person(&ctx, "erin").await;

    // One pending membership in an approved group.
    let group = approved_group(&ctx, alice, bob, "platform", vec![]).await;
    ctx.services
        .group
        .add_member(group.id, erin.id, false, alice.id, "Joining the team")
        .await
        .expect("Failed to add member");

    // One pending group creation.
    ctx.services
        .group
        .create_group(
            dana.id,
            CreateGroupInput {
                name: "beta".to_string(),
                description: "Beta testers".to_string(),
                needs_access_approve: true,
                reason: "Beta program".to_string(),
                initial_member_ids: vec![],
            },
        )
        .await
        .expect("Failed to create group");

    let count = ctx
        .services
        .approval
        .pending_approvals_count(bob)
        .await
        .expect("Failed to count approvals");
    assert_eq!(count, 2);

    // Without the default permission the shared queues do not count.
    let count = ctx
        .services
        .approval
        .pending_approvals_count(carol)
        .await
        .expect("Failed to count approvals");
    assert_eq!(count, 0);
}

// ============================================================================
// Group Permission Gates
// ============================================================================

/// Test the group-scoped gates for admin actions and member offboarding.
#[tokio::test]
async fn test_group_permission_gates() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");
    let erin = seed_person(&ctx, "erin").await;
    let root = seed_admin(&ctx, "root").await;

    let group = approved_group(&ctx, alice, bob, "platform", vec![dana]).await;

    let gates = &ctx.services.group;
    assert!(gates
        .is_allowed_admin_actions_on_group(alice, group.id)
        .await
        .expect("Failed to check gate"));
    assert!(!gates
        .is_allowed_admin_actions_on_group(dana, group.id)
        .await
        .expect("Failed to check gate"));
    assert!(gates
        .is_allowed_admin_actions_on_group(&root, group.id)
        .await
        .expect("Failed to check gate"));

    assert!(gates
        .is_allowed_to_offboard_from_group(alice, group.id)
        .await
        .expect("Failed to check gate"));
    assert!(!gates
        .is_allowed_to_offboard_from_group(&erin, group.id)
        .await
        .expect("Failed to check gate"));

    grant_permission(&ctx, &erin, ALLOW_USER_OFFBOARD_PERMISSION).await;
    assert!(gates
        .is_allowed_to_offboard_from_group(&erin, group.id)
        .await
        .expect("Failed to check gate"));
}
