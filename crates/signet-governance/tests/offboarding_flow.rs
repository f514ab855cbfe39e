//! Integration tests for the offboarding orchestrator.
//!
//! These tests cover the offboarding sweep across requests and
//! memberships, its idempotent re-run, and the finalize gate that closes
//! a person out only once nothing is left in flight.

mod common;

use signet_governance::types::{AccessRequestStatus, ApprovalTier, MembershipStatus, PersonState};
use signet_governance::{GovernanceError, OffboardingStats};

use common::fixtures::{approved_group, open_pending_request, setup_basic_fixtures};
use common::TestContext;

// ============================================================================
// Offboarding Sweep
// ============================================================================

/// Test the full offboarding cascade for one person.
///
/// Given alice with a granted request, a pending request, and a group
/// membership
/// When alice is offboarded
/// Then her grant goes into revocation, her pending request is declined,
/// her membership is revoked, and her account is locked
#[tokio::test]
async fn test_offboarding_sweep() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let carol = fixtures.person("carol");

    let group = approved_group(&ctx, bob, carol, "platform", vec![alice]).await;

    open_pending_request(&ctx, "REQ-3001", alice, fixtures.entitlement("github-dev")).await;
    ctx.services
        .request
        .record_approval("REQ-3001", ApprovalTier::Primary, bob.id, false)
        .await
        .expect("Failed to record approval");
    ctx.services
        .request
        .complete_grant("REQ-3001")
        .await
        .expect("Failed to complete grant");

    open_pending_request(&ctx, "REQ-3002", alice, fixtures.entitlement("aws-prod")).await;

    let stats = ctx
        .services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to offboard");
    assert_eq!(
        stats,
        OffboardingStats {
            requests_offboarded: 1,
            revokes_initiated: 1,
            requests_declined: 1,
            memberships_revoked: 1,
        }
    );

    let person = ctx
        .services
        .person
        .get(alice.id)
        .await
        .expect("Failed to fetch person")
        .expect("Person missing");
    assert_eq!(person.state, PersonState::Offboarding);
    assert!(!person.login_enabled);
    assert!(person.offboard_date.is_some());
    assert_eq!(person.revoker_id, Some(bob.id));

    let granted = ctx
        .services
        .request
        .find_by_request_id("REQ-3001")
        .await
        .expect("Failed to fetch request")
        .expect("Request missing");
    assert_eq!(granted.status, AccessRequestStatus::ProcessingRevoke);
    assert_eq!(granted.revoker_id, Some(bob.id));

    let pending = ctx
        .services
        .request
        .find_by_request_id("REQ-3002")
        .await
        .expect("Failed to fetch request")
        .expect("Request missing");
    assert_eq!(pending.status, AccessRequestStatus::Declined);
    assert_eq!(pending.decline_reason.as_deref(), Some("Person offboarded"));

    let members = ctx
        .services
        .group
        .members_of_group(group.id)
        .await
        .expect("Failed to list members");
    let alice_membership = members
        .iter()
        .find(|m| m.person_id == alice.id)
        .expect("Membership missing");
    assert_eq!(alice_membership.status, MembershipStatus::Revoked);
    let bob_membership = members
        .iter()
        .find(|m| m.person_id == bob.id)
        .expect("Membership missing");
    assert_eq!(bob_membership.status, MembershipStatus::Approved);
}

// ============================================================================
// Re-Run Is Empty
// ============================================================================

/// Test that running the sweep twice does no further work.
#[tokio::test]
async fn test_rerun_is_empty() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");

    open_pending_request(&ctx, "REQ-3003", alice, fixtures.entitlement("github-dev")).await;

    let first = ctx
        .services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to offboard");
    assert_eq!(first.requests_declined, 1);

    let second = ctx
        .services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to re-run offboard");
    assert_eq!(second, OffboardingStats::default());

    let person = ctx
        .services
        .person
        .get(alice.id)
        .await
        .expect("Failed to fetch person")
        .expect("Person missing");
    assert_eq!(person.state, PersonState::Offboarding);
}

// ============================================================================
// Finalize Gate
// ============================================================================

/// Test that finalize waits for in-flight work.
///
/// Given an offboarded person with a revoke still in flight
/// Then finalize reports false and changes nothing
/// When the revoke lands
/// Then finalize moves the person to Offboarded, and stays there
#[tokio::test]
async fn test_finalize_gate() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");

    open_pending_request(&ctx, "REQ-3004", alice, fixtures.entitlement("github-dev")).await;
    ctx.services
        .request
        .record_approval("REQ-3004", ApprovalTier::Primary, bob.id, false)
        .await
        .expect("Failed to record approval");
    ctx.services
        .request
        .complete_grant("REQ-3004")
        .await
        .expect("Failed to complete grant");

    ctx.services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to offboard");

    let done = ctx
        .services
        .offboarding
        .finalize(alice.id)
        .await
        .expect("Failed to check finalize");
    assert!(!done);

    ctx.services
        .request
        .complete_revoke("REQ-3004")
        .await
        .expect("Failed to complete revoke");

    let done = ctx
        .services
        .offboarding
        .finalize(alice.id)
        .await
        .expect("Failed to finalize");
    assert!(done);
    let person = ctx
        .services
        .person
        .get(alice.id)
        .await
        .expect("Failed to fetch person")
        .expect("Person missing");
    assert_eq!(person.state, PersonState::Offboarded);

    // Finalizing again stays true.
    assert!(ctx
        .services
        .offboarding
        .finalize(alice.id)
        .await
        .expect("Failed to re-check finalize"));

    // A person who never started offboarding cannot be finalized.
    let err = ctx
        .services
        .offboarding
        .finalize(dana.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidTransition { .. }));
}

// ============================================================================
// Other Persons Untouched
// ============================================================================

/// Test that the sweep only touches the offboarded person.
#[tokio::test]
async fn test_other_persons_untouched() {
    let ctx = TestContext::new().await;
    let fixtures = setup_basic_fixtures(&ctx)
        .await
        .expect("Failed to set up fixtures");
    let alice = fixtures.person("alice");
    let bob = fixtures.person("bob");
    let dana = fixtures.person("dana");
    let entitlement = fixtures.entitlement("github-dev");

    open_pending_request(&ctx, "REQ-3005", alice, entitlement).await;
    open_pending_request(&ctx, "REQ-3006", dana, entitlement).await;

    ctx.services
        .offboarding
        .offboard(alice.id, bob.id)
        .await
        .expect("Failed to offboard");

    let danas = ctx
        .services
        .request
        .find_by_request_id("REQ-3006")
        .await
        .expect("Failed to fetch request")
        .expect("Request missing");
    assert_eq!(danas.status, AccessRequestStatus::Pending);

    let person = ctx
        .services
        .person
        .get(dana.id)
        .await
        .expect("Failed to fetch person")
        .expect("Person missing");
    assert_eq!(person.state, PersonState::Active);
    assert!(person.login_enabled);
}
