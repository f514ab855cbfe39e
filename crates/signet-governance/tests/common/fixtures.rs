//! Test fixtures for integration tests.
//!
//! Provides the fixture access modules registered in every test context,
//! factories for common inputs, and setup functions that seed a realistic
//! population of persons and entitlements.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use signet_core::PersonId;
use signet_governance::registry::{AccessModule, ApproverPermissions};
use signet_governance::services::catalog::CreateEntitlementInput;
use signet_governance::services::group::{CreateGroupInput, Group};
use signet_governance::services::person::{EnsurePersonInput, Person, PersonStore};
use signet_governance::services::request::{AccessRequest, CreateAccessRequestInput};
use signet_governance::services::DEFAULT_APPROVER_PERMISSION;
use signet_governance::types::{AccessType, PersonState};
use signet_governance::Entitlement;

use super::TestContext;

// ============================================================================
// Fixture Access Modules
// ============================================================================

/// Single-tier integration approved with the default permission.
pub struct GithubModule;

impl AccessModule for GithubModule {
    fn tag(&self) -> &str {
        "github"
    }

    fn access_description(&self) -> String {
        "GitHub team membership".to_string()
    }

    fn fetch_approver_permissions(&self, _label: Option<&serde_json::Value>) -> ApproverPermissions {
        ApproverPermissions::primary_only(DEFAULT_APPROVER_PERMISSION)
    }

    fn grant_owners(&self) -> Vec<String> {
        vec!["github-admins@example.com".to_string()]
    }

    fn revoke_owners(&self) -> Vec<String> {
        vec!["github-admins@example.com".to_string()]
    }
}

/// Two-tier integration with its own approver permissions.
pub struct AwsModule;

impl AccessModule for AwsModule {
    fn tag(&self) -> &str {
        "aws"
    }

    fn access_description(&self) -> String {
        "AWS account access".to_string()
    }

    fn fetch_approver_permissions(&self, _label: Option<&serde_json::Value>) -> ApproverPermissions {
        ApproverPermissions::with_secondary("AWS_APPROVE_1", "AWS_APPROVE_2")
    }
}

// ============================================================================
// Fixture Container
// ============================================================================

/// Result of fixture setup with created entities by name.
#[derive(Debug, Default)]
pub struct TestFixtures {
    /// Created persons by username.
    pub persons: HashMap<String, Person>,
    /// Created entitlements by label name.
    pub entitlements: HashMap<String, Entitlement>,
}

impl TestFixtures {
    /// Create a new empty fixtures container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a person by username, panics if not found.
    pub fn person(&self, username: &str) -> &Person {
        self.persons.get(username).unwrap_or_else(|| {
            panic!("Person '{}' not found in fixtures", username);
        })
    }

    /// Get an entitlement by name, panics if not found.
    pub fn entitlement(&self, name: &str) -> &Entitlement {
        self.entitlements.get(name).unwrap_or_else(|| {
            panic!("Entitlement '{}' not found in fixtures", name);
        })
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Factory for creating catalog entitlement inputs.
pub struct EntitlementFactory;

impl EntitlementFactory {
    /// A GitHub team entitlement that needs human approval.
    pub fn github_team(team: &str) -> CreateEntitlementInput {
        CreateEntitlementInput {
            access_tag: "github".to_string(),
            label: json!({ "team": team }),
            is_auto_approved: false,
        }
    }

    /// A GitHub team entitlement granted without approval.
    pub fn github_team_auto(team: &str) -> CreateEntitlementInput {
        CreateEntitlementInput {
            access_tag: "github".to_string(),
            label: json!({ "team": team }),
            is_auto_approved: true,
        }
    }

    /// An AWS account entitlement. The fixture module requires two
    /// approval tiers for these.
    pub fn aws_account(account: &str) -> CreateEntitlementInput {
        CreateEntitlementInput {
            access_tag: "aws".to_string(),
            label: json!({ "account": account }),
            is_auto_approved: false,
        }
    }
}

// ============================================================================
// Setup Functions
// ============================================================================

/// Create a person through the provisioning boundary.
pub async fn seed_person(ctx: &TestContext, username: &str) -> Person {
    ctx.services
        .person
        .ensure_person(EnsurePersonInput {
            username: username.to_string(),
            name: username.to_string(),
            email: format!("{}@example.com", username),
        })
        .await
        .expect("Failed to create person")
}

/// Create an administrator. The admin flag comes from the directory sync,
/// so it is written straight into the store.
pub async fn seed_admin(ctx: &TestContext, username: &str) -> Person {
    let now = Utc::now();
    ctx.stores
        .person_store
        .insert(Person {
            id: PersonId::new(),
            username: username.to_string(),
            name: username.to_string(),
            email: format!("{}@example.com", username),
            state: PersonState::Active,
            is_ops: false,
            is_admin: true,
            login_enabled: true,
            avatar: None,
            offboard_date: None,
            revoker_id: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("Failed to insert admin")
}

/// Grant a permission label to a person through a single-permission role.
pub async fn grant_permission(ctx: &TestContext, person: &Person, label: &str) {
    let permission = ctx
        .services
        .person
        .create_permission(label)
        .await
        .expect("Failed to create permission");
    let role = ctx
        .services
        .person
        .create_role(&format!("{}-role", label), vec![permission.id])
        .await
        .expect("Failed to create role");
    ctx.services
        .person
        .assign_role(person.id, role.id)
        .await
        .expect("Failed to assign role");
}

/// Open a pending individual request on the person's active identity.
pub async fn open_pending_request(
    ctx: &TestContext,
    handle: &str,
    person: &Person,
    entitlement: &Entitlement,
) -> AccessRequest {
    let identity = ctx
        .services
        .identity
        .get_or_create_active(person.id, &entitlement.access_tag)
        .await
        .expect("Failed to create identity");
    ctx.services
        .request
        .create_request(
            person.id,
            CreateAccessRequestInput {
                request_id: handle.to_string(),
                identity_id: identity.id,
                entitlement_id: entitlement.id,
                approver_1_id: None,
                approver_2_id: None,
                reason: "Needed for project work".to_string(),
                access_type: AccessType::Individual,
                status: None,
            },
        )
        .await
        .expect("Failed to create request")
}

/// Create a group and walk it through approval.
pub async fn approved_group(
    ctx: &TestContext,
    requester: &Person,
    approver: &Person,
    name: &str,
    members: Vec<&Person>,
) -> Group {
    let group = ctx
        .services
        .group
        .create_group(
            requester.id,
            CreateGroupInput {
                name: name.to_string(),
                description: format!("{} team", name),
                needs_access_approve: true,
                reason: "Team formation".to_string(),
                initial_member_ids: members.iter().map(|m| m.id).collect(),
            },
        )
        .await
        .expect("Failed to create group");
    ctx.services
        .group
        .approve_group(group.id, approver.id)
        .await
        .expect("Failed to approve group")
}

/// Set up the standard population: four persons and three entitlements.
///
/// - `alice`: plain requester
/// - `bob`: holds the default approver permission
/// - `carol`: holds both AWS approver permissions
/// - `dana`: plain member
pub async fn setup_basic_fixtures(ctx: &TestContext) -> signet_governance::Result<TestFixtures> {
    let mut fixtures = TestFixtures::new();

    for username in ["alice", "bob", "carol", "dana"] {
        let person = seed_person(ctx, username).await;
        fixtures.persons.insert(username.to_string(), person);
    }

    grant_permission(ctx, fixtures.person("bob"), DEFAULT_APPROVER_PERMISSION).await;
    grant_permission(ctx, fixtures.person("carol"), "AWS_APPROVE_1").await;
    grant_permission(ctx, fixtures.person("carol"), "AWS_APPROVE_2").await;

    let actor = fixtures.person("alice").id;
    let entitlements = [
        ("github-dev", EntitlementFactory::github_team("dev")),
        ("github-docs", EntitlementFactory::github_team_auto("docs")),
        ("aws-prod", EntitlementFactory::aws_account("prod")),
    ];
    for (name, input) in entitlements {
        let entitlement = ctx.services.catalog.ensure(actor, input).await?;
        fixtures.entitlements.insert(name.to_string(), entitlement);
    }

    Ok(fixtures)
}
