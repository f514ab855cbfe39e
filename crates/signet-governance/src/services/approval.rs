//! Approval policy evaluation.
//!
//! Decides who may approve what. Each integration names the permission an
//! approver must hold per tier; group and membership decisions fall back to
//! the engine-wide default permission. The evaluator only answers
//! questions, it never mutates request state.

use std::sync::Arc;

use signet_core::PersonId;

use crate::error::Result;
use crate::registry::ModuleRegistry;
use crate::types::{ApprovalTier, GroupStatus, MembershipStatus};

use super::catalog::ListOptions;
use super::group::{GroupFilter, GroupStore, MembershipFilter, MembershipStore};
use super::person::{Person, PersonStore};

/// Permission that admits holders to group, membership, and default
/// module approvals.
pub const DEFAULT_APPROVER_PERMISSION: &str = "ACCESS_APPROVE";

/// Permission that lets a non-owner remove members from any group.
pub const ALLOW_USER_OFFBOARD_PERMISSION: &str = "ALLOW_USER_OFFBOARD";

/// Service answering approver-eligibility questions.
pub struct ApprovalService {
    persons: Arc<dyn PersonStore>,
    groups: Arc<dyn GroupStore>,
    memberships: Arc<dyn MembershipStore>,
    registry: Arc<ModuleRegistry>,
}

impl ApprovalService {
    /// Create a new approval service.
    pub fn new(
        persons: Arc<dyn PersonStore>,
        groups: Arc<dyn GroupStore>,
        memberships: Arc<dyn MembershipStore>,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        Self {
            persons,
            groups,
            memberships,
            registry,
        }
    }

    /// Check if approving would mean deciding one's own request.
    #[must_use]
    pub fn is_self_approval(requester_id: PersonId, approver_id: PersonId) -> bool {
        requester_id == approver_id
    }

    /// Check if the person may decide the primary step for an integration.
    ///
    /// Some integrations vary the required permission by entitlement label.
    pub async fn is_primary_approver_for_module(
        &self,
        person: &Person,
        access_tag: &str,
        label: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let module = self.registry.require(access_tag).await?;
        let required = module.fetch_approver_permissions(label);
        let labels = self.persons.permission_labels(person.id).await?;
        Ok(labels.iter().any(|l| l == &required.primary))
    }

    /// Check if the person may decide the secondary step for an integration.
    ///
    /// Integrations without a secondary step never match.
    pub async fn is_secondary_approver_for_module(
        &self,
        person: &Person,
        access_tag: &str,
        label: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let module = self.registry.require(access_tag).await?;
        let required = module.fetch_approver_permissions(label);
        let Some(secondary) = required.secondary else {
            return Ok(false);
        };
        let labels = self.persons.permission_labels(person.id).await?;
        Ok(labels.iter().any(|l| l == &secondary))
    }

    /// Check approver eligibility for the given tier.
    pub async fn is_approver_for_module(
        &self,
        person: &Person,
        access_tag: &str,
        label: Option<&serde_json::Value>,
        tier: ApprovalTier,
    ) -> Result<bool> {
        match tier {
            ApprovalTier::Primary => {
                self.is_primary_approver_for_module(person, access_tag, label)
                    .await
            }
            ApprovalTier::Secondary => {
                self.is_secondary_approver_for_module(person, access_tag, label)
                    .await
            }
        }
    }

    /// Check if the person holds any approver permission at all.
    pub async fn is_an_approver(&self, person: &Person) -> Result<bool> {
        let possible = self.possible_approver_permissions().await;
        let labels = self.persons.permission_labels(person.id).await?;
        Ok(labels.iter().any(|l| possible.iter().any(|p| p == l)))
    }

    /// Check if the person holds any of the given permissions.
    pub async fn check_person_permissions(
        &self,
        person: &Person,
        permissions: &[&str],
    ) -> Result<bool> {
        let labels = self.persons.permission_labels(person.id).await?;
        Ok(labels.iter().any(|l| permissions.contains(&l.as_str())))
    }

    /// Every permission label that marks someone as an approver: the
    /// default membership-approval permission plus whatever each registered
    /// integration declares. Sorted and deduplicated.
    pub async fn possible_approver_permissions(&self) -> Vec<String> {
        let mut permissions: Vec<String> = vec![DEFAULT_APPROVER_PERMISSION.to_string()];
        for module in self.registry.all().await {
            let required = module.fetch_approver_permissions(None);
            permissions.extend(required.labels().iter().map(|l| (*l).to_string()));
        }
        permissions.sort();
        permissions.dedup();
        permissions
    }

    /// Number of items waiting on this person's decision.
    ///
    /// Membership and group-creation approvals count only for holders of
    /// the default approver permission; each integration routes its own
    /// pending requests on top.
    pub async fn pending_approvals_count(&self, person: &Person) -> Result<usize> {
        let mut pending = 0usize;

        let labels = self.persons.permission_labels(person.id).await?;
        if labels.iter().any(|l| l == DEFAULT_APPROVER_PERMISSION) {
            let approved_groups = self
                .groups
                .list(
                    &GroupFilter {
                        status: Some(GroupStatus::Approved),
                    },
                    &unbounded(),
                )
                .await?;
            let group_ids = approved_groups.iter().map(|g| g.id).collect();
            pending += self
                .memberships
                .count(&MembershipFilter {
                    group_ids: Some(group_ids),
                    status: Some(MembershipStatus::Pending),
                    ..Default::default()
                })
                .await? as usize;

            pending += self
                .groups
                .list(
                    &GroupFilter {
                        status: Some(GroupStatus::Pending),
                    },
                    &unbounded(),
                )
                .await?
                .len();
        }

        for module in self.registry.all().await {
            pending += module.pending_access_objects(person.id).await?.count();
        }

        Ok(pending)
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
    use crate::registry::{AccessModule, ApproverPermissions, PendingAccessObjects};
    use crate::services::group::{
        Group, InMemoryGroupStore, InMemoryMembershipStore, Membership,
    };
    use crate::services::person::InMemoryPersonStore;
    use crate::types::PersonState;
    use chrono::Utc;
    use signet_core::{GroupId, MembershipId};

    struct TestContext {
        service: ApprovalService,
        persons: Arc<InMemoryPersonStore>,
        groups: Arc<InMemoryGroupStore>,
        memberships: Arc<InMemoryMembershipStore>,
        registry: Arc<ModuleRegistry>,
    }

    struct GithubModule;

    #[async_trait::async_trait]
    impl AccessModule for GithubModule {
        fn tag(&self) -> &str {
            "github_access"
        }

        fn access_description(&self) -> String {
            "GitHub organization access".to_string()
        }

        fn fetch_approver_permissions(
            &self,
            _label: Option<&serde_json::Value>,
        ) -> ApproverPermissions {
            ApproverPermissions::primary_only(DEFAULT_APPROVER_PERMISSION)
        }
    }

    struct AwsModule;

    #[async_trait::async_trait]
    impl AccessModule for AwsModule {
        fn tag(&self) -> &str {
            "aws_access"
        }

        fn access_description(&self) -> String {
            "AWS account access".to_string()
        }

        fn fetch_approver_permissions(
            &self,
            _label: Option<&serde_json::Value>,
        ) -> ApproverPermissions {
            ApproverPermissions::with_secondary("AWS_APPROVE_1", "AWS_APPROVE_2")
        }
    }

    /// Routes a fixed batch of pending items to one chosen approver.
    struct RoutedModule {
        approver_id: PersonId,
    }

    #[async_trait::async_trait]
    impl AccessModule for RoutedModule {
        fn tag(&self) -> &str {
            "routed_access"
        }

        fn access_description(&self) -> String {
            "routed".to_string()
        }

        fn fetch_approver_permissions(
            &self,
            _label: Option<&serde_json::Value>,
        ) -> ApproverPermissions {
            ApproverPermissions::primary_only("ROUTED_APPROVE")
        }

        async fn pending_access_objects(&self, approver: PersonId) -> Result<PendingAccessObjects> {
            if approver == self.approver_id {
                Ok(PendingAccessObjects {
                    individual_requests: vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})],
                    group_requests: vec![serde_json::json!({"id": 3})],
                })
            } else {
                Ok(PendingAccessObjects::default())
            }
        }
    }

    fn create_test_context() -> TestContext {
        let persons = Arc::new(InMemoryPersonStore::new());
        let groups = Arc::new(InMemoryGroupStore::new());
        let memberships = Arc::new(InMemoryMembershipStore::new());
        let registry = Arc::new(ModuleRegistry::new());
        let service = ApprovalService::new(
            persons.clone(),
            groups.clone(),
            memberships.clone(),
            registry.clone(),
        );
        TestContext {
            service,
            persons,
            groups,
            memberships,
            registry,
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

    async fn grant_permission(ctx: &TestContext, person: &Person, label: &str) {
        let permission = ctx.persons.create_permission(label).await.unwrap();
        let role = ctx
            .persons
            .create_role(&format!("{label}-role"), vec![permission.id])
            .await
            .unwrap();
        ctx.persons.assign_role(person.id, role.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_tiered_approver_checks_follow_module_permissions() {
        let ctx = create_test_context();
        ctx.registry.register(Arc::new(GithubModule)).await;
        ctx.registry.register(Arc::new(AwsModule)).await;

        let primary = seed_person(&ctx, "ada").await;
        grant_permission(&ctx, &primary, "AWS_APPROVE_1").await;
        let secondary = seed_person(&ctx, "bob").await;
        grant_permission(&ctx, &secondary, "AWS_APPROVE_2").await;

        assert!(ctx
            .service
            .is_primary_approver_for_module(&primary, "aws_access", None)
            .await
            .unwrap());
        assert!(!ctx
            .service
            .is_secondary_approver_for_module(&primary, "aws_access", None)
            .await
            .unwrap());

        assert!(ctx
            .service
            .is_secondary_approver_for_module(&secondary, "aws_access", None)
            .await
            .unwrap());
        assert!(!ctx
            .service
            .is_primary_approver_for_module(&secondary, "aws_access", None)
            .await
            .unwrap());

        // Single-tier modules have no secondary approvers at all
        assert!(!ctx
            .service
            .is_secondary_approver_for_module(&primary, "github_access", None)
            .await
            .unwrap());

        assert!(ctx
            .service
            .is_approver_for_module(&secondary, "aws_access", None, ApprovalTier::Secondary)
            .await
            .unwrap());
        assert!(!ctx
            .service
            .is_approver_for_module(&secondary, "aws_access", None, ApprovalTier::Primary)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_an_approver_uses_module_union() {
        let ctx = create_test_context();
        ctx.registry.register(Arc::new(GithubModule)).await;
        ctx.registry.register(Arc::new(AwsModule)).await;

        let possible = ctx.service.possible_approver_permissions().await;
        assert_eq!(
            possible,
            vec![
                DEFAULT_APPROVER_PERMISSION.to_string(),
                "AWS_APPROVE_1".to_string(),
                "AWS_APPROVE_2".to_string(),
            ]
        );

        let approver = seed_person(&ctx, "ada").await;
        grant_permission(&ctx, &approver, "AWS_APPROVE_2").await;
        assert!(ctx.service.is_an_approver(&approver).await.unwrap());

        let outsider = seed_person(&ctx, "bob").await;
        grant_permission(&ctx, &outsider, "UNRELATED").await;
        assert!(!ctx.service.is_an_approver(&outsider).await.unwrap());

        assert!(ctx
            .service
            .check_person_permissions(&approver, &["AWS_APPROVE_2", "OTHER"])
            .await
            .unwrap());
        assert!(!ctx
            .service
            .check_person_permissions(&approver, &["OTHER"])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_self_approval_predicate() {
        let requester = PersonId::new();
        assert!(ApprovalService::is_self_approval(requester, requester));
        assert!(!ApprovalService::is_self_approval(requester, PersonId::new()));
    }

    #[tokio::test]
    async fn test_pending_count_gates_group_work_on_default_permission() {
        let ctx = create_test_context();
        let approver = seed_person(&ctx, "ada").await;
        let member = seed_person(&ctx, "bob").await;
        ctx.registry
            .register(Arc::new(RoutedModule {
                approver_id: approver.id,
            }))
            .await;

        let now = Utc::now();
        let approved_group = ctx
            .groups
            .insert(Group {
                id: GroupId::new(),
                group_key: "data-eng-group-20250101000000".to_string(),
                name: "data-eng".to_string(),
                description: "team".to_string(),
                status: GroupStatus::Approved,
                requester_id: member.id,
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
                membership_id: "bob-data-eng-membership-20250101000000".to_string(),
                group_id: approved_group.id,
                person_id: member.id,
                is_owner: false,
                status: MembershipStatus::Pending,
                requested_by_id: member.id,
                approver_id: None,
                reason: "joining".to_string(),
                decline_reason: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        // One pending group creation
        ctx.groups
            .insert(Group {
                id: GroupId::new(),
                group_key: "ml-eng-group-20250101000000".to_string(),
                name: "ml-eng".to_string(),
                description: "new team".to_string(),
                status: GroupStatus::Pending,
                requester_id: member.id,
                approver_id: None,
                decline_reason: None,
                needs_access_approve: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        // Without the default permission only the routed module counts
        assert_eq!(
            ctx.service.pending_approvals_count(&approver).await.unwrap(),
            3
        );
        assert_eq!(
            ctx.service.pending_approvals_count(&member).await.unwrap(),
            0
        );

        grant_permission(&ctx, &approver, DEFAULT_APPROVER_PERMISSION).await;
        assert_eq!(
            ctx.service.pending_approvals_count(&approver).await.unwrap(),
            5
        );
    }
}
