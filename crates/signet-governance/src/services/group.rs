//! Group lifecycle and membership engine.
//!
//! A group is itself an approvable request: it starts Pending, and on
//! approval every pending membership is approved with it. Memberships walk
//! their own four-state lifecycle. Group names are unique among live
//! (Pending or Approved) groups only; declined and deprecated names can be
//! reused.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{GroupId, MembershipId, PersonId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::types::{handle_timestamp, GroupAccessStatus, GroupStatus, MembershipStatus};

use super::approval::ALLOW_USER_OFFBOARD_PERMISSION;
use super::catalog::ListOptions;
use super::group_request::{
    GroupAccessRequest, GroupAccessRequestFilter, GroupAccessRequestStore,
    GROUP_REQUEST_ACTIVE_STATUSES,
};
use super::person::{Person, PersonStore};

// ============================================================================
// Domain Types
// ============================================================================

/// A self-service group of persons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier.
    pub id: GroupId,
    /// External handle, unique.
    pub group_key: String,
    /// Group name. Unique among live groups only.
    pub name: String,
    /// What the group is for.
    pub description: String,
    /// Lifecycle status.
    pub status: GroupStatus,
    /// Who asked for the group.
    pub requester_id: PersonId,
    /// Who approved or declined the creation.
    pub approver_id: Option<PersonId>,
    /// Why the creation was declined, if it was.
    pub decline_reason: Option<String>,
    /// Whether access requested through this group still needs approval.
    pub needs_access_approve: bool,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// Check if the candidate would be deciding their own group request.
    #[must_use]
    pub fn is_self_approval(&self, candidate: PersonId) -> bool {
        self.requester_id == candidate
    }
}

/// One person's membership in one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    /// Unique identifier.
    pub id: MembershipId,
    /// External handle, unique.
    pub membership_id: String,
    /// The group.
    pub group_id: GroupId,
    /// The member.
    pub person_id: PersonId,
    /// Whether the member owns the group.
    pub is_owner: bool,
    /// Lifecycle status.
    pub status: MembershipStatus,
    /// Who asked for the membership.
    pub requested_by_id: PersonId,
    /// Who approved or declined it.
    pub approver_id: Option<PersonId>,
    /// Why the membership was requested.
    pub reason: String,
    /// Why it was declined, if it was.
    pub decline_reason: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Check if the candidate would be approving their own membership.
    #[must_use]
    pub fn is_self_approval(&self, candidate: PersonId) -> bool {
        self.person_id == candidate
    }
}

/// Input for creating a group.
#[derive(Debug, Clone)]
pub struct CreateGroupInput {
    /// Group name.
    pub name: String,
    /// What the group is for.
    pub description: String,
    /// Whether access requested through this group still needs approval.
    pub needs_access_approve: bool,
    /// Why the group is needed. Copied onto the initial memberships.
    pub reason: String,
    /// Members to invite alongside the requester.
    pub initial_member_ids: Vec<PersonId>,
}

/// Filter options for listing groups.
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    /// Filter by lifecycle status.
    pub status: Option<GroupStatus>,
}

/// Filter options for listing memberships.
#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    /// Filter by group.
    pub group_id: Option<GroupId>,
    /// Filter by a set of groups.
    pub group_ids: Option<Vec<GroupId>>,
    /// Filter by member.
    pub person_id: Option<PersonId>,
    /// Filter by exact status.
    pub status: Option<MembershipStatus>,
    /// Filter by a set of statuses.
    pub statuses: Option<Vec<MembershipStatus>>,
    /// Filter by ownership flag.
    pub is_owner: Option<bool>,
}

/// A pending group creation with its invited members, ready for review.
#[derive(Debug, Clone)]
pub struct PendingGroupCreation {
    /// The group awaiting a decision.
    pub group: Group,
    /// Usernames of every invited member, comma separated.
    pub member_usernames: String,
}

// ============================================================================
// Store Traits
// ============================================================================

/// Trait for group storage backends.
#[async_trait::async_trait]
pub trait GroupStore: Send + Sync {
    /// Get a group by ID.
    async fn get(&self, id: GroupId) -> Result<Option<Group>>;

    /// Get a group by its external handle.
    async fn get_by_key(&self, group_key: &str) -> Result<Option<Group>>;

    /// Find the live (Pending or Approved) group with this name.
    async fn find_live_by_name(&self, name: &str) -> Result<Option<Group>>;

    /// Find the approved group with this name.
    async fn find_approved_by_name(&self, name: &str) -> Result<Option<Group>>;

    /// Insert a new group. A live duplicate name is a conflict.
    async fn insert(&self, group: Group) -> Result<Group>;

    /// Set the group's status, recording who decided and why.
    async fn set_status(
        &self,
        id: GroupId,
        status: GroupStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Group>>;

    /// Reset an approved group to Pending, clearing the approver.
    async fn unapprove(&self, id: GroupId) -> Result<Option<Group>>;

    /// List groups with filtering and pagination.
    async fn list(&self, filter: &GroupFilter, options: &ListOptions) -> Result<Vec<Group>>;
}

/// Trait for membership storage backends.
#[async_trait::async_trait]
pub trait MembershipStore: Send + Sync {
    /// Get a membership by ID.
    async fn get(&self, id: MembershipId) -> Result<Option<Membership>>;

    /// Get a membership by its external handle.
    async fn get_by_handle(&self, membership_id: &str) -> Result<Option<Membership>>;

    /// Find the live (Pending or Approved) membership of a person in a group.
    async fn find_live(&self, group_id: GroupId, person_id: PersonId)
        -> Result<Option<Membership>>;

    /// Insert a new membership. A live duplicate is a conflict.
    async fn insert(&self, membership: Membership) -> Result<Membership>;

    /// Set a membership's status, recording who decided and why.
    async fn set_status(
        &self,
        id: MembershipId,
        status: MembershipStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Membership>>;

    /// Reset an approved membership to Pending, clearing the approver.
    async fn unapprove(&self, id: MembershipId) -> Result<Option<Membership>>;

    /// List memberships with filtering and pagination.
    async fn list(
        &self,
        filter: &MembershipFilter,
        options: &ListOptions,
    ) -> Result<Vec<Membership>>;

    /// Count memberships matching a filter.
    async fn count(&self, filter: &MembershipFilter) -> Result<i64>;

    /// Approve every pending membership of a group in one sweep.
    async fn approve_all_pending_for_group(
        &self,
        group_id: GroupId,
        approver_id: PersonId,
    ) -> Result<u64>;

    /// Decline every pending membership of a group in one sweep.
    async fn decline_all_pending_for_group(&self, group_id: GroupId, reason: &str) -> Result<u64>;

    /// Revoke every live membership of a person in one sweep.
    async fn revoke_all_for_person(&self, person_id: PersonId) -> Result<u64>;

    /// Reset every approved membership of a group to Pending in one sweep.
    async fn unapprove_all_for_group(&self, group_id: GroupId) -> Result<u64>;
}

// ============================================================================
// In-Memory Stores (for testing)
// ============================================================================

/// In-memory group store for testing.
#[derive(Debug, Default)]
pub struct InMemoryGroupStore {
    groups: Arc<RwLock<HashMap<GroupId, Group>>>,
}

impl InMemoryGroupStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.groups.write().await.clear();
    }
}

#[async_trait::async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn get(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn get_by_key(&self, group_key: &str) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups.values().find(|g| g.group_key == group_key).cloned())
    }

    async fn find_live_by_name(&self, name: &str) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .find(|g| g.name == name && g.status.is_live())
            .cloned())
    }

    async fn find_approved_by_name(&self, name: &str) -> Result<Option<Group>> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .find(|g| g.name == name && g.status == GroupStatus::Approved)
            .cloned())
    }

    async fn insert(&self, group: Group) -> Result<Group> {
        let mut groups = self.groups.write().await;
        if group.status.is_live()
            && groups
                .values()
                .any(|g| g.name == group.name && g.status.is_live())
        {
            return Err(GovernanceError::GroupNameExists(group.name));
        }
        groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn set_status(
        &self,
        id: GroupId,
        status: GroupStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Group>> {
        let mut groups = self.groups.write().await;

        if let Some(group) = groups.get_mut(&id) {
            group.status = status;
            if let Some(approver_id) = approver_id {
                group.approver_id = Some(approver_id);
            }
            if let Some(reason) = decline_reason {
                group.decline_reason = Some(reason);
            }
            group.updated_at = Utc::now();
            Ok(Some(group.clone()))
        } else {
            Ok(None)
        }
    }

    async fn unapprove(&self, id: GroupId) -> Result<Option<Group>> {
        let mut groups = self.groups.write().await;

        if let Some(group) = groups.get_mut(&id) {
            group.status = GroupStatus::Pending;
            group.approver_id = None;
            group.updated_at = Utc::now();
            Ok(Some(group.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list(&self, filter: &GroupFilter, options: &ListOptions) -> Result<Vec<Group>> {
        let groups = self.groups.read().await;

        let mut results: Vec<Group> = groups
            .values()
            .filter(|g| filter.status.is_none_or(|s| g.status == s))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.group_key.cmp(&b.group_key))
        });

        Ok(results
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }
}

fn membership_matches(membership: &Membership, filter: &MembershipFilter) -> bool {
    filter.group_id.is_none_or(|id| membership.group_id == id)
        && filter
            .group_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&membership.group_id))
        && filter.person_id.is_none_or(|id| membership.person_id == id)
        && filter.status.is_none_or(|s| membership.status == s)
        && filter
            .statuses
            .as_ref()
            .is_none_or(|set| set.contains(&membership.status))
        && filter.is_owner.is_none_or(|o| membership.is_owner == o)
}

/// In-memory membership store for testing.
#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    memberships: Arc<RwLock<HashMap<MembershipId, Membership>>>,
}

impl InMemoryMembershipStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.memberships.write().await.clear();
    }
}

#[async_trait::async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get(&self, id: MembershipId) -> Result<Option<Membership>> {
        Ok(self.memberships.read().await.get(&id).cloned())
    }

    async fn get_by_handle(&self, membership_id: &str) -> Result<Option<Membership>> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .values()
            .find(|m| m.membership_id == membership_id)
            .cloned())
    }

    async fn find_live(
        &self,
        group_id: GroupId,
        person_id: PersonId,
    ) -> Result<Option<Membership>> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .values()
            .find(|m| m.group_id == group_id && m.person_id == person_id && m.status.is_live())
            .cloned())
    }

    async fn insert(&self, membership: Membership) -> Result<Membership> {
        let mut memberships = self.memberships.write().await;
        if membership.status.is_live()
            && memberships.values().any(|m| {
                m.group_id == membership.group_id
                    && m.person_id == membership.person_id
                    && m.status.is_live()
            })
        {
            return Err(GovernanceError::MembershipExists);
        }
        memberships.insert(membership.id, membership.clone());
        Ok(membership)
    }

    async fn set_status(
        &self,
        id: MembershipId,
        status: MembershipStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Membership>> {
        let mut memberships = self.memberships.write().await;

        if let Some(membership) = memberships.get_mut(&id) {
            membership.status = status;
            if let Some(approver_id) = approver_id {
                membership.approver_id = Some(approver_id);
            }
            if let Some(reason) = decline_reason {
                membership.decline_reason = Some(reason);
            }
            membership.updated_at = Utc::now();
            Ok(Some(membership.clone()))
        } else {
            Ok(None)
        }
    }

    async fn unapprove(&self, id: MembershipId) -> Result<Option<Membership>> {
        let mut memberships = self.memberships.write().await;

        if let Some(membership) = memberships.get_mut(&id) {
            membership.status = MembershipStatus::Pending;
            membership.approver_id = None;
            membership.updated_at = Utc::now();
            Ok(Some(membership.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list(
        &self,
        filter: &MembershipFilter,
        options: &ListOptions,
    ) -> Result<Vec<Membership>> {
        let memberships = self.memberships.read().await;

        let mut results: Vec<Membership> = memberships
            .values()
            .filter(|m| membership_matches(m, filter))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.membership_id.cmp(&b.membership_id))
        });

        Ok(results
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &MembershipFilter) -> Result<i64> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .values()
            .filter(|m| membership_matches(m, filter))
            .count() as i64)
    }

    async fn approve_all_pending_for_group(
        &self,
        group_id: GroupId,
        approver_id: PersonId,
    ) -> Result<u64> {
        let mut memberships = self.memberships.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for membership in memberships.values_mut() {
            if membership.group_id == group_id && membership.status == MembershipStatus::Pending {
                membership.status = MembershipStatus::Approved;
                membership.approver_id = Some(approver_id);
                membership.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn decline_all_pending_for_group(&self, group_id: GroupId, reason: &str) -> Result<u64> {
        let mut memberships = self.memberships.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for membership in memberships.values_mut() {
            if membership.group_id == group_id && membership.status == MembershipStatus::Pending {
                membership.status = MembershipStatus::Declined;
                membership.decline_reason = Some(reason.to_string());
                membership.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn revoke_all_for_person(&self, person_id: PersonId) -> Result<u64> {
        let mut memberships = self.memberships.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for membership in memberships.values_mut() {
            if membership.person_id == person_id && membership.status.is_live() {
                membership.status = MembershipStatus::Revoked;
                membership.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn unapprove_all_for_group(&self, group_id: GroupId) -> Result<u64> {
        let mut memberships = self.memberships.write().await;
        let now = Utc::now();
        let mut changed = 0;

        for membership in memberships.values_mut() {
            if membership.group_id == group_id && membership.status == MembershipStatus::Approved {
                membership.status = MembershipStatus::Pending;
                membership.approver_id = None;
                membership.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for group lifecycle and memberships.
pub struct GroupService {
    groups: Arc<dyn GroupStore>,
    memberships: Arc<dyn MembershipStore>,
    group_requests: Arc<dyn GroupAccessRequestStore>,
    persons: Arc<dyn PersonStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl GroupService {
    /// Create a new group service.
    pub fn new(
        groups: Arc<dyn GroupStore>,
        memberships: Arc<dyn MembershipStore>,
        group_requests: Arc<dyn GroupAccessRequestStore>,
        persons: Arc<dyn PersonStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            groups,
            memberships,
            group_requests,
            persons,
            audit_store,
        }
    }

    async fn require_group(&self, group_id: GroupId) -> Result<Group> {
        self.groups
            .get(group_id)
            .await?
            .ok_or(GovernanceError::GroupNotFound(group_id))
    }

    async fn require_membership(&self, membership_id: &str) -> Result<Membership> {
        self.memberships
            .get_by_handle(membership_id)
            .await?
            .ok_or_else(|| GovernanceError::MembershipNotFound(membership_id.to_string()))
    }

    async fn require_person(&self, person_id: PersonId) -> Result<Person> {
        self.persons
            .get(person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))
    }

    /// Request a new group.
    ///
    /// The requester becomes a pending owner membership; invited members
    /// get pending rows. Everything lands Approved together when the group
    /// creation is approved.
    pub async fn create_group(
        &self,
        requester_id: PersonId,
        input: CreateGroupInput,
    ) -> Result<Group> {
        if self.groups.find_live_by_name(&input.name).await?.is_some() {
            return Err(GovernanceError::GroupNameExists(input.name));
        }

        let requester = self.require_person(requester_id).await?;

        let now = Utc::now();
        let stamp = handle_timestamp(now);
        let group = Group {
            id: GroupId::new(),
            group_key: format!("{}-group-{}", input.name, stamp),
            name: input.name,
            description: input.description,
            status: GroupStatus::Pending,
            requester_id: requester.id,
            approver_id: None,
            decline_reason: None,
            needs_access_approve: input.needs_access_approve,
            created_at: now,
            updated_at: now,
        };
        let group = self.groups.insert(group).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::GroupCreated,
                actor_id: Some(requester.id),
                person_id: Some(requester.id),
                group_id: Some(group.id),
                after_state: Some(serde_json::to_value(&group).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        self.insert_membership(&group, &requester, true, requester.id, &input.reason)
            .await?;
        for member_id in input.initial_member_ids {
            if member_id == requester.id {
                continue;
            }
            let member = self.require_person(member_id).await?;
            if self
                .memberships
                .find_live(group.id, member.id)
                .await?
                .is_some()
            {
                continue;
            }
            self.insert_membership(&group, &member, false, requester.id, &input.reason)
                .await?;
        }

        Ok(group)
    }

    async fn insert_membership(
        &self,
        group: &Group,
        person: &Person,
        is_owner: bool,
        requested_by_id: PersonId,
        reason: &str,
    ) -> Result<Membership> {
        let now = Utc::now();
        let membership = Membership {
            id: MembershipId::new(),
            membership_id: format!(
                "{}-{}-membership-{}",
                person.username,
                group.name,
                handle_timestamp(now)
            ),
            group_id: group.id,
            person_id: person.id,
            is_owner,
            status: MembershipStatus::Pending,
            requested_by_id,
            approver_id: None,
            reason: reason.to_string(),
            decline_reason: None,
            created_at: now,
            updated_at: now,
        };
        let membership = self.memberships.insert(membership).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::MembershipRequested,
                actor_id: Some(requested_by_id),
                person_id: Some(person.id),
                group_id: Some(group.id),
                membership_id: Some(membership.id),
                after_state: Some(serde_json::to_value(&membership).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(membership)
    }

    /// Approve a pending group, approving its pending memberships with it.
    pub async fn approve_group(&self, group_id: GroupId, approver_id: PersonId) -> Result<Group> {
        let group = self.require_group(group_id).await?;

        if group.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(group.status.to_string()));
        }
        if group.is_self_approval(approver_id) {
            return Err(GovernanceError::SelfApprovalNotAllowed);
        }
        if group.status != GroupStatus::Pending {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "approve a group",
            });
        }

        let approved = self
            .groups
            .set_status(group.id, GroupStatus::Approved, Some(approver_id), None)
            .await?
            .ok_or(GovernanceError::GroupNotFound(group.id))?;
        let members_approved = self
            .memberships
            .approve_all_pending_for_group(group.id, approver_id)
            .await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::GroupApproved,
                actor_id: Some(approver_id),
                group_id: Some(group.id),
                before_state: Some(serde_json::to_value(&group).unwrap_or_default()),
                after_state: Some(serde_json::to_value(&approved).unwrap_or_default()),
                metadata: Some(serde_json::json!({"members_approved": members_approved})),
                ..Default::default()
            })
            .await?;

        Ok(approved)
    }

    /// Decline a pending group, declining its pending memberships with it.
    pub async fn decline_group(
        &self,
        group_id: GroupId,
        reason: &str,
        decliner_id: PersonId,
    ) -> Result<Group> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::DeclineReasonRequired);
        }

        let group = self.require_group(group_id).await?;

        if group.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(group.status.to_string()));
        }
        if group.status != GroupStatus::Pending {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "decline a group",
            });
        }

        let declined = self
            .groups
            .set_status(
                group.id,
                GroupStatus::Declined,
                Some(decliner_id),
                Some(reason.to_string()),
            )
            .await?
            .ok_or(GovernanceError::GroupNotFound(group.id))?;
        self.memberships
            .decline_all_pending_for_group(group.id, reason)
            .await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::GroupDeclined,
                actor_id: Some(decliner_id),
                group_id: Some(group.id),
                before_state: Some(serde_json::to_value(&group).unwrap_or_default()),
                after_state: Some(serde_json::to_value(&declined).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(declined)
    }

    /// Retire an approved group.
    ///
    /// Its name becomes reusable and its live group access requests are
    /// marked Inactive. Memberships are kept for history.
    pub async fn deprecate_group(&self, group_id: GroupId, actor_id: PersonId) -> Result<Group> {
        let group = self.require_group(group_id).await?;

        if group.status != GroupStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "deprecate a group",
            });
        }

        let deprecated = self
            .groups
            .set_status(group.id, GroupStatus::Deprecated, None, None)
            .await?
            .ok_or(GovernanceError::GroupNotFound(group.id))?;
        let requests_inactivated = self
            .group_requests
            .bulk_update_status(
                &GroupAccessRequestFilter {
                    group_id: Some(group.id),
                    statuses: Some(vec![
                        GroupAccessStatus::Pending,
                        GroupAccessStatus::SecondaryPending,
                        GroupAccessStatus::Approved,
                    ]),
                    ..Default::default()
                },
                GroupAccessStatus::Inactive,
            )
            .await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::GroupDeprecated,
                actor_id: Some(actor_id),
                group_id: Some(group.id),
                before_state: Some(serde_json::to_value(&group).unwrap_or_default()),
                after_state: Some(serde_json::to_value(&deprecated).unwrap_or_default()),
                metadata: Some(serde_json::json!({
                    "requests_inactivated": requests_inactivated,
                })),
                ..Default::default()
            })
            .await?;

        Ok(deprecated)
    }

    /// Send an approved group back to Pending, resetting its approved
    /// memberships with it.
    pub async fn unapprove_group(&self, group_id: GroupId, actor_id: PersonId) -> Result<Group> {
        let group = self.require_group(group_id).await?;

        if group.status != GroupStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "unapprove a group",
            });
        }

        let reset = self
            .groups
            .unapprove(group.id)
            .await?
            .ok_or(GovernanceError::GroupNotFound(group.id))?;
        self.memberships.unapprove_all_for_group(group.id).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::GroupUnapproved,
                actor_id: Some(actor_id),
                group_id: Some(group.id),
                before_state: Some(serde_json::to_value(&group).unwrap_or_default()),
                after_state: Some(serde_json::to_value(&reset).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(reset)
    }

    /// Ask for a person to join a group.
    pub async fn add_member(
        &self,
        group_id: GroupId,
        person_id: PersonId,
        is_owner: bool,
        requested_by_id: PersonId,
        reason: &str,
    ) -> Result<Membership> {
        let group = self.require_group(group_id).await?;

        if !group.status.is_live() {
            return Err(GovernanceError::InvalidTransition {
                status: group.status.to_string(),
                action: "add a member",
            });
        }
        if self
            .memberships
            .find_live(group.id, person_id)
            .await?
            .is_some()
        {
            return Err(GovernanceError::MembershipExists);
        }

        let person = self.require_person(person_id).await?;
        self.insert_membership(&group, &person, is_owner, requested_by_id, reason)
            .await
    }

    /// Ask for several persons to join a group.
    ///
    /// Persons who already hold a live membership are skipped quietly;
    /// the new memberships are returned.
    pub async fn add_members(
        &self,
        group_id: GroupId,
        person_ids: &[PersonId],
        requested_by_id: PersonId,
        reason: &str,
    ) -> Result<Vec<Membership>> {
        let mut created = Vec::new();
        for person_id in person_ids {
            match self
                .add_member(group_id, *person_id, false, requested_by_id, reason)
                .await
            {
                Ok(membership) => created.push(membership),
                Err(GovernanceError::MembershipExists) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(created)
    }

    /// Approve a pending membership.
    pub async fn approve_membership(
        &self,
        membership_id: &str,
        approver_id: PersonId,
    ) -> Result<Membership> {
        let membership = self.require_membership(membership_id).await?;

        if membership.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(
                membership.status.to_string(),
            ));
        }
        if membership.is_self_approval(approver_id) {
            return Err(GovernanceError::SelfApprovalNotAllowed);
        }

        let approved = self
            .memberships
            .set_status(
                membership.id,
                MembershipStatus::Approved,
                Some(approver_id),
                None,
            )
            .await?
            .ok_or_else(|| GovernanceError::MembershipNotFound(membership_id.to_string()))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::MembershipApproved,
                actor_id: Some(approver_id),
                person_id: Some(approved.person_id),
                group_id: Some(approved.group_id),
                membership_id: Some(approved.id),
                after_state: Some(serde_json::to_value(&approved).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(approved)
    }

    /// Decline a pending membership. A reason is mandatory.
    pub async fn decline_membership(
        &self,
        membership_id: &str,
        reason: &str,
        decliner_id: PersonId,
    ) -> Result<Membership> {
        if reason.trim().is_empty() {
            return Err(GovernanceError::DeclineReasonRequired);
        }

        let membership = self.require_membership(membership_id).await?;

        if membership.status.is_already_processed() {
            return Err(GovernanceError::AlreadyProcessed(
                membership.status.to_string(),
            ));
        }

        let declined = self
            .memberships
            .set_status(
                membership.id,
                MembershipStatus::Declined,
                Some(decliner_id),
                Some(reason.to_string()),
            )
            .await?
            .ok_or_else(|| GovernanceError::MembershipNotFound(membership_id.to_string()))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::MembershipDeclined,
                actor_id: Some(decliner_id),
                person_id: Some(declined.person_id),
                group_id: Some(declined.group_id),
                membership_id: Some(declined.id),
                after_state: Some(serde_json::to_value(&declined).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(declined)
    }

    /// Remove an approved member from a group.
    ///
    /// Removing the last approved owner is allowed but leaves the group
    /// ownerless; that is logged loudly instead of refused.
    pub async fn revoke_membership(
        &self,
        membership_id: &str,
        revoker_id: PersonId,
    ) -> Result<Membership> {
        let membership = self.require_membership(membership_id).await?;

        match membership.status {
            MembershipStatus::Approved => {}
            MembershipStatus::Declined | MembershipStatus::Revoked => {
                return Err(GovernanceError::AlreadyProcessed(
                    membership.status.to_string(),
                ));
            }
            MembershipStatus::Pending => {
                return Err(GovernanceError::InvalidTransition {
                    status: membership.status.to_string(),
                    action: "revoke a pending membership",
                });
            }
        }

        let revoked = self
            .memberships
            .set_status(membership.id, MembershipStatus::Revoked, None, None)
            .await?
            .ok_or_else(|| GovernanceError::MembershipNotFound(membership_id.to_string()))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::MembershipRevoked,
                actor_id: Some(revoker_id),
                person_id: Some(revoked.person_id),
                group_id: Some(revoked.group_id),
                membership_id: Some(revoked.id),
                after_state: Some(serde_json::to_value(&revoked).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        if membership.is_owner {
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
                    membership_id = %membership.membership_id,
                    "group has no approved owner left"
                );
                self.audit_store
                    .log_event(GovernanceAuditEventInput {
                        action: GovernanceAuditAction::GroupOwnerless,
                        actor_id: Some(revoker_id),
                        group_id: Some(membership.group_id),
                        membership_id: Some(membership.id),
                        ..Default::default()
                    })
                    .await?;
            }
        }

        Ok(revoked)
    }

    /// Send an approved membership back to Pending, clearing its approver.
    pub async fn unapprove_membership(
        &self,
        membership_id: &str,
        actor_id: PersonId,
    ) -> Result<Membership> {
        let membership = self.require_membership(membership_id).await?;

        if membership.status != MembershipStatus::Approved {
            return Err(GovernanceError::InvalidTransition {
                status: membership.status.to_string(),
                action: "unapprove a membership",
            });
        }

        let reset = self
            .memberships
            .unapprove(membership.id)
            .await?
            .ok_or_else(|| GovernanceError::MembershipNotFound(membership_id.to_string()))?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::MembershipUnapproved,
                actor_id: Some(actor_id),
                person_id: Some(reset.person_id),
                group_id: Some(reset.group_id),
                membership_id: Some(reset.id),
                after_state: Some(serde_json::to_value(&reset).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(reset)
    }

    /// Approve every pending membership of a group.
    pub async fn approve_all_pending(
        &self,
        group_id: GroupId,
        approver_id: PersonId,
    ) -> Result<u64> {
        self.memberships
            .approve_all_pending_for_group(group_id, approver_id)
            .await
    }

    /// Revoke every live membership of a person.
    pub async fn revoke_all_for_person(&self, person_id: PersonId) -> Result<u64> {
        self.memberships.revoke_all_for_person(person_id).await
    }

    /// Decline every pending membership of a group.
    pub async fn decline_all_for_group(&self, group_id: GroupId, reason: &str) -> Result<u64> {
        self.memberships
            .decline_all_pending_for_group(group_id, reason)
            .await
    }

    /// Get a group by ID.
    pub async fn get_group(&self, group_id: GroupId) -> Result<Option<Group>> {
        self.groups.get(group_id).await
    }

    /// Find a group by its external handle.
    pub async fn find_group_by_key(&self, group_key: &str) -> Result<Option<Group>> {
        self.groups.get_by_key(group_key).await
    }

    /// Check if a live group already uses this name.
    pub async fn group_exists(&self, name: &str) -> Result<bool> {
        Ok(self.groups.find_live_by_name(name).await?.is_some())
    }

    /// Find a pending group by handle.
    pub async fn pending_group_by_key(&self, group_key: &str) -> Result<Option<Group>> {
        let group = self.groups.get_by_key(group_key).await?;
        Ok(group.filter(|g| g.status == GroupStatus::Pending))
    }

    /// Find an approved group by handle.
    pub async fn approved_group_by_key(&self, group_key: &str) -> Result<Option<Group>> {
        let group = self.groups.get_by_key(group_key).await?;
        Ok(group.filter(|g| g.status == GroupStatus::Approved))
    }

    /// Find an approved group by name.
    pub async fn approved_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        self.groups.find_approved_by_name(name).await
    }

    /// Pending group creations with their invited member lists.
    pub async fn pending_creations(&self) -> Result<Vec<PendingGroupCreation>> {
        let pending = self
            .groups
            .list(
                &GroupFilter {
                    status: Some(GroupStatus::Pending),
                },
                &unbounded(),
            )
            .await?;

        let mut creations = Vec::with_capacity(pending.len());
        for group in pending {
            let members = self
                .memberships
                .list(
                    &MembershipFilter {
                        group_id: Some(group.id),
                        ..Default::default()
                    },
                    &unbounded(),
                )
                .await?;

            let mut usernames = Vec::with_capacity(members.len());
            for membership in &members {
                if let Some(person) = self.persons.get(membership.person_id).await? {
                    usernames.push(person.username);
                }
            }

            creations.push(PendingGroupCreation {
                group,
                member_usernames: usernames.join(", "),
            });
        }
        Ok(creations)
    }

    /// Approved groups the person owns. Administrators and the operations
    /// team see every approved group.
    pub async fn owned_groups(&self, person: &Person) -> Result<Vec<Group>> {
        let approved = self
            .groups
            .list(
                &GroupFilter {
                    status: Some(GroupStatus::Approved),
                },
                &unbounded(),
            )
            .await?;

        if person.is_admin_or_ops() {
            return Ok(approved);
        }

        let owner_rows = self
            .memberships
            .list(
                &MembershipFilter {
                    person_id: Some(person.id),
                    is_owner: Some(true),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await?;
        let owned_ids: Vec<GroupId> = owner_rows.iter().map(|m| m.group_id).collect();

        Ok(approved
            .into_iter()
            .filter(|g| owned_ids.contains(&g.id))
            .collect())
    }

    /// Every membership of a group.
    pub async fn members_of_group(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        self.memberships
            .list(
                &MembershipFilter {
                    group_id: Some(group_id),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Approved memberships of a group.
    pub async fn approved_members(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        self.memberships
            .list(
                &MembershipFilter {
                    group_id: Some(group_id),
                    status: Some(MembershipStatus::Approved),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Emails of every approved or invited member of a group.
    pub async fn member_emails(&self, group_id: GroupId) -> Result<Vec<String>> {
        let members = self
            .memberships
            .list(
                &MembershipFilter {
                    group_id: Some(group_id),
                    statuses: Some(vec![
                        MembershipStatus::Approved,
                        MembershipStatus::Pending,
                    ]),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await?;

        let mut emails = Vec::with_capacity(members.len());
        for membership in &members {
            if let Some(person) = self.persons.get(membership.person_id).await? {
                emails.push(person.email);
            }
        }
        Ok(emails)
    }

    /// Pending memberships in approved groups, waiting for a decision.
    pub async fn pending_memberships(&self) -> Result<Vec<Membership>> {
        let approved = self
            .groups
            .list(
                &GroupFilter {
                    status: Some(GroupStatus::Approved),
                },
                &unbounded(),
            )
            .await?;
        let group_ids: Vec<GroupId> = approved.iter().map(|g| g.id).collect();

        self.memberships
            .list(
                &MembershipFilter {
                    group_ids: Some(group_ids),
                    status: Some(MembershipStatus::Pending),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Check if the person holds an owner membership in the group. The
    /// membership's status is deliberately not consulted.
    pub async fn member_is_owner(&self, group_id: GroupId, person_id: PersonId) -> Result<bool> {
        let count = self
            .memberships
            .count(&MembershipFilter {
                group_id: Some(group_id),
                person_id: Some(person_id),
                is_owner: Some(true),
                ..Default::default()
            })
            .await?;
        Ok(count > 0)
    }

    /// Check ownership by email.
    pub async fn is_owner_by_email(&self, group_id: GroupId, email: &str) -> Result<bool> {
        match self.persons.get_by_email(email).await? {
            Some(person) => self.member_is_owner(group_id, person.id).await,
            None => Ok(false),
        }
    }

    /// Approved memberships of a person.
    pub async fn approved_memberships_for_person(
        &self,
        person_id: PersonId,
    ) -> Result<Vec<Membership>> {
        self.memberships
            .list(
                &MembershipFilter {
                    person_id: Some(person_id),
                    status: Some(MembershipStatus::Approved),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Check if a person may administer the group: owners, administrators,
    /// and the operations team.
    pub async fn is_allowed_admin_actions_on_group(
        &self,
        person: &Person,
        group_id: GroupId,
    ) -> Result<bool> {
        if person.is_admin_or_ops() {
            return Ok(true);
        }
        self.member_is_owner(group_id, person.id).await
    }

    /// Check if a person may remove members from the group: owners and
    /// holders of the offboarding permission.
    pub async fn is_allowed_to_offboard_from_group(
        &self,
        person: &Person,
        group_id: GroupId,
    ) -> Result<bool> {
        if self.member_is_owner(group_id, person.id).await? {
            return Ok(true);
        }
        let labels = self.persons.permission_labels(person.id).await?;
        Ok(labels.iter().any(|l| l == ALLOW_USER_OFFBOARD_PERMISSION))
    }

    /// Group access requests still relevant to the group's approvers.
    pub async fn active_accesses(&self, group_id: GroupId) -> Result<Vec<GroupAccessRequest>> {
        self.group_requests
            .list(
                &GroupAccessRequestFilter {
                    group_id: Some(group_id),
                    statuses: Some(GROUP_REQUEST_ACTIVE_STATUSES.to_vec()),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
    }

    /// Approved group access requests of a group.
    pub async fn approved_accesses(&self, group_id: GroupId) -> Result<Vec<GroupAccessRequest>> {
        self.group_requests
            .list(
                &GroupAccessRequestFilter {
                    group_id: Some(group_id),
                    status: Some(GroupAccessStatus::Approved),
                    ..Default::default()
                },
                &unbounded(),
            )
            .await
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
