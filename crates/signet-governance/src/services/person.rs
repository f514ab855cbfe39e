//! Person directory with role-based permission resolution.
//!
//! Persons are created through [`PersonService::ensure_person`], an explicit
//! factory the account-provisioning boundary calls. Permissions are never
//! attached to a person directly; they flow through roles.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{PermissionId, PersonId, RoleId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::{GovernanceError, Result};
use crate::types::PersonState;

use super::catalog::ListOptions;

// ============================================================================
// Domain Types
// ============================================================================

/// A person known to the governance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Unique identifier.
    pub id: PersonId,
    /// Login handle, unique.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Primary email, unique.
    pub email: String,
    /// Lifecycle state.
    pub state: PersonState,
    /// Whether the person belongs to the operations team.
    pub is_ops: bool,
    /// Whether the person is a platform administrator.
    pub is_admin: bool,
    /// Whether the person can still sign in.
    pub login_enabled: bool,
    /// Avatar URL, if any.
    pub avatar: Option<String>,
    /// When offboarding started.
    pub offboard_date: Option<DateTime<Utc>>,
    /// Who initiated the offboarding.
    pub revoker_id: Option<PersonId>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// Check if the person is an administrator or on the operations team.
    #[must_use]
    pub fn is_admin_or_ops(&self) -> bool {
        self.is_ops || self.is_admin
    }

    /// Check if the person may still initiate requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// A named permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Unique identifier.
    pub id: PermissionId,
    /// Permission label, unique.
    pub label: String,
}

/// A role bundling permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Unique identifier.
    pub id: RoleId,
    /// Role label, unique.
    pub label: String,
    /// Permissions this role grants.
    pub permission_ids: Vec<PermissionId>,
}

/// Input for [`PersonService::ensure_person`].
#[derive(Debug, Clone)]
pub struct EnsurePersonInput {
    /// Login handle.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Primary email.
    pub email: String,
}

/// Input for updating a person.
#[derive(Debug, Clone, Default)]
pub struct UpdatePersonInput {
    /// New display name.
    pub name: Option<String>,
    /// New email.
    pub email: Option<String>,
    /// New lifecycle state.
    pub state: Option<PersonState>,
    /// New sign-in flag.
    pub login_enabled: Option<bool>,
    /// Offboarding start time.
    pub offboard_date: Option<DateTime<Utc>>,
    /// Offboarding initiator.
    pub revoker_id: Option<PersonId>,
}

/// Filter options for listing persons.
#[derive(Debug, Clone, Default)]
pub struct PersonFilter {
    /// Filter by lifecycle state.
    pub state: Option<PersonState>,
    /// Filter by operations-team flag.
    pub is_ops: Option<bool>,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for person storage backends.
#[async_trait::async_trait]
pub trait PersonStore: Send + Sync {
    /// Get a person by ID.
    async fn get(&self, id: PersonId) -> Result<Option<Person>>;

    /// Get a person by username (exact match).
    async fn get_by_username(&self, username: &str) -> Result<Option<Person>>;

    /// Get a person by email (exact match).
    async fn get_by_email(&self, email: &str) -> Result<Option<Person>>;

    /// Get every person whose email is in the given set.
    async fn get_by_emails(&self, emails: &[String]) -> Result<Vec<Person>>;

    /// Insert a new person.
    async fn insert(&self, person: Person) -> Result<Person>;

    /// Update a person.
    async fn update(&self, id: PersonId, input: UpdatePersonInput) -> Result<Option<Person>>;

    /// List persons with filtering and pagination.
    async fn list(&self, filter: &PersonFilter, options: &ListOptions) -> Result<Vec<Person>>;

    /// Create a permission.
    async fn create_permission(&self, label: &str) -> Result<Permission>;

    /// Create a role granting the given permissions.
    async fn create_role(&self, label: &str, permission_ids: Vec<PermissionId>) -> Result<Role>;

    /// Assign a role to a person.
    async fn assign_role(&self, person_id: PersonId, role_id: RoleId) -> Result<()>;

    /// Every permission label the person holds through roles.
    async fn permission_labels(&self, person_id: PersonId) -> Result<Vec<String>>;

    /// Active persons holding the given permission.
    async fn active_with_permission(&self, label: &str) -> Result<Vec<Person>>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory person store for testing.
#[derive(Debug, Default)]
pub struct InMemoryPersonStore {
    persons: Arc<RwLock<HashMap<PersonId, Person>>>,
    permissions: Arc<RwLock<HashMap<PermissionId, Permission>>>,
    roles: Arc<RwLock<HashMap<RoleId, Role>>>,
    person_roles: Arc<RwLock<HashMap<PersonId, Vec<RoleId>>>>,
}

impl InMemoryPersonStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.persons.write().await.clear();
        self.permissions.write().await.clear();
        self.roles.write().await.clear();
        self.person_roles.write().await.clear();
    }

    async fn labels_of(&self, person_id: PersonId) -> Vec<String> {
        let person_roles = self.person_roles.read().await;
        let roles = self.roles.read().await;
        let permissions = self.permissions.read().await;

        let mut labels: Vec<String> = person_roles
            .get(&person_id)
            .into_iter()
            .flatten()
            .filter_map(|role_id| roles.get(role_id))
            .flat_map(|role| role.permission_ids.iter())
            .filter_map(|permission_id| permissions.get(permission_id))
            .map(|permission| permission.label.clone())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}

#[async_trait::async_trait]
impl PersonStore for InMemoryPersonStore {
    async fn get(&self, id: PersonId) -> Result<Option<Person>> {
        Ok(self.persons.read().await.get(&id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Person>> {
        let persons = self.persons.read().await;
        Ok(persons.values().find(|p| p.username == username).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Person>> {
        let persons = self.persons.read().await;
        Ok(persons.values().find(|p| p.email == email).cloned())
    }

    async fn get_by_emails(&self, emails: &[String]) -> Result<Vec<Person>> {
        let persons = self.persons.read().await;
        let mut results: Vec<Person> = persons
            .values()
            .filter(|p| emails.contains(&p.email))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(results)
    }

    async fn insert(&self, person: Person) -> Result<Person> {
        let mut persons = self.persons.write().await;
        persons.insert(person.id, person.clone());
        Ok(person)
    }

    async fn update(&self, id: PersonId, input: UpdatePersonInput) -> Result<Option<Person>> {
        let mut persons = self.persons.write().await;

        if let Some(person) = persons.get_mut(&id) {
            if let Some(name) = input.name {
                person.name = name;
            }
            if let Some(email) = input.email {
                person.email = email;
            }
            if let Some(state) = input.state {
                person.state = state;
            }
            if let Some(login_enabled) = input.login_enabled {
                person.login_enabled = login_enabled;
            }
            if let Some(offboard_date) = input.offboard_date {
                person.offboard_date = Some(offboard_date);
            }
            if let Some(revoker_id) = input.revoker_id {
                person.revoker_id = Some(revoker_id);
            }
            person.updated_at = Utc::now();

            Ok(Some(person.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list(&self, filter: &PersonFilter, options: &ListOptions) -> Result<Vec<Person>> {
        let persons = self.persons.read().await;

        let mut results: Vec<Person> = persons
            .values()
            .filter(|p| filter.state.is_none_or(|s| p.state == s))
            .filter(|p| filter.is_ops.is_none_or(|o| p.is_ops == o))
            .cloned()
            .collect();

        results.sort_by(|a, b| a.username.cmp(&b.username));

        Ok(results
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }

    async fn create_permission(&self, label: &str) -> Result<Permission> {
        let mut permissions = self.permissions.write().await;
        if let Some(existing) = permissions.values().find(|p| p.label == label) {
            return Ok(existing.clone());
        }
        let permission = Permission {
            id: PermissionId::new(),
            label: label.to_string(),
        };
        permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn create_role(&self, label: &str, permission_ids: Vec<PermissionId>) -> Result<Role> {
        let role = Role {
            id: RoleId::new(),
            label: label.to_string(),
            permission_ids,
        };
        self.roles.write().await.insert(role.id, role.clone());
        Ok(role)
    }

    async fn assign_role(&self, person_id: PersonId, role_id: RoleId) -> Result<()> {
        let mut person_roles = self.person_roles.write().await;
        let roles = person_roles.entry(person_id).or_default();
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
        Ok(())
    }

    async fn permission_labels(&self, person_id: PersonId) -> Result<Vec<String>> {
        Ok(self.labels_of(person_id).await)
    }

    async fn active_with_permission(&self, label: &str) -> Result<Vec<Person>> {
        let candidates: Vec<Person> = {
            let persons = self.persons.read().await;
            persons
                .values()
                .filter(|p| p.state == PersonState::Active)
                .cloned()
                .collect()
        };

        let mut results = Vec::new();
        for person in candidates {
            if self.labels_of(person.id).await.iter().any(|l| l == label) {
                results.push(person);
            }
        }
        results.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(results)
    }
}

// ============================================================================
// Service
// ============================================================================

fn state_rank(state: PersonState) -> u8 {
    match state {
        PersonState::Active => 0,
        PersonState::Offboarding => 1,
        PersonState::Offboarded => 2,
    }
}

/// Service for managing persons, roles, and permissions.
pub struct PersonService {
    store: Arc<dyn PersonStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl PersonService {
    /// Create a new person service.
    pub fn new(store: Arc<dyn PersonStore>, audit_store: Arc<dyn AuditStore>) -> Self {
        Self { store, audit_store }
    }

    /// Get or create the person for an account, refreshing name and email.
    ///
    /// Called explicitly at the account-provisioning boundary; there is no
    /// implicit on-signup hook.
    pub async fn ensure_person(&self, input: EnsurePersonInput) -> Result<Person> {
        if let Some(existing) = self.store.get_by_username(&input.username).await? {
            if existing.name == input.name && existing.email == input.email {
                return Ok(existing);
            }
            let refreshed = self
                .store
                .update(
                    existing.id,
                    UpdatePersonInput {
                        name: Some(input.name),
                        email: Some(input.email),
                        ..Default::default()
                    },
                )
                .await?
                .ok_or(GovernanceError::PersonNotFound(existing.id))?;
            return Ok(refreshed);
        }

        let now = Utc::now();
        let person = Person {
            id: PersonId::new(),
            username: input.username,
            name: input.name,
            email: input.email,
            state: PersonState::Active,
            is_ops: false,
            is_admin: false,
            login_enabled: true,
            avatar: None,
            offboard_date: None,
            revoker_id: None,
            created_at: now,
            updated_at: now,
        };
        let person = self.store.insert(person).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::PersonCreated,
                actor_id: Some(person.id),
                person_id: Some(person.id),
                after_state: Some(serde_json::to_value(&person).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(person)
    }

    /// Get a person by ID.
    pub async fn get(&self, id: PersonId) -> Result<Option<Person>> {
        self.store.get(id).await
    }

    /// Find a person by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<Person>> {
        self.store.get_by_username(username).await
    }

    /// Find a person by email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Person>> {
        self.store.get_by_email(email).await
    }

    /// Find every person whose email is in the given set.
    pub async fn find_by_emails(&self, emails: &[String]) -> Result<Vec<Person>> {
        self.store.get_by_emails(emails).await
    }

    /// List persons with filtering and pagination.
    pub async fn list(&self, filter: &PersonFilter, options: &ListOptions) -> Result<Vec<Person>> {
        self.store.list(filter, options).await
    }

    /// Every permission label the person holds through roles.
    pub async fn permissions(&self, person_id: PersonId) -> Result<Vec<String>> {
        self.store.permission_labels(person_id).await
    }

    /// Check if the person holds the given permission.
    pub async fn has_permission(&self, person_id: PersonId, label: &str) -> Result<bool> {
        let labels = self.store.permission_labels(person_id).await?;
        Ok(labels.iter().any(|l| l == label))
    }

    /// Check if the person holds any of the given permissions.
    pub async fn has_any_permission(&self, person_id: PersonId, labels: &[&str]) -> Result<bool> {
        let held = self.store.permission_labels(person_id).await?;
        Ok(held.iter().any(|l| labels.contains(&l.as_str())))
    }

    /// Active persons holding the given permission.
    pub async fn active_with_permission(&self, label: &str) -> Result<Vec<Person>> {
        self.store.active_with_permission(label).await
    }

    /// Move a person to a later lifecycle state.
    ///
    /// States only move forward (Active, Offboarding, Offboarded). Writing
    /// the current state again is a no-op; moving backwards is refused.
    pub async fn change_state(&self, person_id: PersonId, state: PersonState) -> Result<Person> {
        let person = self
            .store
            .get(person_id)
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))?;

        if state_rank(state) < state_rank(person.state) {
            return Err(GovernanceError::InvalidTransition {
                status: person.state.to_string(),
                action: "move back to an earlier person state",
            });
        }
        if person.state == state {
            return Ok(person);
        }

        self.store
            .update(
                person_id,
                UpdatePersonInput {
                    state: Some(state),
                    ..Default::default()
                },
            )
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))
    }

    /// Record who is revoking this person's access.
    pub async fn update_revoker(&self, person_id: PersonId, revoker_id: PersonId) -> Result<Person> {
        self.store
            .update(
                person_id,
                UpdatePersonInput {
                    revoker_id: Some(revoker_id),
                    ..Default::default()
                },
            )
            .await?
            .ok_or(GovernanceError::PersonNotFound(person_id))
    }

    /// Create a permission.
    pub async fn create_permission(&self, label: &str) -> Result<Permission> {
        self.store.create_permission(label).await
    }

    /// Create a role granting the given permissions.
    pub async fn create_role(
        &self,
        label: &str,
        permission_ids: Vec<PermissionId>,
    ) -> Result<Role> {
        self.store.create_role(label, permission_ids).await
    }

    /// Assign a role to a person.
    pub async fn assign_role(&self, person_id: PersonId, role_id: RoleId) -> Result<()> {
        self.store.assign_role(person_id, role_id).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditStore;

    fn create_test_service() -> (PersonService, Arc<InMemoryPersonStore>, Arc<InMemoryAuditStore>) {
        let person_store = Arc::new(InMemoryPersonStore::new());
        let audit_store = Arc::new(InMemoryAuditStore::new());
        let service = PersonService::new(person_store.clone(), audit_store.clone());
        (service, person_store, audit_store)
    }

    fn ada() -> EnsurePersonInput {
        EnsurePersonInput {
            username: "ada".to_string(),
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_person_creates_once() {
        let (service, _, audit) = create_test_service();

        let first = service.ensure_person(ada()).await.unwrap();
        let second = service.ensure_person(ada()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.state, PersonState::Active);
        assert!(first.login_enabled);
        assert_eq!(audit.count().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_person_refreshes_name_and_email() {
        let (service, _, _) = create_test_service();

        let first = service.ensure_person(ada()).await.unwrap();
        let refreshed = service
            .ensure_person(EnsurePersonInput {
                username: "ada".to_string(),
                name: "Ada King".to_string(),
                email: "ada.king@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.name, "Ada King");
        assert_eq!(refreshed.email, "ada.king@example.com");
    }

    #[tokio::test]
    async fn test_has_permission_through_roles() {
        let (service, _, _) = create_test_service();
        let person = service.ensure_person(ada()).await.unwrap();

        let read = service.create_permission("REPO_READ").await.unwrap();
        let write = service.create_permission("REPO_WRITE").await.unwrap();
        let role = service
            .create_role("developer", vec![read.id, write.id])
            .await
            .unwrap();
        service.assign_role(person.id, role.id).await.unwrap();

        assert!(service.has_permission(person.id, "REPO_READ").await.unwrap());
        assert!(service.has_permission(person.id, "REPO_WRITE").await.unwrap());
        assert!(!service.has_permission(person.id, "REPO_ADMIN").await.unwrap());
        assert!(service
            .has_any_permission(person.id, &["REPO_ADMIN", "REPO_READ"])
            .await
            .unwrap());
        assert!(!service
            .has_any_permission(person.id, &["REPO_ADMIN"])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_active_with_permission_skips_offboarding_persons() {
        let (service, _, _) = create_test_service();
        let ada = service.ensure_person(ada()).await.unwrap();
        let bob = service
            .ensure_person(EnsurePersonInput {
                username: "bob".to_string(),
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
            })
            .await
            .unwrap();

        let approve = service.create_permission("ACCESS_APPROVE").await.unwrap();
        let role = service.create_role("approver", vec![approve.id]).await.unwrap();
        service.assign_role(ada.id, role.id).await.unwrap();
        service.assign_role(bob.id, role.id).await.unwrap();

        service
            .change_state(bob.id, PersonState::Offboarding)
            .await
            .unwrap();

        let approvers = service.active_with_permission("ACCESS_APPROVE").await.unwrap();
        assert_eq!(approvers.len(), 1);
        assert_eq!(approvers[0].id, ada.id);
    }

    #[tokio::test]
    async fn test_change_state_is_forward_only() {
        let (service, _, _) = create_test_service();
        let person = service.ensure_person(ada()).await.unwrap();

        service
            .change_state(person.id, PersonState::Offboarding)
            .await
            .unwrap();

        let result = service.change_state(person.id, PersonState::Active).await;
        assert!(matches!(
            result,
            Err(GovernanceError::InvalidTransition { .. })
        ));

        // Re-writing the current state is a no-op
        let same = service
            .change_state(person.id, PersonState::Offboarding)
            .await
            .unwrap();
        assert_eq!(same.state, PersonState::Offboarding);
    }

    #[tokio::test]
    async fn test_find_by_emails() {
        let (service, _, _) = create_test_service();
        service.ensure_person(ada()).await.unwrap();
        service
            .ensure_person(EnsurePersonInput {
                username: "bob".to_string(),
                name: "Bob".to_string(),
                email: "bob@example.com".to_string(),
            })
            .await
            .unwrap();

        let found = service
            .find_by_emails(&["ada@example.com".to_string(), "nobody@example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "ada");
    }
}
