//! Entitlement catalog.
//!
//! An entitlement is one requestable unit of access inside an integration:
//! the integration's tag plus a JSON label describing the concrete resource.
//! Entitlements are immutable once created; requests reference them by id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::{EntitlementId, PersonId};

use crate::audit::{AuditStore, GovernanceAuditAction, GovernanceAuditEventInput};
use crate::error::Result;

// ============================================================================
// Domain Types
// ============================================================================

/// A requestable unit of access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    /// Unique identifier.
    pub id: EntitlementId,
    /// Tag of the integration this entitlement belongs to.
    pub access_tag: String,
    /// Integration-defined JSON label describing the resource.
    pub label: serde_json::Value,
    /// Whether requests for this entitlement skip human approval.
    pub is_auto_approved: bool,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an entitlement.
#[derive(Debug, Clone)]
pub struct CreateEntitlementInput {
    /// Integration tag.
    pub access_tag: String,
    /// JSON label.
    pub label: serde_json::Value,
    /// Whether requests skip human approval.
    pub is_auto_approved: bool,
}

/// Filter options for listing entitlements.
#[derive(Debug, Clone, Default)]
pub struct EntitlementFilter {
    /// Filter by integration tag.
    pub access_tag: Option<String>,
}

/// Pagination options for list operations.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for entitlement storage backends.
#[async_trait::async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Get an entitlement by ID.
    async fn get(&self, id: EntitlementId) -> Result<Option<Entitlement>>;

    /// Find the entitlement for a (tag, label) pair.
    async fn find_by_tag_and_label(
        &self,
        access_tag: &str,
        label: &serde_json::Value,
    ) -> Result<Option<Entitlement>>;

    /// Insert a new entitlement.
    async fn insert(&self, entitlement: Entitlement) -> Result<Entitlement>;

    /// List entitlements with filtering and pagination.
    async fn list(
        &self,
        filter: &EntitlementFilter,
        options: &ListOptions,
    ) -> Result<Vec<Entitlement>>;

    /// Count entitlements matching a filter.
    async fn count(&self, filter: &EntitlementFilter) -> Result<i64>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory entitlement store for testing.
#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    entitlements: Arc<RwLock<HashMap<EntitlementId, Entitlement>>>,
}

impl InMemoryEntitlementStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.entitlements.write().await.clear();
    }
}

#[async_trait::async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn get(&self, id: EntitlementId) -> Result<Option<Entitlement>> {
        Ok(self.entitlements.read().await.get(&id).cloned())
    }

    async fn find_by_tag_and_label(
        &self,
        access_tag: &str,
        label: &serde_json::Value,
    ) -> Result<Option<Entitlement>> {
        let entitlements = self.entitlements.read().await;
        Ok(entitlements
            .values()
            .find(|e| e.access_tag == access_tag && &e.label == label)
            .cloned())
    }

    async fn insert(&self, entitlement: Entitlement) -> Result<Entitlement> {
        let mut entitlements = self.entitlements.write().await;
        entitlements.insert(entitlement.id, entitlement.clone());
        Ok(entitlement)
    }

    async fn list(
        &self,
        filter: &EntitlementFilter,
        options: &ListOptions,
    ) -> Result<Vec<Entitlement>> {
        let entitlements = self.entitlements.read().await;

        let mut results: Vec<Entitlement> = entitlements
            .values()
            .filter(|e| {
                filter
                    .access_tag
                    .as_ref()
                    .is_none_or(|tag| &e.access_tag == tag)
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.access_tag
                .cmp(&b.access_tag)
                .then(a.created_at.cmp(&b.created_at))
        });

        Ok(results
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &EntitlementFilter) -> Result<i64> {
        let entitlements = self.entitlements.read().await;
        Ok(entitlements
            .values()
            .filter(|e| {
                filter
                    .access_tag
                    .as_ref()
                    .is_none_or(|tag| &e.access_tag == tag)
            })
            .count() as i64)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for managing the entitlement catalog.
pub struct CatalogService {
    store: Arc<dyn EntitlementStore>,
    audit_store: Arc<dyn AuditStore>,
}

impl CatalogService {
    /// Create a new catalog service.
    pub fn new(store: Arc<dyn EntitlementStore>, audit_store: Arc<dyn AuditStore>) -> Self {
        Self { store, audit_store }
    }

    /// Get or create the entitlement for a (tag, label) pair.
    pub async fn ensure(
        &self,
        actor_id: PersonId,
        input: CreateEntitlementInput,
    ) -> Result<Entitlement> {
        if let Some(existing) = self
            .store
            .find_by_tag_and_label(&input.access_tag, &input.label)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let entitlement = Entitlement {
            id: EntitlementId::new(),
            access_tag: input.access_tag,
            label: input.label,
            is_auto_approved: input.is_auto_approved,
            created_at: now,
            updated_at: now,
        };
        let entitlement = self.store.insert(entitlement).await?;

        self.audit_store
            .log_event(GovernanceAuditEventInput {
                action: GovernanceAuditAction::EntitlementCreated,
                actor_id: Some(actor_id),
                entitlement_id: Some(entitlement.id),
                after_state: Some(serde_json::to_value(&entitlement).unwrap_or_default()),
                ..Default::default()
            })
            .await?;

        Ok(entitlement)
    }

    /// Get an entitlement by ID.
    pub async fn get(&self, id: EntitlementId) -> Result<Option<Entitlement>> {
        self.store.get(id).await
    }

    /// Find the entitlement for a (tag, label) pair.
    pub async fn find(
        &self,
        access_tag: &str,
        label: &serde_json::Value,
    ) -> Result<Option<Entitlement>> {
        self.store.find_by_tag_and_label(access_tag, label).await
    }

    /// List every entitlement under an integration tag.
    pub async fn list_by_tag(&self, access_tag: &str) -> Result<Vec<Entitlement>> {
        self.store
            .list(
                &EntitlementFilter {
                    access_tag: Some(access_tag.to_string()),
                },
                &ListOptions {
                    limit: i64::MAX,
                    offset: 0,
                },
            )
            .await
    }

    /// List entitlements with filtering and pagination.
    pub async fn list(
        &self,
        filter: &EntitlementFilter,
        options: &ListOptions,
    ) -> Result<Vec<Entitlement>> {
        self.store.list(filter, options).await
    }

    /// Count entitlements matching a filter.
    pub async fn count(&self, filter: &EntitlementFilter) -> Result<i64> {
        self.store.count(filter).await
    }
}

// ============================================================================
// Tests
// ============================================================================
