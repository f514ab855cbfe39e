//! Common test utilities for signet-governance integration tests.
//!
//! This module provides shared stores, wired services, and fixtures for
//! integration testing the governance crate. All tests run against the
//! in-memory stores for isolation and speed.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use signet_governance::audit::InMemoryAuditStore;
use signet_governance::registry::ModuleRegistry;
use signet_governance::services::approval::ApprovalService;
use signet_governance::services::catalog::{CatalogService, InMemoryEntitlementStore};
use signet_governance::services::group::{
    GroupService, InMemoryGroupStore, InMemoryMembershipStore,
};
use signet_governance::services::group_request::{
    GroupAccessRequestService, InMemoryGroupAccessRequestStore,
};
use signet_governance::services::identity::{IdentityService, InMemoryIdentityStore};
use signet_governance::services::offboarding::OffboardingService;
use signet_governance::services::person::{InMemoryPersonStore, PersonService};
use signet_governance::services::request::{AccessRequestService, InMemoryAccessRequestStore};

/// Stores all the in-memory stores for test isolation.
#[derive(Clone)]
pub struct TestStores {
    pub person_store: Arc<InMemoryPersonStore>,
    pub entitlement_store: Arc<InMemoryEntitlementStore>,
    pub identity_store: Arc<InMemoryIdentityStore>,
    pub request_store: Arc<InMemoryAccessRequestStore>,
    pub group_store: Arc<InMemoryGroupStore>,
    pub membership_store: Arc<InMemoryMembershipStore>,
    pub group_request_store: Arc<InMemoryGroupAccessRequestStore>,
    pub audit_store: Arc<InMemoryAuditStore>,
}

impl TestStores {
    /// Create a new set of isolated test stores.
    pub fn new() -> Self {
        Self {
            person_store: Arc::new(InMemoryPersonStore::new()),
            entitlement_store: Arc::new(InMemoryEntitlementStore::new()),
            identity_store: Arc::new(InMemoryIdentityStore::new()),
            request_store: Arc::new(InMemoryAccessRequestStore::new()),
            group_store: Arc::new(InMemoryGroupStore::new()),
            membership_store: Arc::new(InMemoryMembershipStore::new()),
            group_request_store: Arc::new(InMemoryGroupAccessRequestStore::new()),
            audit_store: Arc::new(InMemoryAuditStore::new()),
        }
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

/// All governance services for integration testing.
pub struct TestServices {
    pub person: PersonService,
    pub catalog: CatalogService,
    pub identity: Arc<IdentityService>,
    pub request: Arc<AccessRequestService>,
    pub group: GroupService,
    pub group_request: GroupAccessRequestService,
    pub approval: ApprovalService,
    pub offboarding: OffboardingService,
}

impl TestServices {
    /// Create a new set of services backed by the provided stores.
    ///
    /// The module registry carries the two fixture integrations: `github`
    /// (single approval tier) and `aws` (primary plus secondary tier).
    pub async fn new(stores: &TestStores) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(Arc::new(fixtures::GithubModule)).await;
        registry.register(Arc::new(fixtures::AwsModule)).await;

        let identity = Arc::new(IdentityService::new(
            stores.identity_store.clone(),
            stores.request_store.clone(),
            stores.person_store.clone(),
            stores.audit_store.clone(),
        ));
        let request = Arc::new(AccessRequestService::new(
            stores.request_store.clone(),
            stores.identity_store.clone(),
            stores.person_store.clone(),
            stores.entitlement_store.clone(),
            registry.clone(),
            stores.audit_store.clone(),
        ));

        Self {
            person: PersonService::new(stores.person_store.clone(), stores.audit_store.clone()),
            catalog: CatalogService::new(
                stores.entitlement_store.clone(),
                stores.audit_store.clone(),
            ),
            group: GroupService::new(
                stores.group_store.clone(),
                stores.membership_store.clone(),
                stores.group_request_store.clone(),
                stores.person_store.clone(),
                stores.audit_store.clone(),
            ),
            group_request: GroupAccessRequestService::new(
                stores.group_request_store.clone(),
                stores.group_store.clone(),
                stores.membership_store.clone(),
                stores.person_store.clone(),
                stores.entitlement_store.clone(),
                registry.clone(),
                identity.clone(),
                request.clone(),
                stores.audit_store.clone(),
            ),
            approval: ApprovalService::new(
                stores.person_store.clone(),
                stores.group_store.clone(),
                stores.membership_store.clone(),
                registry,
            ),
            offboarding: OffboardingService::new(
                stores.person_store.clone(),
                stores.request_store.clone(),
                stores.membership_store.clone(),
                stores.audit_store.clone(),
            ),
            identity,
            request,
        }
    }
}

/// Test context containing stores and services.
pub struct TestContext {
    pub stores: TestStores,
    pub services: TestServices,
}

impl TestContext {
    /// Create a new isolated test context.
    pub async fn new() -> Self {
        let stores = TestStores::new();
        let services = TestServices::new(&stores).await;
        Self { stores, services }
    }
}
