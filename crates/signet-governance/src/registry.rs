//! Access module contract and registry.
//!
//! Each external integration plugs into the engine as an [`AccessModule`]
//! keyed by its tag. The registry is populated explicitly at process
//! initialization with [`ModuleRegistry::register`]; nothing is discovered
//! by scanning, and tests can [`ModuleRegistry::reset`] it between cases.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use signet_core::PersonId;

use crate::error::{GovernanceError, Result};
use crate::types::render_label_fields;

/// Approver permission labels an integration requires per tier.
///
/// Serialized with the tier numerals as keys, so the wire form reads
/// `{"1": "...", "2": "..."}` with `"2"` absent for single-tier modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverPermissions {
    /// Permission required to decide the primary step.
    #[serde(rename = "1")]
    pub primary: String,
    /// Permission required to decide the secondary step, if the module
    /// has one.
    #[serde(rename = "2", skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl ApproverPermissions {
    /// Permissions for a module with a single approval step.
    #[must_use]
    pub fn primary_only(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// Permissions for a module with both approval steps.
    #[must_use]
    pub fn with_secondary(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: Some(secondary.into()),
        }
    }

    /// Check if the module requires a second approval step.
    #[must_use]
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Every permission label named by this configuration.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        let mut labels = vec![self.primary.as_str()];
        if let Some(secondary) = &self.secondary {
            labels.push(secondary.as_str());
        }
        labels
    }
}

/// Pending work an integration routes to a given approver.
///
/// The engine only counts these; their shape is owned by the integration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingAccessObjects {
    /// Pending individual requests awaiting this approver.
    pub individual_requests: Vec<serde_json::Value>,
    /// Pending group requests awaiting this approver.
    pub group_requests: Vec<serde_json::Value>,
}

impl PendingAccessObjects {
    /// Total number of pending items.
    #[must_use]
    pub fn count(&self) -> usize {
        self.individual_requests.len() + self.group_requests.len()
    }
}

/// Contract every integration implements to participate in governance.
#[async_trait]
pub trait AccessModule: Send + Sync {
    /// The unique tag identifying this integration.
    fn tag(&self) -> &str;

    /// Human-readable description of what the integration grants.
    fn access_description(&self) -> String;

    /// Approver permissions required by this integration.
    ///
    /// Some integrations vary the required permissions by entitlement
    /// label; passing `None` yields the module-wide configuration.
    fn fetch_approver_permissions(&self, label: Option<&serde_json::Value>) -> ApproverPermissions;

    /// Render a combined description for a set of entitlement labels.
    ///
    /// The default flattens each label into `key-value` fields with secret
    /// fields removed.
    fn combine_labels_description(&self, labels: &[serde_json::Value]) -> String {
        labels
            .iter()
            .map(|label| render_label_fields(label).join(", "))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Merge a set of entitlement labels into one metadata document.
    ///
    /// The default folds object labels left to right; later keys win.
    fn combine_labels_meta(&self, labels: &[serde_json::Value]) -> serde_json::Value {
        let mut merged = serde_json::Map::new();
        for label in labels {
            if let Some(map) = label.as_object() {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        serde_json::Value::Object(merged)
    }

    /// Addressees notified when a grant completes.
    fn grant_owners(&self) -> Vec<String> {
        Vec::new()
    }

    /// Addressees notified when a revoke completes.
    fn revoke_owners(&self) -> Vec<String> {
        Vec::new()
    }

    /// Pending items this integration routes to the given approver.
    ///
    /// Used only for aggregate inbox counts. Modules without their own
    /// routing return nothing.
    async fn pending_access_objects(&self, _approver: PersonId) -> Result<PendingAccessObjects> {
        Ok(PendingAccessObjects::default())
    }
}

/// Registry of access modules, keyed by tag.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn AccessModule>>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Register a module under its tag, replacing any previous entry.
    pub async fn register(&self, module: Arc<dyn AccessModule>) {
        let tag = module.tag().to_string();
        self.modules.write().await.insert(tag, module);
    }

    /// Get the module registered under a tag.
    pub async fn get(&self, tag: &str) -> Option<Arc<dyn AccessModule>> {
        self.modules.read().await.get(tag).cloned()
    }

    /// Get the module registered under a tag, or fail.
    pub async fn require(&self, tag: &str) -> Result<Arc<dyn AccessModule>> {
        self.get(tag)
            .await
            .ok_or_else(|| GovernanceError::ModuleNotRegistered(tag.to_string()))
    }

    /// All registered modules.
    pub async fn all(&self) -> Vec<Arc<dyn AccessModule>> {
        self.modules.read().await.values().cloned().collect()
    }

    /// All registered tags, sorted.
    pub async fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.modules.read().await.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of registered modules.
    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    /// Check if no modules are registered.
    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }

    /// Remove every registered module (for tests).
    pub async fn reset(&self) {
        self.modules.write().await.clear();
    }
}
