//! Type definitions for the governance domain.
//!
//! Status enums for every governed record, the approval tier, and the
//! timestamp suffix used by human-readable handles. Database mappings follow
//! the enum types declared in the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Person
// ============================================================================

/// Lifecycle state of a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "person_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PersonState {
    /// Person is employed and may request access.
    Active,
    /// Offboarding has started; access is being withdrawn.
    Offboarding,
    /// All access has been withdrawn.
    Offboarded,
}

impl PersonState {
    /// Check if the person may still initiate requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for PersonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Offboarding => write!(f, "offboarding"),
            Self::Offboarded => write!(f, "offboarded"),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Status of a per-integration identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "identity_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    /// The identity currently represents the person on the integration.
    Active,
    /// The identity has been superseded or retired.
    Inactive,
}

impl IdentityStatus {
    /// Check if the identity is the live one for its integration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

// ============================================================================
// Group
// ============================================================================

/// Status of a governed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "group_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Creation requested, awaiting an approver.
    Pending,
    /// Group is live and can take members.
    Approved,
    /// Creation was refused. The name becomes reusable.
    Declined,
    /// Group was retired by an administrator.
    Deprecated,
}

impl GroupStatus {
    /// Check if the group is awaiting a creation decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the group occupies its name.
    ///
    /// Declined and deprecated groups release their name for reuse.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Check if a creation decision was already recorded.
    #[must_use]
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::Approved | Self::Declined)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Declined => write!(f, "declined"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

// ============================================================================
// Membership
// ============================================================================

/// Status of a person's membership in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "membership_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    /// Membership requested, awaiting an owner or approver.
    Pending,
    /// Person is a member of the group.
    Approved,
    /// Membership was refused.
    Declined,
    /// Membership was withdrawn.
    Revoked,
}

impl MembershipStatus {
    /// Check if the membership is awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the membership still ties the person to the group.
    ///
    /// A live membership blocks a second request for the same group.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Check if a decision was already recorded.
    #[must_use]
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::Revoked)
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Declined => write!(f, "declined"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

// ============================================================================
// Individual Access Request
// ============================================================================

/// Status of an individual access request.
///
/// The grant path runs Pending -> (SecondaryPending ->) Processing ->
/// Approved, with GrantFailed reachable from Processing. The revoke path
/// runs Approved -> Offboarding -> ProcessingRevoke -> Revoked, with
/// RevokeFailed reachable from ProcessingRevoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "access_request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    /// Awaiting the primary approver.
    Pending,
    /// Primary approval recorded, awaiting the secondary approver.
    SecondaryPending,
    /// Fully approved, grant in flight against the integration.
    Processing,
    /// Grant landed; the person holds the access.
    Approved,
    /// The grant against the integration failed.
    GrantFailed,
    /// An approver refused the request.
    Declined,
    /// Revocation queued by offboarding.
    Offboarding,
    /// Revoke in flight against the integration.
    ProcessingRevoke,
    /// The revoke against the integration failed.
    RevokeFailed,
    /// The access has been withdrawn.
    Revoked,
}

impl AccessRequestStatus {
    /// Check if the request is awaiting the primary approver.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the request is awaiting the secondary approver.
    #[must_use]
    pub fn is_secondary_pending(&self) -> bool {
        matches!(self, Self::SecondaryPending)
    }

    /// Check if the last grant attempt failed.
    #[must_use]
    pub fn is_grant_failed(&self) -> bool {
        matches!(self, Self::GrantFailed)
    }

    /// Check if an approval decision was already recorded.
    ///
    /// Guards every decision entry point. Requests in these statuses refuse
    /// further approve and decline calls.
    #[must_use]
    pub fn is_already_processed(&self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Approved | Self::Processing | Self::Revoked
        )
    }

    /// Check if the access is granted or on its way out.
    ///
    /// These are the statuses swept by offboarding and revocation.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Approved | Self::Processing | Self::Offboarding)
    }

    /// Check if the request still occupies the person's slot for its
    /// entitlement. Only declined and revoked requests free the slot.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Declined | Self::Revoked)
    }
}

impl fmt::Display for AccessRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::SecondaryPending => write!(f, "secondary_pending"),
            Self::Processing => write!(f, "processing"),
            Self::Approved => write!(f, "approved"),
            Self::GrantFailed => write!(f, "grant_failed"),
            Self::Declined => write!(f, "declined"),
            Self::Offboarding => write!(f, "offboarding"),
            Self::ProcessingRevoke => write!(f, "processing_revoke"),
            Self::RevokeFailed => write!(f, "revoke_failed"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Whether a request was raised for the person directly or produced by a
/// group fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "access_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Requested by or for the person directly.
    #[default]
    Individual,
    /// Produced by approving a group access request.
    Group,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Group => write!(f, "group"),
        }
    }
}

// ============================================================================
// Group Access Request
// ============================================================================

/// Status of a group-scoped access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "group_access_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroupAccessStatus {
    /// Awaiting the primary approver.
    Pending,
    /// Awaiting the secondary approver.
    SecondaryPending,
    /// Approved; member requests have been fanned out.
    Approved,
    /// An approver refused the request.
    Declined,
    /// The group-level access was withdrawn.
    Revoked,
    /// Retired together with its group.
    Inactive,
}

impl GroupAccessStatus {
    /// Check if the request is awaiting the primary approver.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the request is awaiting the secondary approver.
    #[must_use]
    pub fn is_secondary_pending(&self) -> bool {
        matches!(self, Self::SecondaryPending)
    }

    /// Check if a decision was already recorded.
    #[must_use]
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::Approved | Self::Declined | Self::Revoked)
    }
}

impl fmt::Display for GroupAccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::SecondaryPending => write!(f, "secondary_pending"),
            Self::Approved => write!(f, "approved"),
            Self::Declined => write!(f, "declined"),
            Self::Revoked => write!(f, "revoked"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

// ============================================================================
// Approval
// ============================================================================

/// Which approval step a decision belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalTier {
    /// First approval step.
    Primary,
    /// Second approval step, required only by some entitlements.
    Secondary,
}

impl fmt::Display for ApprovalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Renders the timestamp suffix used by generated handles such as request
/// ids and group keys: `YYYYmmddHHMMSS` in UTC with second resolution.
#[must_use]
pub fn handle_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

// ============================================================================
// Labels
// ============================================================================

/// Label key that holds integration credentials. Fields under this key are
/// never surfaced in rendered details, histories, or module descriptions.
pub const SECRET_LABEL_KEY: &str = "keySecret";

fn render_label_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_label_value)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flattens an entitlement label into `key-value` strings for display,
/// dropping the [`SECRET_LABEL_KEY`] field. Non-object labels render to
/// nothing.
#[must_use]
pub fn render_label_fields(label: &serde_json::Value) -> Vec<String> {
    let Some(map) = label.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(key, _)| key.as_str() != SECRET_LABEL_KEY)
        .map(|(key, value)| format!("{key}-{}", render_label_value(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod access_request_status_tests {
        use super::*;

        #[test]
        fn test_is_already_processed_covers_decided_statuses() {
            assert!(AccessRequestStatus::Declined.is_already_processed());
            assert!(AccessRequestStatus::Approved.is_already_processed());
            assert!(AccessRequestStatus::Processing.is_already_processed());
            assert!(AccessRequestStatus::Revoked.is_already_processed());
        }

        #[test]
        fn test_pending_statuses_are_not_processed() {
            assert!(!AccessRequestStatus::Pending.is_already_processed());
            assert!(!AccessRequestStatus::SecondaryPending.is_already_processed());
            assert!(!AccessRequestStatus::GrantFailed.is_already_processed());
        }

        #[test]
        fn test_is_granted() {
            assert!(AccessRequestStatus::Approved.is_granted());
            assert!(AccessRequestStatus::Processing.is_granted());
            assert!(AccessRequestStatus::Offboarding.is_granted());
            assert!(!AccessRequestStatus::Pending.is_granted());
            assert!(!AccessRequestStatus::Revoked.is_granted());
        }

        #[test]
        fn test_only_declined_and_revoked_free_the_slot() {
            assert!(!AccessRequestStatus::Declined.is_live());
            assert!(!AccessRequestStatus::Revoked.is_live());
            assert!(AccessRequestStatus::GrantFailed.is_live());
            assert!(AccessRequestStatus::RevokeFailed.is_live());
            assert!(AccessRequestStatus::Offboarding.is_live());
        }

        #[test]
        fn test_display_uses_snake_case() {
            assert_eq!(
                AccessRequestStatus::SecondaryPending.to_string(),
                "secondary_pending"
            );
            assert_eq!(
                AccessRequestStatus::ProcessingRevoke.to_string(),
                "processing_revoke"
            );
        }

        #[test]
        fn test_serde_round_trip() {
            let json = serde_json::to_string(&AccessRequestStatus::GrantFailed).unwrap();
            assert_eq!(json, "\"grant_failed\"");
            let back: AccessRequestStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, AccessRequestStatus::GrantFailed);
        }
    }

    mod membership_status_tests {
        use super::*;

        #[test]
        fn test_live_memberships_block_duplicates() {
            assert!(MembershipStatus::Pending.is_live());
            assert!(MembershipStatus::Approved.is_live());
            assert!(!MembershipStatus::Declined.is_live());
            assert!(!MembershipStatus::Revoked.is_live());
        }

        #[test]
        fn test_is_already_processed() {
            assert!(MembershipStatus::Approved.is_already_processed());
            assert!(MembershipStatus::Declined.is_already_processed());
            assert!(MembershipStatus::Revoked.is_already_processed());
            assert!(!MembershipStatus::Pending.is_already_processed());
        }
    }

    mod group_status_tests {
        use super::*;

        #[test]
        fn test_declined_group_releases_its_name() {
            assert!(GroupStatus::Pending.is_live());
            assert!(GroupStatus::Approved.is_live());
            assert!(!GroupStatus::Declined.is_live());
            assert!(!GroupStatus::Deprecated.is_live());
        }
    }

    mod group_access_status_tests {
        use super::*;

        #[test]
        fn test_inactive_is_not_a_decision() {
            assert!(!GroupAccessStatus::Inactive.is_already_processed());
            assert!(GroupAccessStatus::Revoked.is_already_processed());
        }
    }

    mod handle_timestamp_tests {
        use super::*;
        use chrono::TimeZone;

        #[test]
        fn test_format_is_fourteen_digits() {
            let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
            assert_eq!(handle_timestamp(at), "20240301090507");
        }
    }

    mod label_tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_render_label_fields_hides_secrets() {
            let label = json!({
                "team": "platform",
                "keySecret": "s3cr3t",
                "env": "production",
            });
            let fields = render_label_fields(&label);
            assert_eq!(fields, vec!["env-production", "team-platform"]);
            assert!(!fields.iter().any(|f| f.contains("s3cr3t")));
        }

        #[test]
        fn test_render_label_fields_flattens_arrays() {
            let label = json!({ "scopes": ["read", "write"] });
            let fields = render_label_fields(&label);
            assert_eq!(fields, vec!["scopes-read, write"]);
        }

        #[test]
        fn test_render_label_fields_on_non_object() {
            assert!(render_label_fields(&json!("plain")).is_empty());
            assert!(render_label_fields(&json!(null)).is_empty());
        }
    }
}
