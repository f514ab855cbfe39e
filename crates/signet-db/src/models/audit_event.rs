//! Audit event rows and the PostgreSQL-backed audit store.
//!
//! Actions are stored as text in their wire form, so the audit trail
//! stays readable in plain SQL. Reading a row parses the action back;
//! an unknown action is a decode error, not a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{
    AccessRequestId, AuditEventId, EntitlementId, GroupAccessRequestId, GroupId, IdentityId,
    MembershipId, PersonId,
};
use signet_governance::audit::{
    AuditEventFilter, AuditStore, GovernanceAuditAction, GovernanceAuditEvent,
    GovernanceAuditEventInput,
};
use signet_governance::GovernanceError;

/// A row in the `governance_audit_events` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEventRow {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub entitlement_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub group_request_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub membership_id: Option<Uuid>,
    pub identity_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<AuditEventRow> for GovernanceAuditEvent {
    type Error = sqlx::Error;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        let action: GovernanceAuditAction = row
            .action
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;

        Ok(GovernanceAuditEvent {
            id: AuditEventId::from_uuid(row.id),
            action,
            actor_id: row.actor_id.map(PersonId::from_uuid),
            person_id: row.person_id.map(PersonId::from_uuid),
            entitlement_id: row.entitlement_id.map(EntitlementId::from_uuid),
            request_id: row.request_id.map(AccessRequestId::from_uuid),
            group_request_id: row.group_request_id.map(GroupAccessRequestId::from_uuid),
            group_id: row.group_id.map(GroupId::from_uuid),
            membership_id: row.membership_id.map(MembershipId::from_uuid),
            identity_id: row.identity_id.map(IdentityId::from_uuid),
            before_state: row.before_state,
            after_state: row.after_state,
            timestamp: row.timestamp,
            metadata: row.metadata,
        })
    }
}

impl AuditEventRow {
    /// Find an event by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM governance_audit_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new event. The database assigns the timestamp.
    pub async fn insert(
        pool: &PgPool,
        input: &GovernanceAuditEventInput,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO governance_audit_events (
                id, action, actor_id, person_id, entitlement_id, request_id,
                group_request_id, group_id, membership_id, identity_id,
                before_state, after_state, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.action.to_string())
        .bind(input.actor_id.map(|id| *id.as_uuid()))
        .bind(input.person_id.map(|id| *id.as_uuid()))
        .bind(input.entitlement_id.map(|id| *id.as_uuid()))
        .bind(input.request_id.map(|id| *id.as_uuid()))
        .bind(input.group_request_id.map(|id| *id.as_uuid()))
        .bind(input.group_id.map(|id| *id.as_uuid()))
        .bind(input.membership_id.map(|id| *id.as_uuid()))
        .bind(input.identity_id.map(|id| *id.as_uuid()))
        .bind(&input.before_state)
        .bind(&input.after_state)
        .bind(&input.metadata)
        .fetch_one(pool)
        .await
    }

    /// Query events matching a filter, most recent first.
    pub async fn query(
        pool: &PgPool,
        filter: &AuditEventFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM governance_audit_events
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;

        if filter.person_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND person_id = ${param_count}"));
        }
        if filter.request_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND request_id = ${param_count}"));
        }
        if filter.group_request_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND group_request_id = ${param_count}"));
        }
        if filter.group_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND group_id = ${param_count}"));
        }
        if filter.actor_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND actor_id = ${param_count}"));
        }
        if filter.action.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND action = ${param_count}"));
        }
        if filter.from_date.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if filter.to_date.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        query.push_str(" ORDER BY timestamp DESC");

        if filter.limit.is_some() {
            param_count += 1;
            query.push_str(&format!(" LIMIT ${param_count}"));
        }
        if filter.offset.is_some() {
            param_count += 1;
            query.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut q = sqlx::query_as::<_, AuditEventRow>(&query);
        if let Some(person_id) = filter.person_id {
            q = q.bind(*person_id.as_uuid());
        }
        if let Some(request_id) = filter.request_id {
            q = q.bind(*request_id.as_uuid());
        }
        if let Some(group_request_id) = filter.group_request_id {
            q = q.bind(*group_request_id.as_uuid());
        }
        if let Some(group_id) = filter.group_id {
            q = q.bind(*group_id.as_uuid());
        }
        if let Some(actor_id) = filter.actor_id {
            q = q.bind(*actor_id.as_uuid());
        }
        if let Some(action) = filter.action {
            q = q.bind(action.to_string());
        }
        if let Some(from_date) = filter.from_date {
            q = q.bind(from_date);
        }
        if let Some(to_date) = filter.to_date {
            q = q.bind(to_date);
        }
        if let Some(limit) = filter.limit {
            q = q.bind(limit as i64);
        }
        if let Some(offset) = filter.offset {
            q = q.bind(offset as i64);
        }

        q.fetch_all(pool).await
    }
}

/// PostgreSQL-backed [`AuditStore`].
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditStore for PgAuditStore {
    async fn log_event(
        &self,
        input: GovernanceAuditEventInput,
    ) -> Result<GovernanceAuditEvent, GovernanceError> {
        let row = AuditEventRow::insert(&self.pool, &input).await?;
        let event = row.try_into()?;
        Ok(event)
    }

    async fn query_events(
        &self,
        filter: AuditEventFilter,
    ) -> Result<Vec<GovernanceAuditEvent>, GovernanceError> {
        let rows = AuditEventRow::query(&self.pool, &filter).await?;
        let events = rows
            .into_iter()
            .map(GovernanceAuditEvent::try_from)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(events)
    }

    async fn get_event(
        &self,
        event_id: AuditEventId,
    ) -> Result<Option<GovernanceAuditEvent>, GovernanceError> {
        let row = AuditEventRow::find_by_id(&self.pool, *event_id.as_uuid()).await?;
        let event = row.map(GovernanceAuditEvent::try_from).transpose()?;
        Ok(event)
    }
}
