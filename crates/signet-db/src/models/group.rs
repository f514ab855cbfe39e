//! Group rows and the PostgreSQL-backed group store.
//!
//! Name uniqueness only applies to live groups, which a partial unique
//! index enforces. Declined and inactive groups keep their name and a
//! new group may take it over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{GroupId, PersonId};
use signet_governance::services::catalog::ListOptions;
use signet_governance::services::group::{Group, GroupFilter, GroupStore};
use signet_governance::types::GroupStatus;
use signet_governance::GovernanceError;

/// A row in the `groups` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: Uuid,
    pub group_key: String,
    pub name: String,
    pub description: String,
    pub status: GroupStatus,
    pub requester_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub decline_reason: Option<String>,
    pub needs_access_approve: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: GroupId::from_uuid(row.id),
            group_key: row.group_key,
            name: row.name,
            description: row.description,
            status: row.status,
            requester_id: PersonId::from_uuid(row.requester_id),
            approver_id: row.approver_id.map(PersonId::from_uuid),
            decline_reason: row.decline_reason,
            needs_access_approve: row.needs_access_approve,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl GroupRow {
    /// Find a group by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM groups
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find a group by its external handle.
    pub async fn find_by_key(pool: &PgPool, group_key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM groups
            WHERE group_key = $1
            "#,
        )
        .bind(group_key)
        .fetch_optional(pool)
        .await
    }

    /// Find the live (pending or approved) group with this name.
    pub async fn find_live_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM groups
            WHERE name = $1 AND status IN ('pending', 'approved')
            "#,
        )
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    /// Find the approved group with this name.
    pub async fn find_approved_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM groups
            WHERE name = $1 AND status = 'approved'
            "#,
        )
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new group.
    pub async fn insert(pool: &PgPool, group: &Group) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO groups (
                id, group_key, name, description, status, requester_id,
                approver_id, decline_reason, needs_access_approve,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(group.id.as_uuid())
        .bind(&group.group_key)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.status)
        .bind(group.requester_id.as_uuid())
        .bind(group.approver_id.map(|id| *id.as_uuid()))
        .bind(&group.decline_reason)
        .bind(group.needs_access_approve)
        .bind(group.created_at)
        .bind(group.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Set the group's status. Approver and reason are written where given.
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: GroupStatus,
        approver_id: Option<Uuid>,
        decline_reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE groups
            SET status = $2,
                approver_id = COALESCE($3, approver_id),
                decline_reason = COALESCE($4, decline_reason),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(approver_id)
        .bind(decline_reason)
        .fetch_optional(pool)
        .await
    }

    /// Reset a group to pending, clearing the approver.
    pub async fn unapprove(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE groups
            SET status = 'pending', approver_id = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List groups with filtering and pagination.
    pub async fn list(
        pool: &PgPool,
        filter: &GroupFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM groups
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;

        if filter.status.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }

        query.push_str(&format!(
            " ORDER BY created_at, group_key LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut q = sqlx::query_as::<_, GroupRow>(&query);
        if let Some(status) = filter.status {
            q = q.bind(status);
        }

        q.bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }
}

/// PostgreSQL-backed [`GroupStore`].
#[derive(Debug, Clone)]
pub struct PgGroupStore {
    pool: PgPool,
}

impl PgGroupStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GroupStore for PgGroupStore {
    async fn get(&self, id: GroupId) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_key(&self, group_key: &str) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::find_by_key(&self.pool, group_key).await?;
        Ok(row.map(Into::into))
    }

    async fn find_live_by_name(&self, name: &str) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::find_live_by_name(&self.pool, name).await?;
        Ok(row.map(Into::into))
    }

    async fn find_approved_by_name(&self, name: &str) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::find_approved_by_name(&self.pool, name).await?;
        Ok(row.map(Into::into))
    }

    async fn insert(&self, group: Group) -> Result<Group, GovernanceError> {
        let row = GroupRow::insert(&self.pool, &group).await.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("idx_groups_live_name") {
                    return GovernanceError::GroupNameExists(group.name.clone());
                }
            }
            GovernanceError::Database(e)
        })?;
        Ok(row.into())
    }

    async fn set_status(
        &self,
        id: GroupId,
        status: GroupStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::set_status(
            &self.pool,
            *id.as_uuid(),
            status,
            approver_id.map(|id| *id.as_uuid()),
            decline_reason.as_deref(),
        )
        .await?;
        Ok(row.map(Into::into))
    }

    async fn unapprove(&self, id: GroupId) -> Result<Option<Group>, GovernanceError> {
        let row = GroupRow::unapprove(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &GroupFilter,
        options: &ListOptions,
    ) -> Result<Vec<Group>, GovernanceError> {
        let rows = GroupRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
