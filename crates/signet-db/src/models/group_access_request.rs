//! Group access request rows and their PostgreSQL-backed store.
//!
//! Two uniqueness rules guard the insert: a globally unique external
//! handle, and at most one active request per (group, entitlement)
//! pair. A declined request still occupies the slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{EntitlementId, GroupAccessRequestId, GroupId, PersonId};
use signet_governance::services::catalog::ListOptions;
use signet_governance::services::group_request::{
    GroupAccessRequest, GroupAccessRequestFilter, GroupAccessRequestStore,
    UpdateGroupAccessRequestInput,
};
use signet_governance::types::GroupAccessStatus;
use signet_governance::GovernanceError;

/// A row in the `group_access_requests` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupAccessRequestRow {
    pub id: Uuid,
    pub request_id: String,
    pub group_id: Uuid,
    pub entitlement_id: Uuid,
    pub access_tag: String,
    pub requested_by_id: Uuid,
    pub status: GroupAccessStatus,
    pub approver_1_id: Option<Uuid>,
    pub approver_2_id: Option<Uuid>,
    pub request_reason: String,
    pub decline_reason: Option<String>,
    pub revoker_id: Option<Uuid>,
    pub requested_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl From<GroupAccessRequestRow> for GroupAccessRequest {
    fn from(row: GroupAccessRequestRow) -> Self {
        GroupAccessRequest {
            id: GroupAccessRequestId::from_uuid(row.id),
            request_id: row.request_id,
            group_id: GroupId::from_uuid(row.group_id),
            entitlement_id: EntitlementId::from_uuid(row.entitlement_id),
            access_tag: row.access_tag,
            requested_by_id: PersonId::from_uuid(row.requested_by_id),
            status: row.status,
            approver_1_id: row.approver_1_id.map(PersonId::from_uuid),
            approver_2_id: row.approver_2_id.map(PersonId::from_uuid),
            request_reason: row.request_reason,
            decline_reason: row.decline_reason,
            revoker_id: row.revoker_id.map(PersonId::from_uuid),
            requested_on: row.requested_on,
            updated_on: row.updated_on,
        }
    }
}

impl GroupAccessRequestRow {
    /// Find a request by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM group_access_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find a request by its external handle.
    pub async fn find_by_request_id(
        pool: &PgPool,
        request_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM group_access_requests
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new request.
    pub async fn insert(
        pool: &PgPool,
        request: &GroupAccessRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO group_access_requests (
                id, request_id, group_id, entitlement_id, access_tag,
                requested_by_id, status, approver_1_id, approver_2_id,
                request_reason, decline_reason, revoker_id,
                requested_on, updated_on
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(&request.request_id)
        .bind(request.group_id.as_uuid())
        .bind(request.entitlement_id.as_uuid())
        .bind(&request.access_tag)
        .bind(request.requested_by_id.as_uuid())
        .bind(request.status)
        .bind(request.approver_1_id.map(|id| *id.as_uuid()))
        .bind(request.approver_2_id.map(|id| *id.as_uuid()))
        .bind(&request.request_reason)
        .bind(&request.decline_reason)
        .bind(request.revoker_id.map(|id| *id.as_uuid()))
        .bind(request.requested_on)
        .bind(request.updated_on)
        .fetch_one(pool)
        .await
    }

    /// Apply a partial update. Fields left `None` keep their value.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        input: &UpdateGroupAccessRequestInput,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE group_access_requests
            SET status = COALESCE($2, status),
                approver_1_id = COALESCE($3, approver_1_id),
                approver_2_id = COALESCE($4, approver_2_id),
                decline_reason = COALESCE($5, decline_reason),
                revoker_id = COALESCE($6, revoker_id),
                updated_on = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.status)
        .bind(input.approver_1_id.map(|id| *id.as_uuid()))
        .bind(input.approver_2_id.map(|id| *id.as_uuid()))
        .bind(&input.decline_reason)
        .bind(input.revoker_id.map(|id| *id.as_uuid()))
        .fetch_optional(pool)
        .await
    }

    /// List requests with filtering and pagination, newest first.
    pub async fn list(
        pool: &PgPool,
        filter: &GroupAccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM group_access_requests
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        Self::push_filter_conditions(&mut query, filter, &mut param_count);

        query.push_str(&format!(
            " ORDER BY requested_on DESC, request_id ASC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let q = sqlx::query_as::<_, GroupAccessRequestRow>(&query);
        Self::bind_filter_values(q, filter)
            .bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }

    /// Count requests matching a filter.
    pub async fn count(
        pool: &PgPool,
        filter: &GroupAccessRequestFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT COUNT(*) FROM group_access_requests
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        Self::push_filter_conditions(&mut query, filter, &mut param_count);

        let q = sqlx::query_as::<_, (i64,)>(&query);
        let (count,) = Self::bind_filter_values(q, filter).fetch_one(pool).await?;
        Ok(count)
    }

    /// Move every request matching the filter to the given status.
    pub async fn bulk_update_status(
        pool: &PgPool,
        filter: &GroupAccessRequestFilter,
        to: GroupAccessStatus,
    ) -> Result<u64, sqlx::Error> {
        let mut query =
            String::from("UPDATE group_access_requests SET status = $1, updated_on = NOW()");
        let mut param_count = 1;
        query.push_str(" WHERE 1 = 1");
        Self::push_filter_conditions(&mut query, filter, &mut param_count);

        let mut q = sqlx::query(&query).bind(to);
        if let Some(group_id) = filter.group_id {
            q = q.bind(*group_id.as_uuid());
        }
        if let Some(entitlement_id) = filter.entitlement_id {
            q = q.bind(*entitlement_id.as_uuid());
        }
        if let Some(ref access_tag) = filter.access_tag {
            q = q.bind(access_tag);
        }
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(ref statuses) = filter.statuses {
            q = q.bind(statuses);
        }
        if let Some(ref fragment) = filter.request_id_contains {
            q = q.bind(format!("%{fragment}%"));
        }

        let result = q.execute(pool).await?;
        Ok(result.rows_affected())
    }

    fn push_filter_conditions(
        query: &mut String,
        filter: &GroupAccessRequestFilter,
        param_count: &mut i32,
    ) {
        if filter.group_id.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND group_id = ${param_count}"));
        }
        if filter.entitlement_id.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND entitlement_id = ${param_count}"));
        }
        if filter.access_tag.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND access_tag = ${param_count}"));
        }
        if filter.status.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.statuses.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if filter.request_id_contains.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND request_id LIKE ${param_count}"));
        }
    }

    fn bind_filter_values<'q, O>(
        mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
        filter: &'q GroupAccessRequestFilter,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        if let Some(group_id) = filter.group_id {
            q = q.bind(*group_id.as_uuid());
        }
        if let Some(entitlement_id) = filter.entitlement_id {
            q = q.bind(*entitlement_id.as_uuid());
        }
        if let Some(ref access_tag) = filter.access_tag {
            q = q.bind(access_tag);
        }
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(ref statuses) = filter.statuses {
            q = q.bind(statuses);
        }
        if let Some(ref fragment) = filter.request_id_contains {
            q = q.bind(format!("%{fragment}%"));
        }
        q
    }
}

/// PostgreSQL-backed [`GroupAccessRequestStore`].
#[derive(Debug, Clone)]
pub struct PgGroupAccessRequestStore {
    pool: PgPool,
}

impl PgGroupAccessRequestStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GroupAccessRequestStore for PgGroupAccessRequestStore {
    async fn get(
        &self,
        id: GroupAccessRequestId,
    ) -> Result<Option<GroupAccessRequest>, GovernanceError> {
        let row = GroupAccessRequestRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<GroupAccessRequest>, GovernanceError> {
        let row = GroupAccessRequestRow::find_by_request_id(&self.pool, request_id).await?;
        Ok(row.map(Into::into))
    }

    async fn insert(
        &self,
        request: GroupAccessRequest,
    ) -> Result<GroupAccessRequest, GovernanceError> {
        let row = GroupAccessRequestRow::insert(&self.pool, &request).await.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("group_access_requests_request_id_key") {
                    return GovernanceError::DuplicateRequestId(request.request_id.clone());
                }
                if db_err.constraint() == Some("idx_group_access_requests_one_active") {
                    return GovernanceError::GroupAccessRequestExists;
                }
            }
            GovernanceError::Database(e)
        })?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: GroupAccessRequestId,
        input: UpdateGroupAccessRequestInput,
    ) -> Result<Option<GroupAccessRequest>, GovernanceError> {
        let row = GroupAccessRequestRow::update(&self.pool, *id.as_uuid(), &input).await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &GroupAccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<GroupAccessRequest>, GovernanceError> {
        let rows = GroupAccessRequestRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, filter: &GroupAccessRequestFilter) -> Result<i64, GovernanceError> {
        let count = GroupAccessRequestRow::count(&self.pool, filter).await?;
        Ok(count)
    }

    async fn bulk_update_status(
        &self,
        filter: &GroupAccessRequestFilter,
        to: GroupAccessStatus,
    ) -> Result<u64, GovernanceError> {
        let changed =
            GroupAccessRequestRow::bulk_update_status(&self.pool, filter, to).await?;
        Ok(changed)
    }
}
