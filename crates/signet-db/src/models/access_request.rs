//! Access request rows and the PostgreSQL-backed request store.
//!
//! List, count, and the bulk sweep share one filter shape, so each
//! builds its WHERE clause from the same set of conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{AccessRequestId, EntitlementId, IdentityId, PersonId};
use signet_governance::services::catalog::ListOptions;
use signet_governance::services::request::{
    AccessRequest, AccessRequestFilter, AccessRequestStore, UpdateAccessRequestInput,
};
use signet_governance::types::{AccessRequestStatus, AccessType};
use signet_governance::GovernanceError;

/// A row in the `access_requests` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessRequestRow {
    pub id: Uuid,
    pub request_id: String,
    pub identity_id: Uuid,
    pub person_id: Uuid,
    pub entitlement_id: Uuid,
    pub access_tag: String,
    pub status: AccessRequestStatus,
    pub access_type: AccessType,
    pub approver_1_id: Option<Uuid>,
    pub approver_2_id: Option<Uuid>,
    pub request_reason: String,
    pub decline_reason: Option<String>,
    pub fail_reason: Option<String>,
    pub revoker_id: Option<Uuid>,
    pub meta_data: serde_json::Value,
    pub requested_on: DateTime<Utc>,
    pub approved_on: Option<DateTime<Utc>>,
    pub updated_on: DateTime<Utc>,
}

impl From<AccessRequestRow> for AccessRequest {
    fn from(row: AccessRequestRow) -> Self {
        AccessRequest {
            id: AccessRequestId::from_uuid(row.id),
            request_id: row.request_id,
            identity_id: IdentityId::from_uuid(row.identity_id),
            person_id: PersonId::from_uuid(row.person_id),
            entitlement_id: EntitlementId::from_uuid(row.entitlement_id),
            access_tag: row.access_tag,
            status: row.status,
            access_type: row.access_type,
            approver_1_id: row.approver_1_id.map(PersonId::from_uuid),
            approver_2_id: row.approver_2_id.map(PersonId::from_uuid),
            request_reason: row.request_reason,
            decline_reason: row.decline_reason,
            fail_reason: row.fail_reason,
            revoker_id: row.revoker_id.map(PersonId::from_uuid),
            meta_data: row.meta_data,
            requested_on: row.requested_on,
            approved_on: row.approved_on,
            updated_on: row.updated_on,
        }
    }
}

/// Append the filter's conditions to a query, continuing the placeholder
/// numbering from `param_count`.
fn push_filter_conditions(
    query: &mut String,
    filter: &AccessRequestFilter,
    param_count: &mut i32,
) {
    if filter.identity_id.is_some() {
        *param_count += 1;
        query.push_str(&format!(" AND identity_id = ${param_count}"));
    }
    if filter.person_id.is_some() {
        *param_count += 1;
        query.push_str(&format!(" AND person_id = ${param_count}"));
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
    if filter.exclude_statuses.is_some() {
        *param_count += 1;
        query.push_str(&format!(" AND status <> ALL(${param_count})"));
    }
    if filter.access_type.is_some() {
        *param_count += 1;
        query.push_str(&format!(" AND access_type = ${param_count}"));
    }
    if filter.request_id_contains.is_some() {
        *param_count += 1;
        query.push_str(&format!(" AND request_id LIKE ${param_count}"));
    }
}

/// Bind the filter's values in the same order the conditions were pushed.
fn bind_filter_values<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    filter: &'q AccessRequestFilter,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    if let Some(identity_id) = filter.identity_id {
        q = q.bind(*identity_id.as_uuid());
    }
    if let Some(person_id) = filter.person_id {
        q = q.bind(*person_id.as_uuid());
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
    if let Some(ref exclude_statuses) = filter.exclude_statuses {
        q = q.bind(exclude_statuses);
    }
    if let Some(access_type) = filter.access_type {
        q = q.bind(access_type);
    }
    if let Some(ref fragment) = filter.request_id_contains {
        q = q.bind(format!("%{fragment}%"));
    }
    q
}

impl AccessRequestRow {
    /// Find a request by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_requests
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
            SELECT * FROM access_requests
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new request.
    pub async fn insert(pool: &PgPool, request: &AccessRequest) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO access_requests (
                id, request_id, identity_id, person_id, entitlement_id,
                access_tag, status, access_type, approver_1_id, approver_2_id,
                request_reason, decline_reason, fail_reason, revoker_id,
                meta_data, requested_on, approved_on, updated_on
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18
            )
            RETURNING *
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(&request.request_id)
        .bind(request.identity_id.as_uuid())
        .bind(request.person_id.as_uuid())
        .bind(request.entitlement_id.as_uuid())
        .bind(&request.access_tag)
        .bind(request.status)
        .bind(request.access_type)
        .bind(request.approver_1_id.map(|id| *id.as_uuid()))
        .bind(request.approver_2_id.map(|id| *id.as_uuid()))
        .bind(&request.request_reason)
        .bind(&request.decline_reason)
        .bind(&request.fail_reason)
        .bind(request.revoker_id.map(|id| *id.as_uuid()))
        .bind(&request.meta_data)
        .bind(request.requested_on)
        .bind(request.approved_on)
        .bind(request.updated_on)
        .fetch_one(pool)
        .await
    }

    /// Apply a partial update. Fields left `None` keep their value.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        input: &UpdateAccessRequestInput,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_requests
            SET status = COALESCE($2, status),
                approver_1_id = COALESCE($3, approver_1_id),
                approver_2_id = COALESCE($4, approver_2_id),
                decline_reason = COALESCE($5, decline_reason),
                fail_reason = COALESCE($6, fail_reason),
                revoker_id = COALESCE($7, revoker_id),
                approved_on = COALESCE($8, approved_on),
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
        .bind(&input.fail_reason)
        .bind(input.revoker_id.map(|id| *id.as_uuid()))
        .bind(input.approved_on)
        .fetch_optional(pool)
        .await
    }

    /// Set one key in the metadata map, atomically with the save.
    pub async fn update_meta_data(
        pool: &PgPool,
        id: Uuid,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_requests
            SET meta_data = jsonb_set(meta_data, ARRAY[$2], $3, true),
                updated_on = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .fetch_optional(pool)
        .await
    }

    /// List requests with filtering and pagination, newest first.
    pub async fn list(
        pool: &PgPool,
        filter: &AccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM access_requests
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        push_filter_conditions(&mut query, filter, &mut param_count);

        query.push_str(&format!(
            " ORDER BY requested_on DESC, request_id ASC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let q = sqlx::query_as::<_, AccessRequestRow>(&query);
        bind_filter_values(q, filter)
            .bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }

    /// Count requests matching a filter.
    pub async fn count(pool: &PgPool, filter: &AccessRequestFilter) -> Result<i64, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT COUNT(*) FROM access_requests
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        push_filter_conditions(&mut query, filter, &mut param_count);

        let q = sqlx::query_as::<_, (i64,)>(&query);
        let (count,) = bind_filter_values(q, filter).fetch_one(pool).await?;
        Ok(count)
    }

    /// Move every matching request to the given status in one sweep.
    pub async fn bulk_update_status(
        pool: &PgPool,
        filter: &AccessRequestFilter,
        to: AccessRequestStatus,
        decline_reason: Option<&str>,
        revoker_id: Option<Uuid>,
    ) -> Result<u64, sqlx::Error> {
        let mut query =
            String::from("UPDATE access_requests SET status = $1, updated_on = NOW()");
        let mut param_count = 1;

        if decline_reason.is_some() {
            param_count += 1;
            query.push_str(&format!(", decline_reason = ${param_count}"));
        }
        if revoker_id.is_some() {
            param_count += 1;
            query.push_str(&format!(", revoker_id = ${param_count}"));
        }

        query.push_str(" WHERE 1 = 1");
        push_filter_conditions(&mut query, filter, &mut param_count);

        let mut q = sqlx::query(&query).bind(to);
        if let Some(reason) = decline_reason {
            q = q.bind(reason);
        }
        if let Some(revoker) = revoker_id {
            q = q.bind(revoker);
        }
        if let Some(identity_id) = filter.identity_id {
            q = q.bind(*identity_id.as_uuid());
        }
        if let Some(person_id) = filter.person_id {
            q = q.bind(*person_id.as_uuid());
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
        if let Some(ref exclude_statuses) = filter.exclude_statuses {
            q = q.bind(exclude_statuses);
        }
        if let Some(access_type) = filter.access_type {
            q = q.bind(access_type);
        }
        if let Some(ref fragment) = filter.request_id_contains {
            q = q.bind(format!("%{fragment}%"));
        }

        let result = q.execute(pool).await?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL-backed [`AccessRequestStore`].
#[derive(Debug, Clone)]
pub struct PgAccessRequestStore {
    pool: PgPool,
}

impl PgAccessRequestStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccessRequestStore for PgAccessRequestStore {
    async fn get(&self, id: AccessRequestId) -> Result<Option<AccessRequest>, GovernanceError> {
        let row = AccessRequestRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<AccessRequest>, GovernanceError> {
        let row = AccessRequestRow::find_by_request_id(&self.pool, request_id).await?;
        Ok(row.map(Into::into))
    }

    async fn insert(&self, request: AccessRequest) -> Result<AccessRequest, GovernanceError> {
        let row = AccessRequestRow::insert(&self.pool, &request).await.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("access_requests_request_id_key") {
                    return GovernanceError::DuplicateRequestId(request.request_id.clone());
                }
            }
            GovernanceError::Database(e)
        })?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: AccessRequestId,
        input: UpdateAccessRequestInput,
    ) -> Result<Option<AccessRequest>, GovernanceError> {
        let row = AccessRequestRow::update(&self.pool, *id.as_uuid(), &input).await?;
        Ok(row.map(Into::into))
    }

    async fn update_meta_data(
        &self,
        id: AccessRequestId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Option<AccessRequest>, GovernanceError> {
        let row =
            AccessRequestRow::update_meta_data(&self.pool, *id.as_uuid(), key, &value).await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &AccessRequestFilter,
        options: &ListOptions,
    ) -> Result<Vec<AccessRequest>, GovernanceError> {
        let rows = AccessRequestRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, filter: &AccessRequestFilter) -> Result<i64, GovernanceError> {
        let count = AccessRequestRow::count(&self.pool, filter).await?;
        Ok(count)
    }

    async fn bulk_update_status(
        &self,
        filter: &AccessRequestFilter,
        to: AccessRequestStatus,
        decline_reason: Option<String>,
        revoker_id: Option<PersonId>,
    ) -> Result<u64, GovernanceError> {
        let changed = AccessRequestRow::bulk_update_status(
            &self.pool,
            filter,
            to,
            decline_reason.as_deref(),
            revoker_id.map(|id| *id.as_uuid()),
        )
        .await?;
        Ok(changed)
    }
}
