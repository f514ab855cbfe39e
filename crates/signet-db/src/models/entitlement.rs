//! Entitlement rows and the PostgreSQL-backed catalog store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::EntitlementId;
use signet_governance::services::catalog::{
    Entitlement, EntitlementFilter, EntitlementStore, ListOptions,
};
use signet_governance::GovernanceError;

/// A row in the `entitlements` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntitlementRow {
    pub id: Uuid,
    pub access_tag: String,
    pub label: serde_json::Value,
    pub is_auto_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EntitlementRow> for Entitlement {
    fn from(row: EntitlementRow) -> Self {
        Entitlement {
            id: EntitlementId::from_uuid(row.id),
            access_tag: row.access_tag,
            label: row.label,
            is_auto_approved: row.is_auto_approved,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl EntitlementRow {
    /// Find an entitlement by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM entitlements
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find the entitlement carrying this exact label under a tag.
    pub async fn find_by_tag_and_label(
        pool: &PgPool,
        access_tag: &str,
        label: &serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM entitlements
            WHERE access_tag = $1 AND label = $2
            "#,
        )
        .bind(access_tag)
        .bind(label)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new entitlement.
    pub async fn insert(pool: &PgPool, entitlement: &Entitlement) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO entitlements (
                id, access_tag, label, is_auto_approved, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(entitlement.id.as_uuid())
        .bind(&entitlement.access_tag)
        .bind(&entitlement.label)
        .bind(entitlement.is_auto_approved)
        .bind(entitlement.created_at)
        .bind(entitlement.updated_at)
        .fetch_one(pool)
        .await
    }

    /// List entitlements with filtering and pagination.
    pub async fn list(
        pool: &PgPool,
        filter: &EntitlementFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM entitlements
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;

        if filter.access_tag.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND access_tag = ${param_count}"));
        }

        query.push_str(&format!(
            " ORDER BY access_tag, created_at LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut q = sqlx::query_as::<_, EntitlementRow>(&query);
        if let Some(ref access_tag) = filter.access_tag {
            q = q.bind(access_tag);
        }

        q.bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }

    /// Count entitlements matching a filter.
    pub async fn count(pool: &PgPool, filter: &EntitlementFilter) -> Result<i64, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT COUNT(*) FROM entitlements
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;

        if filter.access_tag.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND access_tag = ${param_count}"));
        }

        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(ref access_tag) = filter.access_tag {
            q = q.bind(access_tag);
        }

        q.fetch_one(pool).await
    }
}

/// PostgreSQL-backed [`EntitlementStore`].
#[derive(Debug, Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn get(&self, id: EntitlementId) -> Result<Option<Entitlement>, GovernanceError> {
        let row = EntitlementRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_tag_and_label(
        &self,
        access_tag: &str,
        label: &serde_json::Value,
    ) -> Result<Option<Entitlement>, GovernanceError> {
        let row = EntitlementRow::find_by_tag_and_label(&self.pool, access_tag, label).await?;
        Ok(row.map(Into::into))
    }

    async fn insert(&self, entitlement: Entitlement) -> Result<Entitlement, GovernanceError> {
        let row = EntitlementRow::insert(&self.pool, &entitlement).await?;
        Ok(row.into())
    }

    async fn list(
        &self,
        filter: &EntitlementFilter,
        options: &ListOptions,
    ) -> Result<Vec<Entitlement>, GovernanceError> {
        let rows = EntitlementRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, filter: &EntitlementFilter) -> Result<i64, GovernanceError> {
        let count = EntitlementRow::count(&self.pool, filter).await?;
        Ok(count)
    }
}
