//! Identity rows and the PostgreSQL-backed identity store.
//!
//! A partial unique index keeps at most one active identity per
//! (person, tag) pair; the insert path maps that violation to the
//! domain conflict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{IdentityId, PersonId};
use signet_governance::services::identity::{Identity, IdentityStore};
use signet_governance::types::IdentityStatus;
use signet_governance::GovernanceError;

/// A row in the `identities` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdentityRow {
    pub id: Uuid,
    pub person_id: Uuid,
    pub access_tag: String,
    pub identity: serde_json::Value,
    pub status: IdentityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: IdentityId::from_uuid(row.id),
            person_id: PersonId::from_uuid(row.person_id),
            access_tag: row.access_tag,
            identity: row.identity,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl IdentityRow {
    /// Find an identity by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM identities
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find the active identity for a (person, tag) pair.
    pub async fn find_active(
        pool: &PgPool,
        person_id: Uuid,
        access_tag: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM identities
            WHERE person_id = $1 AND access_tag = $2 AND status = 'active'
            "#,
        )
        .bind(person_id)
        .bind(access_tag)
        .fetch_optional(pool)
        .await
    }

    /// Every identity of a person, active or not.
    pub async fn list_for_person(
        pool: &PgPool,
        person_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM identities
            WHERE person_id = $1
            ORDER BY access_tag, created_at
            "#,
        )
        .bind(person_id)
        .fetch_all(pool)
        .await
    }

    /// The active identities of a person.
    pub async fn list_active_for_person(
        pool: &PgPool,
        person_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM identities
            WHERE person_id = $1 AND status = 'active'
            ORDER BY access_tag, created_at
            "#,
        )
        .bind(person_id)
        .fetch_all(pool)
        .await
    }

    /// Insert a new identity.
    pub async fn insert(pool: &PgPool, identity: &Identity) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO identities (
                id, person_id, access_tag, identity, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(identity.person_id.as_uuid())
        .bind(&identity.access_tag)
        .bind(&identity.identity)
        .bind(identity.status)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Mark an identity inactive.
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE identities
            SET status = 'inactive', updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

/// PostgreSQL-backed [`IdentityStore`].
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityStore for PgIdentityStore {
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>, GovernanceError> {
        let row = IdentityRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn find_active(
        &self,
        person_id: PersonId,
        access_tag: &str,
    ) -> Result<Option<Identity>, GovernanceError> {
        let row = IdentityRow::find_active(&self.pool, *person_id.as_uuid(), access_tag).await?;
        Ok(row.map(Into::into))
    }

    async fn list_for_person(&self, person_id: PersonId) -> Result<Vec<Identity>, GovernanceError> {
        let rows = IdentityRow::list_for_person(&self.pool, *person_id.as_uuid()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active_for_person(
        &self,
        person_id: PersonId,
    ) -> Result<Vec<Identity>, GovernanceError> {
        let rows = IdentityRow::list_active_for_person(&self.pool, *person_id.as_uuid()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert(&self, identity: Identity) -> Result<Identity, GovernanceError> {
        let row = IdentityRow::insert(&self.pool, &identity).await.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("idx_identities_one_active") {
                    return GovernanceError::ActiveIdentityExists(identity.access_tag.clone());
                }
            }
            GovernanceError::Database(e)
        })?;
        Ok(row.into())
    }

    async fn deactivate(&self, id: IdentityId) -> Result<Option<Identity>, GovernanceError> {
        let row = IdentityRow::deactivate(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }
}
