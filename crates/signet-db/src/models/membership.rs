//! Membership rows and the PostgreSQL-backed membership store.
//!
//! The sweep operations run as single UPDATE statements so group-wide
//! decisions land atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{GroupId, MembershipId, PersonId};
use signet_governance::services::catalog::ListOptions;
use signet_governance::services::group::{Membership, MembershipFilter, MembershipStore};
use signet_governance::types::MembershipStatus;
use signet_governance::GovernanceError;

/// A row in the `memberships` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MembershipRow {
    pub id: Uuid,
    pub membership_id: String,
    pub group_id: Uuid,
    pub person_id: Uuid,
    pub is_owner: bool,
    pub status: MembershipStatus,
    pub requested_by_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub reason: String,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Membership {
            id: MembershipId::from_uuid(row.id),
            membership_id: row.membership_id,
            group_id: GroupId::from_uuid(row.group_id),
            person_id: PersonId::from_uuid(row.person_id),
            is_owner: row.is_owner,
            status: row.status,
            requested_by_id: PersonId::from_uuid(row.requested_by_id),
            approver_id: row.approver_id.map(PersonId::from_uuid),
            reason: row.reason,
            decline_reason: row.decline_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl MembershipRow {
    /// Find a membership by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM memberships
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find a membership by its external handle.
    pub async fn find_by_handle(
        pool: &PgPool,
        membership_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM memberships
            WHERE membership_id = $1
            "#,
        )
        .bind(membership_id)
        .fetch_optional(pool)
        .await
    }

    /// Find the live (pending or approved) membership of a person in a group.
    pub async fn find_live(
        pool: &PgPool,
        group_id: Uuid,
        person_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM memberships
            WHERE group_id = $1 AND person_id = $2
              AND status IN ('pending', 'approved')
            "#,
        )
        .bind(group_id)
        .bind(person_id)
        .fetch_optional(pool)
        .await
    }

    /// Insert a new membership.
    pub async fn insert(pool: &PgPool, membership: &Membership) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO memberships (
                id, membership_id, group_id, person_id, is_owner, status,
                requested_by_id, approver_id, reason, decline_reason,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(membership.id.as_uuid())
        .bind(&membership.membership_id)
        .bind(membership.group_id.as_uuid())
        .bind(membership.person_id.as_uuid())
        .bind(membership.is_owner)
        .bind(membership.status)
        .bind(membership.requested_by_id.as_uuid())
        .bind(membership.approver_id.map(|id| *id.as_uuid()))
        .bind(&membership.reason)
        .bind(&membership.decline_reason)
        .bind(membership.created_at)
        .bind(membership.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Set a membership's status. Approver and reason are written where given.
    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: MembershipStatus,
        approver_id: Option<Uuid>,
        decline_reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE memberships
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

    /// Reset a membership to pending, clearing the approver.
    pub async fn unapprove(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE memberships
            SET status = 'pending', approver_id = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List memberships with filtering and pagination.
    pub async fn list(
        pool: &PgPool,
        filter: &MembershipFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM memberships
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        Self::push_filter_conditions(&mut query, filter, &mut param_count);

        query.push_str(&format!(
            " ORDER BY created_at, membership_id LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let q = sqlx::query_as::<_, MembershipRow>(&query);
        Self::bind_filter_values(q, filter)
            .bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }

    /// Count memberships matching a filter.
    pub async fn count(pool: &PgPool, filter: &MembershipFilter) -> Result<i64, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT COUNT(*) FROM memberships
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;
        Self::push_filter_conditions(&mut query, filter, &mut param_count);

        let q = sqlx::query_as::<_, (i64,)>(&query);
        let (count,) = Self::bind_filter_values(q, filter).fetch_one(pool).await?;
        Ok(count)
    }

    fn push_filter_conditions(
        query: &mut String,
        filter: &MembershipFilter,
        param_count: &mut i32,
    ) {
        if filter.group_id.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND group_id = ${param_count}"));
        }
        if filter.group_ids.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND group_id = ANY(${param_count})"));
        }
        if filter.person_id.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND person_id = ${param_count}"));
        }
        if filter.status.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.statuses.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if filter.is_owner.is_some() {
            *param_count += 1;
            query.push_str(&format!(" AND is_owner = ${param_count}"));
        }
    }

    fn bind_filter_values<'q, O>(
        mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
        filter: &'q MembershipFilter,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        if let Some(group_id) = filter.group_id {
            q = q.bind(*group_id.as_uuid());
        }
        if let Some(ref group_ids) = filter.group_ids {
            let ids: Vec<Uuid> = group_ids.iter().map(|id| *id.as_uuid()).collect();
            q = q.bind(ids);
        }
        if let Some(person_id) = filter.person_id {
            q = q.bind(*person_id.as_uuid());
        }
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(ref statuses) = filter.statuses {
            q = q.bind(statuses);
        }
        if let Some(is_owner) = filter.is_owner {
            q = q.bind(is_owner);
        }
        q
    }

    /// Approve every pending membership of a group in one sweep.
    pub async fn approve_all_pending_for_group(
        pool: &PgPool,
        group_id: Uuid,
        approver_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'approved', approver_id = $2, updated_at = NOW()
            WHERE group_id = $1 AND status = 'pending'
            "#,
        )
        .bind(group_id)
        .bind(approver_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Decline every pending membership of a group in one sweep.
    pub async fn decline_all_pending_for_group(
        pool: &PgPool,
        group_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'declined', decline_reason = $2, updated_at = NOW()
            WHERE group_id = $1 AND status = 'pending'
            "#,
        )
        .bind(group_id)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every live membership of a person in one sweep.
    pub async fn revoke_all_for_person(
        pool: &PgPool,
        person_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'revoked', updated_at = NOW()
            WHERE person_id = $1 AND status IN ('pending', 'approved')
            "#,
        )
        .bind(person_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reset every approved membership of a group to pending in one sweep.
    pub async fn unapprove_all_for_group(
        pool: &PgPool,
        group_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'pending', approver_id = NULL, updated_at = NOW()
            WHERE group_id = $1 AND status = 'approved'
            "#,
        )
        .bind(group_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL-backed [`MembershipStore`].
#[derive(Debug, Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get(&self, id: MembershipId) -> Result<Option<Membership>, GovernanceError> {
        let row = MembershipRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_handle(
        &self,
        membership_id: &str,
    ) -> Result<Option<Membership>, GovernanceError> {
        let row = MembershipRow::find_by_handle(&self.pool, membership_id).await?;
        Ok(row.map(Into::into))
    }

    async fn find_live(
        &self,
        group_id: GroupId,
        person_id: PersonId,
    ) -> Result<Option<Membership>, GovernanceError> {
        let row =
            MembershipRow::find_live(&self.pool, *group_id.as_uuid(), *person_id.as_uuid())
                .await?;
        Ok(row.map(Into::into))
    }

    async fn insert(&self, membership: Membership) -> Result<Membership, GovernanceError> {
        let row = MembershipRow::insert(&self.pool, &membership).await.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("idx_memberships_one_live") {
                    return GovernanceError::MembershipExists;
                }
            }
            GovernanceError::Database(e)
        })?;
        Ok(row.into())
    }

    async fn set_status(
        &self,
        id: MembershipId,
        status: MembershipStatus,
        approver_id: Option<PersonId>,
        decline_reason: Option<String>,
    ) -> Result<Option<Membership>, GovernanceError> {
        let row = MembershipRow::set_status(
            &self.pool,
            *id.as_uuid(),
            status,
            approver_id.map(|id| *id.as_uuid()),
            decline_reason.as_deref(),
        )
        .await?;
        Ok(row.map(Into::into))
    }

    async fn unapprove(&self, id: MembershipId) -> Result<Option<Membership>, GovernanceError> {
        let row = MembershipRow::unapprove(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &MembershipFilter,
        options: &ListOptions,
    ) -> Result<Vec<Membership>, GovernanceError> {
        let rows = MembershipRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, filter: &MembershipFilter) -> Result<i64, GovernanceError> {
        let count = MembershipRow::count(&self.pool, filter).await?;
        Ok(count)
    }

    async fn approve_all_pending_for_group(
        &self,
        group_id: GroupId,
        approver_id: PersonId,
    ) -> Result<u64, GovernanceError> {
        let changed = MembershipRow::approve_all_pending_for_group(
            &self.pool,
            *group_id.as_uuid(),
            *approver_id.as_uuid(),
        )
        .await?;
        Ok(changed)
    }

    async fn decline_all_pending_for_group(
        &self,
        group_id: GroupId,
        reason: &str,
    ) -> Result<u64, GovernanceError> {
        let changed =
            MembershipRow::decline_all_pending_for_group(&self.pool, *group_id.as_uuid(), reason)
                .await?;
        Ok(changed)
    }

    async fn revoke_all_for_person(&self, person_id: PersonId) -> Result<u64, GovernanceError> {
        let changed =
            MembershipRow::revoke_all_for_person(&self.pool, *person_id.as_uuid()).await?;
        Ok(changed)
    }

    async fn unapprove_all_for_group(&self, group_id: GroupId) -> Result<u64, GovernanceError> {
        let changed =
            MembershipRow::unapprove_all_for_group(&self.pool, *group_id.as_uuid()).await?;
        Ok(changed)
    }
}
