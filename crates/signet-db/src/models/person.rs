//! Person rows and the PostgreSQL-backed person store.
//!
//! Permissions reach a person only through roles, so the store walks
//! `person_roles` and `role_permissions` for every label lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use signet_core::{PermissionId, PersonId, RoleId};
use signet_governance::services::catalog::ListOptions;
use signet_governance::services::person::{
    Permission, Person, PersonFilter, PersonStore, Role, UpdatePersonInput,
};
use signet_governance::types::PersonState;
use signet_governance::GovernanceError;

/// A row in the `persons` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonRow {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub email: String,
    pub state: PersonState,
    pub is_ops: bool,
    pub is_admin: bool,
    pub login_enabled: bool,
    pub avatar: Option<String>,
    pub offboard_date: Option<DateTime<Utc>>,
    pub revoker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Person {
            id: PersonId::from_uuid(row.id),
            username: row.username,
            name: row.name,
            email: row.email,
            state: row.state,
            is_ops: row.is_ops,
            is_admin: row.is_admin,
            login_enabled: row.login_enabled,
            avatar: row.avatar,
            offboard_date: row.offboard_date,
            revoker_id: row.revoker_id.map(PersonId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A row in the `permissions` table.
#[derive(Debug, Clone, FromRow)]
pub struct PermissionRow {
    pub id: Uuid,
    pub label: String,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: PermissionId::from_uuid(row.id),
            label: row.label,
        }
    }
}

impl PersonRow {
    /// Find a person by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM persons
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find a person by username.
    pub async fn find_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM persons
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    /// Find a person by email.
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM persons
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Find every person whose email is in the given set.
    pub async fn find_by_emails(
        pool: &PgPool,
        emails: &[String],
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM persons
            WHERE email = ANY($1)
            ORDER BY username
            "#,
        )
        .bind(emails)
        .fetch_all(pool)
        .await
    }

    /// Insert a new person.
    pub async fn insert(pool: &PgPool, person: &Person) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO persons (
                id, username, name, email, state, is_ops, is_admin,
                login_enabled, avatar, offboard_date, revoker_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(person.id.as_uuid())
        .bind(&person.username)
        .bind(&person.name)
        .bind(&person.email)
        .bind(person.state)
        .bind(person.is_ops)
        .bind(person.is_admin)
        .bind(person.login_enabled)
        .bind(&person.avatar)
        .bind(person.offboard_date)
        .bind(person.revoker_id.map(|id| *id.as_uuid()))
        .bind(person.created_at)
        .bind(person.updated_at)
        .fetch_one(pool)
        .await
    }

    /// Apply a partial update. Fields left `None` keep their value.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        input: &UpdatePersonInput,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE persons
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                state = COALESCE($4, state),
                login_enabled = COALESCE($5, login_enabled),
                offboard_date = COALESCE($6, offboard_date),
                revoker_id = COALESCE($7, revoker_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.state)
        .bind(input.login_enabled)
        .bind(input.offboard_date)
        .bind(input.revoker_id.map(|id| *id.as_uuid()))
        .fetch_optional(pool)
        .await
    }

    /// List persons with filtering and pagination.
    pub async fn list(
        pool: &PgPool,
        filter: &PersonFilter,
        options: &ListOptions,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM persons
            WHERE 1 = 1
            "#,
        );
        let mut param_count = 0;

        if filter.state.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND state = ${param_count}"));
        }
        if filter.is_ops.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND is_ops = ${param_count}"));
        }

        query.push_str(&format!(
            " ORDER BY username LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut q = sqlx::query_as::<_, PersonRow>(&query);
        if let Some(state) = filter.state {
            q = q.bind(state);
        }
        if let Some(is_ops) = filter.is_ops {
            q = q.bind(is_ops);
        }

        q.bind(options.limit)
            .bind(options.offset)
            .fetch_all(pool)
            .await
    }

    /// Every active person holding the given permission label.
    pub async fn active_with_permission(
        pool: &PgPool,
        label: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT DISTINCT p.* FROM persons p
            JOIN person_roles pr ON pr.person_id = p.id
            JOIN role_permissions rp ON rp.role_id = pr.role_id
            JOIN permissions perm ON perm.id = rp.permission_id
            WHERE perm.label = $1 AND p.state = 'active'
            ORDER BY p.username
            "#,
        )
        .bind(label)
        .fetch_all(pool)
        .await
    }
}

/// PostgreSQL-backed [`PersonStore`].
#[derive(Debug, Clone)]
pub struct PgPersonStore {
    pool: PgPool,
}

impl PgPersonStore {
    /// Create a new store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PersonStore for PgPersonStore {
    async fn get(&self, id: PersonId) -> Result<Option<Person>, GovernanceError> {
        let row = PersonRow::find_by_id(&self.pool, *id.as_uuid()).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Person>, GovernanceError> {
        let row = PersonRow::find_by_username(&self.pool, username).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Person>, GovernanceError> {
        let row = PersonRow::find_by_email(&self.pool, email).await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_emails(&self, emails: &[String]) -> Result<Vec<Person>, GovernanceError> {
        let rows = PersonRow::find_by_emails(&self.pool, emails).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert(&self, person: Person) -> Result<Person, GovernanceError> {
        let row = PersonRow::insert(&self.pool, &person).await?;
        Ok(row.into())
    }

    async fn update(
        &self,
        id: PersonId,
        input: UpdatePersonInput,
    ) -> Result<Option<Person>, GovernanceError> {
        let row = PersonRow::update(&self.pool, *id.as_uuid(), &input).await?;
        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        filter: &PersonFilter,
        options: &ListOptions,
    ) -> Result<Vec<Person>, GovernanceError> {
        let rows = PersonRow::list(&self.pool, filter, options).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_permission(&self, label: &str) -> Result<Permission, GovernanceError> {
        // Upsert keeps the existing row and its id when the label is taken.
        let row: PermissionRow = sqlx::query_as(
            r#"
            INSERT INTO permissions (id, label)
            VALUES ($1, $2)
            ON CONFLICT (label) DO UPDATE SET label = EXCLUDED.label
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(label)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn create_role(
        &self,
        label: &str,
        permission_ids: Vec<PermissionId>,
    ) -> Result<Role, GovernanceError> {
        let role_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO roles (id, label)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        for permission_id in &permission_ids {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(role_id)
            .bind(permission_id.as_uuid())
            .execute(&self.pool)
            .await?;
        }

        Ok(Role {
            id: RoleId::from_uuid(role_id),
            label: label.to_string(),
            permission_ids,
        })
    }

    async fn assign_role(&self, person_id: PersonId, role_id: RoleId) -> Result<(), GovernanceError> {
        sqlx::query(
            r#"
            INSERT INTO person_roles (person_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(person_id.as_uuid())
        .bind(role_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn permission_labels(&self, person_id: PersonId) -> Result<Vec<String>, GovernanceError> {
        let labels: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT perm.label FROM permissions perm
            JOIN role_permissions rp ON rp.permission_id = perm.id
            JOIN person_roles pr ON pr.role_id = rp.role_id
            WHERE pr.person_id = $1
            ORDER BY perm.label
            "#,
        )
        .bind(person_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }

    async fn active_with_permission(&self, label: &str) -> Result<Vec<Person>, GovernanceError> {
        let rows = PersonRow::active_with_permission(&self.pool, label).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
