//! PostgreSQL persistence for the signet access governance engine.
//!
//! This crate supplies the database layer: a connection pool, embedded
//! migrations, and PostgreSQL-backed implementations of every store
//! trait signet-governance defines. Services stay agnostic of the
//! backend; swapping the in-memory stores for these is a constructor
//! change.
//!
//! # Usage
//!
//! ```no_run
//! use signet_db::{run_migrations, DbPool};
//!
//! # async fn example() -> Result<(), signet_db::DbError> {
//! let pool = DbPool::connect("postgres://localhost/signet").await?;
//! run_migrations(&pool).await?;
//!
//! let persons = signet_db::PgPersonStore::new(pool.inner().clone());
//! # Ok(())
//! # }
//! ```
//!
//! Uniqueness rules the domain cares about live in the schema as
//! (partial) unique indexes; the store implementations translate those
//! violations back into domain conflicts.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use models::{
    PgAccessRequestStore, PgAuditStore, PgEntitlementStore, PgGroupAccessRequestStore,
    PgGroupStore, PgIdentityStore, PgMembershipStore, PgPersonStore,
};
pub use pool::{DbConfig, DbPool};
