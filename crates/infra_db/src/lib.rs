//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the billing engine using SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern. `repositories` owns the SQL and
//! the row types; `adapters` implements the billing domain ports on top of
//! them and translates errors into `PortError`.
//!
//! # Soft deletes and idempotency
//!
//! Payments and finance entries are never removed, only stamped with
//! `deleted_at`. Every natural key the engine relies on (rule + month,
//! movement, invoice mirror, legacy payment, ledger source) is a partial
//! unique index over live rows, and keyed inserts use
//! `ON CONFLICT DO NOTHING` so a repeat reports `AlreadyExists`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig};
//! use infra_db::adapters::{PostgresBillingReads, PostgresBillingStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/billing")).await?;
//! run_migrations(&pool).await?;
//! let reads = PostgresBillingReads::new(pool.clone());
//! let store = PostgresBillingStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PgBillingTx, PostgresBillingReads, PostgresBillingStore};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
