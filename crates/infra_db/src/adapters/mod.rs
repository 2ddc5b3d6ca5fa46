//! Domain Adapters
//!
//! Implementations of the billing domain ports backed by PostgreSQL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::{PostgresBillingReads, PostgresBillingStore};
//! use domain_billing::{BillingService, BillingSettings};
//! use std::sync::Arc;
//!
//! let service = BillingService::new(
//!     Arc::new(PostgresBillingReads::new(pool.clone())),
//!     Arc::new(PostgresBillingStore::new(pool)),
//!     BillingSettings::default(),
//! );
//! ```

pub mod billing;

pub use billing::{PgBillingTx, PostgresBillingReads, PostgresBillingStore};
