//! Billing Engine Command Line
//!
//! Wires configuration, tracing and the Postgres adapters into a
//! [`BillingService`] and exposes the operator commands.

pub mod cli;
pub mod config;
pub mod telemetry;

use std::sync::Arc;

use domain_billing::{BillingService, BillingSettings};
use infra_db::{DatabasePool, PostgresBillingReads, PostgresBillingStore};

/// Builds the service over the Postgres read and write adapters
pub fn build_service(pool: DatabasePool, settings: BillingSettings) -> BillingService {
    BillingService::new(
        Arc::new(PostgresBillingReads::new(pool.clone())),
        Arc::new(PostgresBillingStore::new(pool)),
        settings,
    )
}
