//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! billing engine test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data and in-memory service wiring
//! - `builders`: Builder patterns for test data construction
//! - `database`: Postgres container management for adapter tests
//! - `assertions`: Assertions over reconciliation and ledger invariants
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
