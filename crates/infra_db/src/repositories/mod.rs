//! Repository implementations
//!
//! Repositories own the SQL and the row types. They return rows and
//! `DatabaseError`; mapping to domain types happens in `adapters`.

pub mod billing;
