//! Append-only Audit / Evidence Store (spec §4.6): every `Classification`
//! and the `AuditStep`s that produced it, persisted to SQLite and never
//! mutated once written.

mod schema;
mod store;

pub use schema::SCHEMA_VERSION;
pub use store::AuditStore;
