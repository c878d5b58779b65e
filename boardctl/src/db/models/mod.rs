//! Database record models matching table schemas.
//!
//! Struct definitions that directly correspond to database table rows,
//! used by repositories to return query results and accept insertion or
//! update data.
//!
//! # Design Principles
//!
//! - **Schema Mapping**: Each `*DBResponse` struct matches a table schema
//! - **SQLx Integration**: Response models derive `sqlx::FromRow` so the
//!   runtime `query_as` API can map `SELECT *` results
//! - **Separation**: Database models are distinct from API models to allow
//!   independent evolution of storage and API representations
//!
//! # Model Categories
//!
//! - [`users`]: User accounts provisioned by the identity layer
//! - [`reports`]: Report aggregate, its sections and append-only event log
//! - [`cards`]: Cards (manual or materialized from analysis) and report links
//! - [`quotas`]: Quota defaults, per-user overrides and the daily usage ledger

pub mod cards;
pub mod quotas;
pub mod reports;
pub mod users;
