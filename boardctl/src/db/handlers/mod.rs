//! Repository implementations for each entity.
//!
//! Each repository wraps a `&mut SqliteConnection` so it can run against a
//! pooled connection or inside a caller-owned transaction. CRUD goes through
//! the [`Repository`] trait; entity-specific queries (ownership-scoped
//! fetches, conditional status transitions, the quota ledger) are inherent
//! methods.

pub mod cards;
pub mod quotas;
pub mod reports;
pub mod repository;
pub mod users;

pub use cards::Cards;
pub use quotas::Quotas;
pub use reports::Reports;
pub use repository::Repository;
pub use users::Users;
