//! Axum route handlers.

pub mod cards;
pub mod quotas;
pub mod reports;
pub mod users;
