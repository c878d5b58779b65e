//! HTTP API layer.
//!
//! Split into `handlers` (axum route handlers, including the report lifecycle
//! orchestration) and `models` (request/response DTOs with their conversions
//! from the database layer). Routes are wired up in `crate::build_router`.

pub mod handlers;
pub mod models;
