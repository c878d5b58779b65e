//! API request and response models.

pub mod cards;
pub mod pagination;
pub mod quotas;
pub mod reports;
pub mod users;
