//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`UserId`]: User account identifier
//! - [`ReportId`]: Report identifier
//! - [`CardId`]: Card identifier
//!
//! Report event rows use a plain database-assigned integer ([`ReportEventId`])
//! because their ordering within a report matters and the autoincrement id is
//! the tie-breaker.

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type ReportId = Uuid;
pub type CardId = Uuid;
pub type ReportEventId = i64;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
