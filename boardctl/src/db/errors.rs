//! Database error types shared by the repository layer.
//!
//! Raw [`sqlx::Error`]s are classified into a small set of variants so the API
//! layer can map them onto HTTP status codes without inspecting driver
//! messages itself.

use thiserror::Error;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Resource not found")]
    NotFound,

    #[error("Unique constraint violation: {message}")]
    UniqueViolation { message: String },

    #[error("Foreign key constraint violation: {message}")]
    ForeignKeyViolation { message: String },

    #[error("Check constraint violation: {message}")]
    CheckViolation { message: String },

    #[error("Database error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DbError::UniqueViolation {
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation {
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation {
                        message: db_err.message().to_string(),
                    }
                } else {
                    DbError::Other(anyhow::anyhow!("Database error: {}", db_err))
                }
            }
            _ => DbError::Other(anyhow::anyhow!("Unexpected database error: {}", err)),
        }
    }
}

impl DbError {
    /// Human-readable message safe to return to API clients.
    ///
    /// SQLite reports constraint violations as `<KIND> constraint failed:
    /// <table>.<column>`, so the offending column is matched by substring.
    pub fn user_message(&self) -> String {
        match self {
            DbError::NotFound => "Resource not found".to_string(),
            DbError::UniqueViolation { message } => {
                if message.contains("users.email") {
                    "A user with this email already exists".to_string()
                } else if message.contains("users.username") {
                    "A user with this username already exists".to_string()
                } else {
                    "A resource with these details already exists".to_string()
                }
            }
            DbError::ForeignKeyViolation { .. } => {
                "Referenced resource does not exist".to_string()
            }
            DbError::CheckViolation { .. } => "Invalid value for this field".to_string(),
            DbError::Other(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_unique_email() {
        let err = DbError::UniqueViolation {
            message: "UNIQUE constraint failed: users.email".to_string(),
        };
        assert_eq!(err.user_message(), "A user with this email already exists");
    }

    #[test]
    fn test_user_message_unique_generic() {
        let err = DbError::UniqueViolation {
            message: "UNIQUE constraint failed: cards.id".to_string(),
        };
        assert_eq!(
            err.user_message(),
            "A resource with these details already exists"
        );
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NotFound));
    }
}
