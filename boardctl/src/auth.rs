//! Request identity extraction.
//!
//! The service trusts a fronting proxy to authenticate callers and inject
//! their email address in a configurable header. The [`CurrentUser`] extractor
//! resolves that email to a user row, auto-provisioning one when
//! `auth.auto_create_users` is enabled. There is no other authentication
//! mechanism; a missing or unknown header is a 401.

use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::{Error, Result},
};

/// Extract user from the proxy identity header if present.
///
/// Returns:
/// - None: header absent
/// - Some(Ok(user)): header resolved to a user
/// - Some(Err(error)): header present but lookup or creation failed
#[instrument(skip(parts, config, db))]
async fn try_proxy_header_auth(
    parts: &Parts,
    config: &crate::config::Config,
    db: &SqlitePool,
) -> Option<Result<CurrentUser>> {
    let user_email = match parts
        .headers
        .get(&config.auth.header_name)
        .and_then(|h| h.to_str().ok())
    {
        Some(email) => email,
        None => return None,
    };

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };
    let mut user_repo = Users::new(&mut conn);

    match user_repo.get_user_by_email(user_email).await {
        Ok(Some(user)) => Some(Ok(CurrentUser::from(user))),
        Ok(None) => {
            if config.auth.auto_create_users {
                let create_request = UserCreateDBRequest {
                    username: user_email.to_string(),
                    email: user_email.to_string(),
                    display_name: None,
                    is_admin: false,
                    auth_source: "proxy-header".to_string(),
                };

                match user_repo.create(&create_request).await {
                    Ok(new_user) => {
                        debug!("Auto-provisioned user {} from proxy header", new_user.id);
                        Some(Ok(CurrentUser::from(new_user)))
                    }
                    Err(e) => Some(Err(Error::Database(e))),
                }
            } else {
                Some(Err(Error::Unauthenticated {
                    message: Some("Unknown user".to_string()),
                }))
            }
        }
        Err(e) => Some(Err(Error::Database(e))),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts, &state.config, &state.db).await {
            Some(Ok(user)) => {
                debug!("Authenticated user {} via proxy header", user.id);
                Ok(user)
            }
            Some(Err(e)) => Err(e),
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}

/// Guard for admin-only handlers.
pub fn require_admin(user: &CurrentUser) -> Result<()> {
    if user.is_admin {
        Ok(())
    } else {
        Err(Error::Forbidden {
            message: "Administrator access required".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::Request;
    use sqlx::SqlitePool;

    fn parts_with_header(name: &str, value: &str) -> Parts {
        let request = Request::builder()
            .uri("/api/v1/reports")
            .header(name, value)
            .body(())
            .unwrap();
        request.into_parts().0
    }

    fn parts_without_headers() -> Parts {
        let request = Request::builder().uri("/api/v1/reports").body(()).unwrap();
        request.into_parts().0
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_header_is_not_an_auth_attempt(pool: SqlitePool) {
        let config = Config::default();
        let parts = parts_without_headers();

        let outcome = try_proxy_header_auth(&parts, &config, &pool).await;
        assert!(outcome.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_auto_creates_unknown_user(pool: SqlitePool) {
        let config = Config::default();
        let parts = parts_with_header(&config.auth.header_name, "new@example.com");

        let user = try_proxy_header_auth(&parts, &config, &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.email, "new@example.com");
        assert!(!user.is_admin);

        // Second request resolves to the same row
        let again = try_proxy_header_auth(&parts, &config, &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, user.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_user_rejected_when_auto_create_disabled(pool: SqlitePool) {
        let mut config = Config::default();
        config.auth.auto_create_users = false;
        let parts = parts_with_header(&config.auth.header_name, "stranger@example.com");

        let err = try_proxy_header_auth(&parts, &config, &pool)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_require_admin() {
        let mut user = CurrentUser {
            id: uuid::Uuid::new_v4(),
            username: "u".to_string(),
            email: "u@example.com".to_string(),
            display_name: None,
            is_admin: false,
        };
        assert!(require_admin(&user).is_err());
        user.is_admin = true;
        assert!(require_admin(&user).is_ok());
    }
}
