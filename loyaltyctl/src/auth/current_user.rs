use crate::{
    api::models::users::CurrentUser,
    db::handlers::Users,
    errors::{Error, Result},
    AppState,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

/// Read the caller's email from the trusted proxy header
fn proxy_header_email<'a>(parts: &'a Parts, header_name: &str) -> Result<&'a str> {
    let value = parts.headers.get(header_name).ok_or_else(|| Error::Unauthenticated {
        message: Some(format!("Missing {header_name} header")),
    })?;

    let email = value
        .to_str()
        .map_err(|_| Error::Unauthenticated {
            message: Some(format!("Invalid {header_name} header")),
        })?
        .trim();

    if email.is_empty() {
        return Err(Error::Unauthenticated {
            message: Some(format!("Empty {header_name} header")),
        });
    }
    Ok(email)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state), fields(path = %parts.uri.path()))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let proxy = &state.config.auth.proxy_header;
        if !proxy.enabled {
            return Err(Error::Unauthenticated {
                message: Some("No authentication method is enabled".to_string()),
            });
        }

        let email = proxy_header_email(parts, &proxy.header_name)?;
        trace!("Authenticating {}", email);

        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let user = Users::new(&mut conn).get_user_by_email(email).await?;

        match user {
            Some(user) if user.is_active => Ok(CurrentUser::from(user)),
            Some(_) => {
                debug!("Rejected deactivated user {}", email);
                Err(Error::Unauthenticated {
                    message: Some("User is deactivated".to_string()),
                })
            }
            None => {
                debug!("Rejected unknown user {}", email);
                Err(Error::Unauthenticated {
                    message: Some("Unknown user".to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{api::models::users::Role, test_utils::*};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_header_is_unauthenticated(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;

        let response = app.get("/api/v1/users/current").await;
        response.assert_status_unauthorized();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "unauthenticated");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_and_deactivated_users_are_rejected(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;

        let (header, _) = add_auth_headers(&create_test_user(&pool, Role::StandardUser).await);
        app.get("/api/v1/users/current")
            .add_header(header.clone(), "nobody@example.com")
            .await
            .assert_status_unauthorized();

        let user = create_test_user(&pool, Role::StandardUser).await;
        sqlx::query("UPDATE users SET is_active = false WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
        let (header, email) = add_auth_headers(&user);
        app.get("/api/v1/users/current")
            .add_header(header, email)
            .await
            .assert_status_unauthorized();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_known_user_is_resolved(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::StandardUser).await;
        let (header, email) = add_auth_headers(&user);

        let response = app.get("/api/v1/users/current").add_header(header, email).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["id"], user.id.to_string());
    }
}
