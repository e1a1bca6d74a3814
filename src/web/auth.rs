use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, Permission};
use crate::engine::Engine;

#[derive(Clone)]
pub struct AuthenticatedUser {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

impl AuthenticatedUser {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Mutex<Engine>>,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidFormat,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "Invalid Authorization format"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug)]
pub struct PermissionError;

impl IntoResponse for PermissionError {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Insufficient permissions" })),
        )
            .into_response()
    }
}

/// The key of an `Authorization: Bearer <key>` header. The scheme name is
/// matched case-insensitively.
fn bearer_key(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuth)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    match value.split_once(' ') {
        Some((scheme, key)) if scheme.eq_ignore_ascii_case("bearer") && !key.trim().is_empty() => {
            Ok(key.trim())
        }
        _ => Err(AuthError::InvalidFormat),
    }
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = bearer_key(&parts.headers)?;
        let api_key = state
            .config
            .find_api_key(key)
            .ok_or(AuthError::InvalidKey)?;

        Ok(AuthenticatedUser {
            name: api_key.name.clone(),
            permissions: api_key.permissions.clone(),
        })
    }
}

pub fn require_permission(
    user: &AuthenticatedUser,
    permission: Permission,
) -> Result<(), PermissionError> {
    if user.has_permission(permission) {
        Ok(())
    } else {
        log::debug!("{} lacks {:?}", user.name, permission);
        Err(PermissionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::state;
    use axum::http::Request;

    async fn authenticate(header: Option<&str>) -> Result<AuthenticatedUser, AuthError> {
        let mut builder = Request::builder().uri("/api/passes");
        if let Some(value) = header {
            builder = builder.header("Authorization", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthenticatedUser::from_request_parts(&mut parts, &state()).await
    }

    #[tokio::test]
    async fn accepts_known_bearer_key() {
        let user = authenticate(Some("bearer viewer-key")).await.unwrap();
        assert_eq!(user.name, "viewer");
        assert!(require_permission(&user, Permission::ViewPasses).is_ok());
        assert!(require_permission(&user, Permission::SubmitElements).is_err());
    }

    #[tokio::test]
    async fn rejects_missing_malformed_and_unknown_keys() {
        assert!(matches!(authenticate(None).await, Err(AuthError::MissingAuth)));
        assert!(matches!(
            authenticate(Some("Token viewer-key")).await,
            Err(AuthError::InvalidFormat)
        ));
        assert!(matches!(
            authenticate(Some("Bearer ")).await,
            Err(AuthError::InvalidFormat)
        ));
        assert!(matches!(
            authenticate(Some("Bearer nope")).await,
            Err(AuthError::InvalidKey)
        ));
    }
}
