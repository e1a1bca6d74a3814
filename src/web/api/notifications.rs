use axum::{extract::State, response::IntoResponse, Json};

use crate::config::Permission;
use crate::scheduler::NotificationRecord;
use crate::web::api::error::ApiResult;
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    responses(
        (status = 200, description = "Pending and fired notifications ordered by fire time", body = Vec<NotificationRecord>),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Insufficient permissions")
    ),
    security(("api_key" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    require_permission(&user, Permission::ViewPasses)?;
    Ok(Json(state.engine.lock().await.notifications()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::state;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn empty_before_first_reconcile() {
        let user = AuthenticatedUser {
            name: "viewer".into(),
            permissions: [Permission::ViewPasses].into_iter().collect(),
        };
        let response = list_notifications(State(state()), user).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"[]");
    }
}
