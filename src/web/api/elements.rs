use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::Permission;
use crate::engine::RefreshOutcome;
use crate::predict::{ElementSetId, OrbitalState};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

#[derive(Debug, Serialize, ToSchema)]
pub struct ElementSetSummary {
    pub id: ElementSetId,
    pub satellite: String,
    pub norad_id: u32,
    pub epoch: DateTime<Utc>,
    /// Days between epoch and the request.
    pub age_days: f64,
    pub loaded_at: Option<DateTime<Utc>>,
    pub lines: Vec<String>,
}

impl ElementSetSummary {
    fn new(state: &OrbitalState, loaded_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let (line1, line2) = state.to_tle_lines();
        Self {
            id: state.id,
            satellite: state.display_name(),
            norad_id: state.norad_id,
            epoch: state.epoch,
            age_days: state.days_since_epoch(now),
            loaded_at,
            lines: vec![line1, line2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Replaced,
    Unchanged,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitElementsResponse {
    pub outcome: SubmitOutcome,
    pub element_set: ElementSetSummary,
    /// Whether the text was also written to the configured element file.
    pub persisted: bool,
}

#[utoipa::path(
    get,
    path = "/api/elements",
    tag = "elements",
    responses(
        (status = 200, description = "Element set in use", body = ElementSetSummary),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Insufficient permissions"),
        (status = 503, description = "No element set loaded yet", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn current_elements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    require_permission(&user, Permission::ViewPasses)?;

    let engine = state.engine.lock().await;
    let current = engine.prediction()?.state;
    Ok(Json(ElementSetSummary::new(
        &current,
        engine.loaded_at(),
        Utc::now(),
    )))
}

/// Replace the element set. Notifications are re-keyed on the next tick.
#[utoipa::path(
    post,
    path = "/api/elements",
    tag = "elements",
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 200, description = "Element set accepted", body = SubmitElementsResponse),
        (status = 400, description = "Text was rejected before", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Insufficient permissions"),
        (status = 422, description = "Invalid element set", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn submit_elements(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: String,
) -> ApiResult<impl IntoResponse> {
    require_permission(&user, Permission::SubmitElements)?;

    let now = Utc::now();
    let (outcome, summary) = {
        let mut engine = state.engine.lock().await;
        let outcome = match engine.refresh(&body, now)? {
            RefreshOutcome::Replaced { .. } => SubmitOutcome::Replaced,
            RefreshOutcome::Unchanged(_) => SubmitOutcome::Unchanged,
            RefreshOutcome::PreviouslyRejected => {
                return Err(ApiError::Validation(
                    "this element text was already rejected".into(),
                ))
            }
        };
        let current = engine.prediction()?.state;
        (outcome, ElementSetSummary::new(&current, engine.loaded_at(), now))
    };
    log::info!(
        "{} submitted element set {} ({:?})",
        user.name,
        summary.id,
        outcome
    );

    let persisted = match outcome {
        SubmitOutcome::Unchanged => false,
        SubmitOutcome::Replaced => {
            let path = &state.config.satellite.tle_file;
            match tokio::fs::write(path, body.as_bytes()).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Could not write {}: {}", path.display(), e);
                    false
                }
            }
        }
    };

    Ok(Json(SubmitElementsResponse {
        outcome,
        element_set: summary,
        persisted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::{current_iss_text, state};
    use axum::http::StatusCode;
    use axum::response::Response;

    fn user(permissions: &[Permission]) -> AuthenticatedUser {
        AuthenticatedUser {
            name: "tester".into(),
            permissions: permissions.iter().copied().collect(),
        }
    }

    fn admin() -> AuthenticatedUser {
        user(&[Permission::ViewPasses, Permission::SubmitElements])
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_requires_permission() {
        let text = current_iss_text(Utc::now());
        let response = submit_elements(State(state()), user(&[Permission::ViewPasses]), text)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_text_is_unprocessable() {
        let state = state();
        let text = current_iss_text(Utc::now()).replace("ISS (ZARYA)\n1 ", "ISS (ZARYA)\n1  ");
        let response = submit_elements(State(state.clone()), admin(), text.clone())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "invalid_element_set");

        let again = submit_elements(State(state), admin(), text)
            .await
            .into_response();
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_then_read_back() {
        let state = state();
        let text = current_iss_text(Utc::now());

        let response = submit_elements(State(state.clone()), admin(), text.clone())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["outcome"], "replaced");
        assert_eq!(body["element_set"]["norad_id"], 25544);

        let response = submit_elements(State(state.clone()), admin(), text)
            .await
            .into_response();
        assert_eq!(body_json(response).await["outcome"], "unchanged");

        let response = current_elements(State(state), user(&[Permission::ViewPasses]))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["satellite"], "ISS (ZARYA)");
        assert!(body["age_days"].as_f64().unwrap().abs() < 1.0);
        assert_eq!(body["lines"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn current_elements_without_load_is_unavailable() {
        let response = current_elements(State(state()), admin()).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
