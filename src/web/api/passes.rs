use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::config::Permission;
use crate::engine::Prediction;
use crate::predict::{ElementSetId, GroundStation, Pass, PredictError};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

const MAX_DAYS: u32 = 14;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PassesQuery {
    /// Listing length in days, 1 to 14. Defaults to the configured lookahead.
    #[serde(default)]
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassesResponse {
    pub satellite: String,
    pub element_set: ElementSetId,
    pub station: GroundStation,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub passes: Vec<Pass>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextPassResponse {
    pub satellite: String,
    pub element_set: ElementSetId,
    pub pass: Pass,
    /// Seconds from the request until rise; negative while the pass is up.
    pub rises_in_seconds: i64,
}

async fn prediction(state: &AppState) -> ApiResult<Prediction> {
    Ok(state.engine.lock().await.prediction()?)
}

async fn run_scan<T, F>(scan: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PredictError> + Send + 'static,
{
    tokio::task::spawn_blocking(scan)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

#[utoipa::path(
    get,
    path = "/api/passes",
    tag = "passes",
    params(PassesQuery),
    responses(
        (status = 200, description = "Passes in the requested window", body = PassesResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Insufficient permissions"),
        (status = 503, description = "No element set loaded yet", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn list_passes(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<PassesQuery>,
) -> ApiResult<impl IntoResponse> {
    require_permission(&user, Permission::ViewPasses)?;

    let window = match query.days {
        Some(days) if (1..=MAX_DAYS).contains(&days) => Duration::days(days as i64),
        Some(days) => {
            return Err(ApiError::Validation(format!(
                "days must be between 1 and {MAX_DAYS}, got {days}"
            )))
        }
        None => state.config.predict.lookahead,
    };

    let prediction = prediction(&state).await?;
    let from = Utc::now();
    let to = from + window;
    let satellite = prediction.state.display_name();
    let element_set = prediction.state.id;
    let station = prediction.station.clone();

    let passes = run_scan(move || prediction.passes_between(from, to)).await?;

    Ok(Json(PassesResponse {
        satellite,
        element_set,
        station,
        from,
        to,
        passes,
    }))
}

#[utoipa::path(
    get,
    path = "/api/passes/next",
    tag = "passes",
    responses(
        (status = 200, description = "The next complete pass", body = NextPassResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "No pass within the propagation horizon", body = ErrorResponse),
        (status = 503, description = "No element set loaded yet", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
pub async fn next_pass(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    require_permission(&user, Permission::ViewPasses)?;

    let prediction = prediction(&state).await?;
    let now = Utc::now();
    let satellite = prediction.state.display_name();
    let element_set = prediction.state.id;

    let pass = run_scan(move || prediction.next_passes(now, 1))
        .await?
        .into_iter()
        .next()
        .ok_or(ApiError::NotFound("no_pass_found"))?;

    Ok(Json(NextPassResponse {
        satellite,
        element_set,
        rises_in_seconds: (pass.rise - now).num_seconds(),
        pass,
    }))
}
