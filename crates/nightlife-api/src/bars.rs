use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use nightlife_types::api::{GoingResponse, SearchQuery};
use nightlife_types::models::{AugmentedVenue, Identity, UserSummary};

use crate::attendance::{GoerStatus, JoinOutcome, LeaveOutcome};
use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// GET /bars/search?location=...: provider venues with goer counts.
pub async fn search(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    WithRejection(Query(query), _): WithRejection<Query<SearchQuery>, ApiError>,
) -> ApiResult<Json<Vec<AugmentedVenue>>> {
    let location = query.location.unwrap_or_default();
    let venues = state.search.search(&location, &identity).await?;
    Ok(Json(venues))
}

/// POST /bars/{venue_id}/go: 201 when newly going, 200 when already going.
pub async fn go(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
    Extension(user): Extension<UserSummary>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.attendance.join(&venue_id, &user).await?;

    let (status, message) = match outcome {
        JoinOutcome::Joined(_) => (StatusCode::CREATED, "Added to goers list."),
        JoinOutcome::AlreadyGoing(_) => (StatusCode::OK, "Already going."),
    };
    Ok((status, Json(going_response(message, outcome.status()))))
}

/// DELETE /bars/{venue_id}/go: always 200; the message says whether
/// anything was removed.
pub async fn leave(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
    Extension(user): Extension<UserSummary>,
) -> ApiResult<Json<GoingResponse>> {
    let outcome = state.attendance.leave(&venue_id, &user).await?;

    let message = match outcome {
        LeaveOutcome::Left(_) => "Removed from goers list.",
        LeaveOutcome::WasNotGoing(_) => "You were not listed as going.",
    };
    Ok(Json(going_response(message, outcome.status())))
}

fn going_response(message: &str, status: GoerStatus) -> GoingResponse {
    GoingResponse {
        message: message.to_string(),
        goers_count: status.goers_count,
        is_user_going: status.is_caller_going,
    }
}
