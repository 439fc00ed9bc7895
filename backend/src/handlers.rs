// HTTP handlers for the timetable API.
// Public reads: routes, stops and the assembled route view.
// Admin writes: route/stop edits, the per-route stop draft and the segment repair.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use shared::{
    ApiError, ChooseRequest, DraftSnapshot, MarkRequest, MigrationReport, RouteView,
    SaveStopRequest, StopUpdate,
};

use crate::error::TimetableError;
use crate::migration;
use crate::models::{NewRoute, Route, RouteId, RouteUpdate, StopId, TimetableEntry};
use crate::timetable;
use crate::AppState;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// Convert any timetable error into an API error response
fn api_error(err: impl Into<TimetableError>) -> (StatusCode, Json<ApiError>) {
    let err = err.into();
    let status = err.status();
    if status.is_server_error() {
        tracing::error!("request failed: {err}");
    } else {
        tracing::debug!("request rejected ({status}): {err}");
    }
    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}

async fn require_route(state: &AppState, id: RouteId) -> ApiResult<Route> {
    state.store.route(id).await.map_err(api_error)
}

/// GET /api/routes - All routes, newest first
pub async fn list_routes(State(state): State<AppState>) -> ApiResult<Json<Vec<Route>>> {
    state.store.routes().await.map(Json).map_err(api_error)
}

/// POST /api/routes - Create a route
pub async fn create_route(
    State(state): State<AppState>,
    Json(payload): Json<NewRoute>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let route = timetable::validate_new_route(payload).map_err(api_error)?;
    let route = state.store.add_route(route).await.map_err(api_error)?;
    tracing::info!("Route created: {} (ID: {})", route.name, route.id);
    Ok((StatusCode::CREATED, Json(route)))
}

/// GET /api/routes/:id
pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<Route>> {
    require_route(&state, id).await.map(Json)
}

/// PATCH /api/routes/:id - Edit number, name or service days
pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
    Json(payload): Json<RouteUpdate>,
) -> ApiResult<Json<Route>> {
    let update = timetable::validate_route_update(payload).map_err(api_error)?;
    state
        .store
        .update_route(id, update)
        .await
        .map(Json)
        .map_err(api_error)
}

/// DELETE /api/routes/:id - Delete a route with all of its stops
pub async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<StatusCode> {
    timetable::delete_route(&*state.store, id)
        .await
        .map_err(api_error)?;
    state.drafts.discard(id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/routes/:id/stops - Stops in route order
pub async fn list_stops(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<Vec<TimetableEntry>>> {
    state.store.stops(id).await.map(Json).map_err(api_error)
}

/// PATCH /api/routes/:id/stops/:stop_id - Edit label or times
pub async fn update_stop(
    State(state): State<AppState>,
    Path((id, stop_id)): Path<(RouteId, StopId)>,
    Json(payload): Json<StopUpdate>,
) -> ApiResult<Json<TimetableEntry>> {
    let fields = timetable::validate_stop_update(payload).map_err(api_error)?;
    state
        .store
        .update_stop(id, stop_id, fields)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRemoved {
    /// The previous stop still holds a path to the removed stop.
    pub stale_segment: bool,
}

/// DELETE /api/routes/:id/stops/:stop_id
pub async fn delete_stop(
    State(state): State<AppState>,
    Path((id, stop_id)): Path<(RouteId, StopId)>,
) -> ApiResult<Json<StopRemoved>> {
    let stale_segment = timetable::delete_stop(&*state.store, id, stop_id)
        .await
        .map_err(api_error)?;
    Ok(Json(StopRemoved { stale_segment }))
}

/// GET /api/routes/:id/view - Route, stops, full path and travel estimates
pub async fn route_view(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<RouteView>> {
    timetable::route_view(&*state.store, id, state.settings.average_speed_kmh)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/routes/:id/draft
pub async fn draft(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<DraftSnapshot>> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    let builder = session.builder.lock().await;
    Ok(Json(builder.snapshot()))
}

/// POST /api/routes/:id/draft/mark - Map click: new stop first, waypoints after
pub async fn draft_mark(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
    Json(payload): Json<MarkRequest>,
) -> ApiResult<Json<DraftSnapshot>> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    let mut builder = session.builder.lock().await;
    builder.mark(payload.coords);
    Ok(Json(builder.snapshot()))
}

/// POST /api/routes/:id/draft/compute - Route from the last stop to the marked one
pub async fn draft_compute(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<DraftSnapshot>> {
    require_route(&state, id).await?;
    let previous = timetable::last_stop(&*state.store, id)
        .await
        .map_err(api_error)?;
    let session = state.drafts.session(id);
    let mut builder = session.builder.lock().await;
    builder
        .compute(previous.as_ref(), &*state.router)
        .await
        .map_err(api_error)?;
    Ok(Json(builder.snapshot()))
}

/// POST /api/routes/:id/draft/choose - Pick one of the presented alternatives
pub async fn draft_choose(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
    Json(payload): Json<ChooseRequest>,
) -> ApiResult<Json<DraftSnapshot>> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    let mut builder = session.builder.lock().await;
    builder.choose(payload.index).map_err(api_error)?;
    Ok(Json(builder.snapshot()))
}

/// POST /api/routes/:id/draft/reset
pub async fn draft_reset(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
) -> ApiResult<Json<DraftSnapshot>> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    let mut builder = session.builder.lock().await;
    builder.reset();
    Ok(Json(builder.snapshot()))
}

/// POST /api/routes/:id/draft/save - Append the drafted stop
pub async fn draft_save(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
    Json(payload): Json<SaveStopRequest>,
) -> ApiResult<(StatusCode, Json<TimetableEntry>)> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    let mut builder = session.builder.lock().await;
    let entry = builder
        .save(&*state.store, id, &payload)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct PlacesQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /api/routes/:id/draft/places?q= - Debounced address search.
/// Answers 204 when a newer search from the same draft replaced this one.
pub async fn draft_places(
    State(state): State<AppState>,
    Path(id): Path<RouteId>,
    Query(query): Query<PlacesQuery>,
) -> ApiResult<Response> {
    require_route(&state, id).await?;
    let session = state.drafts.session(id);
    match session.places.search(&query.q).await {
        Some(places) => Ok(Json(places).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/admin/migrate-segments - One-off segment repair
pub async fn migrate_segments(State(state): State<AppState>) -> ApiResult<Json<MigrationReport>> {
    migration::repair_segments(&*state.store)
        .await
        .map(Json)
        .map_err(api_error)
}
