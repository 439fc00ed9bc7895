//! Route and stop operations built on top of [`TimetableStore`]: input
//! validation, ordered lookups, cascading deletes and the assembled route view.

use shared::{RouteView, StopUpdate};

use crate::eta;
use crate::models::{
    Coordinate, NewRoute, Route, RouteId, RouteUpdate, StopFields, StopId, TimetableEntry,
};
use crate::store::{StoreError, TimetableStore, WriteBatch};

pub const MIN_ROUTE_NAME_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("route name must have at least 3 characters")]
    RouteNameTooShort,
    #[error("route must run on at least one day")]
    NoServiceDays,
    #[error("stop name is required")]
    EmptyStopLabel,
    #[error("at least one departure time is required")]
    NoTimes,
    #[error("distance {0:?} is not a number")]
    InvalidDistance(String),
    #[error("distance cannot be negative")]
    NegativeDistance,
}

/// Split comma-separated departure times, trimming and dropping empties.
pub fn parse_times(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|time| !time.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a kilometer value typed by an admin.
pub fn parse_distance_km(text: &str) -> Result<f64, ValidationError> {
    let km: f64 = text
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidDistance(text.to_string()))?;
    if !km.is_finite() {
        return Err(ValidationError::InvalidDistance(text.to_string()));
    }
    if km < 0.0 {
        return Err(ValidationError::NegativeDistance);
    }
    Ok(km)
}

pub fn stop_label(text: &str) -> Result<String, ValidationError> {
    let label = text.trim();
    if label.is_empty() {
        return Err(ValidationError::EmptyStopLabel);
    }
    Ok(label.to_string())
}

pub fn stop_times(text: &str) -> Result<Vec<String>, ValidationError> {
    let times = parse_times(text);
    if times.is_empty() {
        return Err(ValidationError::NoTimes);
    }
    Ok(times)
}

fn route_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.chars().count() < MIN_ROUTE_NAME_LEN {
        return Err(ValidationError::RouteNameTooShort);
    }
    Ok(name.to_string())
}

fn route_number(number: Option<String>) -> Option<String> {
    number
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

pub fn validate_new_route(route: NewRoute) -> Result<NewRoute, ValidationError> {
    if route.days.is_empty() {
        return Err(ValidationError::NoServiceDays);
    }
    Ok(NewRoute {
        number: route_number(route.number),
        name: route_name(&route.name)?,
        days: route.days,
    })
}

pub fn validate_route_update(update: RouteUpdate) -> Result<RouteUpdate, ValidationError> {
    if update.days.as_ref().is_some_and(|days| days.is_empty()) {
        return Err(ValidationError::NoServiceDays);
    }
    Ok(RouteUpdate {
        number: update.number.map(route_number),
        name: update.name.as_deref().map(route_name).transpose()?,
        days: update.days,
    })
}

/// Label and times of a stop edit. Segment fields are never part of an edit.
pub fn validate_stop_update(update: StopUpdate) -> Result<StopFields, ValidationError> {
    Ok(StopFields {
        stop: update.stop.as_deref().map(stop_label).transpose()?,
        times: update.times.as_deref().map(stop_times).transpose()?,
    })
}

/// The stop a newly appended stop would follow.
pub async fn last_stop(
    store: &dyn TimetableStore,
    route: RouteId,
) -> Result<Option<TimetableEntry>, StoreError> {
    Ok(store.stops_desc(route, 1).await?.into_iter().next())
}

/// Delete a route and all of its stops in one atomic batch.
///
/// Returns the number of stops removed along with the route.
pub async fn delete_route(store: &dyn TimetableStore, route: RouteId) -> Result<usize, StoreError> {
    let stops = store.stops(route).await?;
    let mut batch = WriteBatch::new();
    for entry in &stops {
        batch.delete_stop(route, entry.id);
    }
    batch.delete_route(route);

    store.commit(batch).await?;
    tracing::info!("Route {} deleted with {} stop(s)", route, stops.len());
    Ok(stops.len())
}

/// Delete one stop. Neighbouring segments are left as they are.
///
/// Returns `true` when the previous stop still carries a segment that led to
/// the deleted stop, i.e. when the route path now has a stale piece.
pub async fn delete_stop(
    store: &dyn TimetableStore,
    route: RouteId,
    stop: StopId,
) -> Result<bool, StoreError> {
    let stops = store.stops(route).await?;
    let position = stops
        .iter()
        .position(|entry| entry.id == stop)
        .ok_or(StoreError::StopNotFound { route, stop })?;

    store.delete_stop(route, stop).await?;

    let stale = position > 0 && stops[position - 1].has_segment();
    if stale {
        tracing::warn!(
            "Stop {} removed from route {}; segment stored on stop {} still leads to it",
            stop,
            route,
            stops[position - 1].id
        );
    } else {
        tracing::info!("Stop {} removed from route {}", stop, route);
    }
    Ok(stale)
}

/// The full path of a route: every stop's path to the next one, in order.
///
/// A joint point repeated at the start of the following piece is kept once.
pub fn route_path(stops: &[TimetableEntry]) -> Vec<Coordinate> {
    let mut path: Vec<Coordinate> = Vec::new();
    for geometry in stops.iter().filter_map(|entry| entry.route_geometry.as_ref()) {
        let skip = match (path.last(), geometry.first()) {
            (Some(last), Some(first)) if last == first => 1,
            _ => 0,
        };
        path.extend(geometry.iter().skip(skip).copied());
    }
    path
}

pub async fn route_view(
    store: &dyn TimetableStore,
    route: RouteId,
    speed_kmh: f64,
) -> Result<RouteView, StoreError> {
    let route: Route = store.route(route).await?;
    let stops = store.stops(route.id).await?;
    Ok(RouteView {
        path: route_path(&stops),
        total_distance_m: eta::total_distance_m(&stops),
        arrival_offsets: eta::arrival_offsets(&stops, speed_kmh),
        route,
        stops,
    })
}
