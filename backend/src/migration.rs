//! One-off repair of segment data saved on the wrong stop.
//!
//! Older admin builds stored the path from stop i-1 to stop i on stop i.
//! Segment data belongs on the departing stop, so misplaced data moves one
//! stop back and the arriving stop's copy is cleared. All moves of all routes
//! are committed as a single batch.

use shared::{MigrationReport, SegmentMove};

use crate::models::{Coordinate, RouteId, TimetableEntry};
use crate::routing::haversine_m;
use crate::store::{StoreError, TimetableStore, WriteBatch};

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("failed to read timetables: {0}")]
    Read(#[source] StoreError),
    #[error("segment repair rejected, nothing was changed: {0}")]
    Commit(#[source] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Empty,
    Placed,
    Misplaced,
}

/// Decide whether `entry`'s segment describes the way into it from `previous`.
///
/// With geometry and both stop positions known, the geometry's first point
/// tells which stop the path leaves from. Otherwise the data is treated as
/// misplaced only when `previous` has no segment of its own.
pub fn classify(previous: &TimetableEntry, entry: &TimetableEntry) -> Placement {
    if !entry.has_segment() {
        return Placement::Empty;
    }

    let start = entry
        .route_geometry
        .as_ref()
        .and_then(|geometry| geometry.first().copied());
    match (start, previous.coords, entry.coords) {
        (Some(start), Some(prev), Some(own)) => {
            if haversine_m(start, prev) < haversine_m(start, own) {
                Placement::Misplaced
            } else {
                Placement::Placed
            }
        }
        _ if previous.has_segment() => Placement::Placed,
        _ => Placement::Misplaced,
    }
}

/// Segment fields one stop must end up with.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentWrite {
    pub stop: TimetableEntry,
    pub geometry: Option<Vec<Coordinate>>,
    pub distance_to_next: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutePlan {
    pub moves: Vec<SegmentMove>,
    pub writes: Vec<SegmentWrite>,
}

/// Work out the moves for one route's stops, given in route order.
pub fn plan_route(route: RouteId, stops: &[TimetableEntry]) -> RoutePlan {
    let mut plan = RoutePlan::default();
    if stops.len() < 2 {
        return plan;
    }

    let mut working = stops.to_vec();
    for i in 1..working.len() {
        if classify(&working[i - 1], &working[i]) != Placement::Misplaced {
            continue;
        }
        if working[i - 1].has_segment() {
            tracing::warn!(
                "route {}: segment on stop {} overwritten by the one found on stop {}",
                route,
                working[i - 1].id,
                working[i].id
            );
        }

        let geometry = working[i].route_geometry.take();
        let distance = working[i].distance_to_next.take();
        working[i - 1].route_geometry = geometry;
        working[i - 1].distance_to_next = distance;
        plan.moves.push(SegmentMove {
            route_id: route,
            from_stop: working[i].id,
            to_stop: working[i - 1].id,
        });
    }

    plan.writes = working
        .into_iter()
        .zip(stops)
        .filter(|(after, before)| {
            after.route_geometry != before.route_geometry
                || after.distance_to_next != before.distance_to_next
        })
        .map(|(after, _)| SegmentWrite {
            geometry: after.route_geometry.clone(),
            distance_to_next: after.distance_to_next,
            stop: after,
        })
        .collect();
    plan
}

/// Scan every route and move misplaced segment data onto the departing stop.
///
/// Nothing is written when no move is needed, which also makes a second run
/// a no-op.
pub async fn repair_segments(store: &dyn TimetableStore) -> Result<MigrationReport, MigrationError> {
    let routes = store.routes().await.map_err(MigrationError::Read)?;
    let mut report = MigrationReport {
        routes_scanned: routes.len(),
        ..Default::default()
    };
    let mut batch = WriteBatch::new();

    for route in &routes {
        let stops = store.stops(route.id).await.map_err(MigrationError::Read)?;
        let plan = plan_route(route.id, &stops);
        if plan.moves.is_empty() {
            continue;
        }
        tracing::info!("route {}: {} segment(s) to move", route.id, plan.moves.len());
        for write in plan.writes {
            batch.set_segment(route.id, write.stop.id, write.geometry, write.distance_to_next);
        }
        report.moves.extend(plan.moves);
    }

    if report.moves.is_empty() {
        tracing::info!("nothing to migrate across {} route(s)", report.routes_scanned);
        return Ok(report);
    }

    store.commit(batch).await.map_err(MigrationError::Commit)?;
    report.committed = true;
    tracing::info!("moved {} segment(s)", report.moves.len());
    Ok(report)
}
