//! Admin workflow that appends a stop to a route together with the road
//! segment leading to it.
//!
//! The segment is computed from the current last stop of the route, through
//! any manually clicked waypoints, to the newly marked stop. On save it is
//! stored on the previous stop as that stop's path to its next stop, in the
//! same batch that creates the new stop.
//!
//! ```text
//! Idle --mark--> StopMarked --compute--> RouteComputing
//!   RouteComputing --1 candidate or waypoints--> RouteComputed
//!   RouteComputing --n candidates--> AlternativesPresented --choose--> SegmentChosen
//!   any --reset/save--> Idle
//! ```

use shared::{DraftSnapshot, DraftState, SaveStopRequest};

use crate::eta::{km_to_meters, meters_to_km};
use crate::models::{AlternativeRoute, Coordinate, NewStop, RouteId, StopId, TimetableEntry};
use crate::routing::RoutingClient;
use crate::store::{StoreError, TimetableStore, WriteBatch};
use crate::timetable::{self, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("mark the new stop on the map first")]
    NoStopMarked,
    #[error("nothing to compute: this is the first stop of the route")]
    FirstStop,
    #[error("at least 2 points are needed to compute a route")]
    TooFewWaypoints,
    #[error("no route available between these points")]
    NoRouteAvailable,
    #[error("there are no alternative routes to choose from")]
    NoAlternatives,
    #[error("alternative route {0} does not exist")]
    UnknownAlternative(usize),
    #[error("compute the route from the previous stop before saving")]
    SegmentMissing,
    #[error("the last stop of the route changed since the route was computed; compute it again")]
    PreviousStopChanged,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A candidate picked for the segment, with the distance shown to the admin.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub candidate: AlternativeRoute,
    pub distance_km: f64,
    /// Stop the path was computed from; `None` for a route's first stop.
    pub departs_from: Option<StopId>,
}

impl Resolved {
    fn new(candidate: AlternativeRoute, departs_from: Option<StopId>) -> Self {
        let distance_km = meters_to_km(candidate.distance);
        Self {
            candidate,
            distance_km,
            departs_from,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
enum Phase {
    #[default]
    Idle,
    StopMarked,
    Computing,
    Computed(Resolved),
    Alternatives {
        candidates: Vec<AlternativeRoute>,
        departs_from: Option<StopId>,
    },
    Chosen(Resolved),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeOutcome {
    /// A single path was applied; kilometers with 3 decimals.
    Applied { distance_km: f64 },
    /// Several paths wait for [`SegmentBuilder::choose`].
    Alternatives(usize),
}

#[derive(Debug, Clone, Default)]
pub struct SegmentBuilder {
    new_stop: Option<Coordinate>,
    waypoints: Vec<Coordinate>,
    phase: Phase,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DraftState {
        match self.phase {
            Phase::Idle => DraftState::Idle,
            Phase::StopMarked => DraftState::StopMarked,
            Phase::Computing => DraftState::RouteComputing,
            Phase::Computed(_) => DraftState::RouteComputed,
            Phase::Alternatives { .. } => DraftState::AlternativesPresented,
            Phase::Chosen(_) => DraftState::SegmentChosen,
        }
    }

    pub fn new_stop(&self) -> Option<Coordinate> {
        self.new_stop
    }

    pub fn waypoints(&self) -> &[Coordinate] {
        &self.waypoints
    }

    pub fn alternatives(&self) -> &[AlternativeRoute] {
        match &self.phase {
            Phase::Alternatives { candidates, .. } => candidates,
            _ => &[],
        }
    }

    /// The path that will be saved, once computed or chosen.
    pub fn resolved(&self) -> Option<&Resolved> {
        match &self.phase {
            Phase::Computed(resolved) | Phase::Chosen(resolved) => Some(resolved),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            state: self.state(),
            new_stop: self.new_stop,
            waypoints: self.waypoints.clone(),
            alternatives: self.alternatives().to_vec(),
            geometry: self.resolved().map(|r| r.candidate.geometry.clone()),
            distance_km: self.resolved().map(|r| r.distance_km),
        }
    }

    /// Handle a map click.
    ///
    /// The first click marks the new stop. Later clicks add waypoints the path
    /// has to go through; the marker stays where it is and any computed path
    /// is dropped.
    pub fn mark(&mut self, coords: Coordinate) {
        if self.new_stop.is_none() {
            self.new_stop = Some(coords);
            self.waypoints.clear();
            tracing::debug!("new stop marked at {:.5},{:.5}", coords.lat, coords.lng);
        } else {
            self.waypoints.push(coords);
            tracing::debug!("waypoint {} added", self.waypoints.len());
        }
        self.phase = Phase::StopMarked;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Points sent to the routing service:
    /// previous stop (when it has coordinates), waypoints, new stop.
    pub fn waypoint_list(
        &self,
        previous: Option<&TimetableEntry>,
    ) -> Result<Vec<Coordinate>, BuilderError> {
        let new_stop = self.new_stop.ok_or(BuilderError::NoStopMarked)?;
        if previous.is_none() && self.waypoints.is_empty() {
            return Err(BuilderError::FirstStop);
        }

        let mut points = Vec::with_capacity(self.waypoints.len() + 2);
        points.extend(previous.and_then(|entry| entry.coords));
        points.extend(self.waypoints.iter().copied());
        points.push(new_stop);

        if points.len() < 2 {
            return Err(BuilderError::TooFewWaypoints);
        }
        Ok(points)
    }

    /// Ask the routing service for the path into the marked stop.
    ///
    /// Alternatives are only requested without manual waypoints. On failure
    /// the builder keeps its previous state so the admin can retry.
    pub async fn compute(
        &mut self,
        previous: Option<&TimetableEntry>,
        client: &dyn RoutingClient,
    ) -> Result<ComputeOutcome, BuilderError> {
        let points = self.waypoint_list(previous)?;
        let want_alternatives = self.waypoints.is_empty();
        let departs_from = previous.map(|entry| entry.id);

        let before = match std::mem::replace(&mut self.phase, Phase::Computing) {
            Phase::Computing => Phase::StopMarked,
            phase => phase,
        };
        let candidates = client
            .route(&points, want_alternatives)
            .await
            .filter(|candidates| !candidates.is_empty());
        let Some(mut candidates) = candidates else {
            self.phase = before;
            return Err(BuilderError::NoRouteAvailable);
        };

        if !want_alternatives || candidates.len() == 1 {
            let resolved = Resolved::new(candidates.swap_remove(0), departs_from);
            let distance_km = resolved.distance_km;
            tracing::debug!("route applied: {distance_km:.3} km");
            self.phase = Phase::Computed(resolved);
            Ok(ComputeOutcome::Applied { distance_km })
        } else {
            let count = candidates.len();
            tracing::debug!("{count} alternative routes presented");
            self.phase = Phase::Alternatives {
                candidates,
                departs_from,
            };
            Ok(ComputeOutcome::Alternatives(count))
        }
    }

    /// Pick one of the presented alternatives.
    pub fn choose(&mut self, index: usize) -> Result<&Resolved, BuilderError> {
        let Phase::Alternatives {
            candidates,
            departs_from,
        } = &self.phase
        else {
            return Err(BuilderError::NoAlternatives);
        };
        let candidate = candidates
            .get(index)
            .cloned()
            .ok_or(BuilderError::UnknownAlternative(index))?;

        self.phase = Phase::Chosen(Resolved::new(candidate, *departs_from));
        self.resolved().ok_or(BuilderError::NoAlternatives)
    }

    /// Validate the form and turn the draft into the writes that save it.
    pub fn prepare(
        &self,
        route: RouteId,
        previous: Option<&TimetableEntry>,
        request: &SaveStopRequest,
    ) -> Result<WriteBatch, BuilderError> {
        let coords = self.new_stop.ok_or(BuilderError::NoStopMarked)?;
        let resolved = self.resolved();
        if previous.is_some() && resolved.is_none() {
            return Err(BuilderError::SegmentMissing);
        }
        if let Some(resolved) = resolved {
            if resolved.departs_from != previous.map(|entry| entry.id) {
                return Err(BuilderError::PreviousStopChanged);
            }
        }

        let label = timetable::stop_label(&request.stop)?;
        let times = timetable::stop_times(&request.times)?;
        let distance_km = match request.distance_km.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(timetable::parse_distance_km(text)?),
            _ => resolved.map(|r| r.distance_km),
        };

        let mut batch = WriteBatch::new();
        batch.add_stop(
            route,
            NewStop {
                stop: label,
                times,
                coords: Some(coords),
            },
        );
        match (previous, resolved) {
            (Some(previous), Some(resolved)) => {
                batch.set_segment(
                    route,
                    previous.id,
                    Some(resolved.candidate.geometry.clone()),
                    distance_km.map(km_to_meters),
                );
            }
            (None, Some(_)) => {
                tracing::warn!("route {route} has no stop before the new one; computed path not stored");
            }
            _ => {}
        }
        Ok(batch)
    }

    /// Append the marked stop to `route` and store the segment leading to it.
    ///
    /// The builder returns to `Idle` only when the write succeeded.
    pub async fn save(
        &mut self,
        store: &dyn TimetableStore,
        route: RouteId,
        request: &SaveStopRequest,
    ) -> Result<TimetableEntry, BuilderError> {
        let previous = timetable::last_stop(store, route).await?;
        let batch = match self.prepare(route, previous.as_ref(), request) {
            Err(BuilderError::PreviousStopChanged) => {
                tracing::warn!("route {route} changed after its path was computed; path discarded");
                self.phase = Phase::StopMarked;
                return Err(BuilderError::PreviousStopChanged);
            }
            prepared => prepared?,
        };

        let outcome = store.commit(batch).await?;
        let entry = outcome.added_stops.into_iter().next().ok_or_else(|| {
            StoreError::InvalidData("batch did not report the new stop".to_string())
        })?;

        tracing::info!("Stop {} ({}) appended to route {}", entry.stop, entry.id, route);
        self.reset();
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{NewRoute, Weekday};
    use crate::store::MemoryStore;

    /// Hands out queued answers and records every request.
    #[derive(Default)]
    struct ScriptedRouter {
        answers: Mutex<VecDeque<Option<Vec<AlternativeRoute>>>>,
        calls: Mutex<Vec<(Vec<Coordinate>, bool)>>,
    }

    impl ScriptedRouter {
        fn answering(answers: Vec<Option<Vec<AlternativeRoute>>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<(Vec<Coordinate>, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoutingClient for ScriptedRouter {
        async fn route(
            &self,
            waypoints: &[Coordinate],
            want_alternatives: bool,
        ) -> Option<Vec<AlternativeRoute>> {
            self.calls
                .lock()
                .unwrap()
                .push((waypoints.to_vec(), want_alternatives));
            self.answers.lock().unwrap().pop_front().flatten()
        }
    }

    fn candidate(distance: f64, from: Coordinate, to: Coordinate) -> AlternativeRoute {
        let mid = Coordinate::new((from.lat + to.lat) / 2.0, (from.lng + to.lng) / 2.0 + distance / 1e6);
        AlternativeRoute {
            distance,
            geometry: vec![from, mid, to],
        }
    }

    fn save_request(label: &str, times: &str) -> SaveStopRequest {
        SaveStopRequest {
            stop: label.to_string(),
            times: times.to_string(),
            distance_km: None,
        }
    }

    async fn new_route(store: &MemoryStore) -> RouteId {
        store
            .add_route(NewRoute {
                number: Some("3G".into()),
                name: "Stotis - Santariškės".into(),
                days: [Weekday::Monday].into_iter().collect(),
            })
            .await
            .unwrap()
            .id
    }

    /// Route with one stop at (54.0, 25.0) already saved.
    async fn route_with_first_stop(store: &MemoryStore) -> (RouteId, TimetableEntry) {
        let route = new_route(store).await;
        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.0, 25.0));
        let first = builder
            .save(store, route, &save_request("Stotis", "06:00"))
            .await
            .unwrap();
        (route, first)
    }

    #[tokio::test]
    async fn test_single_candidate_is_applied_and_saved_on_previous_stop() {
        let store = MemoryStore::new();
        let (route, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![Some(vec![candidate(1234.0, a, b)])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        let outcome = builder.compute(Some(&first), &router).await.unwrap();
        assert_eq!(outcome, ComputeOutcome::Applied { distance_km: 1.234 });
        assert_eq!(builder.state(), DraftState::RouteComputed);
        assert_eq!(router.calls(), vec![(vec![a, b], true)]);

        let added = builder
            .save(&store, route, &save_request("Centras", "06:10, 07:10"))
            .await
            .unwrap();
        assert_eq!(builder.state(), DraftState::Idle);

        let previous = store.stop(route, first.id).await.unwrap();
        assert_eq!(previous.distance_to_next, Some(1234.0));
        assert!(!previous.route_geometry.unwrap().is_empty());

        let added = store.stop(route, added.id).await.unwrap();
        assert_eq!(added.times, vec!["06:10", "07:10"]);
        assert_eq!(added.coords, Some(b));
        assert!(!added.has_segment());
    }

    #[tokio::test]
    async fn test_alternatives_wait_for_a_choice() {
        let store = MemoryStore::new();
        let (route, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![Some(vec![
            candidate(1500.0, a, b),
            candidate(2345.0, a, b),
        ])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        let outcome = builder.compute(Some(&first), &router).await.unwrap();
        assert_eq!(outcome, ComputeOutcome::Alternatives(2));
        assert_eq!(builder.state(), DraftState::AlternativesPresented);
        assert_eq!(builder.alternatives().len(), 2);

        // Saving before choosing is refused.
        let refused = builder.save(&store, route, &save_request("Centras", "07:00")).await;
        assert!(matches!(refused, Err(BuilderError::SegmentMissing)));

        let chosen = builder.choose(1).unwrap();
        assert_eq!(chosen.distance_km, 2.345);
        assert_eq!(builder.state(), DraftState::SegmentChosen);
        assert!(builder.alternatives().is_empty());

        builder
            .save(&store, route, &save_request("Centras", "07:00"))
            .await
            .unwrap();
        let previous = store.stop(route, first.id).await.unwrap();
        assert_eq!(previous.distance_to_next, Some(2345.0));
        assert_eq!(previous.route_geometry, Some(candidate(2345.0, a, b).geometry));
    }

    #[tokio::test]
    async fn test_first_stop_needs_no_segment() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;
        let router = ScriptedRouter::default();

        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.0, 25.0));
        let refused = builder.compute(None, &router).await;
        assert!(matches!(refused, Err(BuilderError::FirstStop)));
        assert!(router.calls().is_empty());
        assert_eq!(builder.state(), DraftState::StopMarked);

        let entry = builder
            .save(&store, route, &save_request("Stotis", "05:45"))
            .await
            .unwrap();
        assert!(!entry.has_segment());
        assert_eq!(store.stops(route).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_segments_land_on_departing_stops() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;
        let points = [
            Coordinate::new(54.0, 25.0),
            Coordinate::new(54.01, 25.01),
            Coordinate::new(54.02, 25.02),
        ];
        let router = ScriptedRouter::answering(vec![
            Some(vec![candidate(1000.0, points[0], points[1])]),
            Some(vec![candidate(2000.0, points[1], points[2])]),
        ]);

        let mut builder = SegmentBuilder::new();
        for (i, point) in points.iter().enumerate() {
            let previous = timetable::last_stop(&store, route).await.unwrap();
            builder.mark(*point);
            if previous.is_some() {
                builder.compute(previous.as_ref(), &router).await.unwrap();
            }
            builder
                .save(&store, route, &save_request(&format!("Stop {i}"), "08:00"))
                .await
                .unwrap();
        }

        let stops = store.stops(route).await.unwrap();
        assert_eq!(stops[0].distance_to_next, Some(1000.0));
        assert_eq!(
            stops[0].route_geometry,
            Some(candidate(1000.0, points[0], points[1]).geometry)
        );
        assert_eq!(stops[1].distance_to_next, Some(2000.0));
        assert_eq!(
            stops[1].route_geometry,
            Some(candidate(2000.0, points[1], points[2]).geometry)
        );
        assert!(!stops[2].has_segment());
    }

    #[tokio::test]
    async fn test_waypoints_force_single_route() {
        let store = MemoryStore::new();
        let (_, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let w1 = Coordinate::new(54.03, 25.05);
        let w2 = Coordinate::new(54.06, 25.07);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![Some(vec![
            candidate(3000.0, a, b),
            candidate(3100.0, a, b),
        ])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.mark(w1);
        builder.mark(w2);
        assert_eq!(builder.new_stop(), Some(b));
        assert_eq!(builder.waypoints(), &[w1, w2]);

        let outcome = builder.compute(Some(&first), &router).await.unwrap();
        assert_eq!(outcome, ComputeOutcome::Applied { distance_km: 3.0 });
        assert_eq!(router.calls(), vec![(vec![a, w1, w2, b], false)]);
    }

    #[tokio::test]
    async fn test_first_stop_with_waypoints_computes_but_stores_nothing() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;
        let w = Coordinate::new(53.99, 24.99);
        let b = Coordinate::new(54.0, 25.0);
        let router = ScriptedRouter::answering(vec![Some(vec![candidate(800.0, w, b)])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.mark(w);
        builder.compute(None, &router).await.unwrap();
        assert_eq!(router.calls(), vec![(vec![w, b], false)]);

        let entry = builder
            .save(&store, route, &save_request("Stotis", "05:45"))
            .await
            .unwrap();
        assert!(!entry.has_segment());
    }

    #[tokio::test]
    async fn test_routing_failure_keeps_state() {
        let store = MemoryStore::new();
        let (_, first) = route_with_first_stop(&store).await;
        let router = ScriptedRouter::answering(vec![None, Some(Vec::new())]);

        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.1, 25.1));
        for _ in 0..2 {
            let result = builder.compute(Some(&first), &router).await;
            assert!(matches!(result, Err(BuilderError::NoRouteAvailable)));
            assert_eq!(builder.state(), DraftState::StopMarked);
            assert_eq!(builder.new_stop(), Some(Coordinate::new(54.1, 25.1)));
        }
    }

    #[tokio::test]
    async fn test_compute_requires_marker() {
        let store = MemoryStore::new();
        let (_, first) = route_with_first_stop(&store).await;
        let router = ScriptedRouter::default();

        let mut builder = SegmentBuilder::new();
        let result = builder.compute(Some(&first), &router).await;
        assert!(matches!(result, Err(BuilderError::NoStopMarked)));
        assert!(router.calls().is_empty());
    }

    #[tokio::test]
    async fn test_previous_stop_without_coordinates_is_too_few_points() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;
        let first = store
            .add_stop(
                route,
                NewStop {
                    stop: "Unplaced".into(),
                    times: vec!["06:00".into()],
                    coords: None,
                },
            )
            .await
            .unwrap();
        let router = ScriptedRouter::default();

        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.1, 25.1));
        let result = builder.compute(Some(&first), &router).await;
        assert!(matches!(result, Err(BuilderError::TooFewWaypoints)));
    }

    #[tokio::test]
    async fn test_click_after_compute_drops_stale_path() {
        let store = MemoryStore::new();
        let (_, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![Some(vec![candidate(1234.0, a, b)])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.compute(Some(&first), &router).await.unwrap();
        builder.mark(Coordinate::new(54.05, 25.02));

        assert_eq!(builder.state(), DraftState::StopMarked);
        assert!(builder.resolved().is_none());
        assert_eq!(builder.waypoints().len(), 1);
    }

    #[tokio::test]
    async fn test_save_validation_writes_nothing() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;

        let mut builder = SegmentBuilder::new();
        let unmarked = builder.save(&store, route, &save_request("Stotis", "06:00")).await;
        assert!(matches!(unmarked, Err(BuilderError::NoStopMarked)));

        builder.mark(Coordinate::new(54.0, 25.0));
        let no_times = builder.save(&store, route, &save_request("Stotis", " , ")).await;
        assert!(matches!(
            no_times,
            Err(BuilderError::Validation(ValidationError::NoTimes))
        ));
        let no_label = builder.save(&store, route, &save_request("  ", "06:00")).await;
        assert!(matches!(
            no_label,
            Err(BuilderError::Validation(ValidationError::EmptyStopLabel))
        ));

        assert!(store.stops(route).await.unwrap().is_empty());
        assert_eq!(builder.state(), DraftState::StopMarked);
    }

    #[tokio::test]
    async fn test_manual_distance_override() {
        let store = MemoryStore::new();
        let (route, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![
            Some(vec![candidate(1234.0, a, b)]),
        ]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.compute(Some(&first), &router).await.unwrap();

        let mut request = save_request("Centras", "07:00");
        request.distance_km = Some("abc".into());
        let invalid = builder.save(&store, route, &request).await;
        assert!(matches!(
            invalid,
            Err(BuilderError::Validation(ValidationError::InvalidDistance(_)))
        ));

        request.distance_km = Some("1.5".into());
        builder.save(&store, route, &request).await.unwrap();
        let previous = store.stop(route, first.id).await.unwrap();
        assert_eq!(previous.distance_to_next, Some(1500.0));
    }

    #[tokio::test]
    async fn test_path_is_dropped_when_last_stop_was_deleted() {
        let store = MemoryStore::new();
        let (route, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let c = Coordinate::new(54.2, 25.2);
        let router = ScriptedRouter::answering(vec![
            Some(vec![candidate(1000.0, a, b)]),
            Some(vec![candidate(5000.0, b, c)]),
        ]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.compute(Some(&first), &router).await.unwrap();
        let second = builder
            .save(&store, route, &save_request("Kalvarijos", "06:10"))
            .await
            .unwrap();

        builder.mark(c);
        builder.compute(Some(&second), &router).await.unwrap();
        timetable::delete_stop(&store, route, second.id).await.unwrap();

        let result = builder
            .save(&store, route, &save_request("Santariškės", "06:20"))
            .await;
        assert!(matches!(result, Err(BuilderError::PreviousStopChanged)));
        assert_eq!(builder.state(), DraftState::StopMarked);
        assert_eq!(builder.new_stop(), Some(c));

        let stops = store.stops(route).await.unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].route_geometry, Some(candidate(1000.0, a, b).geometry));
        assert_eq!(stops[0].distance_to_next, Some(1000.0));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_draft() {
        let store = MemoryStore::new();
        let route = new_route(&store).await;
        store.set_reject_batches(true);

        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.0, 25.0));
        let result = builder.save(&store, route, &save_request("Stotis", "06:00")).await;

        assert!(matches!(result, Err(BuilderError::Store(_))));
        assert_eq!(builder.state(), DraftState::StopMarked);
    }

    #[test]
    fn test_choose_outside_alternatives() {
        let mut builder = SegmentBuilder::new();
        assert!(matches!(builder.choose(0), Err(BuilderError::NoAlternatives)));
    }

    #[tokio::test]
    async fn test_choose_unknown_index_keeps_alternatives() {
        let store = MemoryStore::new();
        let (_, first) = route_with_first_stop(&store).await;
        let a = Coordinate::new(54.0, 25.0);
        let b = Coordinate::new(54.1, 25.1);
        let router = ScriptedRouter::answering(vec![Some(vec![
            candidate(1000.0, a, b),
            candidate(1100.0, a, b),
        ])]);

        let mut builder = SegmentBuilder::new();
        builder.mark(b);
        builder.compute(Some(&first), &router).await.unwrap();

        assert!(matches!(builder.choose(2), Err(BuilderError::UnknownAlternative(2))));
        assert_eq!(builder.alternatives().len(), 2);
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut builder = SegmentBuilder::new();
        builder.mark(Coordinate::new(54.0, 25.0));
        builder.mark(Coordinate::new(54.05, 25.05));
        builder.reset();

        let snapshot = builder.snapshot();
        assert_eq!(snapshot.state, DraftState::Idle);
        assert!(snapshot.new_stop.is_none());
        assert!(snapshot.waypoints.is_empty());
        assert!(snapshot.distance_km.is_none());

        builder.mark(Coordinate::new(55.0, 24.0));
        assert_eq!(builder.new_stop(), Some(Coordinate::new(55.0, 24.0)));
        assert!(builder.waypoints().is_empty());
    }
}
