//! Persistence contract for routes and their stops.
//!
//! Routes are listed newest first. The stops of a route are always listed by
//! ascending `sequence`; that order is the route's stop order and defines the
//! "previous" and "next" stop everywhere else.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{
    Coordinate, NewRoute, NewStop, Route, RouteId, RouteUpdate, StopFields, StopId,
    TimetableEntry,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Route not found: {0}")]
    RouteNotFound(RouteId),

    #[error("Stop {stop} not found on route {route}")]
    StopNotFound { route: RouteId, stop: StopId },

    #[error("Invalid timetable data: {0}")]
    InvalidData(String),

    #[error("Batch rejected: {0}")]
    BatchRejected(String),
}

/// One write inside an atomic [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    AddStop {
        route_id: RouteId,
        stop: NewStop,
    },
    /// Overwrites both segment fields of a stop; `None` clears a field.
    SetSegment {
        route_id: RouteId,
        stop_id: StopId,
        geometry: Option<Vec<Coordinate>>,
        distance_to_next: Option<f64>,
    },
    UpdateStop {
        route_id: RouteId,
        stop_id: StopId,
        fields: StopFields,
    },
    DeleteStop {
        route_id: RouteId,
        stop_id: StopId,
    },
    DeleteRoute {
        route_id: RouteId,
    },
}

/// Writes applied all together or not at all, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stop(&mut self, route_id: RouteId, stop: NewStop) -> &mut Self {
        self.ops.push(WriteOp::AddStop { route_id, stop });
        self
    }

    pub fn set_segment(
        &mut self,
        route_id: RouteId,
        stop_id: StopId,
        geometry: Option<Vec<Coordinate>>,
        distance_to_next: Option<f64>,
    ) -> &mut Self {
        self.ops.push(WriteOp::SetSegment {
            route_id,
            stop_id,
            geometry,
            distance_to_next,
        });
        self
    }

    pub fn update_stop(&mut self, route_id: RouteId, stop_id: StopId, fields: StopFields) -> &mut Self {
        self.ops.push(WriteOp::UpdateStop {
            route_id,
            stop_id,
            fields,
        });
        self
    }

    pub fn delete_stop(&mut self, route_id: RouteId, stop_id: StopId) -> &mut Self {
        self.ops.push(WriteOp::DeleteStop { route_id, stop_id });
        self
    }

    pub fn delete_route(&mut self, route_id: RouteId) -> &mut Self {
        self.ops.push(WriteOp::DeleteRoute { route_id });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// What a committed batch created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub added_stops: Vec<TimetableEntry>,
}

#[async_trait]
pub trait TimetableStore: Send + Sync {
    /// All routes, newest first.
    async fn routes(&self) -> Result<Vec<Route>, StoreError>;
    async fn route(&self, id: RouteId) -> Result<Route, StoreError>;
    async fn add_route(&self, route: NewRoute) -> Result<Route, StoreError>;
    async fn update_route(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError>;

    /// Stops of a route in route order.
    async fn stops(&self, route: RouteId) -> Result<Vec<TimetableEntry>, StoreError>;
    /// Stops of a route in reverse route order, at most `limit` of them.
    async fn stops_desc(
        &self,
        route: RouteId,
        limit: usize,
    ) -> Result<Vec<TimetableEntry>, StoreError>;
    async fn stop(&self, route: RouteId, stop: StopId) -> Result<TimetableEntry, StoreError>;
    async fn add_stop(&self, route: RouteId, stop: NewStop) -> Result<TimetableEntry, StoreError>;
    async fn update_stop(
        &self,
        route: RouteId,
        stop: StopId,
        fields: StopFields,
    ) -> Result<TimetableEntry, StoreError>;
    async fn delete_stop(&self, route: RouteId, stop: StopId) -> Result<(), StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError>;
}

/// Process-local store. Batches are applied to a copy that replaces the
/// live state only when every write succeeded.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    reject_batches: AtomicBool,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_id: i64,
    last_sequence: i64,
    routes: BTreeMap<RouteId, Route>,
    stops: BTreeMap<RouteId, Vec<TimetableEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `commit` fail without applying anything.
    pub fn set_reject_batches(&self, reject: bool) {
        self.reject_batches.store(reject, Ordering::SeqCst);
    }
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn route(&self, id: RouteId) -> Result<&Route, StoreError> {
        self.routes.get(&id).ok_or(StoreError::RouteNotFound(id))
    }

    fn stops(&self, route: RouteId) -> Result<&Vec<TimetableEntry>, StoreError> {
        self.route(route)?;
        Ok(self.stops.get(&route).map_or(&EMPTY, |stops| stops))
    }

    fn stop_mut(&mut self, route: RouteId, stop: StopId) -> Result<&mut TimetableEntry, StoreError> {
        self.route(route)?;
        self.stops
            .get_mut(&route)
            .and_then(|stops| stops.iter_mut().find(|entry| entry.id == stop))
            .ok_or(StoreError::StopNotFound { route, stop })
    }

    fn add_route(&mut self, route: NewRoute) -> Route {
        let route = Route {
            id: RouteId(self.next_id()),
            number: route.number,
            name: route.name,
            days: route.days,
            created_at: Utc::now(),
        };
        self.routes.insert(route.id, route.clone());
        route
    }

    fn update_route(&mut self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        let route = self.routes.get_mut(&id).ok_or(StoreError::RouteNotFound(id))?;
        if let Some(number) = update.number {
            route.number = number;
        }
        if let Some(name) = update.name {
            route.name = name;
        }
        if let Some(days) = update.days {
            route.days = days;
        }
        Ok(route.clone())
    }

    fn add_stop(&mut self, route: RouteId, stop: NewStop) -> Result<TimetableEntry, StoreError> {
        self.route(route)?;
        self.last_sequence += 1;
        let entry = TimetableEntry {
            id: StopId(self.next_id()),
            route_id: route,
            stop: stop.stop,
            times: stop.times,
            coords: stop.coords,
            distance_to_next: None,
            route_geometry: None,
            sequence: self.last_sequence,
            created_at: Utc::now(),
        };
        self.stops.entry(route).or_default().push(entry.clone());
        Ok(entry)
    }

    fn update_stop(
        &mut self,
        route: RouteId,
        stop: StopId,
        fields: StopFields,
    ) -> Result<TimetableEntry, StoreError> {
        let entry = self.stop_mut(route, stop)?;
        if let Some(label) = fields.stop {
            entry.stop = label;
        }
        if let Some(times) = fields.times {
            entry.times = times;
        }
        Ok(entry.clone())
    }

    fn delete_stop(&mut self, route: RouteId, stop: StopId) -> Result<(), StoreError> {
        self.stop_mut(route, stop)?;
        if let Some(stops) = self.stops.get_mut(&route) {
            stops.retain(|entry| entry.id != stop);
        }
        Ok(())
    }

    fn delete_route(&mut self, route: RouteId) -> Result<(), StoreError> {
        if self.stops.get(&route).is_some_and(|stops| !stops.is_empty()) {
            return Err(StoreError::BatchRejected(format!(
                "route {route} still has stops"
            )));
        }
        self.routes
            .remove(&route)
            .ok_or(StoreError::RouteNotFound(route))?;
        self.stops.remove(&route);
        Ok(())
    }

    fn apply(&mut self, op: WriteOp, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        match op {
            WriteOp::AddStop { route_id, stop } => {
                let entry = self.add_stop(route_id, stop)?;
                outcome.added_stops.push(entry);
            }
            WriteOp::SetSegment {
                route_id,
                stop_id,
                geometry,
                distance_to_next,
            } => {
                let entry = self.stop_mut(route_id, stop_id)?;
                entry.route_geometry = geometry;
                entry.distance_to_next = distance_to_next;
            }
            WriteOp::UpdateStop {
                route_id,
                stop_id,
                fields,
            } => {
                self.update_stop(route_id, stop_id, fields)?;
            }
            WriteOp::DeleteStop { route_id, stop_id } => self.delete_stop(route_id, stop_id)?,
            WriteOp::DeleteRoute { route_id } => self.delete_route(route_id)?,
        }
        Ok(())
    }
}

static EMPTY: Vec<TimetableEntry> = Vec::new();

#[async_trait]
impl TimetableStore for MemoryStore {
    async fn routes(&self) -> Result<Vec<Route>, StoreError> {
        let state = self.state.read().await;
        let mut routes: Vec<Route> = state.routes.values().cloned().collect();
        routes.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(routes)
    }

    async fn route(&self, id: RouteId) -> Result<Route, StoreError> {
        self.state.read().await.route(id).cloned()
    }

    async fn add_route(&self, route: NewRoute) -> Result<Route, StoreError> {
        Ok(self.state.write().await.add_route(route))
    }

    async fn update_route(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        self.state.write().await.update_route(id, update)
    }

    async fn stops(&self, route: RouteId) -> Result<Vec<TimetableEntry>, StoreError> {
        let state = self.state.read().await;
        let mut stops = state.stops(route)?.clone();
        stops.sort_by_key(|entry| entry.sequence);
        Ok(stops)
    }

    async fn stops_desc(
        &self,
        route: RouteId,
        limit: usize,
    ) -> Result<Vec<TimetableEntry>, StoreError> {
        let mut stops = self.stops(route).await?;
        stops.reverse();
        stops.truncate(limit);
        Ok(stops)
    }

    async fn stop(&self, route: RouteId, stop: StopId) -> Result<TimetableEntry, StoreError> {
        let state = self.state.read().await;
        state
            .stops(route)?
            .iter()
            .find(|entry| entry.id == stop)
            .cloned()
            .ok_or(StoreError::StopNotFound { route, stop })
    }

    async fn add_stop(&self, route: RouteId, stop: NewStop) -> Result<TimetableEntry, StoreError> {
        self.state.write().await.add_stop(route, stop)
    }

    async fn update_stop(
        &self,
        route: RouteId,
        stop: StopId,
        fields: StopFields,
    ) -> Result<TimetableEntry, StoreError> {
        self.state.write().await.update_stop(route, stop, fields)
    }

    async fn delete_stop(&self, route: RouteId, stop: StopId) -> Result<(), StoreError> {
        self.state.write().await.delete_stop(route, stop)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        if self.reject_batches.load(Ordering::SeqCst) {
            return Err(StoreError::BatchRejected("store is rejecting batches".into()));
        }

        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let mut outcome = BatchOutcome::default();
        for op in batch.into_ops() {
            staged.apply(op, &mut outcome)?;
        }
        *state = staged;
        Ok(outcome)
    }
}
