use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::geocoding::{AddressSearch, Debouncer};
use crate::models::RouteId;
use crate::segment_builder::SegmentBuilder;

/// The admin's in-progress stop for one route.
pub struct DraftSession {
    pub builder: tokio::sync::Mutex<SegmentBuilder>,
    pub places: Debouncer,
}

/// One draft session per route, created on first use.
pub struct DraftSessions {
    sessions: Mutex<HashMap<RouteId, Arc<DraftSession>>>,
    search: Arc<dyn AddressSearch>,
    debounce: Duration,
}

impl DraftSessions {
    pub fn new(search: Arc<dyn AddressSearch>, debounce: Duration) -> Self {
        Self {
            sessions: Mutex::default(),
            search,
            debounce,
        }
    }

    pub fn session(&self, route: RouteId) -> Arc<DraftSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(route)
            .or_insert_with(|| {
                Arc::new(DraftSession {
                    builder: tokio::sync::Mutex::new(SegmentBuilder::new()),
                    places: Debouncer::new(self.search.clone(), self.debounce),
                })
            })
            .clone()
    }

    /// Drop the session of a deleted route.
    pub fn discard(&self, route: RouteId) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&route);
    }
}
