pub mod config;
pub mod database;
pub mod drafts;
pub mod error;
pub mod eta;
pub mod geocoding;
pub mod handlers;
pub mod migration;
pub mod models;
pub mod polyline;
pub mod routing;
pub mod segment_builder;
pub mod store;
pub mod timetable;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Settings;
use crate::drafts::DraftSessions;
use crate::geocoding::AddressSearch;
use crate::routing::RoutingClient;
use crate::store::TimetableStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TimetableStore>,
    pub router: Arc<dyn RoutingClient>,
    pub drafts: Arc<DraftSessions>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TimetableStore>,
        router: Arc<dyn RoutingClient>,
        places: Arc<dyn AddressSearch>,
        debounce: Duration,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            router,
            drafts: Arc::new(DraftSessions::new(places, debounce)),
            settings,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/routes",
            get(handlers::list_routes).post(handlers::create_route),
        )
        .route(
            "/api/routes/:id",
            get(handlers::get_route)
                .patch(handlers::update_route)
                .delete(handlers::delete_route),
        )
        .route("/api/routes/:id/stops", get(handlers::list_stops))
        .route(
            "/api/routes/:id/stops/:stop_id",
            axum::routing::patch(handlers::update_stop).delete(handlers::delete_stop),
        )
        .route("/api/routes/:id/view", get(handlers::route_view))
        .route("/api/routes/:id/draft", get(handlers::draft))
        .route("/api/routes/:id/draft/mark", post(handlers::draft_mark))
        .route("/api/routes/:id/draft/compute", post(handlers::draft_compute))
        .route("/api/routes/:id/draft/choose", post(handlers::draft_choose))
        .route("/api/routes/:id/draft/reset", post(handlers::draft_reset))
        .route("/api/routes/:id/draft/save", post(handlers::draft_save))
        .route("/api/routes/:id/draft/places", get(handlers::draft_places))
        .route("/api/admin/migrate-segments", post(handlers::migrate_segments))
        .layer(cors)
        .with_state(state)
}
