use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{AlternativeRoute, Coordinate};
use crate::polyline;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Snap tolerance per waypoint, in meters. Admin clicks rarely land on the road.
pub const SNAP_RADIUS_M: u32 = 50;

/// Road routing between an ordered list of waypoints.
///
/// Implementations return `None` whenever no usable route came back: too few
/// waypoints, transport failure, a non-success answer or an empty result.
/// When `want_alternatives` is false, or the service only knows one path,
/// exactly one candidate is returned.
#[async_trait]
pub trait RoutingClient: Send + Sync {
    async fn route(
        &self,
        waypoints: &[Coordinate],
        want_alternatives: bool,
    ) -> Option<Vec<AlternativeRoute>>;
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("at least 2 waypoints are required, got {0}")]
    TooFewWaypoints(usize),
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("routing service answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("routing service returned code {0:?}")]
    Code(String),
    #[error("routing service returned no routes")]
    NoRoutes,
}

/// Client for the OSRM `route` service.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    http: reqwest::Client,
    base_url: String,
    profile: String,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    geometry: String,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
        }
    }

    pub fn request_url(&self, waypoints: &[Coordinate], want_alternatives: bool) -> String {
        let radiuses = vec![SNAP_RADIUS_M.to_string(); waypoints.len()].join(";");
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=polyline&alternatives={}&radiuses={}",
            self.base_url,
            self.profile,
            build_coordinate_string(waypoints),
            want_alternatives,
            radiuses
        )
    }

    pub async fn try_route(
        &self,
        waypoints: &[Coordinate],
        want_alternatives: bool,
    ) -> Result<Vec<AlternativeRoute>, RoutingError> {
        if waypoints.len() < 2 {
            return Err(RoutingError::TooFewWaypoints(waypoints.len()));
        }

        let url = self.request_url(waypoints, want_alternatives);
        tracing::debug!("requesting route through {} waypoints", waypoints.len());
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RoutingError::Status(response.status()));
        }

        let body: OsrmResponse = response.json().await?;
        if body.code != "Ok" {
            return Err(RoutingError::Code(body.code));
        }
        if body.routes.is_empty() {
            return Err(RoutingError::NoRoutes);
        }

        let mut candidates: Vec<AlternativeRoute> = body
            .routes
            .into_iter()
            .map(|route| AlternativeRoute {
                distance: route.distance,
                geometry: polyline::decode(&route.geometry),
            })
            .collect();
        if !want_alternatives {
            candidates.truncate(1);
        }
        Ok(candidates)
    }
}

#[async_trait]
impl RoutingClient for OsrmClient {
    async fn route(
        &self,
        waypoints: &[Coordinate],
        want_alternatives: bool,
    ) -> Option<Vec<AlternativeRoute>> {
        match self.try_route(waypoints, want_alternatives).await {
            Ok(candidates) => {
                tracing::info!("routing service returned {} candidate(s)", candidates.len());
                Some(candidates)
            }
            Err(err) => {
                tracing::warn!("no route available: {err}");
                None
            }
        }
    }
}

/// OSRM expects `lng,lat` pairs separated by `;`.
pub fn build_coordinate_string(waypoints: &[Coordinate]) -> String {
    waypoints
        .iter()
        .map(|coord| format!("{},{}", coord.lng, coord.lat))
        .collect::<Vec<String>>()
        .join(";")
}

pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlng = (dlng / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng;
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
