use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::Coordinate;
use shared::Place;

const RESULT_LIMIT: usize = 5;
pub const USER_AGENT: &str = concat!("bus-timetable-backend/", env!("CARGO_PKG_VERSION"));

/// Free-text address lookup. Failures surface as an empty list.
#[async_trait]
pub trait AddressSearch: Send + Sync {
    async fn search(&self, query: &str) -> Vec<Place>;
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodingError {
    #[error("address search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("address search answered with status {0}")]
    Status(reqwest::StatusCode),
}

/// Client for a Nominatim `search` endpoint restricted to a set of countries.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    http: reqwest::Client,
    base_url: String,
    country_codes: String,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    place_id: u64,
    lat: String,
    lon: String,
    display_name: String,
}

impl NominatimClient {
    /// Fails when the HTTP client carrying [`USER_AGENT`] cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        country_codes: impl Into<String>,
    ) -> Result<Self, GeocodingError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            country_codes: country_codes.into(),
        })
    }

    pub async fn try_search(&self, query: &str) -> Result<Vec<Place>, GeocodingError> {
        let limit = RESULT_LIMIT.to_string();
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("countrycodes", self.country_codes.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeocodingError::Status(response.status()));
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        Ok(places.into_iter().filter_map(into_place).collect())
    }
}

fn into_place(raw: NominatimPlace) -> Option<Place> {
    let lat = raw.lat.parse().ok()?;
    let lng = raw.lon.parse().ok()?;
    Some(Place {
        id: raw.place_id.to_string(),
        label: raw.display_name,
        coordinates: Coordinate::new(lat, lng),
    })
}

#[async_trait]
impl AddressSearch for NominatimClient {
    async fn search(&self, query: &str) -> Vec<Place> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        match self.try_search(query).await {
            Ok(places) => places,
            Err(err) => {
                tracing::warn!("address search for {query:?} failed: {err}");
                Vec::new()
            }
        }
    }
}

/// Delays each search and drops it when a newer one arrived in the meantime.
pub struct Debouncer {
    inner: Arc<dyn AddressSearch>,
    delay: Duration,
    latest: AtomicU64,
}

impl Debouncer {
    pub fn new(inner: Arc<dyn AddressSearch>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            latest: AtomicU64::new(0),
        }
    }

    /// `None` when the call was superseded before its delay ran out.
    pub async fn search(&self, query: &str) -> Option<Vec<Place>> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::debug!("address search for {query:?} superseded");
            return None;
        }
        Some(self.inner.search(query).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSearch {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AddressSearch for RecordingSearch {
        async fn search(&self, query: &str) -> Vec<Place> {
            self.queries.lock().unwrap().push(query.to_string());
            vec![Place {
                id: "1".into(),
                label: query.to_string(),
                coordinates: Coordinate::new(54.68, 25.28),
            }]
        }
    }

    #[test]
    fn test_into_place_parses_string_coordinates() {
        let place = into_place(NominatimPlace {
            place_id: 42,
            lat: "54.6872".into(),
            lon: "25.2797".into(),
            display_name: "Vilnius".into(),
        })
        .unwrap();
        assert_eq!(place.id, "42");
        assert_eq!(place.coordinates, Coordinate::new(54.6872, 25.2797));
    }

    #[test]
    fn test_into_place_skips_bad_coordinates() {
        let place = into_place(NominatimPlace {
            place_id: 1,
            lat: "north".into(),
            lon: "25.0".into(),
            display_name: "?".into(),
        });
        assert!(place.is_none());
    }

    #[tokio::test]
    async fn test_blank_query_skips_request() {
        let client = NominatimClient::new("http://127.0.0.1:9", "lt").unwrap();
        assert!(client.search("   ").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_only_runs_latest_query() {
        let recorder = Arc::new(RecordingSearch::default());
        let debouncer = Debouncer::new(recorder.clone(), Duration::from_millis(300));

        let (first, second) = tokio::join!(debouncer.search("Vil"), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            debouncer.search("Vilnius").await
        });

        assert!(first.is_none());
        assert_eq!(second.unwrap()[0].label, "Vilnius");
        assert_eq!(*recorder.queries.lock().unwrap(), vec!["Vilnius".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_passes_through_single_query() {
        let recorder = Arc::new(RecordingSearch::default());
        let debouncer = Debouncer::new(recorder.clone(), Duration::from_millis(300));
        let places = debouncer.search("Kaunas").await.unwrap();
        assert_eq!(places.len(), 1);
    }
}
