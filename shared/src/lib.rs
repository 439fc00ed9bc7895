use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub i64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopId(pub i64);

impl fmt::Display for StopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service days; ordering follows the calendar week starting on Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let day = match value.trim().to_ascii_lowercase().as_str() {
            "monday" => Weekday::Monday,
            "tuesday" => Weekday::Tuesday,
            "wednesday" => Weekday::Wednesday,
            "thursday" => Weekday::Thursday,
            "friday" => Weekday::Friday,
            "saturday" => Weekday::Saturday,
            "sunday" => Weekday::Sunday,
            _ => return None,
        };
        Some(day)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: RouteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    pub name: String,
    pub days: BTreeSet<Weekday>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoute {
    #[serde(default)]
    pub number: Option<String>,
    pub name: String,
    pub days: BTreeSet<Weekday>,
}

/// Partial route edit. Absent fields are left untouched; `"number": null`
/// clears the display number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteUpdate {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub number: Option<Option<String>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub days: Option<BTreeSet<Weekday>>,
}

/// Marks a field as present, so an explicit `null` differs from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// One stop of a route together with its departure times.
///
/// `route_geometry` and `distance_to_next` describe the road path from this
/// stop to the next one in route order. The last stop carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub id: StopId,
    pub route_id: RouteId,
    pub stop: String,
    pub times: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coordinate>,
    #[serde(default)]
    pub distance_to_next: Option<f64>,
    #[serde(default)]
    pub route_geometry: Option<Vec<Coordinate>>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl TimetableEntry {
    pub fn has_segment(&self) -> bool {
        self.route_geometry.is_some() || self.distance_to_next.is_some()
    }
}

/// Partial stop edit coming from the admin form. `times` is the raw
/// comma-separated text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopUpdate {
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub times: Option<String>,
}

/// One candidate path returned by the routing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeRoute {
    /// Meters.
    pub distance: f64,
    pub geometry: Vec<Coordinate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub label: String,
    pub coordinates: Coordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    Idle,
    StopMarked,
    RouteComputing,
    RouteComputed,
    AlternativesPresented,
    SegmentChosen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSnapshot {
    pub state: DraftState,
    pub new_stop: Option<Coordinate>,
    pub waypoints: Vec<Coordinate>,
    pub alternatives: Vec<AlternativeRoute>,
    pub geometry: Option<Vec<Coordinate>>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRequest {
    pub coords: Coordinate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseRequest {
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStopRequest {
    pub stop: String,
    pub times: String,
    /// Optional manual override of the computed distance, in kilometers.
    #[serde(default)]
    pub distance_km: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    pub route: Route,
    pub stops: Vec<TimetableEntry>,
    pub path: Vec<Coordinate>,
    pub total_distance_m: f64,
    /// Estimated minutes from the first stop, `None` once a segment
    /// distance is unknown.
    pub arrival_offsets: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMove {
    pub route_id: RouteId,
    pub from_stop: StopId,
    pub to_stop: StopId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub routes_scanned: usize,
    pub moves: Vec<SegmentMove>,
    pub committed: bool,
}

impl MigrationReport {
    pub fn nothing_to_migrate(&self) -> bool {
        self.moves.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
