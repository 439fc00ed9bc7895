pub use shared::{
    AlternativeRoute, Coordinate, NewRoute, Route, RouteId, RouteUpdate, StopId, TimetableEntry,
    Weekday,
};

/// Stop fields written when a stop is appended to a route.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStop {
    pub stop: String,
    pub times: Vec<String>,
    pub coords: Option<Coordinate>,
}

/// Editable stop fields. Segment data cannot be changed through this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopFields {
    pub stop: Option<String>,
    pub times: Option<Vec<String>>,
}
