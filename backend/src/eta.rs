use crate::models::TimetableEntry;

/// Average bus speed used when no other value is configured.
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 25.0;

/// Kilometers rounded to 3 decimals, the precision shown to admins.
pub fn meters_to_km(meters: f64) -> f64 {
    meters.round() / 1000.0
}

/// Whole meters for a kilometer value with at most 3 decimals.
pub fn km_to_meters(km: f64) -> f64 {
    (km * 1000.0).round()
}

/// Minutes needed to cover `distance_m`, rounded up. `None` for a
/// non-positive speed.
pub fn travel_minutes(distance_m: f64, speed_kmh: f64) -> Option<u32> {
    if speed_kmh.is_nan() || speed_kmh <= 0.0 || !distance_m.is_finite() {
        return None;
    }
    let minutes = distance_m.max(0.0) * 60.0 / (speed_kmh * 1000.0);
    Some(minutes.ceil() as u32)
}

/// Estimated minutes from the first stop to each stop.
///
/// Offsets are accumulated from each stop's distance to the next stop and
/// become `None` from the first stop whose incoming distance is unknown.
pub fn arrival_offsets(stops: &[TimetableEntry], speed_kmh: f64) -> Vec<Option<u32>> {
    let mut offsets = Vec::with_capacity(stops.len());
    let mut travelled = Some(0.0_f64);
    let mut previous: Option<&TimetableEntry> = None;

    for entry in stops {
        if let Some(prev) = previous {
            travelled = travelled.zip(prev.distance_to_next).map(|(a, b)| a + b);
        }
        offsets.push(travelled.and_then(|meters| travel_minutes(meters, speed_kmh)));
        previous = Some(entry);
    }

    offsets
}

/// Sum of all known segment distances, in meters.
pub fn total_distance_m(stops: &[TimetableEntry]) -> f64 {
    stops.iter().filter_map(|entry| entry.distance_to_next).sum()
}

pub fn format_minutes(minutes: u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("~{m} min"),
        (h, 0) => format!("~{h} h"),
        (h, m) => format!("~{h} h {m} min"),
    }
}
