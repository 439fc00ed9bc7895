use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::eta::DEFAULT_AVERAGE_SPEED_KMH;

#[derive(Debug, Parser)]
#[command(author, version, about = "Bus timetable viewer and admin backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Move segment data stored on the arriving stop back to the departing stop
    MigrateSegments(MigrateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// PostgreSQL connection string; timetables are kept in memory without it
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Base URL of an OSRM server
    #[arg(long, env = "OSRM_URL", default_value = "https://router.project-osrm.org")]
    pub osrm_url: String,

    #[arg(long, env = "OSRM_PROFILE", default_value = "driving")]
    pub osrm_profile: String,

    /// Base URL of a Nominatim server
    #[arg(long, env = "GEOCODER_URL", default_value = "https://nominatim.openstreetmap.org")]
    pub geocoder_url: String,

    /// Comma-separated ISO country codes address search is restricted to
    #[arg(long, env = "GEOCODER_COUNTRIES", default_value = "lt")]
    pub geocoder_countries: String,

    #[arg(long, env = "GEOCODER_DEBOUNCE_MS", default_value_t = 300)]
    pub geocoder_debounce_ms: u64,

    /// Bus speed used for travel time estimates
    #[arg(long, env = "AVERAGE_SPEED_KMH", default_value_t = DEFAULT_AVERAGE_SPEED_KMH)]
    pub average_speed_kmh: f64,
}

impl ServeArgs {
    pub fn geocoder_debounce(&self) -> Duration {
        Duration::from_millis(self.geocoder_debounce_ms)
    }
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Runtime values the HTTP layer needs besides its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub average_speed_kmh: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
        }
    }
}
