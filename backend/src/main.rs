use std::error::Error;
use std::sync::Arc;

use backend::config::{Cli, Command, MigrateArgs, ServeArgs, Settings};
use backend::database::Database;
use backend::geocoding::NominatimClient;
use backend::migration;
use backend::routing::OsrmClient;
use backend::store::{MemoryStore, TimetableStore};
use backend::{create_router, AppState};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::MigrateSegments(args) => migrate_segments(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    let store: Arc<dyn TimetableStore> = match &args.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            tracing::info!("connected to PostgreSQL");
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, timetables are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let router = Arc::new(OsrmClient::new(&args.osrm_url, &args.osrm_profile));
    tracing::info!("routing through {} ({})", args.osrm_url, args.osrm_profile);
    let places = Arc::new(NominatimClient::new(&args.geocoder_url, &args.geocoder_countries)?);

    let settings = Settings {
        average_speed_kmh: args.average_speed_kmh,
    };
    let state = AppState::new(store, router, places, args.geocoder_debounce(), settings);
    let app = create_router(state);

    tracing::info!("starting backend on http://{}", args.addr);
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn migrate_segments(args: MigrateArgs) -> Result<(), Box<dyn Error>> {
    let db = Database::connect(&args.database_url).await?;
    db.migrate().await?;

    let report = migration::repair_segments(&db).await?;
    if report.nothing_to_migrate() {
        tracing::info!(
            "scanned {} routes, segment data already sits on departing stops",
            report.routes_scanned
        );
    } else {
        for moved in &report.moves {
            tracing::info!(
                "route {}: segment moved from stop {} to stop {}",
                moved.route_id,
                moved.from_stop,
                moved.to_stop
            );
        }
        tracing::info!(
            "scanned {} routes, moved {} segments",
            report.routes_scanned,
            report.moves.len()
        );
    }
    Ok(())
}
