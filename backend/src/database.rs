// PostgreSQL implementation of the timetable store.
// Batches run inside a single transaction, so a failing write rolls back
// everything queued before it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgConnection, PgPool};

use crate::models::{
    Coordinate, NewRoute, NewStop, Route, RouteId, RouteUpdate, StopFields, StopId,
    TimetableEntry, Weekday,
};
use crate::store::{BatchOutcome, StoreError, TimetableStore, WriteBatch, WriteOp};

#[derive(Debug, FromRow)]
struct RouteRow {
    id: i64,
    number: Option<String>,
    name: String,
    days: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RouteRow> for Route {
    type Error = StoreError;

    fn try_from(row: RouteRow) -> Result<Self, Self::Error> {
        let days = row
            .days
            .iter()
            .map(|day| {
                Weekday::parse(day)
                    .ok_or_else(|| StoreError::InvalidData(format!("unknown weekday {day:?}")))
            })
            .collect::<Result<BTreeSet<Weekday>, StoreError>>()?;
        Ok(Route {
            id: RouteId(row.id),
            number: row.number,
            name: row.name,
            days,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StopRow {
    id: i64,
    route_id: i64,
    sequence: i64,
    stop: String,
    times: Vec<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    distance_to_next: Option<f64>,
    route_geometry: Option<Json<Vec<Coordinate>>>,
    created_at: DateTime<Utc>,
}

impl From<StopRow> for TimetableEntry {
    fn from(row: StopRow) -> Self {
        let coords = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        };
        TimetableEntry {
            id: StopId(row.id),
            route_id: RouteId(row.route_id),
            stop: row.stop,
            times: row.times,
            coords,
            distance_to_next: row.distance_to_next,
            route_geometry: row.route_geometry.map(|Json(points)| points),
            sequence: row.sequence,
            created_at: row.created_at,
        }
    }
}

fn day_names(days: &BTreeSet<Weekday>) -> Vec<String> {
    days.iter().map(|day| day.as_str().to_string()).collect()
}

/// Database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool created");

        Ok(Self { pool })
    }

    /// Create the timetable tables if they are missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // sqlx::query() cannot run several statements at once
        let mut conn = self.pool.acquire().await?;
        let migration_sql = include_str!("../migrations/20261017_create_timetables.sql");
        sqlx::raw_sql(migration_sql).execute(&mut *conn).await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

async fn ensure_route(conn: &mut PgConnection, route: RouteId) -> Result<(), StoreError> {
    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM routes WHERE id = $1")
        .bind(route.0)
        .fetch_optional(&mut *conn)
        .await?;
    exists.map(|_| ()).ok_or(StoreError::RouteNotFound(route))
}

async fn insert_stop(
    conn: &mut PgConnection,
    route: RouteId,
    stop: NewStop,
) -> Result<TimetableEntry, StoreError> {
    ensure_route(conn, route).await?;
    let row = sqlx::query_as::<_, StopRow>(
        r#"
        INSERT INTO timetable_entries (route_id, stop, times, lat, lng)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(route.0)
    .bind(&stop.stop)
    .bind(&stop.times)
    .bind(stop.coords.map(|c| c.lat))
    .bind(stop.coords.map(|c| c.lng))
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.into())
}

async fn set_segment(
    conn: &mut PgConnection,
    route: RouteId,
    stop: StopId,
    geometry: Option<Vec<Coordinate>>,
    distance_to_next: Option<f64>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE timetable_entries
        SET route_geometry = $3, distance_to_next = $4
        WHERE route_id = $1 AND id = $2
        "#,
    )
    .bind(route.0)
    .bind(stop.0)
    .bind(geometry.map(Json))
    .bind(distance_to_next)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::StopNotFound { route, stop });
    }
    Ok(())
}

async fn update_stop_fields(
    conn: &mut PgConnection,
    route: RouteId,
    stop: StopId,
    fields: StopFields,
) -> Result<TimetableEntry, StoreError> {
    let row = sqlx::query_as::<_, StopRow>(
        r#"
        UPDATE timetable_entries
        SET stop = COALESCE($3, stop), times = COALESCE($4, times)
        WHERE route_id = $1 AND id = $2
        RETURNING *
        "#,
    )
    .bind(route.0)
    .bind(stop.0)
    .bind(fields.stop)
    .bind(fields.times)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::StopNotFound { route, stop })?;
    Ok(row.into())
}

async fn remove_stop(conn: &mut PgConnection, route: RouteId, stop: StopId) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM timetable_entries WHERE route_id = $1 AND id = $2")
        .bind(route.0)
        .bind(stop.0)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::StopNotFound { route, stop });
    }
    Ok(())
}

async fn remove_route(conn: &mut PgConnection, route: RouteId) -> Result<(), StoreError> {
    // Stops reference their route without ON DELETE CASCADE, so a route that
    // still has stops fails here and rolls the batch back.
    let result = sqlx::query("DELETE FROM routes WHERE id = $1")
        .bind(route.0)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::RouteNotFound(route));
    }
    Ok(())
}

#[async_trait]
impl TimetableStore for Database {
    async fn routes(&self) -> Result<Vec<Route>, StoreError> {
        let rows = sqlx::query_as::<_, RouteRow>(
            "SELECT * FROM routes ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!("Retrieved {} routes", rows.len());
        rows.into_iter().map(Route::try_from).collect()
    }

    async fn route(&self, id: RouteId) -> Result<Route, StoreError> {
        sqlx::query_as::<_, RouteRow>("SELECT * FROM routes WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RouteNotFound(id))?
            .try_into()
    }

    async fn add_route(&self, route: NewRoute) -> Result<Route, StoreError> {
        let row = sqlx::query_as::<_, RouteRow>(
            r#"
            INSERT INTO routes (number, name, days)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&route.number)
        .bind(&route.name)
        .bind(day_names(&route.days))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Route saved: {} (ID: {})", row.name, row.id);
        row.try_into()
    }

    async fn update_route(&self, id: RouteId, update: RouteUpdate) -> Result<Route, StoreError> {
        sqlx::query_as::<_, RouteRow>(
            r#"
            UPDATE routes
            SET number = CASE WHEN $2 THEN $3 ELSE number END,
                name = COALESCE($4, name),
                days = COALESCE($5, days)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(update.number.is_some())
        .bind(update.number.flatten())
        .bind(update.name)
        .bind(update.days.as_ref().map(day_names))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::RouteNotFound(id))?
        .try_into()
    }

    async fn stops(&self, route: RouteId) -> Result<Vec<TimetableEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ensure_route(&mut conn, route).await?;
        let rows = sqlx::query_as::<_, StopRow>(
            "SELECT * FROM timetable_entries WHERE route_id = $1 ORDER BY sequence ASC",
        )
        .bind(route.0)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.into_iter().map(TimetableEntry::from).collect())
    }

    async fn stops_desc(
        &self,
        route: RouteId,
        limit: usize,
    ) -> Result<Vec<TimetableEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ensure_route(&mut conn, route).await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, StopRow>(
            "SELECT * FROM timetable_entries WHERE route_id = $1 ORDER BY sequence DESC LIMIT $2",
        )
        .bind(route.0)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.into_iter().map(TimetableEntry::from).collect())
    }

    async fn stop(&self, route: RouteId, stop: StopId) -> Result<TimetableEntry, StoreError> {
        let row = sqlx::query_as::<_, StopRow>(
            "SELECT * FROM timetable_entries WHERE route_id = $1 AND id = $2",
        )
        .bind(route.0)
        .bind(stop.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::StopNotFound { route, stop })?;
        Ok(row.into())
    }

    async fn add_stop(&self, route: RouteId, stop: NewStop) -> Result<TimetableEntry, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let entry = insert_stop(&mut conn, route, stop).await?;
        tracing::info!("Stop saved: {} (ID: {}, route {})", entry.stop, entry.id, route);
        Ok(entry)
    }

    async fn update_stop(
        &self,
        route: RouteId,
        stop: StopId,
        fields: StopFields,
    ) -> Result<TimetableEntry, StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_stop_fields(&mut conn, route, stop, fields).await
    }

    async fn delete_stop(&self, route: RouteId, stop: StopId) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        remove_stop(&mut conn, route, stop).await?;
        tracing::info!("Stop deleted: ID {} (route {})", stop, route);
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchOutcome::default();
        let size = batch.len();

        for op in batch.into_ops() {
            match op {
                WriteOp::AddStop { route_id, stop } => {
                    let entry = insert_stop(&mut tx, route_id, stop).await?;
                    outcome.added_stops.push(entry);
                }
                WriteOp::SetSegment {
                    route_id,
                    stop_id,
                    geometry,
                    distance_to_next,
                } => set_segment(&mut tx, route_id, stop_id, geometry, distance_to_next).await?,
                WriteOp::UpdateStop {
                    route_id,
                    stop_id,
                    fields,
                } => {
                    update_stop_fields(&mut tx, route_id, stop_id, fields).await?;
                }
                WriteOp::DeleteStop { route_id, stop_id } => {
                    remove_stop(&mut tx, route_id, stop_id).await?
                }
                WriteOp::DeleteRoute { route_id } => remove_route(&mut tx, route_id).await?,
            }
        }

        tx.commit().await?;
        tracing::info!("Committed batch of {} writes", size);
        Ok(outcome)
    }
}
