use axum::http::StatusCode;
use thiserror::Error;

use crate::migration::MigrationError;
use crate::segment_builder::BuilderError;
use crate::store::StoreError;
use crate::timetable::ValidationError;

#[derive(Debug, Error)]
pub enum TimetableError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl TimetableError {
    pub fn status(&self) -> StatusCode {
        match self {
            TimetableError::Store(err) => store_status(err),
            TimetableError::Validation(_) => StatusCode::BAD_REQUEST,
            TimetableError::Builder(err) => match err {
                BuilderError::Validation(_) | BuilderError::UnknownAlternative(_) => {
                    StatusCode::BAD_REQUEST
                }
                BuilderError::NoRouteAvailable => StatusCode::BAD_GATEWAY,
                BuilderError::Store(err) => store_status(err),
                BuilderError::NoStopMarked
                | BuilderError::FirstStop
                | BuilderError::TooFewWaypoints
                | BuilderError::NoAlternatives
                | BuilderError::SegmentMissing
                | BuilderError::PreviousStopChanged => StatusCode::CONFLICT,
            },
            TimetableError::Migration(MigrationError::Read(err))
            | TimetableError::Migration(MigrationError::Commit(err)) => store_status(err),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::RouteNotFound(_) | StoreError::StopNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::BatchRejected(_) => StatusCode::CONFLICT,
        StoreError::ConnectionError(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::InvalidData(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
