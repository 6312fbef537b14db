use connectors::sql::base::error::{ConnectorError, DbError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectorError),

    #[error("Source table {0} has no readable columns")]
    NoColumns(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Source error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectorError),

    #[error("Failed to provision destination: {0}")]
    Provision(String),

    #[error("Batch columns do not match destination: {0}")]
    ColumnMismatch(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Sink error: {0}")]
    Other(String),
}
