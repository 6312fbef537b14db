use connectors::sql::base::error::ConnectorError;
use engine_core::error::{SinkError, SourceError};
use engine_processing::error::{ExtractError, LoadError};
use model::execution::errors::ConfigError;
use thiserror::Error;

/// Everything that can end a transfer early.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectorError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Destination error: {0}")]
    Sink(#[from] SinkError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The worker task panicked or was aborted.
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Rejections from the controller's control surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Transfer already in progress")]
    AlreadyRunning,

    #[error("No transfer is currently running")]
    NotRunning,
}
