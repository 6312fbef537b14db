use connectors::sql::base::error::{ConnectorError, DbError};
use engine_runtime::error::{ControlError, TransferError};
use model::execution::errors::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectorError),

    #[error("Query failed: {0}")]
    Database(#[from] DbError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("{0}")]
    Control(#[from] ControlError),
}
