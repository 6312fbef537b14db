use engine_core::error::{SinkError, SourceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to fetch window at offset {offset}: {source}")]
    Fetch {
        offset: u64,
        #[source]
        source: SourceError,
    },

    #[error("Column drift in batch {batch_no}: expected {expected:?}, got {actual:?}")]
    ColumnDrift {
        batch_no: u64,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Merge key column '{0}' is not part of the batch")]
    MissingKey(String),

    #[error("Update column '{0}' is not part of the batch")]
    MissingUpdateColumn(String),

    #[error("Failed to load batch {batch_no}: {source}")]
    Sink {
        batch_no: u64,
        #[source]
        source: SinkError,
    },
}
