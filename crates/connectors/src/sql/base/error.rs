use thiserror::Error;

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Any PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The table could not be found or has no usable columns.
    #[error("Table metadata error: {0}")]
    Metadata(String),

    /// Writing rows to the database failed at the application level.
    #[error("Write error: {0}")]
    Write(String),

    /// A query returned a shape we did not expect.
    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
}

/// Errors happening while establishing or validating a connection.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The endpoint configuration cannot be turned into a connection.
    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    /// The TLS connector could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] native_tls::Error),

    /// Connecting, authenticating or talking to the server failed.
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    /// Transport failure outside the driver.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The liveness probe answered with something other than `1`.
    #[error("Connection validation failed: {0}")]
    Validation(String),

    /// `prefer` mode: the server refused the TLS session and the plaintext
    /// retry failed as well.
    #[error("TLS attempt failed ({tls}); plaintext retry failed: {plain}")]
    PlaintextFallback {
        tls: Box<ConnectorError>,
        #[source]
        plain: Box<ConnectorError>,
    },

    /// Transient failures persisted past the retry budget.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<ConnectorError>,
    },
}
