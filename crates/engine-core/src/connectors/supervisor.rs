use crate::{
    metrics::Metrics,
    retry::{RetryDisposition, RetryError, RetryPolicy},
};
use connectors::sql::{
    base::error::ConnectorError,
    postgres::connect::{Session, connect},
};
use model::execution::connection::EndpointConfig;
use std::{
    error::Error as _,
    io,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{error, info};

/// Message fragments of transport failures worth another attempt.
const TRANSIENT_MESSAGES: &[&str] = &[
    "ssl syscall",
    "ssl error: unexpected eof",
    "eof detected",
    "connection reset",
    "connection closed",
    "broken pipe",
    "timed out",
];

/// Opens validated sessions under a bounded retry policy.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSupervisor {
    policy: RetryPolicy,
    metrics: Option<Metrics>,
}

impl ConnectionSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        ConnectionSupervisor {
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connects and runs `SELECT 1`; both count towards the same attempt.
    pub async fn acquire(&self, endpoint: &EndpointConfig) -> Result<Session, ConnectorError> {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result = self
            .policy
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let session = connect(endpoint).await?;
                    session.ping().await?;
                    Ok::<_, ConnectorError>(session)
                },
                classify,
            )
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        if attempts > 1
            && let Some(metrics) = &self.metrics
        {
            metrics.record_connect_retries((attempts - 1) as u64);
        }

        match result {
            Ok(session) => {
                info!(
                    address = %session.address(),
                    tls = session.is_tls(),
                    attempts,
                    "Connection established"
                );
                Ok(session)
            }
            Err(RetryError::Fatal(err)) => {
                error!(address = %endpoint.address(), error = %err, "Connection failed");
                Err(err)
            }
            Err(RetryError::AttemptsExceeded(err)) => {
                error!(address = %endpoint.address(), attempts, error = %err, "Connection retries exhausted");
                Err(ConnectorError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                })
            }
        }
    }
}

/// Transport and TLS hiccups are retried; everything else (authentication,
/// unknown database, bad configuration) fails immediately.
pub fn classify(err: &ConnectorError) -> RetryDisposition {
    match err {
        ConnectorError::Connection(pg) => {
            if pg.as_db_error().is_some() {
                return RetryDisposition::Stop;
            }
            if pg.is_closed() {
                return RetryDisposition::Retry;
            }
            let io_kind = pg
                .source()
                .and_then(|src| src.downcast_ref::<io::Error>())
                .map(io::Error::kind);
            if io_kind.is_some_and(is_transient_io) || is_transient_message(&pg.to_string()) {
                RetryDisposition::Retry
            } else {
                RetryDisposition::Stop
            }
        }
        ConnectorError::Io(io) => {
            if is_transient_io(io.kind()) || is_transient_message(&io.to_string()) {
                RetryDisposition::Retry
            } else {
                RetryDisposition::Stop
            }
        }
        ConnectorError::PlaintextFallback { plain, .. } => classify(plain),
        ConnectorError::InvalidConfig(_)
        | ConnectorError::TlsConfig(_)
        | ConnectorError::Validation(_)
        | ConnectorError::RetriesExhausted { .. } => RetryDisposition::Stop,
    }
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
    )
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
}
