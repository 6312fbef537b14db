use crate::sql::base::error::ConnectorError;
use model::execution::connection::{EndpointConfig, Keepalive, SslPreference};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::{error::Error, time::Duration};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls, config::SslMode, error::SqlState};
use tracing::{debug, error, warn};

/// Host suffixes of managed cloud databases that only accept encrypted sessions.
const MANAGED_HOST_SUFFIXES: &[&str] = &[".rds.amazonaws.com"];

const MANAGED_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RELAXED_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport settings resolved for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportProfile {
    pub connect_timeout: Duration,
    pub ssl_mode: SslPreference,
    pub keepalive: Keepalive,
}

impl TransportProfile {
    pub fn for_endpoint(endpoint: &EndpointConfig) -> Self {
        if is_managed_host(&endpoint.host) {
            let ssl_mode = if endpoint.ssl_mode.requires_tls() {
                endpoint.ssl_mode
            } else {
                SslPreference::Require
            };
            TransportProfile {
                connect_timeout: endpoint.connect_timeout.unwrap_or(MANAGED_CONNECT_TIMEOUT),
                ssl_mode,
                keepalive: endpoint.keepalive,
            }
        } else {
            TransportProfile {
                connect_timeout: endpoint.connect_timeout.unwrap_or(RELAXED_CONNECT_TIMEOUT),
                ssl_mode: endpoint.ssl_mode,
                keepalive: endpoint.keepalive,
            }
        }
    }
}

pub fn is_managed_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    MANAGED_HOST_SUFFIXES
        .iter()
        .any(|suffix| host.ends_with(suffix))
}

/// Builds the driver configuration with all hardening applied.
pub fn pg_config(endpoint: &EndpointConfig, profile: &TransportProfile) -> Config {
    let mut config = Config::new();
    config
        .host(&endpoint.host)
        .port(endpoint.port)
        .dbname(&endpoint.database)
        .user(&endpoint.user)
        .password(endpoint.password.as_bytes())
        .application_name(&endpoint.application_name)
        .connect_timeout(profile.connect_timeout)
        .keepalives(true)
        .keepalives_idle(profile.keepalive.idle)
        .keepalives_interval(profile.keepalive.interval)
        .keepalives_retries(profile.keepalive.retries)
        .ssl_mode(match profile.ssl_mode {
            SslPreference::Disable => SslMode::Disable,
            SslPreference::Prefer => SslMode::Prefer,
            SslPreference::Require | SslPreference::VerifyFull => SslMode::Require,
        });
    config
}

/// A live connection. Dropping it closes the socket.
pub struct Session {
    client: Client,
    connection: JoinHandle<()>,
    address: String,
    tls: bool,
}

impl Session {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Trivial round-trip proving the session is usable.
    pub async fn ping(&self) -> Result<(), ConnectorError> {
        let row = self.client.query_one("SELECT 1", &[]).await?;
        let val: i32 = row.try_get(0)?;
        if val != 1 {
            return Err(ConnectorError::Validation(format!(
                "liveness probe on '{}' returned {val}",
                self.address
            )));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connection.abort();
        debug!(address = %self.address, "Postgres session released");
    }
}

/// Opens one session (no retries; see the supervisor for those).
pub async fn connect(endpoint: &EndpointConfig) -> Result<Session, ConnectorError> {
    let profile = TransportProfile::for_endpoint(endpoint);
    let config = pg_config(endpoint, &profile);
    let address = endpoint.address();

    debug!(
        address = %address,
        ssl_mode = %profile.ssl_mode,
        connect_timeout_s = profile.connect_timeout.as_secs(),
        "Opening Postgres session"
    );

    match profile.ssl_mode {
        SslPreference::Disable => connect_without_tls(config, address).await,
        SslPreference::Require => connect_with_tls(config, address, false).await,
        SslPreference::VerifyFull => connect_with_tls(config, address, true).await,
        SslPreference::Prefer => match connect_with_tls(config.clone(), address.clone(), false).await {
            Ok(session) => Ok(session),
            Err(tls) if allows_plaintext_fallback(&tls) => {
                warn!(error = %tls, "Postgres TLS session refused, retrying without TLS");
                connect_without_tls(config, address)
                    .await
                    .map_err(|plain| ConnectorError::PlaintextFallback {
                        tls: Box::new(tls),
                        plain: Box::new(plain),
                    })
            }
            Err(error) => Err(error),
        },
    }
}

/// A failed TLS attempt in `prefer` mode is retried in plaintext only when
/// the handshake itself failed or `pg_hba` rejected the encrypted session.
/// Timeouts and credential errors are returned as they are.
pub fn allows_plaintext_fallback(err: &ConnectorError) -> bool {
    match err {
        ConnectorError::TlsConfig(_) => true,
        ConnectorError::Connection(pg) => {
            if let Some(db) = pg.as_db_error() {
                return *db.code() == SqlState::INVALID_AUTHORIZATION_SPECIFICATION;
            }
            let mut source = pg.source();
            while let Some(cause) = source {
                if cause.is::<native_tls::Error>() {
                    return true;
                }
                source = cause.source();
            }
            false
        }
        _ => false,
    }
}

fn tls_connector(verify: bool) -> Result<MakeTlsConnector, ConnectorError> {
    // libpq's `require` encrypts without checking the certificate chain.
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()?;
    Ok(MakeTlsConnector::new(connector))
}

async fn connect_with_tls(
    config: Config,
    address: String,
    verify: bool,
) -> Result<Session, ConnectorError> {
    let tls = tls_connector(verify)?;
    let (client, connection) = config.connect(tls).await?;
    let conn_address = address.clone();
    let connection = tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, address = %conn_address, "Postgres connection error");
        }
    });
    Ok(Session {
        client,
        connection,
        address,
        tls: true,
    })
}

async fn connect_without_tls(config: Config, address: String) -> Result<Session, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    let conn_address = address.clone();
    let connection = tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, address = %conn_address, "Postgres connection error");
        }
    });
    Ok(Session {
        client,
        connection,
        address,
        tls: false,
    })
}
