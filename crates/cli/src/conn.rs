use crate::{commands::Target, error::CliError};
use connectors::sql::postgres::adapter::PgAdapter;
use engine_core::connectors::supervisor::ConnectionSupervisor;
use model::execution::{connection::EndpointConfig, job::JobConfig};
use serde::Serialize;
use tracing::{info, warn};

/// Result of a connection check against one endpoint.
#[derive(Debug, Serialize)]
pub struct ConnectionReport {
    pub target: &'static str,
    pub address: String,
    pub ssl_mode: String,
    pub tls_negotiated: bool,
    pub server_version: String,
    pub ssl_in_use: bool,
    pub ssl_setting: String,
}

fn endpoint(job: &JobConfig, target: Target) -> (&'static str, &EndpointConfig) {
    match target {
        Target::Source => ("source", &job.source),
        Target::Dest => ("dest", &job.destination),
    }
}

/// Connects through the supervisor, so transient failures are retried the
/// same way a transfer would retry them.
pub async fn check(job: &JobConfig, target: Target) -> Result<ConnectionReport, CliError> {
    let (name, endpoint) = endpoint(job, target);
    info!(target = name, address = %endpoint.address(), ssl_mode = %endpoint.ssl_mode, "Testing connection");

    let session = ConnectionSupervisor::default().acquire(endpoint).await?;
    let tls_negotiated = session.is_tls();
    let adapter = PgAdapter::from_session(session);
    let server = adapter.server_info().await?;

    if endpoint.ssl_mode.requires_tls() && !server.ssl_in_use {
        warn!(target = name, "Server reports the session is not encrypted");
    }

    Ok(ConnectionReport {
        target: name,
        address: endpoint.address(),
        ssl_mode: endpoint.ssl_mode.to_string(),
        tls_negotiated,
        server_version: server.version,
        ssl_in_use: server.ssl_in_use,
        ssl_setting: server.ssl_setting,
    })
}

pub fn print_report(report: &ConnectionReport) {
    println!("Connection to {} ({}) succeeded", report.target, report.address);
    println!("{:<16} {}", "Server", report.server_version);
    println!("{:<16} {}", "SSL mode", report.ssl_mode);
    println!("{:<16} {}", "TLS negotiated", report.tls_negotiated);
    println!("{:<16} {}", "SSL in use", report.ssl_in_use);
    println!("{:<16} {}", "Server ssl", report.ssl_setting);
}
