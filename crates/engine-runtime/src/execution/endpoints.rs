use crate::error::TransferError;
use async_trait::async_trait;
use connectors::sql::postgres::adapter::PgAdapter;
use engine_core::{
    connectors::{
        destination::{Destination, PgDestination},
        source::{PgSource, Source},
        supervisor::ConnectionSupervisor,
    },
    metrics::Metrics,
};
use model::execution::job::JobConfig;
use std::sync::Arc;

/// The two sides of one job. Dropping it releases both connections.
#[derive(Clone)]
pub struct Endpoints {
    pub source: Arc<dyn Source>,
    pub destination: Arc<dyn Destination>,
}

/// Opens the endpoints a job runs against.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn open(&self, job: &JobConfig, metrics: &Metrics) -> Result<Endpoints, TransferError>;
}

/// Connects both PostgreSQL servers through the supervisor.
#[derive(Debug, Clone, Default)]
pub struct PgEndpointProvider {
    supervisor: ConnectionSupervisor,
}

impl PgEndpointProvider {
    pub fn new(supervisor: ConnectionSupervisor) -> Self {
        PgEndpointProvider { supervisor }
    }
}

#[async_trait]
impl EndpointProvider for PgEndpointProvider {
    async fn open(&self, job: &JobConfig, metrics: &Metrics) -> Result<Endpoints, TransferError> {
        let supervisor = self.supervisor.clone().with_metrics(metrics.clone());

        let source = supervisor.acquire(&job.source).await?;
        let destination = supervisor.acquire(&job.destination).await?;

        Ok(Endpoints {
            source: Arc::new(PgSource::new(
                PgAdapter::from_session(source),
                job.source_table.clone(),
            )),
            destination: Arc::new(PgDestination::new(
                PgAdapter::from_session(destination),
                job.dest_table.clone(),
            )),
        })
    }
}

/// Hands out the same pre-built endpoints to every job.
pub struct FixedEndpoints(pub Endpoints);

#[async_trait]
impl EndpointProvider for FixedEndpoints {
    async fn open(&self, _job: &JobConfig, _metrics: &Metrics) -> Result<Endpoints, TransferError> {
        Ok(self.0.clone())
    }
}
