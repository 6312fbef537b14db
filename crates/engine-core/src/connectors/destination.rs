use crate::error::SinkError;
use async_trait::async_trait;
use connectors::sql::{base::metadata::column::ColumnDef, postgres::adapter::PgAdapter};
use model::{core::identifiers::TableRef, execution::job::MergeMode, records::batch::Batch};
use tracing::info;

/// Result of provisioning the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Write side of a transfer.
#[async_trait]
pub trait Destination: Send + Sync {
    fn table(&self) -> &TableRef;

    /// Creates the schema and, when absent, the table shaped like
    /// `source_columns`. An existing table is never altered.
    async fn ensure_destination(
        &self,
        source_columns: &[ColumnDef],
    ) -> Result<Provisioned, SinkError>;

    async fn count(&self, filter: Option<&str>) -> Result<u64, SinkError>;

    async fn truncate(&self) -> Result<(), SinkError>;

    /// Stages and merges one batch atomically. Returns the rows merged.
    async fn load_and_merge(&self, batch: &Batch, mode: &MergeMode) -> Result<u64, SinkError>;
}

pub struct PgDestination {
    adapter: PgAdapter,
    table: TableRef,
}

impl PgDestination {
    pub fn new(adapter: PgAdapter, table: TableRef) -> Self {
        PgDestination { adapter, table }
    }

    pub fn adapter(&self) -> &PgAdapter {
        &self.adapter
    }
}

#[async_trait]
impl Destination for PgDestination {
    fn table(&self) -> &TableRef {
        &self.table
    }

    async fn ensure_destination(
        &self,
        source_columns: &[ColumnDef],
    ) -> Result<Provisioned, SinkError> {
        self.adapter
            .create_schema_if_missing(&self.table.schema)
            .await?;

        if self.adapter.table_exists(&self.table).await? {
            info!(table = %self.table, "Destination table already exists");
            return Ok(Provisioned::AlreadyExists);
        }

        if source_columns.is_empty() {
            return Err(SinkError::Provision(format!(
                "no source columns to create {} from",
                self.table
            )));
        }

        self.adapter
            .create_table(&self.table, source_columns)
            .await?;
        info!(table = %self.table, columns = source_columns.len(), "Destination table created");
        Ok(Provisioned::Created)
    }

    async fn count(&self, filter: Option<&str>) -> Result<u64, SinkError> {
        Ok(self.adapter.count(&self.table, filter).await?)
    }

    async fn truncate(&self) -> Result<(), SinkError> {
        Ok(self.adapter.truncate(&self.table).await?)
    }

    async fn load_and_merge(&self, batch: &Batch, mode: &MergeMode) -> Result<u64, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }
        Ok(self
            .adapter
            .load_and_merge(&self.table, &batch.columns, &batch.rows, mode)
            .await?)
    }
}
