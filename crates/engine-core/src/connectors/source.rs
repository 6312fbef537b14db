use crate::error::SourceError;
use async_trait::async_trait;
use connectors::sql::{
    base::metadata::column::ColumnDef,
    postgres::adapter::{PgAdapter, Window},
};
use model::core::identifiers::TableRef;

/// Read side of a transfer: one table on one server.
#[async_trait]
pub trait Source: Send + Sync {
    fn table(&self) -> &TableRef;

    /// `SELECT COUNT(*)` under `filter`.
    async fn count(&self, filter: Option<&str>) -> Result<u64, SourceError>;

    /// Column names and formatted types in ordinal order.
    async fn columns(&self) -> Result<Vec<ColumnDef>, SourceError>;

    async fn fetch_window(
        &self,
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Window, SourceError>;
}

pub struct PgSource {
    adapter: PgAdapter,
    table: TableRef,
}

impl PgSource {
    pub fn new(adapter: PgAdapter, table: TableRef) -> Self {
        PgSource { adapter, table }
    }

    pub fn adapter(&self) -> &PgAdapter {
        &self.adapter
    }
}

#[async_trait]
impl Source for PgSource {
    fn table(&self) -> &TableRef {
        &self.table
    }

    async fn count(&self, filter: Option<&str>) -> Result<u64, SourceError> {
        Ok(self.adapter.count(&self.table, filter).await?)
    }

    async fn columns(&self) -> Result<Vec<ColumnDef>, SourceError> {
        let columns = self.adapter.table_columns(&self.table).await?;
        if columns.is_empty() {
            return Err(SourceError::NoColumns(self.table.to_string()));
        }
        Ok(columns)
    }

    async fn fetch_window(
        &self,
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Window, SourceError> {
        Ok(self
            .adapter
            .fetch_window(&self.table, filter, order_by, limit, offset)
            .await?)
    }
}
