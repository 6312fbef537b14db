use crate::sql::{
    base::{
        error::DbError,
        metadata::column::{COL_COLUMN_NAME, COL_DATA_TYPE, ColumnDef},
    },
    postgres::{
        connect::Session,
        encoder::PgCopyEncoder,
        query::QueryGenerator,
    },
};
use futures_util::{SinkExt, pin_mut};
use model::{
    core::identifiers::TableRef,
    execution::job::MergeMode,
    records::row::Row,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::SimpleQueryMessage;
use tracing::debug;
use uuid::Uuid;

const QUERY_TABLE_EXISTS_SQL: &str = include_str!("sql/table_exists.sql");
const QUERY_TABLE_COLUMNS_SQL: &str = include_str!("sql/table_columns.sql");
const QUERY_SERVER_INFO_SQL: &str = include_str!("sql/server_info.sql");

const STAGING_PREFIX: &str = "__transfer_stage_";

/// Rows returned by one extraction window, in source column order.
#[derive(Debug, Clone, Default)]
pub struct Window {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// What the server reports about itself and the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub ssl_in_use: bool,
    pub ssl_setting: String,
}

#[derive(Clone)]
pub struct PgAdapter {
    session: Arc<RwLock<Session>>,
    queries: QueryGenerator,
}

impl PgAdapter {
    pub fn from_session(session: Session) -> Self {
        PgAdapter {
            session: Arc::new(RwLock::new(session)),
            queries: QueryGenerator::new(),
        }
    }

    pub async fn count(&self, table: &TableRef, filter: Option<&str>) -> Result<u64, DbError> {
        let sql = self.queries.count(table, filter);
        debug!(%sql, "Counting rows");
        let session = self.session.read().await;
        let row = session.client().query_one(sql.as_str(), &[]).await?;
        let count: i64 = row.try_get(0)?;
        u64::try_from(count)
            .map_err(|_| DbError::UnexpectedResult(format!("negative row count {count}")))
    }

    /// Reads one LIMIT/OFFSET window using the simple protocol, so every value
    /// arrives in its text representation regardless of column type.
    pub async fn fetch_window(
        &self,
        table: &TableRef,
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Window, DbError> {
        let sql = self
            .queries
            .select_window(table, filter, order_by, limit, offset);
        debug!(%sql, "Fetching window");

        let session = self.session.read().await;
        let messages = session.client().simple_query(&sql).await?;

        let mut window = Window::default();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if window.columns.is_empty() {
                    window.columns = row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect();
                }
                let cells = (0..row.len())
                    .map(|idx| row.get(idx).map(str::to_string))
                    .collect();
                window.rows.push(Row::new(cells));
            }
        }
        Ok(window)
    }

    pub async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError> {
        let session = self.session.read().await;
        let row = session
            .client()
            .query_one(QUERY_TABLE_EXISTS_SQL, &[&table.schema, &table.name])
            .await?;
        Ok(row.try_get(0)?)
    }

    pub async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>, DbError> {
        let session = self.session.read().await;
        let rows = session
            .client()
            .query(QUERY_TABLE_COLUMNS_SQL, &[&table.schema, &table.name])
            .await?;

        if rows.is_empty() {
            return Err(DbError::Metadata(format!(
                "table {table} not found or has no columns"
            )));
        }

        rows.iter()
            .map(|row| {
                Ok(ColumnDef::new(
                    row.try_get::<_, String>(COL_COLUMN_NAME)?,
                    row.try_get::<_, String>(COL_DATA_TYPE)?,
                ))
            })
            .collect()
    }

    pub async fn create_schema_if_missing(&self, schema: &str) -> Result<(), DbError> {
        let sql = self.queries.create_schema(schema);
        self.session.read().await.client().batch_execute(&sql).await?;
        Ok(())
    }

    pub async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
    ) -> Result<(), DbError> {
        if columns.is_empty() {
            return Err(DbError::Metadata(format!(
                "refusing to create {table} without columns"
            )));
        }
        let sql = self.queries.create_table(table, columns);
        debug!(%sql, "Creating table");
        self.session.read().await.client().batch_execute(&sql).await?;
        Ok(())
    }

    pub async fn truncate(&self, table: &TableRef) -> Result<(), DbError> {
        let sql = self.queries.truncate(table);
        self.session.read().await.client().batch_execute(&sql).await?;
        Ok(())
    }

    /// Stages `rows` into a transaction-scoped temp table via COPY and merges
    /// them into `dest`. Nothing becomes visible unless every step succeeds.
    /// Returns the number of rows the merge touched.
    pub async fn load_and_merge(
        &self,
        dest: &TableRef,
        columns: &[String],
        rows: &[Row],
        mode: &MergeMode,
    ) -> Result<u64, DbError> {
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(DbError::Write(format!(
                "row has {} values but {} columns were declared",
                bad.len(),
                columns.len()
            )));
        }

        let staging = format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple());

        let mut session = self.session.write().await;
        let tx = session.client_mut().transaction().await?;

        tx.batch_execute(&self.queries.create_staging(&staging, dest))
            .await?;

        let copy_sql = self.queries.copy_from_stdin(&staging, columns);
        let sink = tx.copy_in(copy_sql.as_str()).await?;
        pin_mut!(sink);

        let mut encoder = PgCopyEncoder::default();
        for row in rows {
            if let Some(chunk) = encoder.push_row(row) {
                sink.send(chunk).await?;
            }
        }
        if let Some(chunk) = encoder.finish() {
            sink.send(chunk).await?;
        }
        let copied = sink.as_mut().finish().await?;

        if copied != rows.len() as u64 {
            return Err(DbError::Write(format!(
                "COPY staged {copied} rows, expected {}",
                rows.len()
            )));
        }

        let merge_sql = self.queries.merge(&staging, dest, columns, mode);
        let merged = tx.execute(merge_sql.as_str(), &[]).await?;
        tx.commit().await?;

        debug!(staged = copied, merged, table = %dest, "Batch merged");
        Ok(merged)
    }

    pub async fn server_info(&self) -> Result<ServerInfo, DbError> {
        let session = self.session.read().await;
        let row = session.client().query_one(QUERY_SERVER_INFO_SQL, &[]).await?;
        Ok(ServerInfo {
            version: row.try_get("server_version")?,
            ssl_in_use: row.try_get("ssl_in_use")?,
            ssl_setting: row.try_get("ssl_setting")?,
        })
    }
}
