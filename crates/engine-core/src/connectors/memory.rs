//! In-process [`Source`] and [`Destination`] backed by vectors, for tests.
//! Other crates get them through the `testing` feature.
//!
//! Filters are opaque SQL text on the real connectors, so here every filter
//! string must be registered up front with the predicate it stands for.

use crate::{
    connectors::{
        destination::{Destination, Provisioned},
        source::Source,
    },
    error::{SinkError, SourceError},
};
use async_trait::async_trait;
use connectors::sql::{base::metadata::column::ColumnDef, postgres::adapter::Window};
use model::{
    core::identifiers::TableRef,
    execution::job::MergeMode,
    records::{batch::Batch, row::Row},
};
use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
};

pub type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;
pub type MergeHook = Arc<dyn Fn(u64) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn select<'a>(
    rows: &'a [Row],
    filters: &HashMap<String, RowPredicate>,
    filter: Option<&str>,
) -> Result<Vec<&'a Row>, String> {
    match filter {
        None => Ok(rows.iter().collect()),
        Some(text) => {
            let predicate = filters.get(text).ok_or_else(|| text.to_string())?;
            Ok(rows.iter().filter(|r| predicate(r)).collect())
        }
    }
}

/// Numeric when both cells parse as integers, lexicographic otherwise.
fn compare_cells(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        },
        (a, b) => a.cmp(&b),
    }
}

#[derive(Clone)]
pub struct MemorySource {
    table: TableRef,
    columns: Vec<ColumnDef>,
    rows: Arc<Mutex<Vec<Row>>>,
    filters: HashMap<String, RowPredicate>,
    fail_at_offset: Option<u64>,
    fetches: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(table: TableRef, columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        MemorySource {
            table,
            columns,
            rows: Arc::new(Mutex::new(rows)),
            filters: HashMap::new(),
            fail_at_offset: None,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_filter(
        mut self,
        text: impl Into<String>,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.insert(text.into(), Arc::new(predicate));
        self
    }

    /// Makes the window starting at `offset` fail.
    pub fn fail_at_offset(mut self, offset: u64) -> Self {
        self.fail_at_offset = Some(offset);
        self
    }

    pub fn rows(&self) -> Vec<Row> {
        lock(&self.rows).clone()
    }

    pub fn push_row(&self, row: Row) {
        lock(&self.rows).push(row);
    }

    /// Deletes matching rows and returns how many were removed.
    pub fn remove_where(&self, predicate: impl Fn(&Row) -> bool) -> usize {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|r| !predicate(r));
        before - rows.len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[async_trait]
impl Source for MemorySource {
    fn table(&self) -> &TableRef {
        &self.table
    }

    async fn count(&self, filter: Option<&str>) -> Result<u64, SourceError> {
        let rows = lock(&self.rows);
        let selected =
            select(&rows, &self.filters, filter).map_err(SourceError::UnsupportedFilter)?;
        Ok(selected.len() as u64)
    }

    async fn columns(&self) -> Result<Vec<ColumnDef>, SourceError> {
        if self.columns.is_empty() {
            return Err(SourceError::NoColumns(self.table.to_string()));
        }
        Ok(self.columns.clone())
    }

    async fn fetch_window(
        &self,
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Window, SourceError> {
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail_at_offset == Some(offset) {
            return Err(SourceError::Other(format!(
                "simulated read failure at offset {offset}"
            )));
        }

        let names = self.column_names();
        let rows = lock(&self.rows);
        let mut selected =
            select(&rows, &self.filters, filter).map_err(SourceError::UnsupportedFilter)?;

        if let Some(key) = order_by {
            let idx = names
                .iter()
                .position(|n| n == key)
                .ok_or_else(|| SourceError::Other(format!("unknown ordering column '{key}'")))?;
            selected.sort_by(|a, b| compare_cells(a.get(idx), b.get(idx)));
        }

        let page: Vec<Row> = selected
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(Window {
            columns: if page.is_empty() { Vec::new() } else { names },
            rows: page,
        })
    }
}

#[derive(Debug, Default)]
struct DestinationState {
    columns: Option<Vec<ColumnDef>>,
    rows: Vec<Row>,
    truncates: usize,
    merges: u64,
}

#[derive(Clone)]
pub struct MemoryDestination {
    table: TableRef,
    state: Arc<Mutex<DestinationState>>,
    filters: HashMap<String, RowPredicate>,
    after_merge: Option<MergeHook>,
    fail_on_merge: Option<u64>,
}

impl MemoryDestination {
    /// A destination whose table does not exist yet.
    pub fn new(table: TableRef) -> Self {
        MemoryDestination {
            table,
            state: Arc::new(Mutex::new(DestinationState::default())),
            filters: HashMap::new(),
            after_merge: None,
            fail_on_merge: None,
        }
    }

    pub fn with_existing(table: TableRef, columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        let dest = Self::new(table);
        {
            let mut state = lock(&dest.state);
            state.columns = Some(columns);
            state.rows = rows;
        }
        dest
    }

    pub fn with_filter(
        mut self,
        text: impl Into<String>,
        predicate: impl Fn(&Row) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.insert(text.into(), Arc::new(predicate));
        self
    }

    /// Runs `hook` with the 1-based merge number after each committed merge.
    pub fn after_merge(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.after_merge = Some(Arc::new(hook));
        self
    }

    /// Makes the `n`th merge (1-based) fail without touching any rows.
    pub fn fail_on_merge(mut self, n: u64) -> Self {
        self.fail_on_merge = Some(n);
        self
    }

    pub fn exists(&self) -> bool {
        lock(&self.state).columns.is_some()
    }

    pub fn rows(&self) -> Vec<Row> {
        lock(&self.state).rows.clone()
    }

    pub fn column_names(&self) -> Vec<String> {
        lock(&self.state)
            .columns
            .as_ref()
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn truncate_calls(&self) -> usize {
        lock(&self.state).truncates
    }

    pub fn merge_calls(&self) -> u64 {
        lock(&self.state).merges
    }

    /// Destination row whose `column` holds `value`.
    pub fn find(&self, column: &str, value: &str) -> Option<Row> {
        let idx = self.column_names().iter().position(|c| c == column)?;
        lock(&self.state)
            .rows
            .iter()
            .find(|r| r.get(idx) == Some(value))
            .cloned()
    }

    fn missing_table(&self) -> SinkError {
        SinkError::Other(format!("relation {} does not exist", self.table))
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn table(&self) -> &TableRef {
        &self.table
    }

    async fn ensure_destination(
        &self,
        source_columns: &[ColumnDef],
    ) -> Result<Provisioned, SinkError> {
        let mut state = lock(&self.state);
        if state.columns.is_some() {
            return Ok(Provisioned::AlreadyExists);
        }
        if source_columns.is_empty() {
            return Err(SinkError::Provision(format!(
                "no source columns to create {} from",
                self.table
            )));
        }
        state.columns = Some(source_columns.to_vec());
        Ok(Provisioned::Created)
    }

    async fn count(&self, filter: Option<&str>) -> Result<u64, SinkError> {
        let state = lock(&self.state);
        if state.columns.is_none() {
            return Err(self.missing_table());
        }
        let selected =
            select(&state.rows, &self.filters, filter).map_err(SinkError::UnsupportedFilter)?;
        Ok(selected.len() as u64)
    }

    async fn truncate(&self) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        if state.columns.is_none() {
            return Err(self.missing_table());
        }
        state.rows.clear();
        state.truncates += 1;
        Ok(())
    }

    async fn load_and_merge(&self, batch: &Batch, mode: &MergeMode) -> Result<u64, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let (merge_no, merged) = {
            let mut state = lock(&self.state);
            let dest_columns: Vec<String> = match &state.columns {
                Some(cols) => cols.iter().map(|c| c.name.clone()).collect(),
                None => return Err(self.missing_table()),
            };

            if self.fail_on_merge == Some(state.merges + 1) {
                return Err(SinkError::Other(format!(
                    "simulated merge failure on batch {}",
                    batch.number
                )));
            }

            let mapping = batch
                .columns
                .iter()
                .map(|name| {
                    dest_columns
                        .iter()
                        .position(|c| c == name)
                        .ok_or_else(|| SinkError::ColumnMismatch(format!("unknown column '{name}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let incoming = batch.rows.iter().map(|row| {
                let mut cells = vec![None; dest_columns.len()];
                for (src_idx, &dst_idx) in mapping.iter().enumerate() {
                    cells[dst_idx] = row.cells.get(src_idx).cloned().flatten();
                }
                Row::new(cells)
            });

            let mut rows = state.rows.clone();
            let mut merged = 0u64;
            match mode {
                MergeMode::Append => {
                    for row in incoming {
                        rows.push(row);
                        merged += 1;
                    }
                }
                MergeMode::Upsert { key, update_column } => {
                    let position = |name: &str| {
                        dest_columns.iter().position(|c| c == name).ok_or_else(|| {
                            SinkError::ColumnMismatch(format!("unknown column '{name}'"))
                        })
                    };
                    let key_idx = position(key)?;
                    let update_idx = position(update_column)?;

                    for row in incoming {
                        let existing = row.get(key_idx).and_then(|key_value| {
                            rows.iter_mut().find(|r| r.get(key_idx) == Some(key_value))
                        });
                        match existing {
                            Some(existing) => {
                                existing.cells[update_idx] = row.cells[update_idx].clone();
                            }
                            None => rows.push(row),
                        }
                        merged += 1;
                    }
                }
            }

            state.rows = rows;
            state.merges += 1;
            (state.merges, merged)
        };

        if let Some(hook) = &self.after_merge {
            hook(merge_no);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", "bigint"),
            ColumnDef::new("name", "text"),
            ColumnDef::new("updated_at", "timestamp without time zone"),
        ]
    }

    fn row(id: u64, name: &str, updated_at: &str) -> Row {
        Row::new(vec![
            Some(id.to_string()),
            Some(name.to_string()),
            Some(updated_at.to_string()),
        ])
    }

    fn batch(rows: Vec<Row>) -> Batch {
        let names: Vec<String> = columns().into_iter().map(|c| c.name).collect();
        Batch::new(1, 0, Arc::from(names), rows)
    }

    #[tokio::test]
    async fn source_pages_in_order() {
        let rows = (1..=5).rev().map(|i| row(i, "n", "t")).collect();
        let source = MemorySource::new(TableRef::new("public", "orders"), columns(), rows);

        let window = source.fetch_window(None, Some("id"), 2, 2).await.unwrap();
        let ids: Vec<_> = window.rows.iter().map(|r| r.get(0).unwrap().to_string()).collect();
        assert_eq!(ids, vec!["3", "4"]);
        assert_eq!(window.columns, vec!["id", "name", "updated_at"]);

        let past_end = source.fetch_window(None, None, 2, 10).await.unwrap();
        assert!(past_end.rows.is_empty());
        assert_eq!(source.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_filters_are_rejected() {
        let source = MemorySource::new(TableRef::new("public", "orders"), columns(), vec![])
            .with_filter("id > 1", |r| r.get(0).is_some_and(|v| v != "1"));
        assert_eq!(source.count(Some("id > 1")).await.unwrap(), 0);
        assert!(matches!(
            source.count(Some("id > 2")).await,
            Err(SourceError::UnsupportedFilter(_))
        ));
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let dest = MemoryDestination::new(TableRef::new("my", "orders"));
        assert!(dest.count(None).await.is_err());
        assert_eq!(
            dest.ensure_destination(&columns()).await.unwrap(),
            Provisioned::Created
        );
        assert_eq!(
            dest.ensure_destination(&[]).await.unwrap(),
            Provisioned::AlreadyExists
        );
        assert_eq!(dest.column_names(), vec!["id", "name", "updated_at"]);
    }

    #[tokio::test]
    async fn upsert_only_overwrites_update_column() {
        let dest = MemoryDestination::with_existing(
            TableRef::new("my", "orders"),
            columns(),
            vec![row(1, "original", "2024-01-01")],
        );
        let mode = MergeMode::Upsert {
            key: "id".into(),
            update_column: "updated_at".into(),
        };

        let merged = dest
            .load_and_merge(
                &batch(vec![row(1, "changed", "2024-02-01"), row(2, "new", "2024-02-01")]),
                &mode,
            )
            .await
            .unwrap();

        assert_eq!(merged, 2);
        assert_eq!(dest.rows().len(), 2);
        assert_eq!(dest.find("id", "1"), Some(row(1, "original", "2024-02-01")));
    }

    #[tokio::test]
    async fn failed_merge_leaves_rows_untouched() {
        let dest = MemoryDestination::with_existing(
            TableRef::new("my", "orders"),
            columns(),
            vec![row(1, "a", "t")],
        )
        .fail_on_merge(1);

        let result = dest
            .load_and_merge(&batch(vec![row(2, "b", "t")]), &MergeMode::Append)
            .await;
        assert!(result.is_err());
        assert_eq!(dest.rows().len(), 1);
        assert_eq!(dest.merge_calls(), 0);
    }
}
