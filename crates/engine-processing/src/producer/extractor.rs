use crate::error::ExtractError;
use engine_core::connectors::source::Source;
use model::records::{batch::Batch, row::Row};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pages through the source in fixed-size LIMIT/OFFSET windows.
///
/// The sequence is finite and bounded by the row count taken before the
/// transfer started; it never yields more rows than were counted. Once it
/// ends, or after any error, it yields nothing further.
pub struct BatchExtractor {
    source: Arc<dyn Source>,
    batch_size: u64,
    total_rows: u64,
    filter: Option<String>,
    order_by: Option<String>,
    offset: u64,
    batches: u64,
    columns: Option<Arc<[String]>>,
    exhausted: bool,
    warned_unordered: bool,
}

impl BatchExtractor {
    pub fn new(source: Arc<dyn Source>, batch_size: usize, total_rows: u64) -> Self {
        BatchExtractor {
            source,
            batch_size: batch_size.max(1) as u64,
            total_rows,
            filter: None,
            order_by: None,
            offset: 0,
            batches: 0,
            columns: None,
            exhausted: false,
            warned_unordered: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order_by(mut self, order_by: Option<String>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub async fn next_batch(&mut self) -> Result<Option<Batch>, ExtractError> {
        if self.exhausted {
            return Ok(None);
        }
        if self.offset >= self.total_rows {
            self.exhausted = true;
            return Ok(None);
        }

        if self.order_by.is_none() && !self.warned_unordered {
            warn!(
                table = %self.source.table(),
                "No ordering key configured; windows follow server order, so the source must be read-only for the duration of the transfer"
            );
            self.warned_unordered = true;
        }

        let limit = self.batch_size.min(self.total_rows - self.offset);
        let window = match self
            .source
            .fetch_window(
                self.filter.as_deref(),
                self.order_by.as_deref(),
                limit,
                self.offset,
            )
            .await
        {
            Ok(window) => window,
            Err(source) => {
                self.exhausted = true;
                return Err(ExtractError::Fetch {
                    offset: self.offset,
                    source,
                });
            }
        };

        if window.rows.is_empty() {
            debug!(offset = self.offset, "Empty window, source exhausted early");
            self.exhausted = true;
            return Ok(None);
        }

        let batch_no = self.batches + 1;
        let columns = self.resolve_columns(batch_no, window.columns)?;

        let mut rows: Vec<Row> = window.rows;
        if rows.len() as u64 > limit {
            warn!(
                batch_no,
                returned = rows.len(),
                limit,
                "Window exceeded its limit, extra rows dropped"
            );
            rows.truncate(limit as usize);
        }

        let batch = Batch::new(batch_no, self.offset, columns, rows);
        self.offset += batch.len() as u64;
        self.batches = batch_no;
        Ok(Some(batch))
    }

    fn resolve_columns(
        &mut self,
        batch_no: u64,
        columns: Vec<String>,
    ) -> Result<Arc<[String]>, ExtractError> {
        if let Some(expected) = &self.columns {
            if expected[..] == columns[..] {
                return Ok(expected.clone());
            }
            let expected = expected.to_vec();
            self.exhausted = true;
            return Err(ExtractError::ColumnDrift {
                batch_no,
                expected,
                actual: columns,
            });
        }

        let columns: Arc<[String]> = Arc::from(columns);
        self.columns = Some(columns.clone());
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::sql::{base::metadata::column::ColumnDef, postgres::adapter::Window};
    use engine_core::{connectors::memory::MemorySource, error::SourceError};
    use model::core::identifiers::TableRef;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing_test::traced_test;

    fn source(rows: u64) -> MemorySource {
        let data = (1..=rows)
            .map(|i| Row::new(vec![Some(i.to_string()), Some(format!("row {i}"))]))
            .collect();
        MemorySource::new(
            TableRef::new("public", "orders"),
            vec![ColumnDef::new("id", "bigint"), ColumnDef::new("note", "text")],
            data,
        )
    }

    async fn drain(extractor: &mut BatchExtractor) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(batch) = extractor.next_batch().await.unwrap() {
            assert_eq!(batch.number as usize, sizes.len() + 1);
            sizes.push(batch.len());
        }
        sizes
    }

    #[tokio::test]
    async fn splits_into_full_and_partial_batches() {
        let mut extractor =
            BatchExtractor::new(Arc::new(source(25_000)), 10_000, 25_000).with_order_by(Some("id".into()));
        assert_eq!(drain(&mut extractor).await, vec![10_000, 10_000, 5_000]);
        assert_eq!(extractor.offset(), 25_000);
        assert!(extractor.is_exhausted());
        assert!(extractor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn never_yields_more_than_counted() {
        let memory = source(7);
        let mut extractor = BatchExtractor::new(Arc::new(memory.clone()), 3, 5);
        assert_eq!(drain(&mut extractor).await, vec![3, 2]);
        assert_eq!(memory.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn stops_on_empty_window() {
        let mut extractor = BatchExtractor::new(Arc::new(source(3)), 2, 10);
        assert_eq!(drain(&mut extractor).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn zero_rows_never_queries() {
        let memory = source(0);
        let mut extractor = BatchExtractor::new(Arc::new(memory.clone()), 10, 0);
        assert!(extractor.next_batch().await.unwrap().is_none());
        assert_eq!(memory.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn fetch_error_ends_the_sequence() {
        let memory = source(10).fail_at_offset(4);
        let mut extractor = BatchExtractor::new(Arc::new(memory), 4, 10);

        assert_eq!(extractor.next_batch().await.unwrap().unwrap().len(), 4);
        let err = extractor.next_batch().await.unwrap_err();
        assert!(matches!(err, ExtractError::Fetch { offset: 4, .. }));
        assert!(extractor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filter_is_passed_through() {
        let memory = source(10).with_filter("id % 2 = 0", |r| {
            r.get(0)
                .and_then(|v| v.parse::<u64>().ok())
                .is_some_and(|id| id % 2 == 0)
        });
        let total = memory.count(Some("id % 2 = 0")).await.unwrap();
        let mut extractor = BatchExtractor::new(Arc::new(memory), 2, total)
            .with_filter(Some("id % 2 = 0".into()));
        assert_eq!(drain(&mut extractor).await, vec![2, 2, 1]);
    }

    struct DriftingSource {
        table: TableRef,
        calls: AtomicU64,
    }

    #[async_trait]
    impl Source for DriftingSource {
        fn table(&self) -> &TableRef {
            &self.table
        }

        async fn count(&self, _filter: Option<&str>) -> Result<u64, SourceError> {
            Ok(4)
        }

        async fn columns(&self) -> Result<Vec<ColumnDef>, SourceError> {
            Ok(vec![ColumnDef::new("id", "bigint")])
        }

        async fn fetch_window(
            &self,
            _filter: Option<&str>,
            _order_by: Option<&str>,
            _limit: u64,
            _offset: u64,
        ) -> Result<Window, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let columns = if call == 0 {
                vec!["id".to_string()]
            } else {
                vec!["id".to_string(), "added_later".to_string()]
            };
            let width = columns.len();
            Ok(Window {
                columns,
                rows: vec![Row::new(vec![Some("1".into()); width]); 2],
            })
        }
    }

    #[tokio::test]
    async fn column_drift_is_an_error() {
        let source = DriftingSource {
            table: TableRef::new("public", "orders"),
            calls: AtomicU64::new(0),
        };
        let mut extractor = BatchExtractor::new(Arc::new(source), 2, 4);

        assert!(extractor.next_batch().await.unwrap().is_some());
        match extractor.next_batch().await {
            Err(ExtractError::ColumnDrift { batch_no, actual, .. }) => {
                assert_eq!(batch_no, 2);
                assert_eq!(actual, vec!["id", "added_later"]);
            }
            other => panic!("expected drift, got {other:?}"),
        }
        assert!(extractor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn warns_once_without_ordering_key() {
        let mut extractor = BatchExtractor::new(Arc::new(source(6)), 2, 6);
        drain(&mut extractor).await;
        assert!(logs_contain("source must be read-only"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|l| l.contains("source must be read-only"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, saw {n}")),
            }
        });
    }
}
