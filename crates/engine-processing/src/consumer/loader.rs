use crate::error::LoadError;
use engine_core::{connectors::destination::Destination, metrics::Metrics};
use model::{execution::job::MergeMode, records::batch::Batch};
use std::{sync::Arc, time::Duration, time::Instant};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub batch_no: u64,
    pub rows: u64,
    pub merged: u64,
    pub bytes: u64,
    pub duration: Duration,
}

impl LoadReport {
    pub fn rows_per_sec(&self) -> f64 {
        rate(self.rows, self.duration)
    }
}

pub fn rate(rows: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

/// Drives one staged load+merge per batch against the destination.
pub struct StagedLoader {
    destination: Arc<dyn Destination>,
    mode: MergeMode,
    metrics: Metrics,
}

impl StagedLoader {
    pub fn new(destination: Arc<dyn Destination>, mode: MergeMode, metrics: Metrics) -> Self {
        StagedLoader {
            destination,
            mode,
            metrics,
        }
    }

    pub fn mode(&self) -> &MergeMode {
        &self.mode
    }

    /// Upserts need both the conflict key and the update column in the batch.
    pub fn check_columns(&self, columns: &[String]) -> Result<(), LoadError> {
        if let MergeMode::Upsert { key, update_column } = &self.mode {
            if !columns.iter().any(|c| c == key) {
                return Err(LoadError::MissingKey(key.clone()));
            }
            if !columns.iter().any(|c| c == update_column) {
                return Err(LoadError::MissingUpdateColumn(update_column.clone()));
            }
        }
        Ok(())
    }

    pub async fn load(&self, batch: &Batch) -> Result<LoadReport, LoadError> {
        if batch.is_empty() {
            return Ok(LoadReport {
                batch_no: batch.number,
                rows: 0,
                merged: 0,
                bytes: 0,
                duration: Duration::ZERO,
            });
        }

        self.check_columns(&batch.columns)?;

        let start = Instant::now();
        let merged = match self.destination.load_and_merge(batch, &self.mode).await {
            Ok(merged) => merged,
            Err(source) => {
                self.metrics.record_failed_batch();
                error!(batch_no = batch.number, error = %source, "Batch load failed, transaction rolled back");
                return Err(LoadError::Sink {
                    batch_no: batch.number,
                    source,
                });
            }
        };

        let report = LoadReport {
            batch_no: batch.number,
            rows: batch.len() as u64,
            merged,
            bytes: batch.size_bytes() as u64,
            duration: start.elapsed(),
        };

        self.metrics.record_batch(report.rows, report.bytes);

        info!(
            batch_no = report.batch_no,
            rows = report.rows,
            merged = report.merged,
            duration_ms = report.duration.as_millis() as u64,
            rows_per_sec = format!("{:.0}", report.rows_per_sec()),
            "Batch committed"
        );

        Ok(report)
    }
}
