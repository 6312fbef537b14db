use crate::{
    error::TransferError,
    execution::{
        endpoints::{EndpointProvider, Endpoints},
        verifier::{VerificationReport, Verifier},
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::{
    metrics::{Metrics, MetricsSnapshot},
    progress::{ProgressEvent, ProgressReporter, TransferStatus},
};
use engine_processing::{
    consumer::loader::{StagedLoader, rate},
    producer::extractor::BatchExtractor,
};
use model::execution::job::{JobConfig, TransferMode};
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Final account of one job.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub total_rows: u64,
    pub transferred_rows: u64,
    pub batches: u64,
    pub elapsed_ms: u64,
    pub rows_per_sec: f64,
    pub verification: Option<VerificationReport>,
    pub metrics: MetricsSnapshot,
    pub error: Option<String>,
}

/// `xfr-` plus 16 hex chars of a hash over both endpoints and the start time.
pub fn make_transfer_id(job: &JobConfig, started: DateTime<Utc>) -> String {
    let mut h = blake3::Hasher::new();
    h.update(job.source.address().as_bytes());
    h.update(b":");
    h.update(job.source_table.to_string().as_bytes());
    h.update(b"->");
    h.update(job.destination.address().as_bytes());
    h.update(b":");
    h.update(job.dest_table.to_string().as_bytes());
    h.update(b"@");
    h.update(started.to_rfc3339().as_bytes());
    format!("xfr-{}", &h.finalize().to_hex()[..16])
}

enum LoopEnd {
    Drained,
    Stopped,
}

/// Runs one job through the status state machine, reporting every step to
/// the observer.
pub struct TransferExecutor {
    job: JobConfig,
    transfer_id: String,
    started: DateTime<Utc>,
    today: NaiveDate,
    reporter: ProgressReporter,
    stop: CancellationToken,
    metrics: Metrics,
    total_rows: u64,
    transferred: u64,
    batches: u64,
}

impl TransferExecutor {
    /// An executor whose id and start time derive from `started`.
    pub fn starting_at(
        job: JobConfig,
        reporter: ProgressReporter,
        stop: CancellationToken,
        started: DateTime<Utc>,
    ) -> Self {
        TransferExecutor {
            transfer_id: make_transfer_id(&job, started),
            today: started.date_naive(),
            started,
            job,
            reporter,
            stop,
            metrics: Metrics::new(),
            total_rows: 0,
            transferred: 0,
            batches: 0,
        }
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub async fn execute(mut self, provider: &dyn EndpointProvider) -> TransferOutcome {
        let clock = Instant::now();
        self.reporter.emit(ProgressEvent::Started {
            transfer_id: self.transfer_id.clone(),
            at: self.started,
        });
        self.reporter.status(TransferStatus::Initializing);
        info!(
            transfer_id = %self.transfer_id,
            source = %self.job.source_table,
            destination = %self.job.dest_table,
            mode = %self.job.mode,
            batch_size = self.job.batch_size,
            "Starting transfer"
        );

        let filter = self.job.effective_filter(self.today);

        let endpoints = match self.prepare(provider, filter.as_deref()).await {
            Ok(endpoints) => endpoints,
            Err(err) => return self.fail(TransferStatus::Error, err, clock),
        };

        if self.total_rows == 0 {
            self.reporter.log("No rows match, nothing to transfer");
            info!(transfer_id = %self.transfer_id, "No rows to transfer");
            return self.conclude(TransferStatus::Completed, None, None, clock);
        }

        self.reporter.status(TransferStatus::Transferring);
        self.reporter.log("Starting data transfer...");

        match self.transfer(&endpoints, filter.clone()).await {
            Ok(LoopEnd::Drained) => {}
            Ok(LoopEnd::Stopped) => {
                warn!(
                    transfer_id = %self.transfer_id,
                    batches = self.batches,
                    transferred = self.transferred,
                    "Transfer stopped before completion"
                );
                self.reporter.log(format!(
                    "Stopped after {} batches ({} rows)",
                    self.batches, self.transferred
                ));
                return self.conclude(TransferStatus::Stopped, None, None, clock);
            }
            Err(err) => return self.fail(TransferStatus::Failed, err, clock),
        }

        let elapsed = clock.elapsed();
        info!(
            transfer_id = %self.transfer_id,
            total_rows = self.transferred,
            batches = self.batches,
            elapsed_s = format!("{:.2}", elapsed.as_secs_f64()),
            rows_per_sec = format!("{:.0}", rate(self.transferred, elapsed)),
            "Transfer completed"
        );
        self.reporter.log("Transfer completed successfully!");

        if !self.job.verify {
            return self.conclude(TransferStatus::Completed, None, None, clock);
        }

        self.reporter.status(TransferStatus::Verifying);
        self.reporter.log("Verifying transfer...");
        let verifier = Verifier::new(endpoints.source.clone(), endpoints.destination.clone());
        match verifier.verify(filter.as_deref()).await {
            Ok(report) if report.rows_match() => {
                self.reporter.log("Verification passed!");
                self.conclude(TransferStatus::Completed, Some(report), None, clock)
            }
            Ok(report) => {
                self.reporter.log(format!(
                    "Verification failed! source={} destination={}",
                    report.source_rows, report.destination_rows
                ));
                self.conclude(TransferStatus::VerificationFailed, Some(report), None, clock)
            }
            Err(err) => self.fail(TransferStatus::Error, err, clock),
        }
    }

    /// Everything before the batch loop: connect, provision, count.
    async fn prepare(
        &mut self,
        provider: &dyn EndpointProvider,
        filter: Option<&str>,
    ) -> Result<Endpoints, TransferError> {
        self.job.validate()?;
        let endpoints = provider.open(&self.job, &self.metrics).await?;

        self.reporter.status(TransferStatus::CreatingTables);
        self.reporter.log("Creating warehouse table...");
        let columns = endpoints.source.columns().await?;
        let provisioned = endpoints.destination.ensure_destination(&columns).await?;
        info!(table = %self.job.dest_table, ?provisioned, "Destination ready");

        self.reporter.status(TransferStatus::CountingRows);
        self.reporter.log("Counting total rows...");
        self.total_rows = endpoints.source.count(filter).await?;
        self.reporter.emit(ProgressEvent::TotalRows(self.total_rows));
        info!(total_rows = self.total_rows, filter = filter.unwrap_or("<none>"), "Rows to transfer");

        Ok(endpoints)
    }

    /// The batch loop. The stop token is only consulted between batches, so
    /// a batch that has started always commits or rolls back on its own.
    async fn transfer(
        &mut self,
        endpoints: &Endpoints,
        filter: Option<String>,
    ) -> Result<LoopEnd, TransferError> {
        if self.stop.is_cancelled() {
            return Ok(LoopEnd::Stopped);
        }

        if self.job.mode == TransferMode::Full {
            endpoints.destination.truncate().await?;
            info!(table = %self.job.dest_table, "Destination truncated for full reload");
            self.reporter.log("Destination table truncated");
        }

        let mut extractor =
            BatchExtractor::new(endpoints.source.clone(), self.job.batch_size, self.total_rows)
                .with_filter(filter)
                .with_order_by(self.job.order_by.clone());
        let loader = StagedLoader::new(
            endpoints.destination.clone(),
            self.job.merge_mode(),
            self.metrics.clone(),
        );

        loop {
            if self.stop.is_cancelled() {
                return Ok(LoopEnd::Stopped);
            }

            let batch_clock = Instant::now();
            let Some(batch) = extractor.next_batch().await? else {
                return Ok(LoopEnd::Drained);
            };
            let report = loader.load(&batch).await?;
            let duration = batch_clock.elapsed();

            self.transferred += report.rows;
            self.batches = batch.number;
            self.reporter.emit(ProgressEvent::BatchCommitted {
                batch_no: batch.number,
                batch_rows: report.rows,
                transferred: self.transferred,
                duration,
                at: Utc::now(),
            });
            info!(
                batch_no = batch.number,
                rows = report.rows,
                cumulative = self.transferred,
                total = self.total_rows,
                duration_ms = duration.as_millis() as u64,
                rows_per_sec = format!("{:.0}", rate(report.rows, duration)),
                "Batch transferred"
            );
        }
    }

    fn fail(&self, status: TransferStatus, err: TransferError, clock: Instant) -> TransferOutcome {
        let message = err.to_string();
        error!(transfer_id = %self.transfer_id, %status, error = %message, "Transfer ended with an error");
        self.conclude(status, None, Some(message), clock)
    }

    /// Reports the terminal status. A stop request that arrived before this
    /// point wins, matching what the progress board already shows.
    fn conclude(
        &self,
        status: TransferStatus,
        verification: Option<VerificationReport>,
        error: Option<String>,
        clock: Instant,
    ) -> TransferOutcome {
        let status = if self.stop.is_cancelled() && status != TransferStatus::Stopped {
            info!(transfer_id = %self.transfer_id, ended_as = %status, "Stop was requested before the job ended");
            TransferStatus::Stopped
        } else {
            status
        };
        self.reporter.finish(status, error.clone());
        self.outcome(status, verification, error, clock)
    }

    fn outcome(
        &self,
        status: TransferStatus,
        verification: Option<VerificationReport>,
        error: Option<String>,
        clock: Instant,
    ) -> TransferOutcome {
        let elapsed = clock.elapsed();
        TransferOutcome {
            transfer_id: self.transfer_id.clone(),
            status,
            total_rows: self.total_rows,
            transferred_rows: self.transferred,
            batches: self.batches,
            elapsed_ms: elapsed.as_millis() as u64,
            rows_per_sec: rate(self.transferred, elapsed),
            verification,
            metrics: self.metrics.snapshot(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use model::{core::identifiers::TableRef, execution::connection::EndpointConfig};

    fn job() -> JobConfig {
        JobConfig::new(
            EndpointConfig::new("src.local", "app", "reader", "pw"),
            EndpointConfig::new("dwh.local", "warehouse", "writer", "pw"),
            TableRef::new("public", "orders"),
            TableRef::new("my", "orders"),
        )
    }

    #[test]
    fn transfer_ids_are_stable_per_start_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let a = make_transfer_id(&job(), at);
        let b = make_transfer_id(&job(), at);
        let c = make_transfer_id(&job(), at + chrono::TimeDelta::seconds(1));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("xfr-"));
        assert_eq!(a.len(), 4 + 16);
    }

    #[test]
    fn executor_id_follows_its_start_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let executor = TransferExecutor::starting_at(
            job(),
            ProgressReporter::detached(),
            CancellationToken::new(),
            at,
        );
        assert_eq!(executor.transfer_id(), make_transfer_id(&job(), at));
    }
}
