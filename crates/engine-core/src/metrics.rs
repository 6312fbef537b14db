use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Clone, Copy)]
enum Counter {
    Rows,
    Bytes,
    Batches,
    FailedBatches,
    ConnectRetries,
}

/// Per-job throughput counters. Clones share the same counters, so the
/// supervisor and the loader can each hold one.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counters: Arc<[AtomicU64; 5]>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_transferred: u64,
    pub bytes_transferred: u64,
    pub batches_committed: u64,
    pub failed_batches: u64,
    pub connect_retries: u64,
}

impl MetricsSnapshot {
    pub fn avg_batch_rows(&self) -> f64 {
        ratio(self.rows_transferred, self.batches_committed)
    }

    /// Average COPY payload per row.
    pub fn avg_row_bytes(&self) -> f64 {
        ratio(self.bytes_transferred, self.rows_transferred)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// A batch whose transaction committed.
    pub fn record_batch(&self, rows: u64, bytes: u64) {
        self.add(Counter::Rows, rows);
        self.add(Counter::Bytes, bytes);
        self.add(Counter::Batches, 1);
    }

    /// A batch whose transaction rolled back.
    pub fn record_failed_batch(&self) {
        self.add(Counter::FailedBatches, 1);
    }

    pub fn record_connect_retries(&self, retries: u64) {
        self.add(Counter::ConnectRetries, retries);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_transferred: self.get(Counter::Rows),
            bytes_transferred: self.get(Counter::Bytes),
            batches_committed: self.get(Counter::Batches),
            failed_batches: self.get(Counter::FailedBatches),
            connect_retries: self.get(Counter::ConnectRetries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let loader_side = metrics.clone();
        loader_side.record_batch(10, 400);
        loader_side.record_batch(5, 200);
        loader_side.record_failed_batch();
        metrics.record_connect_retries(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_transferred, 15);
        assert_eq!(snapshot.bytes_transferred, 600);
        assert_eq!(snapshot.batches_committed, 2);
        assert_eq!(snapshot.failed_batches, 1);
        assert_eq!(snapshot.connect_retries, 2);
        assert_eq!(snapshot.avg_batch_rows(), 7.5);
        assert_eq!(snapshot.avg_row_bytes(), 40.0);
    }

    #[test]
    fn averages_are_zero_before_any_batch() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.avg_batch_rows(), 0.0);
        assert_eq!(snapshot.avg_row_bytes(), 0.0);
    }
}
