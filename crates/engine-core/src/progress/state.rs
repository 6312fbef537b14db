use crate::progress::{
    LOG_CAPACITY, ProgressEvent, ProgressSnapshot, RECENT_LOG_LINES, TransferStatus,
};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Mutable progress of one job. Only the observer task holds it.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    transfer_id: Option<String>,
    status: TransferStatus,
    running: bool,
    current_batch: u64,
    total_rows: Option<u64>,
    transferred_rows: u64,
    start_time: Option<DateTime<Utc>>,
    estimated_completion: Option<DateTime<Utc>>,
    error_message: Option<String>,
    logs: VecDeque<String>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { transfer_id, at } => {
                self.transfer_id = Some(transfer_id);
                self.start_time = Some(at);
                self.running = true;
            }
            ProgressEvent::Status { status, at } => {
                if self.status.is_terminal() {
                    debug!(current = %self.status, ignored = %status, "Status change after terminal state");
                    return;
                }
                self.status = status;
                if status == TransferStatus::Initializing && self.start_time.is_none() {
                    self.start_time = Some(at);
                }
            }
            ProgressEvent::TotalRows(total) => {
                self.total_rows = Some(total);
                self.transferred_rows = self.transferred_rows.min(total);
            }
            ProgressEvent::BatchCommitted {
                batch_no,
                batch_rows,
                transferred,
                duration,
                at,
            } => self.record_batch(batch_no, batch_rows, transferred, duration, at),
            ProgressEvent::Log { message, at } => self.push_log(at, &message),
            ProgressEvent::Finished { status, error, at } => {
                if self.status.is_terminal() {
                    debug!(current = %self.status, ignored = %status, "Terminal status already recorded");
                    return;
                }
                self.status = status;
                if let Some(error) = error {
                    self.push_log(at, &format!("Error: {error}"));
                    self.error_message = Some(error);
                }
            }
            ProgressEvent::StopRequested { at } => {
                if self.status.is_terminal() {
                    return;
                }
                self.status = TransferStatus::Stopped;
                self.push_log(at, "Transfer stopped by user");
            }
            ProgressEvent::WorkerExited => self.running = false,
            ProgressEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn record_batch(
        &mut self,
        batch_no: u64,
        batch_rows: u64,
        transferred: u64,
        duration: std::time::Duration,
        at: DateTime<Utc>,
    ) {
        if batch_no <= self.current_batch {
            debug!(batch_no, current = self.current_batch, "Stale batch event ignored");
            return;
        }
        self.current_batch = batch_no;

        let mut transferred = transferred.max(self.transferred_rows);
        if let Some(total) = self.total_rows {
            transferred = transferred.min(total);
        }
        self.transferred_rows = transferred;

        let total = self.total_rows.unwrap_or(transferred);
        if let Some(start) = self.start_time {
            self.estimated_completion = estimate_completion(at, start, transferred, total);
        }

        let pct = progress_percentage(transferred, total);
        self.push_log(
            at,
            &format!(
                "Progress - {}/{} rows ({pct:.1}%) - Batch {batch_no} ({batch_rows} rows in {} ms)",
                group_thousands(transferred),
                group_thousands(total),
                duration.as_millis()
            ),
        );
    }

    fn push_log(&mut self, at: DateTime<Utc>, message: &str) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(format!(
            "{}: {message}",
            at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total_rows = self.total_rows.unwrap_or(0);
        let skip = self.logs.len().saturating_sub(RECENT_LOG_LINES);
        ProgressSnapshot {
            transfer_id: self.transfer_id.clone(),
            is_running: self.running,
            current_batch: self.current_batch,
            total_rows,
            transferred_rows: self.transferred_rows,
            progress_percentage: progress_percentage(self.transferred_rows, total_rows),
            start_time: self.start_time,
            estimated_completion: self.estimated_completion,
            status: self.status,
            error_message: self.error_message.clone(),
            recent_log_lines: self.logs.iter().skip(skip).cloned().collect(),
        }
    }
}

/// Percentage of `total` done, clamped to `[0, 100]` and rounded to two
/// decimals. An unknown or empty total reports zero.
pub fn progress_percentage(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (transferred as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    (pct * 100.0).round() / 100.0
}

/// Linear extrapolation of the finish time from the average rate so far.
pub fn estimate_completion(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    transferred: u64,
    total: u64,
) -> Option<DateTime<Utc>> {
    if transferred == 0 {
        return None;
    }
    let elapsed = (now - start).to_std().ok()?.as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }
    let rate = transferred as f64 / elapsed;
    let remaining_secs = total.saturating_sub(transferred) as f64 / rate;
    let delta = TimeDelta::try_milliseconds((remaining_secs * 1000.0).round() as i64)?;
    now.checked_add_signed(delta)
}

/// `25000` -> `25,000`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn batch(batch_no: u64, transferred: u64, at: DateTime<Utc>) -> ProgressEvent {
        ProgressEvent::BatchCommitted {
            batch_no,
            batch_rows: 10_000,
            transferred,
            duration: Duration::from_millis(250),
            at,
        }
    }

    #[test]
    fn percentage_is_clamped_and_rounded() {
        assert_eq!(progress_percentage(1, 3), 33.33);
        assert_eq!(progress_percentage(2, 3), 66.67);
        assert_eq!(progress_percentage(5, 4), 100.0);
        assert_eq!(progress_percentage(10, 0), 0.0);
    }

    #[test]
    fn eta_extrapolates_average_rate() {
        // 10k rows in 10s, 15k remaining -> 15s from now.
        assert_eq!(estimate_completion(t(10), t(0), 10_000, 25_000), Some(t(25)));
        assert_eq!(estimate_completion(t(10), t(0), 0, 25_000), None);
        assert_eq!(estimate_completion(t(0), t(0), 10, 25), None);
        assert_eq!(estimate_completion(t(10), t(0), 25_000, 25_000), Some(t(10)));
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(25_000), "25,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn batches_update_counters_and_eta() {
        let mut state = ProgressState::new();
        state.apply(ProgressEvent::Started {
            transfer_id: "xfr-1".into(),
            at: t(0),
        });
        state.apply(ProgressEvent::TotalRows(25_000));
        state.apply(batch(1, 10_000, t(10)));

        let snap = state.snapshot();
        assert!(snap.is_running);
        assert_eq!(snap.current_batch, 1);
        assert_eq!(snap.transferred_rows, 10_000);
        assert_eq!(snap.progress_percentage, 40.0);
        assert_eq!(snap.estimated_completion, Some(t(25)));
        assert!(snap.recent_log_lines[0].contains("Progress - 10,000/25,000 rows (40.0%) - Batch 1"));
    }

    #[test]
    fn transferred_never_exceeds_total_or_goes_back() {
        let mut state = ProgressState::new();
        state.apply(ProgressEvent::TotalRows(100));
        state.apply(batch(1, 60, t(1)));
        state.apply(batch(2, 500, t(2)));
        assert_eq!(state.snapshot().transferred_rows, 100);

        state.apply(batch(2, 10, t(3)));
        state.apply(batch(1, 10, t(3)));
        let snap = state.snapshot();
        assert_eq!(snap.transferred_rows, 100);
        assert_eq!(snap.current_batch, 2);
    }

    #[test]
    fn terminal_status_is_set_once() {
        let mut state = ProgressState::new();
        state.apply(ProgressEvent::Status {
            status: TransferStatus::Transferring,
            at: t(0),
        });
        state.apply(ProgressEvent::StopRequested { at: t(1) });
        state.apply(ProgressEvent::Finished {
            status: TransferStatus::Completed,
            error: None,
            at: t(2),
        });
        state.apply(ProgressEvent::Status {
            status: TransferStatus::Verifying,
            at: t(3),
        });

        assert_eq!(state.status(), TransferStatus::Stopped);
        assert!(state.logs().last().unwrap().ends_with("Transfer stopped by user"));
    }

    #[test]
    fn failures_keep_the_message() {
        let mut state = ProgressState::new();
        state.apply(ProgressEvent::Finished {
            status: TransferStatus::Failed,
            error: Some("COPY failed".into()),
            at: t(0),
        });
        let snap = state.snapshot();
        assert_eq!(snap.status, TransferStatus::Failed);
        assert_eq!(snap.error_message.as_deref(), Some("COPY failed"));
        assert!(snap.recent_log_lines[0].ends_with("Error: COPY failed"));
    }

    #[test]
    fn log_ring_is_bounded() {
        let mut state = ProgressState::new();
        for i in 0..150 {
            state.apply(ProgressEvent::Log {
                message: format!("line {i}"),
                at: t(i),
            });
        }
        let logs = state.logs();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert!(logs[0].ends_with("line 50"));

        let recent = state.snapshot().recent_log_lines;
        assert_eq!(recent.len(), RECENT_LOG_LINES);
        assert!(recent[0].ends_with("line 140"));
        assert!(recent[9].ends_with("line 149"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TransferStatus::VerificationFailed).unwrap(),
            "\"verification_failed\""
        );
        assert_eq!(TransferStatus::CreatingTables.to_string(), "creating_tables");
    }
}
