use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::sync::oneshot;

pub mod observer;
pub mod state;

pub use observer::{ProgressBoard, ProgressReporter, spawn_observer, spawn_observer_from};
pub use state::{ProgressState, estimate_completion, group_thousands, progress_percentage};

/// Entries kept in the job's log ring.
pub const LOG_CAPACITY: usize = 100;
/// Entries included in a snapshot.
pub const RECENT_LOG_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    Idle,
    Initializing,
    CreatingTables,
    CountingRows,
    Transferring,
    Verifying,
    Completed,
    Failed,
    Error,
    VerificationFailed,
    Stopped,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Idle => "idle",
            TransferStatus::Initializing => "initializing",
            TransferStatus::CreatingTables => "creating_tables",
            TransferStatus::CountingRows => "counting_rows",
            TransferStatus::Transferring => "transferring",
            TransferStatus::Verifying => "verifying",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Error => "error",
            TransferStatus::VerificationFailed => "verification_failed",
            TransferStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed
                | TransferStatus::Failed
                | TransferStatus::Error
                | TransferStatus::VerificationFailed
                | TransferStatus::Stopped
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages the transfer worker sends to the job's observer.
#[derive(Debug)]
pub enum ProgressEvent {
    Started {
        transfer_id: String,
        at: DateTime<Utc>,
    },
    Status {
        status: TransferStatus,
        at: DateTime<Utc>,
    },
    TotalRows(u64),
    BatchCommitted {
        batch_no: u64,
        batch_rows: u64,
        transferred: u64,
        duration: Duration,
        at: DateTime<Utc>,
    },
    Log {
        message: String,
        at: DateTime<Utc>,
    },
    /// Terminal outcome reported by the worker. Ignored when a terminal
    /// status was already recorded.
    Finished {
        status: TransferStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    StopRequested {
        at: DateTime<Utc>,
    },
    WorkerExited,
    /// Acknowledged once every earlier event has been applied.
    Flush(oneshot::Sender<()>),
}

/// Point-in-time, read-only view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub transfer_id: Option<String>,
    pub is_running: bool,
    pub current_batch: u64,
    pub total_rows: u64,
    pub transferred_rows: u64,
    pub progress_percentage: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub status: TransferStatus,
    pub error_message: Option<String>,
    pub recent_log_lines: Vec<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        ProgressState::new().snapshot()
    }
}
