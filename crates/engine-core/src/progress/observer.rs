use crate::progress::{ProgressEvent, ProgressSnapshot, ProgressState, TransferStatus};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

/// Sending half of a job's progress channel.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    /// A reporter whose events go nowhere.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProgressReporter { tx }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress observer is gone, event dropped");
        }
    }

    pub fn status(&self, status: TransferStatus) {
        self.emit(ProgressEvent::Status {
            status,
            at: Utc::now(),
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Log {
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn finish(&self, status: TransferStatus, error: Option<String>) {
        self.emit(ProgressEvent::Finished {
            status,
            error,
            at: Utc::now(),
        });
    }

    /// Resolves once the observer has applied every event sent before it.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.emit(ProgressEvent::Flush(ack));
        let _ = done.await;
    }
}

#[derive(Debug, Default)]
struct Published {
    snapshot: ProgressSnapshot,
    logs: Vec<String>,
}

/// Latest published view of a job, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<RwLock<Published>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .logs
            .clone()
    }

    fn publish(&self, state: &ProgressState) {
        let snapshot = state.snapshot();
        let logs = state.logs();
        let mut published = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        published.snapshot = snapshot;
        published.logs = logs;
    }
}

/// Spawns the task that owns the job's [`ProgressState`] and republishes it to
/// `board` after every event. The task ends when all reporters are dropped.
pub fn spawn_observer(board: ProgressBoard) -> (ProgressReporter, JoinHandle<()>) {
    spawn_observer_from(board, ProgressState::new())
}

/// Like [`spawn_observer`], but starts from `state`. The board shows `state`
/// before this returns, so readers never see an older view.
pub fn spawn_observer_from(
    board: ProgressBoard,
    mut state: ProgressState,
) -> (ProgressReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    board.publish(&state);

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Flush(ack) => {
                    let _ = ack.send(());
                }
                event => {
                    state.apply(event);
                    board.publish(&state);
                }
            }
        }
        debug!(status = %state.status(), "Progress observer finished");
    });

    (ProgressReporter { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn board_reflects_events_after_flush() {
        let board = ProgressBoard::new();
        let (reporter, handle) = spawn_observer(board.clone());

        reporter.emit(ProgressEvent::Started {
            transfer_id: "xfr-abc".into(),
            at: Utc::now(),
        });
        reporter.status(TransferStatus::CountingRows);
        reporter.emit(ProgressEvent::TotalRows(42));
        reporter.log("Counting total rows...");
        reporter.flush().await;

        let snap = board.snapshot();
        assert_eq!(snap.transfer_id.as_deref(), Some("xfr-abc"));
        assert_eq!(snap.status, TransferStatus::CountingRows);
        assert_eq!(snap.total_rows, 42);
        assert!(snap.is_running);
        assert_eq!(board.logs().len(), 1);

        reporter.finish(TransferStatus::Completed, None);
        reporter.emit(ProgressEvent::WorkerExited);
        drop(reporter);
        handle.await.unwrap();

        let snap = board.snapshot();
        assert_eq!(snap.status, TransferStatus::Completed);
        assert!(!snap.is_running);
    }

    #[tokio::test]
    async fn seeded_board_is_visible_before_the_observer_runs() {
        let mut state = ProgressState::new();
        state.apply(ProgressEvent::Started {
            transfer_id: "xfr-seed".into(),
            at: Utc::now(),
        });
        state.apply(ProgressEvent::Status {
            status: TransferStatus::Initializing,
            at: Utc::now(),
        });

        let board = ProgressBoard::new();
        let (reporter, handle) = spawn_observer_from(board.clone(), state);

        let snap = board.snapshot();
        assert_eq!(snap.transfer_id.as_deref(), Some("xfr-seed"));
        assert_eq!(snap.status, TransferStatus::Initializing);
        assert!(snap.is_running);
        assert!(snap.start_time.is_some());

        reporter.status(TransferStatus::CountingRows);
        reporter.flush().await;
        assert_eq!(board.snapshot().status, TransferStatus::CountingRows);

        drop(reporter);
        handle.await.unwrap();
    }

    #[test]
    fn fresh_board_is_idle() {
        let snap = ProgressBoard::new().snapshot();
        assert_eq!(snap.status, TransferStatus::Idle);
        assert!(!snap.is_running);
        assert!(snap.recent_log_lines.is_empty());
    }

    #[tokio::test]
    async fn detached_reporter_swallows_events() {
        let reporter = ProgressReporter::detached();
        reporter.log("nobody listens");
        reporter.flush().await;
    }
}
