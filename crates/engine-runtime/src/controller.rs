use crate::{
    error::{ControlError, TransferError},
    execution::{
        endpoints::{EndpointProvider, PgEndpointProvider},
        executor::{TransferExecutor, TransferOutcome, make_transfer_id},
    },
};
use chrono::Utc;
use engine_core::{
    connectors::supervisor::ConnectionSupervisor,
    progress::{
        ProgressBoard, ProgressEvent, ProgressReporter, ProgressSnapshot, ProgressState,
        TransferStatus, spawn_observer_from,
    },
};
use model::execution::job::JobConfig;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the controller needs to reach the running job.
struct Control {
    transfer_id: String,
    stop: CancellationToken,
    reporter: ProgressReporter,
}

#[derive(Default)]
struct Slot {
    board: ProgressBoard,
    control: Option<Control>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by the worker task. Dropping it, even during a panic, marks the
/// controller idle again.
struct RunningGuard {
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<Slot>>,
    reporter: ProgressReporter,
}

impl RunningGuard {
    /// Marks the worker gone and waits until the board shows it.
    async fn release(self) {
        self.reporter.emit(ProgressEvent::WorkerExited);
        self.reporter.flush().await;
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.reporter.emit(ProgressEvent::WorkerExited);
        lock(&self.slot).control = None;
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Runs at most one transfer at a time and answers status queries while it
/// runs.
#[derive(Clone)]
pub struct TransferController {
    provider: Arc<dyn EndpointProvider>,
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<Slot>>,
}

impl TransferController {
    pub fn new(provider: Arc<dyn EndpointProvider>) -> Self {
        TransferController {
            provider,
            running: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn postgres(supervisor: ConnectionSupervisor) -> Self {
        Self::new(Arc::new(PgEndpointProvider::new(supervisor)))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Progress of the current job, or of the last one once it has ended.
    pub fn snapshot(&self) -> ProgressSnapshot {
        lock(&self.slot).board.snapshot()
    }

    pub fn logs(&self) -> Vec<String> {
        lock(&self.slot).board.logs()
    }

    /// Spawns `job` on the current Tokio runtime.
    pub fn start(&self, job: JobConfig) -> Result<JobHandle, ControlError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Start rejected, a transfer is already running");
            return Err(ControlError::AlreadyRunning);
        }

        let started = Utc::now();
        let transfer_id = make_transfer_id(&job, started);

        // Readers see the job as initializing from the moment it is accepted.
        let mut seed = ProgressState::new();
        seed.apply(ProgressEvent::Started {
            transfer_id: transfer_id.clone(),
            at: started,
        });
        seed.apply(ProgressEvent::Status {
            status: TransferStatus::Initializing,
            at: started,
        });

        let board = ProgressBoard::new();
        let (reporter, _observer) = spawn_observer_from(board.clone(), seed);
        let stop = CancellationToken::new();
        let executor = TransferExecutor::starting_at(job, reporter.clone(), stop.clone(), started);

        {
            let mut slot = lock(&self.slot);
            slot.board = board.clone();
            slot.control = Some(Control {
                transfer_id: transfer_id.clone(),
                stop,
                reporter: reporter.clone(),
            });
        }

        let guard = RunningGuard {
            running: self.running.clone(),
            slot: self.slot.clone(),
            reporter,
        };
        let provider = self.provider.clone();
        let final_board = board.clone();

        info!(transfer_id = %transfer_id, "Transfer accepted");
        let task = tokio::spawn(async move {
            let mut outcome = executor.execute(provider.as_ref()).await;
            guard.release().await;
            // A stop that raced the worker's own terminal event is what the
            // board recorded first.
            let recorded = final_board.snapshot().status;
            if recorded.is_terminal() && recorded != outcome.status {
                info!(transfer_id = %outcome.transfer_id, reported = %outcome.status, %recorded, "Outcome follows the recorded status");
                outcome.status = recorded;
            }
            outcome
        });

        Ok(JobHandle {
            transfer_id,
            board,
            task,
        })
    }

    /// Asks the running job to stop after its current batch. The reported
    /// status becomes `stopped` immediately.
    pub fn request_stop(&self) -> Result<(), ControlError> {
        let slot = lock(&self.slot);
        let Some(control) = slot.control.as_ref() else {
            return Err(ControlError::NotRunning);
        };

        info!(transfer_id = %control.transfer_id, "Stop requested");
        control.stop.cancel();
        control
            .reporter
            .emit(ProgressEvent::StopRequested { at: Utc::now() });
        Ok(())
    }
}

/// Handle to one spawned job.
pub struct JobHandle {
    transfer_id: String,
    board: ProgressBoard,
    task: JoinHandle<TransferOutcome>,
}

impl JobHandle {
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.board.snapshot()
    }

    pub fn logs(&self) -> Vec<String> {
        self.board.logs()
    }

    /// Waits for the worker. By the time this returns the controller accepts
    /// a new job and the board holds the final state.
    pub async fn wait(self) -> Result<TransferOutcome, TransferError> {
        Ok(self.task.await?)
    }
}
