use engine_runtime::controller::TransferController;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{signal, task::JoinHandle};
use tracing::{info, warn};

/// Turns SIGINT/SIGTERM into a stop request for the running transfer.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    controller: TransferController,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new(controller: TransferController) -> Self {
        Self {
            controller,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_handlers(&self) -> JoinHandle<()> {
        let controller = self.controller.clone();
        let shutdown_flag = self.shutdown_requested.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(err) = signal::ctrl_c().await {
                    warn!(error = %err, "Failed to install SIGINT handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping after the current batch"),
                _ = terminate => info!("Received SIGTERM, stopping after the current batch"),
            }

            shutdown_flag.store(true, Ordering::SeqCst);
            if let Err(err) = controller.request_stop() {
                info!(reason = %err, "Nothing to stop");
            }
        })
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    VerificationFailed = 2,
    Stopped = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
