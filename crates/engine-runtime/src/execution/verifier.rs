use crate::error::TransferError;
use engine_core::connectors::{destination::Destination, source::Source};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub source_rows: u64,
    pub destination_rows: u64,
}

impl VerificationReport {
    pub fn rows_match(&self) -> bool {
        self.source_rows == self.destination_rows
    }
}

/// Re-counts both sides under the same filter text.
pub struct Verifier {
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
}

impl Verifier {
    pub fn new(source: Arc<dyn Source>, destination: Arc<dyn Destination>) -> Self {
        Verifier {
            source,
            destination,
        }
    }

    pub async fn verify(&self, filter: Option<&str>) -> Result<VerificationReport, TransferError> {
        let source_rows = self.source.count(filter).await?;
        let destination_rows = self.destination.count(filter).await?;
        let report = VerificationReport {
            source_rows,
            destination_rows,
        };

        if report.rows_match() {
            info!(source_rows, destination_rows, "Verification passed");
        } else {
            warn!(source_rows, destination_rows, "Verification failed: row counts differ");
        }
        Ok(report)
    }
}
