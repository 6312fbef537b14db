use crate::{error::CliError, shutdown::ExitCode};
use engine_core::progress::{ProgressSnapshot, TransferStatus, group_thousands};
use engine_runtime::execution::{executor::TransferOutcome, verifier::VerificationReport};
use serde::Serialize;

pub fn exit_code(status: TransferStatus) -> ExitCode {
    match status {
        TransferStatus::Completed => ExitCode::Success,
        TransferStatus::VerificationFailed => ExitCode::VerificationFailed,
        TransferStatus::Stopped => ExitCode::Stopped,
        _ => ExitCode::GeneralError,
    }
}

/// One-line progress summary printed on every poll tick.
pub fn progress_line(snap: &ProgressSnapshot) -> String {
    let mut line = format!(
        "[{}] {}/{} rows ({:.1}%) - Batch {}",
        snap.status,
        group_thousands(snap.transferred_rows),
        group_thousands(snap.total_rows),
        snap.progress_percentage,
        snap.current_batch
    );
    if let Some(eta) = snap.estimated_completion {
        line.push_str(&format!(" - ETA {}", eta.format("%H:%M:%S")));
    }
    line
}

#[derive(Debug, Serialize)]
pub struct CountReport {
    pub table: String,
    pub filter: Option<String>,
    pub rows: u64,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_outcome(outcome: &TransferOutcome) {
    println!("Transfer {}", outcome.transfer_id);
    println!("-----------------------------");
    println!("{:<16} {}", "Status", outcome.status);
    println!(
        "{:<16} {}/{}",
        "Rows",
        group_thousands(outcome.transferred_rows),
        group_thousands(outcome.total_rows)
    );
    println!("{:<16} {}", "Batches", outcome.batches);
    println!("{:<16} {:.2}s", "Elapsed", outcome.elapsed_ms as f64 / 1000.0);
    println!("{:<16} {:.0}", "Rows/sec", outcome.rows_per_sec);
    println!("{:<16} {}", "Retries", outcome.metrics.connect_retries);
    println!("{:<16} {:.0}", "Avg batch rows", outcome.metrics.avg_batch_rows());
    if let Some(report) = &outcome.verification {
        print_verification_rows(report);
    }
    if let Some(error) = &outcome.error {
        println!("{:<16} {}", "Error", error);
    }
}

pub fn print_count(count: &CountReport) {
    match &count.filter {
        Some(filter) => println!(
            "{} rows in {} where {filter}",
            group_thousands(count.rows),
            count.table
        ),
        None => println!("{} rows in {}", group_thousands(count.rows), count.table),
    }
}

pub fn print_verification(report: &VerificationReport) {
    println!(
        "Verification {}",
        if report.rows_match() { "passed" } else { "failed" }
    );
    print_verification_rows(report);
}

fn print_verification_rows(report: &VerificationReport) {
    println!("{:<16} {}", "Source rows", group_thousands(report.source_rows));
    println!("{:<16} {}", "Dest rows", group_thousands(report.destination_rows));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_terminal_status() {
        assert_eq!(exit_code(TransferStatus::Completed).as_i32(), 0);
        assert_eq!(exit_code(TransferStatus::VerificationFailed).as_i32(), 2);
        assert_eq!(exit_code(TransferStatus::Stopped).as_i32(), 130);
        assert_eq!(exit_code(TransferStatus::Failed).as_i32(), 1);
        assert_eq!(exit_code(TransferStatus::Error).as_i32(), 1);
    }

    #[test]
    fn progress_line_groups_digits() {
        let snap = ProgressSnapshot {
            status: TransferStatus::Transferring,
            current_batch: 1,
            total_rows: 25_000,
            transferred_rows: 10_000,
            progress_percentage: 40.0,
            ..ProgressSnapshot::default()
        };
        assert_eq!(
            progress_line(&snap),
            "[transferring] 10,000/25,000 rows (40.0%) - Batch 1"
        );
    }
}
