//! Output module for run reports and store statistics
//!
//! This module handles:
//! - The end-of-run report (written, skipped by reason, lossy partitions)
//! - Row counts and recent runs loaded from storage

pub mod stats;

pub use stats::{load_statistics, print_statistics, StoreStatistics};

use crate::crawler::CrawlStats;
use crate::ingest::{IngestReport, SkipReason};
use crate::storage::RunStatus;

/// Everything a finished run reports
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub status: RunStatus,
    pub captured_at: String,
    pub crawl: CrawlStats,
    pub ingest: IngestReport,
}

impl RunReport {
    pub fn records_written(&self) -> u64 {
        self.ingest.records_written
    }

    pub fn records_skipped(&self) -> u64 {
        self.ingest.skipped.total()
    }

    /// Skipped records per reason, omitting reasons with no skips
    pub fn skipped_by_reason(&self) -> Vec<(SkipReason, u64)> {
        let skipped = &self.ingest.skipped;
        [
            (SkipReason::TransientExhausted, skipped.transient_exhausted),
            (SkipReason::FatalStorage, skipped.fatal_storage),
            (SkipReason::BatchCommitFailed, skipped.batch_commit_failed),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}

/// Prints a run report to stdout
pub fn print_run_report(report: &RunReport) {
    println!("=== Run {} ({}) ===\n", report.run_id, report.status.to_db_string());
    println!("Captured at: {}", report.captured_at);
    println!();

    println!("Crawl:");
    println!("  Partitions fetched: {}", report.crawl.partitions_fetched);
    println!("  Partitions split: {}", report.crawl.partitions_split);
    println!(
        "  Partitions stalled and accepted lossy: {}",
        report.crawl.partitions_lossy
    );
    println!("  Pages fetched: {}", report.crawl.pages_fetched);
    println!("  Failed page requests: {}", report.crawl.failed_requests);
    println!("  Identities seen: {}", report.crawl.identities_seen);
    println!("  Duplicates suppressed: {}", report.crawl.duplicates_suppressed);
    println!();

    println!("Ingestion:");
    println!("  Records received: {}", report.ingest.records_received);
    println!("  Records written: {}", report.records_written());
    println!("  Low-confidence records: {}", report.ingest.low_confidence);
    println!("  Records skipped: {}", report.records_skipped());
    for (reason, count) in report.skipped_by_reason() {
        println!("    {}: {}", reason.as_str(), count);
    }
    println!("  Row retries: {}", report.ingest.row_retries);
    println!(
        "  Batches: {} committed, {} failed",
        report.ingest.batches_committed, report.ingest.batches_failed
    );
}
