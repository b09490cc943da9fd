//! Statistics loaded from the price database

use crate::storage::{RunRecord, Storage, StorageResult, StoreCounts};

/// Row counts and recent run history
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    pub counts: StoreCounts,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `run_limit` - How many recent runs to include
pub fn load_statistics<S: Storage + ?Sized>(
    storage: &S,
    run_limit: usize,
) -> StorageResult<StoreStatistics> {
    Ok(StoreStatistics {
        counts: storage.count_rows()?,
        recent_runs: storage.get_latest_runs(run_limit)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Price Database Statistics ===\n");

    let counts = &stats.counts;
    println!("Overview:");
    println!("  Stores: {}", counts.stores);
    println!("  Catalog entries: {}", counts.catalog_entries);
    println!("  Store listings: {}", counts.listings);
    let low_share = if counts.listings > 0 {
        (counts.low_confidence_listings as f64 / counts.listings as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "  Low-confidence listings: {} ({:.1}%)",
        counts.low_confidence_listings, low_share
    );
    println!("  Price snapshots: {}", counts.snapshots);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} captured {} ({} written, {} skipped, {} lossy partitions)",
            run.id,
            run.status.to_db_string(),
            run.captured_at,
            run.records_written,
            run.records_skipped,
            run.partitions_lossy
        );
    }
}
