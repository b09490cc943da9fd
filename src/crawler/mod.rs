//! Crawler module: partition enumeration and the crawl pipeline
//!
//! This module contains the fetch side of a run, including:
//! - Collaborator traits for taxonomy, listing and facet sources
//! - Windowed pagination with exhaustion and stall detection
//! - The shared partition queue and seen-identity set
//! - Worker pool orchestration and the pipeline entry point

mod coordinator;
mod fetcher;
mod scheduler;
mod seen;
mod sources;

pub use coordinator::{CrawlOrchestrator, CrawlStats, CrawlSummary};
pub use fetcher::{build_http_client, FetchPolicy, FetchStep, PagedFetcher, RawPage};
pub use scheduler::PartitionQueue;
pub use seen::SeenSet;
pub use sources::{
    FacetSource, FacetValue, ListingSource, NormalizeError, RawEntry, RecordNormalizer,
    SourceError, TaxonomySource,
};

use crate::catalog::PartitionPlanner;
use crate::config::Config;
use crate::ingest::{EntityResolver, IngestionWriter, ResolveContext, RetryPolicy};
use crate::output::RunReport;
use crate::storage::{RunStatus, RunSummary, Storage};
use crate::{CrawlError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The per-site collaborators a run is wired with
#[derive(Clone)]
pub struct CatalogSources {
    pub taxonomy: Arc<dyn TaxonomySource>,
    pub listing: Arc<dyn ListingSource>,
    /// Optional; without it brand splitting is skipped
    pub facets: Option<Arc<dyn FacetSource>>,
    pub normalizer: Arc<dyn RecordNormalizer>,
}

/// Identifies one run in storage
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Timestamp shared by every snapshot the run writes
    pub captured_at: String,
    /// Hash of the configuration file that produced the run
    pub config_hash: String,
}

/// Runs a complete crawl
///
/// This is the main entry point for a run. It will:
/// 1. Load the taxonomy (fatal on failure)
/// 2. Create the run row
/// 3. Spawn the ingestion writer on the bounded record channel
/// 4. Run the fetch workers until the partition queue drains or `cancel` trips
/// 5. Wait for the writer to flush and drain
/// 6. Finalize the run row with its status and counters
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `sources` - Site collaborators
/// * `storage` - Storage handed to the writer for the duration of the run
/// * `params` - Capture timestamp and config hash
/// * `cancel` - Cooperative stop signal
///
/// # Returns
///
/// * `Ok((storage, report))` - The run finished, completed or cancelled
/// * `Err(CrawlError::RunFailed)` - A fatal error aborted the run; carries its report
/// * `Err(CrawlError)` - Setup failed before the run started
pub async fn crawl<S>(
    config: &Config,
    sources: CatalogSources,
    mut storage: S,
    params: RunParams,
    cancel: CancellationToken,
) -> Result<(S, RunReport)>
where
    S: Storage + Send + 'static,
{
    let taxonomy = sources.taxonomy.load_taxonomy().await?;
    if taxonomy.is_empty() {
        tracing::warn!("Taxonomy source returned no categories");
    }

    let run_id = storage.create_run(&params.config_hash, &params.captured_at)?;
    tracing::info!("Starting run {} captured at {}", run_id, params.captured_at);

    let (tx, rx) = mpsc::channel(config.crawler.queue_capacity.max(1));

    let resolver = EntityResolver::new(ResolveContext {
        store_code: config.store.code.clone(),
        store_name: config.store.display_name.clone(),
        captured_at: params.captured_at.clone(),
    });
    let writer = IngestionWriter::new(
        storage,
        resolver,
        RetryPolicy::from_config(&config.writer),
        config.writer.batch_size,
        config.writer.commit_interval(),
    );
    let writer_handle = tokio::spawn(writer.run(rx, cancel.clone()));

    let mut planner = PartitionPlanner::new(config.split.clone(), config.crawler.max_escalation_depth);
    if let Some(facets) = sources.facets {
        planner = planner.with_facet_source(facets);
    }
    let orchestrator = CrawlOrchestrator::new(
        planner,
        sources.listing,
        sources.normalizer,
        FetchPolicy::from_config(config),
        config.crawler.worker_count,
        cancel.clone(),
    );

    let CrawlSummary { stats, fatal } = orchestrator.run(&taxonomy, tx).await;
    let (mut storage, ingest) = writer_handle.await?;

    let status = if fatal.is_some() {
        RunStatus::Failed
    } else if cancel.is_cancelled() {
        RunStatus::Cancelled
    } else {
        RunStatus::Completed
    };

    storage.finish_run(
        run_id,
        status,
        &RunSummary {
            records_written: ingest.records_written,
            records_skipped: ingest.skipped.total(),
            partitions_lossy: stats.partitions_lossy,
        },
    )?;

    let report = RunReport {
        run_id,
        status,
        captured_at: params.captured_at,
        crawl: stats,
        ingest,
    };

    match fatal {
        Some(error) => {
            tracing::error!(
                "Run {} failed after writing {} records: {}",
                run_id,
                report.ingest.records_written,
                error
            );
            Err(CrawlError::RunFailed {
                report: Box::new(report),
                source: Box::new(error),
            })
        }
        None => {
            tracing::info!("Run {} {}", run_id, status.to_db_string());
            Ok((storage, report))
        }
    }
}

