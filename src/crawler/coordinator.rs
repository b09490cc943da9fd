//! Crawl orchestration
//!
//! The orchestrator runs a fixed pool of fetch workers over the partition
//! queue. Each worker drives a [`PagedFetcher`], normalizes entries,
//! deduplicates them against the shared [`SeenSet`] and publishes new
//! records onto the bounded channel. Stalled partitions are handed to the
//! [`PartitionPlanner`] and their children go back onto the queue.

use crate::catalog::{Partition, PartitionPlanner, TaxonomyNode};
use crate::crawler::fetcher::{FetchPolicy, FetchStep, PagedFetcher, RawPage};
use crate::crawler::scheduler::PartitionQueue;
use crate::crawler::seen::SeenSet;
use crate::crawler::sources::{ListingSource, NormalizeError, RecordNormalizer};
use crate::record::Record;
use crate::CrawlError;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Counters accumulated by the fetch workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub partitions_fetched: u64,
    pub partitions_split: u64,
    pub partitions_lossy: u64,
    pub pages_fetched: u64,
    pub failed_requests: u64,
    pub records_published: u64,
    pub duplicates_suppressed: u64,
    pub identities_seen: u64,
}

/// How the crawl side of a run ended
#[derive(Debug)]
pub struct CrawlSummary {
    pub stats: CrawlStats,
    /// Set when a worker hit an error that aborts the run
    pub fatal: Option<CrawlError>,
}

enum PageError {
    Normalize(NormalizeError),
    ChannelClosed,
}

struct Shared {
    queue: PartitionQueue,
    seen: SeenSet,
    planner: PartitionPlanner,
    listing: Arc<dyn ListingSource>,
    normalizer: Arc<dyn RecordNormalizer>,
    policy: FetchPolicy,
    cancel: CancellationToken,
    stats: Mutex<CrawlStats>,
    fatal: Mutex<Option<CrawlError>>,
}

/// Runs the fetch worker pool for one crawl
pub struct CrawlOrchestrator {
    planner: PartitionPlanner,
    listing: Arc<dyn ListingSource>,
    normalizer: Arc<dyn RecordNormalizer>,
    policy: FetchPolicy,
    worker_count: usize,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    /// Creates a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `planner` - Produces and splits partitions
    /// * `listing` - Paginated listing source shared by all workers
    /// * `normalizer` - Turns raw entries into records
    /// * `policy` - Pagination, stall and HTTP retry limits
    /// * `worker_count` - Number of concurrent fetch workers
    /// * `cancel` - Cooperative stop signal, also tripped on fatal errors
    pub fn new(
        planner: PartitionPlanner,
        listing: Arc<dyn ListingSource>,
        normalizer: Arc<dyn RecordNormalizer>,
        policy: FetchPolicy,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            planner,
            listing,
            normalizer,
            policy,
            worker_count: worker_count.max(1),
            cancel,
        }
    }

    /// Crawls every leaf of `taxonomy`, publishing new records on `tx`
    ///
    /// Returns once every worker has exited: the queue is drained, or the
    /// cancellation token was tripped. The sender is dropped on return so
    /// the writer sees the channel close.
    pub async fn run(self, taxonomy: &[TaxonomyNode], tx: mpsc::Sender<Record>) -> CrawlSummary {
        let partitions = self.planner.initial_partitions(taxonomy);
        tracing::info!(
            "Starting crawl of {} partitions with {} workers",
            partitions.len(),
            self.worker_count
        );

        let shared = Arc::new(Shared {
            queue: PartitionQueue::new(partitions),
            seen: SeenSet::new(),
            planner: self.planner,
            listing: self.listing,
            normalizer: self.normalizer,
            policy: self.policy,
            cancel: self.cancel,
            stats: Mutex::new(CrawlStats::default()),
            fatal: Mutex::new(None),
        });

        let start_time = std::time::Instant::now();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.worker_count {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            workers.spawn(async move { shared.worker_loop(worker_id, tx).await });
        }
        drop(tx);

        // joined in completion order so a panicked worker aborts the others promptly
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                shared.abort(CrawlError::Join(e));
            }
        }

        let mut stats = *shared.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.identities_seen = shared.seen.len() as u64;
        let fatal = shared
            .fatal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        tracing::info!(
            "Crawl finished in {:?}: {} partitions, {} split, {} lossy, {} pages, {} records published",
            start_time.elapsed(),
            stats.partitions_fetched,
            stats.partitions_split,
            stats.partitions_lossy,
            stats.pages_fetched,
            stats.records_published
        );

        if shared.seen.is_empty() && fatal.is_none() {
            tracing::warn!("Crawl finished without publishing any identity");
        }

        CrawlSummary { stats, fatal }
    }
}

impl Shared {
    async fn worker_loop(&self, worker_id: usize, tx: mpsc::Sender<Record>) {
        tracing::debug!("Worker {} started", worker_id);

        while let Some(partition) = self.queue.pop(&self.cancel).await {
            let mut guard = InFlight {
                shared: self,
                finished: false,
            };
            let children = self.crawl_partition(partition, &tx).await;
            guard.finished = true;
            self.queue.complete(children);
        }

        tracing::debug!("Worker {} exiting", worker_id);
    }

    /// Enumerates one partition and returns the partitions that replace it
    async fn crawl_partition(&self, partition: Partition, tx: &mpsc::Sender<Record>) -> Vec<Partition> {
        tracing::debug!("Crawling {}", partition);
        let mut fetcher = PagedFetcher::new(Arc::clone(&self.listing), partition, self.policy.clone());
        let mut published = 0u64;
        let mut duplicates = 0u64;

        let stalled = loop {
            if self.cancel.is_cancelled() {
                break None;
            }

            match fetcher.next().await {
                FetchStep::Page(page) => match self.publish_page(page, tx).await {
                    Ok((new, dups)) => {
                        published += new as u64;
                        duplicates += dups;
                        fetcher.record_new_identities(new);
                    }
                    Err(PageError::Normalize(e)) => {
                        self.abort(CrawlError::Normalize(e));
                        break None;
                    }
                    Err(PageError::ChannelClosed) => {
                        self.abort(CrawlError::Aborted("record channel closed".to_string()));
                        break None;
                    }
                },
                FetchStep::Exhausted => break None,
                FetchStep::Stalled(reason) => break Some(reason),
            }
        };

        let split = match stalled {
            Some(reason) if !self.cancel.is_cancelled() => {
                Some(self.planner.split(fetcher.partition(), reason).await)
            }
            _ => None,
        };

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.partitions_fetched += 1;
        stats.pages_fetched += fetcher.pages_fetched();
        stats.failed_requests += fetcher.failed_requests();
        stats.records_published += published;
        stats.duplicates_suppressed += duplicates;

        let children = match split {
            Some(outcome) => {
                if outcome.lossy {
                    stats.partitions_lossy += 1;
                }
                if !outcome.children.is_empty() {
                    stats.partitions_split += 1;
                }
                outcome.children
            }
            None => Vec::new(),
        };

        if stats.partitions_fetched % 10 == 0 {
            tracing::info!(
                "Progress: {} partitions done, {} queued, {} in flight, {} identities seen",
                stats.partitions_fetched,
                self.queue.pending() + children.len(),
                self.queue.in_flight(),
                self.seen.len()
            );
        }

        children
    }

    /// Normalizes and publishes a page
    ///
    /// Returns the number of newly seen records published and the number of
    /// duplicates suppressed. Sending blocks while the channel is full.
    async fn publish_page(
        &self,
        page: RawPage,
        tx: &mpsc::Sender<Record>,
    ) -> Result<(usize, u64), PageError> {
        let mut new_identities = 0;
        let mut duplicates = 0;

        for entry in &page.entries {
            let record = self.normalizer.normalize(entry).map_err(PageError::Normalize)?;

            match record.dedup_key() {
                Some(key) => {
                    if !self.seen.insert_if_new(&key) {
                        duplicates += 1;
                        continue;
                    }
                }
                None => {
                    tracing::warn!("Entry at offset {} has no usable identity; publishing anyway", page.offset);
                }
            }

            tx.send(record).await.map_err(|_| PageError::ChannelClosed)?;
            new_identities += 1;
        }

        Ok((new_identities, duplicates))
    }

    /// Records the first fatal error and stops the crawl
    fn abort(&self, error: CrawlError) {
        tracing::error!("Aborting crawl: {}", error);
        let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
        if fatal.is_none() {
            *fatal = Some(error);
        }
        self.cancel.cancel();
    }
}

/// Releases a popped partition when its worker unwinds before completing it
struct InFlight<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // nothing may keep waiting on a partition that will never complete
            self.shared.cancel.cancel();
            self.shared.queue.complete(Vec::new());
        }
    }
}
