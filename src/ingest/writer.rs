//! Single-consumer ingestion writer
//!
//! Drains the record channel in micro-batches. Each batch is one storage
//! transaction; each record inside it gets its own savepoint so a failing
//! record is rolled back alone.

use crate::ingest::resolver::{EntityResolver, WriteOutcome};
use crate::ingest::retry::{ErrorClass, RetryPolicy};
use crate::record::Record;
use crate::storage::{Storage, StorageError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a record was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Lock contention outlasted the row retry budget
    TransientExhausted,
    /// A non-retryable storage error
    FatalStorage,
    /// The record was written but its batch failed to commit
    BatchCommitFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientExhausted => "transient-exhausted",
            Self::FatalStorage => "fatal-storage",
            Self::BatchCommitFailed => "batch-commit-failed",
        }
    }
}

/// Skipped records broken down by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub transient_exhausted: u64,
    pub fatal_storage: u64,
    pub batch_commit_failed: u64,
}

impl SkipCounts {
    fn add(&mut self, reason: SkipReason, n: u64) {
        match reason {
            SkipReason::TransientExhausted => self.transient_exhausted += n,
            SkipReason::FatalStorage => self.fatal_storage += n,
            SkipReason::BatchCommitFailed => self.batch_commit_failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.transient_exhausted + self.fatal_storage + self.batch_commit_failed
    }
}

/// Counters accumulated by the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub records_received: u64,
    pub records_written: u64,
    pub low_confidence: u64,
    pub skipped: SkipCounts,
    pub row_retries: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
}

enum RowResult {
    Written(WriteOutcome),
    Skipped(SkipReason),
}

/// Drains records from the crawl and commits them in micro-batches
///
/// The writer owns its storage exclusively. It flushes when the buffer
/// reaches `batch_size`, when the oldest buffered record has waited
/// `commit_interval`, when cancellation is observed and when the channel
/// closes.
pub struct IngestionWriter<S: Storage> {
    storage: S,
    resolver: EntityResolver,
    retry: RetryPolicy,
    batch_size: usize,
    commit_interval: Duration,
    report: IngestReport,
}

impl<S: Storage> IngestionWriter<S> {
    pub fn new(
        storage: S,
        resolver: EntityResolver,
        retry: RetryPolicy,
        batch_size: usize,
        commit_interval: Duration,
    ) -> Self {
        Self {
            storage,
            resolver,
            retry,
            batch_size: batch_size.max(1),
            commit_interval,
            report: IngestReport::default(),
        }
    }

    /// Runs until the channel is closed and drained
    ///
    /// Cancellation flushes the current buffer immediately; records still in
    /// the channel are drained afterwards, since workers stop producing but do
    /// not discard what they already sent.
    ///
    /// # Returns
    ///
    /// The storage (for run bookkeeping) and the accumulated counters
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Record>,
        cancel: CancellationToken,
    ) -> (S, IngestReport) {
        let mut buffer: Vec<Record> = Vec::with_capacity(self.batch_size);
        let deadline = tokio::time::sleep(self.commit_interval);
        tokio::pin!(deadline);
        let mut cancel_seen = false;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => {
                        self.report.records_received += 1;
                        buffer.push(record);
                        if buffer.len() == 1 {
                            deadline.as_mut().reset(Instant::now() + self.commit_interval);
                        }
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => break,
                },
                _ = &mut deadline, if !buffer.is_empty() => {
                    debug!("Commit interval elapsed with {} buffered records", buffer.len());
                    self.flush(&mut buffer).await;
                }
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!("Writer observed cancellation; flushing and draining");
                    self.flush(&mut buffer).await;
                }
            }
        }

        self.flush(&mut buffer).await;

        info!(
            "Writer finished: {} written, {} skipped, {} batches committed, {} failed",
            self.report.records_written,
            self.report.skipped.total(),
            self.report.batches_committed,
            self.report.batches_failed
        );
        (self.storage, self.report)
    }

    /// Writes and commits everything in `buffer` as one batch
    async fn flush(&mut self, buffer: &mut Vec<Record>) {
        if buffer.is_empty() {
            return;
        }
        let batch: Vec<Record> = std::mem::take(buffer);

        if let Err(e) = self.storage.begin_batch() {
            error!("Failed to open batch of {} records: {}", batch.len(), e);
            self.abandon_batch(batch.len() as u64);
            return;
        }

        let mut written = 0u64;
        let mut low_confidence = 0u64;
        let mut skipped = SkipCounts::default();

        for (index, record) in batch.iter().enumerate() {
            match self.write_record(index, record).await {
                RowResult::Written(outcome) => {
                    written += 1;
                    if outcome.low_confidence {
                        low_confidence += 1;
                    }
                }
                RowResult::Skipped(reason) => skipped.add(reason, 1),
            }
        }

        self.report.skipped.transient_exhausted += skipped.transient_exhausted;
        self.report.skipped.fatal_storage += skipped.fatal_storage;

        match self.storage.commit_batch() {
            Ok(()) => {
                self.report.records_written += written;
                self.report.low_confidence += low_confidence;
                self.report.batches_committed += 1;
                debug!(
                    "Committed batch: {} written, {} skipped",
                    written,
                    skipped.total()
                );
            }
            Err(e) => {
                error!("Commit of batch with {} records failed: {}", written, e);
                self.abandon_batch(written);
            }
        }
    }

    /// Rolls back the open batch, reconnects, and counts its records as skipped
    fn abandon_batch(&mut self, records: u64) {
        if let Err(e) = self.storage.rollback_batch() {
            warn!("Batch rollback failed: {}", e);
        }
        if let Err(e) = self.storage.reconnect() {
            error!("Reconnect after failed batch did not succeed: {}", e);
        }
        self.report.batches_failed += 1;
        self.report
            .skipped
            .add(SkipReason::BatchCommitFailed, records);
    }

    /// Resolves one record inside its own savepoint, retrying lock contention
    async fn write_record(&mut self, index: usize, record: &Record) -> RowResult {
        let savepoint = format!("sp_row_{}", index);
        let mut attempt = 0;

        loop {
            let result = match self.storage.savepoint(&savepoint) {
                Ok(()) => self.resolver.resolve_and_write(&mut self.storage, record),
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => {
                    if let Err(e) = self.storage.release_savepoint(&savepoint) {
                        warn!("Failed to release {}: {}", savepoint, e);
                    }
                    return RowResult::Written(outcome);
                }
                Err(e) => {
                    self.discard_savepoint(&savepoint);

                    if self.retry.should_retry(&e, attempt) {
                        let delay = self.retry.backoff(attempt);
                        attempt += 1;
                        self.report.row_retries += 1;
                        warn!(
                            "Retryable storage error for {} ({}); retry {}/{} in {:?}",
                            record.natural_keys(),
                            e,
                            attempt,
                            self.retry.max_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        if let Err(e) = self.storage.reconnect() {
                            warn!("Reconnect before retry failed: {}", e);
                        }
                        continue;
                    }

                    let reason = skip_reason(self.retry.classify(&e));
                    warn!(
                        "Skipping record {} [{}]: {}",
                        record.natural_keys(),
                        reason.as_str(),
                        e
                    );
                    return RowResult::Skipped(reason);
                }
            }
        }
    }

    fn discard_savepoint(&mut self, savepoint: &str) {
        let result: Result<(), StorageError> = self
            .storage
            .rollback_to_savepoint(savepoint)
            .and_then(|_| self.storage.release_savepoint(savepoint));
        if let Err(e) = result {
            warn!("Failed to roll back {}: {}", savepoint, e);
        }
    }
}

fn skip_reason(class: ErrorClass) -> SkipReason {
    match class {
        ErrorClass::Retryable => SkipReason::TransientExhausted,
        ErrorClass::Fatal => SkipReason::FatalStorage,
    }
}
