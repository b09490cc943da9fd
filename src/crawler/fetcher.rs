//! Windowed pagination over one partition
//!
//! This module handles:
//! - Building the shared HTTP client
//! - Walking a partition window by window (`_from`..`_to`)
//! - Per-request retry with exponential backoff
//! - Detecting exhaustion, stagnation and truncation

use crate::catalog::{Partition, StallReason};
use crate::config::{Config, HttpConfig};
use crate::crawler::sources::{ListingSource, RawEntry};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Builds the HTTP client shared by all catalog requests
///
/// # Arguments
///
/// * `config` - HTTP section of the configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Pagination and retry limits applied to every partition
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub page_size: u32,
    pub empty_threshold: u32,
    pub stagnation_threshold: u32,
    pub max_offset: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl FetchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.crawler.page_size,
            empty_threshold: config.crawler.empty_threshold,
            stagnation_threshold: config.crawler.stagnation_threshold,
            max_offset: config.crawler.max_offset,
            max_retries: config.http.max_retries,
            backoff_base: config.http.backoff_base(),
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// One non-empty window of raw entries
#[derive(Debug, Clone)]
pub struct RawPage {
    pub offset: u32,
    pub entries: Vec<RawEntry>,
}

/// What the fetcher produced on a call to [`PagedFetcher::next`]
#[derive(Debug, Clone)]
pub enum FetchStep {
    /// A page with at least one entry
    Page(RawPage),

    /// Enough consecutive empty pages; the partition is fully enumerated
    Exhausted,

    /// Pages kept coming but the partition cannot be enumerated further
    Stalled(StallReason),
}

/// Enumerates one partition page by page
///
/// The caller reports how many previously unseen identities each page
/// contributed through [`PagedFetcher::record_new_identities`]; that feedback
/// drives stagnation detection.
pub struct PagedFetcher {
    source: Arc<dyn ListingSource>,
    partition: Partition,
    policy: FetchPolicy,
    offset: u32,
    empty_streak: u32,
    stagnation_streak: u32,
    pages_fetched: u64,
    failed_requests: u64,
    terminal: Option<FetchStep>,
}

impl PagedFetcher {
    pub fn new(source: Arc<dyn ListingSource>, partition: Partition, policy: FetchPolicy) -> Self {
        Self {
            source,
            partition,
            policy,
            offset: 0,
            empty_streak: 0,
            stagnation_streak: 0,
            pages_fetched: 0,
            failed_requests: 0,
            terminal: None,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Window requests issued, including ones that came back empty
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Requests that failed for good and were treated as empty pages
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    /// Feeds back the number of unseen identities found on the last page
    pub fn record_new_identities(&mut self, new_identities: usize) {
        if new_identities == 0 {
            self.stagnation_streak += 1;
        } else {
            self.stagnation_streak = 0;
        }
    }

    /// Advances to the next non-empty page or a terminal state
    ///
    /// Once a terminal state is reached every further call returns it again.
    pub async fn next(&mut self) -> FetchStep {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }

        loop {
            if self.stagnation_streak >= self.policy.stagnation_threshold {
                return self.finish(FetchStep::Stalled(StallReason::Stagnation));
            }

            if self.offset >= self.policy.max_offset {
                let step = if self.empty_streak > 0 {
                    FetchStep::Exhausted
                } else {
                    FetchStep::Stalled(StallReason::Truncated)
                };
                return self.finish(step);
            }

            let from = self.offset;
            let to = from + self.policy.page_size - 1;
            let entries = self.fetch_with_retry(from, to).await;

            self.offset += self.policy.page_size;
            self.pages_fetched += 1;

            if entries.is_empty() {
                self.empty_streak += 1;
                debug!(
                    "Empty window {}-{} for {} (streak {})",
                    from, to, self.partition, self.empty_streak
                );
                if self.empty_streak >= self.policy.empty_threshold {
                    return self.finish(FetchStep::Exhausted);
                }
                continue;
            }

            self.empty_streak = 0;
            debug!(
                "Window {}-{} for {} returned {} entries",
                from,
                to,
                self.partition,
                entries.len()
            );
            return FetchStep::Page(RawPage {
                offset: from,
                entries,
            });
        }
    }

    fn finish(&mut self, step: FetchStep) -> FetchStep {
        self.terminal = Some(step.clone());
        step
    }

    /// Issues one window request, retrying transient failures
    ///
    /// A request that fails for good degrades to an empty window.
    async fn fetch_with_retry(&mut self, from: u32, to: u32) -> Vec<RawEntry> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_window(&self.partition, from, to).await {
                Ok(entries) => return entries,
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Window {}-{} for {} failed ({}); retry {}/{} in {:?}",
                        from, to, self.partition, e, attempt, self.policy.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.failed_requests += 1;
                    warn!(
                        "Window {}-{} for {} failed ({}); treating as empty",
                        from, to, self.partition, e
                    );
                    return Vec::new();
                }
            }
        }
    }
}
