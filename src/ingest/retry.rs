//! Row-level retry policy for storage writes

use crate::config::WriterConfig;
use crate::storage::StorageError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// How a storage error should be handled for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lock wait timeout or deadlock; roll back the record and try again
    Retryable,
    /// Anything else; roll back the record and skip it
    Fatal,
}

/// Decides whether a storage error is worth retrying
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &StorageError) -> ErrorClass;
}

/// Classifies with [`StorageError::is_transient`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &StorageError) -> ErrorClass {
        if error.is_transient() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }
}

/// Retry budget, backoff schedule and classifier for per-record writes
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_jitter: Duration,
    classifier: Arc<dyn ErrorClassifier>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration, max_jitter: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_jitter,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn from_config(config: &WriterConfig) -> Self {
        Self::new(
            config.max_row_retries,
            Duration::from_millis(config.row_backoff_ms),
            Duration::from_millis(config.row_jitter_ms),
        )
    }

    /// Replaces the error classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classify(&self, error: &StorageError) -> ErrorClass {
        self.classifier.classify(error)
    }

    /// Whether a failure on zero-based `attempt` may be retried
    pub fn should_retry(&self, error: &StorageError, attempt: u32) -> bool {
        attempt < self.max_retries && self.classify(error) == ErrorClass::Retryable
    }

    /// Delay before retry number `attempt`: `base * 2^attempt` plus random jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            exponential
        } else {
            let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
            exponential + Duration::from_millis(jitter)
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_backoff", &self.base_backoff)
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}
