//! Ingestion side of the pipeline
//!
//! - [`IngestionWriter`]: single consumer batching records into transactions
//! - [`EntityResolver`]: record to store, catalog entry, listing and snapshot
//! - [`RetryPolicy`]: row-level retry budget, backoff and error classification

mod resolver;
mod retry;
mod writer;

pub use resolver::{EntityResolver, ResolveContext, WriteOutcome};
pub use retry::{DefaultClassifier, ErrorClass, ErrorClassifier, RetryPolicy};
pub use writer::{IngestReport, IngestionWriter, SkipCounts, SkipReason};
