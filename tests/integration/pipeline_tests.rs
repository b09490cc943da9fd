//! Integration tests for the crawl pipeline
//!
//! These tests wire in-process fake collaborators into the full pipeline:
//! orchestrator, bounded channel, writer and SQLite storage.

use async_trait::async_trait;
use serde_json::{json, Value};
use shelf_ripple::catalog::{Facet, Partition, PartitionPlanner, TaxonomyNode};
use shelf_ripple::config::{
    Config, CrawlerConfig, HttpConfig, OutputConfig, SplitConfig, StoreConfig, WriterConfig,
};
use shelf_ripple::crawler::{
    crawl, CatalogSources, CrawlOrchestrator, FetchPolicy, ListingSource, NormalizeError, RawEntry,
    RecordNormalizer, RunParams, SourceError, TaxonomySource,
};
use shelf_ripple::record::{parse_price, Record, SecondaryIdentity};
use shelf_ripple::storage::{RunStatus, SqliteStorage, Storage};
use shelf_ripple::CrawlError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CAPTURED_AT: &str = "2024-05-01T10:00:00+00:00";

type Script = dyn Fn(&Partition, u32) -> Vec<Value> + Send + Sync;

/// Serves whatever the script returns for a (partition, offset) pair
struct ScriptedListing {
    script: Box<Script>,
    requests: AtomicUsize,
}

impl ScriptedListing {
    fn new(script: impl Fn(&Partition, u32) -> Vec<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ListingSource for ScriptedListing {
    async fn fetch_window(
        &self,
        partition: &Partition,
        from: u32,
        _to: u32,
    ) -> Result<Vec<RawEntry>, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok((self.script)(partition, from)
            .into_iter()
            .map(|payload| RawEntry {
                payload,
                path: partition.path.clone(),
            })
            .collect())
    }
}

struct StaticTaxonomy(Vec<TaxonomyNode>);

#[async_trait]
impl TaxonomySource for StaticTaxonomy {
    async fn load_taxonomy(&self) -> Result<Vec<TaxonomyNode>, SourceError> {
        Ok(self.0.clone())
    }
}

/// Reads `{"sku": ..., "ean": ...}` payloads
#[derive(Default)]
struct JsonNormalizer {
    calls: AtomicUsize,
}

impl RecordNormalizer for JsonNormalizer {
    fn normalize(&self, entry: &RawEntry) -> Result<Record, NormalizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sku = entry
            .payload
            .get("sku")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MissingField("sku".to_string()))?;

        Ok(Record {
            primary_identity: entry.payload.get("ean").and_then(Value::as_str).map(String::from),
            secondary_identity: SecondaryIdentity {
                name: Some(format!("Producto {}", sku)),
                brand: None,
            },
            store_sku: Some(sku.to_string()),
            list_price: parse_price("100"),
            offer_price: parse_price("90"),
            url: format!("https://tienda.com/{}/p", sku),
            ..Default::default()
        })
    }
}

fn create_test_config(db_path: &str) -> Config {
    Config {
        crawler: CrawlerConfig {
            worker_count: 2,
            queue_capacity: 16,
            page_size: 10,
            empty_threshold: 1,
            stagnation_threshold: 2,
            max_offset: 500,
            max_escalation_depth: 2,
        },
        http: HttpConfig {
            user_agent: "shelf-ripple-test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            backoff_base_ms: 1,
        },
        writer: WriterConfig {
            batch_size: 4,
            commit_interval_ms: 50,
            max_row_retries: 1,
            row_backoff_ms: 1,
            row_jitter_ms: 0,
        },
        split: SplitConfig {
            sales_channels: vec!["1".to_string()],
            tokens: vec!["a".to_string(), "b".to_string()],
            price_ranges: vec![[0, 500], [500, 1_000]],
        },
        store: StoreConfig {
            code: "tienda".to_string(),
            display_name: "Tienda".to_string(),
            base_url: "https://tienda.com".to_string(),
            tree_depth: 2,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
    }
}

fn leaves(paths: &[&str]) -> Vec<TaxonomyNode> {
    paths
        .iter()
        .map(|p| TaxonomyNode {
            path: vec![p.to_string()],
            name: p.to_string(),
            children: vec![],
        })
        .collect()
}

fn sources(
    taxonomy: Vec<TaxonomyNode>,
    listing: Arc<dyn ListingSource>,
    normalizer: Arc<dyn RecordNormalizer>,
) -> CatalogSources {
    CatalogSources {
        taxonomy: Arc::new(StaticTaxonomy(taxonomy)),
        listing,
        facets: None,
        normalizer,
    }
}

fn params(captured_at: &str) -> RunParams {
    RunParams {
        captured_at: captured_at.to_string(),
        config_hash: "test-hash".to_string(),
    }
}

/// Ten distinct SKUs per page for three pages, per category
fn three_pages(partition: &Partition, from: u32) -> Vec<Value> {
    if from >= 30 || partition.facet.is_some() {
        return Vec::new();
    }
    (0..10)
        .map(|i| json!({ "sku": format!("{}-{}", partition.path[0], from + i) }))
        .collect()
}

#[tokio::test]
async fn test_stalled_partition_is_split_without_losing_identities() {
    // every unfiltered window repeats the same product, so pages 2 and 3 add nothing new
    let listing = ScriptedListing::new(|partition, from| match &partition.facet {
        None if from < 30 => vec![json!({ "sku": "cola" }); 17],
        Some(Facet::Token(token)) if from == 0 => vec![
            json!({ "sku": "cola" }),
            json!({ "sku": format!("drink-{}", token) }),
        ],
        _ => Vec::new(),
    });
    let config = create_test_config(":memory:");
    let storage = SqliteStorage::new_in_memory().unwrap();

    let (storage, report) = crawl(
        &config,
        sources(leaves(&["drinks"]), listing, Arc::new(JsonNormalizer::default())),
        storage,
        params(CAPTURED_AT),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.crawl.partitions_split, 1);
    assert_eq!(report.crawl.partitions_fetched, 3);
    assert_eq!(report.crawl.partitions_lossy, 0);
    // cola before the split, one new drink per token child after it
    assert_eq!(report.crawl.identities_seen, 3);
    assert_eq!(report.records_written(), 3);
    assert_eq!(storage.count_rows().unwrap().listings, 3);
}

#[tokio::test]
async fn test_escalation_is_bounded() {
    let listing = ScriptedListing::new(|_, from| {
        if from < 30 {
            vec![json!({ "sku": "cola" })]
        } else {
            Vec::new()
        }
    });
    let config = create_test_config(":memory:");

    let (_, report) = crawl(
        &config,
        sources(leaves(&["drinks"]), listing, Arc::new(JsonNormalizer::default())),
        SqliteStorage::new_in_memory().unwrap(),
        params(CAPTURED_AT),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // root -> 2 token children -> 4 price children, which are accepted lossy
    assert_eq!(report.crawl.partitions_fetched, 7);
    assert_eq!(report.crawl.partitions_split, 3);
    assert_eq!(report.crawl.partitions_lossy, 4);
    assert_eq!(report.records_written(), 1);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_rerun_with_same_timestamp_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("prices.db");
    let config = create_test_config(db_path.to_str().unwrap());
    let normalizer: Arc<dyn RecordNormalizer> = Arc::new(JsonNormalizer::default());

    let storage = SqliteStorage::new(&db_path).unwrap();
    let (storage, first) = crawl(
        &config,
        sources(leaves(&["almacen", "bebidas"]), ScriptedListing::new(three_pages), normalizer.clone()),
        storage,
        params(CAPTURED_AT),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let after_first = storage.count_rows().unwrap();

    let (storage, second) = crawl(
        &config,
        sources(leaves(&["almacen", "bebidas"]), ScriptedListing::new(three_pages), normalizer.clone()),
        storage,
        params(CAPTURED_AT),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let after_second = storage.count_rows().unwrap();

    assert_eq!(first.records_written(), 60);
    assert_eq!(second.records_written(), 60);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.stores, 1);
    assert_eq!(after_second.catalog_entries, 60);
    assert_eq!(after_second.listings, 60);
    assert_eq!(after_second.snapshots, 60);

    // a new timestamp extends the series without touching identities
    let (storage, _) = crawl(
        &config,
        sources(leaves(&["almacen", "bebidas"]), ScriptedListing::new(three_pages), normalizer),
        storage,
        params("2024-05-02T10:00:00+00:00"),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let after_third = storage.count_rows().unwrap();
    assert_eq!(after_third.listings, 60);
    assert_eq!(after_third.snapshots, 120);

    let runs = storage.get_latest_runs(10).unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_backpressure_blocks_workers_at_capacity() {
    const CAPACITY: usize = 5;

    let listing = ScriptedListing::new(|_, from| {
        if from == 0 {
            (0..100).map(|i| json!({ "sku": format!("sku-{}", i) })).collect()
        } else {
            Vec::new()
        }
    });
    let normalizer = Arc::new(JsonNormalizer::default());
    let config = create_test_config(":memory:");

    let orchestrator = CrawlOrchestrator::new(
        PartitionPlanner::new(config.split.clone(), 2),
        listing,
        normalizer.clone(),
        FetchPolicy::from_config(&config),
        1,
        CancellationToken::new(),
    );
    let (tx, mut rx) = mpsc::channel(CAPACITY);
    let handle = tokio::spawn(async move { orchestrator.run(&leaves(&["almacen"]), tx).await });

    // nobody is receiving: the worker fills the channel and blocks on the next send
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());
    assert!(normalizer.calls.load(Ordering::SeqCst) <= CAPACITY + 1);

    let mut received = 0;
    while rx.recv().await.is_some() {
        received += 1;
    }

    let summary = handle.await.unwrap();
    assert!(summary.fatal.is_none());
    assert_eq!(received, 100);
    assert_eq!(summary.stats.records_published, 100);
}

/// Trips the cancellation token while serving the second window
struct CancellingListing {
    cancel: CancellationToken,
}

#[async_trait]
impl ListingSource for CancellingListing {
    async fn fetch_window(
        &self,
        partition: &Partition,
        from: u32,
        _to: u32,
    ) -> Result<Vec<RawEntry>, SourceError> {
        if from == 10 {
            self.cancel.cancel();
        }
        Ok((0..10)
            .map(|i| RawEntry {
                payload: json!({ "sku": format!("{}-{}", partition.path[0], from + i) }),
                path: partition.path.clone(),
            })
            .collect())
    }
}

#[tokio::test]
async fn test_cancellation_drains_produced_records() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("prices.db");
    let mut config = create_test_config(db_path.to_str().unwrap());
    config.crawler.worker_count = 1;

    let cancel = CancellationToken::new();
    let listing = Arc::new(CancellingListing {
        cancel: cancel.clone(),
    });

    let (storage, report) = crawl(
        &config,
        sources(leaves(&["almacen", "bebidas"]), listing, Arc::new(JsonNormalizer::default())),
        SqliteStorage::new(&db_path).unwrap(),
        params(CAPTURED_AT),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.crawl.partitions_fetched, 1);
    // both windows fetched before the stop was observed are written
    assert_eq!(report.crawl.records_published, 20);
    assert_eq!(report.records_written(), 20);
    assert_eq!(storage.count_rows().unwrap().snapshots, 20);

    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.records_written, 20);
}

#[tokio::test]
async fn test_normalizer_error_fails_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("prices.db");
    let config = create_test_config(db_path.to_str().unwrap());

    let listing = ScriptedListing::new(|_, from| {
        if from == 0 {
            vec![json!({ "sku": "ok" }), json!({ "unexpected": true })]
        } else {
            Vec::new()
        }
    });

    let result = crawl(
        &config,
        sources(leaves(&["almacen"]), listing, Arc::new(JsonNormalizer::default())),
        SqliteStorage::new(&db_path).unwrap(),
        params(CAPTURED_AT),
        CancellationToken::new(),
    )
    .await;

    let report = match result {
        Err(CrawlError::RunFailed { report, source }) => {
            assert!(matches!(*source, CrawlError::Normalize(_)));
            report
        }
        other => panic!("expected a failed run, got {:?}", other.map(|(_, r)| r)),
    };
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.records_written(), 1);
    assert_eq!(report.records_skipped(), 0);
    assert_eq!(report.crawl.partitions_fetched, 1);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let runs = storage.get_latest_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    // the record published before the failure was still written
    assert_eq!(runs[0].records_written, 1);
}

/// Panics on entries from one category
struct PanickingNormalizer {
    category: &'static str,
}

impl RecordNormalizer for PanickingNormalizer {
    fn normalize(&self, entry: &RawEntry) -> Result<Record, NormalizeError> {
        if entry.path[0] == self.category {
            panic!("normalizer bug on {}", self.category);
        }
        JsonNormalizer::default().normalize(entry)
    }
}

#[tokio::test]
async fn test_worker_panic_fails_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("prices.db");
    let config = create_test_config(db_path.to_str().unwrap());

    let listing = ScriptedListing::new(three_pages);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        crawl(
            &config,
            sources(
                leaves(&["ok", "boom"]),
                listing,
                Arc::new(PanickingNormalizer { category: "boom" }),
            ),
            SqliteStorage::new(&db_path).unwrap(),
            params(CAPTURED_AT),
            CancellationToken::new(),
        ),
    )
    .await
    .expect("crawl hung after a worker panic");

    match result {
        Err(CrawlError::RunFailed { report, source }) => {
            assert!(matches!(*source, CrawlError::Join(_)));
            assert_eq!(report.status, RunStatus::Failed);
        }
        other => panic!("expected a failed run, got {:?}", other.map(|(_, r)| r)),
    }

    let storage = SqliteStorage::new(&db_path).unwrap();
    let runs = storage.get_latest_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
}
