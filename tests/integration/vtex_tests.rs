//! Integration tests for the VTEX collaborator
//!
//! These tests use wiremock to stand in for a VTEX storefront and exercise
//! the taxonomy, listing and facet endpoints, then a full run against them.

use serde_json::json;
use shelf_ripple::catalog::{Facet, Partition, SplitStage};
use shelf_ripple::config::{
    Config, CrawlerConfig, HttpConfig, OutputConfig, SplitConfig, StoreConfig, WriterConfig,
};
use shelf_ripple::crawler::{crawl, FacetSource, ListingSource, RunParams, SourceError, TaxonomySource};
use shelf_ripple::sites::{vtex_sources, VtexClient};
use shelf_ripple::storage::{ListingKey, RunStatus, SqliteStorage, Storage};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH_PATH: &str = "/api/catalog_system/pub/products/search/almacen/aceites";

fn create_test_config(base_url: &str) -> Config {
    Config {
        crawler: CrawlerConfig {
            worker_count: 2,
            queue_capacity: 10,
            page_size: 50,
            empty_threshold: 1,
            stagnation_threshold: 2,
            max_offset: 2500,
            max_escalation_depth: 2,
        },
        http: HttpConfig {
            user_agent: "shelf-ripple-test".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            backoff_base_ms: 1,
        },
        writer: WriterConfig {
            batch_size: 10,
            commit_interval_ms: 100,
            max_row_retries: 2,
            row_backoff_ms: 1,
            row_jitter_ms: 0,
        },
        split: SplitConfig {
            sales_channels: vec!["1".to_string()],
            ..Default::default()
        },
        store: StoreConfig {
            code: "hiperlibertad".to_string(),
            display_name: "Hiper Libertad".to_string(),
            base_url: base_url.to_string(),
            tree_depth: 2,
        },
        output: OutputConfig {
            database_path: ":memory:".to_string(),
        },
    }
}

fn client(server: &MockServer) -> VtexClient {
    VtexClient::new(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        2,
        Some("1".to_string()),
    )
}

fn aceites() -> Partition {
    Partition::root(vec!["almacen".to_string(), "aceites".to_string()])
}

fn product(id: &str, ean: &str, items: usize) -> serde_json::Value {
    let items: Vec<_> = (0..items)
        .map(|i| {
            json!({
                "itemId": format!("{}{}", id, i),
                "ean": if i == 0 { ean.to_string() } else { String::new() },
                "nameComplete": format!("Aceite {} variante {}", id, i),
                "sellers": [{ "commertialOffer": { "ListPrice": 1500.0, "Price": 1200.0 } }]
            })
        })
        .collect();

    json!({
        "productId": id,
        "productName": format!("Aceite {}", id),
        "brand": "Natura",
        "linkText": format!("aceite-{}", id),
        "categories": ["/Almacén/Aceites/"],
        "items": items
    })
}

async fn mount_tree(server: &MockServer) {
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/api/catalog_system/pub/category/tree/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1,
                "name": "Almacén",
                "url": format!("{}/almacen", uri),
                "children": [
                    { "id": 2, "name": "Aceites", "url": format!("{}/almacen/aceites", uri), "children": [] }
                ]
            }
        ])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_taxonomy() {
    let server = MockServer::start().await;
    mount_tree(&server).await;

    let tree = client(&server).load_taxonomy().await.unwrap();

    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].path, vec!["almacen"]);
    assert_eq!(tree[0].children[0].path, vec!["almacen", "aceites"]);
    assert_eq!(tree[0].children[0].name, "Aceites");
    assert!(tree[0].children[0].is_leaf());
}

#[tokio::test]
async fn test_fetch_window_flattens_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("map", "c,c"))
        .and(query_param("_from", "0"))
        .and(query_param("_to", "49"))
        .and(query_param("sc", "1"))
        .respond_with(
            ResponseTemplate::new(206).set_body_json(json!([product("10", "7790001", 2), product("20", "7790002", 1)])),
        )
        .mount(&server)
        .await;

    let entries = client(&server).fetch_window(&aceites(), 0, 49).await.unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].payload["item"]["itemId"], "100");
    assert_eq!(entries[2].payload["product"]["productId"], "20");
    assert_eq!(entries[0].path, vec!["almacen", "aceites"]);
}

#[tokio::test]
async fn test_fetch_window_applies_facets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("fq", "B:2000123"))
        .and(query_param("sc", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([product("30", "7790003", 1)])))
        .mount(&server)
        .await;

    let partition = aceites()
        .rerun("2")
        .child(Facet::Brand("2000123".to_string()), SplitStage::Token);
    let entries = client(&server).fetch_window(&partition, 0, 49).await.unwrap();

    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_server_errors_are_reported_as_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).fetch_window(&aceites(), 0, 49).await.unwrap_err();

    assert_eq!(err, SourceError::Status(503));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_brand_facets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/catalog_system/pub/facets/search/almacen/aceites"))
        .and(query_param("map", "c,c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Brands": [
                { "Id": 2000123, "Name": "Natura", "Quantity": 12 },
                { "Id": 2000456, "Name": "Cocinero", "Quantity": 0 }
            ]
        })))
        .mount(&server)
        .await;

    let brands = client(&server).brands(&aceites()).await.unwrap();

    assert_eq!(brands.len(), 2);
    assert_eq!(brands[0].value, "2000123");
    assert_eq!(brands[0].count, Some(12));
    assert_eq!(brands[1].count, Some(0));
}

#[tokio::test]
async fn test_full_run_against_storefront() {
    let server = MockServer::start().await;
    mount_tree(&server).await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("_from", "0"))
        .respond_with(
            ResponseTemplate::new(206).set_body_json(json!([product("10", "7790001", 2), product("20", "7790002", 1)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("_from", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri());
    let sources = vtex_sources(&config).unwrap();
    let params = RunParams {
        captured_at: "2024-05-01T10:00:00+00:00".to_string(),
        config_hash: "test-hash".to_string(),
    };

    let (mut storage, report) = crawl(
        &config,
        sources,
        SqliteStorage::new_in_memory().unwrap(),
        params,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.crawl.partitions_fetched, 1);
    assert_eq!(report.crawl.failed_requests, 0);
    assert_eq!(report.records_written(), 3);

    let counts = storage.count_rows().unwrap();
    assert_eq!(counts.listings, 3);
    assert_eq!(counts.snapshots, 3);
    assert_eq!(counts.low_confidence_listings, 0);

    let store_id = storage.upsert_store("hiperlibertad", "Hiper Libertad").unwrap();
    let listing = storage
        .find_listing(store_id, &ListingKey::Sku("100".to_string()))
        .unwrap()
        .unwrap();
    let snapshot = storage
        .get_price_snapshot(listing.id, "2024-05-01T10:00:00+00:00")
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.list_price.as_deref(), Some("1500.00"));
    assert_eq!(snapshot.offer_price.as_deref(), Some("1200.00"));
    assert_eq!(snapshot.offer_label.as_deref(), Some("Oferta"));
    assert_eq!(
        listing.url.as_deref(),
        Some(format!("{}/aceite-10/p", server.uri()).as_str())
    );
}
