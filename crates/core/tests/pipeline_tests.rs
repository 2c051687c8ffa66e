//! Integration tests for pipelines loading into DuckDB
//!
//! Sources run against canned API pages; the database lives in a temp dir.

#![cfg(feature = "duckdb-backend")]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use homelake_core::client::{ClientError, PageFetcher};
use homelake_core::config::Secret;
use homelake_core::destination::{Destination, DuckDbDestination, LoadStatus};
use homelake_core::pipeline::{Pipeline, PipelineConfig, PipelineError};
use homelake_core::sources::{BikeshareSource, ListenBrainzSource};
use homelake_core::state::CursorValue;

/// Serves queued pages and records the query parameters of each request
struct CannedApi {
    pages: Mutex<Vec<Result<Value, ClientError>>>,
    requests: std::sync::Arc<Mutex<Vec<Vec<(String, String)>>>>,
}

impl CannedApi {
    fn new(pages: Vec<Result<Value, ClientError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().rev().collect()),
            requests: Default::default(),
        }
    }
}

#[async_trait]
impl PageFetcher for CannedApi {
    async fn fetch(&self, _path: &str, params: &[(String, String)]) -> Result<Value, ClientError> {
        self.requests.lock().unwrap().push(params.to_vec());
        self.pages
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

fn trips(ids: &[(i64, i64)]) -> Value {
    let rentals: Vec<Value> = ids
        .iter()
        .map(|(id, sd)| json!({"rentalId": id, "sd": sd, "duration": 600}))
        .collect();
    json!({"rentals": {"closed": rentals}})
}

fn open(dir: &TempDir, name: &str) -> (PipelineConfig, DuckDbDestination) {
    let config = PipelineConfig::new(name).with_database(dir.path().join("test.duckdb"));
    let destination = DuckDbDestination::open(&config.database).unwrap();
    (config, destination)
}

#[tokio::test]
async fn test_bikeshare_appends_and_advances_cursor() {
    let temp = TempDir::new().unwrap();
    let api = CannedApi::new(vec![
        Ok(trips(&[(1, 100), (2, 200)])),
        Ok(trips(&[(2, 200), (3, 300)])),
    ]);
    let requests = api.requests.clone();
    let source = BikeshareSource::new(Box::new(api), Secret::new("member"));

    let (config, destination) = open(&temp, "bikeshare");
    let mut pipeline = Pipeline::new(config, Box::new(destination)).unwrap();

    let first = pipeline.run(&source).await.unwrap();
    assert_eq!(first.total_written(), 2);

    let second = pipeline.run(&source).await.unwrap();
    let trips = second.resource("trips").unwrap();
    // trip 2 sits on the cursor boundary and is kept, then ignored by key
    assert_eq!(trips.extracted, 2);
    assert_eq!(trips.written, 1);
    assert_eq!(trips.ignored, 1);

    let state = pipeline.destination().state("bikeshare").unwrap();
    assert_eq!(
        state.get("trips").unwrap().last_value,
        CursorValue::integer(300)
    );

    let requests = requests.lock().unwrap();
    let page_size = |params: &Vec<(String, String)>| {
        params
            .iter()
            .find(|(k, _)| k == "pageSize")
            .map(|(_, v)| v.clone())
    };
    assert_eq!(page_size(&requests[0]).as_deref(), Some("500"));
    assert_eq!(page_size(&requests[1]).as_deref(), Some("50"));
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let source = BikeshareSource::new(
            Box::new(CannedApi::new(vec![Ok(trips(&[(7, 700)]))])),
            Secret::new("member"),
        );
        let (config, destination) = open(&temp, "bikeshare");
        let mut pipeline = Pipeline::new(config, Box::new(destination)).unwrap();
        pipeline.run(&source).await.unwrap();
    }

    let (_, destination) = open(&temp, "bikeshare");
    let state = destination.state("bikeshare").unwrap();
    assert_eq!(
        state.get("trips").unwrap().last_value,
        CursorValue::integer(700)
    );
    assert_eq!(destination.row_count("bikeshare_data", "trips").unwrap(), 1);

    let loads = destination.loads("bikeshare", 10).unwrap();
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].status, LoadStatus::Completed);
    assert_eq!(loads[0].records, 1);
}

#[tokio::test]
async fn test_listens_follow_min_ts_pages() {
    let temp = TempDir::new().unwrap();
    let page = |listens: Vec<i64>| {
        let listens: Vec<Value> = listens
            .iter()
            .map(|ts| json!({"listened_at": ts, "track_metadata": {"track_name": format!("t{ts}")}}))
            .collect();
        json!({"payload": {"count": listens.len(), "listens": listens}})
    };
    let api = CannedApi::new(vec![
        Ok(page(vec![1_700_000_100, 1_700_000_050])),
        Ok(page(vec![])),
    ]);
    let requests = api.requests.clone();
    let source = ListenBrainzSource::new(Box::new(api), "someone", 1_700_000_000);

    let (config, destination) = open(&temp, "listenbrainz");
    let mut pipeline = Pipeline::new(config, Box::new(destination)).unwrap();
    let report = pipeline.run(&source).await.unwrap();
    assert_eq!(report.resource("listens").unwrap().written, 2);

    let requests = requests.lock().unwrap();
    assert!(
        requests[0]
            .iter()
            .any(|(k, v)| k == "min_ts" && v == "1700000000")
    );

    let state = pipeline.destination().state("listenbrainz").unwrap();
    assert_eq!(
        state.get("listens").unwrap().last_value,
        CursorValue::integer(1_700_000_100)
    );
}

#[tokio::test]
async fn test_failed_extraction_keeps_state() {
    let temp = TempDir::new().unwrap();
    let api = CannedApi::new(vec![
        Ok(trips(&[(1, 100)])),
        Err(ClientError::Status {
            url: "https://example.test/rental/closed".to_string(),
            status: 503,
            body: "maintenance".to_string(),
        }),
    ]);
    let source = BikeshareSource::new(Box::new(api), Secret::new("member"));

    let (config, destination) = open(&temp, "bikeshare");
    let mut pipeline = Pipeline::new(config, Box::new(destination)).unwrap();
    pipeline.run(&source).await.unwrap();

    let err = pipeline.run(&source).await.unwrap_err();
    assert!(matches!(err, PipelineError::Extract(_)));
    assert!(err.is_recoverable());

    let state = pipeline.destination().state("bikeshare").unwrap();
    assert_eq!(
        state.get("trips").unwrap().last_value,
        CursorValue::integer(100)
    );
    let loads = pipeline.destination().loads("bikeshare", 10).unwrap();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[0].status, LoadStatus::Failed);
    assert!(loads[0].message.as_deref().unwrap().contains("503"));
}
