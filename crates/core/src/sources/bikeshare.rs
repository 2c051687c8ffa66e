//! Bike Share Toronto trip history
//!
//! Reads closed rentals from the operator's mobile API. Only the first page
//! is requested: 500 trips on the very first run, 50 afterwards.

use async_trait::async_trait;
use serde_json::Value;

use super::error::ExtractError;
use crate::client::{Auth, PageFetcher, RestClient};
use crate::config::{BikeshareSettings, Secret, require};
use crate::resource::{Record, ResourceDeclaration, ResourceOutput, Source, SourceOutput, into_record};
use crate::state::{CursorValue, IncrementalCursor, SourceState};

/// Pipeline name
pub const PIPELINE_NAME: &str = "bikeshare";
/// Default dataset
pub const DATASET_NAME: &str = "bikeshare_data";
/// Resource name
pub const TRIPS: &str = "trips";

/// Page size on the first run
pub const INITIAL_PAGE_SIZE: u32 = 500;
/// Page size once a cursor has been committed
pub const INCREMENTAL_PAGE_SIZE: u32 = 50;

const CURSOR_FIELD: &str = "sd";
const PATH: &str = "rental/closed";
const USER_AGENT: &str = "Bike%20Share/2025.33.3.26433108 CFNetwork/3860.100.1 Darwin/25.0.0";

/// Page size for a run
pub fn page_size_for(cursor: &IncrementalCursor) -> u32 {
    if cursor.is_initial() {
        INITIAL_PAGE_SIZE
    } else {
        INCREMENTAL_PAGE_SIZE
    }
}

/// Trips from the first list in the `rentals` map
pub fn rentals(page: &Value) -> Vec<Record> {
    page.get("rentals")
        .and_then(Value::as_object)
        .and_then(|groups| groups.values().next())
        .and_then(Value::as_array)
        .map(|trips| trips.iter().cloned().map(into_record).collect())
        .unwrap_or_default()
}

/// Closed rentals for one member
pub struct BikeshareSource {
    fetcher: Box<dyn PageFetcher>,
    member_id: Secret,
}

impl BikeshareSource {
    pub fn new(fetcher: Box<dyn PageFetcher>, member_id: Secret) -> Self {
        Self { fetcher, member_id }
    }

    /// Build a source talking to the operator API
    pub fn connect(settings: &BikeshareSettings) -> Result<Self, ExtractError> {
        let member_id = require(&settings.member_id, "bikeshare.member_id")?;
        let token = require(&settings.authorization_token, "bikeshare.authorization_token")?;

        let client = RestClient::builder(&settings.base_url)
            .auth(Auth::ApiKey {
                name: "Authorization".to_string(),
                value: token.clone(),
            })
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("api-key", "")
            .header("X-ba-api-key", "")
            .header("Accept-Language", "en")
            .header("Cache-Control", "no-cache")
            .accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;

        Ok(Self::new(Box::new(client), member_id.clone()))
    }

    fn declaration() -> ResourceDeclaration {
        ResourceDeclaration::new(TRIPS).with_primary_key("rentalId")
    }
}

#[async_trait]
impl Source for BikeshareSource {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    fn resources(&self) -> Vec<ResourceDeclaration> {
        vec![Self::declaration()]
    }

    async fn extract(&self, state: &SourceState) -> Result<SourceOutput, ExtractError> {
        let mut cursor = IncrementalCursor::resume(
            TRIPS,
            CURSOR_FIELD,
            CursorValue::integer(0),
            state.get(TRIPS),
        );
        let page_size = page_size_for(&cursor);

        let params = vec![
            ("memberId".to_string(), self.member_id.expose().to_string()),
            ("isBikeAngel".to_string(), "false".to_string()),
            ("pageSize".to_string(), page_size.to_string()),
            ("pageOffset".to_string(), "0".to_string()),
        ];
        let page = self.fetcher.fetch(PATH, &params).await?;

        let trips = rentals(&page);
        tracing::info!(trips = trips.len(), page_size, "Fetched closed rentals");
        if trips.len() >= page_size as usize {
            tracing::warn!(
                page_size,
                "Page is full; older trips beyond the first page are not fetched"
            );
        }

        let records = cursor.apply(trips);

        let mut state = state.clone();
        state.insert(cursor.state());
        Ok(SourceOutput {
            resources: vec![ResourceOutput::new(Self::declaration(), records)],
            state,
        })
    }
}
