//! ListenBrainz listening history

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::error::ExtractError;
use crate::client::{Auth, JsonCursorPaginator, PageFetcher, RestClient, select_items};
use crate::config::{ListenBrainzSettings, require};
use crate::resource::{ResourceDeclaration, ResourceOutput, Source, SourceOutput, into_record};
use crate::state::{CursorValue, IncrementalCursor, SourceState};

/// Pipeline name
pub const PIPELINE_NAME: &str = "listenbrainz";
/// Default dataset
pub const DATASET_NAME: &str = "listenbrainz_data";
/// Resource name
pub const LISTENS: &str = "listens";

const PAGE_COUNT: u32 = 1000;
const CURSOR_FIELD: &str = "listened_at";
const CURSOR_PATH: &str = "payload.listens[0].listened_at";
const CURSOR_PARAM: &str = "min_ts";
const DATA_SELECTOR: &str = "payload.listens";

/// Parse a configured start date into epoch seconds (UTC)
pub fn parse_start_date(value: &str) -> Result<i64, ExtractError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp());
        }
    }
    Err(ExtractError::InvalidStartDate(value.to_string()))
}

/// Listen history for one user
pub struct ListenBrainzSource {
    fetcher: Box<dyn PageFetcher>,
    username: String,
    initial_value: i64,
    paginator: JsonCursorPaginator,
}

impl ListenBrainzSource {
    pub fn new(fetcher: Box<dyn PageFetcher>, username: impl Into<String>, initial_value: i64) -> Self {
        Self {
            fetcher,
            username: username.into(),
            initial_value,
            paginator: JsonCursorPaginator::new(CURSOR_PATH, CURSOR_PARAM),
        }
    }

    /// Build a source talking to the ListenBrainz API
    pub fn connect(settings: &ListenBrainzSettings) -> Result<Self, ExtractError> {
        let username = require(&settings.username, "listenbrainz.username")?;
        let token = require(&settings.access_token, "listenbrainz.access_token")?;
        let start_date = require(&settings.start_date, "listenbrainz.start_date")?;

        let client = RestClient::builder(&settings.base_url)
            .auth(Auth::Bearer(token.clone()))
            .build()?;
        Ok(Self::new(
            Box::new(client),
            username.clone(),
            parse_start_date(start_date)?,
        ))
    }

    fn path(&self) -> String {
        format!("/1/user/{}/listens", urlencoding::encode(&self.username))
    }

    fn declaration() -> ResourceDeclaration {
        ResourceDeclaration::new(LISTENS).with_primary_key(CURSOR_FIELD)
    }
}

#[async_trait]
impl Source for ListenBrainzSource {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    fn resources(&self) -> Vec<ResourceDeclaration> {
        vec![Self::declaration()]
    }

    async fn extract(&self, state: &SourceState) -> Result<SourceOutput, ExtractError> {
        let mut cursor = IncrementalCursor::resume(
            LISTENS,
            CURSOR_FIELD,
            CursorValue::integer(self.initial_value),
            state.get(LISTENS),
        );

        let params = vec![
            ("count".to_string(), PAGE_COUNT.to_string()),
            (CURSOR_PARAM.to_string(), cursor.last_value().to_param()),
        ];
        let pages = self
            .paginator
            .fetch_all(self.fetcher.as_ref(), &self.path(), params)
            .await?;

        let fetched: Vec<_> = pages
            .iter()
            .flat_map(|page| select_items(page, DATA_SELECTOR))
            .map(into_record)
            .collect();
        tracing::info!(pages = pages.len(), listens = fetched.len(), "Fetched listens");

        let records = cursor.apply(fetched);

        let mut state = state.clone();
        state.insert(cursor.state());
        Ok(SourceOutput {
            resources: vec![ResourceOutput::new(Self::declaration(), records)],
            state,
        })
    }
}
