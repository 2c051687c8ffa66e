//! Pipeline configuration types

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::sources::{bikeshare, journal, listens};

/// The pipelines this crate knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Arc Timeline journal exports from a drive
    Journal,
    /// ListenBrainz listening history
    ListenBrainz,
    /// Bike Share Toronto trips
    Bikeshare,
}

impl PipelineKind {
    /// All pipelines
    pub fn all() -> [PipelineKind; 3] {
        [
            PipelineKind::Journal,
            PipelineKind::ListenBrainz,
            PipelineKind::Bikeshare,
        ]
    }

    /// Pipeline name, also the key for stored state
    pub fn pipeline_name(&self) -> &'static str {
        match self {
            PipelineKind::Journal => journal::PIPELINE_NAME,
            PipelineKind::ListenBrainz => listens::PIPELINE_NAME,
            PipelineKind::Bikeshare => bikeshare::PIPELINE_NAME,
        }
    }

    /// Default dataset
    pub fn dataset_name(&self) -> &'static str {
        match self {
            PipelineKind::Journal => journal::DATASET_NAME,
            PipelineKind::ListenBrainz => listens::DATASET_NAME,
            PipelineKind::Bikeshare => bikeshare::DATASET_NAME,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pipeline_name())
    }
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "journal" | "arc_timeline" | "arc-timeline" => Ok(PipelineKind::Journal),
            "listenbrainz" | "listens" => Ok(PipelineKind::ListenBrainz),
            "bikeshare" | "trips" => Ok(PipelineKind::Bikeshare),
            _ => Err(format!(
                "Unknown pipeline: {s}. Valid pipelines: journal, listenbrainz, bikeshare"
            )),
        }
    }
}

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,
    /// Dataset (database schema) the resources load into
    pub dataset: String,
    /// Database path
    pub database: PathBuf,
    /// Extract only, do not load
    pub dry_run: bool,
}

impl PipelineConfig {
    /// Create a config with default dataset and database for `name`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dataset: format!("{name}_data"),
            database: PathBuf::from(format!("{name}.duckdb")),
            name,
            dry_run: false,
        }
    }

    /// Config for one of the built-in pipelines, honouring overrides in settings
    pub fn for_kind(kind: PipelineKind, settings: &Settings) -> Self {
        let (database, dataset) = match kind {
            PipelineKind::Journal => (&settings.journal.database, &settings.journal.dataset),
            PipelineKind::ListenBrainz => (
                &settings.listenbrainz.database,
                &settings.listenbrainz.dataset,
            ),
            PipelineKind::Bikeshare => (&settings.bikeshare.database, &settings.bikeshare.dataset),
        };

        let mut config = Self::new(kind.pipeline_name()).with_dataset(kind.dataset_name());
        if let Some(database) = database {
            config = config.with_database(database);
        }
        if let Some(dataset) = dataset {
            config = config.with_dataset(dataset);
        }
        config
    }

    /// Set the dataset
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    /// Set the database path
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = path.into();
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Pipeline name is empty".to_string());
        }
        if self.dataset.trim().is_empty() {
            return Err("Dataset name is empty".to_string());
        }
        if self.dataset == crate::destination::schema::BOOKKEEPING_SCHEMA {
            return Err(format!("Dataset name '{}' is reserved", self.dataset));
        }
        Ok(())
    }
}
