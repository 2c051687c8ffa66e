//! Arc Timeline journal exports
//!
//! Finds the newest export folder and loads its metadata, timeline items,
//! location samples and places.

use async_trait::async_trait;
use tracing::Instrument;

use super::error::ExtractError;
use super::export::{ExportFolder, initial_export_cursor, select_latest_export};
use super::folder::{DEFAULT_WORKERS, extract_folder, read_file};
use crate::client::{Drive, DrivePath, EntryKind};
use crate::resource::{
    ResourceDeclaration, ResourceOutput, Source, SourceOutput, TableReference, WriteDisposition,
};
use crate::state::{IncrementalCursor, SourceState};

/// Pipeline name
pub const PIPELINE_NAME: &str = "arc_timeline";
/// Default dataset
pub const DATASET_NAME: &str = "arc_timeline_data";
/// Default export folder inside the drive
pub const DEFAULT_ROOT: &str = "Arc Editor/Exports";

pub const EXPORTS: &str = "exports";
pub const METADATA: &str = "metadata";
pub const ITEMS: &str = "items";
pub const SAMPLES: &str = "samples";
pub const PLACES: &str = "places";

/// Journal export source
pub struct JournalSource {
    drive: Box<dyn Drive>,
    root: DrivePath,
    workers: usize,
}

impl JournalSource {
    pub fn new(drive: Box<dyn Drive>) -> Self {
        Self {
            drive,
            root: DrivePath::parse(DEFAULT_ROOT),
            workers: DEFAULT_WORKERS,
        }
    }

    /// Set the export folder path
    pub fn with_root(mut self, root: DrivePath) -> Self {
        self.root = root;
        self
    }

    /// Set the number of concurrent file reads
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    fn declaration(&self, name: &str) -> ResourceDeclaration {
        match name {
            EXPORTS => ResourceDeclaration::new(EXPORTS).with_primary_key("export_date"),
            ITEMS => ResourceDeclaration::new(ITEMS)
                .with_primary_key("base__id")
                .with_disposition(WriteDisposition::Merge)
                .with_reference(TableReference::new(SAMPLES, "id", "visit__placeId")),
            SAMPLES => ResourceDeclaration::new(SAMPLES)
                .with_primary_key("id")
                .with_disposition(WriteDisposition::Merge)
                .with_reference(TableReference::new(ITEMS, "id", "timelineItemId")),
            PLACES => ResourceDeclaration::new(PLACES)
                .with_primary_key("id")
                .with_disposition(WriteDisposition::Merge),
            other => ResourceDeclaration::new(other),
        }
    }

    async fn folder_output(
        &self,
        export: &DrivePath,
        name: &str,
    ) -> Result<ResourceOutput, ExtractError> {
        let folder = extract_folder(self.drive.as_ref(), &export.join(name), self.workers)
            .instrument(tracing::info_span!("resource", name))
            .await?;
        Ok(ResourceOutput::new(self.declaration(name), folder.records))
    }

    async fn metadata_output(&self, export: &DrivePath) -> Result<ResourceOutput, ExtractError> {
        let records = match read_file(self.drive.as_ref(), &export.join("metadata.json")).await? {
            Some(records) => records,
            None => {
                tracing::info!("metadata.json not found");
                Vec::new()
            }
        };
        Ok(ResourceOutput::new(self.declaration(METADATA), records))
    }

    async fn load_export(&self, export: &ExportFolder) -> Result<Vec<ResourceOutput>, ExtractError> {
        let path = self.root.join(export.name.clone());
        let (metadata, items, samples, places) = tokio::try_join!(
            self.metadata_output(&path),
            self.folder_output(&path, ITEMS),
            self.folder_output(&path, SAMPLES),
            self.folder_output(&path, PLACES),
        )?;

        let exports = ResourceOutput::new(self.declaration(EXPORTS), vec![export.to_record()]);
        Ok(vec![exports, metadata, items, samples, places])
    }
}

#[async_trait]
impl Source for JournalSource {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    fn resources(&self) -> Vec<ResourceDeclaration> {
        [EXPORTS, METADATA, ITEMS, SAMPLES, PLACES]
            .into_iter()
            .map(|name| self.declaration(name))
            .collect()
    }

    async fn extract(&self, state: &SourceState) -> Result<SourceOutput, ExtractError> {
        let mut cursor = IncrementalCursor::resume(
            EXPORTS,
            "export_date",
            initial_export_cursor(),
            state.get(EXPORTS),
        );

        let listing = self.drive.list(&self.root).await?.unwrap_or_default();
        let names: Vec<&str> = listing
            .iter()
            .filter(|e| e.kind == EntryKind::Folder)
            .map(|e| e.name.as_str())
            .collect();

        let selected = select_latest_export(&self.root.to_string(), &names, &mut cursor)?;

        let resources = match selected {
            Some(export) => self.load_export(&export).await?,
            None => Vec::new(),
        };

        let mut state = state.clone();
        state.insert(cursor.state());
        Ok(SourceOutput { resources, state })
    }
}
