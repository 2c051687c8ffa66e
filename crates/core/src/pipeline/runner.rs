//! Pipeline runner

use chrono::Utc;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::config::PipelineConfig;
use super::error::{PipelineError, PipelineResult};
use super::report::LoadReport;
use crate::destination::{Destination, LoadJob, LoadRecord, LoadStatus};
use crate::resource::Source;

/// Runs sources into a destination
pub struct Pipeline {
    config: PipelineConfig,
    destination: Box<dyn Destination>,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new(config: PipelineConfig, destination: Box<dyn Destination>) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::ConfigError)?;
        Ok(Self {
            config,
            destination,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The destination the pipeline loads into
    pub fn destination(&self) -> &dyn Destination {
        self.destination.as_ref()
    }

    /// Extract from `source` and load the result
    ///
    /// Records and cursor state commit together. When extraction or loading
    /// fails, the stored state is untouched and a failed load row is
    /// recorded so the next run starts from the same cursor.
    pub async fn run(&mut self, source: &dyn Source) -> PipelineResult<LoadReport> {
        let load_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "pipeline_run",
            pipeline = %self.config.name,
            load_id = %load_id,
            dry_run = self.config.dry_run
        );
        self.run_load(source, &load_id).instrument(span).await
    }

    async fn run_load(&mut self, source: &dyn Source, load_id: &str) -> PipelineResult<LoadReport> {
        let started_at = Utc::now();
        for declaration in source.resources() {
            declaration.validate()?;
        }

        info!(
            source = source.name(),
            destination = self.destination.name(),
            dataset = %self.config.dataset,
            "Starting pipeline"
        );

        let state = self.destination.state(&self.config.name)?;
        let output = match source.extract(&state).await {
            Ok(output) => output,
            Err(e) => {
                self.record_failure(load_id, started_at, &e.to_string());
                return Err(e.into());
            }
        };
        info!(
            resources = output.resources.len(),
            records = output.record_count(),
            "Extraction finished"
        );

        if self.config.dry_run {
            info!("Dry run, skipping load");
            return Ok(LoadReport::new(
                load_id,
                &self.config.name,
                &self.config.dataset,
                started_at,
                &output,
                None,
            ));
        }

        let job = LoadJob {
            load_id,
            pipeline: &self.config.name,
            dataset: &self.config.dataset,
            started_at,
            output: &output,
        };
        let summary = match self.destination.load(&job) {
            Ok(summary) => summary,
            Err(e) => {
                self.record_failure(load_id, started_at, &e.to_string());
                return Err(e.into());
            }
        };
        info!(written = summary.written(), "Load committed");

        Ok(LoadReport::new(
            load_id,
            &self.config.name,
            &self.config.dataset,
            started_at,
            &output,
            Some(&summary),
        ))
    }

    fn record_failure(&mut self, load_id: &str, started_at: chrono::DateTime<Utc>, message: &str) {
        let record = LoadRecord {
            load_id: load_id.to_string(),
            pipeline: self.config.name.clone(),
            dataset: self.config.dataset.clone(),
            status: LoadStatus::Failed,
            started_at,
            finished_at: Some(Utc::now()),
            records: 0,
            message: Some(message.to_string()),
        };
        if let Err(e) = self.destination.record_failure(&record) {
            warn!(error = %e, "Could not record failed load");
        }
    }
}
