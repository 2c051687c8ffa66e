//! Pipeline runs
//!
//! A run reads the committed cursor state from the destination, extracts new
//! records from a source, then loads records and the advanced state in one
//! transaction. If anything fails before the commit, the state stays where
//! it was and the next run repeats the same window.
//!
//! # Example
//!
//! ```rust,ignore
//! use homelake_core::destination::DuckDbDestination;
//! use homelake_core::pipeline::{Pipeline, PipelineConfig, PipelineKind};
//! use homelake_core::sources::BikeshareSource;
//!
//! let config = PipelineConfig::for_kind(PipelineKind::Bikeshare, &settings);
//! let destination = DuckDbDestination::open(&config.database)?;
//! let mut pipeline = Pipeline::new(config, Box::new(destination))?;
//!
//! let source = BikeshareSource::connect(&settings.bikeshare)?;
//! let report = pipeline.run(&source).await?;
//! report.print_summary();
//! ```
//!
//! # Dry Run
//!
//! With `dry_run` set, the source is extracted against the stored state but
//! nothing is written, including the cursor.
//!
//! # Two-factor authentication
//!
//! [`run_pipeline`] returns [`RunOutcome::AwaitingCode`] when the journal
//! drive asks for a code. The run is finished with [`resume_journal`].

mod config;
mod error;
#[cfg(feature = "duckdb-backend")]
mod launch;
mod report;
mod runner;

pub use config::{PipelineConfig, PipelineKind};
pub use error::{PipelineError, PipelineResult};
#[cfg(feature = "duckdb-backend")]
pub use launch::{RunOutcome, open_destination, resume_journal, run_pipeline};
pub use report::{LoadReport, ResourceReport, RunStatus};
pub use runner::Pipeline;
