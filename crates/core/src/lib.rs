//! Homelake Core - incremental personal data pipelines into DuckDB
//!
//! Provides:
//! - Sources for Arc Timeline journal exports, ListenBrainz listens and
//!   Bike Share Toronto trips
//! - Incremental cursors whose state commits together with the data
//! - Schema mapping with nested-field flattening and variant columns
//! - A DuckDB destination with append and merge write dispositions
//! - Drive and REST clients, including iCloud sign-in with two-factor
//!   suspend and resume

pub mod client;
pub mod config;
pub mod destination;
pub mod pipeline;
pub mod resource;
pub mod sources;
pub mod state;

pub use config::{ConfigError, Secret, Settings};
#[cfg(feature = "duckdb-backend")]
pub use destination::DuckDbDestination;
pub use destination::{Destination, DestinationError, MemoryDestination};
pub use pipeline::{LoadReport, Pipeline, PipelineConfig, PipelineError, PipelineKind};
pub use resource::{Record, ResourceDeclaration, Source, SourceOutput, WriteDisposition};
pub use state::{CursorValue, IncrementalCursor, SourceState};
