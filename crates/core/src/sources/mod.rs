//! Extraction sources
//!
//! One module per pipeline plus the shared export discovery and
//! folder-reading helpers used by the journal source.

pub mod bikeshare;
mod error;
pub mod export;
pub mod folder;
pub mod journal;
pub mod listens;

pub use bikeshare::BikeshareSource;
pub use error::ExtractError;
pub use export::{ExportFolder, parse_export_date, select_latest_export};
pub use folder::{FolderRecords, FolderStats, extract_folder};
pub use journal::JournalSource;
pub use listens::{ListenBrainzSource, parse_start_date};
