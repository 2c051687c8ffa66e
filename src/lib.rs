//! Homelake - personal data pipelines loading into DuckDB
//!
//! Re-exports [`homelake_core`] so applications depend on a single crate:
//! - Arc Timeline journal exports from iCloud Drive or a local mirror
//! - ListenBrainz listening history
//! - Bike Share Toronto trips

pub use homelake_core::*;
