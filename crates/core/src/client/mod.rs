//! Remote clients
//!
//! REST access for the paginated API sources and drive access for the
//! journal export source.

mod drive;
mod error;
#[cfg(feature = "icloud")]
mod icloud;
mod local;
mod paginator;
mod rest;

pub use drive::{
    AuthOutcome, Drive, DriveEntry, DrivePath, DriveSession, EntryKind, PendingChallenge,
    authenticate, complete_second_factor,
};
pub use error::{AuthError, ClientError, DriveError};
#[cfg(feature = "icloud")]
pub use icloud::{Endpoints, ICloudDrive, StoredSession};
pub use local::LocalDrive;
pub use paginator::{JsonCursorPaginator, json_path, select_items};
pub use rest::{Auth, DEFAULT_TIMEOUT, PageFetcher, RestClient, RestClientBuilder};

