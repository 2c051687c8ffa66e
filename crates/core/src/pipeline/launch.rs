//! Launching the built-in pipelines
//!
//! Builds the source for a [`PipelineKind`] from settings, opens its DuckDB
//! database and runs it. The journal pipeline may stop at a second-factor
//! prompt; the challenge is saved next to the database and the run is
//! finished later with [`resume_journal`]. The iCloud session is saved there
//! too so a trusted session signs in again without a code.

use std::path::PathBuf;

use tracing::info;

use super::config::{PipelineConfig, PipelineKind};
use super::error::PipelineResult;
use super::report::LoadReport;
use super::runner::Pipeline;
use crate::client::{Drive, DrivePath, LocalDrive, PendingChallenge};
use crate::config::Settings;
use crate::destination::{DestinationError, DuckDbDestination};
use crate::resource::Source;
use crate::sources::{BikeshareSource, JournalSource, ListenBrainzSource};

/// Result of launching a pipeline
#[derive(Debug)]
pub enum RunOutcome {
    /// The run finished
    Completed(LoadReport),
    /// Waiting for a second-factor code; the challenge is stored at `challenge`
    AwaitingCode { challenge: PathBuf },
}

/// Open the database configured for a pipeline
pub fn open_destination(config: &PipelineConfig) -> PipelineResult<DuckDbDestination> {
    ensure_database_dir(config)?;
    Ok(DuckDbDestination::open(&config.database)?)
}

/// Create the folder holding the database and its side files
fn ensure_database_dir(config: &PipelineConfig) -> PipelineResult<()> {
    if let Some(parent) = config.database.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| DestinationError::Open {
            path: config.database.clone(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Run one of the built-in pipelines
pub async fn run_pipeline(
    kind: PipelineKind,
    settings: &Settings,
    dry_run: bool,
) -> PipelineResult<RunOutcome> {
    let config = PipelineConfig::for_kind(kind, settings).with_dry_run(dry_run);
    let source: Box<dyn Source> = match kind {
        PipelineKind::Journal => match journal_drive(settings, &config).await? {
            Some(drive) => Box::new(journal_source(drive, settings)),
            None => {
                return Ok(RunOutcome::AwaitingCode {
                    challenge: PendingChallenge::default_path(&config.database),
                });
            }
        },
        PipelineKind::ListenBrainz => Box::new(ListenBrainzSource::connect(&settings.listenbrainz)?),
        PipelineKind::Bikeshare => Box::new(BikeshareSource::connect(&settings.bikeshare)?),
    };

    execute(config, source.as_ref()).await.map(RunOutcome::Completed)
}

/// Finish a journal run that stopped at a second-factor prompt
#[cfg(feature = "icloud")]
pub async fn resume_journal(
    settings: &Settings,
    code: &str,
    dry_run: bool,
) -> PipelineResult<LoadReport> {
    use crate::client::{ICloudDrive, StoredSession, complete_second_factor};

    let config = PipelineConfig::for_kind(PipelineKind::Journal, settings).with_dry_run(dry_run);
    let path = PendingChallenge::default_path(&config.database);
    let challenge = PendingChallenge::load(&path).await?;
    info!(account = %challenge.account, "Resuming journal run");

    let mut drive = ICloudDrive::resume(&challenge)?;
    complete_second_factor(&mut drive, code).await?;
    drive
        .snapshot()
        .save(&StoredSession::default_path(&config.database))
        .await?;
    PendingChallenge::clear(&path).await?;

    let source = journal_source(Box::new(drive), settings);
    execute(config, &source).await
}

/// Finish a journal run that stopped at a second-factor prompt
#[cfg(not(feature = "icloud"))]
pub async fn resume_journal(
    _settings: &Settings,
    _code: &str,
    _dry_run: bool,
) -> PipelineResult<LoadReport> {
    Err(super::error::PipelineError::Unsupported("icloud"))
}

async fn execute(config: PipelineConfig, source: &dyn Source) -> PipelineResult<LoadReport> {
    let destination = open_destination(&config)?;
    let mut pipeline = Pipeline::new(config, Box::new(destination))?;
    pipeline.run(source).await
}

fn journal_source(drive: Box<dyn Drive>, settings: &Settings) -> JournalSource {
    JournalSource::new(drive)
        .with_root(DrivePath::parse(&settings.journal.root))
        .with_workers(settings.journal.workers)
}

/// Drive for the journal, or `None` when a code is needed first
async fn journal_drive(
    settings: &Settings,
    config: &PipelineConfig,
) -> PipelineResult<Option<Box<dyn Drive>>> {
    if let Some(root) = &settings.journal.local_root {
        info!(root = %root.display(), "Reading journal exports from a local folder");
        return Ok(Some(Box::new(LocalDrive::new(root))));
    }
    icloud_drive(settings, config).await
}

#[cfg(feature = "icloud")]
async fn icloud_drive(
    settings: &Settings,
    config: &PipelineConfig,
) -> PipelineResult<Option<Box<dyn Drive>>> {
    use crate::client::{AuthOutcome, ICloudDrive, StoredSession, authenticate};
    use crate::config::require;

    let apple_id = require(&settings.journal.apple_id, "journal.apple_id")?;
    let password = require(&settings.journal.password, "journal.password")?;

    ensure_database_dir(config)?;
    let session_path = StoredSession::default_path(&config.database);
    let saved = StoredSession::load(&session_path).await?;
    let drive = ICloudDrive::sign_in(apple_id, password, saved.as_ref()).await?;
    match authenticate(&drive, apple_id) {
        AuthOutcome::Ready => {
            drive.snapshot().save(&session_path).await?;
            Ok(Some(Box::new(drive)))
        }
        AuthOutcome::NeedsCode(challenge) => {
            let path = PendingChallenge::default_path(&config.database);
            challenge.save(&path).await?;
            info!(challenge = %path.display(), "Waiting for a two-factor code");
            Ok(None)
        }
    }
}

#[cfg(not(feature = "icloud"))]
async fn icloud_drive(
    _settings: &Settings,
    _config: &PipelineConfig,
) -> PipelineResult<Option<Box<dyn Drive>>> {
    Err(super::error::PipelineError::Unsupported("icloud"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Destination;
    use crate::pipeline::PipelineError;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let config = format!(
            "[journal]\nlocal_root = {:?}\ndatabase = {:?}\n",
            dir.path().join("drive").display().to_string(),
            dir.path().join("db").join("journal.duckdb").display().to_string(),
        );
        Settings::from_sources(Some(&config), None, Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_journal_from_local_folder() {
        let dir = TempDir::new().unwrap();
        let export = dir
            .path()
            .join("drive")
            .join("Arc Editor")
            .join("Exports")
            .join("Export 2024-03-01-101500");
        std::fs::create_dir_all(export.join("places")).unwrap();
        std::fs::write(
            export.join("places").join("a.json"),
            json!([{"id": "p1"}, {"id": "p2"}]).to_string(),
        )
        .unwrap();
        let settings = settings(&dir);

        let outcome = run_pipeline(PipelineKind::Journal, &settings, false)
            .await
            .unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.resource("places").unwrap().written, 2);

        let config = PipelineConfig::for_kind(PipelineKind::Journal, &settings);
        let destination = open_destination(&config).unwrap();
        let state = destination.state("arc_timeline").unwrap();
        assert!(state.get("exports").is_some());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let settings = Settings::default();
        let err = run_pipeline(PipelineKind::ListenBrainz, &settings, true)
            .await
            .unwrap_err();
        assert!(err.user_message().contains("listenbrainz.username"));
    }

    #[tokio::test]
    async fn test_resume_without_challenge() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let err = resume_journal(&settings, "123456", false).await.unwrap_err();
        if cfg!(feature = "icloud") {
            assert!(matches!(err, PipelineError::Auth(_)));
        } else {
            assert!(matches!(err, PipelineError::Unsupported("icloud")));
        }
    }
}
