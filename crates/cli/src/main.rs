mod commands;
mod error;
mod logging;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use homelake_core::config::DEFAULT_CONFIG_DIR;

#[derive(Parser)]
#[command(
    name = "homelake",
    version,
    about = "Load journal, listening and bikeshare history into DuckDB"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding homelake.toml and secrets.toml
    #[arg(long, default_value = DEFAULT_CONFIG_DIR, global = true)]
    config_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline (journal, listenbrainz, bikeshare)
    Run {
        pipeline: String,
        /// Extract only; nothing is written
        #[arg(long)]
        dry_run: bool,
        /// Print the load report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Finish a run waiting for a two-factor code
    Resume {
        /// Pipeline that is waiting (journal)
        pipeline: String,
        /// Code shown on a trusted device
        code: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the stored cursor state of a pipeline
    State { pipeline: String },
    /// Show recent loads of a pipeline
    Loads {
        pipeline: String,
        /// Number of loads to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            pipeline,
            dry_run,
            json,
        } => commands::run::execute(&cli.config_dir, &pipeline, dry_run, json).await,
        Commands::Resume {
            pipeline,
            code,
            dry_run,
            json,
        } => commands::resume::execute(&cli.config_dir, &pipeline, &code, dry_run, json).await,
        Commands::State { pipeline } => commands::state::show_state(&cli.config_dir, &pipeline),
        Commands::Loads { pipeline, limit } => {
            commands::state::show_loads(&cli.config_dir, &pipeline, limit)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}
