//! Courier - durable delivery of queued requests to the Courier services.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courier_config_and_utils::{init_logging_at, Config, Paths};

/// Courier command-line interface.
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Queue and deliver requests to the Courier services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (database, logs, config). Defaults to ~/.courier
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending requests, identity and session
    Status,
    /// Deliver every pending request
    Drain,
    /// Queue a request and deliver it
    Enqueue {
        #[arg(long)]
        url: String,
        #[arg(short, long, default_value = "POST")]
        method: String,
        /// Raw request body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Identify as a contact, starting a new session
    Login {
        identity: String,
    },
    /// Forget the contact and its credentials
    Logout,
    /// Drop every pending request without delivering it
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging_at(level, paths.log_file());

    match cli.command {
        Commands::Status => app::status(&paths)?,
        Commands::Drain => app::drain(&config, &paths).await?,
        Commands::Enqueue { url, method, body } => {
            app::enqueue(&config, &paths, url, &method, body).await?
        }
        Commands::Login { identity } => app::login(&paths, identity)?,
        Commands::Logout => app::logout(&paths)?,
        Commands::Purge => app::purge(&paths)?,
    }

    Ok(())
}
