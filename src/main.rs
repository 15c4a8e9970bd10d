mod config;
mod models;
mod services;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::models::RunSummary;
use crate::services::{classifier, links, schedule, store::write_atomic, updater};

/// Scheduled refresher for IPTV category channel lists
#[derive(Debug, Parser)]
#[command(name = "channel-updater", version, about)]
struct Cli {
    /// Job to run; defaults to `update`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Filter the catalog into category files, probe streams, backfill logos
    Update,
    /// Repair dead stream URLs from alternate playlists
    Links,
    /// Classify channels that have no genre
    Genres,
    /// Scrape the cricket schedule into events.json
    Events,
    /// update, links, genres and events in that order
    All,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Update => "update",
            Command::Links => "links",
            Command::Genres => "genres",
            Command::Events => "events",
            Command::All => "all",
        }
    }

    fn jobs(self) -> Vec<Command> {
        match self {
            Command::All => vec![Command::Update, Command::Links, Command::Genres, Command::Events],
            job => vec![job],
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "channel_updater=info".into());

    let text = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("text"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(filter)
        .with((!text).then(|| tracing_subscriber::fmt::layer().json()))
        .with(text.then(|| tracing_subscriber::fmt::layer().compact()))
        .init();
}

async fn run_job(job: Command, config: &Config) -> (RunSummary, Result<()>) {
    let mut summary = RunSummary::start(job.name());
    tracing::info!(job = job.name(), "job started");

    let result = match job {
        Command::Update => updater::run(config, &mut summary).await,
        Command::Links => links::run(config, &mut summary).await,
        Command::Genres => classifier::run(config, &mut summary).await,
        Command::Events => schedule::run(config, &mut summary).await,
        Command::All => Ok(()),
    };

    if let Err(e) = &result {
        tracing::error!(job = job.name(), error = ?e, "job failed");
        summary.note(format!("failed: {:#}", e));
    }
    summary.finish();
    tracing::info!(
        job = job.name(),
        files = summary.files.len(),
        written = summary.files_written(),
        "job finished"
    );
    (summary, result)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Update);

    let config = Config::from_env();
    tracing::info!("Starting channel-updater v{}", env!("CARGO_PKG_VERSION"));

    let mut report = String::new();
    let mut first_error = None;

    // A failed job does not stop the ones after it under `all`
    for job in command.jobs() {
        let (summary, result) = run_job(job, &config).await;
        report.push_str(&summary.render());
        report.push('\n');
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    if let Err(e) = write_atomic(Path::new(&config.summary_file), report.as_bytes()).await {
        tracing::warn!(file = %config.summary_file, error = %e, "could not write run summary");
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_defaults_to_update() {
        let cli = Cli::parse_from(["channel-updater"]);
        assert_eq!(cli.command.unwrap_or(Command::Update), Command::Update);
    }

    #[test]
    fn test_all_expands_in_order() {
        let cli = Cli::parse_from(["channel-updater", "all"]);
        let jobs: Vec<_> = cli.command.unwrap().jobs().into_iter().map(Command::name).collect();
        assert_eq!(jobs, vec!["update", "links", "genres", "events"]);
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["channel-updater", "serve"]).is_err());
    }
}
