// SPDX-FileCopyrightText: 2026 Caravel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caravel - cross-instance helpdesk record migration.
//!
//! This is the binary entry point. It loads and validates configuration,
//! builds the migration session (both instance clients, the resolver and
//! the original-id marker), and dispatches to the selected batch driver.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use caravel_config::{CaravelConfig, ConfigError};
use caravel_core::{Result, StatusFilter};
use caravel_pipeline::{BatchSummary, Session, UpdateField};

/// Caravel - cross-instance helpdesk record migration.
#[derive(Parser, Debug)]
#[command(name = "caravel", version, about, long_about = None)]
struct Cli {
    /// Explicit config file (default: caravel.toml via the XDG hierarchy).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate records from the source instance to the target instance.
    Migrate {
        #[command(subcommand)]
        records: MigrateCommand,
    },
    /// Refresh one field of an already-migrated ticket from its source.
    Update {
        /// Field to refresh.
        #[arg(value_enum)]
        field: UpdateFieldArg,
        /// Source ticket id.
        ticket_id: u64,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Tickets: one id, an id file, or a full enumeration.
    Tickets {
        /// Migrate a single ticket by source id.
        #[arg(long, conflicts_with = "file")]
        id: Option<u64>,
        /// Status filter: all, not_closed, or an exact status.
        #[arg(long, default_value = "all")]
        status: String,
        /// File of ticket ids, one per line (e.g. ids from a previous
        /// error log, for retrying a known failure set).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Organizations, merging into existing target organizations.
    Organizations {
        /// Migrate a single organization by source id.
        #[arg(long)]
        id: Option<u64>,
        /// Leave existing target organizations untouched.
        #[arg(long)]
        no_update: bool,
    },
    /// Active macros.
    Macros {
        #[arg(long)]
        id: Option<u64>,
    },
    /// Active triggers.
    Triggers {
        #[arg(long)]
        id: Option<u64>,
    },
    /// Active views.
    Views {
        #[arg(long)]
        id: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UpdateFieldArg {
    /// Re-resolve and append the source ticket's collaborators.
    Cc,
    /// Re-host inline attachments into one new internal comment.
    CommentAttach,
}

impl From<UpdateFieldArg> for UpdateField {
    fn from(arg: UpdateFieldArg) -> Self {
        match arg {
            UpdateFieldArg::Cc => UpdateField::Cc,
            UpdateFieldArg::CommentAttach => UpdateField::CommentAttach,
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> std::result::Result<CaravelConfig, Vec<ConfigError>> {
    let config = match explicit {
        Some(path) => caravel_config::load_config_from_path(path)
            .map_err(|e| vec![ConfigError::Load(e)])?,
        None => caravel_config::load_config().map_err(|e| vec![ConfigError::Load(e)])?,
    };
    caravel_config::validation::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            caravel_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    // The only fatal conditions: bad credentials or an undiscoverable
    // marker field. Nothing is migrated on a half-working setup.
    let session = match Session::connect(&config).await {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "failed to initialize migration session");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&session, cli.command).await {
        error!(error = %err, "run failed");
        std::process::exit(1);
    }
}

async fn run(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate { records } => match records {
            MigrateCommand::Tickets { id: Some(id), .. } => {
                let outcome = session.migrate_ticket_by_id(id).await?;
                info!(?outcome, "single ticket migration complete");
            }
            MigrateCommand::Tickets {
                file: Some(file),
                status,
                ..
            } => {
                let filter: StatusFilter = status.parse()?;
                let summary = session.migrate_from_file(&file, filter).await?;
                print_summary(&summary);
            }
            MigrateCommand::Tickets { status, .. } => {
                let filter: StatusFilter = status.parse()?;
                let summary = session.migrate_all(filter).await?;
                print_summary(&summary);
            }
            MigrateCommand::Organizations { id: Some(id), no_update } => {
                session.migrate_organization_by_id(id, !no_update).await?;
            }
            MigrateCommand::Organizations { id: None, no_update } => {
                session.migrate_organizations(!no_update).await?;
            }
            MigrateCommand::Macros { id } => session.migrate_macros(id).await?,
            MigrateCommand::Triggers { id } => session.migrate_triggers(id).await?,
            MigrateCommand::Views { id } => session.migrate_views(id).await?,
        },
        Commands::Update { field, ticket_id } => {
            session.update_ticket(ticket_id, field.into()).await?;
        }
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "complete: processed {} tickets ({} migrated, {} duplicates, {} filtered, {} failed)",
        summary.processed,
        summary.migrated,
        summary.skipped_duplicate,
        summary.skipped_status,
        summary.failed
    );
}
