//! canmap - canonical mapping review CLI
//!
//! Drives a review session against the mapping backend: generate a mapping
//! and wait for it, show the saved mapping, or export it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canmap_common::config::CanmapConfig;
use canmap_common::events::EventBus;
use canmap_common::CanonicalMapping;
use canmap_engine::backend::HttpBackend;
use canmap_engine::ReviewSession;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for canmap
#[derive(Parser, Debug)]
#[command(name = "canmap")]
#[command(about = "Review canonical mappings produced by the mapping backend")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides configuration)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Session to operate on
    #[arg(short, long, env = "CANMAP_SESSION")]
    session: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a mapping job and wait for the result
    Map,
    /// Load and print the saved mapping
    Show,
    /// Export the saved mapping and print the download URL
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CanmapConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(backend_url = %config.backend_url, session_id = %args.session, "Starting canmap");

    let backend = HttpBackend::from_config(&config).context("Failed to create backend client")?;
    let session = ReviewSession::new(
        args.session.clone(),
        Arc::new(backend),
        config.poll.clone(),
        EventBus::default(),
    );

    match args.command {
        Command::Map => {
            session.start_mapping().await.context("Failed to start mapping job")?;
            let mapping = session.wait_for_mapping().await.context("Mapping job did not succeed")?;
            print_mapping(&session, &mapping).await;
        }
        Command::Show => {
            if !session.load().await.context("Failed to load mapping")? {
                println!("No saved mapping for session {}", args.session);
                return Ok(());
            }
            if let Some(mapping) = session.snapshot().await {
                print_mapping(&session, &mapping).await;
            }
        }
        Command::Export => {
            let url = session.export().await.context("Export failed")?;
            println!("{}", url);
        }
    }

    Ok(())
}

async fn print_mapping(session: &ReviewSession, mapping: &CanonicalMapping) {
    let summary = mapping.summary();
    println!(
        "{} tables ({} row tables), {} missing fields",
        summary.tables, summary.row_array_tables, summary.missing
    );

    if let Some(warnings) = &mapping.metadata.warnings {
        for warning in warnings {
            println!("warning: {}", warning);
        }
    }

    for missing in session.missing_fields().await {
        println!("  {} / {}: {}", missing.table_label, missing.field_label, missing.reason);
    }
}

/// Filter used when `RUST_LOG` is unset: every canmap crate at `level`
fn default_filter(level: &str) -> String {
    format!("canmap={0},canmap_engine={0},canmap_common={0}", level)
}
