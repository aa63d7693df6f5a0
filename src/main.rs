//! CLI entry point for the federator shell.

use anyhow::{Context, Result, bail};
use clap::Parser;
use federator_core::{HttpRemoteLoader, Mount, Shell};
use futures_util::future::join_all;
use tracing::{debug, info};

mod app_config;
mod cli;

use app_config::ShellSettings;
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Views go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    if let Some(path) = loaded.path.as_deref()
        && loaded.loaded_from_file
    {
        info!(path = %path.display(), "Loaded shell configuration");
    }
    let settings =
        ShellSettings::from_sources(loaded.config.as_ref(), &args.remotes, args.timeout)?;

    if args.units.is_empty() {
        if settings.remotes.is_empty() {
            println!("No remotes configured. Pass --remote ID=SCOPE@URL or --config PATH.");
        }
        for entry in settings.remotes.iter() {
            println!("{}\t{}@{}", entry.id, entry.scope, entry.entry_url);
        }
        return Ok(());
    }

    let loader =
        HttpRemoteLoader::new(settings.catalog).context("Failed to set up manifest loader")?;
    let shell = Shell::builder(settings.name)
        .remotes(settings.remotes)
        .shared(settings.shared)
        .fetch_timeout(settings.fetch_timeout)
        .loader(loader)
        .build()?;

    let mut mounts: Vec<Mount> = args
        .units
        .iter()
        .map(|target| shell.mount(&target.remote_id, &target.unit_path))
        .collect();
    let views = join_all(mounts.iter_mut().map(|mount| mount.settle())).await;

    for view in &views {
        println!("{view}");
    }

    for entry in shell.ledger().entries() {
        debug!(
            name = %entry.name,
            version = %entry.resolved_version,
            singleton = entry.singleton,
            required_by = ?entry.required_by,
            "Shared dependency"
        );
    }

    let fallbacks = views.iter().filter(|view| view.is_fallback()).count();
    info!(mounted = views.len(), fallbacks, "Composition complete");
    if fallbacks > 0 {
        bail!("{fallbacks} of {} units rendered a fallback", views.len());
    }

    Ok(())
}
