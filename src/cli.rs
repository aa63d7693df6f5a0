//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use federator_core::normalize_unit_path;

/// Compose remote modules into a shell and render the requested units.
///
/// Federator fetches each remote's entry manifest, reconciles shared
/// dependencies across the shell and every remote, and mounts each unit
/// behind its own fault boundary.
#[derive(Parser, Debug)]
#[command(name = "federator")]
#[command(author, version, about)]
pub struct Args {
    /// Units to mount, as `remoteId/path` (e.g. `remoteApp1/App`)
    #[arg(value_parser = parse_unit_target)]
    pub units: Vec<UnitTarget>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Shell configuration file (JSON)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Add or override a remote, as `ID=SCOPE@URL` (repeatable)
    #[arg(long = "remote", value_name = "ID=SPEC", value_parser = parse_remote_override)]
    pub remotes: Vec<(String, String)>,

    /// Manifest fetch timeout in seconds (1-3600)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,
}

/// One unit requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTarget {
    /// Remote identifier.
    pub remote_id: String,
    /// Normalized unit path.
    pub unit_path: String,
}

fn parse_unit_target(value: &str) -> Result<UnitTarget, String> {
    let Some((remote_id, path)) = value.split_once('/') else {
        return Err(format!("expected `remoteId/path`, got '{value}'"));
    };
    let path = path.trim_start_matches("./");
    if remote_id.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected `remoteId/path`, got '{value}'"));
    }
    Ok(UnitTarget {
        remote_id: remote_id.trim().to_string(),
        unit_path: normalize_unit_path(path.trim()),
    })
}

fn parse_remote_override(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, spec)) if !id.trim().is_empty() && !spec.trim().is_empty() => {
            Ok((id.trim().to_string(), spec.trim().to_string()))
        }
        _ => Err(format!("expected `ID=SCOPE@URL`, got '{value}'")),
    }
}
