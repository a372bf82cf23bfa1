#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;
mod manifest;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hotgraph")]
#[command(author, version, about = "Inspect and exercise a dev-server module graph", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the graph from a manifest and print every module
    Inspect {
        /// Path to the graph manifest (JSON)
        manifest: PathBuf,
    },

    /// Apply file changes to a manifest graph and report the outcome
    Simulate {
        /// Path to the graph manifest (JSON)
        manifest: PathBuf,

        /// Changed file (as listed in the manifest ids); repeatable
        #[arg(long = "change", value_name = "FILE", required = true)]
        changes: Vec<String>,

        /// Reset every cached module instead of computing HMR boundaries
        #[arg(long)]
        full: bool,
    },

    /// Watch a directory and apply real file changes to a manifest graph
    Watch {
        /// Path to the graph manifest (JSON)
        manifest: PathBuf,

        /// Directory to watch (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    // Commands that handle their own output (JSON to stdout, no logging)
    if let Some(Commands::Inspect { manifest }) = &cli.command {
        return commands::inspect::run(&cwd, manifest, cli.json);
    }

    if let Some(Commands::Simulate {
        manifest,
        changes,
        full,
    }) = &cli.command
    {
        let action = commands::simulate::SimulateAction {
            cwd: cwd.clone(),
            manifest: manifest.clone(),
            changes: changes.clone(),
            full: *full,
        };
        return commands::simulate::run(action, cli.json);
    }

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Watch { manifest, root }) => {
            let span = tracing::info_span!("watch", cmd = "watch", cwd = %cwd.display());
            let _guard = span.enter();
            commands::watch::run(commands::watch::WatchAction {
                cwd,
                manifest,
                root,
            })
        }
        Some(Commands::Inspect { .. } | Commands::Simulate { .. }) => {
            unreachable!() // Handled above
        }
    }
}
