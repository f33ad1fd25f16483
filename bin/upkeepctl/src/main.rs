//! ---
//! upkeep_section: "05-operator-interfaces"
//! upkeep_subsection: "binary"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Control CLI for operators driving the update engine."
//! upkeep_version: "v0.1.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use upkeep_common::VersionInfo;

mod commands;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "upkeep update engine control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    /// Configuration file used instead of the default search locations.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<commands::Command>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    match cli.command {
        Some(command) => commands::run(command, cli.config),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
