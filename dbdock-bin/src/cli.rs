use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dbdock")]
#[command(about = "Run local database containers and follow their logs", long_about = None)]
pub struct Cli {
    /// Settings file holding the configured instances
    #[arg(long, global = true, env = "DBDOCK_SETTINGS", default_value = "dbdock.json")]
    pub settings: PathBuf,

    /// Directory under which default instances keep their data
    #[arg(long, global = true, env = "DBDOCK_VOLUME_ROOT")]
    pub volume_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show configured instances without contacting Docker
    List,

    /// Refresh every instance from Docker and show the result
    Status,

    /// Start instances (all of them when no name is given)
    Start {
        /// Instance names, matched case-insensitively
        names: Vec<String>,
    },

    /// Stop instances (all running ones when no name is given)
    Stop {
        names: Vec<String>,
    },

    /// Follow container logs until Ctrl-C
    #[command(alias = "logs")]
    Watch {
        /// Only show entries for this instance
        name: Option<String>,
    },
}
