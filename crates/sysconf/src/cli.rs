use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "sysconf", about = "Inspect sysconfd configuration snapshots", version)]
pub struct Cli {
    /// Daemon socket (defaults to the system socket)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human output
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the DNS resolver configuration
    Dns {
        /// Acknowledge the copied generation
        #[arg(long)]
        acknowledge: bool,
    },
    /// Show ranked network interfaces
    Nwi {
        /// Address family to list
        #[arg(long, value_enum, default_value_t = Family::All)]
        family: Family,

        /// Acknowledge the copied generation
        #[arg(long)]
        acknowledge: bool,
    },
    /// Show daemon lock and connection status
    Status {
        /// Directory holding the daemon lock
        #[arg(long, default_value = "/var/run/sysconfd")]
        lock_dir: PathBuf,
    },
    /// Print the change-notification keys
    Keys,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Family {
    Inet,
    Inet6,
    All,
}
