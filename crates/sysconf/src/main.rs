//! sysconf - inspect the snapshots sysconfd serves

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Command};
use error::CliError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_command(&cli) {
        tracing::debug!(code = e.code(), "command failed");
        output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

fn run_command(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Dns { acknowledge } => commands::dns(cli, *acknowledge),
        Command::Nwi {
            family,
            acknowledge,
        } => commands::nwi(cli, *family, *acknowledge),
        Command::Status { lock_dir } => commands::status(cli, lock_dir),
        Command::Keys => commands::keys(cli),
    }
}

fn output_error(cli: &Cli, e: &CliError) {
    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "error": {
                    "code": e.code(),
                    "message": e.to_string(),
                }
            })
        );
    } else {
        eprintln!("error: {}", e);
    }
}
