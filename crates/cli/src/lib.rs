pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "quotedoc",
    about = "Quotedoc operator CLI",
    long_about = "Inspect quotedoc configuration, template wiring, and credential readiness.",
    after_help = "Examples:\n  quotedoc doctor --json\n  quotedoc config\n  quotedoc templates"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, template registry completeness, and credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the resolved template matrix as JSON")]
    Templates,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Templates => commands::templates::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
