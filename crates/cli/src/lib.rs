pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use tally_core::config::AppConfig;

#[derive(Debug, Parser)]
#[command(
    name = "tally",
    about = "Tally operator CLI",
    long_about = "Inspect configuration, check runtime readiness, and simulate \
        pipeline runs against a deterministic offline backend.",
    after_help = "Examples:\n  tally doctor --json\n  tally config\n  tally simulate --text \"what were my hours this week?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with secrets redacted")]
    Config,
    #[command(about = "Validate config, tenant credential presence, and backend reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one message through the full pipeline against an offline backend")]
    Simulate {
        #[arg(long, help = "The inbound message text")]
        text: String,
        #[arg(long, default_value = "sms", help = "Delivery channel: sms|chat|email")]
        channel: String,
        #[arg(long, default_value = "demo", help = "Tenant id the run is attributed to")]
        tenant: String,
        #[arg(long, default_value = "operator", help = "User id the run is attributed to")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Simulate { text, channel, tenant, user } => {
            commands::simulate::run(&text, &channel, &tenant, &user)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub fn init_logging(config: &AppConfig) {
    use tally_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    // try_init so repeated command invocations in one process never panic.
    match config.logging.format {
        Compact => {
            let _ = tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .compact()
                .try_init();
        }
        Pretty => {
            let _ = tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .pretty()
                .try_init();
        }
        Json => {
            let _ = tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .json()
                .try_init();
        }
    }
}
