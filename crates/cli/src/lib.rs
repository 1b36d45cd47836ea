pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cabbot",
    about = "Cabbot operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and talk to the session engine from a terminal.",
    after_help = "Examples:\n  cabbot doctor --json\n  cabbot config\n  cabbot chat --demo"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack readiness, lookup endpoint, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Chat with the session engine interactively (type `exit` to quit)")]
    Chat {
        #[arg(long, help = "Use the built-in demo driver roster instead of the lookup endpoint")]
        demo: bool,
        #[arg(long, default_value = "cli-user", help = "User id the conversation runs as")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::CommandResult::text(commands::config::run()),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chat { demo, user } => {
            commands::chat::run(commands::chat::ChatOptions { demo, user_id: user })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
