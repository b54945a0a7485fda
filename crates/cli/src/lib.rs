pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "knatty",
    about = "Knatty assistant operator CLI",
    long_about = "Inspect Knatty configuration, check Gemini readiness, and run assistant turns locally.",
    after_help = "Examples:\n  knatty doctor --json\n  knatty config\n  knatty ask \"who is knatty\"\n  knatty ask --authenticated \"draw me a sunset\""
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
    #[command(about = "Validate config and Gemini model availability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Run one utterance through a fresh assistant session and print the transcript"
    )]
    Ask {
        #[arg(help = "Utterance to submit")]
        utterance: String,
        #[arg(long, help = "Treat the caller as logged in to the portal")]
        authenticated: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Ask { utterance, authenticated } => commands::ask::run(&utterance, authenticated),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
