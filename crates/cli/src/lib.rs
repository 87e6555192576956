pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "shopkeep",
    about = "Shopkeep storefront assistant CLI",
    long_about = "Apply migrations, load the demo storefront, inspect configuration, \
                  and chat with the assistant.",
    after_help = "Examples:\n  shopkeep migrate\n  shopkeep seed\n  \
                  shopkeep chat --customer CUST002"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog, customers, and historic orders")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Start an interactive chat session with approval prompts")]
    Chat {
        #[arg(long, help = "Customer id for a new session (defaults to agent.default_customer_id)")]
        customer: Option<String>,
        #[arg(long, help = "Resume an existing session id")]
        session: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Chat { customer, session } => commands::chat::run(commands::chat::ChatOptions {
            customer_id: customer,
            session_id: session,
        }),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
