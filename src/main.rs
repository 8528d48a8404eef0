use std::process::ExitCode;

use clap::{Parser, Subcommand};

use coding_agent::commands::init::InitArgs;
use coding_agent::commands::process::ProcessCommand;
use coding_agent::commands::queue::QueueCommand;
use coding_agent::commands::run::RunCommand;
use coding_agent::commands::status::StatusArgs;
use coding_agent::commands::webhook::WebhookArgs;
use coding_agent::commands::schema;
use coding_agent::error::ExitError;
use coding_agent::telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "coding-agent",
    version,
    about = "Queue-driven issue fixing and pull request review for GitHub repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the issue and PR review pollers
    Run {
        #[command(subcommand)]
        command: RunCommand,
    },
    /// Inspect and edit the task queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Run one issue fix or PR review right now
    Process {
        #[command(subcommand)]
        command: ProcessCommand,
    },
    /// Show queue status
    Status(StatusArgs),
    /// Feed a GitHub webhook delivery into the queue
    Webhook(WebhookArgs),
    /// Write a default .coding-agent.toml
    Init(InitArgs),
    /// Print the JSON Schema for .coding-agent.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Queue { .. } => "queue",
            Self::Process { .. } => "process",
            Self::Status(_) => "status",
            Self::Webhook(_) => "webhook",
            Self::Init(_) => "init",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Run { command } => command.execute(),
        Commands::Queue { command } => command.execute(),
        Commands::Process { command } => command.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Webhook(args) => args.execute(),
        Commands::Init(args) => args.execute(),
        Commands::Schema => schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
