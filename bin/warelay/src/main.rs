mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "warelay")]
#[command(about = "A WhatsApp customer-to-agent message relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize warelay configuration and data directories
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration status
    Status,

    /// Start the relay gateway (long-running daemon)
    Gateway {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage agents
    Agents {
        #[command(subcommand)]
        command: AgentsCommands,
    },

    /// Manage redirect rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
}

#[derive(Subcommand)]
enum AgentsCommands {
    /// List all agents
    List,
    /// Register a new agent
    Add {
        /// Agent display name
        name: String,
        /// WhatsApp number (E.164); omit for console-only agents
        #[arg(long)]
        phone: Option<String>,
    },
    /// Remove an agent and their redirect rules
    Remove {
        /// Agent id
        id: i64,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List all redirect rules
    List,
    /// Redirect a customer number to an agent
    Add {
        /// Customer number (E.164)
        number: String,
        /// Agent id
        agent_id: i64,
    },
    /// Remove a redirect rule
    Remove {
        /// Customer number (E.164)
        number: String,
        /// Agent id
        agent_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Gateway { port, host } => {
            commands::gateway::run(host, port).await?;
        }
        Commands::Agents { command } => match command {
            AgentsCommands::List => {
                commands::agents::list().await?;
            }
            AgentsCommands::Add { name, phone } => {
                commands::agents::add(&name, phone.as_deref()).await?;
            }
            AgentsCommands::Remove { id } => {
                commands::agents::remove(id).await?;
            }
        },
        Commands::Rules { command } => match command {
            RulesCommands::List => {
                commands::rules::list().await?;
            }
            RulesCommands::Add { number, agent_id } => {
                commands::rules::add(&number, agent_id).await?;
            }
            RulesCommands::Remove { number, agent_id } => {
                commands::rules::remove(&number, agent_id).await?;
            }
        },
    }

    Ok(())
}
