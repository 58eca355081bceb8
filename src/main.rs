use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use devagent::config::AgentToml;
use devagent::models::WorkStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "devagent")]
#[command(version, about = "Message-driven development agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to devagent.toml. Defaults to ./devagent.toml when present.
    #[arg(short, long, global = true, env = "DEVAGENT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume work requests until SIGINT/SIGTERM
    Consume,
    /// Publish a work request to the topic exchange
    Publish(PublishArgs),
    /// Inspect recorded work items
    Items {
        #[command(subcommand)]
        command: ItemsCommands,
    },
    /// Analyze a repository checkout and print the result as JSON
    Analyze {
        /// Repository root
        path: PathBuf,
    },
    /// Create the work item database
    InitDb,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct PublishArgs {
    /// Read the whole request from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["issue_key", "project_key", "summary"])]
    pub file: Option<PathBuf>,

    #[arg(long, required_unless_present = "file")]
    pub issue_key: Option<String>,

    #[arg(long, required_unless_present = "file")]
    pub project_key: Option<String>,

    #[arg(long, required_unless_present = "file")]
    pub summary: Option<String>,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Repository URL to target instead of the project's first repository
    #[arg(long)]
    pub repository: Option<String>,

    /// Issue tracker id; defaults to the issue key
    #[arg(long)]
    pub issue_id: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum ItemsCommands {
    /// List work items, newest first
    List {
        #[arg(long)]
        status: Option<WorkStatus>,
    },
    /// Show the most recent work item for an issue
    Show { issue_key: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration as TOML
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AgentToml::resolve(cli.config.as_deref())?;
    let _log_guard = devagent::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Consume => cmd::cmd_consume(&config).await?,
        Commands::Publish(args) => cmd::cmd_publish(&config, args).await?,
        Commands::Items { command } => cmd::cmd_items(&config, command.clone()).await?,
        Commands::Analyze { path } => cmd::cmd_analyze(path)?,
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
