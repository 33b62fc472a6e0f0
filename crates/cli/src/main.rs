//! Toolwright CLI entry point.
//!
//! Commands:
//! - `serve`    starts the streaming agent gateway
//! - `manifest` prints the tool manifest as JSON
//! - `render`   renders markdown from stdin to HTML
//! - `doctor`   checks config, credentials and the model provider
//! - `config`   shows, locates, initializes or validates the config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolwright",
    about = "Toolwright: tool-calling agent gateway with SSE streaming",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the tool manifest
    Manifest {
        /// Tool family to print (m365 or postgres)
        #[arg(long, default_value = "m365")]
        namespace: String,

        /// Print only the tool names
        #[arg(long)]
        names: bool,
    },

    /// Render markdown read from stdin
    Render {
        /// Feed stdin line by line through the incremental renderer
        #[arg(long)]
        incremental: bool,

        /// Disable sentence-based auto-paragraphing
        #[arg(long, conflicts_with = "incremental")]
        no_auto_paragraph: bool,
    },

    /// Diagnose configuration, credentials and provider
    Doctor,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print the config file path
    Path,
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "toolwright=debug" } else { "toolwright=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Manifest { namespace, names } => commands::manifest::run(&namespace, names)?,
        Commands::Render {
            incremental,
            no_auto_paragraph,
        } => commands::render::run(incremental, no_auto_paragraph)?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
