//! hostlink CLI
//!
//! Single binary for:
//! - Running the session manager headless (`hostlink run`)
//! - Driving a running instance (open, set, restart, disconnect, stop)
//! - Managing the host list and config file

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostlink::commands::{self, CliContext};
use hostlink::daemon;

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(author, version, about = "Keeps sync hosts provisioned and connected")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "HOSTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session manager in the foreground
    ///
    /// If an instance is already running, the first argument carrying the
    /// protocol scheme (or a plain open) is forwarded to it instead.
    Run {
        /// Launch arguments, such as a protocol link
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Open a host on the running instance and connect it
    Open {
        /// Protocol link to open
        link: Option<String>,
        /// Host address or title (default: the active or first host)
        #[arg(long, conflicts_with = "link")]
        host: Option<String>,
        /// Switch to the host without connecting
        #[arg(long)]
        no_connect: bool,
    },

    /// Switch the active host without connecting
    Set {
        /// Host address or title
        host: String,
    },

    /// Tear down and re-provision a host
    Restart {
        /// Host address or title (default: the active host)
        host: Option<String>,
    },

    /// Disconnect a host
    Disconnect {
        /// Host address or title (default: the active host)
        host: Option<String>,
    },

    /// Show sessions and aggregate status
    Status,

    /// Stop the running instance
    Stop,

    /// Manage the host list
    Hosts {
        #[command(subcommand)]
        action: HostsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HostsAction {
    /// List hosts in launch order
    List,
    /// Add a host (replaces one with the same address)
    Add {
        /// Display name
        title: String,
        /// Host address, such as sync.example.com or https://sync.example.com
        address: String,
        /// Credential used to register this machine's key
        #[arg(long, env = "HOSTLINK_CREDENTIAL", hide_env_values = true)]
        credential: Option<String>,
        /// SSH username for this host
        #[arg(long)]
        username: Option<String>,
    },
    /// Remove a host
    Remove {
        /// Host address or title
        host: String,
    },
    /// Make a host open first on launch
    Promote {
        /// Host address or title
        host: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show config file path
    Path,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let ctx = CliContext::new(cli.config.clone());

    let command = match cli.command {
        Some(cmd) => cmd,
        None => return commands::status_command(&ctx).await,
    };

    match command {
        Commands::Run { args } => daemon::run(&ctx, &args).await?,
        Commands::Open {
            link,
            host,
            no_connect,
        } => {
            commands::open_command(&ctx, link.as_deref(), host.as_deref(), no_connect).await?;
        }
        Commands::Set { host } => commands::set_command(&ctx, &host).await?,
        Commands::Restart { host } => commands::restart_command(&ctx, host.as_deref()).await?,
        Commands::Disconnect { host } => {
            commands::disconnect_command(&ctx, host.as_deref()).await?;
        }
        Commands::Status => commands::status_command(&ctx).await?,
        Commands::Stop => commands::stop_command(&ctx).await?,
        Commands::Hosts { action } => match action {
            HostsAction::List => commands::hosts_list(&ctx)?,
            HostsAction::Add {
                title,
                address,
                credential,
                username,
            } => commands::hosts_add(&ctx, &title, &address, credential, username).await?,
            HostsAction::Remove { host } => commands::hosts_remove(&ctx, &host).await?,
            HostsAction::Promote { host } => commands::hosts_promote(&ctx, &host).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Path => commands::config_path(&ctx)?,
            ConfigAction::Show => commands::config_show(&ctx)?,
        },
    }

    Ok(())
}

/// Log to stderr, and to `--log-file` when given
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    // The daemon reports lifecycle at info unless told otherwise
    let log_level = match (&cli.command, cli.quiet, cli.verbose) {
        (Some(Commands::Run { .. }), false, 0) => "info",
        _ => log_level,
    };

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(())
}
