//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use zuauth_core::config::{self, paths};
use zuauth_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "zuauth")]
#[command(version)]
#[command(about = "Sign in to a Supabase project with a Zupass proof")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to the logs directory (filter with ZUAUTH_LOG)
    #[arg(long, global = true)]
    log_file: bool,
}

/// Ways to hand over a proof instead of waiting for the browser.
#[derive(clap::Args, Debug, Clone, Default)]
struct ProofArgs {
    /// Serialized PCD (or the full redirect URL carrying it)
    #[arg(long, value_name = "PCD", conflicts_with = "pcd_file")]
    pcd: Option<String>,

    /// Read the serialized PCD from a file ("-" for stdin)
    #[arg(long, value_name = "PATH")]
    pcd_file: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in with a Zupass proof (opens the browser unless a proof is given)
    Login {
        #[command(flatten)]
        proof: ProofArgs,

        /// Print the prover URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show the stored session and check it against the backend
    Status,

    /// Sign out and clear the stored session
    Logout,

    /// Print the Zupass prove-request URL
    RequestUrl {
        /// Where the prover should send the proof
        #[arg(long, value_name = "URL")]
        return_url: Option<String>,
    },

    /// Print the account a proof maps to (no network)
    Derive {
        #[command(flatten)]
        proof: ProofArgs,

        /// Print the derived password in full
        #[arg(long)]
        show_password: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Set the Supabase project URL and/or anon key
    SetBackend {
        /// Project URL, e.g. https://xyz.supabase.co
        #[arg(long)]
        url: Option<String>,
        /// Public anon key
        #[arg(long)]
        anon_key: Option<String>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;

    let log_dir = (cli.log_file || config.logging.file).then(paths::logs_dir);
    let _log_guard = logging::init(log_dir.as_deref())?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli.command, &config).await })
}

async fn dispatch(command: Commands, config: &config::Config) -> Result<()> {
    match command {
        Commands::Login { proof, no_browser } => {
            commands::auth::login(
                config,
                commands::auth::LoginOptions {
                    pcd: proof.pcd.as_deref(),
                    pcd_file: proof.pcd_file.as_deref(),
                    no_browser,
                },
            )
            .await
        }
        Commands::Status => commands::auth::status(config).await,
        Commands::Logout => commands::auth::logout(config).await,
        Commands::RequestUrl { return_url } => {
            commands::proof::request_url(config, return_url.as_deref())
        }
        Commands::Derive {
            proof,
            show_password,
        } => commands::proof::derive(
            config,
            proof.pcd.as_deref(),
            proof.pcd_file.as_deref(),
            show_password,
        ),
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::SetBackend { url, anon_key } => {
                commands::config::set_backend(url.as_deref(), anon_key.as_deref())
            }
        },
    }
}
