#![deny(unsafe_code)]

//! wgpilot CLI: runs the daemon and talks to it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wgpilot_config::{AppConfig, DEFAULT_CONFIG_PATH};
use wgpilot_core::IpcClient;
use wgpilot_core::controller::{INVALID_TUNNEL_NAME, TOOL_SPAWN_FAILED, TOOL_TERMINATED};

/// wgpilot: privileged WireGuard tunnel helper.
#[derive(Parser)]
#[command(name = "wgpilot", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground.
    Daemon,

    /// List known tunnels and their interfaces.
    List,

    /// Bring a tunnel up.
    Up { name: String },

    /// Bring a tunnel down.
    Down { name: String },

    /// Print the running daemon's version.
    Version,

    /// Hold a session open and print each state change.
    Watch,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    match cli.command {
        Commands::Daemon => cmd_daemon(config).await?,
        Commands::List => cmd_list(&client(&config)).await?,
        Commands::Up { name } => cmd_set_state(&client(&config), &name, true).await?,
        Commands::Down { name } => cmd_set_state(&client(&config), &name, false).await?,
        Commands::Version => println!("{}", client(&config).version().await?),
        Commands::Watch => cmd_watch(&client(&config)).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `-v` flags win over the configured level.
fn log_filter(verbose: u8, config: &AppConfig) -> String {
    match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn client(config: &AppConfig) -> IpcClient {
    IpcClient::new(&config.daemon.socket_path)
}

async fn cmd_daemon(config: AppConfig) -> Result<()> {
    info!("Starting wgpilot daemon");
    wgpilot_core::Daemon::new(config).run().await?;
    Ok(())
}

async fn cmd_list(client: &IpcClient) -> Result<()> {
    let tunnels = client.list_tunnels().await?;
    if tunnels.is_empty() {
        println!("No tunnels configured.");
        return Ok(());
    }
    for (name, tunnel) in &tunnels {
        let iface = if tunnel.is_active() {
            tunnel.interface_name.as_str()
        } else {
            "-"
        };
        println!("{name}\t{iface}");
    }
    Ok(())
}

async fn cmd_set_state(client: &IpcClient, name: &str, enable: bool) -> Result<()> {
    let code = client.set_tunnel_state(name, enable).await?;
    match code {
        0 => Ok(()),
        INVALID_TUNNEL_NAME => bail!("invalid tunnel name {name:?}"),
        TOOL_SPAWN_FAILED => bail!("daemon could not start the state tool"),
        TOOL_TERMINATED => bail!("state tool was killed before finishing"),
        code => bail!("state tool exited with code {code}"),
    }
}

async fn cmd_watch(client: &IpcClient) -> Result<()> {
    let mut events = client.subscribe().await?;
    while events.next().await?.is_some() {
        println!("state_changed");
    }
    info!("Daemon closed the event stream");
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("serializing config")?;
        println!("{toml_str}");
        let locator = config.locator();
        println!("# search path: {}", locator.search_path());
        println!("# state tool:  {}", locator.state_tool().display());
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}
