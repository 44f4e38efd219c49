//! contempt - command line client
//!
//! Connects to the gateway and watches the session, or runs one-off REST
//! commands against a channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use contempt::proto::{Entity, Snowflake};
use contempt::{Client, ClientConfig, ConnectionState, LogStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "contempt")]
#[command(about = "Gateway and REST client for a chat service")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Authentication token; overrides the config file
    #[arg(long, env = "CONTEMPT_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log the session until interrupted
    Connect,

    /// Print a channel's recent messages, oldest first
    History {
        /// Channel ID
        channel: Snowflake,

        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Messages per page
        #[arg(long, default_value_t = 50)]
        limit: u8,
    },

    /// Post a message
    Send {
        /// Channel ID
        channel: Snowflake,

        /// Message text
        content: String,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "contempt.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("contempt=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::InitConfig { output } => init_config(&output)?,
        Commands::Connect => {
            let client = build_client(cli.config.as_deref(), cli.token)?;
            run_session(&client).await?;
        }
        Commands::History {
            channel,
            pages,
            limit,
        } => {
            let client = build_client(cli.config.as_deref(), cli.token)?;
            print_history(&client, channel, pages, limit).await?;
        }
        Commands::Send { channel, content } => {
            let client = build_client(cli.config.as_deref(), cli.token)?;
            let message = client.send_message(channel, &content).await?;
            println!("sent {}", message.id);
        }
    }

    Ok(())
}

fn build_client(config_path: Option<&Path>, token: Option<String>) -> anyhow::Result<Client> {
    let mut config = match config_path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(token) = token {
        config.token = token;
    }

    let log = Arc::new(LogStore::new(config.log.capacity));
    Ok(Client::new(config, log)?)
}

async fn run_session(client: &Client) -> anyhow::Result<()> {
    let mut states = client.subscribe_state();
    let mut packets = client.dispatcher().subscribe();

    client.connect().await.context("connecting to gateway")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            state = states.recv() => {
                let Some(state) = state else { break };
                info!(%state, "connection state");
                if state == ConnectionState::Connected {
                    let guilds = client.sorted_guilds().await;
                    let channels = client.private_channel_directory().await;
                    info!(guilds = guilds.len(), private_channels = channels.len(), "session ready");
                }
                if state == ConnectionState::Failed {
                    anyhow::bail!("gateway connection failed");
                }
            }
            packet = packets.recv() => match packet {
                Ok(packet) => {
                    if let Some(name) = packet.event_name() {
                        info!(event = name, seq = ?packet.s, "dispatch");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "packet log lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn print_history(client: &Client, channel: Snowflake, pages: u32, limit: u8) -> anyhow::Result<()> {
    let history = client.history(channel).with_page_size(limit);
    for _ in 0..pages.max(1) {
        history.load_older().await?;
        if history.is_exhausted() {
            break;
        }
    }

    for message in history.messages() {
        println!(
            "[{}] {} ({}): {}",
            message.timestamp.format("%Y-%m-%d %H:%M"),
            message.author.display_name(),
            message.id(),
            message.content
        );
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let sample = ClientConfig::with_token("your-token-here").to_toml()?;
    std::fs::write(output, sample).with_context(|| format!("writing {}", output.display()))?;
    println!("Config written to {}", output.display());
    println!("Edit the token before connecting, or pass --token / CONTEMPT_TOKEN.");
    Ok(())
}
