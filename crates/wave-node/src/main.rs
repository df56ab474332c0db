mod command;
mod config;
mod listen;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::{ChannelEntry, NodeConfig};
use wave_transport::Identity;

#[derive(Parser)]
#[command(name = "wave-node", about = "Mesh push-to-talk node")]
struct Cli {
    /// TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Display name announced to peers (overrides the config file).
    #[arg(short, long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an identity seed file.
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },

    /// Start the node and read commands from stdin.
    Run {
        /// Extra channel to join (repeatable).
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Become arbiter on every joined channel at startup.
        #[arg(long)]
        arbiter: bool,
    },

    /// Print channels announced on the discovery group.
    Listen {
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(name) = cli.name {
        config.name = Some(name);
    }

    match cli.command {
        Command::Keygen { out } => {
            let identity = Identity::generate();
            config::write_identity(&out, &identity)?;
            println!("{}", identity.public());
        }

        Command::Run { channels, arbiter } => {
            config
                .channels
                .extend(channels.iter().map(|name| ChannelEntry::named(name)));
            let identity = config.identity()?;

            eprintln!("wave-node v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("Node ID: {}", identity.public());
            eprintln!();

            let (mut session, streams) = session::Session::start(&config, identity).await?;
            for entry in &config.channels {
                session.join(entry).await?;
            }
            if arbiter {
                session.become_arbiter_everywhere().await?;
            }
            session.run(streams).await?;
        }

        Command::Listen { seconds } => {
            let identity = config.identity()?;
            listen::run(&config, identity, seconds).await?;
        }
    }

    Ok(())
}
