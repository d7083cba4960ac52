//! IRC state tracker - Main binary

use clap::{Parser, Subcommand};
use ircwatch_core::{Config, IrcClient, LogSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Track the state of one IRC server connection
#[derive(Parser)]
#[command(name = "ircwatch")]
#[command(about = "Connects to an IRC server and tracks channel, user and server state")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ircwatch.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seconds between status lines in the log, 0 to disable
    #[arg(long, default_value_t = 60)]
    status_interval: u64,

    /// Print the final state snapshot as JSON on exit
    #[arg(long)]
    dump_state: bool,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "ircwatch.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = load_config(&cli.config)?;
    if cli.test_config {
        config.validate()?;
        println!("{}: configuration is valid", cli.config.display());
        return Ok(());
    }

    let (client, connection) = IrcClient::new(config, Arc::new(LogSink))?;
    let mut task = tokio::spawn(connection.run());

    if cli.status_interval > 0 {
        let status = client.clone();
        let period = Duration::from_secs(cli.status_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            while !status.is_shutdown() {
                ticker.tick().await;
                let snapshot = status.snapshot();
                info!(
                    state = %snapshot.state,
                    nick = %snapshot.nick,
                    channels = snapshot.channels.len(),
                    users = snapshot.users.len(),
                    lines = snapshot.stats.lines_received,
                    uptime = snapshot.stats.uptime_seconds(),
                    "status"
                );
            }
        });
    }

    tokio::select! {
        result = &mut task => {
            error!("connection task ended unexpectedly");
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            client.shutdown();
            task.await??;
        }
    }

    if cli.dump_state {
        println!("{}", serde_json::to_string_pretty(&client.snapshot())?);
    }

    Ok(())
}

/// Read the config file, or use defaults when there is none
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        info!(path = %path.display(), "loading configuration");
        Ok(Config::from_file(path)?)
    } else {
        info!(path = %path.display(), "no configuration file, using defaults");
        Ok(Config::default())
    }
}

/// Set up the fmt subscriber; unknown levels fall back to info
fn init_logging(level: &str) -> anyhow::Result<()> {
    let (max_level, recognised) = match level.parse::<tracing::Level>() {
        Ok(parsed) => (parsed, true),
        Err(_) => (tracing::Level::INFO, false),
    };

    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    if !recognised {
        tracing::warn!(level, "unknown log level, using info");
    }
    Ok(())
}

/// Write the default configuration to `output`
fn generate_config(output: &Path) -> anyhow::Result<()> {
    Config::default().to_file(output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn show_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
}
