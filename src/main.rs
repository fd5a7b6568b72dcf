use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deboot_bridge::broker::MqttBroker;
use deboot_bridge::cloud::MemoryCloud;
use deboot_bridge::config::CloudBackend;
use deboot_bridge::{Bridge, BridgeOptions, CommandTable, Config, EventTable};

/// Deboot - MQTT bridge for cloud-connected robot vacuums
#[derive(Parser)]
#[command(name = "deboot", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/deboot/config.toml)
    #[arg(short, long, env = "DEBOOT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then print it with secrets hidden
    CheckConfig,
    /// Print the topics the bridge uses for a device
    Topics {
        /// Device id
        #[arg(short, long)]
        device: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,deboot_bridge=info",
        1 => "info,deboot_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::CheckConfig => {
                print!("{config}");
                Ok(())
            }
            Command::Topics { device } => print_topics(&config, &device),
        };
    }

    tracing::info!(
        server = %config.mqtt.server,
        port = config.mqtt.port,
        topic = %config.mqtt.topic,
        profile = %config.bridge.profile,
        "starting deboot bridge"
    );

    let options = BridgeOptions::from_config(&config)?;

    // Broker connect failure ends the process before anything else happens
    let broker = Arc::new(MqttBroker::connect(&config.mqtt, &options.topics.status()).await?);

    let cloud = match config.cloud.backend {
        CloudBackend::Simulated => Arc::new(MemoryCloud::simulated(&config.cloud)),
    };

    let bridge = Bridge::new(options, broker, cloud);
    bridge
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Print every topic of one device
fn print_topics(config: &Config, device: &str) -> anyhow::Result<()> {
    if device.is_empty() || device.contains('/') || deboot_bridge::topics::has_wildcards(device) {
        anyhow::bail!("device id is not usable in a topic: {device:?}");
    }

    let topics = config.topics();
    let commands: CommandTable = config.command_table()?;

    println!("{:<8} {}", "status", topics.status());
    println!("{:<8} {}", "info", topics.info(device));
    for mapping in EventTable::standard().iter() {
        let topic = if mapping.transform.is_some() {
            topics.event_item(device, mapping.suffix, "<key>")
        } else {
            topics.event(device, mapping.suffix)
        };
        println!("{:<8} {topic}", "event");
    }
    for name in commands.names() {
        println!("{:<8} {}", "command", topics.command(device, name));
    }
    Ok(())
}
