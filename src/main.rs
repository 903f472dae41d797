//! dronefleet - main entry point

use dronefleet::config::FleetConfig;
use dronefleet::error::{FleetError, FleetResult};
use dronefleet::fleet::{Supervisor, SupervisorHandle, SupervisorSettings};
use dronefleet::observability::{init_default_logging, metrics, HealthServer};
use dronefleet::protocol::{epoch_seconds_now, PayloadFormat, Position, PositionReport};
use dronefleet::transport::MqttTransportFactory;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

/// Drone fleet position publisher
#[derive(Parser)]
#[command(name = "dronefleet")]
#[command(about = "Publishes simulated drone positions as compact MQTT frames")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fleet until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration
        #[arg(long)]
        show: bool,
    },
    /// Encode one report and compare frame size against JSON
    Encode {
        #[arg(long)]
        id: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 0)]
        seq: u32,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let result = match cli.command {
        Commands::Encode { id, lat, lon, seq } => encode_command(id, lat, lon, seq),
        Commands::Config { show } => {
            load_configuration(&cli.config).and_then(|config| config_command(&config, show))
        }
        Commands::Run => match load_configuration(&cli.config) {
            Ok(config) => run_fleet(config).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("error: {e}");
        process::exit(if e.is_configuration_error() { 2 } else { 1 });
    }
}

fn load_configuration(path: &Option<PathBuf>) -> FleetResult<FleetConfig> {
    let config = FleetConfig::load(path.as_deref())?;
    info!(
        agents = config.agents.len(),
        broker = %config.broker.broker_url,
        "Configuration loaded"
    );
    Ok(config)
}

async fn run_fleet(config: FleetConfig) -> FleetResult<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        agents = config.agents.len(),
        "Starting dronefleet"
    );

    let factory = MqttTransportFactory::new(config.broker.clone(), config.session.queue_capacity);
    let mut supervisor = Supervisor::new(SupervisorSettings::from(&config));
    supervisor.start(config.agent_specs(), &factory, Instant::now())?;
    let handle = supervisor.handle();

    if config.health.enabled {
        let server = HealthServer::new(config.health.port, handle.subscribe());
        tokio::spawn(server.start());
    }

    tokio::spawn(wait_for_signal(handle.clone()));

    supervisor.run().await?;

    let snapshot = metrics().get_metrics();
    info!(
        frames_published = snapshot.link.frames_published,
        frames_evicted = snapshot.sampling.frames_evicted,
        "Fleet stopped"
    );
    Ok(())
}

/// Request shutdown on SIGINT or SIGTERM
async fn wait_for_signal(handle: SupervisorHandle) {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, only SIGINT will stop the fleet");
            if signal::ctrl_c().await.is_ok() {
                handle.shutdown();
            }
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    handle.shutdown();
}

fn config_command(config: &FleetConfig, show: bool) -> FleetResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| FleetError::internal(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }
    info!("Configuration validation complete");
    Ok(())
}

fn encode_command(id: String, lat: f64, lon: f64, seq: u32) -> FleetResult<()> {
    let position = Position::new(lat, lon);
    if !position.is_valid() {
        return Err(FleetError::InvalidPosition {
            agent_id: id,
            latitude: lat,
            longitude: lon,
        });
    }

    let report = PositionReport {
        agent_id: id,
        sequence_number: seq,
        timestamp_epoch_seconds: epoch_seconds_now(),
        latitude_deg: position.latitude_deg,
        longitude_deg: position.longitude_deg,
    };

    let binary = PayloadFormat::Binary.encode(&report, &report.agent_id)?;
    let json = PayloadFormat::Json.encode(&report, &report.agent_id)?;
    let hex: String = binary.iter().map(|byte| format!("{byte:02x}")).collect();

    println!("{hex}");
    println!(
        "binary: {} bytes, json: {} bytes ({:.0}% smaller)",
        binary.len(),
        json.len(),
        100.0 * (1.0 - binary.len() as f64 / json.len() as f64)
    );
    Ok(())
}
