//! Position Monitor
//!
//! Subscribes to the fleet's position topic and prints every decoded report.
//! Understands both the binary frame and the legacy JSON payload; malformed
//! frames are logged, counted and skipped.

use clap::Parser;
use dronefleet::observability::metrics;
use dronefleet::protocol::{canonicalize_topic, decode_any, PositionReport, DEFAULT_POSITION_TOPIC};
use dronefleet::session::BackoffPolicy;
use dronefleet::transport::mqtt::parse_broker_url;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Monitor drone position reports
#[derive(Parser)]
#[command(name = "position-monitor")]
#[command(about = "Decode and print drone position reports from MQTT")]
#[command(version)]
struct Args {
    /// Broker URL, e.g. mqtt://localhost:1883
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Topic to subscribe to
    #[arg(long, default_value = DEFAULT_POSITION_TOPIC)]
    topic: String,

    /// Show only reports from this agent
    #[arg(long)]
    agent_id: Option<String>,

    /// Output format (pretty, compact, or json)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// MQTT username (optional)
    #[arg(long)]
    username: Option<String>,

    /// MQTT password (optional)
    #[arg(long)]
    password: Option<String>,
}

/// Output formatting options
#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Colored, multi-line
    Pretty,
    /// Single line per report
    Compact,
    /// One JSON object per line
    Json,
}

const RESET: &str = "\x1b[0m";
const AGENT_COLOR: &str = "\x1b[1;36m";
const COORD_COLOR: &str = "\x1b[93m";
const ERROR_COLOR: &str = "\x1b[1;31m";

/// Running counters, printed on exit
#[derive(Debug, Default)]
struct MonitorStats {
    received: u64,
    decoded: u64,
    malformed: u64,
    payload_bytes: u64,
}

impl MonitorStats {
    fn average_payload(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.payload_bytes as f64 / self.received as f64
        }
    }
}

fn format_report(report: &PositionReport, payload_len: usize, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "agent_id": report.agent_id,
                "sequence_number": report.sequence_number,
                "timestamp_epoch_seconds": report.timestamp_epoch_seconds,
                "latitude_deg": report.latitude_deg,
                "longitude_deg": report.longitude_deg,
                "payload_bytes": payload_len,
            });
            serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Compact => format!(
            "{} #{} {} {:.7},{:.7} ({}B)",
            report.agent_id,
            report.sequence_number,
            report.timestamp_epoch_seconds,
            report.latitude_deg,
            report.longitude_deg,
            payload_len
        ),
        OutputFormat::Pretty => {
            let sampled_at = chrono::DateTime::from_timestamp(
                i64::from(report.timestamp_epoch_seconds),
                0,
            )
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| report.timestamp_epoch_seconds.to_string());
            format!(
                "{AGENT_COLOR}[{}]{RESET} seq {} at {sampled_at}\n  {COORD_COLOR}{:.7}, {:.7}{RESET}  ({payload_len} bytes)",
                report.agent_id, report.sequence_number, report.latitude_deg, report.longitude_deg
            )
        }
    }
}

fn setup_mqtt_client(args: &Args) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    let (host, port, tls) = parse_broker_url(&args.broker_url)?;
    let client_id = format!("position-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        mqtt_options.set_credentials(username, password);
    }
    if tls {
        mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
    }
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_clean_session(true);

    Ok(AsyncClient::new(mqtt_options, 100))
}

/// Handle one incoming payload; returns the line to print, if any
fn handle_payload(
    payload: &[u8],
    args: &Args,
    stats: &mut MonitorStats,
) -> Option<String> {
    stats.received += 1;
    stats.payload_bytes += payload.len() as u64;

    match decode_any(payload) {
        Ok(report) => {
            stats.decoded += 1;
            if args
                .agent_id
                .as_deref()
                .is_some_and(|wanted| wanted != report.agent_id)
            {
                return None;
            }
            Some(format_report(&report, payload.len(), &args.format))
        }
        Err(e) => {
            stats.malformed += 1;
            metrics().malformed_frame();
            warn!(error = %e, bytes = payload.len(), "Discarding malformed frame");
            match args.format {
                OutputFormat::Pretty => Some(format!("{ERROR_COLOR}[MALFORMED]{RESET} {e}")),
                _ => None,
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("position_monitor=info,rumqttc=warn")
        .init();

    let args = Args::parse();
    let topic = canonicalize_topic(&args.topic);

    println!("Drone Position Monitor");
    println!("======================");
    println!("Broker: {}", args.broker_url);
    println!("Topic: {topic}");
    if let Some(agent_id) = &args.agent_id {
        println!("Agent filter: {agent_id}");
    }
    println!("Press Ctrl+C to stop monitoring");
    println!();

    let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);
    let mut reconnect_delay = backoff.delay_for_attempt(1);
    let mut stats = MonitorStats::default();

    'connection: loop {
        info!("Connecting to MQTT broker...");
        let (client, mut eventloop) = setup_mqtt_client(&args)?;

        if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
            error!("Failed to subscribe: {}", e);
        }

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Shutdown signal received...");
                    let _ = tokio::time::timeout(Duration::from_millis(500), client.disconnect()).await;
                    break 'connection;
                }
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(line) = handle_payload(&publish.payload, &args, &mut stats) {
                            println!("{line}");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        reconnect_delay = backoff.delay_for_attempt(1);
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = %topic, "Subscribed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection lost: {}", e);
                        break;
                    }
                }
            }
        }

        warn!("Reconnecting in {} seconds...", reconnect_delay.as_secs());
        tokio::select! {
            _ = signal::ctrl_c() => break 'connection,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
        reconnect_delay = backoff.next_delay(reconnect_delay);
    }

    println!();
    println!(
        "received {} payloads, decoded {}, malformed {}, average {:.1} bytes",
        stats.received,
        stats.decoded,
        stats.malformed,
        stats.average_payload()
    );
    Ok(())
}
