//! Scratch Sensor CLI Entry Point
//!
//! Command-line front end for talking to Scratch's remote sensor port.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scratch_sensor::config::{Config, LoggingConfig};
use scratch_sensor::{Handlers, RemoteSensorConnection, SensorValue};

#[derive(Parser)]
#[command(name = "scratch-sensor")]
#[command(author, version, about = "Scratch remote sensor client - send and receive broadcasts and sensor updates")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scratch host (overrides the configuration file)
    #[arg(long, env = "SCRATCH_HOST")]
    host: Option<String>,

    /// Remote sensor port (overrides the configuration file)
    #[arg(long, env = "SCRATCH_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print incoming broadcasts and sensor updates until interrupted
    Listen {
        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Send a single broadcast
    Broadcast {
        /// Broadcast message
        message: String,
    },
    /// Send a sensor update
    Update {
        /// Entries as name=value; numeric values are sent as numbers
        #[arg(required = true, value_parser = parse_entry)]
        entries: Vec<(String, SensorValue)>,
    },
    /// Run a short demonstration exchange against Scratch
    Demo {
        /// Pause between demo steps in milliseconds
        #[arg(long, default_value = "4000")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default_config(),
    };
    if let Some(host) = cli.host.clone() {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }

    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Listen { json } => listen(config, json).await,
        Commands::Broadcast { message } => {
            let conn = RemoteSensorConnection::with_config(config.connection, Handlers::new());
            conn.connect().await.context("Failed to connect to Scratch")?;
            conn.send_broadcast(&message).await?;
            conn.disconnect().await;
            Ok(())
        }
        Commands::Update { entries } => {
            let conn = RemoteSensorConnection::with_config(config.connection, Handlers::new());
            conn.connect().await.context("Failed to connect to Scratch")?;
            conn.send_sensor_update(entries).await?;
            conn.disconnect().await;
            Ok(())
        }
        Commands::Demo { interval_ms } => demo(config, Duration::from_millis(interval_ms)).await,
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match logging.format.as_str() {
        "json" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "compact" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .compact()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        other => {
            if other != "pretty" {
                eprintln!("Unknown log format `{}`, using pretty", other);
            }
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .pretty()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Handlers that print every incoming message to stdout
fn printing_handlers(json: bool) -> Handlers {
    Handlers::new()
        .on_broadcast(move |message| {
            if json {
                let event = serde_json::json!({ "type": "broadcast", "message": message });
                println!("{}", serde_json::to_string(&event)?);
            } else {
                println!("[receive] broadcast: {}", message);
            }
            Ok(())
        })
        .on_sensor_update(move |update| {
            if json {
                let event = serde_json::json!({ "type": "sensor-update", "values": update });
                println!("{}", serde_json::to_string(&event)?);
            } else {
                for (name, value) in update.iter() {
                    println!("[receive] sensor-update: {} {}", name, value);
                }
            }
            Ok(())
        })
}

async fn listen(config: Config, json: bool) -> Result<()> {
    let conn = RemoteSensorConnection::with_config(config.connection, printing_handlers(json));
    conn.connect().await.context("Failed to connect to Scratch")?;
    info!(peer = ?conn.peer_addr(), "Listening for Scratch messages, press Ctrl-C to stop");

    wait_for_shutdown(&conn).await;
    conn.disconnect().await;
    Ok(())
}

async fn demo(config: Config, interval: Duration) -> Result<()> {
    let conn = RemoteSensorConnection::with_config(config.connection, printing_handlers(false));
    conn.connect().await.context("Failed to connect to Scratch")?;

    tokio::time::sleep(interval / 2).await;
    conn.send_broadcast("TEST").await?;

    for test in [0, 100, 0] {
        tokio::time::sleep(interval).await;
        conn.send_sensor_update([("TEST", test), ("TEST2", 0)]).await?;
    }

    wait_for_shutdown(&conn).await;
    conn.disconnect().await;
    Ok(())
}

/// Block until Ctrl-C or until Scratch drops the connection
async fn wait_for_shutdown(conn: &RemoteSensorConnection) {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                return;
            }
            _ = ticker.tick() => {
                if !conn.is_connected() {
                    warn!("Connection to Scratch lost");
                    return;
                }
            }
        }
    }
}

fn parse_entry(raw: &str) -> Result<(String, SensorValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{}`", raw))?;
    if name.is_empty() {
        return Err(format!("missing sensor name in `{}`", raw));
    }
    let value = match value.parse::<f64>() {
        Ok(n) if n.is_finite() => SensorValue::Number(n),
        _ => SensorValue::Text(value.to_string()),
    };
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            parse_entry("distance=12.5").unwrap(),
            ("distance".to_string(), SensorValue::Number(12.5))
        );
        assert_eq!(
            parse_entry("mode=auto=on").unwrap(),
            ("mode".to_string(), SensorValue::Text("auto=on".to_string()))
        );
        assert!(parse_entry("novalue").is_err());
        assert!(parse_entry("=3").is_err());
    }

    #[test]
    fn test_cli_parses_update_entries() {
        let cli = Cli::try_parse_from(["scratch-sensor", "--port", "42002", "update", "a=1", "b=x"]).unwrap();
        assert_eq!(cli.port, Some(42002));
        match cli.command {
            Commands::Update { entries } => assert_eq!(entries.len(), 2),
            _ => panic!("expected update"),
        }
    }
}
