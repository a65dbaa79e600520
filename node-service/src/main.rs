//! LoRa sensor node service.
//!
//! Runs the transceiver loop (C5) on a dedicated thread (the `Radio`
//! capability is synchronous), mirroring the gateway's split between a
//! blocking radio thread and whatever else the process needs.

mod commands;
mod config;
mod params;
mod sensors;
mod transceiver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use telemetry_core::{CommandDispatcher, MockRadio, RadioState};
use tracing::info;

use commands::register_builtins;
use config::NodeConfig;
use params::build_node_params;
use sensors::{Ads1115, Bme280, Mma8452, Sensor};
use transceiver::NodeTransceiver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("node service starting");

    let _instance_lock = telemetry_core::lock::SingleInstanceLock::acquire("node-service")
        .context("another node-service instance is already running")?;

    let config_path = std::env::var("NODE_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config::default_config_path());
    let config = NodeConfig::load_or_default(&config_path);
    info!(path = %config_path.display(), node_id = %config.node_id, "loaded configuration");

    let radio_state = Arc::new(RadioState::new());
    let params = Arc::new(build_node_params(radio_state.clone()));
    let ack_payload = Arc::new(Mutex::new(None));

    let mut dispatcher = CommandDispatcher::new(config.node_id.clone());
    register_builtins(&mut dispatcher, params, radio_state.clone(), config_path.clone(), ack_payload.clone());

    let sensors: Vec<Box<dyn Sensor>> =
        vec![Box::new(Bme280::default()), Box::new(Mma8452::default()), Box::new(Ads1115::default())];

    // No physical radio driver is part of this workspace (spec Non-goal);
    // MockRadio stands in as the bundled, always-available transport
    // until a real driver is wired in behind the `Radio` trait.
    let radio = Box::new(MockRadio::new());
    let broadcast_interval = std::time::Duration::from_secs(config.broadcast_interval_secs);
    let transceiver =
        NodeTransceiver::new(config.node_id.clone(), radio, radio_state, dispatcher, ack_payload, sensors, broadcast_interval);

    let stop = Arc::new(AtomicBool::new(false));
    let transceiver_stop = stop.clone();
    let transceiver_handle = std::thread::spawn(move || {
        transceiver.run(transceiver_stop);
    });

    info!("node service running, press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    stop.store(true, Ordering::Relaxed);
    transceiver_handle.join().ok();

    info!("node service stopped");
    Ok(())
}
