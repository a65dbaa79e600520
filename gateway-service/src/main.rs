//! LoRa gateway service.
//!
//! Runs the serial command queue and transceiver loop (C4/C5) on a
//! dedicated thread (the `Radio` capability is synchronous), while the
//! operator HTTP surface, dashboard forwarding and optional local sensor
//! loop run on the Tokio runtime.

mod config;
mod dashboard;
mod led;
mod local_sensors;
mod operator;
mod state;
mod transceiver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use telemetry_core::{
    build_gateway_params, CommandQueue, CommandQueueConfig, MockRadio, RadioState,
};
use tracing::{info, warn};

use config::GatewayConfig;
use dashboard::{DashboardSink, LoggingSink, ReqwestSink, SensorCollector};
use led::NoLedSink;
use local_sensors::{run_local_sensor_loop, NoLocalSensors};
use operator::OperatorSurface;
use state::GatewayState;
use transceiver::{DiscoverySlot, FlashToggle, GatewayTransceiver};

/// Command names the gateway itself answers to over the operator surface
/// (as opposed to node command frames, which are a node-service concern).
const GATEWAY_COMMANDS: &[&str] = &["discover", "ping"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("gateway service starting");

    let _instance_lock = telemetry_core::lock::SingleInstanceLock::acquire("gateway-service")
        .context("another gateway-service instance is already running")?;

    let config_path = std::env::var("GATEWAY_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config::default_config_path());
    let config = GatewayConfig::load_or_default(&config_path);
    info!(path = %config_path.display(), node_id = %config.node_id, "loaded configuration");

    let radio_state = Arc::new(RadioState::new());
    let command_queue = Arc::new(CommandQueue::new(CommandQueueConfig {
        max_size: config.command_queue.max_size,
        max_retries: config.command_queue.max_retries,
        initial_retry_ms: config.command_queue.initial_retry_ms,
        max_retry_ms: config.command_queue.max_retry_ms,
        retry_multiplier: config.command_queue.retry_multiplier,
        discovery_retries: config.command_queue.discovery_retries,
        ..CommandQueueConfig::default()
    }));
    let gateway_state = Arc::new(GatewayState::new());
    let discovery = DiscoverySlot::default();

    let sink: Box<dyn DashboardSink> = if config.dashboard_url.is_empty() {
        Box::new(LoggingSink)
    } else {
        Box::new(ReqwestSink::new(config.dashboard_url.clone()))
    };
    let collector = Arc::new(SensorCollector::new(gateway_state.clone(), sink));

    let params = build_gateway_params(radio_state.clone(), command_queue.clone(), config.node_id.clone());
    let command_names: Vec<String> = GATEWAY_COMMANDS.iter().map(|s| s.to_string()).collect();
    let operator = Arc::new(OperatorSurface::new(
        command_queue.clone(),
        params,
        command_names,
        gateway_state.clone(),
        discovery.clone(),
        config_path.clone(),
        radio_state.clone(),
    ));

    // No physical radio driver is part of this workspace (spec Non-goal);
    // MockRadio stands in as the bundled, always-available transport
    // until a real driver is wired in behind the `Radio` trait.
    let radio = Box::new(MockRadio::new());
    let flash_enabled = FlashToggle::new(config.led_flash_on_rx);
    let transceiver = GatewayTransceiver::new(
        radio,
        radio_state.clone(),
        command_queue.clone(),
        collector.clone(),
        discovery,
        Box::new(NoLedSink),
        flash_enabled,
    );

    let stop = Arc::new(AtomicBool::new(false));
    let transceiver_stop = stop.clone();
    let transceiver_handle = std::thread::spawn(move || {
        transceiver.run(transceiver_stop);
    });

    let operator_bind = config.operator_bind.clone();
    let operator_handle = tokio::spawn(async move {
        if let Err(e) = operator.serve(&operator_bind).await {
            warn!(error = %e, "operator surface stopped");
        }
    });

    let local_sensor_handle = tokio::spawn(run_local_sensor_loop(
        config.node_id.clone(),
        Arc::new(NoLocalSensors),
        collector,
        std::time::Duration::from_secs(30),
    ));

    info!("gateway service running, press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    operator_handle.abort();
    local_sensor_handle.abort();
    stop.store(true, Ordering::Relaxed);
    transceiver_handle.join().ok();

    info!("gateway service stopped");
    Ok(())
}
