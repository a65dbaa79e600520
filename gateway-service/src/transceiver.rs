//! The gateway's single transceiver loop (C5, spec §4.5).
//!
//! Exactly one thread owns the radio for its whole lifetime: apply any
//! staged radio config, service a pending discovery sweep if one is
//! queued, listen for a packet, then give the command queue a chance to
//! (re)send. Discovery takes priority over ordinary command traffic: a
//! running discovery owns the radio until it finishes or times out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use telemetry_core::{
    bw_code_to_hz, parse_ack_frame, parse_sensor_frame, CommandQueue, DiscoveryRequest,
    PendingValue, Radio, RadioState,
};
use tracing::{debug, warn};

use crate::dashboard::SensorCollector;
use crate::led::LedSink;

/// Runtime on/off switch for the receive-flash LED (on hardware this
/// would be a SIGUSR1/SIGUSR2-toggled GPIO pin; process signal glue is
/// out of scope here, so this is just the shared flag a future caller
/// flips).
#[derive(Clone)]
pub struct FlashToggle(Arc<AtomicBool>);

impl FlashToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn unix_time_f64() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Lets the operator surface hand a discovery sweep to the transceiver
/// thread and get notified without either side polling the other.
#[derive(Clone)]
pub struct DiscoverySlot(Arc<Mutex<Option<Arc<DiscoveryRequest>>>>);

impl Default for DiscoverySlot {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl DiscoverySlot {
    pub fn request(&self, retries: u32, initial_retry_ms: u64, max_retry_ms: u64, retry_multiplier: f64) -> Arc<DiscoveryRequest> {
        let request = Arc::new(DiscoveryRequest::new(retries, initial_retry_ms, max_retry_ms, retry_multiplier));
        *self.0.lock().unwrap() = Some(request.clone());
        request
    }

    fn take(&self) -> Option<Arc<DiscoveryRequest>> {
        self.0.lock().unwrap().take()
    }
}

/// Applies a staged radio parameter to the physical radio where the
/// `Radio` capability actually has a setter for it. `sf`/`bw`/`txpwr`
/// have no hardware seam in this trait (the physical driver is out of
/// scope) and are accepted as no-ops so the staged value still becomes
/// the new "live" value `RadioState` reports.
fn apply_staged(radio: &mut dyn Radio, name: &str, value: PendingValue) -> Result<(), String> {
    match name {
        "n2gfreq" => radio.set_frequency(value.as_f64()).map_err(|e| e.to_string()),
        "g2nfreq" => Ok(()),
        "sf" => {
            let sf = value.as_i64().unwrap_or(7) as u8;
            radio.set_spreading_factor(sf).map_err(|e| e.to_string())
        }
        "bw" => {
            let code = value.as_i64().unwrap_or(0) as u8;
            let Some(hz) = bw_code_to_hz(code) else {
                return Err(format!("unknown bandwidth code {code}"));
            };
            radio.set_signal_bandwidth(hz).map_err(|e| e.to_string())
        }
        "txpwr" => {
            let dbm = value.as_i64().unwrap_or(14) as i8;
            radio.set_tx_power(dbm).map_err(|e| e.to_string())
        }
        other => {
            warn!(param = other, "unknown staged radio parameter, ignoring");
            Ok(())
        }
    }
}

pub struct GatewayTransceiver {
    radio: Box<dyn Radio>,
    radio_state: Arc<RadioState>,
    command_queue: Arc<CommandQueue>,
    collector: Arc<SensorCollector>,
    discovery: DiscoverySlot,
    led: Box<dyn LedSink>,
    flash_enabled: FlashToggle,
}

impl GatewayTransceiver {
    pub fn new(
        radio: Box<dyn Radio>,
        radio_state: Arc<RadioState>,
        command_queue: Arc<CommandQueue>,
        collector: Arc<SensorCollector>,
        discovery: DiscoverySlot,
        led: Box<dyn LedSink>,
        flash_enabled: FlashToggle,
    ) -> Self {
        Self { radio, radio_state, command_queue, collector, discovery, led, flash_enabled }
    }

    /// Runs until `stop` is set. Intended to be the body of a dedicated thread.
    ///
    /// A tick that panics (spec §4.8 "transceiver loop exception") is
    /// caught rather than taking the process down: the loop logs it,
    /// sleeps ~1s, and resumes on the next tick.
    pub fn run(mut self, stop: Arc<AtomicBool>) {
        if let Err(e) = self.radio.init() {
            warn!(error = %e, "radio init failed, transceiver loop exiting");
            return;
        }

        while !stop.load(Ordering::Relaxed) {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick()));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                warn!(error = %message, "transceiver loop tick panicked, sleeping and resuming");
                std::thread::sleep(Duration::from_secs(1));
            }
        }

        let _ = self.radio.close();
    }

    fn tick(&mut self) {
        if self.radio_state.has_pending() {
            let radio = self.radio.as_mut();
            self.radio_state.apply_pending(|name, value| apply_staged(radio, name, value));
        }

        if let Some(request) = self.discovery.take() {
            self.execute_discovery(&request);
            return;
        }

        match self.radio.receive(Duration::from_millis(100)) {
            Ok(Some(packet)) => self.process_received_packet(&packet),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "radio receive failed"),
        }

        self.process_command_queue();
    }

    fn process_received_packet(&mut self, packet: &[u8]) {
        if self.flash_enabled.is_enabled() {
            self.led.flash();
        }

        if let Ok(ack) = parse_ack_frame(packet) {
            let retired = self.command_queue.ack_received(&ack.command_id, &ack.node_id, ack.payload);
            if retired {
                debug!(target: "cmd", command_id = %ack.command_id, node_id = %ack.node_id, "CMD_ACK_ROUTED");
            } else {
                debug!(target: "cmd", command_id = %ack.command_id, "stale or unknown ACK, dropped");
            }
            return;
        }

        if let Ok((node_id, mut readings)) = parse_sensor_frame(packet) {
            let now = unix_time_f64();
            for r in &mut readings {
                if r.timestamp == 0.0 {
                    r.timestamp = now;
                }
            }
            self.collector.add_readings(&node_id, &readings);
            return;
        }

        let preview_len = packet.len().min(8);
        warn!(bytes = ?&packet[..preview_len], "dropping unrecognized packet");
    }

    fn process_command_queue(&mut self) {
        self.command_queue.check_expired();
        let Some(cmd) = self.command_queue.get_next_to_send() else { return };

        let result = self.send_on_g2n(&cmd.packet);
        match result {
            Ok(()) => self.command_queue.mark_sent(),
            Err(e) => {
                warn!(error = %e, command_id = %cmd.command_id, "failed to send queued command");
                let _ = self.radio.set_frequency(self.radio_state.effective_n2g_freq_mhz());
            }
        }
    }

    /// Hop to G2N, send, hop back to N2G. Always restores N2G, even on error.
    fn send_on_g2n(&mut self, packet: &[u8]) -> Result<(), String> {
        self.radio.set_frequency(self.radio_state.effective_g2n_freq_mhz()).map_err(|e| e.to_string())?;
        let send_result = self.radio.send(packet).map_err(|e| e.to_string());
        let hop_back = self.radio.set_frequency(self.radio_state.effective_n2g_freq_mhz()).map_err(|e| e.to_string());
        send_result.and(hop_back)
    }

    fn execute_discovery(&mut self, request: &DiscoveryRequest) {
        let (packet, command_id) = telemetry_core::build_command_frame("discover", &[], "");
        let mut delay_ms = request.initial_retry_ms;
        let mut discovered = std::collections::HashSet::new();

        let result: Result<(), String> = (|| {
            for _ in 0..request.retries {
                self.send_on_g2n(&packet)?;

                let deadline = Instant::now() + Duration::from_millis(delay_ms);
                while Instant::now() < deadline {
                    match self.radio.receive(Duration::from_millis(100)).map_err(|e| e.to_string())? {
                        Some(packet) => {
                            if let Ok(ack) = parse_ack_frame(&packet) {
                                if ack.command_id == command_id {
                                    discovered.insert(ack.node_id);
                                    continue;
                                }
                            }
                            self.process_received_packet(&packet);
                        }
                        None => {}
                    }
                }

                delay_ms = ((delay_ms as f64) * request.retry_multiplier).min(request.max_retry_ms as f64) as u64;
            }
            Ok(())
        })();

        let _ = self.radio.set_frequency(self.radio_state.effective_n2g_freq_mhz());
        request.finish(discovered.into_iter().collect(), result.err());
    }
}
