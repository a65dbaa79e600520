//! The node's single transceiver loop (C5, spec §4.5), the node-side
//! counterpart to the gateway's transceiver: apply staged radio config,
//! listen for commands on G2N, dispatch and ACK them, and broadcast
//! sensor readings on N2G once per `broadcast_interval`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Map;
use telemetry_core::{
    build_ack_frame, build_sensor_frames, bw_code_to_hz, parse_command_frame, CommandDispatcher,
    PendingValue, Radio, RadioState,
};
use tracing::{debug, warn};

use crate::sensors::Sensor;

fn unix_time_f64() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn apply_staged(radio: &mut dyn Radio, name: &str, value: PendingValue) -> Result<(), String> {
    match name {
        "g2nfreq" => radio.set_frequency(value.as_f64()).map_err(|e| e.to_string()),
        "n2gfreq" => Ok(()),
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

pub struct NodeTransceiver {
    node_id: String,
    radio: Box<dyn Radio>,
    radio_state: Arc<RadioState>,
    dispatcher: CommandDispatcher,
    ack_payload: Arc<Mutex<Option<Map<String, serde_json::Value>>>>,
    sensors: Vec<Box<dyn Sensor>>,
    broadcast_interval: Duration,
}

impl NodeTransceiver {
    pub fn new(
        node_id: impl Into<String>,
        radio: Box<dyn Radio>,
        radio_state: Arc<RadioState>,
        dispatcher: CommandDispatcher,
        ack_payload: Arc<Mutex<Option<Map<String, serde_json::Value>>>>,
        sensors: Vec<Box<dyn Sensor>>,
        broadcast_interval: Duration,
    ) -> Self {
        Self { node_id: node_id.into(), radio, radio_state, dispatcher, ack_payload, sensors, broadcast_interval }
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

        let mut next_broadcast = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.tick(&mut next_broadcast)
            }));
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

    fn tick(&mut self, next_broadcast: &mut Instant) {
        if self.radio_state.has_pending() {
            let radio = self.radio.as_mut();
            self.radio_state.apply_pending(|name, value| apply_staged(radio, name, value));
        }

        match self.radio.receive(Duration::from_millis(100)) {
            Ok(Some(packet)) => self.process_received_packet(&packet),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "radio receive failed"),
        }

        if Instant::now() >= *next_broadcast {
            self.broadcast_readings();
            *next_broadcast = Instant::now() + self.broadcast_interval;
        }
    }

    fn process_received_packet(&mut self, packet: &[u8]) {
        let Ok(command) = parse_command_frame(packet) else {
            debug!("dropping packet that isn't a recognized command frame");
            return;
        };

        *self.ack_payload.lock().unwrap() = None;
        let ran = self.dispatcher.dispatch(&command.cmd, &command.args, &command.node_id);
        if !ran {
            debug!(command = %command.cmd, "no handler ran for command");
            return;
        }

        let payload = self.ack_payload.lock().unwrap().take();
        let ack = build_ack_frame(&self.node_id, &command.command_id, payload.as_ref());
        if let Err(e) = self.send_on_n2g(&ack) {
            warn!(error = %e, command_id = %command.command_id, "failed to send ACK");
        }
    }

    fn broadcast_readings(&mut self) {
        let now = unix_time_f64();
        let readings: Vec<_> = self.sensors.iter().flat_map(|s| s.read(now)).collect();
        if readings.is_empty() {
            return;
        }

        for frame in build_sensor_frames(&self.node_id, &readings) {
            if let Err(e) = self.send_on_n2g(&frame) {
                warn!(error = %e, "failed to broadcast sensor frame");
                break;
            }
        }
    }

    /// Hop to N2G, send, hop back to G2N (the node's idle listening frequency).
    fn send_on_n2g(&mut self, packet: &[u8]) -> Result<(), String> {
        self.radio.set_frequency(self.radio_state.effective_n2g_freq_mhz()).map_err(|e| e.to_string())?;
        let send_result = self.radio.send(packet).map_err(|e| e.to_string());
        let hop_back = self.radio.set_frequency(self.radio_state.effective_g2n_freq_mhz()).map_err(|e| e.to_string());
        send_result.and(hop_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Bme280;
    use telemetry_core::{build_command_frame, parse_sensor_frame, CommandScope, MockRadio};

    /// Wraps a `MockRadio` so the test can keep reading `sent` after the
    /// radio itself has been moved into a `Box<dyn Radio>`.
    struct SpyRadio {
        inner: MockRadio,
        sent_log: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Radio for SpyRadio {
        fn init(&mut self) -> Result<(), telemetry_core::RadioError> {
            self.inner.init()
        }
        fn send(&mut self, data: &[u8]) -> Result<(), telemetry_core::RadioError> {
            self.inner.send(data)?;
            self.sent_log.lock().unwrap().push(data.to_vec());
            Ok(())
        }
        fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, telemetry_core::RadioError> {
            self.inner.receive(timeout)
        }
        fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), telemetry_core::RadioError> {
            self.inner.set_frequency(frequency_mhz)
        }
        fn last_rssi(&self) -> Option<i32> {
            self.inner.last_rssi()
        }
        fn close(&mut self) -> Result<(), telemetry_core::RadioError> {
            self.inner.close()
        }
        fn spreading_factor(&self) -> u8 {
            self.inner.spreading_factor()
        }
        fn set_spreading_factor(&mut self, sf: u8) -> Result<(), telemetry_core::RadioError> {
            self.inner.set_spreading_factor(sf)
        }
        fn signal_bandwidth(&self) -> u32 {
            self.inner.signal_bandwidth()
        }
        fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), telemetry_core::RadioError> {
            self.inner.set_signal_bandwidth(bandwidth_hz)
        }
        fn tx_power(&self) -> i8 {
            self.inner.tx_power()
        }
        fn set_tx_power(&mut self, dbm: i8) -> Result<(), telemetry_core::RadioError> {
            self.inner.set_tx_power(dbm)
        }
    }

    fn new_transceiver(
        mut radio: MockRadio,
        dispatcher: CommandDispatcher,
    ) -> (NodeTransceiver, Arc<Mutex<Vec<Vec<u8>>>>, Arc<RadioState>) {
        radio.init().unwrap();
        let sent_log = Arc::new(Mutex::new(Vec::new()));
        let spy = SpyRadio { inner: radio, sent_log: sent_log.clone() };
        let radio_state = Arc::new(RadioState::new());
        let ack_payload = Arc::new(Mutex::new(None));
        let t = NodeTransceiver::new(
            "ab01",
            Box::new(spy),
            radio_state.clone(),
            dispatcher,
            ack_payload,
            vec![Box::new(Bme280::default())],
            Duration::from_secs(60),
        );
        (t, sent_log, radio_state)
    }

    #[test]
    fn command_targeted_at_self_triggers_ack() {
        let mut dispatcher = CommandDispatcher::new("ab01");
        dispatcher.register("ping", CommandScope::Any, Box::new(|_, _| Ok(())));

        let (packet, command_id) = build_command_frame("ping", &[], "ab01");
        let mut radio = MockRadio::new();
        radio.queue_receive(packet);
        let (mut t, sent_log, _radio_state) = new_transceiver(radio, dispatcher);

        let received = t.radio.receive(Duration::from_millis(0)).unwrap().unwrap();
        t.process_received_packet(&received);

        let sent = sent_log.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let ack = telemetry_core::parse_ack_frame(&sent[0]).unwrap();
        assert_eq!(ack.command_id, command_id);
        assert_eq!(ack.node_id, "ab01");
    }

    #[test]
    fn staged_sf_bandwidth_and_tx_power_reach_the_radio() {
        let dispatcher = CommandDispatcher::new("ab01");
        let radio = MockRadio::new();
        let (mut t, _sent_log, radio_state) = new_transceiver(radio, dispatcher);

        radio_state.set_pending("sf", PendingValue::Int(9));
        radio_state.set_pending("bw", PendingValue::Int(2));
        radio_state.set_pending("txpwr", PendingValue::Int(17));

        let mut next_broadcast = Instant::now() + Duration::from_secs(3600);
        t.tick(&mut next_broadcast);

        assert_eq!(t.radio.spreading_factor(), 9);
        assert_eq!(t.radio.signal_bandwidth(), 500_000);
        assert_eq!(t.radio.tx_power(), 17);
        assert!(!radio_state.has_pending());
    }

    #[test]
    fn command_targeted_at_other_node_is_ignored() {
        let mut dispatcher = CommandDispatcher::new("ab01");
        dispatcher.register("ping", CommandScope::Any, Box::new(|_, _| Ok(())));

        let (packet, _id) = build_command_frame("ping", &[], "ab02");
        let mut radio = MockRadio::new();
        radio.queue_receive(packet);
        let (mut t, sent_log, _radio_state) = new_transceiver(radio, dispatcher);

        let received = t.radio.receive(Duration::from_millis(0)).unwrap().unwrap();
        t.process_received_packet(&received);

        assert!(sent_log.lock().unwrap().is_empty());
    }

    #[test]
    fn broadcast_readings_sends_parsable_sensor_frame() {
        let dispatcher = CommandDispatcher::new("ab01");
        let radio = MockRadio::new();
        let (mut t, sent_log, _radio_state) = new_transceiver(radio, dispatcher);

        t.broadcast_readings();

        let sent = sent_log.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let (node_id, readings) = parse_sensor_frame(&sent[0]).unwrap();
        assert_eq!(node_id, "ab01");
        assert_eq!(readings.len(), 3);
    }
}
