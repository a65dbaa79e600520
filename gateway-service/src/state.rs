//! Shared gateway display/status state (spec §4.5).

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct LastPacketInfo {
    pub timestamp: f64,
    pub node_id: String,
    pub sensor_name: String,
    pub sensor_value: Option<f64>,
    pub sensor_units: String,
}

pub struct GatewayState {
    pub start_time: Instant,
    last_packet: Mutex<Option<LastPacketInfo>>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    pub fn new() -> Self {
        Self { start_time: Instant::now(), last_packet: Mutex::new(None) }
    }

    pub fn update_last_packet(&self, info: LastPacketInfo) {
        *self.last_packet.lock().unwrap() = Some(info);
    }

    pub fn last_packet(&self) -> Option<LastPacketInfo> {
        self.last_packet.lock().unwrap().clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_last_packet() {
        let state = GatewayState::new();
        assert!(state.last_packet().is_none());
    }

    #[test]
    fn update_then_read_round_trips() {
        let state = GatewayState::new();
        state.update_last_packet(LastPacketInfo {
            timestamp: 1.0,
            node_id: "ab01".to_string(),
            sensor_name: "Temperature".to_string(),
            sensor_value: Some(72.0),
            sensor_units: "F".to_string(),
        });
        let info = state.last_packet().unwrap();
        assert_eq!(info.node_id, "ab01");
        assert_eq!(info.sensor_value, Some(72.0));
    }
}
