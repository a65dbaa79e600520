//! Optional periodic local sensor reader (spec §8 Non-goals: sensor
//! drivers are out of scope, but the gateway still needs a seam to
//! forward whatever a real driver produces).

use std::sync::Arc;
use std::time::Duration;

use telemetry_core::SensorReading;

use crate::dashboard::SensorCollector;

/// A source of local readings (e.g. a sensor physically attached to the
/// gateway itself, distinct from readings relayed over LoRa).
pub trait LocalSensorSource: Send + Sync {
    fn read(&self) -> Vec<SensorReading>;
}

/// Always returns no readings; used when the gateway has no local sensor configured.
pub struct NoLocalSensors;

impl LocalSensorSource for NoLocalSensors {
    fn read(&self) -> Vec<SensorReading> {
        Vec::new()
    }
}

pub async fn run_local_sensor_loop(
    node_id: String,
    source: Arc<dyn LocalSensorSource>,
    collector: Arc<SensorCollector>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let readings = source.read();
        if !readings.is_empty() {
            collector.add_readings(&node_id, &readings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_local_sensors_reads_empty() {
        assert!(NoLocalSensors.read().is_empty());
    }
}
