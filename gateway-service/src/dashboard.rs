//! Forwarding received sensor readings onward (spec §4.5 step 3).
//!
//! The dashboard itself is an external system (Non-goal, spec §8) — this
//! module only owns the sending side. [`LoggingSink`] is always
//! available; [`ReqwestSink`] is used when a `dashboard_url` is
//! configured.

use std::sync::Arc;

use telemetry_core::SensorReading;
use tracing::{info, warn};

use crate::state::{GatewayState, LastPacketInfo};

/// Where forwarded readings go. `forward` is fire-and-forget: a slow or
/// unreachable dashboard must never stall packet reception.
pub trait DashboardSink: Send + Sync {
    fn forward(&self, node_id: &str, readings: &[SensorReading]);
}

pub struct LoggingSink;

impl DashboardSink for LoggingSink {
    fn forward(&self, node_id: &str, readings: &[SensorReading]) {
        for r in readings {
            info!(
                node_id,
                sensor = %r.name,
                class = %r.sensor_class,
                value = ?r.rounded_value(),
                units = %r.units,
                "reading"
            );
        }
    }
}

pub struct ReqwestSink {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[derive(serde::Serialize)]
struct ReadingPayload<'a> {
    node_id: &'a str,
    name: &'a str,
    units: &'a str,
    value: Option<f64>,
    sensor_class: &'a str,
    timestamp: f64,
}

impl DashboardSink for ReqwestSink {
    fn forward(&self, node_id: &str, readings: &[SensorReading]) {
        let client = self.client.clone();
        let url = format!("{}/readings", self.base_url);
        let body: Vec<ReadingPayload> = readings
            .iter()
            .map(|r| ReadingPayload {
                node_id,
                name: &r.name,
                units: &r.units,
                value: r.rounded_value(),
                sensor_class: &r.sensor_class,
                timestamp: r.timestamp,
            })
            .collect();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                warn!(error = %e, url, "failed to forward readings to dashboard");
            }
        });
    }
}

/// Updates [`GatewayState`]'s "last packet" display and forwards every
/// reading through a [`DashboardSink`].
pub struct SensorCollector {
    state: Arc<GatewayState>,
    sink: Box<dyn DashboardSink>,
}

impl SensorCollector {
    pub fn new(state: Arc<GatewayState>, sink: Box<dyn DashboardSink>) -> Self {
        Self { state, sink }
    }

    pub fn add_readings(&self, node_id: &str, readings: &[SensorReading]) {
        if let Some(last) = readings.last() {
            self.state.update_last_packet(LastPacketInfo {
                timestamp: last.timestamp,
                node_id: node_id.to_string(),
                sensor_name: last.name.clone(),
                sensor_value: last.rounded_value(),
                sensor_units: last.units.clone(),
            });
        }
        self.sink.forward(node_id, readings);
    }
}
