//! Gateway configuration file (spec §4.7, §5).
//!
//! Loaded once at startup from a JSON file on disk; `savecfg` (see
//! `telemetry_core::config`) later rewrites the same file in place with
//! whatever radio parameters were staged and applied.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub spreading_factor: u8,
    pub signal_bandwidth: u8,
    pub tx_power: i8,
    pub n2g_frequency_mhz: f64,
    pub g2n_frequency_mhz: f64,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            signal_bandwidth: 0,
            tx_power: 14,
            n2g_frequency_mhz: 915.0,
            g2n_frequency_mhz: 916.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQueueSettings {
    pub max_size: usize,
    pub max_retries: u32,
    pub initial_retry_ms: u64,
    pub max_retry_ms: u64,
    pub retry_multiplier: f64,
    pub discovery_retries: u32,
}

impl Default for CommandQueueSettings {
    fn default() -> Self {
        Self {
            max_size: 128,
            max_retries: 10,
            initial_retry_ms: 500,
            max_retry_ms: 5000,
            retry_multiplier: 1.5,
            discovery_retries: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub node_id: String,
    pub lora: LoraConfig,
    pub command_queue: CommandQueueSettings,
    /// Bind address for the operator command surface, e.g. `127.0.0.1:8088`.
    pub operator_bind: String,
    /// Base URL of an external dashboard to forward readings to. Empty disables forwarding.
    pub dashboard_url: String,
    pub led_flash_on_rx: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: "gateway".to_string(),
            lora: LoraConfig::default(),
            command_queue: CommandQueueSettings::default(),
            operator_bind: "127.0.0.1:8088".to_string(),
            dashboard_url: String::new(),
            led_flash_on_rx: false,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("gateway_config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = GatewayConfig::load_or_default(Path::new("/nonexistent/path/config.json"));
        assert_eq!(cfg.node_id, "gateway");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let dir = std::env::temp_dir().join(format!("gateway-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, br#"{"node_id": "gw-west"}"#).unwrap();

        let cfg = GatewayConfig::load(&path).unwrap();
        assert_eq!(cfg.node_id, "gw-west");
        assert_eq!(cfg.lora.spreading_factor, 7);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
