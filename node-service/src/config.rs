//! Node configuration file (spec §4.6/§4.7).

use std::path::PathBuf;

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
pub struct NodeConfig {
    pub node_id: String,
    pub lora: LoraConfig,
    pub broadcast_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { node_id: "ab01".to_string(), lora: LoraConfig::default(), broadcast_interval_secs: 60 }
    }
}

impl NodeConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_or_default(path: &std::path::Path) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("node_config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = NodeConfig::load_or_default(std::path::Path::new("/nonexistent/node.json"));
        assert_eq!(cfg.node_id, "ab01");
    }
}
