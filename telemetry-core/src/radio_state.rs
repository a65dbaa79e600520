//! Staged radio parameters (C3, spec §4.3 / §4.7).
//!
//! HTTP-driven setters never touch the radio directly — they call
//! `set_pending`, and only the transceiver loop thread (the sole owner of
//! the [`crate::radio::Radio`]) calls `apply_pending` against live
//! hardware. `effective_*` getters read the staged value back before it's
//! applied so operators see their change reflected immediately even
//! though the hardware hasn't caught up yet.

use std::collections::HashMap;
use std::sync::Mutex;

/// Maps a staged radio parameter's wire name to its dotted config-file key
/// (shared by the gateway's and node's `savecfg`/`rcfg_radio` handlers).
pub const RADIO_PARAM_CONFIG_KEYS: &[(&str, &str)] = &[
    ("sf", "lora.spreading_factor"),
    ("bw", "lora.signal_bandwidth"),
    ("txpwr", "lora.tx_power"),
    ("n2gfreq", "lora.n2g_frequency_mhz"),
    ("g2nfreq", "lora.g2n_frequency_mhz"),
];

pub fn config_key_for(name: &str) -> Option<&'static str> {
    RADIO_PARAM_CONFIG_KEYS.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

pub fn is_staged_param(name: &str) -> bool {
    RADIO_PARAM_CONFIG_KEYS.iter().any(|(n, _)| *n == name)
}

/// Bandwidth code ↔ Hz mapping used on the wire and in hardware registers.
pub const BW_HZ: [(u8, u32); 3] = [(0, 125_000), (1, 250_000), (2, 500_000)];

pub fn bw_code_to_hz(code: u8) -> Option<u32> {
    BW_HZ.iter().find(|(c, _)| *c == code).map(|(_, hz)| *hz)
}

pub fn bw_hz_to_code(hz: u32) -> Option<u8> {
    BW_HZ.iter().find(|(_, h)| *h == hz).map(|(c, _)| *c)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingValue {
    Int(i64),
    Float(f64),
}

impl PendingValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PendingValue::Int(v) => Some(*v),
            PendingValue::Float(v) => Some(*v as i64),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            PendingValue::Int(v) => *v as f64,
            PendingValue::Float(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveRadioValues {
    spreading_factor: u8,
    bandwidth_code: u8,
    tx_power: i8,
    n2g_freq_mhz: f64,
    g2n_freq_mhz: f64,
}

impl Default for LiveRadioValues {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth_code: 0,
            tx_power: 14,
            n2g_freq_mhz: 915.0,
            g2n_freq_mhz: 916.0,
        }
    }
}

/// Thread-safe holder of the radio's live values plus whatever staged
/// changes are waiting for the transceiver loop to apply.
pub struct RadioState {
    live: Mutex<LiveRadioValues>,
    pending: Mutex<HashMap<String, PendingValue>>,
}

impl Default for RadioState {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioState {
    pub fn new() -> Self {
        Self { live: Mutex::new(LiveRadioValues::default()), pending: Mutex::new(HashMap::new()) }
    }

    pub fn set_pending(&self, name: &str, value: PendingValue) {
        self.pending.lock().unwrap().insert(name.to_string(), value);
    }

    pub fn get_pending(&self, name: &str) -> Option<PendingValue> {
        self.pending.lock().unwrap().get(name).copied()
    }

    pub fn clear_pending(&self, name: &str) {
        self.pending.lock().unwrap().remove(name);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    pub fn all_pending(&self) -> HashMap<String, PendingValue> {
        self.pending.lock().unwrap().clone()
    }

    pub fn clear_all_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Apply every staged value to the (simulated) live state, clearing
    /// each entry only once it has been applied; a value that fails to
    /// apply is left pending so the next pass retries it.
    pub fn apply_pending<F>(&self, mut apply_to_hardware: F) -> Vec<String>
    where
        F: FnMut(&str, PendingValue) -> Result<(), String>,
    {
        let names: Vec<String> = self.pending.lock().unwrap().keys().cloned().collect();
        let mut applied = Vec::new();
        for name in names {
            let Some(value) = self.get_pending(&name) else { continue };
            if apply_to_hardware(&name, value).is_ok() {
                self.apply_to_live(&name, value);
                self.clear_pending(&name);
                applied.push(name);
            }
        }
        applied
    }

    fn apply_to_live(&self, name: &str, value: PendingValue) {
        let mut live = self.live.lock().unwrap();
        match name {
            "sf" => live.spreading_factor = value.as_i64().unwrap_or(7) as u8,
            "bw" => live.bandwidth_code = value.as_i64().unwrap_or(0) as u8,
            "txpwr" => live.tx_power = value.as_i64().unwrap_or(14) as i8,
            "n2gfreq" => live.n2g_freq_mhz = value.as_f64(),
            "g2nfreq" => live.g2n_freq_mhz = value.as_f64(),
            _ => {}
        }
    }

    pub fn effective_sf(&self) -> u8 {
        self.get_pending("sf")
            .and_then(|v| v.as_i64())
            .map(|v| v as u8)
            .unwrap_or_else(|| self.live.lock().unwrap().spreading_factor)
    }

    pub fn effective_bw_code(&self) -> u8 {
        self.get_pending("bw")
            .and_then(|v| v.as_i64())
            .map(|v| v as u8)
            .unwrap_or_else(|| self.live.lock().unwrap().bandwidth_code)
    }

    pub fn effective_tx_power(&self) -> i8 {
        self.get_pending("txpwr")
            .and_then(|v| v.as_i64())
            .map(|v| v as i8)
            .unwrap_or_else(|| self.live.lock().unwrap().tx_power)
    }

    pub fn effective_n2g_freq_mhz(&self) -> f64 {
        self.get_pending("n2gfreq")
            .map(|v| v.as_f64())
            .unwrap_or_else(|| self.live.lock().unwrap().n2g_freq_mhz)
    }

    pub fn effective_g2n_freq_mhz(&self) -> f64 {
        self.get_pending("g2nfreq")
            .map(|v| v.as_f64())
            .unwrap_or_else(|| self.live.lock().unwrap().g2n_freq_mhz)
    }
}
