//! Gateway-side parameter registry (C7, spec §4.7).
//!
//! Radio parameters are staged: their setter calls
//! [`RadioState::set_pending`] instead of touching hardware, and only the
//! transceiver loop thread applies them. Command-queue parameters take
//! effect immediately since the queue has no hardware to serialize
//! access to.

use std::sync::Arc;

use serde_json::Value;

use crate::command_queue::{CommandQueue, CommandQueueConfig};
use crate::params::{ParamDef, ValueKind};
use crate::radio_state::{PendingValue, RadioState};

pub use crate::radio_state::{config_key_for, is_staged_param, RADIO_PARAM_CONFIG_KEYS};

/// Build the full set of gateway-exposed parameters. `node_id` backs the
/// read-only `nodeid` entry.
pub fn build_gateway_params(
    radio_state: Arc<RadioState>,
    queue: Arc<CommandQueue>,
    node_id: impl Into<String>,
) -> Vec<ParamDef> {
    let node_id = node_id.into();
    let rs_get = radio_state.clone();
    let rs_set = radio_state.clone();

    let mut params = vec![
        ParamDef::read_write(
            "sf",
            ValueKind::Int,
            Some(7.0),
            Some(12.0),
            {
                let rs = rs_get.clone();
                move || Value::from(rs.effective_sf())
            },
            {
                let rs = rs_set.clone();
                move |v| {
                    rs.set_pending("sf", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        )
        .with_config_key(config_key_for("sf").unwrap()),
        ParamDef::read_write(
            "bw",
            ValueKind::Int,
            Some(0.0),
            Some(2.0),
            {
                let rs = rs_get.clone();
                move || Value::from(rs.effective_bw_code())
            },
            {
                let rs = rs_set.clone();
                move |v| {
                    rs.set_pending("bw", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        )
        .with_config_key(config_key_for("bw").unwrap()),
        ParamDef::read_write(
            "txpwr",
            ValueKind::Int,
            Some(5.0),
            Some(23.0),
            {
                let rs = rs_get.clone();
                move || Value::from(rs.effective_tx_power())
            },
            {
                let rs = rs_set.clone();
                move |v| {
                    rs.set_pending("txpwr", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        )
        .with_config_key(config_key_for("txpwr").unwrap()),
        ParamDef::read_write(
            "n2gfreq",
            ValueKind::Float,
            Some(137.0),
            Some(1020.0),
            {
                let rs = rs_get.clone();
                move || Value::from(rs.effective_n2g_freq_mhz())
            },
            {
                let rs = rs_set.clone();
                move |v| {
                    rs.set_pending("n2gfreq", PendingValue::Float(v));
                    Ok(())
                }
            },
        )
        .with_config_key(config_key_for("n2gfreq").unwrap()),
        ParamDef::read_write(
            "g2nfreq",
            ValueKind::Float,
            Some(137.0),
            Some(1020.0),
            {
                let rs = rs_get.clone();
                move || Value::from(rs.effective_g2n_freq_mhz())
            },
            move |v| {
                rs_set.set_pending("g2nfreq", PendingValue::Float(v));
                Ok(())
            },
        )
        .with_config_key(config_key_for("g2nfreq").unwrap()),
        ParamDef::read_only("nodeid", ValueKind::Int, move || Value::String(node_id.clone())),
    ];

    params.extend(queue_params(queue));
    params
}

fn queue_params(queue: Arc<CommandQueue>) -> Vec<ParamDef> {
    macro_rules! queue_param {
        ($name:literal, $kind:expr, $min:expr, $max:expr, $get:expr, $set:expr) => {{
            let q_get = queue.clone();
            let q_set = queue.clone();
            ParamDef::read_write(
                $name,
                $kind,
                Some($min),
                Some($max),
                move || $get(&q_get.config()),
                move |v| {
                    let mut cfg = q_set.config();
                    $set(&mut cfg, v);
                    q_set.set_config(cfg);
                    Ok(())
                },
            )
        }};
    }

    vec![
        queue_param!(
            "max_queue_size",
            ValueKind::Int,
            1.0,
            1000.0,
            |c: &CommandQueueConfig| Value::from(c.max_size),
            |c: &mut CommandQueueConfig, v: f64| c.max_size = v as usize
        )
        .with_config_key("command_queue.max_size"),
        queue_param!(
            "max_retries",
            ValueKind::Int,
            1.0,
            100.0,
            |c: &CommandQueueConfig| Value::from(c.max_retries),
            |c: &mut CommandQueueConfig, v: f64| c.max_retries = v as u32
        )
        .with_config_key("command_queue.max_retries"),
        queue_param!(
            "initial_retry_ms",
            ValueKind::Int,
            100.0,
            30000.0,
            |c: &CommandQueueConfig| Value::from(c.initial_retry_ms),
            |c: &mut CommandQueueConfig, v: f64| c.initial_retry_ms = v as u64
        )
        .with_config_key("command_queue.initial_retry_ms"),
        queue_param!(
            "retry_multiplier",
            ValueKind::Float,
            1.0,
            5.0,
            |c: &CommandQueueConfig| Value::from(c.retry_multiplier),
            |c: &mut CommandQueueConfig, v: f64| c.retry_multiplier = v
        )
        .with_config_key("command_queue.retry_multiplier"),
        queue_param!(
            "max_retry_ms",
            ValueKind::Int,
            1000.0,
            60000.0,
            |c: &CommandQueueConfig| Value::from(c.max_retry_ms),
            |c: &mut CommandQueueConfig, v: f64| c.max_retry_ms = v as u64
        )
        .with_config_key("command_queue.max_retry_ms"),
        queue_param!(
            "discovery_retries",
            ValueKind::Int,
            1.0,
            200.0,
            |c: &CommandQueueConfig| Value::from(c.discovery_retries),
            |c: &mut CommandQueueConfig, v: f64| c.discovery_retries = v as u32
        )
        .with_config_key("command_queue.discovery_retries"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{param_get, param_set, persistable_values};

    fn setup() -> (Arc<RadioState>, Arc<CommandQueue>) {
        (Arc::new(RadioState::new()), Arc::new(CommandQueue::new(CommandQueueConfig::default())))
    }

    #[test]
    fn staged_setter_does_not_touch_live_state_until_applied() {
        let (rs, queue) = setup();
        let params = build_gateway_params(rs.clone(), queue, "gw01");
        param_set(&params, "sf", "10").unwrap();
        assert_eq!(rs.effective_sf(), 10);
        assert!(rs.has_pending());
    }

    #[test]
    fn queue_param_takes_effect_immediately() {
        let (rs, queue) = setup();
        let params = build_gateway_params(rs, queue.clone(), "gw01");
        param_set(&params, "max_retries", "3").unwrap();
        assert_eq!(queue.config().max_retries, 3);
    }

    #[test]
    fn discovery_retries_param_is_immediate_and_persistable() {
        let (rs, queue) = setup();
        let params = build_gateway_params(rs, queue.clone(), "gw01");
        param_set(&params, "discovery_retries", "12").unwrap();
        assert_eq!(queue.config().discovery_retries, 12);
        let persisted = persistable_values(&params);
        assert!(persisted.iter().any(|(k, v)| k == "command_queue.discovery_retries" && v == &Value::from(12)));
    }

    #[test]
    fn nodeid_is_read_only() {
        let (rs, queue) = setup();
        let params = build_gateway_params(rs, queue, "gw01");
        let v = param_get(&params, "nodeid");
        assert_eq!(v["nodeid"], Value::String("gw01".to_string()));
    }

    #[test]
    fn config_keys_cover_every_staged_param() {
        for name in ["sf", "bw", "txpwr", "n2gfreq", "g2nfreq"] {
            assert!(config_key_for(name).is_some(), "missing config key for {name}");
            assert!(is_staged_param(name));
        }
        assert!(!is_staged_param("max_retries"));
    }
}
