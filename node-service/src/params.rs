//! Node-local parameter registry: the radio settings `rcfg_radio` and
//! `setparam` operate on, staged the same way the gateway stages them
//! (C3/C7), applied by this process's own transceiver loop instead of a
//! command queue.

use std::sync::Arc;

use serde_json::Value;

use telemetry_core::{ParamDef, PendingValue, RadioState, ValueKind};

pub fn build_node_params(radio_state: Arc<RadioState>) -> Vec<ParamDef> {
    let rs = radio_state;
    vec![
        ParamDef::read_write(
            "sf",
            ValueKind::Int,
            Some(7.0),
            Some(12.0),
            {
                let rs = rs.clone();
                move || Value::from(rs.effective_sf())
            },
            {
                let rs = rs.clone();
                move |v| {
                    rs.set_pending("sf", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        ),
        ParamDef::read_write(
            "bw",
            ValueKind::Int,
            Some(0.0),
            Some(2.0),
            {
                let rs = rs.clone();
                move || Value::from(rs.effective_bw_code())
            },
            {
                let rs = rs.clone();
                move |v| {
                    rs.set_pending("bw", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        ),
        ParamDef::read_write(
            "txpwr",
            ValueKind::Int,
            Some(5.0),
            Some(23.0),
            {
                let rs = rs.clone();
                move || Value::from(rs.effective_tx_power())
            },
            {
                let rs = rs.clone();
                move |v| {
                    rs.set_pending("txpwr", PendingValue::Int(v as i64));
                    Ok(())
                }
            },
        ),
        ParamDef::read_write(
            "n2gfreq",
            ValueKind::Float,
            Some(137.0),
            Some(1020.0),
            {
                let rs = rs.clone();
                move || Value::from(rs.effective_n2g_freq_mhz())
            },
            {
                let rs = rs.clone();
                move |v| {
                    rs.set_pending("n2gfreq", PendingValue::Float(v));
                    Ok(())
                }
            },
        ),
        ParamDef::read_write(
            "g2nfreq",
            ValueKind::Float,
            Some(137.0),
            Some(1020.0),
            {
                let rs = rs.clone();
                move || Value::from(rs.effective_g2n_freq_mhz())
            },
            move |v| {
                rs.set_pending("g2nfreq", PendingValue::Float(v));
                Ok(())
            },
        ),
    ]
}
