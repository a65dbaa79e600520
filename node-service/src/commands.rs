//! Built-in node command handlers (spec §4.6), grounded on the node's
//! `params`/`cmds`/`getparam`/`setparam`/`rcfg_radio`/`savecfg` surface.
//!
//! Every handler writes its reply into `ack_payload` instead of
//! returning it directly: the dispatcher's `Fn(&str, &[String]) ->
//! Result<(), String>` shape is scope-routing plumbing shared with
//! gateway-side handlers that don't need to produce a payload at all.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use telemetry_core::{cmds_list, config::update_config_file, param_get, param_set, params_list, CommandDispatcher, CommandScope, ParamDef, RadioState};

pub const BUILTIN_COMMANDS: &[&str] = &["ping", "echo", "getparam", "setparam", "params", "cmds", "rcfg_radio", "savecfg", "discover"];

pub type AckPayload = Arc<Mutex<Option<Map<String, Value>>>>;

fn set_payload(slot: &AckPayload, value: Value) {
    if let Value::Object(map) = value {
        *slot.lock().unwrap() = Some(map);
    }
}

fn error_payload(message: impl Into<String>) -> Value {
    let mut m = Map::new();
    m.insert("e".to_string(), Value::String(message.into()));
    Value::Object(m)
}

fn ok_payload() -> Value {
    let mut m = Map::new();
    m.insert("status".to_string(), Value::String("ok".to_string()));
    Value::Object(m)
}

/// Registers every built-in handler against `dispatcher`. `params` lists
/// the node's parameters (radio settings staged through `radio_state`);
/// `config_path` is where `savecfg` persists them.
pub fn register_builtins(
    dispatcher: &mut CommandDispatcher,
    params: Arc<Vec<ParamDef>>,
    radio_state: Arc<RadioState>,
    config_path: PathBuf,
    ack_payload: AckPayload,
) {
    {
        let slot = ack_payload.clone();
        dispatcher.register("ping", CommandScope::Any, Box::new(move |_, _| {
            set_payload(&slot, ok_payload());
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        dispatcher.register("echo", CommandScope::Any, Box::new(move |_, args| {
            let mut m = Map::new();
            m.insert("echo".to_string(), Value::String(args.join(" ")));
            set_payload(&slot, Value::Object(m));
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        let params = params.clone();
        dispatcher.register("getparam", CommandScope::Any, Box::new(move |_, args| {
            match args.first() {
                Some(name) => set_payload(&slot, param_get(&params, name)),
                None => set_payload(&slot, error_payload("getparam requires a name argument")),
            }
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        let params = params.clone();
        dispatcher.register("setparam", CommandScope::Private, Box::new(move |_, args| {
            match (args.first(), args.get(1)) {
                (Some(name), Some(value)) => match param_set(&params, name, value) {
                    Ok(()) => set_payload(&slot, ok_payload()),
                    Err(e) => set_payload(&slot, error_payload(e.to_string())),
                },
                _ => set_payload(&slot, error_payload("setparam requires name and value arguments")),
            }
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        let params = params.clone();
        dispatcher.register("params", CommandScope::Any, Box::new(move |_, args| {
            let offset = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
            let (value, _) = params_list(&params, offset);
            set_payload(&slot, value);
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        let command_names: Vec<String> = BUILTIN_COMMANDS.iter().map(|s| s.to_string()).collect();
        dispatcher.register("cmds", CommandScope::Any, Box::new(move |_, args| {
            let offset = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
            let (value, _) = cmds_list(&command_names, offset);
            set_payload(&slot, value);
            Ok(())
        }));
    }

    {
        // Takes no arguments (spec §4.6): it promotes whatever has
        // already been staged via `setparam`. The node's own transceiver
        // tick applies pending radio params at the top of every tick
        // (spec §4.5 step 1) regardless of this command, so by the time
        // this handler runs, any staging from an earlier tick is already
        // live. This ACK is fire-and-forget confirmation, not the trigger
        // itself; a reply sent right as the radio retunes may not make it
        // back, which is expected and not treated as a failure.
        let slot = ack_payload.clone();
        dispatcher.register("rcfg_radio", CommandScope::Private, Box::new(move |_, _| {
            set_payload(&slot, ok_payload());
            Ok(())
        }));
    }

    {
        let slot = ack_payload.clone();
        dispatcher.register("savecfg", CommandScope::Private, Box::new(move |_, _| {
            let updates: Vec<(&str, Value)> = telemetry_core::RADIO_PARAM_CONFIG_KEYS
                .iter()
                .map(|(name, key)| {
                    let value = match *name {
                        "sf" => Value::from(radio_state.effective_sf()),
                        "bw" => Value::from(radio_state.effective_bw_code()),
                        "txpwr" => Value::from(radio_state.effective_tx_power()),
                        "n2gfreq" => Value::from(radio_state.effective_n2g_freq_mhz()),
                        "g2nfreq" => Value::from(radio_state.effective_g2n_freq_mhz()),
                        _ => Value::Null,
                    };
                    (*key, value)
                })
                .collect();

            match update_config_file(&config_path, &updates) {
                Ok(()) => set_payload(&slot, ok_payload()),
                Err(e) => set_payload(&slot, error_payload(e.to_string())),
            }
            Ok(())
        }));
    }

    {
        let slot = ack_payload;
        dispatcher.register("discover", CommandScope::Broadcast, Box::new(move |_, _| {
            set_payload(&slot, ok_payload());
            Ok(())
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher_with_builtins(node_id: &str) -> (CommandDispatcher, AckPayload, Arc<RadioState>) {
        let mut dispatcher = CommandDispatcher::new(node_id);
        let radio_state = Arc::new(RadioState::new());
        let params = Arc::new(crate::params::build_node_params(radio_state.clone()));
        let ack = Arc::new(Mutex::new(None));
        let dir = std::env::temp_dir().join(format!("node-service-test-{}-{node_id}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        register_builtins(&mut dispatcher, params, radio_state.clone(), dir.join("config.json"), ack.clone());
        (dispatcher, ack, radio_state)
    }

    #[test]
    fn ping_acks_ok() {
        let (dispatcher, ack, _rs) = dispatcher_with_builtins("ab01");
        assert!(dispatcher.dispatch("ping", &[], ""));
        assert_eq!(ack.lock().unwrap().as_ref().unwrap()["status"], Value::String("ok".to_string()));
    }

    #[test]
    fn echo_reflects_args() {
        let (dispatcher, ack, _rs) = dispatcher_with_builtins("ab01");
        dispatcher.dispatch("echo", &["hello".to_string(), "world".to_string()], "ab01");
        assert_eq!(ack.lock().unwrap().as_ref().unwrap()["echo"], Value::String("hello world".to_string()));
    }

    #[test]
    fn setparam_is_private_scoped() {
        let (dispatcher, ack, rs) = dispatcher_with_builtins("ab01");
        assert!(!dispatcher.dispatch("setparam", &["sf".to_string(), "10".to_string()], ""));
        assert!(dispatcher.dispatch("setparam", &["sf".to_string(), "10".to_string()], "ab01"));
        assert_eq!(rs.effective_sf(), 10);
        assert_eq!(ack.lock().unwrap().as_ref().unwrap()["status"], Value::String("ok".to_string()));
    }

    #[test]
    fn getparam_unknown_param_returns_error_payload() {
        let (dispatcher, ack, _rs) = dispatcher_with_builtins("ab01");
        dispatcher.dispatch("getparam", &["nope".to_string()], "ab01");
        assert!(ack.lock().unwrap().as_ref().unwrap().contains_key("e"));
    }

    #[test]
    fn rcfg_radio_acks_ok_and_is_private_scoped() {
        let (dispatcher, ack, _rs) = dispatcher_with_builtins("ab01");
        assert!(!dispatcher.dispatch("rcfg_radio", &[], ""));
        assert!(dispatcher.dispatch("rcfg_radio", &[], "ab01"));
        assert_eq!(ack.lock().unwrap().as_ref().unwrap()["status"], Value::String("ok".to_string()));
    }

    #[test]
    fn discover_is_broadcast_only() {
        let (dispatcher, _ack, _rs) = dispatcher_with_builtins("ab01");
        assert!(dispatcher.dispatch("discover", &[], ""));
        assert!(!dispatcher.dispatch("discover", &[], "ab01"));
    }
}
