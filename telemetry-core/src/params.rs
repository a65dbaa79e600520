//! Shared parameter get/set/list protocol (spec §4.6/§4.7).
//!
//! Both the node and gateway command handlers expose their tunables
//! through the same `{name}` ↔ [`ParamDef`] shape; only how each
//! `ParamDef`'s getter/setter closures reach into live state differs
//! between the two processes (see `gateway_params` for the gateway's
//! staged-radio-parameter variant).

use serde_json::{Map, Value};

use crate::error::ParamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
}

/// Responses are paginated so a single page's canonical JSON never
/// exceeds this many bytes — keeps CRCs (and LoRa airtime) bounded.
pub const MAX_RESPONSE_PAYLOAD: usize = 170;

pub struct ParamDef {
    pub name: String,
    pub value_kind: ValueKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Dotted config-file key `savecfg` persists this parameter's current
    /// value under, if it is persistable at all (spec §4.7 "savecfg walks
    /// the registry"). `None` for entries with nowhere to persist to
    /// (e.g. the read-only `nodeid` identity param).
    pub config_key: Option<String>,
    get: Box<dyn Fn() -> Value + Send + Sync>,
    set: Option<Box<dyn Fn(f64) -> Result<(), String> + Send + Sync>>,
}

impl ParamDef {
    pub fn read_only(name: impl Into<String>, value_kind: ValueKind, get: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self { name: name.into(), value_kind, min: None, max: None, config_key: None, get: Box::new(get), set: None }
    }

    pub fn read_write(
        name: impl Into<String>,
        value_kind: ValueKind,
        min: Option<f64>,
        max: Option<f64>,
        get: impl Fn() -> Value + Send + Sync + 'static,
        set: impl Fn(f64) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), value_kind, min, max, config_key: None, get: Box::new(get), set: Some(Box::new(set)) }
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.set.is_none()
    }

    pub fn current_value(&self) -> Value {
        (self.get)()
    }
}

/// Every persistable `(config_key, current_value)` pair in `params`, in
/// registry order — the `savecfg` contract of spec §4.7.
pub fn persistable_values(params: &[ParamDef]) -> Vec<(String, Value)> {
    params
        .iter()
        .filter_map(|p| p.config_key.clone().map(|key| (key, p.current_value())))
        .collect()
}

fn find<'a>(params: &'a [ParamDef], name: &str) -> Option<&'a ParamDef> {
    params.iter().find(|p| p.name == name)
}

/// `{name: value}` on success, `{"e": "unknown param"}` if `name` isn't registered.
pub fn param_get(params: &[ParamDef], name: &str) -> Value {
    let mut out = Map::new();
    match find(params, name) {
        Some(p) => {
            out.insert(name.to_string(), (p.get)());
        }
        None => {
            out.insert("e".to_string(), Value::String("unknown param".to_string()));
        }
    }
    Value::Object(out)
}

/// Parse, range-check and apply `value_str` to `name`. Never panics on
/// malformed input — every failure mode is a [`ParamError`] the caller
/// can log (the wire protocol has no reliable return channel for setters
/// sent as part of a broadcast).
pub fn param_set(params: &[ParamDef], name: &str, value_str: &str) -> Result<(), ParamError> {
    let p = find(params, name).ok_or_else(|| ParamError::UnknownParam(name.to_string()))?;
    let setter = p.set.as_ref().ok_or_else(|| ParamError::ReadOnly(name.to_string()))?;

    let parsed: f64 = value_str
        .parse()
        .map_err(|_| ParamError::InvalidValue(value_str.to_string()))?;
    if p.value_kind == ValueKind::Int && parsed.fract() != 0.0 {
        return Err(ParamError::InvalidValue(value_str.to_string()));
    }
    if let Some(min) = p.min {
        if parsed < min {
            return Err(ParamError::OutOfRange { min: min.to_string(), max: p.max.map(|m| m.to_string()).unwrap_or_default() });
        }
    }
    if let Some(max) = p.max {
        if parsed > max {
            return Err(ParamError::OutOfRange { min: p.min.map(|m| m.to_string()).unwrap_or_default(), max: max.to_string() });
        }
    }
    setter(parsed).map_err(ParamError::InvalidValue)
}

fn page_fits(candidate: &Map<String, Value>) -> bool {
    let wrapped = serde_json::json!({ "m": 0, "p": candidate });
    serde_json::to_vec(&wrapped).map(|b| b.len()).unwrap_or(usize::MAX) <= MAX_RESPONSE_PAYLOAD
}

/// One page of `{name: value}` starting at `offset` into `params` (sorted
/// by name, matching `get_all`/`get` ordering elsewhere). Returns the
/// page and how many entries it consumed, so the caller can request
/// `offset + consumed` next if `more` came back `1`.
pub fn params_list(params: &[ParamDef], offset: usize) -> (Value, usize) {
    let mut names: Vec<&ParamDef> = params.iter().collect();
    names.sort_by(|a, b| a.name.cmp(&b.name));

    let mut page = Map::new();
    let mut consumed = 0;
    let mut more = false;

    for p in names.iter().skip(offset) {
        let mut trial = page.clone();
        trial.insert(p.name.clone(), (p.get)());
        if !page.is_empty() && !page_fits(&trial) {
            more = true;
            break;
        }
        page = trial;
        consumed += 1;
    }

    let value = serde_json::json!({ "m": if more { 1 } else { 0 }, "p": page });
    (value, consumed)
}

fn cmds_page_fits(candidate: &[String]) -> bool {
    let wrapped = serde_json::json!({ "c": candidate, "m": 0 });
    serde_json::to_vec(&wrapped).map(|b| b.len()).unwrap_or(usize::MAX) <= MAX_RESPONSE_PAYLOAD
}

/// One page of command names, same pagination scheme as [`params_list`].
pub fn cmds_list(names: &[String], offset: usize) -> (Value, usize) {
    let mut sorted = names.to_vec();
    sorted.sort();

    let mut page: Vec<String> = Vec::new();
    let mut consumed = 0;
    let mut more = false;

    for name in sorted.iter().skip(offset) {
        let mut trial = page.clone();
        trial.push(name.clone());
        if !page.is_empty() && !cmds_page_fits(&trial) {
            more = true;
            break;
        }
        page = trial;
        consumed += 1;
    }

    let value = serde_json::json!({ "c": page, "m": if more { 1 } else { 0 } });
    (value, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn counter_param(name: &str, min: f64, max: f64) -> (Arc<AtomicI64>, ParamDef) {
        let value = Arc::new(AtomicI64::new(0));
        let get_value = value.clone();
        let set_value = value.clone();
        let def = ParamDef::read_write(
            name,
            ValueKind::Int,
            Some(min),
            Some(max),
            move || Value::from(get_value.load(Ordering::SeqCst)),
            move |v| {
                set_value.store(v as i64, Ordering::SeqCst);
                Ok(())
            },
        );
        (value, def)
    }

    #[test]
    fn get_unknown_param_returns_error_shape() {
        let params: Vec<ParamDef> = Vec::new();
        let v = param_get(&params, "nope");
        assert_eq!(v, serde_json::json!({"e": "unknown param"}));
    }

    #[test]
    fn set_applies_within_range() {
        let (value, def) = counter_param("sf", 7.0, 12.0);
        let params = vec![def];
        param_set(&params, "sf", "10").unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn set_rejects_out_of_range() {
        let (_, def) = counter_param("sf", 7.0, 12.0);
        let params = vec![def];
        assert!(matches!(param_set(&params, "sf", "99"), Err(ParamError::OutOfRange { .. })));
    }

    #[test]
    fn set_rejects_read_only() {
        let def = ParamDef::read_only("nodeid", ValueKind::Int, || Value::from(1));
        let params = vec![def];
        assert!(matches!(param_set(&params, "nodeid", "2"), Err(ParamError::ReadOnly(_))));
    }

    #[test]
    fn set_rejects_garbage_value() {
        let (_, def) = counter_param("sf", 7.0, 12.0);
        let params = vec![def];
        assert!(matches!(param_set(&params, "sf", "not-a-number"), Err(ParamError::InvalidValue(_))));
    }

    #[test]
    fn list_always_includes_at_least_one_entry_even_if_it_overflows() {
        let huge_name = "x".repeat(500);
        let def = ParamDef::read_only(huge_name.clone(), ValueKind::Int, || Value::from(1));
        let params = vec![def];
        let (page, consumed) = params_list(&params, 0);
        assert_eq!(consumed, 1);
        assert!(page["p"].as_object().unwrap().contains_key(&huge_name));
    }

    #[test]
    fn list_paginates_when_over_budget() {
        let params: Vec<ParamDef> = (0..50)
            .map(|i| ParamDef::read_only(format!("param_{i:02}"), ValueKind::Int, move || Value::from(i)))
            .collect();
        let (first_page, consumed) = params_list(&params, 0);
        assert!(first_page["m"] == 1);
        assert!(consumed < params.len());

        let (second_page, _) = params_list(&params, consumed);
        assert!(!second_page["p"].as_object().unwrap().is_empty());
    }

    #[test]
    fn cmds_list_paginates_same_way() {
        let names: Vec<String> = (0..50).map(|i| format!("command_number_{i:03}")).collect();
        let (page, consumed) = cmds_list(&names, 0);
        assert!(consumed > 0);
        assert!(page["c"].as_array().unwrap().len() == consumed);
    }
}
