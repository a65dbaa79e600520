//! Frame codec (C1): sensor, command and ACK frames, all CRC32-protected.
//!
//! Canonical form is "keys sorted lexicographically, no extraneous
//! whitespace" (spec §4.1). `serde_json::Value`'s `Map` is a `BTreeMap`
//! by default (the `preserve_order` feature is not enabled anywhere in
//! this workspace), so round-tripping a frame through `serde_json::Value`
//! and serializing with `serde_json::to_vec` produces exactly that form
//! without any hand-rolled canonicalization.

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;
use crate::sensor::{sensor_class_id, sensor_class_name, SensorReading};

/// Maximum LoRa payload size for a single on-air frame (spec §3, §6).
pub const LORA_MAX_PAYLOAD: usize = 250;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn crc32_hex(bytes: &[u8]) -> String {
    format!("{:08x}", CRC32.checksum(bytes))
}

/// Serialize `value` (expected to be a JSON object) to its canonical byte
/// form: sorted keys (from `BTreeMap`), no whitespace (serde_json's
/// compact default).
fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("Value serialization cannot fail")
}

/// Append a `c` field holding the CRC32 hex digest of the canonical form
/// of `fields` (which must not itself contain a `c` key).
fn seal(mut fields: Map<String, Value>) -> Vec<u8> {
    let crc = crc32_hex(&canonical_bytes(&Value::Object(fields.clone())));
    fields.insert("c".to_string(), Value::String(crc));
    canonical_bytes(&Value::Object(fields))
}

/// Parse `bytes` as a JSON object, verify its `c` field, and return the
/// remaining fields (with `c` removed) on success.
fn unseal(bytes: &[u8]) -> Result<Map<String, Value>, FrameError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| FrameError::InvalidFormat(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(FrameError::InvalidFormat("frame is not a JSON object".into()));
    };
    let crc_value = map
        .remove("c")
        .ok_or(FrameError::MissingField("c"))?;
    let expected = crc_value
        .as_str()
        .ok_or(FrameError::MissingField("c"))?
        .to_lowercase();
    let computed = crc32_hex(&canonical_bytes(&Value::Object(map.clone())));
    if expected != computed {
        return Err(FrameError::CrcMismatch { expected, computed });
    }
    Ok(map)
}

fn required_str(map: &Map<String, Value>, key: &'static str) -> Result<String, FrameError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(FrameError::MissingField(key))
}

fn required_f64(map: &Map<String, Value>, key: &'static str) -> Result<f64, FrameError> {
    map.get(key)
        .and_then(Value::as_f64)
        .ok_or(FrameError::MissingField(key))
}

// ─── Sensor frame (N2G) ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RawReading {
    s: i32,
    k: String,
    u: String,
    v: Option<f64>,
}

/// Split `readings` into one or more LoRa-sized sensor frames for `node_id`.
///
/// Readings are packed greedily, starting a new packet whenever the next
/// reading would push the canonical encoding past [`LORA_MAX_PAYLOAD`]
/// bytes. Empty input yields no packets.
pub fn build_sensor_frames(node_id: &str, readings: &[SensorReading]) -> Vec<Vec<u8>> {
    if readings.is_empty() {
        return Vec::new();
    }

    let mut packets = Vec::new();
    let mut current: Vec<RawReading> = Vec::new();

    for reading in readings {
        let candidate = RawReading {
            s: sensor_class_id(&reading.sensor_class),
            k: reading.name.clone(),
            u: reading.units.clone(),
            v: reading.rounded_value(),
        };

        let mut trial = current.clone();
        trial.push(candidate.clone());
        if encode_sensor_frame(node_id, &trial).len() > LORA_MAX_PAYLOAD && !current.is_empty() {
            packets.push(encode_sensor_frame(node_id, &current));
            current = vec![candidate];
        } else {
            current = trial;
        }
    }

    if !current.is_empty() {
        packets.push(encode_sensor_frame(node_id, &current));
    }

    packets
}

fn encode_sensor_frame(node_id: &str, readings: &[RawReading]) -> Vec<u8> {
    let mut fields = Map::new();
    fields.insert("n".to_string(), Value::String(node_id.to_string()));
    fields.insert("t".to_string(), serde_json::to_value(0.0).unwrap());
    fields.insert("r".to_string(), serde_json::to_value(readings).unwrap());
    seal(fields)
}

/// Encode readings with an explicit timestamp (used by node broadcast
/// loops; `build_sensor_frames` above stamps `0.0`, which the gateway
/// replaces with its receive time per spec §4.5 step 3).
pub fn build_sensor_frames_at(
    node_id: &str,
    readings: &[SensorReading],
    timestamp: f64,
) -> Vec<Vec<u8>> {
    if readings.is_empty() {
        return Vec::new();
    }
    let mut packets = Vec::new();
    let mut current: Vec<RawReading> = Vec::new();
    let encode = |readings: &[RawReading]| -> Vec<u8> {
        let mut fields = Map::new();
        fields.insert("n".to_string(), Value::String(node_id.to_string()));
        fields.insert("t".to_string(), serde_json::to_value(timestamp).unwrap());
        fields.insert("r".to_string(), serde_json::to_value(readings).unwrap());
        seal(fields)
    };
    for reading in readings {
        let candidate = RawReading {
            s: sensor_class_id(&reading.sensor_class),
            k: reading.name.clone(),
            u: reading.units.clone(),
            v: reading.rounded_value(),
        };
        let mut trial = current.clone();
        trial.push(candidate.clone());
        if encode(&trial).len() > LORA_MAX_PAYLOAD && !current.is_empty() {
            packets.push(encode(&current));
            current = vec![candidate];
        } else {
            current = trial;
        }
    }
    if !current.is_empty() {
        packets.push(encode(&current));
    }
    packets
}

/// Decode a sensor frame, returning the source node id and its readings.
pub fn parse_sensor_frame(bytes: &[u8]) -> Result<(String, Vec<SensorReading>), FrameError> {
    let map = unseal(bytes)?;
    let node_id = required_str(&map, "n")?;
    let timestamp = required_f64(&map, "t")?;
    let raw_readings: Vec<RawReading> = map
        .get("r")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e: serde_json::Error| FrameError::InvalidFormat(e.to_string()))?
        .ok_or(FrameError::MissingField("r"))?;

    let readings = raw_readings
        .into_iter()
        .map(|r| SensorReading {
            name: r.k,
            units: r.u,
            value: r.v,
            sensor_class: sensor_class_name(r.s),
            timestamp,
            precision: 3,
        })
        .collect();

    Ok((node_id, readings))
}

// ─── Command frame (G2N) ────────────────────────────────────────────────

/// Build a command frame and the fresh command id assigned to it.
/// `node_id` empty means broadcast.
pub fn build_command_frame(cmd: &str, args: &[String], node_id: &str) -> (Vec<u8>, String) {
    let id = crate::ids::new_command_id();
    let bytes = encode_command_frame(cmd, args, node_id, &id);
    (bytes, id)
}

fn encode_command_frame(cmd: &str, args: &[String], node_id: &str, id: &str) -> Vec<u8> {
    let mut fields = Map::new();
    fields.insert("n".to_string(), Value::String(node_id.to_string()));
    fields.insert("cmd".to_string(), Value::String(cmd.to_string()));
    fields.insert("a".to_string(), serde_json::to_value(args).unwrap());
    fields.insert("id".to_string(), Value::String(id.to_string()));
    seal(fields)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub node_id: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub command_id: String,
}

pub fn parse_command_frame(bytes: &[u8]) -> Result<CommandFrame, FrameError> {
    let map = unseal(bytes)?;
    let node_id = required_str(&map, "n")?;
    let cmd = required_str(&map, "cmd")?;
    let command_id = required_str(&map, "id")?;
    let args: Vec<String> = map
        .get("a")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e: serde_json::Error| FrameError::InvalidFormat(e.to_string()))?
        .ok_or(FrameError::MissingField("a"))?;
    Ok(CommandFrame { node_id, cmd, args, command_id })
}

// ─── ACK frame (N2G) ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AckFrame {
    pub node_id: String,
    pub command_id: String,
    pub payload: Option<Map<String, Value>>,
}

/// Build an ACK frame. `payload`'s key set is command-specific (spec §3).
pub fn build_ack_frame(
    node_id: &str,
    command_id: &str,
    payload: Option<&Map<String, Value>>,
) -> Vec<u8> {
    let mut fields = Map::new();
    fields.insert("n".to_string(), Value::String(node_id.to_string()));
    fields.insert("id".to_string(), Value::String(command_id.to_string()));
    if let Some(p) = payload {
        fields.insert("p".to_string(), Value::Object(p.clone()));
    }
    seal(fields)
}

pub fn parse_ack_frame(bytes: &[u8]) -> Result<AckFrame, FrameError> {
    let map = unseal(bytes)?;
    let node_id = required_str(&map, "n")?;
    let command_id = required_str(&map, "id")?;
    let payload = match map.get("p") {
        None => None,
        Some(Value::Object(p)) => Some(p.clone()),
        Some(_) => return Err(FrameError::InvalidFormat("p must be an object".into())),
    };
    Ok(AckFrame { node_id, command_id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(name: &str, value: f64, class: &str) -> SensorReading {
        SensorReading::new(name, "units", Some(value), class, 1_700_000_000.0)
    }

    #[test]
    fn sensor_round_trip_single_reading() {
        let readings = vec![reading("Temperature", 72.123456, "BME280TempPressureHumidity")
            .with_precision(3)];
        let packets = build_sensor_frames_at("patio", &readings, 1_700_000_000.0);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].len() <= LORA_MAX_PAYLOAD);

        let (node_id, decoded) = parse_sensor_frame(&packets[0]).unwrap();
        assert_eq!(node_id, "patio");
        assert_eq!(decoded[0].value, Some(72.123));
    }

    #[test]
    fn sensor_frame_splits_when_it_exceeds_payload() {
        let readings: Vec<SensorReading> = (0..20)
            .map(|i| reading(&format!("Sensor{i}"), i as f64, "BME280TempPressureHumidity"))
            .collect();
        let packets = build_sensor_frames_at("patio", &readings, 1.0);
        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.len() <= LORA_MAX_PAYLOAD);
        }
        let total: usize = packets
            .iter()
            .map(|p| parse_sensor_frame(p).unwrap().1.len())
            .sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn empty_readings_yield_no_packets() {
        assert!(build_sensor_frames("patio", &[]).is_empty());
    }

    #[test]
    fn unknown_sensor_class_decodes_synthetic_name() {
        let mut fields = Map::new();
        fields.insert("n".to_string(), Value::String("test".into()));
        fields.insert("t".to_string(), serde_json::json!(1.0));
        fields.insert(
            "r".to_string(),
            serde_json::json!([{"s": 999, "k": "Test", "u": "x", "v": 1.0}]),
        );
        let bytes = seal(fields);
        let (_, readings) = parse_sensor_frame(&bytes).unwrap();
        assert_eq!(readings[0].sensor_class, "unknown_999");
    }

    #[test]
    fn tampered_sensor_frame_fails_crc() {
        let packets =
            build_sensor_frames_at("patio", &[reading("T", 1.0, "ADS1115ADC")], 1.0);
        let mut value: Value = serde_json::from_slice(&packets[0]).unwrap();
        value["n"] = Value::String("tampered".into());
        let tampered = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            parse_sensor_frame(&tampered),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn missing_field_is_rejected() {
        let bytes = br#"{"n":"test"}"#;
        assert!(matches!(
            parse_sensor_frame(bytes),
            Err(FrameError::MissingField(_) | FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn command_frame_round_trip() {
        let (bytes, id) =
            build_command_frame("reboot", &[], "ab01");
        let parsed = parse_command_frame(&bytes).unwrap();
        assert_eq!(parsed.node_id, "ab01");
        assert_eq!(parsed.cmd, "reboot");
        assert_eq!(parsed.command_id, id);
    }

    #[test]
    fn broadcast_command_has_empty_target() {
        let (bytes, _) = build_command_frame("discover", &[], "");
        let parsed = parse_command_frame(&bytes).unwrap();
        assert_eq!(parsed.node_id, "");
    }

    #[test]
    fn ack_frame_round_trip_with_payload() {
        let mut payload = Map::new();
        payload.insert("sf".to_string(), serde_json::json!(10));
        let bytes = build_ack_frame("ab01", "cmd-1", Some(&payload));
        let parsed = parse_ack_frame(&bytes).unwrap();
        assert_eq!(parsed.node_id, "ab01");
        assert_eq!(parsed.command_id, "cmd-1");
        assert_eq!(parsed.payload, Some(payload));
    }

    #[test]
    fn ack_frame_without_payload_round_trips() {
        let bytes = build_ack_frame("ab01", "cmd-1", None);
        let parsed = parse_ack_frame(&bytes).unwrap();
        assert_eq!(parsed.payload, None);
    }
}
