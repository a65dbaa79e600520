//! Sensor reading type and the sensor-class id registry (spec §3, §4.1, §9).
//!
//! Sensor classes are not discovered by runtime reflection; the registry
//! here is an explicit, alphabetically-sorted table built once at
//! process start, the "builder pattern / generated list" alternative
//! spec.md §9 calls for.

use std::sync::OnceLock;

/// A single sensor reading destined for the wire (spec §3 "Sensor reading").
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: String,
    pub units: String,
    pub value: Option<f64>,
    pub sensor_class: String,
    pub timestamp: f64,
    pub precision: u32,
}

impl SensorReading {
    pub fn new(
        name: impl Into<String>,
        units: impl Into<String>,
        value: Option<f64>,
        sensor_class: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            value,
            sensor_class: sensor_class.into(),
            timestamp,
            precision: 3,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Value rounded to `self.precision` decimals. `None` passes through.
    pub fn rounded_value(&self) -> Option<f64> {
        self.value.map(|v| round_to(v, self.precision))
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Known sensor classes, in the fixed order the registry assigns ids from.
///
/// Adding a sensor class here reassigns every id after it alphabetically —
/// the cross-version compatibility question spec.md §9 leaves open. This
/// implementation does not persist a name→id snapshot (see SPEC_FULL.md
/// Open Questions).
const KNOWN_SENSOR_CLASSES: &[&str] = &[
    "ADS1115ADC",
    "BME280TempPressureHumidity",
    "MMA8452Accelerometer",
];

struct SensorClassRegistry {
    by_name: Vec<(&'static str, i32)>,
}

impl SensorClassRegistry {
    fn build() -> Self {
        let mut names: Vec<&'static str> = KNOWN_SENSOR_CLASSES.to_vec();
        names.sort_unstable();
        let by_name = names
            .into_iter()
            .enumerate()
            .map(|(id, name)| (name, id as i32))
            .collect();
        Self { by_name }
    }

    fn id_of(&self, class_name: &str) -> Option<i32> {
        self.by_name
            .iter()
            .find(|(name, _)| *name == class_name)
            .map(|(_, id)| *id)
    }

    fn name_of(&self, id: i32) -> Option<&'static str> {
        self.by_name
            .iter()
            .find(|(_, candidate)| *candidate == id)
            .map(|(name, _)| *name)
    }
}

fn registry() -> &'static SensorClassRegistry {
    static REGISTRY: OnceLock<SensorClassRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SensorClassRegistry::build)
}

/// Integer id for a known sensor class name, or `-1` if unknown (an
/// unregistered class still gets packed onto the wire, just without a
/// resolvable id).
pub fn sensor_class_id(class_name: &str) -> i32 {
    registry().id_of(class_name).unwrap_or(-1)
}

/// Class name for a wire-encoded id. Unknown ids decode to `unknown_<id>`
/// per spec §3/§4.1.
pub fn sensor_class_name(id: i32) -> String {
    match registry().name_of(id) {
        Some(name) => name.to_string(),
        None => format!("unknown_{id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_assigned_in_alphabetical_order() {
        assert_eq!(sensor_class_id("ADS1115ADC"), 0);
        assert_eq!(sensor_class_id("BME280TempPressureHumidity"), 1);
        assert_eq!(sensor_class_id("MMA8452Accelerometer"), 2);
    }

    #[test]
    fn unknown_class_is_negative_one() {
        assert_eq!(sensor_class_id("NonexistentSensor"), -1);
    }

    #[test]
    fn unknown_id_decodes_to_synthetic_name() {
        assert_eq!(sensor_class_name(999), "unknown_999");
    }

    #[test]
    fn id_and_name_are_inverses() {
        for name in KNOWN_SENSOR_CLASSES {
            let id = sensor_class_id(name);
            assert_ne!(id, -1);
            assert_eq!(sensor_class_name(id), *name);
        }
    }

    #[test]
    fn rounds_value_to_precision() {
        let r = SensorReading::new("Temperature", "F", Some(72.123456789), "x", 0.0)
            .with_precision(3);
        assert_eq!(r.rounded_value(), Some(72.123));
    }

    #[test]
    fn none_value_passes_through() {
        let r = SensorReading::new("Temperature", "F", None, "x", 0.0);
        assert_eq!(r.rounded_value(), None);
    }
}
