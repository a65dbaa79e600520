//! Node-local sensors (spec §8 Non-goals: real sensor drivers are out of
//! scope). Each of the three known sensor classes gets a trivial mock
//! implementation so the broadcast loop has something real to encode and
//! so the sensor-class registry in `telemetry_core::sensor` has live
//! callers exercising every known id.

use telemetry_core::SensorReading;

pub trait Sensor: Send + Sync {
    fn class_name(&self) -> &'static str;
    fn read(&self, timestamp: f64) -> Vec<SensorReading>;
}

pub struct Bme280 {
    pub temperature_f: f64,
    pub humidity_pct: f64,
    pub pressure_hpa: f64,
}

impl Default for Bme280 {
    fn default() -> Self {
        Self { temperature_f: 72.0, humidity_pct: 45.0, pressure_hpa: 1013.25 }
    }
}

impl Sensor for Bme280 {
    fn class_name(&self) -> &'static str {
        "BME280TempPressureHumidity"
    }

    fn read(&self, timestamp: f64) -> Vec<SensorReading> {
        vec![
            SensorReading::new("Temperature", "F", Some(self.temperature_f), self.class_name(), timestamp),
            SensorReading::new("Humidity", "%", Some(self.humidity_pct), self.class_name(), timestamp),
            SensorReading::new("Pressure", "hPa", Some(self.pressure_hpa), self.class_name(), timestamp)
                .with_precision(2),
        ]
    }
}

pub struct Mma8452 {
    pub x_g: f64,
    pub y_g: f64,
    pub z_g: f64,
}

impl Default for Mma8452 {
    fn default() -> Self {
        Self { x_g: 0.0, y_g: 0.0, z_g: 1.0 }
    }
}

impl Sensor for Mma8452 {
    fn class_name(&self) -> &'static str {
        "MMA8452Accelerometer"
    }

    fn read(&self, timestamp: f64) -> Vec<SensorReading> {
        vec![
            SensorReading::new("AccelX", "g", Some(self.x_g), self.class_name(), timestamp),
            SensorReading::new("AccelY", "g", Some(self.y_g), self.class_name(), timestamp),
            SensorReading::new("AccelZ", "g", Some(self.z_g), self.class_name(), timestamp),
        ]
    }
}

pub struct Ads1115 {
    pub channel_volts: [f64; 4],
}

impl Default for Ads1115 {
    fn default() -> Self {
        Self { channel_volts: [0.0; 4] }
    }
}

impl Sensor for Ads1115 {
    fn class_name(&self) -> &'static str {
        "ADS1115ADC"
    }

    fn read(&self, timestamp: f64) -> Vec<SensorReading> {
        self.channel_volts
            .iter()
            .enumerate()
            .map(|(i, v)| SensorReading::new(format!("A{i}"), "V", Some(*v), self.class_name(), timestamp).with_precision(4))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bme280_reports_three_readings() {
        assert_eq!(Bme280::default().read(0.0).len(), 3);
    }

    #[test]
    fn class_names_match_the_shared_registry() {
        assert_eq!(telemetry_core::sensor_class_id(Bme280::default().class_name()), telemetry_core::sensor_class_id("BME280TempPressureHumidity"));
        assert_ne!(telemetry_core::sensor_class_id(Mma8452::default().class_name()), -1);
        assert_ne!(telemetry_core::sensor_class_id(Ads1115::default().class_name()), -1);
    }
}
