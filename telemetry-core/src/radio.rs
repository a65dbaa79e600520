//! The `Radio` capability seam (spec §6): the one synchronous, blocking
//! boundary between this workspace and the physical transceiver. A real
//! driver (out of scope, per spec.md Non-goals) implements this trait;
//! tests exercise the transceiver loop and command queue against
//! [`MockRadio`] instead.

use std::time::Duration;

/// A half-duplex LoRa radio tuned to one frequency at a time.
///
/// All methods are blocking: the single transceiver loop thread (C5) is
/// the only caller, and it owns the radio exclusively for its lifetime.
pub trait Radio: Send {
    fn init(&mut self) -> Result<(), RadioError>;
    fn send(&mut self, data: &[u8]) -> Result<(), RadioError>;
    /// Blocks for up to `timeout`, returning `None` on timeout with nothing received.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RadioError>;
    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), RadioError>;
    fn last_rssi(&self) -> Option<i32>;
    fn close(&mut self) -> Result<(), RadioError>;

    /// Spreading factor currently programmed into the radio (6-12).
    fn spreading_factor(&self) -> u8;
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError>;

    /// Signal bandwidth in Hz currently programmed into the radio.
    fn signal_bandwidth(&self) -> u32;
    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError>;

    /// Transmit power in dBm currently programmed into the radio.
    fn tx_power(&self) -> i8;
    fn set_tx_power(&mut self, dbm: i8) -> Result<(), RadioError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio not initialized")]
    NotInitialized,
    #[error("radio transport error: {0}")]
    Transport(String),
}

/// A scripted radio double for tests: `send`s are recorded, `receive`s are
/// replayed from a queue in order, frequency hops are recorded too.
pub struct MockRadio {
    pub sent: Vec<Vec<u8>>,
    pub to_receive: std::collections::VecDeque<Vec<u8>>,
    pub frequency_log: Vec<f64>,
    pub current_frequency: f64,
    pub rssi: Option<i32>,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub tx_power: i8,
    initialized: bool,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            to_receive: std::collections::VecDeque::new(),
            frequency_log: Vec::new(),
            current_frequency: 0.0,
            rssi: None,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            tx_power: 14,
            initialized: false,
        }
    }
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet to be returned by the next `receive` call.
    pub fn queue_receive(&mut self, data: Vec<u8>) {
        self.to_receive.push_back(data);
    }
}

impl Radio for MockRadio {
    fn init(&mut self) -> Result<(), RadioError> {
        self.initialized = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        Ok(self.to_receive.pop_front())
    }

    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), RadioError> {
        self.current_frequency = frequency_mhz;
        self.frequency_log.push(frequency_mhz);
        Ok(())
    }

    fn last_rssi(&self) -> Option<i32> {
        self.rssi
    }

    fn close(&mut self) -> Result<(), RadioError> {
        self.initialized = false;
        Ok(())
    }

    fn spreading_factor(&self) -> u8 {
        self.spreading_factor
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), RadioError> {
        self.spreading_factor = sf;
        Ok(())
    }

    fn signal_bandwidth(&self) -> u32 {
        self.bandwidth_hz
    }

    fn set_signal_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError> {
        self.bandwidth_hz = bandwidth_hz;
        Ok(())
    }

    fn tx_power(&self) -> i8 {
        self.tx_power
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<(), RadioError> {
        self.tx_power = dbm;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_sent_packets() {
        let mut radio = MockRadio::new();
        radio.init().unwrap();
        radio.send(b"hello").unwrap();
        assert_eq!(radio.sent, vec![b"hello".to_vec()]);
    }

    #[test]
    fn mock_replays_queued_receives_in_order() {
        let mut radio = MockRadio::new();
        radio.init().unwrap();
        radio.queue_receive(b"first".to_vec());
        radio.queue_receive(b"second".to_vec());
        assert_eq!(radio.receive(Duration::from_millis(0)).unwrap(), Some(b"first".to_vec()));
        assert_eq!(radio.receive(Duration::from_millis(0)).unwrap(), Some(b"second".to_vec()));
        assert_eq!(radio.receive(Duration::from_millis(0)).unwrap(), None);
    }

    #[test]
    fn send_before_init_fails() {
        let mut radio = MockRadio::new();
        assert!(matches!(radio.send(b"x"), Err(RadioError::NotInitialized)));
    }

    #[test]
    fn frequency_hops_are_logged() {
        let mut radio = MockRadio::new();
        radio.init().unwrap();
        radio.set_frequency(915.0).unwrap();
        radio.set_frequency(916.0).unwrap();
        assert_eq!(radio.frequency_log, vec![915.0, 916.0]);
        assert_eq!(radio.current_frequency, 916.0);
    }

    #[test]
    fn sf_bandwidth_and_tx_power_are_settable() {
        let mut radio = MockRadio::new();
        assert_eq!(radio.spreading_factor(), 7);
        assert_eq!(radio.signal_bandwidth(), 125_000);
        assert_eq!(radio.tx_power(), 14);

        radio.set_spreading_factor(10).unwrap();
        radio.set_signal_bandwidth(250_000).unwrap();
        radio.set_tx_power(20).unwrap();

        assert_eq!(radio.spreading_factor(), 10);
        assert_eq!(radio.signal_bandwidth(), 250_000);
        assert_eq!(radio.tx_power(), 20);
    }
}
