//! Error taxonomy for the wire protocol and stream codec (spec §4, §7).

use thiserror::Error;

/// Failures decoding a sensor/command/ACK frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("CRC mismatch: expected {expected}, computed {computed}")]
    CrcMismatch { expected: String, computed: String },
}

/// Failures packing a byte payload into stream packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("cannot pack empty data")]
    PackEmpty,

    #[error("data too large: {0} bytes (max 4GB)")]
    PackTooLarge(u64),

    #[error("too many packets: {0} (max 65535)")]
    PackTooMany(u32),
}

/// Failures validating or reassembling stream packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
    #[error("packet too small: {0} bytes")]
    ShortPacket(usize),

    #[error("bad magic: {0:#06x}")]
    BadMagic(u16),

    #[error("CRC16 mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Crc16Fail { expected: u16, computed: u16 },

    #[error("CRC32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    Crc32Fail { expected: u32, computed: u32 },

    #[error("inconsistent total_len or count across packets")]
    SizeMismatch,

    #[error("duplicate sequence number {0}")]
    Duplicate(u16),

    #[error("missing packets: {0:?}")]
    Missing(Vec<u16>),
}

/// Errors surfaced by the parameter get/set protocol (C6/C7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("unknown param: {0}")]
    UnknownParam(String),

    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("out of range: {min:?}..{max:?}")]
    OutOfRange { min: String, max: String },
}
