//! Shared protocol, queueing and parameter logic for the gateway and node
//! processes: everything that doesn't touch a physical radio directly.

pub mod command_queue;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod gateway_params;
pub mod ids;
pub mod lock;
pub mod params;
pub mod radio;
pub mod radio_state;
pub mod sensor;
pub mod stream;

pub use command_queue::{CommandOutcome, CommandQueue, CommandQueueConfig, DiscoveryRequest, PendingCommand};
pub use dispatcher::{CommandDispatcher, CommandScope};
pub use error::{FrameError, PackError, ParamError, UnpackError};
pub use gateway_params::build_gateway_params;
pub use frame::{
    build_ack_frame, build_command_frame, build_sensor_frames, build_sensor_frames_at,
    parse_ack_frame, parse_command_frame, parse_sensor_frame, AckFrame, CommandFrame,
    LORA_MAX_PAYLOAD,
};
pub use params::{
    cmds_list, param_get, param_set, params_list, persistable_values, ParamDef, ValueKind,
    MAX_RESPONSE_PAYLOAD,
};
pub use radio::{MockRadio, Radio, RadioError};
pub use radio_state::{
    bw_code_to_hz, config_key_for, is_staged_param, PendingValue, RadioState,
    RADIO_PARAM_CONFIG_KEYS,
};
pub use sensor::{sensor_class_id, sensor_class_name, SensorReading};
pub use stream::{
    pack_stream, pack_stream_with_fec, unpack_packet, unpack_stream, unpack_stream_with_fec,
    xor_bytes, PacketAssembler, StreamPacket, DEFAULT_FEC_BLOCK_SIZE, LORA_MAX_PACKET,
    MAX_PAYLOAD_PER_PACKET,
};
