//! `Streambird` Constants
//!
//! This module contains the fixed bounds and timing values used throughout the
//! `Streambird` library. Every bounded collection, retry counter and timer in
//! the crate is sized from here.

/// Maximum number of stream control blocks (audio and video endpoints)
pub const MAX_STREAMS: usize = 6;

/// Maximum number of peer stream endpoints tracked from one discovery
pub const MAX_PEER_SEPS: usize = 8;

/// Maximum number of local stream endpoints registered per stream control block
pub const MAX_LOCAL_SEPS: usize = 4;

/// Number of codec indices known to the codec registry (source and sink side)
pub const CODEC_INDEX_MAX: usize = 3;

/// Size in bytes of a codec information element (length byte included)
pub const CODEC_INFO_SIZE: usize = 20;

/// Length in bytes of a content protection information element
pub const CP_INFO_LEN: usize = 3;

/// SCMS-T content protection identifier
pub const CP_SCMS_T_ID: u16 = 0x0002;

/// Number of times a reconfiguration is retried before reporting failure
pub const RECONFIG_RETRY: u8 = 6;

/// Close request guard timeout in milliseconds
pub const CLOSE_REQ_TIME_MS: u32 = 4000;

/// Maximum number of encoded frames produced by one media tick
pub const MAX_PCM_FRAME_NUM_PER_TICK: usize = 14;

/// Capacity of the source transmit queue
pub const MAX_OUTPUT_FRAME_QUEUE_SZ: usize = MAX_PCM_FRAME_NUM_PER_TICK * 2;

/// Capacity of the sink receive queue
pub const MAX_INPUT_FRAME_QUEUE_SZ: usize = MAX_PCM_FRAME_NUM_PER_TICK * 2;

/// Number of queued packets after which the sink starts decoding
pub const MAX_DELAYED_START_FRAME_COUNT: usize = 5;

/// Sink decode tick in milliseconds
pub const SINK_MEDIA_TIME_TICK_MS: u32 = 20;

/// Default source encoder tick in milliseconds
pub const DEFAULT_ENCODER_INTERVAL_MS: u32 = 20;

/// Maximum size of one encoded media frame (before fragmentation)
pub const MAX_MEDIA_FRAME_SIZE: usize = 1024;

/// PCM scratch buffer size used by one encoder read
pub const MAX_PCM_READ_SIZE: usize = 4096;

/// Decoded PCM buffer size produced by one sink tick
pub const MAX_PCM_DECODE_SIZE: usize = 4096;

/// Size of the AVDTP media packet header subtracted from the L2CAP MTU
pub const AVDT_MEDIA_HDR_SIZE: u16 = 12;

/// Default L2CAP MTU assumed before the stream channel reports one
pub const DEFAULT_L2CAP_MTU: u16 = 672;

/// RTP payload type used for media packets
pub const MEDIA_PAYLOAD_TYPE: u8 = 0x60;

/// Depth of the control-plane event channel
pub const CONTROL_CHANNEL_DEPTH: usize = 16;

/// Depth of the media worker command channel
pub const MEDIA_CHANNEL_DEPTH: usize = 8;

/// Media worker commands a session may queue between two drains
pub const MAX_MEDIA_COMMANDS: usize = 16;

/// Depth of the API request and response channels
pub const API_CHANNEL_DEPTH: usize = 4;

/// Maximum number of events raised internally while one event is dispatched
pub const MAX_PENDING_INTERNAL_EVENTS: usize = 8;

/// Maximum number of upward events produced by one dispatch
pub const MAX_OUTBOUND_EVENTS: usize = 8;

/// Deviations at or beyond this multiple of the expected interval are ignored by the
/// scheduling statistics
pub const SCHEDULING_OUTLIER_FACTOR: u64 = 10;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Maximum opaque payload of a security control exchange
pub const MAX_SECURITY_DATA: usize = 16;
