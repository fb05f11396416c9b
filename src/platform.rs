//! Platform seams
//!
//! The core never touches hardware. Signalling and media channels, timers,
//! the PCM producer and consumer, and the codec implementations are supplied
//! by the integrator through the traits below. Methods are synchronous and
//! must not block; anything that completes later is reported back by posting
//! an event with the helpers in [`crate::processor`].

use crate::avdtp::{AvdtHandle, OutboundSignal, Tsep};
use crate::codec::{CodecError, CodecInfo, PcmFeeding, PeerParams};
use crate::codec::registry::CodecStatus;
use crate::media::{MediaFrame, MediaPacket};
use crate::ssm::ScbHandle;
use crate::{AckStatus, AudioState, AvStatus, BluetoothAddress, ConnectionState, TransportError};

/// Our role on the ACL link to a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkRole {
    /// We are central
    Central,
    /// We are peripheral
    Peripheral,
}

/// Remote link features relevant to encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerFeatures {
    /// EDR 2 Mbps packets supported
    pub edr_2mbps: bool,
    /// EDR 3 Mbps packets supported
    pub edr_3mbps: bool,
}

/// Timers armed by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// CLOSE was sent and the peer has not answered yet
    CloseGuard(ScbHandle),
    /// Periodic encode and transmit tick
    MediaTick,
    /// Periodic sink decode tick
    SinkDecode,
}

/// AVDTP signalling channel
pub trait Signaling {
    /// Look up the peer's A2DP service record for an endpoint of type `remote`
    ///
    /// The outcome is reported as an SDP result event.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup cannot be started.
    fn discover_service(&mut self, peer: BluetoothAddress, remote: Tsep) -> Result<(), TransportError>;

    /// Open the signalling channel, reported back as a connect event
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be issued.
    fn connect_signaling(&mut self, peer: BluetoothAddress) -> Result<(), TransportError>;

    /// Close the signalling channel, reported back as a disconnect event
    ///
    /// # Errors
    ///
    /// Returns an error if there is no channel.
    fn disconnect_signaling(&mut self, peer: BluetoothAddress) -> Result<(), TransportError>;

    /// Encode and send a signalling request or response
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be queued.
    fn send_signal(&mut self, peer: BluetoothAddress, signal: OutboundSignal) -> Result<(), TransportError>;

    /// Current role on the link to `peer`
    fn link_role(&self, peer: BluetoothAddress) -> LinkRole;

    /// Ask the controller to make us central, reported back as a role change
    ///
    /// # Errors
    ///
    /// Returns an error if the switch cannot be requested.
    fn request_role_switch(&mut self, peer: BluetoothAddress) -> Result<(), TransportError>;

    /// Drop media packets still queued towards `peer`
    fn flush_media(&mut self, _peer: BluetoothAddress) {}

    /// Remote link features
    fn peer_features(&self, _peer: BluetoothAddress) -> PeerFeatures {
        PeerFeatures::default()
    }
}

/// Timer service
///
/// Expirations are delivered with [`crate::processor::post_timer_expired`].
pub trait Timers {
    /// Arm a one-shot timer, replacing a pending one with the same id
    fn arm_once(&mut self, id: TimerId, ms: u32);

    /// Arm a periodic timer, replacing a pending one with the same id
    fn arm_periodic(&mut self, id: TimerId, ms: u32);

    /// Cancel a timer, no-op if not armed
    fn cancel(&mut self, id: TimerId);

    /// Monotonic time in microseconds
    fn now_us(&self) -> u64;
}

/// Upward notifications to the application
pub trait AppCallbacks {
    /// Connection state of a peer changed
    fn connection_state(&mut self, peer: BluetoothAddress, state: ConnectionState);

    /// Audio state of a peer changed
    fn audio_state(&mut self, peer: BluetoothAddress, state: AudioState);

    /// Current and selectable source codecs changed
    fn audio_config(&mut self, peer: BluetoothAddress, status: &CodecStatus);

    /// The peer source configured our sink
    fn sink_audio_config(&mut self, _peer: BluetoothAddress, _feeding: PcmFeeding) {}

    /// Result of an offload start request
    fn offload_start_response(&mut self, peer: BluetoothAddress, status: AvStatus);

    /// Content protection control data from the peer
    fn security_indication(&mut self, _peer: BluetoothAddress, _data: &[u8]) {}

    /// Delay reported by the peer sink, in 1/10 ms
    fn delay_report(&mut self, _peer: BluetoothAddress, _delay: u16) {}
}

/// Control side of the audio path
pub trait AudioPath {
    /// Acknowledge the last audio control command
    fn ack(&mut self, status: AckStatus);

    /// Close the PCM data path
    fn close(&mut self) {}
}

/// Everything the control plane needs from the platform
pub trait ControlPlatform: Signaling + Timers + AppCallbacks + AudioPath {}

impl<T: Signaling + Timers + AppCallbacks + AudioPath> ControlPlatform for T {}

/// Media channel of an open stream
pub trait MediaTransport {
    /// Send one media packet
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refused the packet.
    fn send_media(&mut self, handle: AvdtHandle, packet: &MediaPacket<'_>) -> Result<(), TransportError>;

    /// Read the link RSSI for diagnostics
    fn request_rssi(&mut self, _handle: AvdtHandle) {}
}

/// Producer of PCM to encode
pub trait PcmSource {
    /// Fill `buf`, returning the number of bytes read, which may be short
    fn read_pcm(&mut self, buf: &mut [u8]) -> usize;
}

/// Consumer of decoded PCM
pub trait AudioTrack {
    /// Create the output for a new format
    fn create(&mut self, feeding: &PcmFeeding);

    /// Resume playback
    fn start(&mut self);

    /// Pause playback
    fn pause(&mut self);

    /// Release the output
    fn delete(&mut self);

    /// Play decoded PCM
    fn write(&mut self, pcm: &[u8]);
}

/// Everything the media worker needs from the platform
pub trait MediaPlatform: MediaTransport + Timers + PcmSource + AudioTrack + AudioPath {}

impl<T: MediaTransport + Timers + PcmSource + AudioTrack + AudioPath> MediaPlatform for T {}

/// PCM reader handed to an encoder for one tick
pub trait PcmReader {
    /// Fill `buf`, returning the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Destination of encoded frames for one tick
pub trait FrameSink {
    /// Queue an encoded packet carrying `frames_n` codec frames
    ///
    /// Returns `false` if the packet was discarded and encoding should stop
    /// for this tick.
    fn enqueue(&mut self, frame: MediaFrame, frames_n: u8) -> bool;
}

/// Encoder plugin driven by the media tick
pub trait Encoder {
    /// Prepare for a new configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be encoded.
    fn init(&mut self, peer: &PeerParams, config: &CodecInfo) -> Result<(), CodecError>;

    /// Forget buffered PCM and restart the feeding clock
    fn feeding_reset(&mut self);

    /// Drop buffered PCM
    fn feeding_flush(&mut self);

    /// The PCM format delivered by the audio path changed
    fn update_feeding(&mut self, _feeding: &PcmFeeding) {}

    /// Tick period in milliseconds
    fn encoder_interval_ms(&self) -> u32;

    /// Current transmit queue length, for adaptive bitrate encoders
    fn set_transmit_queue_length(&mut self, _len: usize) {}

    /// Read the PCM due at `now_us`, encode it and queue the packets
    fn send_frames(&mut self, now_us: u64, pcm: &mut dyn PcmReader, sink: &mut dyn FrameSink);
}

/// Result of decoding one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Decoded {
    /// Input bytes consumed
    pub consumed: usize,
    /// PCM bytes produced
    pub produced: usize,
}

/// Decoder plugin driven by the sink tick
pub trait Decoder {
    /// Prepare for a new configuration and return the PCM format it produces
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be decoded.
    fn init(&mut self, config: &CodecInfo) -> Result<PcmFeeding, CodecError>;

    /// Frames to decode per tick of `tick_ms`
    fn frames_per_tick(&self, tick_ms: u32) -> u8;

    /// Decode the frame at the start of `input` into `pcm`
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is corrupt.
    fn decode_frame(&mut self, input: &[u8], pcm: &mut [u8]) -> Result<Decoded, CodecError>;
}
