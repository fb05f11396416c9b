//! Recording platform doubles shared by the unit tests

use std::vec::Vec;

use crate::avdtp::{AvdtHandle, OutboundSignal, Tsep};
use crate::codec::registry::CodecStatus;
use crate::codec::{CodecError, CodecInfo, PcmFeeding, PeerParams};
use crate::constants::MAX_PCM_READ_SIZE;
use crate::media::{MediaFrame, MediaPacket};
use crate::platform::{
    AppCallbacks, AudioPath, AudioTrack, Decoded, Decoder, Encoder, FrameSink, LinkRole, MediaTransport,
    PcmReader, PcmSource, PeerFeatures, Signaling, TimerId, Timers,
};
use crate::{AckStatus, AudioState, AvStatus, BluetoothAddress, ConnectionState, TransportError};

/// Audio path that records acknowledgements
#[derive(Debug, Default)]
pub struct MockAudioPath {
    pub acks: Vec<AckStatus>,
    pub closed: usize,
}

impl AudioPath for MockAudioPath {
    fn ack(&mut self, status: AckStatus) {
        self.acks.push(status);
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// A media packet as handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub handle: AvdtHandle,
    pub marker: bool,
    pub cp_header: Option<u8>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Create(PcmFeeding),
    Start,
    Pause,
    Delete,
}

/// Media side platform
#[derive(Debug, Default)]
pub struct MockMedia {
    pub now_us: u64,
    pub periodic: Vec<(TimerId, u32)>,
    pub cancelled: Vec<TimerId>,
    pub sent: Vec<SentPacket>,
    pub send_error: Option<TransportError>,
    pub send_attempts: usize,
    pub rssi_requests: usize,
    /// Bytes the PCM source can deliver per read, `None` fills every read
    pub pcm_available: Option<usize>,
    pub track: Vec<TrackEvent>,
    pub written: Vec<u8>,
    pub acks: Vec<AckStatus>,
    pub closed: usize,
}

impl MediaTransport for MockMedia {
    fn send_media(&mut self, handle: AvdtHandle, packet: &MediaPacket<'_>) -> Result<(), TransportError> {
        self.send_attempts += 1;
        if let Some(error) = self.send_error {
            return Err(error);
        }
        self.sent.push(SentPacket {
            handle,
            marker: packet.marker(),
            cp_header: packet.cp_header,
            payload: packet.payload.to_vec(),
        });
        Ok(())
    }

    fn request_rssi(&mut self, _handle: AvdtHandle) {
        self.rssi_requests += 1;
    }
}

impl Timers for MockMedia {
    fn arm_once(&mut self, id: TimerId, ms: u32) {
        self.periodic.push((id, ms));
    }

    fn arm_periodic(&mut self, id: TimerId, ms: u32) {
        self.periodic.push((id, ms));
    }

    fn cancel(&mut self, id: TimerId) {
        self.cancelled.push(id);
    }

    fn now_us(&self) -> u64 {
        self.now_us
    }
}

impl PcmSource for MockMedia {
    fn read_pcm(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pcm_available.unwrap_or(buf.len()).min(buf.len());
        buf[..n].fill(0);
        n
    }
}

impl AudioTrack for MockMedia {
    fn create(&mut self, feeding: &PcmFeeding) {
        self.track.push(TrackEvent::Create(*feeding));
    }

    fn start(&mut self) {
        self.track.push(TrackEvent::Start);
    }

    fn pause(&mut self) {
        self.track.push(TrackEvent::Pause);
    }

    fn delete(&mut self) {
        self.track.push(TrackEvent::Delete);
    }

    fn write(&mut self, pcm: &[u8]) {
        self.written.extend_from_slice(pcm);
    }
}

impl AudioPath for MockMedia {
    fn ack(&mut self, status: AckStatus) {
        self.acks.push(status);
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// Encoder producing `packets_per_tick` packets of `frame_len` bytes
#[derive(Debug)]
pub struct MockEncoder {
    pub packets_per_tick: usize,
    pub frames_per_packet: u8,
    pub frame_len: usize,
    /// PCM bytes read per tick
    pub read_len: usize,
    pub interval_ms: u32,
    pub fail_init: bool,
    pub inits: usize,
    pub resets: usize,
    pub flushes: usize,
    pub ticks: usize,
    pub timestamp: u32,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self {
            packets_per_tick: 1,
            frames_per_packet: 1,
            frame_len: 8,
            read_len: 0,
            interval_ms: 20,
            fail_init: false,
            inits: 0,
            resets: 0,
            flushes: 0,
            ticks: 0,
            timestamp: 0,
        }
    }
}

impl Encoder for MockEncoder {
    fn init(&mut self, _peer: &PeerParams, _config: &CodecInfo) -> Result<(), CodecError> {
        self.inits += 1;
        if self.fail_init {
            return Err(CodecError::InvalidParameters);
        }
        Ok(())
    }

    fn feeding_reset(&mut self) {
        self.resets += 1;
    }

    fn feeding_flush(&mut self) {
        self.flushes += 1;
    }

    fn encoder_interval_ms(&self) -> u32 {
        self.interval_ms
    }

    fn send_frames(&mut self, _now_us: u64, pcm: &mut dyn PcmReader, sink: &mut dyn FrameSink) {
        self.ticks += 1;
        if self.read_len > 0 {
            let mut buf = [0u8; MAX_PCM_READ_SIZE];
            let len = self.read_len.min(buf.len());
            pcm.read(&mut buf[..len]);
        }
        let payload = std::vec![0x5A; self.frame_len];
        for _ in 0..self.packets_per_tick {
            let Some(frame) = MediaFrame::new(self.timestamp, self.frames_per_packet, &payload) else {
                return;
            };
            self.timestamp = self.timestamp.wrapping_add(128 * u32::from(self.frames_per_packet));
            if !sink.enqueue(frame, self.frames_per_packet) {
                return;
            }
        }
    }
}

/// Decoder consuming `frame_len` bytes and producing `PCM_PER_FRAME` bytes per frame
#[derive(Debug)]
pub struct MockDecoder {
    pub frame_len: usize,
    pub frames_per_tick: u8,
    pub decoded: usize,
    /// Fail every frame once this many were decoded
    pub fail_after: Option<usize>,
    pub fail_init: bool,
}

impl MockDecoder {
    pub const PCM_PER_FRAME: usize = 128;
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self {
            frame_len: 4,
            frames_per_tick: 5,
            decoded: 0,
            fail_after: None,
            fail_init: false,
        }
    }
}

impl Decoder for MockDecoder {
    fn init(&mut self, _config: &CodecInfo) -> Result<PcmFeeding, CodecError> {
        if self.fail_init {
            return Err(CodecError::NotSupportedCodecType);
        }
        Ok(PcmFeeding::default())
    }

    fn frames_per_tick(&self, _tick_ms: u32) -> u8 {
        self.frames_per_tick
    }

    fn decode_frame(&mut self, input: &[u8], pcm: &mut [u8]) -> Result<Decoded, CodecError> {
        if self.fail_after.is_some_and(|n| self.decoded >= n) {
            return Err(CodecError::BadLength);
        }
        let consumed = self.frame_len.min(input.len());
        let produced = Self::PCM_PER_FRAME.min(pcm.len());
        pcm[..produced].fill(0x11);
        self.decoded += 1;
        Ok(Decoded { consumed, produced })
    }
}

/// Control plane platform recording everything the core asks for
#[derive(Debug)]
pub struct MockPlatform {
    pub signals: Vec<OutboundSignal>,
    pub discoveries: Vec<(BluetoothAddress, Tsep)>,
    pub connects: Vec<BluetoothAddress>,
    pub disconnects: Vec<BluetoothAddress>,
    pub role: LinkRole,
    pub role_switches: usize,
    pub media_flushes: usize,
    pub features: PeerFeatures,
    pub signal_error: Option<TransportError>,
    pub connect_error: Option<TransportError>,
    pub armed: Vec<(TimerId, u32)>,
    pub cancelled: Vec<TimerId>,
    pub now_us: u64,
    pub connection_states: Vec<(BluetoothAddress, ConnectionState)>,
    pub audio_states: Vec<(BluetoothAddress, AudioState)>,
    pub audio_configs: usize,
    pub sink_configs: Vec<PcmFeeding>,
    pub offload_responses: Vec<AvStatus>,
    pub security: Vec<Vec<u8>>,
    pub delay_reports: Vec<u16>,
    pub acks: Vec<AckStatus>,
    pub closed: usize,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            signals: Vec::new(),
            discoveries: Vec::new(),
            connects: Vec::new(),
            disconnects: Vec::new(),
            role: LinkRole::Central,
            role_switches: 0,
            media_flushes: 0,
            features: PeerFeatures::default(),
            signal_error: None,
            connect_error: None,
            armed: Vec::new(),
            cancelled: Vec::new(),
            now_us: 0,
            connection_states: Vec::new(),
            audio_states: Vec::new(),
            audio_configs: 0,
            sink_configs: Vec::new(),
            offload_responses: Vec::new(),
            security: Vec::new(),
            delay_reports: Vec::new(),
            acks: Vec::new(),
            closed: 0,
        }
    }
}

impl MockPlatform {
    /// The last signal sent, if any
    pub fn last_signal(&self) -> Option<&OutboundSignal> {
        self.signals.last()
    }

    /// Number of signals matching `f`
    pub fn count_signals(&self, f: impl Fn(&OutboundSignal) -> bool) -> usize {
        self.signals.iter().filter(|s| f(s)).count()
    }
}

impl Signaling for MockPlatform {
    fn discover_service(&mut self, peer: BluetoothAddress, remote: Tsep) -> Result<(), TransportError> {
        self.discoveries.push((peer, remote));
        Ok(())
    }

    fn connect_signaling(&mut self, peer: BluetoothAddress) -> Result<(), TransportError> {
        self.connects.push(peer);
        self.connect_error.map_or(Ok(()), Err)
    }

    fn disconnect_signaling(&mut self, peer: BluetoothAddress) -> Result<(), TransportError> {
        self.disconnects.push(peer);
        Ok(())
    }

    fn send_signal(&mut self, _peer: BluetoothAddress, signal: OutboundSignal) -> Result<(), TransportError> {
        if let Some(error) = self.signal_error {
            return Err(error);
        }
        self.signals.push(signal);
        Ok(())
    }

    fn link_role(&self, _peer: BluetoothAddress) -> LinkRole {
        self.role
    }

    fn request_role_switch(&mut self, _peer: BluetoothAddress) -> Result<(), TransportError> {
        self.role_switches += 1;
        Ok(())
    }

    fn flush_media(&mut self, _peer: BluetoothAddress) {
        self.media_flushes += 1;
    }

    fn peer_features(&self, _peer: BluetoothAddress) -> PeerFeatures {
        self.features
    }
}

impl Timers for MockPlatform {
    fn arm_once(&mut self, id: TimerId, ms: u32) {
        self.armed.push((id, ms));
    }

    fn arm_periodic(&mut self, id: TimerId, ms: u32) {
        self.armed.push((id, ms));
    }

    fn cancel(&mut self, id: TimerId) {
        self.cancelled.push(id);
    }

    fn now_us(&self) -> u64 {
        self.now_us
    }
}

impl AppCallbacks for MockPlatform {
    fn connection_state(&mut self, peer: BluetoothAddress, state: ConnectionState) {
        self.connection_states.push((peer, state));
    }

    fn audio_state(&mut self, peer: BluetoothAddress, state: AudioState) {
        self.audio_states.push((peer, state));
    }

    fn audio_config(&mut self, _peer: BluetoothAddress, _status: &CodecStatus) {
        self.audio_configs += 1;
    }

    fn sink_audio_config(&mut self, _peer: BluetoothAddress, feeding: PcmFeeding) {
        self.sink_configs.push(feeding);
    }

    fn offload_start_response(&mut self, _peer: BluetoothAddress, status: AvStatus) {
        self.offload_responses.push(status);
    }

    fn security_indication(&mut self, _peer: BluetoothAddress, data: &[u8]) {
        self.security.push(data.to_vec());
    }

    fn delay_report(&mut self, _peer: BluetoothAddress, delay: u16) {
        self.delay_reports.push(delay);
    }
}

impl AudioPath for MockPlatform {
    fn ack(&mut self, status: AckStatus) {
        self.acks.push(status);
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}
