//! Media worker
//!
//! The media worker owns the transmit pipeline of an audio source and the
//! receive pipeline of an audio sink. It runs in its own context and is driven
//! only by [`MediaCommand`]s and inbound sink packets, so neither pipeline is
//! ever touched by the control plane directly.
//!
//! The functions [`on_started`], [`on_stopped`] and [`on_suspended`] run on the
//! control plane: they acknowledge audio path commands and translate stream
//! events into worker commands.

pub mod fragment;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stats;

use heapless::Vec;

use crate::avdtp::AvdtHandle;
use crate::codec::{CodecInfo, PcmFeeding, PeerParams};
use crate::constants::{
    DEFAULT_ENCODER_INTERVAL_MS, MAX_DELAYED_START_FRAME_COUNT, MAX_INPUT_FRAME_QUEUE_SZ,
    MAX_MEDIA_FRAME_SIZE, MAX_OUTPUT_FRAME_QUEUE_SZ, SINK_MEDIA_TIME_TICK_MS,
};
use crate::platform::{AudioPath, Decoder, Encoder, MediaPlatform};
use crate::{AckStatus, AvStatus};

pub use fragment::MediaPacket;
pub use queue::MediaFrame;
pub use sink::MediaSink;
pub use source::MediaSource;

/// Lifecycle of a media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineState {
    /// Not running
    Off,
    /// Startup requested
    StartingUp,
    /// Accepting commands
    Running,
    /// Shutdown requested
    ShuttingDown,
}

/// Options for the transmit pipeline
///
/// # Examples
///
/// ```rust
/// use streambird::MediaSourceOptions;
///
/// // Keep at most 10 encoded packets queued
/// let options = MediaSourceOptions {
///     max_tx_queue_len: 10,
///     ..MediaSourceOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MediaSourceOptions {
    /// Transmit queue bound, clamped to `MAX_OUTPUT_FRAME_QUEUE_SZ`
    pub max_tx_queue_len: usize,
    /// Tick period used until an encoder reports its own
    pub default_encoder_interval_ms: u32,
}

impl Default for MediaSourceOptions {
    fn default() -> Self {
        Self {
            max_tx_queue_len: MAX_OUTPUT_FRAME_QUEUE_SZ,
            default_encoder_interval_ms: DEFAULT_ENCODER_INTERVAL_MS,
        }
    }
}

/// Options for the receive pipeline
#[derive(Debug, Clone, Copy)]
pub struct MediaSinkOptions {
    /// Receive queue bound, clamped to `MAX_INPUT_FRAME_QUEUE_SZ`
    pub max_rx_queue_len: usize,
    /// Decode tick period
    pub tick_ms: u32,
    /// Queued packets needed before decoding starts
    pub delayed_start_frames: usize,
}

impl Default for MediaSinkOptions {
    fn default() -> Self {
        Self {
            max_rx_queue_len: MAX_INPUT_FRAME_QUEUE_SZ,
            tick_ms: SINK_MEDIA_TIME_TICK_MS,
            delayed_start_frames: MAX_DELAYED_START_FRAME_COUNT,
        }
    }
}

/// Immutable view of the stream an encoder runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaSnapshot {
    /// Resolved codec configuration
    pub config: CodecInfo,
    /// Encoder link parameters
    pub peer_params: PeerParams,
    /// Local endpoint the media channel belongs to
    pub avdt_handle: AvdtHandle,
    /// Payload bytes per media packet
    pub mtu: u16,
    /// SCMS-T header byte, `None` when content protection is off
    pub cp_header: Option<u8>,
}

/// Audio focus of the sink output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FocusState {
    /// Output muted, received audio is dropped
    NotGranted,
    /// Output may play
    Granted,
}

/// Commands processed by the media worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaCommand {
    /// Bring both pipelines up
    Startup,
    /// Tear both pipelines down
    Shutdown,
    /// Start the encode tick
    TxStart,
    /// Stop the encode tick and close the audio path
    TxStop,
    /// Drop queued packets and buffered PCM
    TxFlush,
    /// Discard outgoing packets while set
    SetTxFlush(bool),
    /// Configure the encoder
    EncoderInit(MediaSnapshot),
    /// Reconfigure the encoder after a user codec change
    EncoderUserConfigUpdate(MediaSnapshot),
    /// The audio path changed its PCM format
    AudioFeedingUpdate(PcmFeeding),
    /// The media channel congestion state changed
    CongestionChanged(bool),
    /// Encode tick expired
    Tick,
    /// Decode tick expired
    SinkTick,
    /// Configure the decoder and create the audio track
    DecoderUpdate(CodecInfo),
    /// Release the audio track
    ClearTrack,
    /// Change the sink audio focus
    SetFocus(FocusState),
    /// Drop queued received packets
    RxFlush,
    /// Discard received packets while set
    SetRxFlush(bool),
    /// Stop decoding after a stop or suspend
    SinkStop,
}

/// Raw received media packet, as handed over by the transport
pub type SinkPayload = Vec<u8, MAX_MEDIA_FRAME_SIZE>;

/// Start event as seen by the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartResult {
    /// Outcome
    pub status: AvStatus,
    /// We sent the START
    pub initiator: bool,
    /// The stream is going to be suspended right away
    pub suspending: bool,
}

/// Stop or suspend event as seen by the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StopResult {
    /// Outcome
    pub status: AvStatus,
    /// We sent the SUSPEND or stop
    pub initiator: bool,
}

/// What [`on_started`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartAck {
    /// A pending start command was acknowledged
    pub acked: bool,
    /// The encoder must be configured before the audio path starts
    pub setup_codec: bool,
}

/// Acknowledge a pending start
///
/// `None` acknowledges a local start that needed no signalling.
pub fn on_started(start: Option<&StartResult>, pending_start: bool, audio: &mut impl AudioPath) -> StartAck {
    let Some(start) = start else {
        audio.ack(AckStatus::Success);
        return StartAck {
            acked: true,
            setup_codec: false,
        };
    };

    let mut result = StartAck::default();
    if start.status.is_success() {
        if !start.suspending {
            if start.initiator {
                if pending_start {
                    audio.ack(AckStatus::Success);
                    result.acked = true;
                }
            } else {
                result.setup_codec = true;
            }
        }
    } else if pending_start {
        audio.ack(AckStatus::Failure);
        result.acked = true;
    }
    result
}

/// Commands for a stream stop
///
/// A failed stop only acknowledges the failure to the audio path when we
/// initiated it; the pipeline keeps running.
pub fn on_stopped(stop: Option<&StopResult>, audio: &mut impl AudioPath) -> Vec<MediaCommand, 3> {
    let mut commands = Vec::new();
    if let Some(stop) = stop
        && !stop.status.is_success()
    {
        warn!("[MEDIA] stop failed: {}", stop.status);
        if stop.initiator {
            audio.ack(AckStatus::Failure);
        }
        return commands;
    }
    commands.push(MediaCommand::SetTxFlush(true)).ok();
    commands.push(MediaCommand::TxFlush).ok();
    commands.push(MediaCommand::TxStop).ok();
    commands
}

/// Commands for a stream suspend
///
/// The transmit tick stops even if the suspend failed.
pub fn on_suspended(suspend: &StopResult, audio: &mut impl AudioPath) -> Vec<MediaCommand, 2> {
    if !suspend.status.is_success() && suspend.initiator {
        warn!("[MEDIA] suspend failed: {}", suspend.status);
        audio.ack(AckStatus::Failure);
    }
    let mut commands = Vec::new();
    commands.push(MediaCommand::SetTxFlush(true)).ok();
    commands.push(MediaCommand::TxStop).ok();
    commands
}

/// Transmit and receive pipelines driven by one command stream
pub struct MediaWorker<E, D> {
    source: MediaSource<E>,
    sink: MediaSink<D>,
}

impl<E: Encoder, D: Decoder> MediaWorker<E, D> {
    /// Create a worker with both pipelines off
    pub fn new(encoder: E, decoder: D, source: MediaSourceOptions, sink: MediaSinkOptions) -> Self {
        Self {
            source: MediaSource::new(encoder, source),
            sink: MediaSink::new(decoder, sink),
        }
    }

    /// Transmit pipeline
    pub const fn source(&self) -> &MediaSource<E> {
        &self.source
    }

    /// Transmit pipeline, mutably
    pub fn source_mut(&mut self) -> &mut MediaSource<E> {
        &mut self.source
    }

    /// Receive pipeline
    pub const fn sink(&self) -> &MediaSink<D> {
        &self.sink
    }

    /// Process one command
    pub fn handle<P: MediaPlatform>(&mut self, command: MediaCommand, platform: &mut P) {
        trace!("[MEDIA] command {}", command);
        match command {
            MediaCommand::Startup => {
                self.source.startup();
                self.sink.startup();
            }
            MediaCommand::Shutdown => {
                self.source.shutdown(platform);
                self.sink.shutdown(platform);
            }
            MediaCommand::TxStart => self.source.tx_start(platform),
            MediaCommand::TxStop => self.source.tx_stop(platform),
            MediaCommand::TxFlush => self.source.tx_flush(platform.now_us()),
            MediaCommand::SetTxFlush(enable) => self.source.set_tx_flush(enable),
            MediaCommand::EncoderInit(snapshot) | MediaCommand::EncoderUserConfigUpdate(snapshot) => {
                self.source.encoder_init(&snapshot);
            }
            MediaCommand::AudioFeedingUpdate(feeding) => self.source.update_feeding(&feeding),
            MediaCommand::CongestionChanged(congested) => self.source.set_congested(congested, platform),
            MediaCommand::Tick => self.source.tick(platform),
            MediaCommand::SinkTick => self.sink.tick(platform),
            MediaCommand::DecoderUpdate(config) => self.sink.decoder_update(&config, platform),
            MediaCommand::ClearTrack => self.sink.clear_track(platform),
            MediaCommand::SetFocus(focus) => self.sink.set_focus(focus),
            MediaCommand::RxFlush => self.sink.rx_flush(),
            MediaCommand::SetRxFlush(enable) => self.sink.set_rx_flush(enable),
            MediaCommand::SinkStop => self.sink.stop_decoding(platform),
        }
    }

    /// Queue one received media packet for decoding
    pub fn handle_sink_data<P: MediaPlatform>(&mut self, payload: SinkPayload, platform: &mut P) {
        self.sink.enqueue(payload, platform);
    }
}
