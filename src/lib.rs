#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[macro_use]
mod fmt;

mod address;
pub mod api;
pub mod avdtp;
pub mod codec;
pub mod constants;
pub mod media;
pub mod negotiator;
pub mod platform;
pub mod processor;
pub mod session;
pub mod ssm;

#[cfg(test)]
mod testing;

use crate::avdtp::{ErrorCode, SecurityData};
use crate::constants::API_CHANNEL_DEPTH;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub use address::BluetoothAddress;
pub use avdtp::Tsep;
pub use codec::registry::CodecStatus;
pub use codec::{ChannelMode, CodecIndex, CodecInfo, CodecUserConfig, PcmFeeding};
pub use media::{FocusState, MediaSinkOptions, MediaSourceOptions};
pub use negotiator::CopyProtection;
pub use session::{SessionSnapshot, SessionState};
pub use ssm::{ScbHandle, ScbState};

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, API_CHANNEL_DEPTH> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, API_CHANNEL_DEPTH> =
    Channel::new();

/// Status reported upward with stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvStatus {
    /// Operation succeeded
    Success,
    /// Generic failure
    Fail,
    /// Failed because the link role could not be changed
    FailRole,
    /// Service discovery failed
    FailSdp,
    /// Stream could not be established or was lost
    FailStream,
    /// No resources for the operation
    FailResources,
}

impl AvStatus {
    /// Whether this is [`AvStatus::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A2DP errors returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvError {
    /// Request is not valid in the current state
    InvalidState,
    /// No peer is connected
    NoPeer,
    /// No usable codec configuration
    NoCodec,
    /// A bounded queue or table is full
    QueueFull,
    /// Platform transport failure
    Transport(TransportError),
    /// The control task answered with a response of the wrong kind
    UnexpectedResponse,
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
}

impl From<TransportError> for AvError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

/// Errors returned by platform transport implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No signalling or media channel to the peer
    NotConnected,
    /// Channel is congested, try again later
    Busy,
    /// The lower layer rejected the request
    Rejected,
}

/// Connection state reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Stream configured and open
    Connected,
    /// Disconnection in progress
    Disconnecting,
}

/// Audio state reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioState {
    /// The peer suspended the stream
    RemoteSuspend,
    /// Streaming stopped
    Stopped,
    /// Streaming
    Started,
}

/// Acknowledgement returned to the audio path for a control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckStatus {
    /// Command completed
    Success,
    /// Command failed
    Failure,
    /// Command accepted, the result follows later
    Pending,
    /// Command not supported
    Unsupported,
    /// The link is going away
    DisconnectInProgress,
}

/// Commands issued by the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioControl {
    /// Is the stream ready to start
    CheckReady,
    /// Start streaming
    Start,
    /// Stop streaming
    Stop,
    /// Suspend streaming
    Suspend,
    /// The audio path changed its PCM output format
    SetOutputConfig(PcmFeeding),
    /// Request hardware offload of the stream
    OffloadStart,
}

/// Options for configuring the A2DP core
///
/// # Examples
///
/// ```rust
/// use streambird::{AvOptions, CodecIndex, CopyProtection, Tsep};
///
/// // Use default options: an audio source preferring AAC over SBC
/// let default_options = AvOptions::default();
///
/// // An audio source that only offers SBC and requires SCMS-T capable sinks
/// let strict = AvOptions {
///     codec_priorities: &[CodecIndex::SourceSbc],
///     copy_protection: CopyProtection::CopyNever,
///     ..AvOptions::default()
/// };
///
/// // An audio sink reporting a 150 ms output delay
/// let sink = AvOptions {
///     local_role: Tsep::Sink,
///     delay_report: 1500,
///     ..AvOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AvOptions {
    /// Role of the local stream endpoints
    pub local_role: Tsep,
    /// Source codecs, best first
    ///
    /// Codecs missing from the list keep their default relative order behind
    /// the listed ones.
    pub codec_priorities: &'static [CodecIndex],
    /// Open and start only while we are central on the link
    ///
    /// When set and the transport reports a peripheral role, a role switch is
    /// requested first and the operation resumes once it completes.
    pub require_central: bool,
    /// Let a peer that configured us start streaming right away
    ///
    /// Without it a start coming from an acceptor-side configuration that still
    /// needs a reconfiguration is suspended again.
    pub acceptor_auto_start: bool,
    /// Content protection policy
    pub copy_protection: CopyProtection,
    /// Delay reported to a peer source, in 1/10 ms, 0 disables reporting
    pub delay_report: u16,
}

impl Default for AvOptions {
    fn default() -> Self {
        Self {
            local_role: Tsep::Source,
            codec_priorities: &CodecIndex::SOURCE_DEFAULT_PRIORITY,
            require_central: false,
            acceptor_auto_start: false,
            copy_protection: CopyProtection::CopyFree,
            delay_report: 0,
        }
    }
}

/// API requests sent to the control-plane task
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Request {
    /// Connect to a peer
    Connect(BluetoothAddress),
    /// Disconnect from a peer
    Disconnect(BluetoothAddress),
    /// Start streaming
    StartStream,
    /// Stop streaming
    StopStream,
    /// Suspend streaming
    SuspendStream,
    /// Apply user codec preferences
    SetCodecConfig(CodecUserConfig),
    /// Apply a new PCM feeding
    SetAudioFeeding(PcmFeeding),
    /// Request hardware offload
    OffloadStart,
    /// A command from the audio path
    AudioControl(AudioControl),
    /// Grant or withdraw sink audio focus
    SetSinkFocus(FocusState),
    /// Send content protection data
    SecurityRequest(SecurityData),
    /// Answer a content protection indication
    SecurityResponse {
        /// Rejection code, `None` accepts
        error: Option<ErrorCode>,
        /// Payload
        data: SecurityData,
    },
    /// Close the stream and stop the media worker
    Shutdown,
    /// Get session state
    GetState,
    /// Get codec status
    GetCodecStatus,
}

/// API responses sent back from the control-plane task
#[derive(Debug, Clone)]
pub(crate) enum Response {
    /// Request accepted and dispatched
    Accepted,
    /// Current session state
    State(SessionSnapshot),
    /// Current codec status
    CodecStatus(CodecStatus),
    /// Error occurred
    Error(AvError),
}
