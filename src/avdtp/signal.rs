//! AVDTP signalling identifiers and the requests the stream state machine
//! hands to the transport

use heapless::Vec;

use super::{AvdtHandle, ConfigReject, ErrorCode, Seid, StreamConfig};
use crate::constants::MAX_SECURITY_DATA;

/// AVDTP Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Command message
    Command = 0x00,
    /// Response Accept
    ResponseAccept = 0x02,
    /// Response Reject
    ResponseReject = 0x03,
}

/// AVDTP Signal Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SignalId {
    /// Discover available stream endpoints
    Discover = 0x01,
    /// Get capabilities of a stream endpoint
    GetCapabilities = 0x02,
    /// Set configuration for a stream endpoint
    SetConfiguration = 0x03,
    /// Get current configuration
    GetConfiguration = 0x04,
    /// Reconfigure stream endpoint
    Reconfigure = 0x05,
    /// Open stream
    Open = 0x06,
    /// Start streaming
    Start = 0x07,
    /// Close stream
    Close = 0x08,
    /// Suspend stream
    Suspend = 0x09,
    /// Abort stream
    Abort = 0x0A,
    /// Content protection control
    SecurityControl = 0x0B,
    /// Get all capabilities, including delay reporting
    GetAllCapabilities = 0x0C,
    /// Delay report
    DelayReport = 0x0D,
}

impl TryFrom<u8> for SignalId {
    type Error = ErrorCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Discover),
            0x02 => Ok(Self::GetCapabilities),
            0x03 => Ok(Self::SetConfiguration),
            0x04 => Ok(Self::GetConfiguration),
            0x05 => Ok(Self::Reconfigure),
            0x06 => Ok(Self::Open),
            0x07 => Ok(Self::Start),
            0x08 => Ok(Self::Close),
            0x09 => Ok(Self::Suspend),
            0x0A => Ok(Self::Abort),
            0x0B => Ok(Self::SecurityControl),
            0x0C => Ok(Self::GetAllCapabilities),
            0x0D => Ok(Self::DelayReport),
            _ => Err(ErrorCode::NOT_SUPPORTED_COMMAND),
        }
    }
}

/// Opaque content protection payload of a security control exchange
pub type SecurityData = Vec<u8, MAX_SECURITY_DATA>;

/// A signalling request for the transport to encode and send
///
/// `SetConfiguration` follows the usual stack convention: once the peer
/// accepts the configuration the transport sends OPEN on its own and reports
/// the outcome as an open confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutboundSignal {
    /// Discover the peer's stream endpoints
    Discover,
    /// Fetch the capabilities of a peer endpoint
    GetCapabilities {
        /// Peer endpoint
        seid: Seid,
        /// Use GET_ALL_CAPABILITIES
        all: bool,
    },
    /// Configure a peer endpoint and open the stream
    SetConfiguration {
        /// Local endpoint
        local: AvdtHandle,
        /// Peer endpoint
        remote: Seid,
        /// Configuration to apply
        config: StreamConfig,
    },
    /// Answer a peer SET_CONFIGURATION
    ConfigResponse {
        /// Local endpoint
        local: AvdtHandle,
        /// Transaction label of the indication
        label: u8,
        /// Accept, or the category and reason of the rejection
        result: Result<(), ConfigReject>,
    },
    /// Start streaming
    Start {
        /// Local endpoint
        local: AvdtHandle,
    },
    /// Suspend streaming
    Suspend {
        /// Local endpoint
        local: AvdtHandle,
    },
    /// Close the stream
    Close {
        /// Local endpoint
        local: AvdtHandle,
    },
    /// Change the configuration of an open stream
    Reconfigure {
        /// Local endpoint
        local: AvdtHandle,
        /// New configuration
        config: StreamConfig,
    },
    /// Content protection control request
    SecurityRequest {
        /// Local endpoint
        local: AvdtHandle,
        /// Opaque payload
        data: SecurityData,
    },
    /// Content protection control response
    SecurityResponse {
        /// Local endpoint
        local: AvdtHandle,
        /// Transaction label of the indication
        label: u8,
        /// `None` accepts
        error: Option<ErrorCode>,
        /// Opaque payload
        data: SecurityData,
    },
    /// Report our sink delay to the peer source, in 1/10 ms
    DelayReport {
        /// Local endpoint
        local: AvdtHandle,
        /// Peer endpoint
        remote: Seid,
        /// Delay in 1/10 milliseconds
        delay: u16,
    },
}

impl OutboundSignal {
    /// Signal identifier on the air
    #[must_use]
    pub const fn signal_id(&self) -> SignalId {
        match self {
            Self::Discover => SignalId::Discover,
            Self::GetCapabilities { all: false, .. } => SignalId::GetCapabilities,
            Self::GetCapabilities { all: true, .. } => SignalId::GetAllCapabilities,
            Self::SetConfiguration { .. } | Self::ConfigResponse { .. } => SignalId::SetConfiguration,
            Self::Start { .. } => SignalId::Start,
            Self::Suspend { .. } => SignalId::Suspend,
            Self::Close { .. } => SignalId::Close,
            Self::Reconfigure { .. } => SignalId::Reconfigure,
            Self::SecurityRequest { .. } | Self::SecurityResponse { .. } => SignalId::SecurityControl,
            Self::DelayReport { .. } => SignalId::DelayReport,
        }
    }

    /// Message type on the air
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::ConfigResponse { result: Err(_), .. }
            | Self::SecurityResponse { error: Some(_), .. } => MessageType::ResponseReject,
            Self::ConfigResponse { .. } | Self::SecurityResponse { .. } => MessageType::ResponseAccept,
            _ => MessageType::Command,
        }
    }
}
