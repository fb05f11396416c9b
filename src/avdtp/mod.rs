//! AVDTP (Audio/Video Distribution Transport Protocol) vocabulary
//!
//! The stream state machine does not encode AVDTP PDUs itself; the platform
//! transport does. This module holds the shared vocabulary both sides agree
//! on: media and endpoint types, service categories, protocol error codes and
//! the stream configuration carried by SET_CONFIGURATION and RECONFIGURE.

pub mod sep;
pub mod signal;

use core::ops::BitAnd;

use crate::codec::{CodecError, CodecInfo};
use crate::constants::{CP_INFO_LEN, CP_SCMS_T_ID};

pub use sep::{LocalSep, PeerSepInfo};
pub use signal::{MessageType, OutboundSignal, SecurityData, SignalId};

/// Stream endpoint identifier assigned by the peer
pub type Seid = u8;

/// Local AVDTP stream handle, one per local stream endpoint
pub type AvdtHandle = u8;

/// First AVDTP version with GET_ALL_CAPABILITIES and delay reporting
pub const AVDTP_VERSION_1_3: u16 = 0x0103;

/// Media Types supported by AVDTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MediaType {
    /// Audio media
    Audio = 0x00,
    /// Video media
    Video = 0x01,
    /// Multimedia media
    Multimedia = 0x02,
}

impl TryFrom<u8> for MediaType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Audio),
            0x01 => Ok(Self::Video),
            0x02 => Ok(Self::Multimedia),
            other => Err(other),
        }
    }
}

/// Stream endpoint type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Tsep {
    /// Audio source, encodes and sends media
    Source = 0x00,
    /// Audio sink, receives and decodes media
    Sink = 0x01,
}

impl Tsep {
    /// The endpoint type a peer must have to stream with us
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

/// Service categories of a stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceCategory {
    /// Media transport
    MediaTransport = 0x01,
    /// Reporting
    Reporting = 0x02,
    /// Recovery
    Recovery = 0x03,
    /// Content protection
    ContentProtection = 0x04,
    /// Header compression
    HeaderCompression = 0x05,
    /// Multiplexing
    Multiplexing = 0x06,
    /// Media codec
    MediaCodec = 0x07,
    /// Delay reporting
    DelayReporting = 0x08,
}

/// Protocol service capability mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceMask(pub u16);

impl ServiceMask {
    /// Media transport
    pub const TRANSPORT: Self = Self(0x0001);
    /// Reporting
    pub const REPORTING: Self = Self(0x0002);
    /// Recovery
    pub const RECOVERY: Self = Self(0x0004);
    /// Header compression
    pub const HEADER_COMPRESSION: Self = Self(0x0008);
    /// Multiplexing
    pub const MULTIPLEXING: Self = Self(0x0010);
    /// Delay reporting
    pub const DELAY_REPORTING: Self = Self(0x0040);

    /// No service
    pub const NONE: Self = Self(0);

    /// Whether every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Both masks combined
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// This mask without the bits of `other`
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitAnd for ServiceMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// AVDTP and A2DP error codes carried on rejects and confirms
///
/// `CONNECT` and `TIMEOUT` never appear on the air; the transport uses them to
/// report local failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCode(pub u8);

impl ErrorCode {
    /// Signalling channel could not be established
    pub const CONNECT: Self = Self(0x07);
    /// No response from the peer in time
    pub const TIMEOUT: Self = Self(0x08);
    /// Request packet header format error
    pub const BAD_HEADER_FORMAT: Self = Self(0x01);
    /// Request packet length does not match
    pub const BAD_LENGTH: Self = Self(0x11);
    /// Invalid acceptor SEID
    pub const BAD_ACP_SEID: Self = Self(0x12);
    /// SEP is already in use
    pub const SEP_IN_USE: Self = Self(0x13);
    /// SEP is not in use
    pub const SEP_NOT_IN_USE: Self = Self(0x14);
    /// Unknown service category
    pub const BAD_SERV_CATEGORY: Self = Self(0x17);
    /// Bad payload format
    pub const BAD_PAYLOAD_FORMAT: Self = Self(0x18);
    /// Command not supported
    pub const NOT_SUPPORTED_COMMAND: Self = Self(0x19);
    /// Reconfigure touched a non-reconfigurable category
    pub const INVALID_CAPABILITIES: Self = Self(0x1A);
    /// Requested configuration is not supported
    pub const UNSUPPORTED_CONFIGURATION: Self = Self(0x29);
    /// Command is not valid in the current state
    pub const BAD_STATE: Self = Self(0x31);
    /// Codec type is invalid
    pub const INVALID_CODEC_TYPE: Self = Self(0xC1);
    /// Codec type is not supported
    pub const NOT_SUPPORTED_CODEC_TYPE: Self = Self(0xC2);
    /// Codec parameters are wrong
    pub const WRONG_CODEC: Self = Self(0xC8);
    /// Content protection type is not supported
    pub const BAD_CP_TYPE: Self = Self(0xE0);
    /// Content protection format error
    pub const BAD_CP_FORMAT: Self = Self(0xE1);
    /// Local resources are busy
    pub const BUSY: Self = Self(0x0A);
}

impl From<CodecError> for ErrorCode {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::InvalidCodecType => Self::INVALID_CODEC_TYPE,
            CodecError::NotSupportedCodecType => Self::NOT_SUPPORTED_CODEC_TYPE,
            CodecError::BadLength => Self::BAD_LENGTH,
            CodecError::BadMediaType
            | CodecError::InvalidParameters
            | CodecError::NotCompatible => Self::WRONG_CODEC,
        }
    }
}

/// Rejection of a peer SET_CONFIGURATION
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigReject {
    /// Offending service category
    pub category: ServiceCategory,
    /// Reason
    pub error: ErrorCode,
}

/// Content protection descriptors of a stream endpoint
///
/// Descriptors are stored back to back, each prefixed with its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContentProtection {
    /// Number of descriptors
    pub count: u8,
    /// Raw descriptors
    pub info: [u8; CP_INFO_LEN],
}

impl ContentProtection {
    /// No content protection
    pub const NONE: Self = Self {
        count: 0,
        info: [0; CP_INFO_LEN],
    };

    /// A single SCMS-T descriptor
    pub const SCMS_T: Self = Self {
        count: 1,
        info: [0x02, (CP_SCMS_T_ID & 0xFF) as u8, (CP_SCMS_T_ID >> 8) as u8],
    };

    /// Whether any descriptor is SCMS-T
    #[must_use]
    pub fn has_scms_t(&self) -> bool {
        let mut offset = 0;
        for _ in 0..self.count {
            let Some(&len) = self.info.get(offset) else {
                return false;
            };
            if is_scms_t_descriptor(&self.info[offset..]) {
                return true;
            }
            offset += usize::from(len) + 1;
        }
        false
    }
}

fn is_scms_t_descriptor(descriptor: &[u8]) -> bool {
    match descriptor {
        [len, lo, hi, ..] if *len >= 2 => u16::from_le_bytes([*lo, *hi]) == CP_SCMS_T_ID,
        _ => false,
    }
}

/// Stream configuration exchanged with the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    /// Media codec capability or configuration
    pub codec_info: CodecInfo,
    /// Protocol services other than codec and content protection
    pub services: ServiceMask,
    /// Content protection
    pub protect: ContentProtection,
}

impl StreamConfig {
    /// Whether a codec element is present
    #[must_use]
    pub const fn has_codec(&self) -> bool {
        !self.codec_info.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_u8() {
        assert_eq!(MediaType::try_from(0).unwrap(), MediaType::Audio);
        assert_eq!(MediaType::try_from(2).unwrap(), MediaType::Multimedia);
        assert_eq!(MediaType::try_from(7), Err(7));
    }

    #[test]
    fn test_service_mask() {
        let local = ServiceMask::TRANSPORT.union(ServiceMask::DELAY_REPORTING);
        let peer = ServiceMask::TRANSPORT.union(ServiceMask::REPORTING);
        assert_eq!(local & peer, ServiceMask::TRANSPORT);
        assert!(local.contains(ServiceMask::DELAY_REPORTING));
        assert_eq!(local.without(ServiceMask::DELAY_REPORTING), ServiceMask::TRANSPORT);
    }

    #[test]
    fn test_scms_t_detection() {
        assert!(ContentProtection::SCMS_T.has_scms_t());
        assert!(!ContentProtection::NONE.has_scms_t());

        let dtcp = ContentProtection {
            count: 1,
            info: [0x02, 0x01, 0x00],
        };
        assert!(!dtcp.has_scms_t());
    }

    #[test]
    fn test_codec_error_codes() {
        assert_eq!(
            ErrorCode::from(CodecError::NotSupportedCodecType),
            ErrorCode::NOT_SUPPORTED_CODEC_TYPE
        );
        assert_eq!(ErrorCode::from(CodecError::NotCompatible), ErrorCode::WRONG_CODEC);
    }
}
