//! A2DP codec information elements
//!
//! A codec information element is the `Media Codec` service capability carried in
//! AVDTP signalling: a length byte, the media type, the codec type and a
//! codec-specific parameter block. The same layout carries both capabilities
//! (several bits set per field) and configurations (exactly one bit per field).
//!
//! Parsing and negotiation are implemented per codec in [`sbc`] and [`aac`]; the
//! [`registry`] keeps the locally supported codecs in priority order.

pub mod aac;
pub mod registry;
pub mod sbc;

use crate::avdtp::MediaType;
use crate::constants::CODEC_INFO_SIZE;

pub use aac::AacCapabilities;
pub use registry::{CodecRegistry, ConfigUpdate};
pub use sbc::SbcCapabilities;

/// Codec types defined by the A2DP specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CodecType {
    /// SBC (Sub-Band Coding) - Mandatory codec for A2DP
    Sbc = 0x00,
    /// MPEG-1,2 Audio (MP3)
    Mpeg12Audio = 0x01,
    /// MPEG-2,4 AAC
    Mpeg24Aac = 0x02,
    /// ATRAC family
    Atrac = 0x04,
    /// Vendor-specific codec
    VendorSpecific = 0xFF,
}

impl TryFrom<u8> for CodecType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Sbc),
            0x01 => Ok(Self::Mpeg12Audio),
            0x02 => Ok(Self::Mpeg24Aac),
            0x04 => Ok(Self::Atrac),
            0xFF => Ok(Self::VendorSpecific),
            _ => Err(CodecError::InvalidCodecType),
        }
    }
}

/// Codec errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Codec information element is truncated or its length byte is wrong
    BadLength,
    /// Media type is not audio
    BadMediaType,
    /// Codec type is unknown
    InvalidCodecType,
    /// Codec type is valid but not supported locally
    NotSupportedCodecType,
    /// A parameter field has no bit set or more than one bit set in a configuration
    InvalidParameters,
    /// No configuration satisfies both sides
    NotCompatible,
}

/// Index of a locally implemented codec
///
/// The order of the variants is the default priority order used for selection,
/// highest priority last, so that `CodecIndex::SourceAac > CodecIndex::SourceSbc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecIndex {
    /// SBC encoder (we are the source)
    SourceSbc,
    /// AAC encoder (we are the source)
    SourceAac,
    /// SBC decoder (we are the sink)
    SinkSbc,
}

impl CodecIndex {
    /// Source codec indices in default priority order, best first
    pub const SOURCE_DEFAULT_PRIORITY: [CodecIndex; 2] = [CodecIndex::SourceAac, CodecIndex::SourceSbc];

    /// Human-readable codec name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SourceSbc => "SBC",
            Self::SourceAac => "AAC",
            Self::SinkSbc => "SBC SINK",
        }
    }

    /// Whether this index drives an encoder
    #[must_use]
    pub const fn is_source(self) -> bool {
        matches!(self, Self::SourceSbc | Self::SourceAac)
    }

    /// Codec type carried by codec information elements of this index
    #[must_use]
    pub const fn codec_type(self) -> CodecType {
        match self {
            Self::SourceSbc | Self::SinkSbc => CodecType::Sbc,
            Self::SourceAac => CodecType::Mpeg24Aac,
        }
    }

    /// Source codec index matching a peer sink capability, if we can encode it
    #[must_use]
    pub fn source_for(info: &CodecInfo) -> Option<Self> {
        match info.codec_type().ok()? {
            CodecType::Sbc => Some(Self::SourceSbc),
            CodecType::Mpeg24Aac => Some(Self::SourceAac),
            _ => None,
        }
    }

    /// Sink codec index matching a peer source capability, if we can decode it
    #[must_use]
    pub fn sink_for(info: &CodecInfo) -> Option<Self> {
        match info.codec_type().ok()? {
            CodecType::Sbc => Some(Self::SinkSbc),
            _ => None,
        }
    }
}

/// Raw codec information element
///
/// Stored inline in a fixed array so it can be copied across execution contexts
/// as an immutable snapshot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo([u8; CODEC_INFO_SIZE]);

impl CodecInfo {
    /// Offset of the media type byte
    const MEDIA_TYPE_OFFSET: usize = 1;
    /// Offset of the codec type byte
    const CODEC_TYPE_OFFSET: usize = 2;
    /// Offset of the first codec-specific byte
    pub(crate) const PARAMS_OFFSET: usize = 3;

    /// An all-zero element, used for "no configuration"
    pub const EMPTY: Self = Self([0; CODEC_INFO_SIZE]);

    /// Build an element from a codec type and its parameter block
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadLength`] if the parameters do not fit.
    pub fn new(
        media_type: MediaType,
        codec_type: CodecType,
        params: &[u8],
    ) -> Result<Self, CodecError> {
        if params.len() + Self::PARAMS_OFFSET > CODEC_INFO_SIZE {
            return Err(CodecError::BadLength);
        }
        let mut raw = [0u8; CODEC_INFO_SIZE];
        raw[0] = u8::try_from(params.len() + 2).map_err(|_| CodecError::BadLength)?;
        raw[Self::MEDIA_TYPE_OFFSET] = (media_type as u8) << 4;
        raw[Self::CODEC_TYPE_OFFSET] = codec_type as u8;
        raw[Self::PARAMS_OFFSET..Self::PARAMS_OFFSET + params.len()].copy_from_slice(params);
        Ok(Self(raw))
    }

    /// Parse an element as received over the air (length byte first)
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadLength`] if the length byte disagrees with the
    /// slice or the element does not fit.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let losc = usize::from(*bytes.first().ok_or(CodecError::BadLength)?);
        if losc < 2 || bytes.len() < losc + 1 || losc + 1 > CODEC_INFO_SIZE {
            return Err(CodecError::BadLength);
        }
        let mut raw = [0u8; CODEC_INFO_SIZE];
        raw[..=losc].copy_from_slice(&bytes[..=losc]);
        Ok(Self(raw))
    }

    /// Length of the codec-specific block plus media and codec type bytes
    #[must_use]
    pub const fn losc(&self) -> u8 {
        self.0[0]
    }

    /// Whether this element is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Encoded bytes, length byte included
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let len = (usize::from(self.0[0]) + 1).min(CODEC_INFO_SIZE);
        &self.0[..len]
    }

    /// Codec-specific parameter block
    #[must_use]
    pub fn params(&self) -> &[u8] {
        let bytes = self.as_bytes();
        bytes.get(Self::PARAMS_OFFSET..).unwrap_or(&[])
    }

    /// Media type field
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadMediaType`] for unknown media types.
    pub fn media_type(&self) -> Result<MediaType, CodecError> {
        MediaType::try_from(self.0[Self::MEDIA_TYPE_OFFSET] >> 4)
            .map_err(|_| CodecError::BadMediaType)
    }

    /// Codec type field
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidCodecType`] for unknown codec types.
    pub fn codec_type(&self) -> Result<CodecType, CodecError> {
        CodecType::try_from(self.0[Self::CODEC_TYPE_OFFSET])
    }

    /// Whether both elements carry the same codec type
    #[must_use]
    pub fn codec_type_equals(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.0[Self::CODEC_TYPE_OFFSET] == other.0[Self::CODEC_TYPE_OFFSET]
    }

    /// Short codec name for logs
    #[must_use]
    pub fn codec_name(&self) -> &'static str {
        match self.codec_type() {
            Ok(CodecType::Sbc) => "SBC",
            Ok(CodecType::Mpeg24Aac) => "AAC",
            Ok(CodecType::Mpeg12Audio) => "MPEG-1,2",
            Ok(CodecType::Atrac) => "ATRAC",
            Ok(CodecType::VendorSpecific) => "VENDOR",
            Err(_) => "UNKNOWN",
        }
    }
}

impl Default for CodecInfo {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl core::fmt::Debug for CodecInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CodecInfo({}", self.codec_name())?;
        for byte in self.as_bytes() {
            write!(f, " {byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CodecInfo {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "CodecInfo({=str} {=[u8]:02x})", self.codec_name(), self.as_bytes());
    }
}

/// Channel mode as exposed to the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    /// Single channel
    Mono,
    /// Two channels
    Stereo,
}

impl ChannelMode {
    /// Number of PCM channels
    #[must_use]
    pub const fn channel_count(self) -> u8 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// PCM feeding parameters consumed by an encoder or produced by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PcmFeeding {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per PCM sample
    pub bits_per_sample: u8,
    /// Channel mode
    pub channel_mode: ChannelMode,
}

impl PcmFeeding {
    /// Bytes of PCM needed for `interval_ms` of audio
    #[must_use]
    pub fn bytes_per_interval(&self, interval_ms: u32) -> usize {
        let frames = u64::from(self.sample_rate) * u64::from(interval_ms) / 1000;
        let bytes = frames
            * u64::from(self.bits_per_sample / 8)
            * u64::from(self.channel_mode.channel_count());
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

impl Default for PcmFeeding {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channel_mode: ChannelMode::Stereo,
        }
    }
}

/// Explicit codec preferences set by the user
///
/// `None` fields leave the choice to negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecUserConfig {
    /// Codec to use, `None` keeps the current codec
    pub codec: Option<CodecIndex>,
    /// Preferred sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Preferred bits per sample
    pub bits_per_sample: Option<u8>,
    /// Preferred channel mode
    pub channel_mode: Option<ChannelMode>,
}

impl CodecUserConfig {
    /// Whether any preference is set
    #[must_use]
    pub const fn has_preferences(&self) -> bool {
        self.sample_rate.is_some() || self.bits_per_sample.is_some() || self.channel_mode.is_some()
    }

    /// Preferences derived from an audio feeding request
    #[must_use]
    pub const fn from_feeding(feeding: &PcmFeeding) -> Self {
        Self {
            codec: None,
            sample_rate: Some(feeding.sample_rate),
            bits_per_sample: Some(feeding.bits_per_sample),
            channel_mode: Some(feeding.channel_mode),
        }
    }
}

/// Peer link parameters consumed by encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerParams {
    /// Smallest media MTU over all open peers
    pub peer_mtu: u16,
    /// Whether the peer supports EDR
    pub is_peer_edr: bool,
    /// Whether the peer supports 3 Mbps EDR packets
    pub peer_supports_3mbps: bool,
}

impl Default for PeerParams {
    fn default() -> Self {
        Self {
            peer_mtu: u16::MAX,
            is_peer_edr: false,
            peer_supports_3mbps: false,
        }
    }
}

/// Codec capabilities or configuration, decoded per codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecCapabilities {
    /// SBC parameters
    Sbc(SbcCapabilities),
    /// MPEG-2,4 AAC parameters
    Aac(AacCapabilities),
}

impl CodecCapabilities {
    /// Decode a codec information element
    ///
    /// # Errors
    ///
    /// Returns an error if the element is malformed or the codec is not supported.
    pub fn from_info(info: &CodecInfo) -> Result<Self, CodecError> {
        if info.media_type()? != MediaType::Audio {
            return Err(CodecError::BadMediaType);
        }
        match info.codec_type()? {
            CodecType::Sbc => SbcCapabilities::from_info(info).map(Self::Sbc),
            CodecType::Mpeg24Aac => AacCapabilities::from_info(info).map(Self::Aac),
            _ => Err(CodecError::NotSupportedCodecType),
        }
    }

    /// Encode as a codec information element
    #[must_use]
    pub fn to_info(&self) -> CodecInfo {
        match self {
            Self::Sbc(sbc) => sbc.to_info(),
            Self::Aac(aac) => aac.to_info(),
        }
    }

    /// Get the codec type
    #[must_use]
    pub const fn codec_type(&self) -> CodecType {
        match self {
            Self::Sbc(_) => CodecType::Sbc,
            Self::Aac(_) => CodecType::Mpeg24Aac,
        }
    }

    /// PCM feeding implied by a configuration
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameters`] if this is not a single configuration.
    pub fn feeding(&self) -> Result<PcmFeeding, CodecError> {
        match self {
            Self::Sbc(sbc) => sbc.feeding(),
            Self::Aac(aac) => aac.feeding(),
        }
    }

    /// Pick one configuration supported by both `self` (local) and `peer`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotCompatible`] when no configuration exists.
    pub fn negotiate(&self, peer: &Self, prefs: &CodecUserConfig) -> Result<Self, CodecError> {
        match (self, peer) {
            (Self::Sbc(local), Self::Sbc(peer)) => local.negotiate(peer, prefs).map(Self::Sbc),
            (Self::Aac(local), Self::Aac(peer)) => local.negotiate(peer, prefs).map(Self::Aac),
            _ => Err(CodecError::NotCompatible),
        }
    }

    /// Whether `config` is a valid single configuration within these capabilities
    #[must_use]
    pub fn accepts_config(&self, config: &Self) -> bool {
        match (self, config) {
            (Self::Sbc(caps), Self::Sbc(cfg)) => caps.accepts_config(cfg),
            (Self::Aac(caps), Self::Aac(cfg)) => caps.accepts_config(cfg),
            _ => false,
        }
    }
}

/// Select the first bit of `order` accepted by `supports`
pub(crate) fn pick_first(order: &[u8], supports: impl Fn(u8) -> bool) -> Option<u8> {
    order.iter().copied().find(|&bit| supports(bit))
}

/// Whether exactly one bit is set
pub(crate) const fn single_bit(value: u16) -> bool {
    value != 0 && value & (value - 1) == 0
}
