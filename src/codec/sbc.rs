//! SBC (Sub-band Coding) codec information
//!
//! SBC is the mandatory A2DP codec. Its codec-specific block is four bytes:
//!
//! | Byte | High nibble          | Low nibble                          |
//! |------|----------------------|-------------------------------------|
//! | 0    | sampling frequency   | channel mode                        |
//! | 1    | block length         | subbands (bits 3-2), allocation (1-0) |
//! | 2    | minimum bitpool      |                                     |
//! | 3    | maximum bitpool      |                                     |

use super::{
    ChannelMode, CodecError, CodecInfo, CodecType, CodecUserConfig, PcmFeeding, pick_first,
    single_bit,
};
use crate::avdtp::MediaType;

/// Length of the SBC codec-specific block
const SBC_PARAMS_LEN: usize = 4;

/// Lowest valid bitpool
pub const SBC_MIN_BITPOOL: u8 = 2;

/// Highest bitpool we encode with
pub const SBC_MAX_BITPOOL_SOURCE: u8 = 53;

/// Highest bitpool allowed by SBC
pub const SBC_MAX_BITPOOL: u8 = 250;

/// SBC Codec Capabilities or configuration
///
/// As capabilities, every field may have several bits set. As a configuration,
/// every bitfield has exactly one bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcCapabilities {
    /// Sampling frequency support (bitfield)
    pub sampling_frequencies: SbcSamplingFrequency,
    /// Channel mode support (bitfield)
    pub channel_modes: SbcChannelMode,
    /// Block length support (bitfield)
    pub block_lengths: SbcBlockLength,
    /// Subbands support (bitfield)
    pub subbands: SbcSubbands,
    /// Allocation method support (bitfield)
    pub allocation_methods: SbcAllocationMethod,
    /// Minimum bitpool value (2-250)
    pub min_bitpool: u8,
    /// Maximum bitpool value (2-250)
    pub max_bitpool: u8,
}

/// SBC Sampling Frequency Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSamplingFrequency(pub u8);

impl SbcSamplingFrequency {
    /// 16000 Hz
    pub const HZ_16000: u8 = 0x08;
    /// 32000 Hz
    pub const HZ_32000: u8 = 0x04;
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x02;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x01;

    /// Selection order, best first
    const PREFERENCE: [u8; 4] = [Self::HZ_44100, Self::HZ_48000, Self::HZ_32000, Self::HZ_16000];

    /// Create with all frequencies supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::HZ_16000 | Self::HZ_32000 | Self::HZ_44100 | Self::HZ_48000)
    }

    /// Create with standard frequencies (44.1kHz and 48kHz)
    #[must_use]
    pub const fn standard() -> Self {
        Self(Self::HZ_44100 | Self::HZ_48000)
    }

    /// Check if frequency is supported
    #[must_use]
    pub const fn supports(&self, freq: u8) -> bool {
        (self.0 & freq) != 0
    }

    /// Bit for a sample rate in Hz
    #[must_use]
    pub const fn from_hz(hz: u32) -> Option<u8> {
        match hz {
            16_000 => Some(Self::HZ_16000),
            32_000 => Some(Self::HZ_32000),
            44_100 => Some(Self::HZ_44100),
            48_000 => Some(Self::HZ_48000),
            _ => None,
        }
    }

    /// Sample rate in Hz of a single-bit configuration
    #[must_use]
    pub const fn hz(&self) -> Option<u32> {
        match self.0 {
            Self::HZ_16000 => Some(16_000),
            Self::HZ_32000 => Some(32_000),
            Self::HZ_44100 => Some(44_100),
            Self::HZ_48000 => Some(48_000),
            _ => None,
        }
    }
}

/// SBC Channel Mode Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcChannelMode(pub u8);

impl SbcChannelMode {
    /// Mono
    pub const MONO: u8 = 0x08;
    /// Dual Channel
    pub const DUAL_CHANNEL: u8 = 0x04;
    /// Stereo
    pub const STEREO: u8 = 0x02;
    /// Joint Stereo
    pub const JOINT_STEREO: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [Self::JOINT_STEREO, Self::STEREO, Self::DUAL_CHANNEL, Self::MONO];
    const STEREO_PREFERENCE: [u8; 3] = [Self::JOINT_STEREO, Self::STEREO, Self::DUAL_CHANNEL];

    /// Create with all modes supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::MONO | Self::DUAL_CHANNEL | Self::STEREO | Self::JOINT_STEREO)
    }

    /// Create with stereo modes only
    #[must_use]
    pub const fn stereo() -> Self {
        Self(Self::STEREO | Self::JOINT_STEREO)
    }

    /// Check if mode is supported
    #[must_use]
    pub const fn supports(&self, mode: u8) -> bool {
        (self.0 & mode) != 0
    }
}

/// SBC Block Length Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcBlockLength(pub u8);

impl SbcBlockLength {
    /// 4 blocks
    pub const BLOCKS_4: u8 = 0x08;
    /// 8 blocks
    pub const BLOCKS_8: u8 = 0x04;
    /// 12 blocks
    pub const BLOCKS_12: u8 = 0x02;
    /// 16 blocks
    pub const BLOCKS_16: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [Self::BLOCKS_16, Self::BLOCKS_12, Self::BLOCKS_8, Self::BLOCKS_4];

    /// Create with all block lengths supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::BLOCKS_4 | Self::BLOCKS_8 | Self::BLOCKS_12 | Self::BLOCKS_16)
    }

    /// Check if block length is supported
    #[must_use]
    pub const fn supports(&self, blocks: u8) -> bool {
        (self.0 & blocks) != 0
    }
}

/// SBC Subbands Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSubbands(pub u8);

impl SbcSubbands {
    /// 4 subbands
    pub const SUBBANDS_4: u8 = 0x02;
    /// 8 subbands
    pub const SUBBANDS_8: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::SUBBANDS_8, Self::SUBBANDS_4];

    /// Create with all subbands supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SUBBANDS_4 | Self::SUBBANDS_8)
    }

    /// Create with 8 subbands only (better quality)
    #[must_use]
    pub const fn high_quality() -> Self {
        Self(Self::SUBBANDS_8)
    }

    /// Check if subband count is supported
    #[must_use]
    pub const fn supports(&self, subbands: u8) -> bool {
        (self.0 & subbands) != 0
    }
}

/// SBC Allocation Method Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcAllocationMethod(pub u8);

impl SbcAllocationMethod {
    /// SNR allocation method
    pub const SNR: u8 = 0x02;
    /// Loudness allocation method
    pub const LOUDNESS: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::LOUDNESS, Self::SNR];

    /// Create with all allocation methods supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SNR | Self::LOUDNESS)
    }

    /// Create with loudness only (better for music)
    #[must_use]
    pub const fn loudness() -> Self {
        Self(Self::LOUDNESS)
    }

    /// Check if allocation method is supported
    #[must_use]
    pub const fn supports(&self, method: u8) -> bool {
        (self.0 & method) != 0
    }
}

impl SbcCapabilities {
    /// Capabilities of the local SBC encoder
    #[must_use]
    pub const fn source_default() -> Self {
        Self {
            sampling_frequencies: SbcSamplingFrequency::standard(),
            channel_modes: SbcChannelMode::all(),
            block_lengths: SbcBlockLength(SbcBlockLength::BLOCKS_16),
            subbands: SbcSubbands::high_quality(),
            allocation_methods: SbcAllocationMethod::loudness(),
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: SBC_MAX_BITPOOL_SOURCE,
        }
    }

    /// Capabilities of the local SBC decoder
    #[must_use]
    pub const fn sink_default() -> Self {
        Self {
            sampling_frequencies: SbcSamplingFrequency::all(),
            channel_modes: SbcChannelMode::all(),
            block_lengths: SbcBlockLength::all(),
            subbands: SbcSubbands::all(),
            allocation_methods: SbcAllocationMethod::all(),
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: SBC_MAX_BITPOOL,
        }
    }

    /// Decode the SBC block of a codec information element
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a well-formed SBC element.
    pub fn from_info(info: &CodecInfo) -> Result<Self, CodecError> {
        if info.codec_type()? != CodecType::Sbc {
            return Err(CodecError::InvalidCodecType);
        }
        let params = info.params();
        if params.len() != SBC_PARAMS_LEN {
            return Err(CodecError::BadLength);
        }
        let caps = Self {
            sampling_frequencies: SbcSamplingFrequency(params[0] >> 4),
            channel_modes: SbcChannelMode(params[0] & 0x0F),
            block_lengths: SbcBlockLength(params[1] >> 4),
            subbands: SbcSubbands((params[1] >> 2) & 0x03),
            allocation_methods: SbcAllocationMethod(params[1] & 0x03),
            min_bitpool: params[2],
            max_bitpool: params[3],
        };
        caps.validate()?;
        Ok(caps)
    }

    /// Encode as a codec information element
    #[must_use]
    pub fn to_info(&self) -> CodecInfo {
        let params = [
            (self.sampling_frequencies.0 << 4) | (self.channel_modes.0 & 0x0F),
            (self.block_lengths.0 << 4)
                | ((self.subbands.0 & 0x03) << 2)
                | (self.allocation_methods.0 & 0x03),
            self.min_bitpool,
            self.max_bitpool,
        ];
        CodecInfo::new(MediaType::Audio, CodecType::Sbc, &params).unwrap_or(CodecInfo::EMPTY)
    }

    /// Validate SBC capabilities
    ///
    /// # Errors
    /// Returns error if a bitfield is empty or bitpool values are invalid
    pub const fn validate(&self) -> Result<(), CodecError> {
        if self.sampling_frequencies.0 == 0
            || self.channel_modes.0 == 0
            || self.block_lengths.0 == 0
            || self.subbands.0 == 0
            || self.allocation_methods.0 == 0
        {
            return Err(CodecError::InvalidParameters);
        }
        if self.min_bitpool < SBC_MIN_BITPOOL || self.max_bitpool > SBC_MAX_BITPOOL {
            return Err(CodecError::InvalidParameters);
        }
        if self.min_bitpool > self.max_bitpool {
            return Err(CodecError::InvalidParameters);
        }
        Ok(())
    }

    /// Whether every bitfield has exactly one bit set
    #[must_use]
    pub const fn is_single_config(&self) -> bool {
        single_bit(self.sampling_frequencies.0 as u16)
            && single_bit(self.channel_modes.0 as u16)
            && single_bit(self.block_lengths.0 as u16)
            && single_bit(self.subbands.0 as u16)
            && single_bit(self.allocation_methods.0 as u16)
    }

    /// Check if this capability set is compatible with another
    #[must_use]
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        (self.sampling_frequencies.0 & other.sampling_frequencies.0) != 0
            && (self.channel_modes.0 & other.channel_modes.0) != 0
            && (self.block_lengths.0 & other.block_lengths.0) != 0
            && (self.subbands.0 & other.subbands.0) != 0
            && (self.allocation_methods.0 & other.allocation_methods.0) != 0
            && self.max_bitpool >= other.min_bitpool
            && self.min_bitpool <= other.max_bitpool
    }

    /// Whether `config` is a single configuration inside these capabilities
    #[must_use]
    pub const fn accepts_config(&self, config: &Self) -> bool {
        config.is_single_config()
            && self.is_compatible_with(config)
            && config.min_bitpool >= self.min_bitpool
            && config.max_bitpool <= self.max_bitpool
    }

    /// Choose one configuration supported by both sides
    ///
    /// Preferences are honored when the common capabilities allow them and
    /// ignored otherwise. The default order is 44.1 kHz, then 48, 32 and 16 kHz;
    /// joint stereo, then stereo, dual channel and mono; 16 blocks; 8 subbands;
    /// loudness allocation. The bitpool range is the intersection of both ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotCompatible`] if any field has no common value.
    pub fn negotiate(&self, peer: &Self, prefs: &CodecUserConfig) -> Result<Self, CodecError> {
        let freqs = SbcSamplingFrequency(self.sampling_frequencies.0 & peer.sampling_frequencies.0);
        let preferred_freq = prefs
            .sample_rate
            .and_then(SbcSamplingFrequency::from_hz)
            .filter(|&bit| freqs.supports(bit));
        let freq = preferred_freq
            .or_else(|| pick_first(&SbcSamplingFrequency::PREFERENCE, |bit| freqs.supports(bit)))
            .ok_or(CodecError::NotCompatible)?;

        let modes = SbcChannelMode(self.channel_modes.0 & peer.channel_modes.0);
        let preferred_mode = match prefs.channel_mode {
            Some(ChannelMode::Mono) => pick_first(&[SbcChannelMode::MONO], |bit| modes.supports(bit)),
            Some(ChannelMode::Stereo) => pick_first(&SbcChannelMode::STEREO_PREFERENCE, |bit| modes.supports(bit)),
            None => None,
        };
        let mode = preferred_mode
            .or_else(|| pick_first(&SbcChannelMode::PREFERENCE, |bit| modes.supports(bit)))
            .ok_or(CodecError::NotCompatible)?;

        let block_lengths = SbcBlockLength(self.block_lengths.0 & peer.block_lengths.0);
        let blocks = pick_first(&SbcBlockLength::PREFERENCE, |bit| block_lengths.supports(bit))
            .ok_or(CodecError::NotCompatible)?;
        let common_subbands = SbcSubbands(self.subbands.0 & peer.subbands.0);
        let subbands = pick_first(&SbcSubbands::PREFERENCE, |bit| common_subbands.supports(bit))
            .ok_or(CodecError::NotCompatible)?;
        let methods = SbcAllocationMethod(self.allocation_methods.0 & peer.allocation_methods.0);
        let alloc = pick_first(&SbcAllocationMethod::PREFERENCE, |bit| methods.supports(bit))
            .ok_or(CodecError::NotCompatible)?;

        let min_bitpool = self.min_bitpool.max(peer.min_bitpool);
        let max_bitpool = self.max_bitpool.min(peer.max_bitpool);
        if min_bitpool > max_bitpool {
            return Err(CodecError::NotCompatible);
        }

        Ok(Self {
            sampling_frequencies: SbcSamplingFrequency(freq),
            channel_modes: SbcChannelMode(mode),
            block_lengths: SbcBlockLength(blocks),
            subbands: SbcSubbands(subbands),
            allocation_methods: SbcAllocationMethod(alloc),
            min_bitpool,
            max_bitpool,
        })
    }

    /// PCM feeding for a single configuration
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameters`] if this is not a single configuration.
    pub fn feeding(&self) -> Result<PcmFeeding, CodecError> {
        if !self.is_single_config() {
            return Err(CodecError::InvalidParameters);
        }
        let sample_rate = self
            .sampling_frequencies
            .hz()
            .ok_or(CodecError::InvalidParameters)?;
        let channel_mode = if self.channel_modes.0 == SbcChannelMode::MONO {
            ChannelMode::Mono
        } else {
            ChannelMode::Stereo
        };
        Ok(PcmFeeding {
            sample_rate,
            bits_per_sample: 16,
            channel_mode,
        })
    }
}

impl Default for SbcCapabilities {
    fn default() -> Self {
        Self::source_default()
    }
}
