//! MPEG-2,4 AAC codec information
//!
//! The AAC codec-specific block is six bytes: object type, a 12-bit sampling
//! frequency mask spread over two bytes, the channel bits, then the VBR flag and
//! a 23-bit peak bit rate.

use super::{ChannelMode, CodecError, CodecInfo, CodecType, CodecUserConfig, PcmFeeding, single_bit};
use crate::avdtp::MediaType;

const AAC_PARAMS_LEN: usize = 6;

/// Bit rate used by the local encoder, in bits per second
pub const AAC_DEFAULT_BITRATE: u32 = 320_000;

/// AAC object types (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AacObjectType(pub u8);

impl AacObjectType {
    /// MPEG-2 AAC Low Complexity
    pub const MPEG2_LC: u8 = 0x80;
    /// MPEG-4 AAC Low Complexity
    pub const MPEG4_LC: u8 = 0x40;
    /// MPEG-4 AAC Long Term Prediction
    pub const MPEG4_LTP: u8 = 0x20;
    /// MPEG-4 AAC Scalable
    pub const MPEG4_SCALABLE: u8 = 0x10;
}

/// AAC sampling frequencies (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AacSamplingFrequency(pub u16);

impl AacSamplingFrequency {
    /// 8000 Hz
    pub const HZ_8000: u16 = 0x8000;
    /// 11025 Hz
    pub const HZ_11025: u16 = 0x4000;
    /// 12000 Hz
    pub const HZ_12000: u16 = 0x2000;
    /// 16000 Hz
    pub const HZ_16000: u16 = 0x1000;
    /// 22050 Hz
    pub const HZ_22050: u16 = 0x0800;
    /// 24000 Hz
    pub const HZ_24000: u16 = 0x0400;
    /// 32000 Hz
    pub const HZ_32000: u16 = 0x0200;
    /// 44100 Hz
    pub const HZ_44100: u16 = 0x0100;
    /// 48000 Hz
    pub const HZ_48000: u16 = 0x0080;
    /// 64000 Hz
    pub const HZ_64000: u16 = 0x0040;
    /// 88200 Hz
    pub const HZ_88200: u16 = 0x0020;
    /// 96000 Hz
    pub const HZ_96000: u16 = 0x0010;

    const TABLE: [(u16, u32); 12] = [
        (Self::HZ_8000, 8_000),
        (Self::HZ_11025, 11_025),
        (Self::HZ_12000, 12_000),
        (Self::HZ_16000, 16_000),
        (Self::HZ_22050, 22_050),
        (Self::HZ_24000, 24_000),
        (Self::HZ_32000, 32_000),
        (Self::HZ_44100, 44_100),
        (Self::HZ_48000, 48_000),
        (Self::HZ_64000, 64_000),
        (Self::HZ_88200, 88_200),
        (Self::HZ_96000, 96_000),
    ];

    const PREFERENCE: [u16; 4] = [Self::HZ_44100, Self::HZ_48000, Self::HZ_32000, Self::HZ_16000];

    /// Bit for a sample rate in Hz
    #[must_use]
    pub fn from_hz(hz: u32) -> Option<u16> {
        Self::TABLE.iter().find(|(_, rate)| *rate == hz).map(|(bit, _)| *bit)
    }

    /// Sample rate in Hz of a single-bit configuration
    #[must_use]
    pub fn hz(&self) -> Option<u32> {
        Self::TABLE.iter().find(|(bit, _)| *bit == self.0).map(|(_, rate)| *rate)
    }
}

/// AAC channel support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AacChannels(pub u8);

impl AacChannels {
    /// One channel
    pub const MONO: u8 = 0x08;
    /// Two channels
    pub const STEREO: u8 = 0x04;
}

/// AAC codec capabilities or configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AacCapabilities {
    /// Object types (bitfield)
    pub object_types: AacObjectType,
    /// Sampling frequencies (bitfield)
    pub sampling_frequencies: AacSamplingFrequency,
    /// Channels (bitfield)
    pub channels: AacChannels,
    /// Variable bit rate support
    pub vbr: bool,
    /// Peak bit rate in bits per second, 0 when unspecified
    pub bitrate: u32,
}

impl AacCapabilities {
    /// Capabilities of the local AAC encoder
    #[must_use]
    pub const fn source_default() -> Self {
        Self {
            object_types: AacObjectType(AacObjectType::MPEG2_LC),
            sampling_frequencies: AacSamplingFrequency(
                AacSamplingFrequency::HZ_44100 | AacSamplingFrequency::HZ_48000,
            ),
            channels: AacChannels(AacChannels::MONO | AacChannels::STEREO),
            vbr: false,
            bitrate: AAC_DEFAULT_BITRATE,
        }
    }

    /// Decode the AAC block of a codec information element
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a well-formed AAC element.
    pub fn from_info(info: &CodecInfo) -> Result<Self, CodecError> {
        if info.codec_type()? != CodecType::Mpeg24Aac {
            return Err(CodecError::InvalidCodecType);
        }
        let p = info.params();
        if p.len() != AAC_PARAMS_LEN {
            return Err(CodecError::BadLength);
        }
        let caps = Self {
            object_types: AacObjectType(p[0]),
            sampling_frequencies: AacSamplingFrequency(
                (u16::from(p[1]) << 8) | u16::from(p[2] & 0xF0),
            ),
            channels: AacChannels(p[2] & 0x0C),
            vbr: p[3] & 0x80 != 0,
            bitrate: (u32::from(p[3] & 0x7F) << 16) | (u32::from(p[4]) << 8) | u32::from(p[5]),
        };
        if caps.object_types.0 == 0 || caps.sampling_frequencies.0 == 0 || caps.channels.0 == 0 {
            return Err(CodecError::InvalidParameters);
        }
        Ok(caps)
    }

    /// Encode as a codec information element
    #[must_use]
    pub fn to_info(&self) -> CodecInfo {
        let [freq_hi, freq_lo] = self.sampling_frequencies.0.to_be_bytes();
        let [_, rate_hi, rate_mid, rate_lo] = self.bitrate.to_be_bytes();
        let params = [
            self.object_types.0,
            freq_hi,
            (freq_lo & 0xF0) | (self.channels.0 & 0x0C),
            (u8::from(self.vbr) << 7) | (rate_hi & 0x7F),
            rate_mid,
            rate_lo,
        ];
        CodecInfo::new(MediaType::Audio, CodecType::Mpeg24Aac, &params).unwrap_or(CodecInfo::EMPTY)
    }

    /// Whether every bitfield has exactly one bit set
    #[must_use]
    pub const fn is_single_config(&self) -> bool {
        single_bit(self.object_types.0 as u16)
            && single_bit(self.sampling_frequencies.0)
            && single_bit(self.channels.0 as u16)
    }

    /// Whether `config` is a single configuration inside these capabilities
    #[must_use]
    pub const fn accepts_config(&self, config: &Self) -> bool {
        config.is_single_config()
            && self.object_types.0 & config.object_types.0 != 0
            && self.sampling_frequencies.0 & config.sampling_frequencies.0 != 0
            && self.channels.0 & config.channels.0 != 0
            && (self.bitrate == 0 || config.bitrate <= self.bitrate)
    }

    /// Choose one configuration supported by both sides
    ///
    /// 44.1 kHz is preferred over 48 kHz and stereo over mono unless the user
    /// asked otherwise. The bit rate is the smaller of both, a peer value of zero
    /// meaning the local rate.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotCompatible`] if any field has no common value.
    pub fn negotiate(&self, peer: &Self, prefs: &CodecUserConfig) -> Result<Self, CodecError> {
        let objects = self.object_types.0 & peer.object_types.0;
        let object = [AacObjectType::MPEG2_LC, AacObjectType::MPEG4_LC]
            .into_iter()
            .find(|bit| objects & bit != 0)
            .ok_or(CodecError::NotCompatible)?;

        let freqs = self.sampling_frequencies.0 & peer.sampling_frequencies.0;
        let freq = prefs
            .sample_rate
            .and_then(AacSamplingFrequency::from_hz)
            .filter(|bit| freqs & bit != 0)
            .or_else(|| {
                AacSamplingFrequency::PREFERENCE
                    .into_iter()
                    .find(|bit| freqs & bit != 0)
            })
            .ok_or(CodecError::NotCompatible)?;

        let channels = self.channels.0 & peer.channels.0;
        let order = match prefs.channel_mode {
            Some(ChannelMode::Mono) => [AacChannels::MONO, AacChannels::STEREO],
            _ => [AacChannels::STEREO, AacChannels::MONO],
        };
        let channel = order
            .into_iter()
            .find(|bit| channels & bit != 0)
            .ok_or(CodecError::NotCompatible)?;

        let bitrate = if peer.bitrate == 0 {
            self.bitrate
        } else {
            self.bitrate.min(peer.bitrate)
        };

        Ok(Self {
            object_types: AacObjectType(object),
            sampling_frequencies: AacSamplingFrequency(freq),
            channels: AacChannels(channel),
            vbr: self.vbr && peer.vbr,
            bitrate,
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
        let channel_mode = if self.channels.0 == AacChannels::MONO {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_sink(bitrate: u32) -> AacCapabilities {
        AacCapabilities {
            object_types: AacObjectType(AacObjectType::MPEG2_LC | AacObjectType::MPEG4_LC),
            sampling_frequencies: AacSamplingFrequency(
                AacSamplingFrequency::HZ_44100 | AacSamplingFrequency::HZ_48000,
            ),
            channels: AacChannels(AacChannels::MONO | AacChannels::STEREO),
            vbr: true,
            bitrate,
        }
    }

    #[test]
    fn test_aac_info_layout() {
        let info = AacCapabilities::source_default().to_info();
        // 320000 = 0x04E200
        assert_eq!(
            info.as_bytes(),
            &[8, 0x00, 0x02, 0x80, 0x01, 0x8C, 0x04, 0xE2, 0x00]
        );
        assert_eq!(
            AacCapabilities::from_info(&info),
            Ok(AacCapabilities::source_default())
        );
    }

    #[test]
    fn test_aac_negotiate_defaults() {
        let config = AacCapabilities::source_default()
            .negotiate(&peer_sink(256_000), &CodecUserConfig::default())
            .unwrap();
        assert_eq!(config.object_types.0, AacObjectType::MPEG2_LC);
        assert_eq!(config.sampling_frequencies.0, AacSamplingFrequency::HZ_44100);
        assert_eq!(config.channels.0, AacChannels::STEREO);
        assert_eq!(config.bitrate, 256_000);
        assert!(!config.vbr);
        assert!(config.is_single_config());
    }

    #[test]
    fn test_aac_peer_bitrate_zero_means_local() {
        let config = AacCapabilities::source_default()
            .negotiate(&peer_sink(0), &CodecUserConfig::default())
            .unwrap();
        assert_eq!(config.bitrate, AAC_DEFAULT_BITRATE);
    }

    #[test]
    fn test_aac_negotiate_requires_mpeg2_lc_overlap() {
        let mut peer = peer_sink(0);
        peer.object_types = AacObjectType(AacObjectType::MPEG4_LTP);
        assert_eq!(
            AacCapabilities::source_default().negotiate(&peer, &CodecUserConfig::default()),
            Err(CodecError::NotCompatible)
        );
    }

    #[test]
    fn test_aac_preferences() {
        let prefs = CodecUserConfig {
            sample_rate: Some(48_000),
            channel_mode: Some(ChannelMode::Mono),
            ..CodecUserConfig::default()
        };
        let config = AacCapabilities::source_default()
            .negotiate(&peer_sink(0), &prefs)
            .unwrap();
        let feeding = config.feeding().unwrap();
        assert_eq!(feeding.sample_rate, 48_000);
        assert_eq!(feeding.channel_mode, ChannelMode::Mono);
    }

    #[test]
    fn test_aac_accepts_config() {
        let local = AacCapabilities::source_default();
        let config = local
            .negotiate(&peer_sink(0), &CodecUserConfig::default())
            .unwrap();
        assert!(local.accepts_config(&config));
        assert!(!local.accepts_config(&local));
    }
}
