//! Local codec registry
//!
//! Holds the locally implemented codecs in priority order together with the
//! configuration last negotiated for each of them, the explicit user
//! preferences and the requested audio feeding. One source codec is "current":
//! its configuration drives the encoder.

use heapless::Vec;

use super::{
    AacCapabilities, CodecCapabilities, CodecError, CodecIndex, CodecInfo, CodecUserConfig,
    PcmFeeding, SbcCapabilities,
};
use crate::constants::CODEC_INDEX_MAX;

/// Outcome of a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigUpdate {
    /// Resulting codec configuration
    pub config: CodecInfo,
    /// The PCM feeding changed, the audio input must be restarted
    pub restart_input: bool,
    /// The over-the-air configuration changed, the stream must be reconfigured
    pub restart_output: bool,
    /// Anything observable changed and the application should be told
    pub config_updated: bool,
}

/// Codec summary reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecSummary {
    /// Codec index
    pub codec: CodecIndex,
    /// Priority, larger is preferred
    pub priority: u8,
    /// Configured feeding, if a configuration exists
    pub feeding: Option<PcmFeeding>,
}

/// Current and selectable codecs, as reported to the application
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecStatus {
    /// The codec driving the encoder
    pub current: Option<CodecSummary>,
    /// Codecs that were successfully negotiated with the peer
    pub selectable: Vec<CodecSummary, CODEC_INDEX_MAX>,
}

#[derive(Debug, Clone, Copy)]
struct CodecEntry {
    index: CodecIndex,
    local_caps: CodecCapabilities,
    config: Option<CodecCapabilities>,
    user_config: CodecUserConfig,
    audio_config: Option<PcmFeeding>,
}

impl CodecEntry {
    fn new(index: CodecIndex) -> Self {
        let local_caps = match index {
            CodecIndex::SourceSbc => CodecCapabilities::Sbc(SbcCapabilities::source_default()),
            CodecIndex::SourceAac => CodecCapabilities::Aac(AacCapabilities::source_default()),
            CodecIndex::SinkSbc => CodecCapabilities::Sbc(SbcCapabilities::sink_default()),
        };
        Self {
            index,
            local_caps,
            config: None,
            user_config: CodecUserConfig::default(),
            audio_config: None,
        }
    }

    /// User preferences first, then the requested audio feeding
    fn preferences(&self) -> CodecUserConfig {
        let feeding = self
            .audio_config
            .as_ref()
            .map(CodecUserConfig::from_feeding)
            .unwrap_or_default();
        CodecUserConfig {
            codec: Some(self.index),
            sample_rate: self.user_config.sample_rate.or(feeding.sample_rate),
            bits_per_sample: self.user_config.bits_per_sample.or(feeding.bits_per_sample),
            channel_mode: self.user_config.channel_mode.or(feeding.channel_mode),
        }
    }

    fn feeding(&self) -> Option<PcmFeeding> {
        self.config.and_then(|config| config.feeding().ok())
    }
}

/// Locally supported codecs in priority order
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    entries: Vec<CodecEntry, CODEC_INDEX_MAX>,
    current: Option<CodecIndex>,
}

impl CodecRegistry {
    /// Create a registry with the given source codec priority order, best first
    ///
    /// Unknown or duplicate entries are ignored and any source codec missing from
    /// `priorities` is appended in default order. The sink codec is always present.
    #[must_use]
    pub fn new(priorities: &[CodecIndex]) -> Self {
        let mut entries: Vec<CodecEntry, CODEC_INDEX_MAX> = Vec::new();
        let defaults = CodecIndex::SOURCE_DEFAULT_PRIORITY;
        for &index in priorities.iter().chain(defaults.iter()) {
            if index.is_source() && !entries.iter().any(|e| e.index == index) {
                entries.push(CodecEntry::new(index)).ok();
            }
        }
        entries.push(CodecEntry::new(CodecIndex::SinkSbc)).ok();
        Self {
            entries,
            current: None,
        }
    }

    /// Source codecs, best first
    pub fn ordered_source_codecs(&self) -> impl Iterator<Item = CodecIndex> + '_ {
        self.entries
            .iter()
            .map(|e| e.index)
            .filter(|index| index.is_source())
    }

    /// Local capabilities of a codec as a codec information element
    #[must_use]
    pub fn local_caps(&self, index: CodecIndex) -> Option<CodecInfo> {
        self.entry(index).map(|e| e.local_caps.to_info())
    }

    /// The current source codec and its configuration
    #[must_use]
    pub fn current_config(&self) -> Option<(CodecIndex, CodecInfo)> {
        let entry = self.entry(self.current?)?;
        Some((entry.index, entry.config?.to_info()))
    }

    /// PCM feeding of the current source codec
    #[must_use]
    pub fn current_feeding(&self) -> Option<PcmFeeding> {
        self.entry(self.current?)?.feeding()
    }

    /// Configuration of the sink codec, if one was negotiated
    #[must_use]
    pub fn sink_config(&self) -> Option<CodecInfo> {
        self.entry(CodecIndex::SinkSbc)?
            .config
            .map(|config| config.to_info())
    }

    /// Whether a source codec has explicit user preferences
    #[must_use]
    pub fn has_user_preferences(&self, index: CodecIndex) -> bool {
        self.entry(index)
            .is_some_and(|e| e.user_config.has_preferences())
    }

    /// Negotiate a source codec against a peer sink capability
    ///
    /// With `is_capability` the peer element is a capability and a configuration
    /// is derived from it; otherwise it must already be a configuration within our
    /// capabilities. With `select_current` the codec becomes the current codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec is not supported locally or no configuration
    /// is possible.
    pub fn set_codec_config(
        &mut self,
        peer: &CodecInfo,
        is_capability: bool,
        select_current: bool,
    ) -> Result<CodecInfo, CodecError> {
        let index = CodecIndex::source_for(peer).ok_or(CodecError::NotSupportedCodecType)?;
        let entry = self
            .entry_mut(index)
            .ok_or(CodecError::NotSupportedCodecType)?;
        let peer_caps = CodecCapabilities::from_info(peer)?;
        let config = if is_capability {
            entry.local_caps.negotiate(&peer_caps, &entry.preferences())?
        } else if entry.local_caps.accepts_config(&peer_caps) {
            peer_caps
        } else {
            return Err(CodecError::NotCompatible);
        };
        entry.config = Some(config);
        if select_current {
            self.current = Some(index);
        }
        Ok(config.to_info())
    }

    /// Apply explicit user preferences, renegotiating against `peer_caps`
    ///
    /// `peer_caps` is the peer sink capability matching the target codec.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration satisfies the peer; preferences are
    /// left unchanged in that case.
    pub fn set_user_config(
        &mut self,
        user: &CodecUserConfig,
        peer_caps: &CodecInfo,
    ) -> Result<ConfigUpdate, CodecError> {
        let target = user
            .codec
            .or(self.current)
            .ok_or(CodecError::NotSupportedCodecType)?;
        if !target.is_source() {
            return Err(CodecError::NotSupportedCodecType);
        }
        let old_current = self.current;
        let old_feeding = self.current_feeding();
        let old_config = self.current_config().map(|(_, info)| info);

        let entry = self
            .entry_mut(target)
            .ok_or(CodecError::NotSupportedCodecType)?;
        let old_user = entry.user_config;
        entry.user_config = *user;
        let peer = CodecCapabilities::from_info(peer_caps)?;
        let config = match entry.local_caps.negotiate(&peer, &entry.preferences()) {
            Ok(config) => config,
            Err(e) => {
                entry.user_config = old_user;
                return Err(e);
            }
        };
        entry.config = Some(config);
        let user_changed = old_user != *user;
        self.current = Some(target);

        let new_config = config.to_info();
        let restart_output = old_current != Some(target) || old_config != Some(new_config);
        let restart_input = old_feeding != config.feeding().ok();
        Ok(ConfigUpdate {
            config: new_config,
            restart_input,
            restart_output,
            config_updated: restart_output || restart_input || user_changed,
        })
    }

    /// Apply an audio feeding request to the current codec
    ///
    /// # Errors
    ///
    /// Returns an error if there is no current codec or no configuration
    /// satisfies the peer.
    pub fn set_audio_config(
        &mut self,
        feeding: &PcmFeeding,
        peer_caps: &CodecInfo,
    ) -> Result<ConfigUpdate, CodecError> {
        let index = self.current.ok_or(CodecError::NotSupportedCodecType)?;
        let entry = self
            .entry_mut(index)
            .ok_or(CodecError::NotSupportedCodecType)?;
        let old_config = entry.config;
        let old_audio = entry.audio_config;
        entry.audio_config = Some(*feeding);
        let peer = CodecCapabilities::from_info(peer_caps)?;
        let config = match entry.local_caps.negotiate(&peer, &entry.preferences()) {
            Ok(config) => config,
            Err(e) => {
                entry.audio_config = old_audio;
                return Err(e);
            }
        };
        entry.config = Some(config);
        let restart_output = old_config != Some(config);
        Ok(ConfigUpdate {
            config: config.to_info(),
            restart_input: false,
            restart_output,
            config_updated: restart_output || old_audio != Some(*feeding),
        })
    }

    /// Apply a configuration chosen by the peer
    ///
    /// Explicit user preferences win over the peer's choice: the configuration we
    /// already hold for that codec is kept and `restart_output` asks for a
    /// reconfiguration towards it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is outside our capabilities.
    pub fn set_ota_config(&mut self, ota: &CodecInfo) -> Result<ConfigUpdate, CodecError> {
        let index = CodecIndex::source_for(ota).ok_or(CodecError::NotSupportedCodecType)?;
        let ota_caps = CodecCapabilities::from_info(ota)?;
        let old_current = self.current;
        let old_feeding = self.current_feeding();
        let user_override = self.has_user_preferences(index)
            || old_current.is_some_and(|current| self.has_user_preferences(current));

        let entry = self
            .entry_mut(index)
            .ok_or(CodecError::NotSupportedCodecType)?;
        if !entry.local_caps.accepts_config(&ota_caps) {
            return Err(CodecError::NotCompatible);
        }
        let old_config = entry.config;
        let result = match old_config {
            Some(ours) if user_override => ours,
            _ => ota_caps,
        };
        entry.config = Some(result);
        self.current = Some(index);

        let restart_output = result != ota_caps;
        let restart_input = old_feeding != result.feeding().ok();
        Ok(ConfigUpdate {
            config: result.to_info(),
            restart_input,
            restart_output,
            config_updated: restart_input || old_current != Some(index) || old_config != Some(result),
        })
    }

    /// Check a configuration chosen by a peer source against our sink codec and
    /// store it
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is outside our sink capabilities.
    pub fn set_sink_config(&mut self, config: &CodecInfo) -> Result<CodecInfo, CodecError> {
        CodecIndex::sink_for(config).ok_or(CodecError::NotSupportedCodecType)?;
        let caps = CodecCapabilities::from_info(config)?;
        let entry = self
            .entry_mut(CodecIndex::SinkSbc)
            .ok_or(CodecError::NotSupportedCodecType)?;
        if !entry.local_caps.accepts_config(&caps) {
            return Err(CodecError::NotCompatible);
        }
        entry.config = Some(caps);
        Ok(*config)
    }

    /// Build the configuration we request from a peer source
    ///
    /// # Errors
    ///
    /// Returns an error if we cannot decode anything the peer offers.
    pub fn build_sink_config(&mut self, peer_src_caps: &CodecInfo) -> Result<CodecInfo, CodecError> {
        CodecIndex::sink_for(peer_src_caps).ok_or(CodecError::NotSupportedCodecType)?;
        let peer = CodecCapabilities::from_info(peer_src_caps)?;
        let entry = self
            .entry_mut(CodecIndex::SinkSbc)
            .ok_or(CodecError::NotSupportedCodecType)?;
        let config = entry
            .local_caps
            .negotiate(&peer, &CodecUserConfig::default())?;
        entry.config = Some(config);
        Ok(config.to_info())
    }

    /// Current and selectable codecs
    #[must_use]
    pub fn status(&self) -> CodecStatus {
        let sources = self.entries.iter().filter(|e| e.index.is_source());
        let count = sources.clone().count();
        let mut status = CodecStatus::default();
        for (position, entry) in sources.enumerate() {
            let summary = CodecSummary {
                codec: entry.index,
                priority: u8::try_from(count - position).unwrap_or(u8::MAX),
                feeding: entry.feeding(),
            };
            if Some(entry.index) == self.current {
                status.current = Some(summary);
            }
            if entry.config.is_some() {
                status.selectable.push(summary).ok();
            }
        }
        status
    }

    /// Forget all negotiated configurations, keeping user preferences
    pub fn clear_configs(&mut self) {
        for entry in &mut self.entries {
            entry.config = None;
        }
        self.current = None;
    }

    fn entry(&self, index: CodecIndex) -> Option<&CodecEntry> {
        self.entries.iter().find(|e| e.index == index)
    }

    fn entry_mut(&mut self, index: CodecIndex) -> Option<&mut CodecEntry> {
        self.entries.iter_mut().find(|e| e.index == index)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(&CodecIndex::SOURCE_DEFAULT_PRIORITY)
    }
}
