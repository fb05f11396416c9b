//! Codec capability negotiator
//!
//! Keeps, per stream control block, the capabilities the peer advertised during
//! discovery and computes the one configuration we stream with. The resolved
//! configuration is also published to a process-wide cell so the media side can
//! read it without going through the control plane.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;

use crate::avdtp::{ConfigReject, ContentProtection, ErrorCode, Seid, ServiceCategory, StreamConfig, Tsep};
use crate::codec::registry::CodecStatus;
use crate::codec::{CodecError, CodecIndex, CodecInfo, CodecRegistry, CodecUserConfig, PcmFeeding, PeerParams};
use crate::constants::{CODEC_INDEX_MAX, MAX_STREAMS};
use crate::platform::PeerFeatures;
use crate::ssm::ScbHandle;
use crate::{AvOptions, BluetoothAddress};

/// SCMS-T copy protection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CopyProtection {
    /// Content may be copied freely, SCMS-T is not required
    CopyFree = 0,
    /// One generation of copies is allowed
    CopyOnce = 1,
    /// Content must not be copied
    CopyNever = 2,
}

/// Snapshot of the configuration the encoder runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecSnapshot {
    /// Resolved codec configuration
    pub config: CodecInfo,
    /// SCMS-T header byte to prepend to each media payload
    pub cp_header: Option<u8>,
}

static CURRENT_CODEC: Mutex<CriticalSectionRawMutex, Cell<CodecSnapshot>> =
    Mutex::new(Cell::new(CodecSnapshot {
        config: CodecInfo::EMPTY,
        cp_header: None,
    }));

/// The codec configuration last selected by the control plane
#[must_use]
pub fn current_codec_snapshot() -> CodecSnapshot {
    CURRENT_CODEC.lock(Cell::get)
}

fn publish_snapshot(snapshot: CodecSnapshot) {
    CURRENT_CODEC.lock(|cell| cell.set(snapshot));
}

/// One peer endpoint capability recorded during the capability fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerEndpoint {
    /// Advertised codec capability
    pub codec_caps: CodecInfo,
    /// Index into the stream control block's discovery results
    pub sep_index: usize,
    /// Peer endpoint identifier
    pub seid: Seid,
    /// Advertised content protection
    pub protect: ContentProtection,
}

/// A reconfiguration the negotiator wants applied to an open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReconfigRequest {
    /// Stream to reconfigure
    pub handle: ScbHandle,
    /// Discovery index of the peer endpoint to use
    pub sep_index: usize,
    /// New codec configuration
    pub codec_info: CodecInfo,
    /// Content protection to request
    pub protect: ContentProtection,
}

/// Result of recording one peer capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapabilityOutcome {
    /// More capabilities are expected before a choice is made
    Pending,
    /// All capabilities are in and none is usable
    NoMatch,
    /// Configure the peer endpoint at `sep_index` with `config`
    Configure {
        /// Discovery index of the chosen peer endpoint
        sep_index: usize,
        /// Configuration to send
        config: StreamConfig,
    },
    /// The peer configured us; optionally move it to our preferred configuration
    Acceptor {
        /// Reconfiguration to request, if any
        reconfigure: Option<ReconfigRequest>,
    },
}

#[derive(Debug, Clone, Default)]
struct PeerEntry {
    addr: BluetoothAddress,
    sinks: Vec<PeerEndpoint, CODEC_INDEX_MAX>,
    srcs: Vec<PeerEndpoint, CODEC_INDEX_MAX>,
    selected_sink: Option<usize>,
    selected_src: Option<usize>,
    codec_config: CodecInfo,
    num_sinks: u8,
    num_srcs: u8,
    num_seps: u8,
    num_rx_sinks: u8,
    num_rx_srcs: u8,
    cp_active: bool,
    acp: bool,
    reconfig_needed: bool,
    opened: bool,
    mtu: u16,
    connect_to: Option<Tsep>,
}

impl PeerEntry {
    fn selected_sink(&self) -> Option<&PeerEndpoint> {
        self.selected_sink.and_then(|i| self.sinks.get(i))
    }
}

/// Per-peer codec negotiation state and the local codec registry
#[derive(Debug, Clone)]
pub struct Negotiator {
    peers: [PeerEntry; MAX_STREAMS],
    codecs: CodecRegistry,
    copy_protection: CopyProtection,
    cp_active: bool,
    codec_config: CodecInfo,
    config_updated: bool,
}

impl Negotiator {
    /// Create a negotiator for the given options
    #[must_use]
    pub fn new(options: &AvOptions) -> Self {
        let mut negotiator = Self {
            peers: core::array::from_fn(|_| PeerEntry::default()),
            codecs: CodecRegistry::new(options.codec_priorities),
            copy_protection: options.copy_protection,
            cp_active: false,
            codec_config: CodecInfo::EMPTY,
            config_updated: false,
        };
        negotiator.init_default_codec();
        negotiator
    }

    /// Forget all peers and negotiated configurations
    ///
    /// User preferences and the copy protection policy are kept.
    pub fn reset(&mut self) {
        for peer in &mut self.peers {
            *peer = PeerEntry::default();
        }
        self.codecs.clear_configs();
        self.cp_active = false;
        self.init_default_codec();
    }

    fn init_default_codec(&mut self) {
        self.codec_config = self
            .codecs
            .local_caps(CodecIndex::SourceSbc)
            .and_then(|caps| {
                self.codecs
                    .set_codec_config(&caps, true, false)
                    .ok()
            })
            .unwrap_or(CodecInfo::EMPTY);
        publish_snapshot(self.snapshot());
    }

    /// Change the copy protection policy
    pub fn set_copy_protection(&mut self, policy: CopyProtection) {
        self.copy_protection = policy;
    }

    /// Local capability advertised by the endpoint serving `codec`
    #[must_use]
    pub fn local_caps(&self, codec: CodecIndex) -> Option<CodecInfo> {
        self.codecs.local_caps(codec)
    }

    /// Source codecs, best first
    pub fn ordered_source_codecs(&self) -> impl Iterator<Item = CodecIndex> + '_ {
        self.codecs.ordered_source_codecs()
    }

    /// Record the outcome of DISCOVER
    ///
    /// `local_role` is the role we connect as; the peer is expected to offer the
    /// opposite endpoint type.
    pub fn record_discovery_result(
        &mut self,
        handle: ScbHandle,
        addr: BluetoothAddress,
        num_seps: u8,
        num_sinks: u8,
        num_srcs: u8,
        local_role: Tsep,
    ) {
        let Some(peer) = self.peers.get_mut(handle.index()) else {
            error!("[CODEC] no peer entry for {}", handle.raw());
            return;
        };
        if peer.opened {
            error!("[CODEC] peer {} already opened", handle.raw());
        }
        debug!(
            "[CODEC] discovery {}: seps={} sinks={} srcs={}",
            handle.raw(),
            num_seps,
            num_sinks,
            num_srcs
        );
        peer.addr = addr;
        peer.num_seps = num_seps;
        peer.num_sinks = num_sinks;
        peer.num_srcs = num_srcs;
        peer.num_rx_sinks = 0;
        peer.num_rx_srcs = 0;
        peer.sinks.clear();
        peer.srcs.clear();
        peer.connect_to = Some(local_role.opposite());
    }

    /// Record one peer capability returned by GET_CAPABILITIES
    ///
    /// Only once the last expected capability arrives, or no more fit, is a
    /// configuration chosen.
    pub fn record_peer_capability(
        &mut self,
        handle: ScbHandle,
        caps: &StreamConfig,
        sep_index: usize,
        seid: Seid,
    ) -> CapabilityOutcome {
        let Some(peer) = self.peers.get(handle.index()) else {
            error!("[CODEC] no peer entry for {}", handle.raw());
            return CapabilityOutcome::NoMatch;
        };
        let endpoint = PeerEndpoint {
            codec_caps: caps.codec_info,
            sep_index,
            seid,
            protect: caps.protect,
        };
        if peer.connect_to == Some(Tsep::Source) {
            self.record_peer_source(handle, endpoint)
        } else {
            self.record_peer_sink(handle, endpoint)
        }
    }

    fn record_peer_sink(&mut self, handle: ScbHandle, endpoint: PeerEndpoint) -> CapabilityOutcome {
        let index = handle.index();
        let peer = &mut self.peers[index];
        peer.num_rx_sinks = peer.num_rx_sinks.saturating_add(1);

        if CodecIndex::source_for(&endpoint.codec_caps).is_some() {
            if peer.sinks.push(endpoint).is_err() {
                warn!("[CODEC] peer sink capabilities overflow, dropping seid {}", endpoint.seid);
            }
        } else {
            debug!("[CODEC] ignoring peer sink {} with {}", endpoint.seid, endpoint.codec_caps.codec_name());
        }

        if peer.num_rx_sinks != peer.num_sinks && !peer.sinks.is_full() {
            return CapabilityOutcome::Pending;
        }

        let Some(sink_index) = self.select_codec(handle) else {
            warn!("[CODEC] cannot set up codec for peer sink of {}", handle.raw());
            return CapabilityOutcome::NoMatch;
        };
        let peer = &self.peers[index];
        let sep_index = peer.sinks[sink_index].sep_index;
        let protect = if peer.cp_active {
            ContentProtection::SCMS_T
        } else {
            ContentProtection::NONE
        };

        if peer.acp {
            let reconfigure = peer.reconfig_needed.then_some(ReconfigRequest {
                handle,
                sep_index,
                codec_info: peer.codec_config,
                protect,
            });
            return CapabilityOutcome::Acceptor { reconfigure };
        }
        CapabilityOutcome::Configure {
            sep_index,
            config: StreamConfig {
                codec_info: peer.codec_config,
                protect,
                ..StreamConfig::default()
            },
        }
    }

    fn record_peer_source(&mut self, handle: ScbHandle, endpoint: PeerEndpoint) -> CapabilityOutcome {
        let peer = &mut self.peers[handle.index()];
        peer.num_rx_srcs = peer.num_rx_srcs.saturating_add(1);

        if CodecIndex::sink_for(&endpoint.codec_caps).is_some() && peer.srcs.push(endpoint).is_err() {
            warn!("[CODEC] peer source capabilities overflow, dropping seid {}", endpoint.seid);
        }

        if peer.num_rx_srcs != peer.num_srcs && !peer.srcs.is_full() {
            return CapabilityOutcome::Pending;
        }

        let Some(src_index) = peer
            .srcs
            .iter()
            .position(|src| CodecIndex::sink_for(&src.codec_caps).is_some())
        else {
            return CapabilityOutcome::NoMatch;
        };
        let src = peer.srcs[src_index];
        let Ok(config) = self.codecs.build_sink_config(&src.codec_caps) else {
            return CapabilityOutcome::NoMatch;
        };

        let peer = &mut self.peers[handle.index()];
        peer.selected_src = Some(src_index);
        peer.codec_config = config;
        peer.cp_active = false;
        self.cp_active = false;
        CapabilityOutcome::Configure {
            sep_index: src.sep_index,
            config: StreamConfig {
                codec_info: config,
                ..StreamConfig::default()
            },
        }
    }

    /// Select the codec for a peer from its recorded sink capabilities
    ///
    /// Local source codecs are tried in priority order; the first peer sink of
    /// the same codec that satisfies the copy protection policy wins. Every
    /// codec the peer supports is also negotiated so it shows as selectable.
    /// Returns the index of the chosen peer sink.
    pub fn select_codec(&mut self, handle: ScbHandle) -> Option<usize> {
        let index = handle.index();
        let order: Vec<CodecIndex, CODEC_INDEX_MAX> = self.codecs.ordered_source_codecs().collect();

        for &codec in &order {
            if let Some(sink) = self.find_peer_sink(index, codec) {
                let caps = self.peers[index].sinks[sink].codec_caps;
                if self.codecs.set_codec_config(&caps, true, false).is_err() {
                    debug!("[CODEC] {} not selectable for peer", codec.name());
                }
            }
        }

        let mut selected = None;
        for &codec in &order {
            let Some(sink) = self.find_peer_sink(index, codec) else {
                continue;
            };
            let endpoint = self.peers[index].sinks[sink];
            match self.codecs.set_codec_config(&endpoint.codec_caps, true, true) {
                Ok(config) => {
                    info!("[CODEC] selected {} for {}", codec.name(), handle.raw());
                    self.peers[index].selected_sink = Some(sink);
                    self.save_codec_config(index, config, &endpoint.protect);
                    selected = Some(sink);
                    break;
                }
                Err(_) => {
                    warn!("[CODEC] cannot configure {} for peer", codec.name());
                }
            }
        }

        self.config_updated = true;
        selected
    }

    fn find_peer_sink(&self, index: usize, codec: CodecIndex) -> Option<usize> {
        let peer = self.peers.get(index)?;
        peer.sinks.iter().position(|sink| {
            if CodecIndex::source_for(&sink.codec_caps) != Some(codec) {
                return false;
            }
            if self.sink_supports_cp(sink) {
                true
            } else {
                debug!("[CODEC] peer sink {} lacks copy protection", sink.seid);
                false
            }
        })
    }

    fn sink_supports_cp(&self, sink: &PeerEndpoint) -> bool {
        self.copy_protection == CopyProtection::CopyFree || sink.protect.has_scms_t()
    }

    fn save_codec_config(&mut self, index: usize, config: CodecInfo, protect: &ContentProtection) {
        let cp_active = protect.has_scms_t();
        self.cp_active = cp_active;
        if let Some(peer) = self.peers.get_mut(index) {
            peer.cp_active = cp_active;
        }
        self.store_codec_config(index, config);
    }

    /// Keeps the content protection state as is
    fn store_codec_config(&mut self, index: usize, config: CodecInfo) {
        self.codec_config = config;
        if let Some(peer) = self.peers.get_mut(index) {
            peer.codec_config = config;
        }
        publish_snapshot(self.snapshot());
    }

    /// Check a configuration chosen by the peer (we are the acceptor)
    ///
    /// Returns whether a reconfiguration towards our preferred configuration
    /// will be needed once the peer's capabilities are known.
    ///
    /// # Errors
    ///
    /// Returns the category and reason to reject the SET_CONFIGURATION with.
    pub fn set_config(
        &mut self,
        handle: ScbHandle,
        addr: BluetoothAddress,
        codec_info: &CodecInfo,
        protect: &ContentProtection,
        local_role: Tsep,
    ) -> Result<bool, ConfigReject> {
        let index = handle.index();
        if index >= self.peers.len() {
            return Err(ConfigReject {
                category: ServiceCategory::MediaCodec,
                error: ErrorCode::BUSY,
            });
        }
        if self.peers[index].opened {
            error!("[CODEC] set config on opened peer {}", handle.raw());
        }

        if protect.count != 0 && (protect.count != 1 || !protect.has_scms_t()) {
            return Err(ConfigReject {
                category: ServiceCategory::ContentProtection,
                error: ErrorCode::BAD_CP_TYPE,
            });
        }

        let wrong_codec = ConfigReject {
            category: ServiceCategory::MediaCodec,
            error: ErrorCode::WRONG_CODEC,
        };
        let mut reconfig_needed = false;
        match local_role {
            Tsep::Sink => {
                let config = self.codecs.set_sink_config(codec_info).map_err(|_| wrong_codec)?;
                self.save_codec_config(index, config, protect);
            }
            Tsep::Source => {
                let restart_output = self.set_ota_config(index, codec_info, protect).map_err(|_| {
                    warn!("[CODEC] peer configuration {} rejected", codec_info.codec_name());
                    wrong_codec
                })?;
                reconfig_needed = restart_output || (protect.count == 1 && !self.cp_active);
            }
        }

        let peer = &mut self.peers[index];
        peer.addr = addr;
        peer.acp = true;
        peer.reconfig_needed = reconfig_needed;
        info!(
            "[CODEC] accepted peer configuration {}, reconfig needed: {}",
            codec_info.codec_name(),
            reconfig_needed
        );
        Ok(reconfig_needed)
    }

    fn set_ota_config(
        &mut self,
        index: usize,
        ota: &CodecInfo,
        protect: &ContentProtection,
    ) -> Result<bool, CodecError> {
        let codec = CodecIndex::source_for(ota).ok_or(CodecError::NotSupportedCodecType)?;
        let sink = self.find_peer_sink(index, codec);
        if !self.peers[index].sinks.is_empty() && sink.is_none() {
            return Err(CodecError::NotCompatible);
        }

        let update = self.codecs.set_ota_config(ota)?;
        if let Some(sink) = sink {
            self.peers[index].selected_sink = Some(sink);
        }
        if update.restart_output {
            self.save_codec_config(index, update.config, protect);
        } else {
            self.store_codec_config(index, update.config);
        }
        if update.restart_input || update.config_updated {
            self.config_updated = true;
        }
        Ok(update.restart_output)
    }

    /// Apply explicit user codec preferences to the open peer
    ///
    /// Returns the reconfiguration to apply when the over-the-air configuration
    /// changes. The application is told about the outcome either way.
    ///
    /// # Errors
    ///
    /// Returns an error if no peer is open or the peer cannot take the
    /// requested configuration.
    pub fn set_user_codec_config(
        &mut self,
        user: &CodecUserConfig,
    ) -> Result<Option<ReconfigRequest>, CodecError> {
        self.config_updated = true;
        let (index, handle) = self.opened_peer().ok_or(CodecError::NotSupportedCodecType)?;

        let sink = match user.codec {
            Some(codec) => self.find_peer_sink(index, codec),
            None => self.peers[index].selected_sink,
        }
        .ok_or(CodecError::NotSupportedCodecType)?;
        let endpoint = self.peers[index].sinks[sink];

        let update = self.codecs.set_user_config(user, &endpoint.codec_caps)?;
        if !update.restart_output {
            return Ok(None);
        }
        self.peers[index].selected_sink = Some(sink);
        self.save_codec_config(index, update.config, &endpoint.protect);
        Ok(Some(ReconfigRequest {
            handle,
            sep_index: endpoint.sep_index,
            codec_info: update.config,
            protect: self.active_protection(index),
        }))
    }

    /// Apply a PCM feeding request from the audio path to the open peer
    ///
    /// # Errors
    ///
    /// Returns an error if no peer is open or no configuration satisfies the
    /// peer.
    pub fn set_audio_feeding_config(
        &mut self,
        feeding: &PcmFeeding,
    ) -> Result<Option<ReconfigRequest>, CodecError> {
        let (index, handle) = self.opened_peer().ok_or(CodecError::NotSupportedCodecType)?;
        let endpoint = *self.peers[index]
            .selected_sink()
            .ok_or(CodecError::NotSupportedCodecType)?;

        let update = self.codecs.set_audio_config(feeding, &endpoint.codec_caps)?;
        if update.config_updated {
            self.config_updated = true;
        }
        if !update.restart_output {
            return Ok(None);
        }
        self.save_codec_config(index, update.config, &endpoint.protect);
        Ok(Some(ReconfigRequest {
            handle,
            sep_index: endpoint.sep_index,
            codec_info: update.config,
            protect: self.active_protection(index),
        }))
    }

    fn active_protection(&self, index: usize) -> ContentProtection {
        if self.peers.get(index).is_some_and(|p| p.cp_active) {
            ContentProtection::SCMS_T
        } else {
            ContentProtection::NONE
        }
    }

    fn opened_peer(&self) -> Option<(usize, ScbHandle)> {
        self.peers
            .iter()
            .position(|peer| peer.opened)
            .map(|index| (index, ScbHandle::from_index(index)))
    }

    /// The stream opened with the given media MTU
    pub fn on_open(&mut self, handle: ScbHandle, mtu: u16) {
        if let Some(peer) = self.peers.get_mut(handle.index()) {
            peer.opened = true;
            peer.mtu = mtu;
        } else {
            error!("[CODEC] open for unknown peer {}", handle.raw());
        }
    }

    /// The stream closed; all peer state is dropped
    pub fn on_close(&mut self, handle: ScbHandle) {
        if let Some(peer) = self.peers.get_mut(handle.index()) {
            *peer = PeerEntry::default();
        }
    }

    /// The media MTU of an open stream changed
    pub fn update_mtu(&mut self, handle: ScbHandle, mtu: u16) {
        if let Some(peer) = self.peers.get_mut(handle.index()) {
            peer.mtu = mtu;
        }
    }

    /// Encoder parameters derived from all open peers
    #[must_use]
    pub fn peer_params(&self, features: PeerFeatures) -> PeerParams {
        let peer_mtu = self
            .peers
            .iter()
            .filter(|peer| peer.opened)
            .map(|peer| peer.mtu)
            .min()
            .unwrap_or(u16::MAX);
        PeerParams {
            peer_mtu,
            is_peer_edr: features.edr_2mbps || features.edr_3mbps,
            peer_supports_3mbps: features.edr_3mbps,
        }
    }

    /// The resolved configuration and content protection header
    #[must_use]
    pub fn snapshot(&self) -> CodecSnapshot {
        CodecSnapshot {
            config: self.codec_config,
            cp_header: self.cp_header_byte(),
        }
    }

    /// The resolved codec configuration
    #[must_use]
    pub fn current_config(&self) -> CodecInfo {
        self.codec_config
    }

    /// Configuration resolved for one peer
    #[must_use]
    pub fn peer_config(&self, handle: ScbHandle) -> Option<CodecInfo> {
        self.peers
            .get(handle.index())
            .map(|peer| peer.codec_config)
            .filter(|config| !config.is_empty())
    }

    /// SCMS-T header byte for media packets, `None` when inactive
    #[must_use]
    pub fn cp_header_byte(&self) -> Option<u8> {
        self.cp_active.then_some(self.copy_protection as u8)
    }

    /// Whether SCMS-T is active on the current stream
    #[must_use]
    pub const fn cp_active(&self) -> bool {
        self.cp_active
    }

    /// Current and selectable codecs
    #[must_use]
    pub fn codec_status(&self) -> CodecStatus {
        self.codecs.status()
    }

    /// Whether the codec status changed since the last call
    pub fn take_config_updated(&mut self) -> bool {
        core::mem::take(&mut self.config_updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AacCapabilities, SbcCapabilities};

    const PEER: BluetoothAddress = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);

    fn handle() -> ScbHandle {
        ScbHandle::from_index(0)
    }

    fn sink_caps(info: CodecInfo, protect: ContentProtection) -> StreamConfig {
        StreamConfig {
            codec_info: info,
            protect,
            ..StreamConfig::default()
        }
    }

    fn sbc_sink() -> CodecInfo {
        SbcCapabilities::sink_default().to_info()
    }

    fn aac_sink() -> CodecInfo {
        AacCapabilities::source_default().to_info()
    }

    fn negotiator(copy_protection: CopyProtection) -> Negotiator {
        Negotiator::new(&AvOptions {
            copy_protection,
            ..AvOptions::default()
        })
    }

    #[test]
    fn test_last_capability_selects_highest_priority() {
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);

        let first = n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::NONE), 0, 1);
        assert_eq!(first, CapabilityOutcome::Pending);

        let last = n.record_peer_capability(handle(), &sink_caps(aac_sink(), ContentProtection::NONE), 1, 2);
        match last {
            CapabilityOutcome::Configure { sep_index, config } => {
                assert_eq!(sep_index, 1);
                assert_eq!(config.codec_info.codec_name(), "AAC");
                assert_eq!(config.protect, ContentProtection::NONE);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(n.take_config_updated());
        assert!(!n.take_config_updated());
    }

    #[test]
    fn test_selection_is_idempotent() {
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);
        n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::NONE), 0, 1);
        n.record_peer_capability(handle(), &sink_caps(aac_sink(), ContentProtection::NONE), 1, 2);

        let first = (n.select_codec(handle()), n.current_config());
        let second = (n.select_codec(handle()), n.current_config());
        assert_eq!(first, second);
        assert_eq!(n.peer_config(handle()), Some(first.1));
    }

    #[test]
    fn test_scms_t_filtering_falls_through() {
        let mut n = negotiator(CopyProtection::CopyNever);
        n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);
        n.record_peer_capability(handle(), &sink_caps(aac_sink(), ContentProtection::NONE), 0, 1);
        let outcome = n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::SCMS_T), 1, 2);

        match outcome {
            CapabilityOutcome::Configure { sep_index, config } => {
                assert_eq!(sep_index, 1);
                assert_eq!(config.codec_info.codec_name(), "SBC");
                assert_eq!(config.protect, ContentProtection::SCMS_T);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(n.cp_active());
        assert_eq!(n.cp_header_byte(), Some(CopyProtection::CopyNever as u8));
    }

    #[test]
    fn test_scms_t_picks_protected_sink_of_same_codec() {
        let unprotected = sink_caps(sbc_sink(), ContentProtection::NONE);
        let protected = sink_caps(sbc_sink(), ContentProtection::SCMS_T);

        // Either discovery order ends on the protected sink
        for (caps, expected) in [([unprotected, protected], 1), ([protected, unprotected], 0)] {
            let mut n = negotiator(CopyProtection::CopyNever);
            n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);
            assert_eq!(n.record_peer_capability(handle(), &caps[0], 0, 1), CapabilityOutcome::Pending);
            match n.record_peer_capability(handle(), &caps[1], 1, 2) {
                CapabilityOutcome::Configure { sep_index, config } => {
                    assert_eq!(sep_index, expected);
                    assert_eq!(config.codec_info.codec_name(), "SBC");
                    assert_eq!(config.protect, ContentProtection::SCMS_T);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
            assert!(n.cp_active());
        }

        // Without the requirement the first sink wins
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);
        n.record_peer_capability(handle(), &unprotected, 0, 1);
        match n.record_peer_capability(handle(), &protected, 1, 2) {
            CapabilityOutcome::Configure { sep_index, config } => {
                assert_eq!(sep_index, 0);
                assert_eq!(config.protect, ContentProtection::NONE);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!n.cp_active());
    }

    #[test]
    fn test_no_protected_sink_is_no_match() {
        let mut n = negotiator(CopyProtection::CopyNever);
        n.record_discovery_result(handle(), PEER, 1, 1, 0, Tsep::Source);
        let outcome = n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::NONE), 0, 1);
        assert_eq!(outcome, CapabilityOutcome::NoMatch);
    }

    #[test]
    fn test_list_full_counts_as_last() {
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 6, 6, 0, Tsep::Source);
        let caps = sink_caps(sbc_sink(), ContentProtection::NONE);
        assert_eq!(n.record_peer_capability(handle(), &caps, 0, 1), CapabilityOutcome::Pending);
        assert_eq!(n.record_peer_capability(handle(), &caps, 1, 2), CapabilityOutcome::Pending);
        assert!(matches!(
            n.record_peer_capability(handle(), &caps, 2, 3),
            CapabilityOutcome::Configure { sep_index: 0, .. }
        ));
    }

    #[test]
    fn test_acceptor_rejects_unknown_protection() {
        let mut n = negotiator(CopyProtection::CopyFree);
        let dtcp = ContentProtection {
            count: 1,
            info: [0x02, 0x01, 0x00],
        };
        let result = n.set_config(handle(), PEER, &sbc_sink(), &dtcp, Tsep::Source);
        assert_eq!(
            result,
            Err(ConfigReject {
                category: ServiceCategory::ContentProtection,
                error: ErrorCode::BAD_CP_TYPE,
            })
        );
    }

    #[test]
    fn test_acceptor_scms_t_needs_reconfig() {
        let mut n = negotiator(CopyProtection::CopyFree);
        let config = SbcCapabilities::source_default().to_info();
        let config = n.codecs.set_codec_config(&config, true, false).unwrap();
        n.cp_active = false;
        let needed = n
            .set_config(handle(), PEER, &config, &ContentProtection::SCMS_T, Tsep::Source)
            .unwrap();
        assert!(needed);
    }

    #[test]
    fn test_acceptor_requests_reconfigure_on_last_capability() {
        let mut n = negotiator(CopyProtection::CopyFree);
        let peer_choice = SbcCapabilities::source_default().to_info();
        let peer_choice = n.codecs.set_codec_config(&peer_choice, true, false).unwrap();
        let needed = n
            .set_config(handle(), PEER, &peer_choice, &ContentProtection::NONE, Tsep::Source)
            .unwrap();
        assert!(!needed);

        n.record_discovery_result(handle(), PEER, 1, 1, 0, Tsep::Source);
        let outcome = n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::NONE), 0, 1);
        assert_eq!(outcome, CapabilityOutcome::Acceptor { reconfigure: None });
    }

    #[test]
    fn test_sink_role_builds_config_from_peer_source() {
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 1, 0, 1, Tsep::Sink);
        let src = SbcCapabilities::source_default().to_info();
        let outcome = n.record_peer_capability(handle(), &sink_caps(src, ContentProtection::NONE), 0, 4);
        match outcome {
            CapabilityOutcome::Configure { sep_index, config } => {
                assert_eq!(sep_index, 0);
                assert_eq!(config.codec_info.codec_name(), "SBC");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_peer_params_use_smallest_open_mtu() {
        let mut n = negotiator(CopyProtection::CopyFree);
        assert_eq!(n.peer_params(PeerFeatures::default()).peer_mtu, u16::MAX);
        n.on_open(ScbHandle::from_index(0), 660);
        n.on_open(ScbHandle::from_index(1), 500);
        let params = n.peer_params(PeerFeatures {
            edr_2mbps: true,
            edr_3mbps: false,
        });
        assert_eq!(params.peer_mtu, 500);
        assert!(params.is_peer_edr);
        assert!(!params.peer_supports_3mbps);

        n.on_close(ScbHandle::from_index(1));
        assert_eq!(n.peer_params(PeerFeatures::default()).peer_mtu, 660);
    }

    #[test]
    fn test_user_config_without_open_peer_fails() {
        let mut n = negotiator(CopyProtection::CopyFree);
        let user = CodecUserConfig {
            codec: Some(CodecIndex::SourceSbc),
            ..CodecUserConfig::default()
        };
        assert!(n.set_user_codec_config(&user).is_err());
        assert!(n.take_config_updated());
    }

    #[test]
    fn test_user_config_switches_codec_with_reconfigure() {
        let mut n = negotiator(CopyProtection::CopyFree);
        n.record_discovery_result(handle(), PEER, 2, 2, 0, Tsep::Source);
        n.record_peer_capability(handle(), &sink_caps(sbc_sink(), ContentProtection::NONE), 0, 1);
        n.record_peer_capability(handle(), &sink_caps(aac_sink(), ContentProtection::NONE), 1, 2);
        n.on_open(handle(), 600);
        assert_eq!(n.current_config().codec_name(), "AAC");

        let user = CodecUserConfig {
            codec: Some(CodecIndex::SourceSbc),
            ..CodecUserConfig::default()
        };
        let request = n.set_user_codec_config(&user).unwrap().unwrap();
        assert_eq!(request.handle, handle());
        assert_eq!(request.sep_index, 0);
        assert_eq!(request.codec_info.codec_name(), "SBC");
        assert_eq!(n.current_config(), request.codec_info);
    }
}
