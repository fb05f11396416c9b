//! Stream control block

use heapless::Vec;

use crate::avdtp::{AvdtHandle, LocalSep, PeerSepInfo, ServiceMask, StreamConfig, Tsep};
use crate::constants::{MAX_LOCAL_SEPS, MAX_PEER_SEPS};
use crate::negotiator::ReconfigRequest;
use crate::{AvStatus, BluetoothAddress};

/// Handle of a stream control block
///
/// The upper bits carry the channel type, the low nibble the block index plus
/// one, so a handle is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScbHandle(u8);

impl ScbHandle {
    const AUDIO_CHANNEL: u8 = 0x40;
    const INDEX_MASK: u8 = 0x0F;

    /// Handle of the audio stream control block at `index`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_index(index: usize) -> Self {
        Self(Self::AUDIO_CHANNEL | ((index as u8 + 1) & Self::INDEX_MASK))
    }

    /// Decode a raw handle
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        if raw & Self::INDEX_MASK == 0 || raw & !Self::INDEX_MASK != Self::AUDIO_CHANNEL {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Index of the block in the manager
    #[must_use]
    pub const fn index(self) -> usize {
        ((self.0 & Self::INDEX_MASK) as usize).saturating_sub(1)
    }

    /// Raw handle value
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// Stream state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScbState {
    /// No stream
    Init,
    /// The peer is configuring us
    Incoming,
    /// We are discovering and configuring the peer
    Opening,
    /// Stream open, not streaming
    Open,
    /// Stream started
    Started,
    /// Stream being reconfigured
    Reconfiguring,
    /// CLOSE sent, waiting for the stream to go away
    Closing,
}

/// Operations a transition is waiting for
///
/// Several can be outstanding at once; a dependent transition only proceeds
/// once all that concern it are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingOps {
    /// Open waits for a role switch
    pub role_switch_for_open: bool,
    /// Start waits for a role switch
    pub role_switch_for_start: bool,
    /// Start was deferred while a role switch was outstanding
    pub role_switch_started: bool,
    /// A role switch failed; only a local start tries again
    pub role_switch_retry: bool,
    /// The last role switch failed, the next start reports it
    pub role_switch_failed: bool,
    /// Fetching peer capabilities after being configured
    pub acceptor_caps_on: bool,
    /// A start was deferred by `acceptor_caps_on`
    pub acceptor_caps_started: bool,
}

impl PendingOps {
    /// Whether a role switch result is outstanding
    #[must_use]
    pub const fn role_switch_pending(&self) -> bool {
        self.role_switch_for_open || self.role_switch_for_start || self.role_switch_started
    }

    /// Whether anything holds back a start notification
    #[must_use]
    pub const fn blocks_start(&self) -> bool {
        self.role_switch_pending() || self.acceptor_caps_on
    }
}

/// Role of the stream control block in the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoleFlags {
    /// The peer configured the stream
    pub acceptor: bool,
    /// We sent the START
    pub start_initiator: bool,
    /// A suspend is in progress
    pub suspend: bool,
    /// A start by the peer is suspended again right away
    pub suspend_optional: bool,
}

/// Stop or suspend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StopRequest {
    /// Suspend instead of stopping the media only
    pub suspend: bool,
    /// Drop media queued in the transport
    pub flush: bool,
    /// Report the stop while reconfiguring
    pub reconfig_stop: bool,
}

impl StopRequest {
    /// A suspend request
    pub const SUSPEND: Self = Self {
        suspend: true,
        flush: false,
        reconfig_stop: false,
    };
}

/// One stream endpoint pair and everything known about it
#[derive(Debug, Clone)]
pub struct Scb {
    pub(crate) handle: ScbHandle,
    pub(crate) state: ScbState,
    pub(crate) peer_addr: Option<BluetoothAddress>,
    pub(crate) local_tsep: Tsep,
    pub(crate) seps: Vec<LocalSep, MAX_LOCAL_SEPS>,
    pub(crate) sep_idx: usize,
    pub(crate) sep_info: Vec<PeerSepInfo, MAX_PEER_SEPS>,
    pub(crate) sep_info_idx: usize,
    pub(crate) rcfg_idx: usize,
    pub(crate) num_seps: u8,
    pub(crate) cfg: StreamConfig,
    pub(crate) req_cfg: StreamConfig,
    pub(crate) local_services: ServiceMask,
    pub(crate) pending: PendingOps,
    pub(crate) role: RoleFlags,
    pub(crate) num_recfg: u8,
    pub(crate) num_disc_snks: u8,
    pub(crate) num_disc_srcs: u8,
    pub(crate) recfg_sup: bool,
    pub(crate) suspend_sup: bool,
    pub(crate) started: bool,
    pub(crate) co_started: bool,
    pub(crate) cong: bool,
    pub(crate) stream_mtu: u16,
    pub(crate) open_status: AvStatus,
    pub(crate) all_caps: bool,
    pub(crate) signaling: bool,
    pub(crate) stream_configured: bool,
    pub(crate) label: u8,
    pub(crate) sec_label: u8,
    pub(crate) delay_report: u16,
    pub(crate) start_acked: bool,
    pub(crate) restart_after_reconfig: bool,
    pub(crate) auto_start: bool,
    pub(crate) deferred_reconfig: Option<ReconfigRequest>,
    pub(crate) close_timer_armed: bool,
}

impl Scb {
    pub(crate) fn new(handle: ScbHandle, local_tsep: Tsep, seps: Vec<LocalSep, MAX_LOCAL_SEPS>) -> Self {
        Self {
            handle,
            state: ScbState::Init,
            peer_addr: None,
            local_tsep,
            seps,
            sep_idx: 0,
            sep_info: Vec::new(),
            sep_info_idx: 0,
            rcfg_idx: 0,
            num_seps: 0,
            cfg: StreamConfig::default(),
            req_cfg: StreamConfig::default(),
            local_services: ServiceMask::TRANSPORT.union(ServiceMask::DELAY_REPORTING),
            pending: PendingOps::default(),
            role: RoleFlags::default(),
            num_recfg: 0,
            num_disc_snks: 0,
            num_disc_srcs: 0,
            recfg_sup: true,
            suspend_sup: true,
            started: false,
            co_started: false,
            cong: false,
            stream_mtu: 0,
            open_status: AvStatus::Success,
            all_caps: false,
            signaling: false,
            stream_configured: false,
            label: 0,
            sec_label: 0,
            delay_report: 0,
            start_acked: false,
            restart_after_reconfig: false,
            auto_start: false,
            deferred_reconfig: None,
            close_timer_armed: false,
        }
    }

    /// Handle of this block
    #[must_use]
    pub const fn handle(&self) -> ScbHandle {
        self.handle
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ScbState {
        self.state
    }

    /// Peer the block is bound to
    #[must_use]
    pub const fn peer_addr(&self) -> Option<BluetoothAddress> {
        self.peer_addr
    }

    /// Role of the local endpoints
    #[must_use]
    pub const fn local_tsep(&self) -> Tsep {
        self.local_tsep
    }

    /// Negotiated configuration
    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Media payload bytes per packet
    #[must_use]
    pub const fn stream_mtu(&self) -> u16 {
        self.stream_mtu
    }

    /// Pending operations
    #[must_use]
    pub const fn pending(&self) -> &PendingOps {
        &self.pending
    }

    /// Whether the stream is started at the protocol level
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Whether media is flowing
    #[must_use]
    pub const fn is_media_started(&self) -> bool {
        self.co_started
    }

    /// Last delay reported by the peer sink, in 1/10 ms
    #[must_use]
    pub const fn delay_report(&self) -> u16 {
        self.delay_report
    }

    /// Reconfiguration attempts of the current reconfiguration
    #[must_use]
    pub const fn reconfig_attempts(&self) -> u8 {
        self.num_recfg
    }

    /// The local endpoint in use
    #[must_use]
    pub fn local_sep(&self) -> Option<&LocalSep> {
        self.seps.get(self.sep_idx)
    }

    /// AVDTP handle of the local endpoint in use
    #[must_use]
    pub fn avdt_handle(&self) -> AvdtHandle {
        self.local_sep().map_or(0, |sep| sep.avdt_handle)
    }

    /// Whether the block is bound to `addr` and has a stream
    #[must_use]
    pub fn is_open_with(&self, addr: BluetoothAddress) -> bool {
        self.peer_addr == Some(addr) && matches!(self.state, ScbState::Open | ScbState::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip() {
        let handle = ScbHandle::from_index(2);
        assert_eq!(handle.raw(), 0x43);
        assert_eq!(handle.index(), 2);
        assert_eq!(ScbHandle::from_raw(0x43), Some(handle));
        assert_eq!(ScbHandle::from_raw(0x40), None);
        assert_eq!(ScbHandle::from_raw(0x83), None);
    }

    #[test]
    fn test_pending_ops() {
        let mut pending = PendingOps::default();
        assert!(!pending.blocks_start());
        pending.role_switch_retry = true;
        assert!(!pending.blocks_start());
        pending.acceptor_caps_on = true;
        assert!(pending.blocks_start());
        pending = PendingOps {
            role_switch_started: true,
            ..PendingOps::default()
        };
        assert!(pending.role_switch_pending());
    }
}
