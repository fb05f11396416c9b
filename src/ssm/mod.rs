//! AVDTP stream state machine
//!
//! Every audio stream control block (SCB) runs its own instance of this
//! machine. An SCB is bound to at most one peer and walks through discovery,
//! capability exchange, configuration, open, start and close, driven by local
//! requests and by confirmations and indications from the transport.
//!
//! ## Flow
//!
//! 1. The session layer or the processor feeds a [`ScbEvent`] to
//!    [`AvManager::dispatch`]
//! 2. The event is looked up in the state table for the SCB's current state
//! 3. Actions send signals through the platform, arm timers, update the
//!    negotiator and may raise follow-up events for the same SCB
//! 4. Raised events are drained before `dispatch` returns
//! 5. Upward notifications are returned as [`AvEvent`]s
//!
//! Raised events go through a bounded queue instead of re-entering the
//! machine, so a transition always completes before the next one starts.

mod actions;
mod scb;

use heapless::{Deque, Vec};

use crate::avdtp::{AvdtHandle, ConfigReject, ErrorCode, LocalSep, PeerSepInfo, SecurityData, Seid, StreamConfig, Tsep};
use crate::codec::{CodecIndex, CodecInfo};
use crate::constants::{MAX_LOCAL_SEPS, MAX_OUTBOUND_EVENTS, MAX_PEER_SEPS, MAX_PENDING_INTERNAL_EVENTS, MAX_STREAMS};
use crate::negotiator::{Negotiator, ReconfigRequest};
use crate::platform::{Signaling, Timers};
use crate::{AvError, AvOptions, AvStatus, BluetoothAddress};

pub use scb::{PendingOps, RoleFlags, Scb, ScbHandle, ScbState, StopRequest};

/// Peer endpoints reported by DISCOVER
pub type PeerSeps = Vec<PeerSepInfo, MAX_PEER_SEPS>;

/// Input of the stream state machine
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScbEvent {
    /// Open a stream to a peer
    ApiOpen(BluetoothAddress),
    /// Close the stream
    ApiClose,
    /// Start streaming
    ApiStart,
    /// Stop or suspend streaming
    ApiStop(StopRequest),
    /// Change the stream configuration
    ApiReconfig {
        /// New configuration
        request: ReconfigRequest,
        /// Try SUSPEND and RECONFIGURE before falling back to CLOSE
        suspend: bool,
    },
    /// Send content protection data
    ApiProtectReq(SecurityData),
    /// Answer the last content protection indication
    ApiProtectRsp {
        /// `None` accepts
        error: Option<ErrorCode>,
        /// Response payload
        data: SecurityData,
    },
    /// Hand the stream to an offloaded encoder
    ApiOffloadStart,
    /// Service lookup finished
    SdpResult {
        /// A matching A2DP record was found
        found: bool,
        /// AVDTP version from the record
        avdtp_version: u16,
    },
    /// The signalling channel is up
    SignalingConnected(BluetoothAddress),
    /// The signalling channel went down
    SignalingDisconnected,
    /// DISCOVER answered
    DiscoverCfm(Result<PeerSeps, ErrorCode>),
    /// GET_(ALL_)CAPABILITIES answered
    GetCapabilitiesCfm(Result<StreamConfig, ErrorCode>),
    /// The peer configured one of our endpoints
    ConfigInd {
        /// Peer
        addr: BluetoothAddress,
        /// Transaction label to answer with
        label: u8,
        /// Our endpoint
        local: AvdtHandle,
        /// Peer endpoint
        remote: Seid,
        /// Requested configuration
        config: StreamConfig,
    },
    /// Our OPEN completed, with the media channel MTU
    OpenCfm(Result<u16, ErrorCode>),
    /// The peer opened the stream
    OpenInd {
        /// Media channel MTU
        mtu: u16,
    },
    /// START answered
    StartCfm(Result<(), ErrorCode>),
    /// The peer started the stream
    StartInd,
    /// SUSPEND answered
    SuspendCfm(Result<(), ErrorCode>),
    /// The peer suspended the stream
    SuspendInd,
    /// The stream is closed
    StreamClosed,
    /// RECONFIGURE answered
    ReconfigCfm(Result<(), ErrorCode>),
    /// Content protection data from the peer
    SecurityInd {
        /// Transaction label to answer with
        label: u8,
        /// Payload
        data: SecurityData,
    },
    /// Content protection response from the peer
    SecurityCfm {
        /// Payload
        data: SecurityData,
    },
    /// The peer sink reported its delay, in 1/10 ms
    DelayReport(u16),
    /// A media packet left the transport queue
    WriteCfm,
    /// A requested role switch finished
    RoleChanged {
        /// We are central now
        success: bool,
    },
    /// No answer to CLOSE in time
    CloseGuardExpired,
    /// Outcome of checking a peer configuration
    SetConfigResult(Result<bool, ConfigReject>),
    /// Discovery cannot go on
    DiscoveryFailed,
    /// No peer endpoint left to query
    CapabilitiesExhausted,
}

/// Output of the stream state machine
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvEvent {
    /// Stream open finished
    Open {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
        /// Outcome
        status: AvStatus,
        /// Another stream is streaming and this one starts too
        starting: bool,
        /// Peer supports EDR rates
        edr: bool,
        /// Peer endpoint type
        peer_tsep: Tsep,
    },
    /// Stream closed
    Close {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
    },
    /// A peer configuration was rejected
    Reject {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
    },
    /// Streaming started or failed to
    Start {
        /// Stream
        handle: ScbHandle,
        /// Outcome
        status: AvStatus,
        /// We asked for the start
        initiator: bool,
        /// The start is about to be suspended again
        suspending: bool,
    },
    /// Streaming stopped
    Stop {
        /// Stream
        handle: ScbHandle,
        /// Outcome
        status: AvStatus,
        /// We asked for the stop
        initiator: bool,
    },
    /// Streaming suspended
    Suspend {
        /// Stream
        handle: ScbHandle,
        /// Outcome
        status: AvStatus,
        /// We asked for the suspend
        initiator: bool,
    },
    /// Reconfiguration finished
    Reconfig {
        /// Stream
        handle: ScbHandle,
        /// Outcome
        status: AvStatus,
    },
    /// The peer source configured our sink
    SinkConfig {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
        /// Configuration to decode
        codec_info: CodecInfo,
    },
    /// Outcome of an offload start request
    OffloadStart {
        /// Stream
        handle: ScbHandle,
        /// Outcome
        status: AvStatus,
    },
    /// Content protection data from the peer
    SecurityInd {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
        /// Payload
        data: SecurityData,
    },
    /// Content protection response from the peer
    SecurityCfm {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
        /// Payload
        data: SecurityData,
    },
    /// Delay reported by the peer sink
    DelayReport {
        /// Stream
        handle: ScbHandle,
        /// Peer
        addr: BluetoothAddress,
        /// Delay in 1/10 ms
        delay: u16,
    },
    /// The media channel can take packets again
    CongestionCleared {
        /// Stream
        handle: ScbHandle,
    },
}

/// Everything an action may touch besides its own SCB
pub(crate) struct Context<'a, P: ?Sized> {
    pub(crate) options: &'a AvOptions,
    pub(crate) negotiator: &'a mut Negotiator,
    pub(crate) platform: &'a mut P,
    queue: &'a mut Deque<(ScbHandle, ScbEvent), MAX_PENDING_INTERNAL_EVENTS>,
    out: &'a mut Vec<AvEvent, MAX_OUTBOUND_EVENTS>,
    /// Another SCB has media flowing
    pub(crate) other_started: bool,
    /// Another SCB has a stream open to the same peer
    pub(crate) peer_open_elsewhere: bool,
}

impl<P: ?Sized> Context<'_, P> {
    /// Queue a follow-up event
    pub(crate) fn raise(&mut self, handle: ScbHandle, event: ScbEvent) {
        if self.queue.push_back((handle, event)).is_err() {
            error!("[SSM] internal event queue full, dropping event for {}", handle.raw());
        }
    }

    /// Report upwards
    pub(crate) fn emit(&mut self, event: AvEvent) {
        if self.out.push(event).is_err() {
            error!("[SSM] outbound event queue full");
        }
    }
}

/// Owner of all stream control blocks
pub struct AvManager {
    options: AvOptions,
    scbs: Vec<Scb, MAX_STREAMS>,
    negotiator: Negotiator,
    queue: Deque<(ScbHandle, ScbEvent), MAX_PENDING_INTERNAL_EVENTS>,
    next_avdt_handle: AvdtHandle,
}

impl AvManager {
    /// Create a manager with no registered streams
    #[must_use]
    pub fn new(options: AvOptions) -> Self {
        Self {
            negotiator: Negotiator::new(&options),
            options,
            scbs: Vec::new(),
            queue: Deque::new(),
            next_avdt_handle: 1,
        }
    }

    /// Register a stream control block with one local endpoint per codec
    ///
    /// # Errors
    ///
    /// Returns [`AvError::QueueFull`] when all blocks are taken and
    /// [`AvError::NoCodec`] when no codec is available for `local`.
    pub fn register(&mut self, local: Tsep) -> Result<ScbHandle, AvError> {
        if self.scbs.is_full() {
            return Err(AvError::QueueFull);
        }
        let codecs: Vec<CodecIndex, MAX_LOCAL_SEPS> = match local {
            Tsep::Source => self.negotiator.ordered_source_codecs().take(MAX_LOCAL_SEPS).collect(),
            Tsep::Sink => core::iter::once(CodecIndex::SinkSbc).collect(),
        };

        let mut seps = Vec::new();
        for codec in codecs {
            let Some(codec_info) = self.negotiator.local_caps(codec) else {
                continue;
            };
            let sep = LocalSep {
                avdt_handle: self.next_avdt_handle,
                tsep: local,
                codec,
                codec_info,
            };
            if seps.push(sep).is_ok() {
                self.next_avdt_handle = self.next_avdt_handle.wrapping_add(1);
            }
        }
        if seps.is_empty() {
            return Err(AvError::NoCodec);
        }

        let handle = ScbHandle::from_index(self.scbs.len());
        info!("[SSM] registered {} with {} endpoints", handle.raw(), seps.len());
        self.scbs
            .push(Scb::new(handle, local, seps))
            .map_err(|_| AvError::QueueFull)?;
        Ok(handle)
    }

    /// Run `event` on the SCB `handle`, then everything it raised
    pub fn dispatch<P>(&mut self, handle: ScbHandle, event: ScbEvent, platform: &mut P) -> Vec<AvEvent, MAX_OUTBOUND_EVENTS>
    where
        P: Signaling + Timers + ?Sized,
    {
        let mut out = Vec::new();
        let mut next = Some((handle, event));
        while let Some((handle, event)) = next.take().or_else(|| self.queue.pop_front()) {
            self.execute(handle, event, platform, &mut out);
        }
        out
    }

    fn execute<P>(&mut self, handle: ScbHandle, event: ScbEvent, platform: &mut P, out: &mut Vec<AvEvent, MAX_OUTBOUND_EVENTS>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let index = handle.index();
        let Some(scb) = self.scbs.get(index).filter(|scb| scb.handle == handle) else {
            error!("[SSM] event for unknown stream {}", handle.raw());
            return;
        };
        let peer = scb.peer_addr;
        let other_started = self.scbs.iter().any(|other| other.handle != handle && other.co_started);
        let peer_open_elsewhere = peer.is_some_and(|addr| {
            self.scbs
                .iter()
                .any(|other| other.handle != handle && other.is_open_with(addr))
        });

        let Self {
            options,
            scbs,
            negotiator,
            queue,
            ..
        } = self;
        let scb = &mut scbs[index];
        let mut ctx = Context {
            options,
            negotiator,
            platform,
            queue,
            out,
            other_started,
            peer_open_elsewhere,
        };

        let before = scb.state;
        debug!("[SSM] {} event {} in {}", handle.raw(), event, before);
        scb.handle_event(event, &mut ctx);
        if scb.state != before {
            info!("[SSM] {} {} -> {}", handle.raw(), before, scb.state);
        }
    }

    /// Stream control block by handle
    #[must_use]
    pub fn scb(&self, handle: ScbHandle) -> Option<&Scb> {
        self.scbs.get(handle.index()).filter(|scb| scb.handle == handle)
    }

    /// All registered stream control blocks
    pub fn scbs(&self) -> impl Iterator<Item = &Scb> {
        self.scbs.iter()
    }

    /// The stream bound to `addr`, if any
    #[must_use]
    pub fn find_by_peer(&self, addr: BluetoothAddress) -> Option<&Scb> {
        self.scbs.iter().find(|scb| scb.peer_addr == Some(addr) && scb.state != ScbState::Init)
    }

    /// The stream owning local endpoint `avdt_handle`
    #[must_use]
    pub fn find_by_avdt_handle(&self, avdt_handle: AvdtHandle) -> Option<&Scb> {
        self.scbs
            .iter()
            .find(|scb| scb.seps.iter().any(|sep| sep.avdt_handle == avdt_handle))
    }

    /// Options the manager was created with
    #[must_use]
    pub const fn options(&self) -> &AvOptions {
        &self.options
    }

    /// Codec negotiator
    #[must_use]
    pub const fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    /// Codec negotiator
    pub const fn negotiator_mut(&mut self) -> &mut Negotiator {
        &mut self.negotiator
    }
}

impl Scb {
    /// State table
    fn handle_event<P>(&mut self, event: ScbEvent, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        use ScbEvent as E;
        use ScbState as S;

        match &event {
            E::SignalingConnected(addr) => {
                self.signaling = true;
                self.peer_addr.get_or_insert(*addr);
            }
            E::SignalingDisconnected => self.signaling = false,
            _ => {}
        }

        match (self.state, event) {
            // Handled alike in every state
            (S::Init | S::Closing, E::SecurityInd { label, .. }) => self.security_rej(label, ctx),
            (_, E::SecurityInd { label, data }) => self.security_ind(label, data, ctx),
            (_, E::SecurityCfm { data }) => self.security_cfm(data, ctx),
            (S::Init | S::Closing, E::ApiProtectReq(_) | E::ApiProtectRsp { .. }) => {
                warn!("[SSM] {} protection request without a stream", self.handle.raw());
            }
            (_, E::ApiProtectReq(data)) => self.security_req(data, ctx),
            (_, E::ApiProtectRsp { error, data }) => self.security_rsp(error, data, ctx),
            (_, E::DelayReport(delay)) => self.delay_rpt(delay, ctx),
            (_, E::ApiOffloadStart) => self.offload_req(ctx),
            (_, E::WriteCfm) => self.clr_cong(ctx),
            (S::Opening | S::Open | S::Started, E::RoleChanged { success }) => self.role_res(success, ctx),

            // Init
            (S::Init, E::ApiOpen(addr)) => self.do_disc(addr, ctx),
            (S::Init, E::ApiClose) => self.cleanup(ctx),
            (
                S::Init | S::Opening,
                E::ConfigInd {
                    addr,
                    label,
                    local,
                    remote,
                    config,
                },
            ) => self.config_ind(addr, label, local, remote, config, ctx),

            // Incoming
            (S::Incoming, E::SetConfigResult(Ok(reconfig_needed))) => self.setconfig_rsp(reconfig_needed, ctx),
            (S::Incoming, E::SetConfigResult(Err(reject))) => self.setconfig_rej(reject, ctx),
            (S::Incoming, E::StreamClosed | E::SignalingDisconnected) => {
                self.open_status = AvStatus::FailStream;
                self.str_closed(ctx);
            }
            (S::Incoming, E::ApiClose) => {
                ctx.negotiator.on_close(self.handle);
                self.disconnect_req(ctx);
            }
            (S::Incoming, E::ApiReconfig { request, .. }) => {
                debug!("[SSM] {} reconfigure deferred until open", self.handle.raw());
                self.deferred_reconfig = Some(request);
            }
            (S::Incoming | S::Open | S::Started, E::DiscoverCfm(Ok(seps))) if self.pending.acceptor_caps_on => {
                self.disc_res_as_acp(seps, ctx);
            }
            (S::Incoming | S::Open | S::Started, E::DiscoverCfm(Err(_)) | E::DiscoveryFailed | E::CapabilitiesExhausted)
                if self.pending.acceptor_caps_on =>
            {
                self.acceptor_caps_done(ctx);
            }
            (S::Incoming | S::Open | S::Started, E::GetCapabilitiesCfm(result)) if self.pending.acceptor_caps_on => {
                self.save_caps(result, ctx);
            }
            (S::Incoming | S::Opening, E::OpenCfm(Ok(mtu)) | E::OpenInd { mtu }) => self.str_opened(mtu, ctx),

            // Opening
            (S::Opening, E::ApiClose) => self.opening_close(ctx),
            (S::Opening, E::SdpResult { found: true, avdtp_version }) => self.connect_req(avdtp_version, ctx),
            (S::Opening, E::SdpResult { found: false, .. }) => {
                self.open_status = AvStatus::FailSdp;
                self.str_closed(ctx);
            }
            (S::Opening, E::SignalingConnected(_)) => self.discover_req(ctx),
            (S::Opening, E::SignalingDisconnected) => {
                self.open_status = AvStatus::FailStream;
                self.str_closed(ctx);
            }
            (S::Opening, E::DiscoverCfm(Ok(seps))) => self.disc_results(seps, ctx),
            (S::Opening, E::GetCapabilitiesCfm(Ok(caps))) => self.getcap_results(caps, ctx),
            (
                S::Opening,
                E::DiscoverCfm(Err(_))
                | E::DiscoveryFailed
                | E::GetCapabilitiesCfm(Err(_))
                | E::CapabilitiesExhausted
                | E::OpenCfm(Err(_)),
            ) => self.open_failed(ctx),

            // Open and Started
            (S::Open | S::Started, E::ApiClose) => self.do_close(ctx),
            (S::Open | S::Started, E::ApiStart) => self.do_start(ctx),
            (S::Open | S::Started, E::ApiStop(request)) => self.str_stopped(request, ctx),
            (S::Open | S::Started, E::ApiReconfig { request, suspend }) => self.reconfig(request, suspend, ctx),
            (S::Open, E::StartCfm(Ok(())) | E::StartInd) => self.start_ok(ctx),
            (S::Open, E::StartCfm(Err(err))) => self.start_failed(err, ctx),
            (S::Open | S::Started, E::SuspendCfm(result)) => self.suspend_cfm(result, true, ctx),
            (S::Open | S::Started, E::SuspendInd) => self.suspend_cfm(Ok(()), false, ctx),
            (S::Open | S::Started, E::StreamClosed | E::SignalingDisconnected) => self.str_closed(ctx),
            (S::Open | S::Started, E::ConfigInd { label, local, .. }) => self.config_busy(label, local, ctx),

            // Reconfiguring
            (S::Reconfiguring, E::ApiClose) => self.disconnect_req(ctx),
            (S::Reconfiguring, E::SuspendCfm(result)) => self.suspend_cont(result, ctx),
            (S::Reconfiguring, E::ReconfigCfm(result)) => self.rcfg_cfm(result, ctx),
            (S::Reconfiguring, E::OpenCfm(Ok(mtu)) | E::OpenInd { mtu }) => self.rcfg_str_ok(Some(mtu), ctx),
            (S::Reconfiguring, E::OpenCfm(Err(_)) | E::GetCapabilitiesCfm(Err(_)) | E::CapabilitiesExhausted) => {
                self.rcfg_failed(ctx);
            }
            (S::Reconfiguring, E::StreamClosed) => self.rcfg_open(ctx),
            (S::Reconfiguring, E::SignalingConnected(_)) => self.rcfg_connect(ctx),
            (S::Reconfiguring, E::SignalingDisconnected) => self.rcfg_discntd(ctx),
            (S::Reconfiguring, E::DiscoverCfm(Ok(seps))) => self.disc_results(seps, ctx),
            (S::Reconfiguring, E::DiscoverCfm(Err(_)) | E::DiscoveryFailed) => self.str_closed(ctx),
            (S::Reconfiguring, E::GetCapabilitiesCfm(Ok(caps))) => self.getcap_results(caps, ctx),

            // Closing
            (S::Closing, E::ApiClose | E::CloseGuardExpired) => self.force_close(ctx),
            (S::Closing, E::StreamClosed | E::SignalingDisconnected) => self.str_closed(ctx),

            (state, event) => trace!("[SSM] {} ignoring {} in {}", self.handle.raw(), event, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avdtp::{ContentProtection, MediaType, OutboundSignal, ServiceMask};
    use crate::codec::SbcCapabilities;
    use crate::constants::CLOSE_REQ_TIME_MS;
    use crate::platform::{LinkRole, TimerId};
    use crate::testing::MockPlatform;

    const PEER: BluetoothAddress = BluetoothAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    fn peer_sep(seid: Seid, tsep: Tsep) -> PeerSepInfo {
        PeerSepInfo {
            seid,
            in_use: false,
            media_type: MediaType::Audio,
            tsep,
        }
    }

    fn sink_caps() -> StreamConfig {
        StreamConfig {
            codec_info: SbcCapabilities::sink_default().to_info(),
            services: ServiceMask::TRANSPORT.union(ServiceMask::DELAY_REPORTING),
            protect: ContentProtection::NONE,
        }
    }

    fn setup(options: AvOptions) -> (AvManager, ScbHandle, MockPlatform) {
        let mut manager = AvManager::new(options);
        let handle = manager.register(Tsep::Source).unwrap();
        (manager, handle, MockPlatform::default())
    }

    fn state(manager: &AvManager, handle: ScbHandle) -> ScbState {
        manager.scb(handle).unwrap().state()
    }

    fn open(manager: &mut AvManager, handle: ScbHandle, platform: &mut MockPlatform) -> Vec<AvEvent, MAX_OUTBOUND_EVENTS> {
        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), platform);
        manager.dispatch(
            handle,
            ScbEvent::SdpResult {
                found: true,
                avdtp_version: 0x0103,
            },
            platform,
        );
        manager.dispatch(handle, ScbEvent::SignalingConnected(PEER), platform);
        let seps: PeerSeps = [peer_sep(1, Tsep::Sink)].into_iter().collect();
        manager.dispatch(handle, ScbEvent::DiscoverCfm(Ok(seps)), platform);
        manager.dispatch(handle, ScbEvent::GetCapabilitiesCfm(Ok(sink_caps())), platform);
        manager.dispatch(handle, ScbEvent::OpenCfm(Ok(672)), platform)
    }

    fn start(manager: &mut AvManager, handle: ScbHandle, platform: &mut MockPlatform) -> Vec<AvEvent, MAX_OUTBOUND_EVENTS> {
        manager.dispatch(handle, ScbEvent::ApiStart, platform);
        manager.dispatch(handle, ScbEvent::StartCfm(Ok(())), platform)
    }

    fn count_starts(events: &[AvEvent]) -> usize {
        events.iter().filter(|event| matches!(event, AvEvent::Start { .. })).count()
    }

    #[test]
    fn test_register_builds_one_endpoint_per_codec() {
        let (mut manager, handle, _) = setup(AvOptions::default());
        let scb = manager.scb(handle).unwrap();
        assert_eq!(scb.seps.len(), 2);
        assert_eq!(scb.seps[0].codec, CodecIndex::SourceAac);
        assert_eq!(scb.seps[1].avdt_handle, 2);

        let sink = manager.register(Tsep::Sink).unwrap();
        assert_eq!(sink.index(), 1);
        assert_eq!(manager.scb(sink).unwrap().seps[0].codec, CodecIndex::SinkSbc);
        assert_eq!(manager.find_by_avdt_handle(3).map(Scb::handle), Some(sink));
    }

    #[test]
    fn test_open_as_initiator() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        let events = open(&mut manager, handle, &mut platform);

        assert_eq!(platform.discoveries, [(PEER, Tsep::Sink)]);
        assert_eq!(platform.connects, [PEER]);
        assert_eq!(platform.signals[0], OutboundSignal::Discover);
        assert_eq!(platform.signals[1], OutboundSignal::GetCapabilities { seid: 1, all: true });
        let OutboundSignal::SetConfiguration { local, remote, config } = &platform.signals[2] else {
            panic!("expected SET_CONFIGURATION, got {:?}", platform.signals[2]);
        };
        assert_eq!((*local, *remote), (2, 1));
        assert!(config.services.contains(ServiceMask::DELAY_REPORTING));

        assert_eq!(
            events.as_slice(),
            [AvEvent::Open {
                handle,
                addr: PEER,
                status: AvStatus::Success,
                starting: false,
                edr: false,
                peer_tsep: Tsep::Sink,
            }]
        );
        let scb = manager.scb(handle).unwrap();
        assert_eq!(scb.state(), ScbState::Open);
        assert_eq!(scb.stream_mtu(), 660);
        assert_eq!(scb.avdt_handle(), 2);
    }

    #[test]
    fn test_open_fails_without_service_record() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), &mut platform);
        let events = manager.dispatch(
            handle,
            ScbEvent::SdpResult {
                found: false,
                avdtp_version: 0,
            },
            &mut platform,
        );
        assert!(matches!(
            events[0],
            AvEvent::Open {
                status: AvStatus::FailSdp,
                ..
            }
        ));
        assert_eq!(state(&manager, handle), ScbState::Init);
    }

    #[test]
    fn test_capability_exhaustion_fails_open() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), &mut platform);
        manager.dispatch(
            handle,
            ScbEvent::SdpResult {
                found: true,
                avdtp_version: 0x0102,
            },
            &mut platform,
        );
        manager.dispatch(handle, ScbEvent::SignalingConnected(PEER), &mut platform);

        // only a source endpoint, nothing a local source can stream to
        let seps: PeerSeps = [peer_sep(3, Tsep::Source)].into_iter().collect();
        manager.dispatch(handle, ScbEvent::DiscoverCfm(Ok(seps)), &mut platform);
        assert_eq!(
            platform.count_signals(|signal| matches!(signal, OutboundSignal::GetCapabilities { .. })),
            0
        );
        assert_eq!(platform.disconnects, [PEER]);
        assert_eq!(state(&manager, handle), ScbState::Opening);

        let events = manager.dispatch(handle, ScbEvent::SignalingDisconnected, &mut platform);
        assert!(matches!(
            events[0],
            AvEvent::Open {
                status: AvStatus::FailStream,
                ..
            }
        ));
        assert_eq!(state(&manager, handle), ScbState::Init);
    }

    #[test]
    fn test_start_is_reported_once() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);

        let events = start(&mut manager, handle, &mut platform);
        assert_eq!(
            events.as_slice(),
            [AvEvent::Start {
                handle,
                status: AvStatus::Success,
                initiator: true,
                suspending: false,
            }]
        );
        assert_eq!(state(&manager, handle), ScbState::Started);
        assert!(manager.scb(handle).unwrap().is_media_started());

        let mut later = manager.dispatch(handle, ScbEvent::StartInd, &mut platform);
        later.extend(manager.dispatch(handle, ScbEvent::ApiStart, &mut platform));
        assert_eq!(count_starts(&later), 0);
    }

    #[test]
    fn test_remote_start_after_suspend() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        start(&mut manager, handle, &mut platform);

        manager.dispatch(handle, ScbEvent::ApiStop(StopRequest::SUSPEND), &mut platform);
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Suspend { local: 2 }));
        let events = manager.dispatch(handle, ScbEvent::SuspendCfm(Ok(())), &mut platform);
        assert!(matches!(
            events[0],
            AvEvent::Suspend {
                status: AvStatus::Success,
                initiator: true,
                ..
            }
        ));
        assert_eq!(state(&manager, handle), ScbState::Open);

        let events = manager.dispatch(handle, ScbEvent::StartInd, &mut platform);
        assert_eq!(
            events.as_slice(),
            [AvEvent::Start {
                handle,
                status: AvStatus::Success,
                initiator: false,
                suspending: false,
            }]
        );
    }

    #[test]
    fn test_failed_suspend_closes_stream() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        start(&mut manager, handle, &mut platform);

        manager.dispatch(handle, ScbEvent::ApiStop(StopRequest::SUSPEND), &mut platform);
        let events = manager.dispatch(
            handle,
            ScbEvent::SuspendCfm(Err(ErrorCode::NOT_SUPPORTED_COMMAND)),
            &mut platform,
        );
        assert!(matches!(
            events[0],
            AvEvent::Suspend {
                status: AvStatus::Fail,
                ..
            }
        ));
        assert!(!manager.scb(handle).unwrap().suspend_sup);
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Close { local: 2 }));
        assert_eq!(state(&manager, handle), ScbState::Closing);
    }

    #[test]
    fn test_second_stream_starts_with_first() {
        let (mut manager, first, mut platform) = setup(AvOptions::default());
        let second = manager.register(Tsep::Source).unwrap();
        open(&mut manager, first, &mut platform);
        start(&mut manager, first, &mut platform);

        let events = open(&mut manager, second, &mut platform);
        assert!(matches!(events[0], AvEvent::Open { starting: true, .. }));
        // the local endpoints of the second block are numbered after the first
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Start { local: 4 }));

        let events = manager.dispatch(second, ScbEvent::StartCfm(Ok(())), &mut platform);
        assert_eq!(count_starts(&events), 1);
    }

    #[test]
    fn test_close_reaches_init_from_every_state() {
        let guard = |handle| (TimerId::CloseGuard(handle), CLOSE_REQ_TIME_MS);

        // Init
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        manager.dispatch(handle, ScbEvent::ApiClose, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Init);

        // Opening before the signalling channel is up
        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), &mut platform);
        let events = manager.dispatch(handle, ScbEvent::ApiClose, &mut platform);
        assert!(matches!(events[0], AvEvent::Close { .. }));
        assert_eq!(state(&manager, handle), ScbState::Init);

        // Open and Started, the peer never answers CLOSE
        for started in [false, true] {
            let (mut manager, handle, mut platform) = setup(AvOptions::default());
            open(&mut manager, handle, &mut platform);
            if started {
                start(&mut manager, handle, &mut platform);
            }
            let events = manager.dispatch(handle, ScbEvent::ApiClose, &mut platform);
            assert_eq!(count_starts(&events), 0);
            assert_eq!(state(&manager, handle), ScbState::Closing);
            assert!(platform.armed.contains(&guard(handle)));

            let events = manager.dispatch(handle, ScbEvent::CloseGuardExpired, &mut platform);
            assert!(events.iter().any(|event| matches!(event, AvEvent::Close { .. })));
            assert_eq!(state(&manager, handle), ScbState::Init);
        }

        // Incoming
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        manager.dispatch(handle, ScbEvent::SignalingConnected(PEER), &mut platform);
        let config = StreamConfig {
            codec_info: manager.negotiator().current_config(),
            ..sink_caps()
        };
        manager.dispatch(
            handle,
            ScbEvent::ConfigInd {
                addr: PEER,
                label: 1,
                local: 2,
                remote: 5,
                config,
            },
            &mut platform,
        );
        assert_eq!(state(&manager, handle), ScbState::Incoming);
        manager.dispatch(handle, ScbEvent::ApiClose, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Closing);
        manager.dispatch(handle, ScbEvent::CloseGuardExpired, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Init);

        // Reconfiguring
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        let request = ReconfigRequest {
            handle,
            sep_index: 0,
            codec_info: manager.negotiator().current_config(),
            protect: ContentProtection::NONE,
        };
        manager.dispatch(handle, ScbEvent::ApiReconfig { request, suspend: false }, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Reconfiguring);
        manager.dispatch(handle, ScbEvent::ApiClose, &mut platform);
        manager.dispatch(handle, ScbEvent::CloseGuardExpired, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Init);
        assert!(platform.cancelled.contains(&TimerId::CloseGuard(handle)));
    }

    #[test]
    fn test_cheap_reconfigure_restarts_stream() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        start(&mut manager, handle, &mut platform);

        let request = ReconfigRequest {
            handle,
            sep_index: 0,
            codec_info: manager.negotiator().current_config(),
            protect: ContentProtection::NONE,
        };
        let events = manager.dispatch(handle, ScbEvent::ApiReconfig { request, suspend: true }, &mut platform);
        assert!(events.is_empty());
        assert_eq!(state(&manager, handle), ScbState::Reconfiguring);
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Suspend { local: 2 }));

        manager.dispatch(handle, ScbEvent::SuspendCfm(Ok(())), &mut platform);
        assert!(matches!(platform.last_signal(), Some(OutboundSignal::Reconfigure { local: 2, .. })));

        let events = manager.dispatch(handle, ScbEvent::ReconfigCfm(Ok(())), &mut platform);
        assert_eq!(
            events[0],
            AvEvent::Reconfig {
                handle,
                status: AvStatus::Success,
            }
        );
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Start { local: 2 }));

        let events = manager.dispatch(handle, ScbEvent::StartCfm(Ok(())), &mut platform);
        assert_eq!(count_starts(&events), 1);
        assert_eq!(state(&manager, handle), ScbState::Started);
    }

    #[test]
    fn test_reconfigure_retries_are_bounded() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        let request = ReconfigRequest {
            handle,
            sep_index: 0,
            codec_info: manager.negotiator().current_config(),
            protect: ContentProtection::NONE,
        };
        manager.dispatch(handle, ScbEvent::ApiReconfig { request, suspend: false }, &mut platform);
        assert_eq!(platform.last_signal(), Some(&OutboundSignal::Close { local: 2 }));
        manager.dispatch(handle, ScbEvent::StreamClosed, &mut platform);
        assert!(matches!(platform.last_signal(), Some(OutboundSignal::SetConfiguration { .. })));

        let mut events = std::vec::Vec::new();
        let mut rounds = 0;
        while state(&manager, handle) != ScbState::Init {
            rounds += 1;
            assert!(rounds <= 10, "reconfiguration never gave up");
            for event in [
                ScbEvent::OpenCfm(Err(ErrorCode::BAD_STATE)),
                ScbEvent::SignalingDisconnected,
                ScbEvent::SignalingConnected(PEER),
            ] {
                events.extend(manager.dispatch(handle, event, &mut platform));
            }
        }
        let failures = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    AvEvent::Reconfig {
                        status: AvStatus::FailStream,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(failures, 1);
        assert!(events.iter().any(|event| matches!(event, AvEvent::Close { .. })));
    }

    #[test]
    fn test_acceptor_configuration() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        manager.dispatch(handle, ScbEvent::SignalingConnected(PEER), &mut platform);
        let config = StreamConfig {
            codec_info: manager.negotiator().current_config(),
            ..sink_caps()
        };
        manager.dispatch(
            handle,
            ScbEvent::ConfigInd {
                addr: PEER,
                label: 7,
                local: 2,
                remote: 5,
                config,
            },
            &mut platform,
        );
        assert_eq!(
            platform.signals[0],
            OutboundSignal::ConfigResponse {
                local: 2,
                label: 7,
                result: Ok(()),
            }
        );
        // SBC needs no discovery, the configured endpoint is queried directly
        assert_eq!(platform.signals[1], OutboundSignal::GetCapabilities { seid: 5, all: true });
        assert!(manager.scb(handle).unwrap().pending().acceptor_caps_on);

        manager.dispatch(handle, ScbEvent::OpenInd { mtu: 895 }, &mut platform);
        assert_eq!(state(&manager, handle), ScbState::Open);

        // a start by the peer waits for the capabilities
        let events = manager.dispatch(handle, ScbEvent::StartInd, &mut platform);
        assert_eq!(count_starts(&events), 0);
        let events = manager.dispatch(handle, ScbEvent::GetCapabilitiesCfm(Ok(sink_caps())), &mut platform);
        assert_eq!(count_starts(&events), 1);
        assert!(!manager.scb(handle).unwrap().pending().acceptor_caps_on);
    }

    #[test]
    fn test_acceptor_rejects_unusable_configuration() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        let events = manager.dispatch(
            handle,
            ScbEvent::ConfigInd {
                addr: PEER,
                label: 3,
                local: 1,
                remote: 2,
                config: StreamConfig::default(),
            },
            &mut platform,
        );
        assert_eq!(events.as_slice(), [AvEvent::Reject { handle, addr: PEER }]);
        assert!(matches!(
            platform.signals[0],
            OutboundSignal::ConfigResponse {
                label: 3,
                result: Err(_),
                ..
            }
        ));
        assert_eq!(state(&manager, handle), ScbState::Init);
    }

    #[test]
    fn test_role_switch_before_open() {
        let options = AvOptions {
            require_central: true,
            ..AvOptions::default()
        };
        let (mut manager, handle, mut platform) = setup(options);
        platform.role = LinkRole::Peripheral;

        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), &mut platform);
        assert_eq!(platform.role_switches, 1);
        assert!(platform.discoveries.is_empty());
        manager.dispatch(handle, ScbEvent::RoleChanged { success: true }, &mut platform);
        assert_eq!(platform.discoveries.len(), 1);

        let (mut manager, handle, mut platform) = setup(options);
        platform.role = LinkRole::Peripheral;
        manager.dispatch(handle, ScbEvent::ApiOpen(PEER), &mut platform);
        let events = manager.dispatch(handle, ScbEvent::RoleChanged { success: false }, &mut platform);
        assert!(matches!(
            events[0],
            AvEvent::Open {
                status: AvStatus::FailRole,
                ..
            }
        ));
        assert_eq!(state(&manager, handle), ScbState::Init);
    }

    #[test]
    fn test_offload_start_is_refused() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        open(&mut manager, handle, &mut platform);
        let events = manager.dispatch(handle, ScbEvent::ApiOffloadStart, &mut platform);
        assert_eq!(
            events.as_slice(),
            [AvEvent::OffloadStart {
                handle,
                status: AvStatus::FailStream,
            }]
        );
        start(&mut manager, handle, &mut platform);
        let events = manager.dispatch(handle, ScbEvent::ApiOffloadStart, &mut platform);
        assert!(matches!(
            events[0],
            AvEvent::OffloadStart {
                status: AvStatus::FailResources,
                ..
            }
        ));
    }

    #[test]
    fn test_security_without_stream_is_rejected() {
        let (mut manager, handle, mut platform) = setup(AvOptions::default());
        let data: SecurityData = [1, 2].into_iter().collect();
        let events = manager.dispatch(handle, ScbEvent::SecurityInd { label: 4, data }, &mut platform);
        assert!(events.is_empty());
        assert!(matches!(
            platform.signals[0],
            OutboundSignal::SecurityResponse {
                label: 4,
                error: Some(ErrorCode::BAD_STATE),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_handle_is_ignored() {
        let (mut manager, _, mut platform) = setup(AvOptions::default());
        let events = manager.dispatch(ScbHandle::from_index(4), ScbEvent::ApiStart, &mut platform);
        assert!(events.is_empty());
        assert!(platform.signals.is_empty());
    }
}
