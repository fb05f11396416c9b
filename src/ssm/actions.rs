//! Stream state machine actions
//!
//! Each action runs on one SCB with a [`Context`] giving access to the
//! negotiator, the platform and the outbound event list. Follow-up work for the
//! same SCB is raised as a new event, never called recursively across states.

use core::mem;

use super::{AvEvent, Context, PeerSeps, Scb, ScbEvent, ScbState, StopRequest};
use crate::avdtp::{
    AVDTP_VERSION_1_3, AvdtHandle, ConfigReject, ErrorCode, MediaType, OutboundSignal, PeerSepInfo, SecurityData, Seid,
    ServiceCategory, ServiceMask, StreamConfig, Tsep,
};
use crate::codec::{CodecInfo, CodecType};
use crate::constants::{AVDT_MEDIA_HDR_SIZE, CLOSE_REQ_TIME_MS, RECONFIG_RETRY};
use crate::negotiator::{CapabilityOutcome, ReconfigRequest};
use crate::platform::{LinkRole, Signaling, TimerId, Timers};
use crate::{AvStatus, BluetoothAddress, TransportError};

impl Scb {
    fn addr(&self) -> BluetoothAddress {
        self.peer_addr.unwrap_or_default()
    }

    fn send<P>(&mut self, signal: OutboundSignal, ctx: &mut Context<'_, P>) -> Result<(), TransportError>
    where
        P: Signaling + Timers + ?Sized,
    {
        let id = signal.signal_id();
        ctx.platform.send_signal(self.addr(), signal).inspect_err(|err| {
            warn!("[SSM] {} failed to send {}: {}", self.handle.raw(), id, err);
        })
    }

    fn remote_seid(&self) -> Seid {
        self.sep_info.get(self.sep_info_idx).map_or(0, |sep| sep.seid)
    }

    fn arm_close_guard<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        ctx.platform.arm_once(TimerId::CloseGuard(self.handle), CLOSE_REQ_TIME_MS);
        self.close_timer_armed = true;
    }

    /// Point `sep_idx` at the local endpoint serving `codec_info`
    fn adjust_sep_idx(&mut self, codec_info: &CodecInfo) {
        if let Some(idx) = self
            .seps
            .iter()
            .position(|sep| sep.codec_info.codec_type_equals(codec_info))
        {
            self.sep_idx = idx;
        }
    }

    /// Forget everything about the current connection
    pub(super) fn cleanup<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if mem::take(&mut self.close_timer_armed) {
            ctx.platform.cancel(TimerId::CloseGuard(self.handle));
        }
        self.state = ScbState::Init;
        self.sep_idx = 0;
        self.sep_info.clear();
        self.sep_info_idx = 0;
        self.rcfg_idx = 0;
        self.num_seps = 0;
        self.cfg = StreamConfig::default();
        self.req_cfg = StreamConfig::default();
        self.pending = super::PendingOps::default();
        self.role = super::RoleFlags::default();
        self.num_recfg = 0;
        self.num_disc_snks = 0;
        self.num_disc_srcs = 0;
        self.started = false;
        self.co_started = false;
        self.cong = false;
        self.stream_mtu = 0;
        self.open_status = AvStatus::Success;
        self.stream_configured = false;
        self.delay_report = 0;
        self.start_acked = false;
        self.restart_after_reconfig = false;
        self.auto_start = false;
        self.deferred_reconfig = None;
    }

    // Opening as initiator

    pub(super) fn do_disc<P>(&mut self, addr: BluetoothAddress, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.peer_addr != Some(addr) {
            self.recfg_sup = true;
            self.suspend_sup = true;
        }
        self.peer_addr = Some(addr);
        self.open_status = AvStatus::Success;
        self.state = ScbState::Opening;

        if ctx.options.require_central && ctx.platform.link_role(addr) == LinkRole::Peripheral {
            if ctx.platform.request_role_switch(addr).is_ok() {
                info!("[SSM] {} switching role before open", self.handle.raw());
                self.pending.role_switch_for_open = true;
                return;
            }
            warn!("[SSM] {} role switch refused, opening as peripheral", self.handle.raw());
        }
        self.sdp_req(ctx);
    }

    fn sdp_req<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let remote = self.local_tsep.opposite();
        if ctx.platform.discover_service(self.addr(), remote).is_err() {
            ctx.raise(
                self.handle,
                ScbEvent::SdpResult {
                    found: false,
                    avdtp_version: 0,
                },
            );
        }
    }

    pub(super) fn connect_req<P>(&mut self, avdtp_version: u16, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.all_caps = avdtp_version >= AVDTP_VERSION_1_3;
        if self.signaling {
            self.discover_req(ctx);
        } else if ctx.platform.connect_signaling(self.addr()).is_err() {
            ctx.raise(self.handle, ScbEvent::SignalingDisconnected);
        }
    }

    pub(super) fn discover_req<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.send(OutboundSignal::Discover, ctx).is_err() {
            ctx.raise(self.handle, ScbEvent::DiscoveryFailed);
        }
    }

    fn store_discovery(&mut self, seps: PeerSeps) {
        let local = self.local_tsep;
        let eligible = seps
            .iter()
            .filter(|sep| sep.is_eligible(MediaType::Audio, local))
            .count();
        let eligible = u8::try_from(eligible).unwrap_or(u8::MAX);
        self.num_seps = u8::try_from(seps.len()).unwrap_or(u8::MAX);
        self.sep_info = seps;
        self.sep_info_idx = 0;
        match local {
            Tsep::Source => {
                self.num_disc_snks = eligible;
                self.num_disc_srcs = 0;
            }
            Tsep::Sink => {
                self.num_disc_snks = 0;
                self.num_disc_srcs = eligible;
            }
        }
    }

    pub(super) fn disc_results<P>(&mut self, seps: PeerSeps, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.store_discovery(seps);
        debug!(
            "[SSM] {} discovered {} endpoints, {} sinks, {} sources",
            self.handle.raw(),
            self.num_seps,
            self.num_disc_snks,
            self.num_disc_srcs
        );
        ctx.negotiator.record_discovery_result(
            self.handle,
            self.addr(),
            self.num_seps,
            self.num_disc_snks,
            self.num_disc_srcs,
            self.local_tsep,
        );

        if self.num_seps == 0 {
            ctx.raise(self.handle, ScbEvent::DiscoveryFailed);
        } else if !self.next_getcap(ctx) {
            ctx.raise(self.handle, ScbEvent::CapabilitiesExhausted);
        }
    }

    /// Ask for the capabilities of the next usable peer endpoint
    ///
    /// Returns `false` when none is left.
    fn next_getcap<P>(&mut self, ctx: &mut Context<'_, P>) -> bool
    where
        P: Signaling + Timers + ?Sized,
    {
        let local = self.local_tsep;
        let Some(offset) = self
            .sep_info
            .iter()
            .skip(self.sep_info_idx)
            .position(|sep| sep.is_eligible(MediaType::Audio, local))
        else {
            return false;
        };
        self.sep_info_idx += offset;
        let signal = OutboundSignal::GetCapabilities {
            seid: self.remote_seid(),
            all: self.all_caps,
        };
        self.send(signal, ctx).is_ok()
    }

    fn usable_caps(caps: &StreamConfig) -> bool {
        caps.has_codec() && caps.codec_info.media_type() == Ok(MediaType::Audio)
    }

    pub(super) fn getcap_results<P>(&mut self, caps: StreamConfig, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let outcome = if Self::usable_caps(&caps) {
            let seid = self.remote_seid();
            ctx.negotiator
                .record_peer_capability(self.handle, &caps, self.sep_info_idx, seid)
        } else {
            debug!("[SSM] {} skipping non-audio endpoint", self.handle.raw());
            CapabilityOutcome::Pending
        };

        if let CapabilityOutcome::Configure { sep_index, config } = outcome {
            self.cfg = StreamConfig {
                services: (self.local_services & caps.services).union(ServiceMask::TRANSPORT),
                ..config
            };
            self.sep_info_idx = sep_index;
            self.adjust_sep_idx(&config.codec_info);
            self.set_configuration(ctx);
            return;
        }

        self.sep_info_idx += 1;
        if !self.next_getcap(ctx) {
            ctx.raise(self.handle, ScbEvent::CapabilitiesExhausted);
        }
    }

    fn set_configuration<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let signal = OutboundSignal::SetConfiguration {
            local: self.avdt_handle(),
            remote: self.remote_seid(),
            config: self.cfg,
        };
        self.stream_configured = true;
        if self.send(signal, ctx).is_err() {
            ctx.raise(self.handle, ScbEvent::OpenCfm(Err(ErrorCode::CONNECT)));
        }
    }

    pub(super) fn role_res<P>(&mut self, success: bool, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        info!("[SSM] {} role switch result {}", self.handle.raw(), success);
        if mem::take(&mut self.pending.role_switch_for_start) {
            if mem::take(&mut self.pending.role_switch_started) {
                if success {
                    self.start_ok(ctx);
                } else {
                    self.pending.role_switch_retry = true;
                    let initiator = mem::take(&mut self.role.start_initiator);
                    self.notify_start(AvStatus::FailRole, initiator, false, ctx);
                }
            } else if !success {
                self.pending.role_switch_failed = true;
            }
        } else if mem::take(&mut self.pending.role_switch_for_open) {
            if success {
                self.sdp_req(ctx);
            } else {
                self.open_status = AvStatus::FailRole;
                self.str_closed(ctx);
            }
        }
    }

    pub(super) fn opening_close<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.signaling {
            self.do_close(ctx);
        } else {
            ctx.emit(AvEvent::Close {
                handle: self.handle,
                addr: self.addr(),
            });
            ctx.negotiator.on_close(self.handle);
            self.cleanup(ctx);
        }
    }

    pub(super) fn open_failed<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        warn!("[SSM] {} open failed", self.handle.raw());
        self.open_status = AvStatus::FailStream;
        ctx.negotiator.on_close(self.handle);

        if ctx.peer_open_elsewhere {
            // the signalling channel is shared, leave it up
            ctx.emit(AvEvent::Open {
                handle: self.handle,
                addr: self.addr(),
                status: AvStatus::FailStream,
                starting: false,
                edr: false,
                peer_tsep: self.local_tsep.opposite(),
            });
            self.cleanup(ctx);
        } else if ctx.platform.disconnect_signaling(self.addr()).is_err() {
            self.str_closed(ctx);
        }
    }

    // Opening as acceptor

    pub(super) fn config_ind<P>(
        &mut self,
        addr: BluetoothAddress,
        label: u8,
        local: AvdtHandle,
        remote: Seid,
        config: StreamConfig,
        ctx: &mut Context<'_, P>,
    ) where
        P: Signaling + Timers + ?Sized,
    {
        if self.peer_addr != Some(addr) {
            self.recfg_sup = true;
            self.suspend_sup = true;
        }
        self.peer_addr = Some(addr);
        self.label = label;
        self.state = ScbState::Incoming;

        if !config.has_codec() || !self.local_services.contains(config.services) {
            warn!("[SSM] {} unsupported configuration from peer", self.handle.raw());
            let reject = ConfigReject {
                category: ServiceCategory::MediaCodec,
                error: ErrorCode::UNSUPPORTED_CONFIGURATION,
            };
            ctx.raise(self.handle, ScbEvent::SetConfigResult(Err(reject)));
            return;
        }

        if let Some(idx) = self.seps.iter().position(|sep| sep.avdt_handle == local) {
            self.sep_idx = idx;
        }
        self.sep_info.clear();
        // capacity is never zero
        let _ = self.sep_info.push(PeerSepInfo {
            seid: remote,
            in_use: false,
            media_type: MediaType::Audio,
            tsep: self.local_tsep.opposite(),
        });
        self.sep_info_idx = 0;
        self.num_seps = 1;
        self.role.acceptor = true;
        self.cfg = config;

        let result = ctx.negotiator.set_config(
            self.handle,
            addr,
            &config.codec_info,
            &config.protect,
            self.local_tsep,
        );
        ctx.raise(self.handle, ScbEvent::SetConfigResult(result));
    }

    pub(super) fn setconfig_rsp<P>(&mut self, reconfig_needed: bool, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let accept = OutboundSignal::ConfigResponse {
            local: self.avdt_handle(),
            label: self.label,
            result: Ok(()),
        };
        if self.send(accept, ctx).is_err() {
            self.open_status = AvStatus::FailStream;
            self.str_closed(ctx);
            return;
        }
        self.stream_configured = true;
        // a local sink has no use for the peer's capabilities
        self.pending.acceptor_caps_on = self.local_tsep == Tsep::Source;
        if reconfig_needed && !ctx.options.acceptor_auto_start {
            self.role.suspend_optional = true;
        }
        if self.cfg.services.contains(ServiceMask::DELAY_REPORTING) {
            self.all_caps = true;
        }

        match self.local_tsep {
            Tsep::Sink => {
                ctx.emit(AvEvent::SinkConfig {
                    handle: self.handle,
                    addr: self.addr(),
                    codec_info: self.cfg.codec_info,
                });
                let delay = ctx.options.delay_report;
                if delay != 0 && self.cfg.services.contains(ServiceMask::DELAY_REPORTING) {
                    let report = OutboundSignal::DelayReport {
                        local: self.avdt_handle(),
                        remote: self.remote_seid(),
                        delay,
                    };
                    let _ = self.send(report, ctx);
                }
            }
            Tsep::Source if self.cfg.codec_info.codec_type() == Ok(CodecType::Sbc) => {
                // the configured endpoint is the only one we need to know
                ctx.negotiator
                    .record_discovery_result(self.handle, self.addr(), 1, 1, 0, Tsep::Source);
                if !self.next_getcap(ctx) {
                    self.acceptor_caps_done(ctx);
                }
            }
            Tsep::Source => {
                if self.send(OutboundSignal::Discover, ctx).is_err() {
                    self.acceptor_caps_done(ctx);
                }
            }
        }
    }

    pub(super) fn setconfig_rej<P>(&mut self, reject: ConfigReject, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let response = OutboundSignal::ConfigResponse {
            local: self.avdt_handle(),
            label: self.label,
            result: Err(reject),
        };
        let _ = self.send(response, ctx);
        ctx.emit(AvEvent::Reject {
            handle: self.handle,
            addr: self.addr(),
        });
        self.cleanup(ctx);
    }

    pub(super) fn config_busy<P>(&mut self, label: u8, local: AvdtHandle, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let response = OutboundSignal::ConfigResponse {
            local,
            label,
            result: Err(ConfigReject {
                category: ServiceCategory::MediaCodec,
                error: ErrorCode::BAD_STATE,
            }),
        };
        let _ = self.send(response, ctx);
    }

    pub(super) fn disc_res_as_acp<P>(&mut self, seps: PeerSeps, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.store_discovery(seps);
        ctx.negotiator.record_discovery_result(
            self.handle,
            self.addr(),
            self.num_seps,
            self.num_disc_snks,
            self.num_disc_srcs,
            self.local_tsep,
        );
        if self.num_seps == 0 || !self.next_getcap(ctx) {
            self.acceptor_caps_done(ctx);
        }
    }

    pub(super) fn save_caps<P>(&mut self, result: Result<StreamConfig, ErrorCode>, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        match result {
            Ok(caps) if Self::usable_caps(&caps) => {
                let seid = self.remote_seid();
                let outcome = ctx
                    .negotiator
                    .record_peer_capability(self.handle, &caps, self.sep_info_idx, seid);
                if let CapabilityOutcome::Acceptor {
                    reconfigure: Some(request),
                } = outcome
                {
                    info!("[SSM] {} peer configuration replaced by ours", self.handle.raw());
                    ctx.raise(self.handle, ScbEvent::ApiReconfig { request, suspend: true });
                }
            }
            Ok(_) => {}
            Err(err) => debug!("[SSM] {} capabilities of endpoint failed: {}", self.handle.raw(), err),
        }

        self.sep_info_idx += 1;
        if self.sep_info_idx < self.sep_info.len() && self.next_getcap(ctx) {
            return;
        }
        self.acceptor_caps_done(ctx);
    }

    /// Capability exchange after being configured is over
    pub(super) fn acceptor_caps_done<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.sep_info_idx = 0;
        self.pending.acceptor_caps_on = false;
        if mem::take(&mut self.pending.acceptor_caps_started) && self.started {
            self.start_ok(ctx);
        }
    }

    // Open and close

    pub(super) fn str_opened<P>(&mut self, mtu: u16, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let addr = self.addr();
        self.stream_configured = true;
        self.cong = true;
        self.stream_mtu = mtu.saturating_sub(AVDT_MEDIA_HDR_SIZE);
        self.open_status = AvStatus::Success;
        self.state = ScbState::Open;
        ctx.negotiator.on_open(self.handle, self.stream_mtu);

        let features = ctx.platform.peer_features(addr);
        let starting = ctx.other_started;
        info!(
            "[SSM] {} open, mtu {}, starting {}",
            self.handle.raw(),
            self.stream_mtu,
            starting
        );
        ctx.emit(AvEvent::Open {
            handle: self.handle,
            addr,
            status: AvStatus::Success,
            starting,
            edr: features.edr_2mbps || features.edr_3mbps,
            peer_tsep: self.local_tsep.opposite(),
        });

        if let Some(request) = self.deferred_reconfig.take() {
            ctx.raise(self.handle, ScbEvent::ApiReconfig { request, suspend: true });
        }
        if starting {
            self.auto_start = true;
            ctx.raise(self.handle, ScbEvent::ApiStart);
        }
    }

    pub(super) fn str_closed<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let addr = self.addr();
        if self.open_status == AvStatus::Success {
            if self.co_started {
                self.str_stopped(StopRequest::default(), ctx);
            }
            ctx.emit(AvEvent::Close {
                handle: self.handle,
                addr,
            });
        } else {
            ctx.emit(AvEvent::Open {
                handle: self.handle,
                addr,
                status: self.open_status,
                starting: false,
                edr: false,
                peer_tsep: self.local_tsep.opposite(),
            });
        }
        ctx.negotiator.on_close(self.handle);
        self.cleanup(ctx);
    }

    pub(super) fn do_close<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let addr = self.addr();
        if self.co_started {
            self.str_stopped(StopRequest::default(), ctx);
        }
        self.started = false;
        self.state = ScbState::Closing;
        ctx.platform.flush_media(addr);

        let sent = if self.stream_configured {
            let close = OutboundSignal::Close {
                local: self.avdt_handle(),
            };
            self.send(close, ctx).is_ok()
        } else {
            ctx.platform.disconnect_signaling(addr).is_ok()
        };
        if sent {
            self.arm_close_guard(ctx);
        } else {
            self.str_closed(ctx);
        }
    }

    /// Tear down the signalling channel and wait for it to go
    pub(super) fn disconnect_req<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.state = ScbState::Closing;
        if self.signaling && ctx.platform.disconnect_signaling(self.addr()).is_ok() {
            self.arm_close_guard(ctx);
        } else {
            self.str_closed(ctx);
        }
    }

    /// The peer did not complete the close in time
    pub(super) fn force_close<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        warn!("[SSM] {} close not confirmed, forcing", self.handle.raw());
        let _ = ctx.platform.disconnect_signaling(self.addr());
        self.str_closed(ctx);
    }

    // Start, stop and suspend

    pub(super) fn do_start<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if !self.started {
            if self.role.start_initiator {
                debug!("[SSM] {} start already in flight", self.handle.raw());
                return;
            }
            self.start_acked = false;
            self.pending.role_switch_retry = false;
            self.role.start_initiator = true;
            let start = OutboundSignal::Start {
                local: self.avdt_handle(),
            };
            if self.send(start, ctx).is_err() {
                self.start_failed(ErrorCode::CONNECT, ctx);
            }
            return;
        }

        self.role.start_initiator = true;
        if self.pending.blocks_start() {
            return;
        }
        if self.role.suspend {
            self.notify_start(AvStatus::Fail, true, false, ctx);
        } else {
            self.start_ok(ctx);
        }
    }

    fn needs_role_switch<P>(&self, ctx: &mut Context<'_, P>) -> bool
    where
        P: Signaling + Timers + ?Sized,
    {
        ctx.options.require_central
            && ctx.platform.link_role(self.addr()) == LinkRole::Peripheral
            && !(self.pending.role_switch_retry && !self.role.start_initiator)
    }

    pub(super) fn start_ok<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.started = true;
        if self.state == ScbState::Open {
            self.state = ScbState::Started;
        }
        if mem::take(&mut self.pending.role_switch_failed) {
            let initiator = mem::take(&mut self.role.start_initiator);
            self.notify_start(AvStatus::FailRole, initiator, false, ctx);
            return;
        }
        if self.pending.role_switch_pending() {
            return;
        }
        if !self.auto_start && self.needs_role_switch(ctx) && ctx.platform.request_role_switch(self.addr()).is_ok() {
            info!("[SSM] {} switching role before start", self.handle.raw());
            self.pending.role_switch_for_start = true;
            self.pending.role_switch_started = true;
            return;
        }
        if self.pending.acceptor_caps_on {
            debug!("[SSM] {} start waits for peer capabilities", self.handle.raw());
            self.pending.acceptor_caps_started = true;
            return;
        }

        self.auto_start = false;
        self.cong = false;
        let initiator = mem::take(&mut self.role.start_initiator);
        let suspending = !initiator && self.role.acceptor && self.role.suspend_optional;
        self.role.acceptor = false;
        self.role.suspend_optional = false;
        self.co_started = true;
        self.notify_start(AvStatus::Success, initiator, suspending, ctx);

        if suspending {
            // the peer started with its configuration, suspend to replace it
            self.role.suspend = true;
            self.cong = true;
            self.co_started = false;
            ctx.raise(self.handle, ScbEvent::ApiStop(StopRequest::SUSPEND));
        }
    }

    /// Report a start outcome, at most once per start cycle
    fn notify_start<P>(&mut self, status: AvStatus, initiator: bool, suspending: bool, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.start_acked {
            debug!("[SSM] {} start already reported", self.handle.raw());
            return;
        }
        self.start_acked = true;
        ctx.emit(AvEvent::Start {
            handle: self.handle,
            status,
            initiator,
            suspending,
        });
    }

    pub(super) fn start_failed<P>(&mut self, err: ErrorCode, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        warn!("[SSM] {} start failed: {}", self.handle.raw(), err);
        if !self.started && !self.co_started {
            self.notify_start(AvStatus::Fail, true, false, ctx);
        }
        self.role.start_initiator = false;
    }

    pub(super) fn str_stopped<P>(&mut self, request: StopRequest, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.start_acked = false;
        if mem::take(&mut self.co_started) {
            debug!("[SSM] {} media stopped", self.handle.raw());
        }
        if request.flush {
            ctx.platform.flush_media(self.addr());
        }
        let reconfiguring = self.state == ScbState::Reconfiguring;

        if request.suspend {
            if self.started && self.suspend_sup {
                self.role.suspend = true;
                let suspend = OutboundSignal::Suspend {
                    local: self.avdt_handle(),
                };
                if self.send(suspend, ctx).is_err() {
                    ctx.raise(self.handle, ScbEvent::SuspendCfm(Err(ErrorCode::CONNECT)));
                }
            } else if !reconfiguring {
                ctx.emit(AvEvent::Suspend {
                    handle: self.handle,
                    status: AvStatus::Success,
                    initiator: true,
                });
            }
        } else if !reconfiguring || request.reconfig_stop {
            ctx.emit(AvEvent::Stop {
                handle: self.handle,
                status: AvStatus::Success,
                initiator: true,
            });
        }
    }

    pub(super) fn suspend_cfm<P>(&mut self, result: Result<(), ErrorCode>, initiator: bool, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if !self.started {
            debug!("[SSM] {} suspend while not started", self.handle.raw());
            return;
        }

        let status = match result {
            Err(err) if err != ErrorCode::BAD_STATE => {
                warn!("[SSM] {} suspend rejected: {}", self.handle.raw(), err);
                if err != ErrorCode::TIMEOUT {
                    self.suspend_sup = false;
                }
                ctx.raise(self.handle, ScbEvent::ApiClose);
                AvStatus::Fail
            }
            _ => {
                self.started = false;
                if self.state == ScbState::Started {
                    self.state = ScbState::Open;
                }
                AvStatus::Success
            }
        };

        self.role.suspend = false;
        self.cong = false;
        self.start_acked = false;
        self.co_started = false;
        ctx.emit(AvEvent::Suspend {
            handle: self.handle,
            status,
            initiator,
        });
    }

    pub(super) fn clr_cong<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.co_started {
            self.cong = false;
            ctx.emit(AvEvent::CongestionCleared { handle: self.handle });
        }
    }

    // Reconfiguration

    pub(super) fn reconfig<P>(&mut self, request: ReconfigRequest, suspend: bool, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.state = ScbState::Reconfiguring;
        self.start_acked = false;
        self.num_recfg = 0;
        self.req_cfg = StreamConfig {
            codec_info: request.codec_info,
            services: self.cfg.services,
            protect: request.protect,
        };
        self.rcfg_idx = request.sep_index;
        self.restart_after_reconfig = self.started;

        let same_endpoint = self.rcfg_idx == self.sep_info_idx;
        info!(
            "[SSM] {} reconfigure to {}, same endpoint {}",
            self.handle.raw(),
            request.codec_info.codec_name(),
            same_endpoint
        );

        if same_endpoint && suspend && self.recfg_sup && self.suspend_sup {
            if self.started {
                self.str_stopped(StopRequest::SUSPEND, ctx);
            } else {
                self.send_reconfigure(ctx);
            }
            return;
        }

        if self.started {
            let request = StopRequest {
                reconfig_stop: !same_endpoint && self.recfg_sup,
                ..StopRequest::default()
            };
            self.str_stopped(request, ctx);
            self.started = false;
        } else {
            self.str_stopped(StopRequest::default(), ctx);
        }
        ctx.platform.flush_media(self.addr());
        self.send_close(ctx);
    }

    fn send_reconfigure<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let signal = OutboundSignal::Reconfigure {
            local: self.avdt_handle(),
            config: self.req_cfg,
        };
        if self.send(signal, ctx).is_err() {
            ctx.raise(self.handle, ScbEvent::ReconfigCfm(Err(ErrorCode::CONNECT)));
        }
    }

    fn send_close<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let close = OutboundSignal::Close {
            local: self.avdt_handle(),
        };
        if self.send(close, ctx).is_err() {
            ctx.raise(self.handle, ScbEvent::OpenCfm(Err(ErrorCode::CONNECT)));
        }
    }

    pub(super) fn suspend_cont<P>(&mut self, result: Result<(), ErrorCode>, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.started = false;
        self.cong = false;
        self.role.suspend = false;

        match result {
            Ok(()) => self.send_reconfigure(ctx),
            Err(err) if err == ErrorCode::CONNECT => {
                ctx.emit(AvEvent::Reconfig {
                    handle: self.handle,
                    status: AvStatus::Fail,
                });
                ctx.raise(self.handle, ScbEvent::DiscoveryFailed);
            }
            Err(err) => {
                debug!("[SSM] {} suspend failed: {}, closing instead", self.handle.raw(), err);
                if err != ErrorCode::TIMEOUT {
                    self.suspend_sup = false;
                }
                self.send_close(ctx);
            }
        }
    }

    pub(super) fn rcfg_cfm<P>(&mut self, result: Result<(), ErrorCode>, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        match result {
            Ok(()) => {
                self.cfg = self.req_cfg;
                self.rcfg_str_ok(None, ctx);
            }
            Err(err) => {
                debug!("[SSM] {} reconfigure rejected: {}, closing instead", self.handle.raw(), err);
                if err != ErrorCode::TIMEOUT {
                    self.recfg_sup = false;
                }
                self.send_close(ctx);
            }
        }
    }

    pub(super) fn rcfg_str_ok<P>(&mut self, mtu: Option<u16>, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if let Some(mtu) = mtu {
            self.stream_mtu = mtu.saturating_sub(AVDT_MEDIA_HDR_SIZE);
            ctx.negotiator.update_mtu(self.handle, self.stream_mtu);
        }
        self.role.acceptor = false;
        self.role.suspend_optional = false;
        self.role.start_initiator = false;
        self.stream_configured = true;
        self.state = ScbState::Open;
        ctx.emit(AvEvent::Reconfig {
            handle: self.handle,
            status: AvStatus::Success,
        });
        if mem::take(&mut self.restart_after_reconfig) {
            ctx.raise(self.handle, ScbEvent::ApiStart);
        }
    }

    /// The stream is closed, configure the new endpoint
    pub(super) fn rcfg_open<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.stream_configured = false;
        if self.num_disc_snks == 0 && self.num_disc_srcs == 0 {
            self.discover_req(ctx);
            return;
        }
        self.cfg = self.req_cfg;
        self.sep_info_idx = self.rcfg_idx;
        let codec_info = self.req_cfg.codec_info;
        self.adjust_sep_idx(&codec_info);
        self.set_configuration(ctx);
    }

    pub(super) fn rcfg_failed<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        if self.num_recfg > RECONFIG_RETRY {
            warn!("[SSM] {} reconfigure gave up", self.handle.raw());
            ctx.negotiator.on_close(self.handle);
            ctx.emit(AvEvent::Reconfig {
                handle: self.handle,
                status: AvStatus::FailStream,
            });
            ctx.raise(self.handle, ScbEvent::ApiClose);
            return;
        }

        self.num_recfg += 1;
        let addr = self.addr();
        let result = if self.signaling {
            ctx.platform.disconnect_signaling(addr)
        } else {
            ctx.platform.connect_signaling(addr)
        };
        if result.is_err() {
            ctx.raise(self.handle, ScbEvent::SignalingDisconnected);
        }
    }

    pub(super) fn rcfg_connect<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.cong = false;
        self.num_recfg = self.num_recfg.saturating_add(1);
        if self.num_recfg > RECONFIG_RETRY {
            self.rcfg_failed(ctx);
        } else {
            self.rcfg_open(ctx);
        }
    }

    pub(super) fn rcfg_discntd<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.num_recfg = self.num_recfg.saturating_add(1);
        if self.num_recfg > RECONFIG_RETRY {
            ctx.emit(AvEvent::Reconfig {
                handle: self.handle,
                status: AvStatus::FailStream,
            });
            ctx.raise(self.handle, ScbEvent::DiscoveryFailed);
        } else if ctx.platform.connect_signaling(self.addr()).is_err() {
            ctx.raise(self.handle, ScbEvent::SignalingDisconnected);
        }
    }

    // Content protection, delay reporting and offload

    pub(super) fn security_req<P>(&mut self, data: SecurityData, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let signal = OutboundSignal::SecurityRequest {
            local: self.avdt_handle(),
            data,
        };
        let _ = self.send(signal, ctx);
    }

    pub(super) fn security_rsp<P>(&mut self, error: Option<ErrorCode>, data: SecurityData, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let signal = OutboundSignal::SecurityResponse {
            local: self.avdt_handle(),
            label: self.sec_label,
            error,
            data,
        };
        let _ = self.send(signal, ctx);
    }

    pub(super) fn security_ind<P>(&mut self, label: u8, data: SecurityData, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.sec_label = label;
        ctx.emit(AvEvent::SecurityInd {
            handle: self.handle,
            addr: self.addr(),
            data,
        });
    }

    pub(super) fn security_rej<P>(&mut self, label: u8, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        let signal = OutboundSignal::SecurityResponse {
            local: self.avdt_handle(),
            label,
            error: Some(ErrorCode::BAD_STATE),
            data: SecurityData::new(),
        };
        let _ = self.send(signal, ctx);
    }

    pub(super) fn security_cfm<P>(&mut self, data: SecurityData, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        ctx.emit(AvEvent::SecurityCfm {
            handle: self.handle,
            addr: self.addr(),
            data,
        });
    }

    pub(super) fn delay_rpt<P>(&mut self, delay: u16, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        self.delay_report = delay;
        ctx.emit(AvEvent::DelayReport {
            handle: self.handle,
            addr: self.addr(),
            delay,
        });
    }

    pub(super) fn offload_req<P>(&mut self, ctx: &mut Context<'_, P>)
    where
        P: Signaling + Timers + ?Sized,
    {
        // no offloaded encoder is available
        let status = if self.started {
            AvStatus::FailResources
        } else {
            AvStatus::FailStream
        };
        ctx.emit(AvEvent::OffloadStart {
            handle: self.handle,
            status,
        });
    }
}
