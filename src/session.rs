//! Session control plane
//!
//! A [`Session`] follows the one peer the application streams with. It turns
//! application requests and audio path commands into stream state machine
//! events, and the stream events coming back into application callbacks and
//! media worker commands.
//!
//! Media commands are not sent from here. They collect in an outbox that the
//! processor drains into the media channel after every call, so the order the
//! session produced them in is the order the worker sees them.

use heapless::Deque;

use crate::avdtp::{ErrorCode, SecurityData, Tsep};
use crate::codec::registry::CodecStatus;
use crate::codec::{CodecCapabilities, CodecInfo, CodecUserConfig, PcmFeeding};
use crate::constants::MAX_MEDIA_COMMANDS;
use crate::media::{self, FocusState, MediaCommand, MediaSnapshot, StartResult, StopResult};
use crate::negotiator::ReconfigRequest;
use crate::platform::{ControlPlatform, TimerId};
use crate::ssm::{AvEvent, AvManager, ScbEvent, ScbHandle, ScbState, StopRequest};
use crate::{AckStatus, AudioControl, AudioState, AvError, AvOptions, AvStatus, BluetoothAddress, ConnectionState};

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No peer
    Idle,
    /// Connecting to a peer
    Opening,
    /// Stream open, not streaming
    Opened,
    /// Streaming
    Started,
    /// Waiting for the stream to close
    Closing,
}

/// Flags qualifying the session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionFlags {
    /// We asked for a suspend that has not completed
    pub local_suspend_pending: bool,
    /// The peer suspended the stream, a local start must not resume it
    pub remote_suspend: bool,
    /// A local start is waiting for the peer
    pub pending_start: bool,
    /// The stream is stopping
    pub pending_stop: bool,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionSnapshot {
    /// Session state
    pub state: SessionState,
    /// Flags
    pub flags: SessionFlags,
    /// Current peer
    pub peer: Option<BluetoothAddress>,
    /// Endpoint type of the peer
    pub peer_tsep: Option<Tsep>,
    /// Peer supports EDR rates
    pub edr: bool,
    /// State of the underlying stream
    pub stream: ScbState,
    /// Encoder is running
    pub source_streaming: bool,
}

/// Control plane of the one active peer
pub struct Session {
    manager: AvManager,
    handle: ScbHandle,
    state: SessionState,
    flags: SessionFlags,
    peer: Option<BluetoothAddress>,
    peer_tsep: Option<Tsep>,
    edr: bool,
    source_streaming: bool,
    media: Deque<MediaCommand, MAX_MEDIA_COMMANDS>,
}

impl Session {
    /// Register the local endpoints and queue the media worker startup
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint can be registered for the local role.
    pub fn new(options: AvOptions) -> Result<Self, AvError> {
        let mut manager = AvManager::new(options);
        let handle = manager.register(options.local_role)?;
        let mut session = Self {
            manager,
            handle,
            state: SessionState::Idle,
            flags: SessionFlags::default(),
            peer: None,
            peer_tsep: None,
            edr: false,
            source_streaming: false,
            media: Deque::new(),
        };
        session.push_media(MediaCommand::Startup);
        Ok(session)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current flags
    #[must_use]
    pub const fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// Current peer
    #[must_use]
    pub const fn peer(&self) -> Option<BluetoothAddress> {
        self.peer
    }

    /// Stream handle the session drives
    #[must_use]
    pub const fn handle(&self) -> ScbHandle {
        self.handle
    }

    /// The stream state machine
    #[must_use]
    pub const fn manager(&self) -> &AvManager {
        &self.manager
    }

    /// Point-in-time view for the API
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            flags: self.flags,
            peer: self.peer,
            peer_tsep: self.peer_tsep,
            edr: self.edr,
            stream: self.manager.scb(self.handle).map_or(ScbState::Init, |scb| scb.state()),
            source_streaming: self.source_streaming,
        }
    }

    /// Current and selectable codecs
    #[must_use]
    pub fn codec_status(&self) -> CodecStatus {
        self.manager.negotiator().codec_status()
    }

    /// Next media worker command
    pub fn pop_media_command(&mut self) -> Option<MediaCommand> {
        self.media.pop_front()
    }

    /// Whether a local start can be issued right away
    #[must_use]
    pub const fn stream_ready(&self) -> bool {
        matches!(self.state, SessionState::Opened) && !self.flags.remote_suspend && !self.flags.pending_stop
    }

    /// Whether the stream is started and nobody is stopping it
    #[must_use]
    pub const fn started_ready(&self) -> bool {
        matches!(self.state, SessionState::Started)
            && !self.flags.local_suspend_pending
            && !self.flags.remote_suspend
            && !self.flags.pending_stop
    }

    /// Feed a transport event to the stream
    pub fn dispatch<P: ControlPlatform>(&mut self, event: ScbEvent, platform: &mut P) {
        let events = self.manager.dispatch(self.handle, event, platform);
        for event in events {
            self.handle_av_event(event, platform);
        }
    }

    /// A timer armed by the control plane expired
    pub fn timer_expired<P: ControlPlatform>(&mut self, id: TimerId, platform: &mut P) {
        match id {
            TimerId::CloseGuard(handle) if handle == self.handle => {
                self.dispatch(ScbEvent::CloseGuardExpired, platform);
            }
            _ => trace!("[SESSION] ignoring timer {}", id),
        }
    }

    /// Connect to `addr`
    ///
    /// # Errors
    ///
    /// Returns [`AvError::InvalidState`] while another peer is connected or a
    /// close is in progress.
    pub fn connect<P: ControlPlatform>(&mut self, addr: BluetoothAddress, platform: &mut P) -> Result<(), AvError> {
        match self.state {
            SessionState::Idle => {
                self.peer = Some(addr);
                self.enter(SessionState::Opening, platform);
                self.dispatch(ScbEvent::ApiOpen(addr), platform);
                Ok(())
            }
            SessionState::Opening | SessionState::Opened | SessionState::Started if self.peer == Some(addr) => {
                debug!("[SESSION] already connected to {}", addr);
                Ok(())
            }
            SessionState::Opening | SessionState::Opened | SessionState::Started => {
                warn!("[SESSION] busy with another peer, refusing {}", addr);
                platform.connection_state(addr, ConnectionState::Disconnected);
                Err(AvError::InvalidState)
            }
            SessionState::Closing => Err(AvError::InvalidState),
        }
    }

    /// Disconnect from `addr`
    ///
    /// # Errors
    ///
    /// Returns [`AvError::NoPeer`] if `addr` is not the current peer.
    pub fn disconnect<P: ControlPlatform>(&mut self, addr: BluetoothAddress, platform: &mut P) -> Result<(), AvError> {
        if self.peer != Some(addr) {
            return Err(AvError::NoPeer);
        }
        match self.state {
            SessionState::Idle | SessionState::Closing => {}
            SessionState::Opening | SessionState::Opened => {
                platform.connection_state(addr, ConnectionState::Disconnecting);
                self.dispatch(ScbEvent::ApiClose, platform);
            }
            SessionState::Started => {
                platform.connection_state(addr, ConnectionState::Disconnecting);
                self.enter(SessionState::Closing, platform);
                self.dispatch(ScbEvent::ApiClose, platform);
            }
        }
        Ok(())
    }

    /// Start streaming
    ///
    /// # Errors
    ///
    /// Returns [`AvError::InvalidState`] unless the stream is open.
    pub fn start_stream<P: ControlPlatform>(&mut self, platform: &mut P) -> Result<(), AvError> {
        match self.state {
            SessionState::Opened => {
                if self.remote_is_sink() {
                    self.setup_codec(platform);
                }
                self.flags.pending_start = true;
                self.dispatch(ScbEvent::ApiStart, platform);
                Ok(())
            }
            SessionState::Started => {
                if self.remote_is_sink() {
                    media::on_started(None, true, platform);
                }
                Ok(())
            }
            _ => Err(AvError::InvalidState),
        }
    }

    /// Stop streaming
    ///
    /// The stream is suspended; the peer sees no difference from
    /// [`Session::suspend_stream`].
    ///
    /// # Errors
    ///
    /// Returns [`AvError::InvalidState`] if there is no stream.
    pub fn stop_stream<P: ControlPlatform>(&mut self, platform: &mut P) -> Result<(), AvError> {
        match self.state {
            SessionState::Started => {
                self.local_suspend(platform);
                Ok(())
            }
            SessionState::Closing => {
                self.stopped_commands(None, platform);
                Ok(())
            }
            SessionState::Opened => Ok(()),
            SessionState::Idle | SessionState::Opening => Err(AvError::InvalidState),
        }
    }

    /// Suspend streaming
    ///
    /// # Errors
    ///
    /// Returns [`AvError::InvalidState`] if there is no stream.
    pub fn suspend_stream<P: ControlPlatform>(&mut self, platform: &mut P) -> Result<(), AvError> {
        match self.state {
            SessionState::Started => {
                self.local_suspend(platform);
                Ok(())
            }
            SessionState::Opened | SessionState::Closing => Ok(()),
            SessionState::Idle | SessionState::Opening => Err(AvError::InvalidState),
        }
    }

    fn local_suspend<P: ControlPlatform>(&mut self, platform: &mut P) {
        self.flags.local_suspend_pending = true;
        self.flags.remote_suspend = false;
        if self.remote_is_sink() {
            self.push_media(MediaCommand::SetTxFlush(true));
        } else {
            self.stopped_commands(None, platform);
        }
        self.dispatch(ScbEvent::ApiStop(StopRequest::SUSPEND), platform);
    }

    /// Apply user codec preferences to the open peer
    ///
    /// # Errors
    ///
    /// Returns [`AvError::NoPeer`] without an open stream and
    /// [`AvError::NoCodec`] if the peer cannot take the preferences.
    pub fn set_codec_config<P: ControlPlatform>(
        &mut self,
        user: &CodecUserConfig,
        platform: &mut P,
    ) -> Result<(), AvError> {
        if !self.is_open() {
            return Err(AvError::NoPeer);
        }
        let result = self.manager.negotiator_mut().set_user_codec_config(user);
        self.codec_changed(result.as_ref().is_ok_and(Option::is_none), platform);
        match result {
            Ok(Some(request)) => {
                self.reconfigure(request, platform);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) => {
                warn!("[SESSION] codec preferences refused: {}", error);
                Err(AvError::NoCodec)
            }
        }
    }

    /// Apply a new PCM feeding from the audio path
    ///
    /// # Errors
    ///
    /// Returns [`AvError::NoPeer`] without an open stream and
    /// [`AvError::NoCodec`] if no configuration matches the feeding.
    pub fn set_audio_feeding<P: ControlPlatform>(&mut self, feeding: PcmFeeding, platform: &mut P) -> Result<(), AvError> {
        if !self.is_open() {
            return Err(AvError::NoPeer);
        }
        self.push_media(MediaCommand::AudioFeedingUpdate(feeding));
        let result = self.manager.negotiator_mut().set_audio_feeding_config(&feeding);
        self.codec_changed(false, platform);
        match result {
            Ok(Some(request)) => {
                self.reconfigure(request, platform);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(error) => {
                warn!("[SESSION] feeding refused: {}", error);
                Err(AvError::NoCodec)
            }
        }
    }

    fn reconfigure<P: ControlPlatform>(&mut self, request: ReconfigRequest, platform: &mut P) {
        info!("[SESSION] reconfiguring to {}", request.codec_info.codec_name());
        self.dispatch(ScbEvent::ApiReconfig { request, suspend: true }, platform);
    }

    /// Report a codec change and refresh a running encoder in place
    fn codec_changed<P: ControlPlatform>(&mut self, update_encoder: bool, platform: &mut P) {
        if !self.manager.negotiator_mut().take_config_updated() {
            return;
        }
        if let Some(peer) = self.peer {
            platform.audio_config(peer, &self.manager.negotiator().codec_status());
        }
        if update_encoder && self.remote_is_sink() {
            match self.media_snapshot(platform) {
                Some(snapshot) => self.push_media(MediaCommand::EncoderUserConfigUpdate(snapshot)),
                None => warn!("[SESSION] no stream to update the encoder for"),
            }
        }
    }

    /// Request hardware offload of the stream
    ///
    /// The outcome is reported through the offload callback.
    pub fn offload_start<P: ControlPlatform>(&mut self, platform: &mut P) {
        if self.state == SessionState::Started {
            self.dispatch(ScbEvent::ApiOffloadStart, platform);
        } else {
            warn!("[SESSION] offload refused in {}", self.state);
            self.offload_result(AvStatus::Fail, platform);
        }
    }

    fn offload_result<P: ControlPlatform>(&mut self, status: AvStatus, platform: &mut P) {
        let ack = match status {
            AvStatus::Success => AckStatus::Success,
            AvStatus::FailResources => AckStatus::Unsupported,
            _ => AckStatus::Failure,
        };
        platform.ack(ack);
        platform.offload_start_response(self.peer.unwrap_or(BluetoothAddress::EMPTY), status);
    }

    /// Send content protection control data to the peer
    ///
    /// # Errors
    ///
    /// Returns [`AvError::NoPeer`] without an open stream.
    pub fn security_request<P: ControlPlatform>(&mut self, data: SecurityData, platform: &mut P) -> Result<(), AvError> {
        if !self.is_open() {
            return Err(AvError::NoPeer);
        }
        self.dispatch(ScbEvent::ApiProtectReq(data), platform);
        Ok(())
    }

    /// Answer the last content protection indication
    ///
    /// # Errors
    ///
    /// Returns [`AvError::NoPeer`] without an open stream.
    pub fn security_response<P: ControlPlatform>(
        &mut self,
        error: Option<ErrorCode>,
        data: SecurityData,
        platform: &mut P,
    ) -> Result<(), AvError> {
        if !self.is_open() {
            return Err(AvError::NoPeer);
        }
        self.dispatch(ScbEvent::ApiProtectRsp { error, data }, platform);
        Ok(())
    }

    /// Grant or withdraw audio focus for the sink output
    pub fn set_sink_focus(&mut self, focus: FocusState) {
        self.push_media(MediaCommand::SetFocus(focus));
    }

    /// Close the stream and stop the media worker
    pub fn shutdown<P: ControlPlatform>(&mut self, platform: &mut P) {
        if let Some(peer) = self.peer {
            let _ = self.disconnect(peer, platform);
        }
        self.push_media(MediaCommand::Shutdown);
    }

    /// Handle a command from the audio path
    ///
    /// Every command is acknowledged, some of them only once the peer answered.
    pub fn audio_control<P: ControlPlatform>(&mut self, command: AudioControl, platform: &mut P) {
        debug!("[SESSION] audio control {} in {}", command, self.state);
        match command {
            AudioControl::CheckReady => {
                if self.stream_ready() || self.started_ready() {
                    platform.ack(AckStatus::Success);
                } else {
                    platform.ack(AckStatus::Failure);
                }
            }
            AudioControl::Start => {
                if self.source_streaming {
                    warn!("[SESSION] start while the encoder is running");
                    platform.ack(AckStatus::Failure);
                } else if self.stream_ready() {
                    let remote_sink = self.remote_is_sink();
                    if self.start_stream(platform).is_err() {
                        platform.ack(AckStatus::Failure);
                    } else if !remote_sink {
                        platform.ack(AckStatus::Success);
                    }
                } else if self.started_ready() {
                    platform.ack(AckStatus::Success);
                } else {
                    platform.ack(AckStatus::Failure);
                }
            }
            AudioControl::Stop => {
                if !(self.remote_is_sink() && !self.source_streaming) {
                    let _ = self.stop_stream(platform);
                }
                platform.ack(AckStatus::Success);
            }
            AudioControl::Suspend => {
                if self.started_ready() {
                    let _ = self.suspend_stream(platform);
                } else {
                    self.flags.remote_suspend = false;
                    platform.ack(AckStatus::Success);
                }
            }
            AudioControl::SetOutputConfig(feeding) => {
                let status = match self.set_audio_feeding(feeding, platform) {
                    Ok(()) => AckStatus::Success,
                    Err(_) => AckStatus::Failure,
                };
                platform.ack(status);
            }
            AudioControl::OffloadStart => self.offload_start(platform),
        }
    }

    fn handle_av_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        debug!("[SESSION] {} in {}", event, self.state);
        match event {
            AvEvent::SecurityInd { addr, data, .. } | AvEvent::SecurityCfm { addr, data, .. } => {
                platform.security_indication(addr, &data);
                return;
            }
            AvEvent::DelayReport { addr, delay, .. } => {
                platform.delay_report(addr, delay);
                return;
            }
            AvEvent::CongestionCleared { .. } => {
                self.push_media(MediaCommand::CongestionChanged(false));
                return;
            }
            AvEvent::SinkConfig { addr, codec_info, .. } => {
                self.sink_config(addr, &codec_info, platform);
                return;
            }
            AvEvent::OffloadStart { status, .. } => {
                self.offload_result(status, platform);
                return;
            }
            _ => {}
        }

        match self.state {
            SessionState::Idle => self.idle_event(event, platform),
            SessionState::Opening => self.opening_event(event, platform),
            SessionState::Opened => self.opened_event(event, platform),
            SessionState::Started => self.started_event(event, platform),
            SessionState::Closing => self.closing_event(event, platform),
        }
    }

    fn idle_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        if let AvEvent::Open { .. } = event {
            self.stream_opened(event, platform);
        }
    }

    fn opening_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        match event {
            AvEvent::Open { .. } => self.stream_opened(event, platform),
            AvEvent::Reject { addr, .. } => {
                platform.connection_state(addr, ConnectionState::Disconnected);
                self.enter(SessionState::Idle, platform);
            }
            AvEvent::Close { addr, .. } => {
                self.stopped_commands(None, platform);
                platform.connection_state(addr, ConnectionState::Disconnected);
                self.enter(SessionState::Idle, platform);
            }
            _ => {}
        }
    }

    fn stream_opened<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        let AvEvent::Open {
            addr,
            status,
            edr,
            peer_tsep,
            ..
        } = event
        else {
            return;
        };
        if !status.is_success() {
            warn!("[SESSION] open to {} failed: {}", addr, status);
            platform.connection_state(addr, ConnectionState::Disconnected);
            self.enter(SessionState::Idle, platform);
            return;
        }

        self.peer = Some(addr);
        self.peer_tsep = Some(peer_tsep);
        self.edr = edr;
        platform.connection_state(addr, ConnectionState::Connected);
        self.enter(SessionState::Opened, platform);
        if peer_tsep == Tsep::Sink {
            self.manager.negotiator_mut().take_config_updated();
            platform.audio_config(addr, &self.manager.negotiator().codec_status());
        }
    }

    fn opened_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        match event {
            AvEvent::Start {
                status,
                initiator,
                suspending,
                ..
            } => {
                if status.is_success() && suspending {
                    return;
                }
                let remote_sink = self.remote_is_sink();
                // a sink started by the peer while we have nothing to play
                let suspend_after = remote_sink && !initiator && !self.flags.pending_start;
                if remote_sink {
                    let start = StartResult {
                        status,
                        initiator,
                        suspending,
                    };
                    let ack = media::on_started(Some(&start), self.flags.pending_start, platform);
                    if ack.acked {
                        self.flags.pending_start = false;
                    }
                    if ack.setup_codec {
                        self.setup_codec(platform);
                    }
                }
                if !status.is_success() {
                    return;
                }
                if !remote_sink {
                    self.push_media(MediaCommand::SetRxFlush(false));
                }
                if self.flags.pending_start && remote_sink {
                    media::on_started(None, true, platform);
                }
                self.enter(SessionState::Started, platform);
                if suspend_after {
                    self.local_suspend(platform);
                }
            }
            AvEvent::Close { addr, .. } => {
                self.stopped_commands(None, platform);
                platform.connection_state(addr, ConnectionState::Disconnected);
                if self.flags.pending_start {
                    platform.ack(AckStatus::Failure);
                }
                self.enter(SessionState::Idle, platform);
            }
            AvEvent::Reconfig { status, .. } => {
                if status.is_success() {
                    self.reconfigured(platform);
                    if self.flags.pending_start {
                        self.dispatch(ScbEvent::ApiStart, platform);
                    }
                } else if self.flags.pending_start {
                    self.flags.pending_start = false;
                    platform.ack(AckStatus::Failure);
                }
            }
            _ => {}
        }
    }

    fn started_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        match event {
            AvEvent::Suspend { status, initiator, .. } => {
                let result = StopResult { status, initiator };
                self.suspended_commands(&result, platform);
                if !status.is_success() {
                    self.flags.local_suspend_pending = false;
                    if self.remote_is_sink() {
                        self.push_media(MediaCommand::SetTxFlush(false));
                    }
                    return;
                }
                let audio = if initiator {
                    AudioState::Stopped
                } else {
                    if !self.flags.local_suspend_pending {
                        self.flags.remote_suspend = true;
                    }
                    AudioState::RemoteSuspend
                };
                if let Some(peer) = self.peer {
                    platform.audio_state(peer, audio);
                }
                self.enter(SessionState::Opened, platform);
                self.flags.local_suspend_pending = false;
            }
            AvEvent::Stop { status, initiator, .. } => {
                self.flags.pending_stop = true;
                let result = StopResult { status, initiator };
                self.stopped_commands(Some(&result), platform);
                if let Some(peer) = self.peer {
                    platform.audio_state(peer, AudioState::Stopped);
                }
                if status.is_success() {
                    self.enter(SessionState::Opened, platform);
                }
            }
            AvEvent::Close { addr, .. } => {
                self.flags.pending_stop = true;
                self.stopped_commands(None, platform);
                platform.connection_state(addr, ConnectionState::Disconnected);
                self.enter(SessionState::Idle, platform);
            }
            AvEvent::Reconfig { status, .. } if status.is_success() => self.reconfigured(platform),
            _ => {}
        }
    }

    fn closing_event<P: ControlPlatform>(&mut self, event: AvEvent, platform: &mut P) {
        match event {
            AvEvent::Stop { .. } => self.stopped_commands(None, platform),
            AvEvent::Close { addr, .. } => {
                platform.connection_state(addr, ConnectionState::Disconnected);
                self.enter(SessionState::Idle, platform);
            }
            _ => {}
        }
    }

    fn enter<P: ControlPlatform>(&mut self, state: SessionState, platform: &mut P) {
        if self.state != state {
            info!("[SESSION] {} -> {}", self.state, state);
        }
        self.state = state;
        match state {
            SessionState::Idle => {
                if self.remote_is_sink() {
                    if self.source_streaming {
                        self.push_media(MediaCommand::TxStop);
                    }
                } else {
                    self.push_media(MediaCommand::SetRxFlush(true));
                    self.push_media(MediaCommand::SinkStop);
                    self.push_media(MediaCommand::ClearTrack);
                }
                self.peer = None;
                self.peer_tsep = None;
                self.edr = false;
                self.flags = SessionFlags::default();
                self.manager.negotiator_mut().reset();
            }
            SessionState::Opening => {
                if let Some(peer) = self.peer {
                    platform.connection_state(peer, ConnectionState::Connecting);
                }
            }
            SessionState::Opened => {
                self.flags.pending_stop = false;
                self.flags.pending_start = false;
            }
            SessionState::Started => {
                self.flags.remote_suspend = false;
                if let Some(peer) = self.peer {
                    platform.audio_state(peer, AudioState::Started);
                }
                if self.remote_is_sink() {
                    self.push_media(MediaCommand::TxStart);
                }
            }
            SessionState::Closing => {
                if self.remote_is_sink() {
                    self.push_media(MediaCommand::SetTxFlush(true));
                } else {
                    self.push_media(MediaCommand::SetRxFlush(true));
                }
            }
        }
    }

    fn reconfigured<P: ControlPlatform>(&mut self, platform: &mut P) {
        if !self.remote_is_sink() {
            return;
        }
        self.setup_codec(platform);
        if let Some(peer) = self.peer {
            self.manager.negotiator_mut().take_config_updated();
            platform.audio_config(peer, &self.manager.negotiator().codec_status());
        }
    }

    fn sink_config<P: ControlPlatform>(&mut self, addr: BluetoothAddress, codec_info: &CodecInfo, platform: &mut P) {
        match CodecCapabilities::from_info(codec_info).and_then(|caps| caps.feeding()) {
            Ok(feeding) => {
                self.push_media(MediaCommand::DecoderUpdate(*codec_info));
                platform.sink_audio_config(addr, feeding);
            }
            Err(error) => error!("[SESSION] unusable sink configuration: {}", error),
        }
    }

    /// Worker commands for a stream that stopped, `None` for a local stop
    fn stopped_commands<P: ControlPlatform>(&mut self, stop: Option<&StopResult>, platform: &mut P) {
        if self.remote_is_sink() {
            for command in media::on_stopped(stop, platform) {
                self.push_media(command);
            }
        } else if stop.is_none_or(|stop| stop.status.is_success()) {
            self.push_media(MediaCommand::SetRxFlush(true));
            self.push_media(MediaCommand::SinkStop);
        }
    }

    fn suspended_commands<P: ControlPlatform>(&mut self, suspend: &StopResult, platform: &mut P) {
        if self.remote_is_sink() {
            for command in media::on_suspended(suspend, platform) {
                self.push_media(command);
            }
        } else {
            self.push_media(MediaCommand::SetRxFlush(true));
            self.push_media(MediaCommand::SinkStop);
        }
    }

    fn setup_codec<P: ControlPlatform>(&mut self, platform: &P) {
        match self.media_snapshot(platform) {
            Some(snapshot) => self.push_media(MediaCommand::EncoderInit(snapshot)),
            None => warn!("[SESSION] no stream to configure the encoder for"),
        }
    }

    fn media_snapshot<P: ControlPlatform>(&self, platform: &P) -> Option<MediaSnapshot> {
        let peer = self.peer?;
        let scb = self.manager.scb(self.handle)?;
        let negotiator = self.manager.negotiator();
        Some(MediaSnapshot {
            config: negotiator.current_config(),
            peer_params: negotiator.peer_params(platform.peer_features(peer)),
            avdt_handle: scb.avdt_handle(),
            mtu: scb.stream_mtu(),
            cp_header: negotiator.cp_header_byte(),
        })
    }

    fn push_media(&mut self, command: MediaCommand) {
        match command {
            MediaCommand::TxStart => self.source_streaming = true,
            MediaCommand::TxStop => self.source_streaming = false,
            _ => {}
        }
        if self.media.push_back(command).is_err() {
            error!("[SESSION] media outbox full, dropping {}", command);
        }
    }

    fn remote_is_sink(&self) -> bool {
        let remote = self
            .peer_tsep
            .unwrap_or_else(|| self.manager.options().local_role.opposite());
        remote == Tsep::Sink
    }

    const fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Opened | SessionState::Started)
    }
}
