//! Processor tasks - control plane and media worker
//!
//! The control task owns the [`Session`] and serialises everything that
//! touches stream state: API requests, transport events and control timers.
//! The media task owns the [`MediaWorker`] and only ever sees
//! [`MediaCommand`]s, encode and decode ticks, and received media packets.
//!
//! # Usage
//!
//! ```rust,ignore
//! use streambird::{AvOptions, MediaSinkOptions, MediaSourceOptions, processor};
//! use streambird::media::MediaWorker;
//!
//! let worker = MediaWorker::new(encoder, decoder, MediaSourceOptions::default(), MediaSinkOptions::default());
//! processor::run(AvOptions::default(), &mut control_platform, worker, &mut media_platform).await?;
//! ```
//!
//! Platform callbacks report back with the `post_*` functions. They never
//! block, so they can be called from interrupt or driver contexts.
//!
//! # Architecture
//!
//! * **Control task**: API requests with responses, stream events, close guard timer
//! * **Media task**: worker commands, ticks and received media, no responses

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::constants::{CONTROL_CHANNEL_DEPTH, MEDIA_CHANNEL_DEPTH};
use crate::media::{MediaCommand, MediaWorker, SinkPayload};
use crate::platform::{ControlPlatform, Decoder, Encoder, MediaPlatform, TimerId};
use crate::session::Session;
use crate::ssm::ScbEvent;
use crate::{AvError, AvOptions, REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response};

/// Events for the control task
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlEvent {
    /// Transport event for the stream
    Stream(ScbEvent),
    /// A control timer expired
    TimerExpired(TimerId),
}

pub(crate) static CONTROL_CHANNEL: Channel<CriticalSectionRawMutex, ControlEvent, CONTROL_CHANNEL_DEPTH> =
    Channel::new();

pub(crate) static MEDIA_CHANNEL: Channel<CriticalSectionRawMutex, MediaCommand, MEDIA_CHANNEL_DEPTH> =
    Channel::new();

pub(crate) static SINK_DATA_CHANNEL: Channel<CriticalSectionRawMutex, SinkPayload, MEDIA_CHANNEL_DEPTH> =
    Channel::new();

/// Report a transport event for the stream
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the control channel is full.
pub fn post_stream_event(event: ScbEvent) -> Result<(), AvError> {
    CONTROL_CHANNEL
        .try_send(ControlEvent::Stream(event))
        .map_err(|_| AvError::QueueFull)
}

/// Report a timer expiration
///
/// The close guard goes to the control task, ticks to the media task.
///
/// # Errors
///
/// Returns [`AvError::QueueFull`] if the target channel is full.
pub fn post_timer_expired(id: TimerId) -> Result<(), AvError> {
    let sent = match id {
        TimerId::CloseGuard(_) => CONTROL_CHANNEL.try_send(ControlEvent::TimerExpired(id)).is_ok(),
        TimerId::MediaTick => MEDIA_CHANNEL.try_send(MediaCommand::Tick).is_ok(),
        TimerId::SinkDecode => MEDIA_CHANNEL.try_send(MediaCommand::SinkTick).is_ok(),
    };
    if sent { Ok(()) } else { Err(AvError::QueueFull) }
}

/// Hand a received media packet to the sink pipeline
///
/// # Errors
///
/// Returns [`AvError::InvalidParameter`] if the packet is larger than a media
/// frame and [`AvError::QueueFull`] if the sink channel is full.
pub fn post_sink_data(packet: &[u8]) -> Result<(), AvError> {
    let payload = SinkPayload::from_slice(packet).map_err(|()| AvError::InvalidParameter)?;
    SINK_DATA_CHANNEL.try_send(payload).map_err(|_| AvError::QueueFull)
}

async fn flush_media_commands(session: &mut Session) {
    while let Some(command) = session.pop_media_command() {
        MEDIA_CHANNEL.sender().send(command).await;
    }
}

async fn control_processor<C: ControlPlatform>(mut session: Session, platform: &mut C) -> ! {
    let api_receiver = REQUEST_CHANNEL.receiver();
    let api_sender = RESPONSE_CHANNEL.sender();
    let control_receiver = CONTROL_CHANNEL.receiver();

    flush_media_commands(&mut session).await;
    loop {
        match select(api_receiver.receive(), control_receiver.receive()).await {
            Either::First(request) => {
                debug!("[PROCESSOR] API request: {}", request);
                let response = process_request(&mut session, request, platform);
                flush_media_commands(&mut session).await;
                api_sender.send(response).await;
            }
            Either::Second(event) => {
                trace!("[PROCESSOR] control event: {}", event);
                match event {
                    ControlEvent::Stream(event) => session.dispatch(event, platform),
                    ControlEvent::TimerExpired(id) => session.timer_expired(id, platform),
                }
                flush_media_commands(&mut session).await;
            }
        }
    }
}

async fn media_processor<E: Encoder, D: Decoder, M: MediaPlatform>(
    mut worker: MediaWorker<E, D>,
    platform: &mut M,
) -> ! {
    let command_receiver = MEDIA_CHANNEL.receiver();
    let data_receiver = SINK_DATA_CHANNEL.receiver();

    loop {
        match select(command_receiver.receive(), data_receiver.receive()).await {
            Either::First(command) => worker.handle(command, platform),
            Either::Second(payload) => worker.handle_sink_data(payload, platform),
        }
    }
}

/// Apply one API request to the session
pub(crate) fn process_request<C: ControlPlatform>(session: &mut Session, request: Request, platform: &mut C) -> Response {
    let result = match request {
        Request::Connect(addr) => session.connect(addr, platform),
        Request::Disconnect(addr) => session.disconnect(addr, platform),
        Request::StartStream => session.start_stream(platform),
        Request::StopStream => session.stop_stream(platform),
        Request::SuspendStream => session.suspend_stream(platform),
        Request::SetCodecConfig(config) => session.set_codec_config(&config, platform),
        Request::SetAudioFeeding(feeding) => session.set_audio_feeding(feeding, platform),
        Request::OffloadStart => {
            session.offload_start(platform);
            Ok(())
        }
        Request::AudioControl(command) => {
            session.audio_control(command, platform);
            Ok(())
        }
        Request::SetSinkFocus(focus) => {
            session.set_sink_focus(focus);
            Ok(())
        }
        Request::SecurityRequest(data) => session.security_request(data, platform),
        Request::SecurityResponse { error, data } => session.security_response(error, data, platform),
        Request::Shutdown => {
            session.shutdown(platform);
            Ok(())
        }
        Request::GetState => return Response::State(session.snapshot()),
        Request::GetCodecStatus => return Response::CodecStatus(session.codec_status()),
    };
    match result {
        Ok(()) => Response::Accepted,
        Err(error) => {
            warn!("[PROCESSOR] request failed: {}", error);
            Response::Error(error)
        }
    }
}

/// Run the control and media tasks
///
/// Never returns once the session is set up.
///
/// # Errors
///
/// Returns an error if the local endpoints cannot be registered.
pub async fn run<C, M, E, D>(
    options: AvOptions,
    control: &mut C,
    worker: MediaWorker<E, D>,
    media: &mut M,
) -> Result<(), AvError>
where
    C: ControlPlatform,
    M: MediaPlatform,
    E: Encoder,
    D: Decoder,
{
    let session = Session::new(options)?;
    info!("[PROCESSOR] A2DP core running as {}", options.local_role);

    select(control_processor(session, control), media_processor(worker, media)).await;
    Ok(())
}
