//! `Streambird` API Functions
//!
//! This module provides the public API functions for driving the A2DP core
//! from application code. They talk to the control task started by
//! [`crate::processor::run`] over static channels, one request at a time, and
//! are not coupled to any particular application architecture.
//!
//! # Usage
//!
//! ```rust,ignore
//! use streambird::api::{connect_device, get_state, start_stream};
//!
//! connect_device("00:1B:DC:0F:20:11").await?;
//!
//! // wait for the connection callback, then
//! start_stream().await?;
//!
//! let snapshot = get_state().await?;
//! ```

use crate::avdtp::{ErrorCode, SecurityData};
use crate::media::FocusState;
use crate::{
    AudioControl, AvError, BluetoothAddress, CodecStatus, CodecUserConfig, PcmFeeding, REQUEST_CHANNEL,
    RESPONSE_CHANNEL, Request, Response, SessionSnapshot,
};

async fn call(request: Request) -> Result<Response, AvError> {
    REQUEST_CHANNEL.sender().send(request).await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Error(e) => Err(e),
        response => Ok(response),
    }
}

async fn command(request: Request) -> Result<(), AvError> {
    match call(request).await? {
        Response::Accepted => Ok(()),
        _ => Err(AvError::UnexpectedResponse),
    }
}

/// Connect to a peer given as `XX:XX:XX:XX:XX:XX`
///
/// The outcome is reported through the connection state callback.
///
/// # Errors
///
/// Returns an error if the address is malformed or another peer is connected.
pub async fn connect_device(address: &str) -> Result<(), AvError> {
    let addr = BluetoothAddress::from_hex(address)?;
    connect(addr).await
}

/// Connect to a peer
///
/// # Errors
///
/// Returns an error if another peer is connected or a disconnect is in progress.
pub async fn connect(addr: BluetoothAddress) -> Result<(), AvError> {
    command(Request::Connect(addr)).await
}

/// Disconnect from the current peer
///
/// # Errors
///
/// Returns an error if `addr` is not the current peer.
pub async fn disconnect(addr: BluetoothAddress) -> Result<(), AvError> {
    command(Request::Disconnect(addr)).await
}

/// Start streaming on the open stream
///
/// # Errors
///
/// Returns an error if no stream is open.
pub async fn start_stream() -> Result<(), AvError> {
    command(Request::StartStream).await
}

/// Stop streaming
///
/// # Errors
///
/// Returns an error if no stream is open.
pub async fn stop_stream() -> Result<(), AvError> {
    command(Request::StopStream).await
}

/// Suspend streaming
///
/// # Errors
///
/// Returns an error if no stream is open.
pub async fn suspend_stream() -> Result<(), AvError> {
    command(Request::SuspendStream).await
}

/// Apply codec preferences, reconfiguring the stream if needed
///
/// # Errors
///
/// Returns an error if no stream is open or the peer cannot use the preferences.
pub async fn set_codec_config(config: CodecUserConfig) -> Result<(), AvError> {
    command(Request::SetCodecConfig(config)).await
}

/// Tell the core the PCM format the audio path now delivers
///
/// # Errors
///
/// Returns an error if no stream is open or no configuration matches.
pub async fn set_audio_feeding(feeding: PcmFeeding) -> Result<(), AvError> {
    command(Request::SetAudioFeeding(feeding)).await
}

/// Ask for hardware offload, answered through the offload callback
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn offload_start() -> Result<(), AvError> {
    command(Request::OffloadStart).await
}

/// Forward a command from the audio path
///
/// The command itself is acknowledged through [`crate::platform::AudioPath::ack`].
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn audio_control(control: AudioControl) -> Result<(), AvError> {
    command(Request::AudioControl(control)).await
}

/// Grant or withdraw audio focus for the sink output
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn set_sink_focus(focus: FocusState) -> Result<(), AvError> {
    command(Request::SetSinkFocus(focus)).await
}

/// Send content protection control data to the peer
///
/// # Errors
///
/// Returns an error if no stream is open or `data` is too long.
pub async fn security_request(data: &[u8]) -> Result<(), AvError> {
    let data = SecurityData::from_slice(data).map_err(|()| AvError::InvalidParameter)?;
    command(Request::SecurityRequest(data)).await
}

/// Answer the last content protection indication, `error` of `None` accepts it
///
/// # Errors
///
/// Returns an error if no stream is open or `data` is too long.
pub async fn security_response(error: Option<ErrorCode>, data: &[u8]) -> Result<(), AvError> {
    let data = SecurityData::from_slice(data).map_err(|()| AvError::InvalidParameter)?;
    command(Request::SecurityResponse { error, data }).await
}

/// Close the stream and stop the media worker
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn shutdown() -> Result<(), AvError> {
    command(Request::Shutdown).await
}

/// Get the current session state
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn get_state() -> Result<SessionSnapshot, AvError> {
    match call(Request::GetState).await? {
        Response::State(state) => Ok(state),
        _ => Err(AvError::UnexpectedResponse),
    }
}

/// Get the current and selectable codecs
///
/// # Errors
///
/// Returns an error if the control task answered unexpectedly.
pub async fn get_codec_status() -> Result<CodecStatus, AvError> {
    match call(Request::GetCodecStatus).await? {
        Response::CodecStatus(status) => Ok(status),
        _ => Err(AvError::UnexpectedResponse),
    }
}
