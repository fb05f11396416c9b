//! Receive pipeline of an audio sink
//!
//! Received media packets are queued untouched. Decoding starts once a few
//! packets are buffered and then runs on a periodic tick, decoding a fixed
//! number of codec frames per tick. A packet whose frames do not fit into one
//! tick is resumed on the next.

use heapless::Deque;

use crate::codec::{CodecInfo, PcmFeeding};
use crate::constants::{MAX_INPUT_FRAME_QUEUE_SZ, MAX_PCM_DECODE_SIZE};
use crate::platform::{AudioTrack, Decoded, Decoder, TimerId, Timers};

use super::{FocusState, MediaSinkOptions, PipelineState, SinkPayload};

/// Frame count in the low nibble of the media payload header
const FRAME_COUNT_MASK: u8 = 0x0F;

#[derive(Debug)]
struct SinkPacket {
    payload: SinkPayload,
    offset: usize,
    frames_left: u8,
}

/// Audio sink receive pipeline
pub struct MediaSink<D> {
    decoder: D,
    state: PipelineState,
    queue: Deque<SinkPacket, MAX_INPUT_FRAME_QUEUE_SZ>,
    max_len: usize,
    tick_ms: u32,
    delayed_start_frames: usize,
    frames_to_process: u8,
    feeding: Option<PcmFeeding>,
    focus: FocusState,
    rx_flush: bool,
    decoding: bool,
    pcm: [u8; MAX_PCM_DECODE_SIZE],
}

impl<D: Decoder> MediaSink<D> {
    /// Create a stopped pipeline around `decoder`
    pub fn new(decoder: D, options: MediaSinkOptions) -> Self {
        let max_len = options.max_rx_queue_len.clamp(1, MAX_INPUT_FRAME_QUEUE_SZ);
        Self {
            decoder,
            state: PipelineState::Off,
            queue: Deque::new(),
            max_len,
            tick_ms: options.tick_ms,
            delayed_start_frames: options.delayed_start_frames.clamp(1, max_len),
            frames_to_process: 0,
            feeding: None,
            focus: FocusState::NotGranted,
            rx_flush: false,
            decoding: false,
            pcm: [0; MAX_PCM_DECODE_SIZE],
        }
    }

    /// Pipeline lifecycle state
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of queued packets
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the decode tick is running
    pub const fn is_decoding(&self) -> bool {
        self.decoding
    }

    /// Current audio focus
    pub const fn focus(&self) -> FocusState {
        self.focus
    }

    /// Whether received packets are being discarded
    pub const fn is_flushing(&self) -> bool {
        self.rx_flush
    }

    /// PCM format of the current audio track
    pub const fn feeding(&self) -> Option<PcmFeeding> {
        self.feeding
    }

    /// Decoder plugin
    pub const fn decoder(&self) -> &D {
        &self.decoder
    }

    pub(crate) fn startup(&mut self) {
        if self.state != PipelineState::Off {
            return;
        }
        self.state = PipelineState::StartingUp;
        self.focus = FocusState::NotGranted;
        self.rx_flush = false;
        self.frames_to_process = 0;
        self.state = PipelineState::Running;
        info!("[SINK] running");
    }

    pub(crate) fn shutdown<P: Timers>(&mut self, timers: &mut P) {
        if self.state == PipelineState::Off {
            return;
        }
        self.state = PipelineState::ShuttingDown;
        if self.decoding {
            timers.cancel(TimerId::SinkDecode);
            self.decoding = false;
        }
        self.queue.clear();
        self.rx_flush = false;
        self.frames_to_process = 0;
        self.state = PipelineState::Off;
        info!("[SINK] off");
    }

    /// Queue one received media packet
    ///
    /// Returns the queue length seen by the packet. When the queue is full the
    /// oldest packet is dropped and the new one is not queued.
    pub fn enqueue<P: Timers + AudioTrack>(&mut self, payload: SinkPayload, platform: &mut P) -> usize {
        if self.state != PipelineState::Running {
            trace!("[SINK] not running, dropping packet");
            return 0;
        }
        if self.rx_flush {
            return self.queue.len();
        }

        let len = self.queue.len();
        if len >= self.max_len {
            warn!("[SINK] rx queue full, dropping oldest packet");
            self.queue.pop_front();
            return len;
        }

        let Some(&header) = payload.first() else {
            return len;
        };
        let packet = SinkPacket {
            frames_left: header & FRAME_COUNT_MASK,
            offset: 1,
            payload,
        };
        if self.queue.push_back(packet).is_err() {
            return len;
        }

        let len = self.queue.len();
        if len >= self.delayed_start_frames {
            self.start_decoding(platform);
        }
        len
    }

    fn start_decoding<P: Timers + AudioTrack>(&mut self, platform: &mut P) {
        if self.decoding {
            return;
        }
        debug!("[SINK] start decoding, tick {}ms", self.tick_ms);
        platform.start();
        platform.arm_periodic(TimerId::SinkDecode, self.tick_ms);
        self.decoding = true;
    }

    /// Stop decoding and drop everything queued
    pub fn stop_decoding<P: Timers + AudioTrack>(&mut self, platform: &mut P) {
        self.rx_flush = true;
        self.queue.clear();
        if self.decoding {
            platform.cancel(TimerId::SinkDecode);
            self.decoding = false;
        }
        platform.pause();
    }

    /// Run one decode tick
    pub fn tick<P: AudioTrack>(&mut self, track: &mut P) {
        if self.queue.is_empty() {
            trace!("[SINK] empty queue");
            return;
        }
        if self.focus == FocusState::NotGranted {
            trace!("[SINK] no focus, skip decoding");
            return;
        }
        if self.rx_flush {
            self.queue.clear();
            return;
        }

        let mut to_process = self.frames_to_process;
        while to_process > 0 {
            let Some(packet) = self.queue.front_mut() else {
                break;
            };
            if packet.frames_left > to_process {
                decode_frames(&mut self.decoder, &mut self.pcm, packet, to_process, track);
                packet.frames_left -= to_process;
                break;
            }

            let frames = packet.frames_left;
            decode_frames(&mut self.decoder, &mut self.pcm, packet, frames, track);
            to_process -= frames;
            self.queue.pop_front();
        }
    }

    /// Configure the decoder and create the audio track
    pub fn decoder_update<P: AudioTrack>(&mut self, config: &CodecInfo, track: &mut P) {
        let feeding = match self.decoder.init(config) {
            Ok(feeding) => feeding,
            Err(e) => {
                error!("[SINK] decoder init failed: {}", e);
                return;
            }
        };
        self.rx_flush = false;
        track.create(&feeding);
        self.feeding = Some(feeding);

        self.frames_to_process = self.decoder.frames_per_tick(self.tick_ms);
        if self.frames_to_process == 0 {
            error!("[SINK] decoder produces no frames per {}ms tick", self.tick_ms);
        }
        info!(
            "[SINK] decoder ready: {} {}Hz, {} frames per tick",
            config.codec_name(),
            feeding.sample_rate,
            self.frames_to_process
        );
    }

    pub(crate) fn clear_track<P: AudioTrack>(&mut self, track: &mut P) {
        track.delete();
        self.feeding = None;
    }

    /// Change the audio focus
    ///
    /// Losing focus drops everything queued and keeps dropping until focus is
    /// granted again.
    pub fn set_focus(&mut self, focus: FocusState) {
        debug!("[SINK] focus {}", focus);
        self.focus = focus;
        match focus {
            FocusState::NotGranted => {
                self.queue.clear();
                self.rx_flush = true;
            }
            FocusState::Granted => self.rx_flush = false,
        }
    }

    pub(crate) fn rx_flush(&mut self) {
        self.queue.clear();
    }

    pub(crate) fn set_rx_flush(&mut self, enable: bool) {
        self.rx_flush = enable;
    }
}

fn decode_frames<D: Decoder, T: AudioTrack>(
    decoder: &mut D,
    pcm: &mut [u8],
    packet: &mut SinkPacket,
    frames: u8,
    track: &mut T,
) {
    let mut produced = 0;
    for _ in 0..frames {
        let Some(input) = packet.payload.get(packet.offset..).filter(|input| !input.is_empty()) else {
            break;
        };
        let Some(out) = pcm.get_mut(produced..) else {
            break;
        };
        match decoder.decode_frame(input, out) {
            Ok(Decoded { consumed, produced: n }) if consumed > 0 => {
                packet.offset += consumed;
                produced = (produced + n).min(pcm.len());
            }
            Ok(_) => break,
            Err(e) => {
                warn!("[SINK] decode failed: {}", e);
                break;
            }
        }
    }
    if produced > 0 {
        track.write(&pcm[..produced]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sbc::SbcCapabilities;
    use crate::testing::{MockDecoder, MockMedia, TrackEvent};

    const FRAME_LEN: usize = 4;

    fn packet(frames: u8) -> SinkPayload {
        let mut payload = SinkPayload::new();
        payload.push(frames).unwrap();
        for _ in 0..usize::from(frames) * FRAME_LEN {
            payload.push(0xAB).unwrap();
        }
        payload
    }

    fn ready(frames_per_tick: u8, media: &mut MockMedia) -> MediaSink<MockDecoder> {
        let decoder = MockDecoder {
            frame_len: FRAME_LEN,
            frames_per_tick,
            ..MockDecoder::default()
        };
        let mut sink = MediaSink::new(decoder, MediaSinkOptions::default());
        sink.startup();
        sink.decoder_update(&SbcCapabilities::sink_default().to_info(), media);
        sink.set_focus(FocusState::Granted);
        sink
    }

    #[test]
    fn test_delayed_start() {
        let mut media = MockMedia::default();
        let mut sink = ready(10, &mut media);
        for n in 1..5 {
            assert_eq!(sink.enqueue(packet(1), &mut media), n);
            assert!(!sink.is_decoding());
        }
        assert_eq!(sink.enqueue(packet(1), &mut media), 5);
        assert!(sink.is_decoding());
        assert_eq!(media.periodic.as_slice(), &[(TimerId::SinkDecode, 20)]);
        assert!(media.track.contains(&TrackEvent::Start));
    }

    #[test]
    fn test_packet_split_across_ticks() {
        let mut media = MockMedia::default();
        let mut sink = ready(3, &mut media);
        sink.enqueue(packet(5), &mut media);
        sink.enqueue(packet(2), &mut media);

        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 3);
        assert_eq!(sink.queue_len(), 2);

        // Two frames left in the first packet, one taken from the second
        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 6);
        assert_eq!(sink.queue_len(), 1);

        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 7);
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(media.written.len(), 7 * MockDecoder::PCM_PER_FRAME);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut media = MockMedia::default();
        let decoder = MockDecoder::default();
        let mut sink = MediaSink::new(
            decoder,
            MediaSinkOptions {
                max_rx_queue_len: 2,
                delayed_start_frames: 2,
                ..MediaSinkOptions::default()
            },
        );
        sink.startup();
        sink.enqueue(packet(1), &mut media);
        sink.enqueue(packet(2), &mut media);
        assert_eq!(sink.enqueue(packet(3), &mut media), 2);
        assert_eq!(sink.queue_len(), 1);
        assert_eq!(sink.queue.front().map(|p| p.frames_left), Some(2));
    }

    #[test]
    fn test_focus_gates_decoding() {
        let mut media = MockMedia::default();
        let mut sink = ready(10, &mut media);
        sink.enqueue(packet(1), &mut media);

        sink.set_focus(FocusState::NotGranted);
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(sink.enqueue(packet(1), &mut media), 0);
        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 0);

        sink.set_focus(FocusState::Granted);
        sink.enqueue(packet(1), &mut media);
        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 1);
    }

    #[test]
    fn test_stop_decoding_flushes() {
        let mut media = MockMedia::default();
        let mut sink = ready(10, &mut media);
        for _ in 0..5 {
            sink.enqueue(packet(1), &mut media);
        }
        assert!(sink.is_decoding());

        sink.stop_decoding(&mut media);
        assert!(!sink.is_decoding());
        assert!(sink.is_flushing());
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(media.cancelled.as_slice(), &[TimerId::SinkDecode]);
        assert!(media.track.contains(&TrackEvent::Pause));

        // A new configuration accepts packets again
        sink.decoder_update(&SbcCapabilities::sink_default().to_info(), &mut media);
        assert_eq!(sink.enqueue(packet(1), &mut media), 1);
    }

    #[test]
    fn test_decoder_update_creates_track() {
        let mut media = MockMedia::default();
        let sink = ready(7, &mut media);
        assert_eq!(sink.frames_to_process, 7);
        assert_eq!(sink.feeding(), Some(PcmFeeding::default()));
        assert_eq!(media.track.first(), Some(&TrackEvent::Create(PcmFeeding::default())));
    }

    #[test]
    fn test_decode_error_stops_packet() {
        let mut media = MockMedia::default();
        let mut sink = ready(10, &mut media);
        sink.decoder.fail_after = Some(1);
        sink.enqueue(packet(3), &mut media);
        sink.tick(&mut media);
        assert_eq!(sink.decoder().decoded, 1);
        assert_eq!(sink.queue_len(), 0);
        assert_eq!(media.written.len(), MockDecoder::PCM_PER_FRAME);
    }
}
