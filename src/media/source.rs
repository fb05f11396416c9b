//! Transmit pipeline of an audio source
//!
//! Every media tick the encoder pulls the PCM due since the last tick, encodes
//! it and hands the packets to the transmit queue. The queue is then drained
//! towards the media channel one packet per write confirmation. When the
//! queue would overflow it is emptied in one go and the dropout counted, so a
//! slow link produces one audible gap instead of an ever growing latency.

use crate::constants::MAX_OUTPUT_FRAME_QUEUE_SZ;
use crate::platform::{AudioPath, Encoder, FrameSink, MediaTransport, PcmReader, PcmSource, TimerId, Timers};
use crate::AckStatus;

use super::fragment::Packetizer;
use super::queue::{MediaFrame, TxQueue};
use super::stats::{MediaStats, SessionMetrics};
use super::{MediaSnapshot, MediaSourceOptions, PipelineState};

/// PCM reader that records short reads
struct PcmFeed<'a, P> {
    pcm: &'a mut P,
    now_us: u64,
    underflow_bytes: u32,
    underflow_count: u32,
}

impl<P: PcmSource> PcmReader for PcmFeed<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.pcm.read_pcm(buf).min(buf.len());
        if read < buf.len() {
            let missing = u32::try_from(buf.len() - read).unwrap_or(u32::MAX);
            self.underflow_bytes = self.underflow_bytes.saturating_add(missing);
            self.underflow_count += 1;
            trace!("[MEDIA] pcm underflow {} bytes at {}", missing, self.now_us);
        }
        read
    }
}

/// Frame sink in front of the transmit queue
struct TxSink<'a> {
    queue: &'a mut TxQueue,
    stats: &'a mut MediaStats,
    timer_armed: bool,
    tx_flush: bool,
    now_us: u64,
    rssi_requested: &'a mut bool,
}

impl FrameSink for TxSink<'_> {
    fn enqueue(&mut self, frame: MediaFrame, frames_n: u8) -> bool {
        if !self.timer_armed {
            return false;
        }

        if self.tx_flush {
            debug!("[MEDIA] tx suspended, discarding frame");
            self.stats.total_flushed_messages += flushed_count(self.queue.flush());
            return false;
        }

        if self.queue.would_overflow(frames_n) {
            let dropped = flushed_count(self.queue.len());
            warn!(
                "[MEDIA] tx queue overflow, dropping {} packets (max {})",
                dropped,
                self.queue.max_len()
            );
            self.stats.dropouts += 1;
            self.stats.last_dropout_us = self.now_us;
            self.stats.max_dropped_messages = self.stats.max_dropped_messages.max(dropped);
            self.stats.total_dropped_messages += dropped;
            self.queue.flush();
            *self.rssi_requested = true;
        }

        self.stats.total_frames += u32::from(frames_n);
        self.stats.max_frames_per_packet = self.stats.max_frames_per_packet.max(frames_n);
        if self.queue.push(frame).is_err() {
            // Only reachable when a single packet carries more frames than the bound
            self.stats.total_dropped_messages += 1;
        }
        true
    }
}

fn flushed_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Audio source transmit pipeline
pub struct MediaSource<E> {
    encoder: E,
    state: PipelineState,
    queue: TxQueue,
    packetizer: Packetizer,
    snapshot: Option<MediaSnapshot>,
    stats: MediaStats,
    accumulated: MediaStats,
    last_metrics: Option<SessionMetrics>,
    default_interval_ms: u32,
    timer_armed: bool,
    tx_flush: bool,
    congested: bool,
    rssi_requested: bool,
}

impl<E: Encoder> MediaSource<E> {
    /// Create a stopped pipeline around `encoder`
    pub fn new(encoder: E, options: MediaSourceOptions) -> Self {
        Self {
            encoder,
            state: PipelineState::Off,
            queue: TxQueue::new(options.max_tx_queue_len.min(MAX_OUTPUT_FRAME_QUEUE_SZ)),
            packetizer: Packetizer::new(),
            snapshot: None,
            stats: MediaStats::default(),
            accumulated: MediaStats::default(),
            last_metrics: None,
            default_interval_ms: options.default_encoder_interval_ms,
            timer_armed: false,
            tx_flush: false,
            congested: false,
            rssi_requested: false,
        }
    }

    /// Pipeline lifecycle state
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Whether the media tick is running
    pub const fn is_streaming(&self) -> bool {
        self.timer_armed
    }

    /// Number of queued packets
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Encoder plugin
    pub const fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Statistics of the running session
    pub const fn stats(&self) -> &MediaStats {
        &self.stats
    }

    /// Statistics of all sessions, including the running one
    pub fn total_stats(&self) -> MediaStats {
        let mut total = self.accumulated;
        let mut current = self.stats;
        current.accumulate_into(&mut total);
        total
    }

    /// Figures of the last finished session
    pub const fn last_metrics(&self) -> Option<SessionMetrics> {
        self.last_metrics
    }

    /// Configuration the encoder runs with
    pub const fn snapshot(&self) -> Option<&MediaSnapshot> {
        self.snapshot.as_ref()
    }

    fn interval_ms(&self) -> u32 {
        match self.encoder.encoder_interval_ms() {
            0 => self.default_interval_ms,
            ms => ms,
        }
    }

    pub(crate) fn startup(&mut self) {
        if self.state != PipelineState::Off {
            warn!("[MEDIA] source startup in state {}", self.state);
            return;
        }
        self.state = PipelineState::StartingUp;
        self.stats = MediaStats::default();
        self.accumulated = MediaStats::default();
        self.tx_flush = false;
        self.congested = false;
        self.state = PipelineState::Running;
        info!("[MEDIA] source running");
    }

    pub(crate) fn shutdown<P: Timers>(&mut self, timers: &mut P) {
        if self.state == PipelineState::Off {
            return;
        }
        self.state = PipelineState::ShuttingDown;
        if self.timer_armed {
            timers.cancel(TimerId::MediaTick);
            self.timer_armed = false;
        }
        self.queue.flush();
        self.snapshot = None;
        self.tx_flush = false;
        self.state = PipelineState::Off;
        info!("[MEDIA] source off");
    }

    /// Configure the encoder for a stream
    ///
    /// A failed init leaves the pipeline without a configuration; ticks then
    /// discard what they dequeue.
    pub fn encoder_init(&mut self, snapshot: &MediaSnapshot) {
        match self.encoder.init(&snapshot.peer_params, &snapshot.config) {
            Ok(()) => {
                info!(
                    "[MEDIA] encoder ready: {} mtu {} interval {}ms",
                    snapshot.config.codec_name(),
                    snapshot.mtu,
                    self.interval_ms()
                );
                self.snapshot = Some(*snapshot);
            }
            Err(e) => {
                error!("[MEDIA] encoder init failed: {}", e);
                self.snapshot = None;
            }
        }
    }

    pub(crate) fn update_feeding(&mut self, feeding: &crate::codec::PcmFeeding) {
        debug!("[MEDIA] feeding update {}", feeding);
        self.encoder.update_feeding(feeding);
    }

    pub(crate) fn set_tx_flush(&mut self, enable: bool) {
        debug!("[MEDIA] tx flush {}", enable);
        self.tx_flush = enable;
    }

    /// Gate the media channel; clearing it sends the next queued packet
    pub(crate) fn set_congested<P: MediaTransport + Timers>(&mut self, congested: bool, platform: &mut P) {
        self.congested = congested;
        if !congested && self.timer_armed {
            let now_us = platform.now_us();
            self.transmit(platform, now_us);
        }
    }

    /// Start the media tick for a new session
    pub fn tx_start<P: Timers>(&mut self, timers: &mut P) {
        if self.state != PipelineState::Running {
            warn!("[MEDIA] tx start while {}", self.state);
            return;
        }
        if self.timer_armed {
            error!("[MEDIA] media tick already running, re-arming");
            timers.cancel(TimerId::MediaTick);
            self.timer_armed = false;
        }

        let now_us = timers.now_us();
        self.stats.accumulate_into(&mut self.accumulated);
        self.stats.session_start_us = if now_us == 0 { 1 } else { now_us };
        self.stats.session_end_us = 0;
        self.encoder.feeding_reset();

        let interval = self.interval_ms();
        info!("[MEDIA] tx start, tick {}ms", interval);
        timers.arm_periodic(TimerId::MediaTick, interval);
        self.timer_armed = true;
        self.congested = false;
    }

    /// Stop the media tick, close the audio path and acknowledge the stop
    pub fn tx_stop<P: Timers + AudioPath>(&mut self, platform: &mut P) {
        let now_us = platform.now_us();
        self.stats.session_end_us = now_us;
        let metrics = self.stats.metrics(self.interval_ms(), now_us);
        if let Some(duration) = metrics.audio_duration_ms {
            info!(
                "[MEDIA] session {}ms, {} ticks, {} overruns, {} underruns",
                duration,
                metrics.total_scheduling_count,
                metrics.buffer_overruns_total,
                metrics.buffer_underruns_count
            );
            self.last_metrics = Some(metrics);
        }
        self.stats.accumulate_into(&mut self.accumulated);

        let send_ack = self.timer_armed;
        platform.cancel(TimerId::MediaTick);
        self.timer_armed = false;

        platform.close();
        if send_ack {
            platform.ack(AckStatus::Success);
        }

        self.tx_flush = false;
        self.encoder.feeding_reset();
    }

    /// Drop queued packets and buffered PCM
    pub fn tx_flush(&mut self, now_us: u64) {
        self.encoder.feeding_flush();
        let flushed = self.queue.flush();
        debug!("[MEDIA] tx flush, {} packets", flushed);
        self.stats.total_flushed_messages += flushed_count(flushed);
        self.stats.last_flushed_us = now_us;
    }

    /// Take the next packet for the media channel
    ///
    /// Every call is counted as a read; scheduling is only tracked for calls
    /// that return a packet.
    pub fn dequeue_for_transmit(&mut self, now_us: u64) -> Option<MediaFrame> {
        self.stats.total_readbuf_calls += 1;
        self.stats.last_readbuf_us = now_us;
        let frame = self.queue.pop()?;
        self.stats
            .dequeue
            .update(now_us, u64::from(self.interval_ms()) * 1000);
        Some(frame)
    }

    /// Run one media tick
    pub fn tick<P: MediaTransport + Timers + PcmSource>(&mut self, platform: &mut P) {
        if !self.timer_armed {
            error!("[MEDIA] tick while media tick is not running");
            return;
        }

        let now_us = platform.now_us();
        let interval_us = u64::from(self.interval_ms()) * 1000;
        self.encoder.set_transmit_queue_length(self.queue.len());

        let mut feed = PcmFeed {
            pcm: &mut *platform,
            now_us,
            underflow_bytes: 0,
            underflow_count: 0,
        };
        let mut sink = TxSink {
            queue: &mut self.queue,
            stats: &mut self.stats,
            timer_armed: self.timer_armed,
            tx_flush: self.tx_flush,
            now_us,
            rssi_requested: &mut self.rssi_requested,
        };
        self.encoder.send_frames(now_us, &mut feed, &mut sink);

        if feed.underflow_count > 0 {
            self.stats.underflow_bytes = self.stats.underflow_bytes.saturating_add(feed.underflow_bytes);
            self.stats.underflow_count += feed.underflow_count;
            self.stats.last_underflow_us = now_us;
        }
        self.stats.enqueue.update(now_us, interval_us);

        self.transmit(platform, now_us);

        if self.rssi_requested {
            self.rssi_requested = false;
            if let Some(snapshot) = &self.snapshot {
                platform.request_rssi(snapshot.avdt_handle);
            }
        }
    }

    fn transmit<P: MediaTransport>(&mut self, transport: &mut P, now_us: u64) {
        if self.congested {
            trace!("[MEDIA] channel congested, {} queued", self.queue.len());
            return;
        }
        let Some(frame) = self.dequeue_for_transmit(now_us) else {
            return;
        };
        let Some(snapshot) = self.snapshot else {
            warn!("[MEDIA] no encoder configuration, dropping packet");
            return;
        };

        match self.packetizer.packets(&frame, snapshot.mtu, snapshot.cp_header) {
            Some(packets) => {
                for packet in packets {
                    if let Err(e) = transport.send_media(snapshot.avdt_handle, &packet) {
                        warn!("[MEDIA] send failed: {}", e);
                        break;
                    }
                }
            }
            None => error!("[MEDIA] mtu {} leaves no room for payload", snapshot.mtu),
        }
        self.congested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sbc::SbcCapabilities;
    use crate::codec::PeerParams;
    use crate::testing::{MockEncoder, MockMedia};
    use crate::TransportError;

    fn snapshot(mtu: u16) -> MediaSnapshot {
        MediaSnapshot {
            config: SbcCapabilities::source_default().to_info(),
            peer_params: PeerParams::default(),
            avdt_handle: 1,
            mtu,
            cp_header: None,
        }
    }

    fn running(encoder: MockEncoder, max_tx_queue_len: usize) -> MediaSource<MockEncoder> {
        let mut source = MediaSource::new(
            encoder,
            MediaSourceOptions {
                max_tx_queue_len,
                ..MediaSourceOptions::default()
            },
        );
        source.startup();
        source.encoder_init(&snapshot(600));
        source
    }

    #[test]
    fn test_tx_start_arms_tick() {
        let mut media = MockMedia::default();
        let mut source = running(MockEncoder::default(), 10);
        assert_eq!(source.state(), PipelineState::Running);

        media.now_us = 0;
        source.tx_start(&mut media);
        assert!(source.is_streaming());
        assert_eq!(media.periodic.as_slice(), &[(TimerId::MediaTick, 20)]);
        assert_eq!(source.stats().session_start_us, 1);
        assert_eq!(source.encoder().resets, 1);

        // A second start re-arms with the encoder's current interval
        source.encoder.interval_ms = 23;
        source.tx_start(&mut media);
        assert!(source.is_streaming());
        assert_eq!(media.cancelled.as_slice(), &[TimerId::MediaTick]);
        assert_eq!(
            media.periodic.as_slice(),
            &[(TimerId::MediaTick, 20), (TimerId::MediaTick, 23)]
        );
        assert_eq!(source.encoder().resets, 2);
    }

    #[test]
    fn test_overflow_flushes_queue() {
        let mut media = MockMedia::default();
        let mut source = running(
            MockEncoder {
                packets_per_tick: 11,
                ..MockEncoder::default()
            },
            10,
        );
        source.tx_start(&mut media);
        source.set_congested(true, &mut media);

        media.now_us = 20_000;
        source.tick(&mut media);

        assert_eq!(source.queue_len(), 1);
        let stats = source.stats();
        assert_eq!(stats.dropouts, 1);
        assert_eq!(stats.total_dropped_messages, 10);
        assert_eq!(stats.max_dropped_messages, 10);
        assert_eq!(stats.last_dropout_us, 20_000);
        assert_eq!(stats.total_frames, 11);
        assert_eq!(media.rssi_requests, 1);
    }

    #[test]
    fn test_tx_flush_discards_encoded_frames() {
        let mut media = MockMedia::default();
        let mut source = running(
            MockEncoder {
                packets_per_tick: 3,
                ..MockEncoder::default()
            },
            10,
        );
        source.tx_start(&mut media);
        source.set_congested(true, &mut media);
        source.tick(&mut media);
        assert_eq!(source.queue_len(), 3);

        source.set_tx_flush(true);
        source.tick(&mut media);
        assert_eq!(source.queue_len(), 0);
        assert_eq!(source.stats().total_flushed_messages, 3);
        // The encoder stops on the first rejected frame
        assert_eq!(source.stats().total_frames, 3);
    }

    #[test]
    fn test_congestion_gates_transmit() {
        let mut media = MockMedia::default();
        let mut source = running(
            MockEncoder {
                packets_per_tick: 2,
                ..MockEncoder::default()
            },
            10,
        );
        source.tx_start(&mut media);

        source.tick(&mut media);
        assert_eq!(media.sent.len(), 1);
        assert_eq!(source.queue_len(), 1);

        // Still waiting for the write confirmation
        source.tick(&mut media);
        assert_eq!(media.sent.len(), 1);
        assert_eq!(source.queue_len(), 3);

        // The write confirmation sends the next packet right away
        source.set_congested(false, &mut media);
        assert_eq!(media.sent.len(), 2);
        assert_eq!(source.queue_len(), 2);
        assert_eq!(source.stats().total_readbuf_calls, 2);

        source.tick(&mut media);
        assert_eq!(media.sent.len(), 2);
        assert_eq!(source.queue_len(), 4);
    }

    #[test]
    fn test_large_frame_fragmented_on_send() {
        let mut media = MockMedia::default();
        let mut source = running(
            MockEncoder {
                frame_len: 250,
                ..MockEncoder::default()
            },
            10,
        );
        source.encoder_init(&MediaSnapshot {
            cp_header: Some(0x00),
            ..snapshot(100)
        });
        source.tx_start(&mut media);
        source.tick(&mut media);

        assert_eq!(media.sent.len(), 3);
        assert!(media.sent.iter().all(|p| p.cp_header == Some(0x00) && p.handle == 1));
        assert_eq!(media.sent.iter().filter(|p| p.marker).count(), 1);
        assert_eq!(media.sent.iter().map(|p| p.payload.len()).sum::<usize>(), 250);
    }

    #[test]
    fn test_send_error_stops_fragments() {
        let mut media = MockMedia {
            send_error: Some(TransportError::Busy),
            ..MockMedia::default()
        };
        let mut source = running(
            MockEncoder {
                frame_len: 250,
                ..MockEncoder::default()
            },
            10,
        );
        source.encoder_init(&snapshot(100));
        source.tx_start(&mut media);
        source.tick(&mut media);
        assert_eq!(media.send_attempts, 1);
    }

    #[test]
    fn test_underflow_recorded() {
        let mut media = MockMedia {
            pcm_available: Some(100),
            ..MockMedia::default()
        };
        let mut source = running(
            MockEncoder {
                read_len: 512,
                ..MockEncoder::default()
            },
            10,
        );
        source.tx_start(&mut media);
        media.now_us = 40_000;
        source.tick(&mut media);

        let stats = source.stats();
        assert_eq!(stats.underflow_count, 1);
        assert_eq!(stats.underflow_bytes, 412);
        assert_eq!(stats.last_underflow_us, 40_000);
    }

    #[test]
    fn test_tx_stop_acks_and_reports() {
        let mut media = MockMedia::default();
        let mut source = running(MockEncoder::default(), 10);
        media.now_us = 1_000_000;
        source.tx_start(&mut media);
        for step in 1..=3 {
            media.now_us = 1_000_000 + step * 20_000;
            source.tick(&mut media);
        }
        media.now_us = 2_000_000;
        source.tx_stop(&mut media);

        assert!(!source.is_streaming());
        assert_eq!(media.cancelled.as_slice(), &[TimerId::MediaTick]);
        assert_eq!(media.acks.as_slice(), &[AckStatus::Success]);
        assert_eq!(media.closed, 1);
        let metrics = source.last_metrics().unwrap();
        assert_eq!(metrics.audio_duration_ms, Some(1000));
        assert_eq!(metrics.total_scheduling_count, 2);
        assert_eq!(source.total_stats().total_frames, 3);

        // No ack when the tick was not running
        source.tx_stop(&mut media);
        assert_eq!(media.acks.len(), 1);
    }

    #[test]
    fn test_tick_without_start_ignored() {
        let mut media = MockMedia::default();
        let mut source = running(MockEncoder::default(), 10);
        source.tick(&mut media);
        assert_eq!(source.encoder().ticks, 0);
        assert!(media.sent.is_empty());
    }

    #[test]
    fn test_shutdown_cancels_tick() {
        let mut media = MockMedia::default();
        let mut source = running(MockEncoder::default(), 10);
        source.tx_start(&mut media);
        source.shutdown(&mut media);
        assert_eq!(source.state(), PipelineState::Off);
        assert!(!source.is_streaming());
        assert!(source.snapshot().is_none());
        assert_eq!(media.cancelled.as_slice(), &[TimerId::MediaTick]);
    }
}
