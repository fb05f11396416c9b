//! Media scheduling statistics

use core::fmt;

use crate::constants::SCHEDULING_OUTLIER_FACTOR;

/// Deviation of a periodic event from its expected schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulingStats {
    /// Number of updates
    pub total_updates: u32,
    /// Time of the last update, 0 before the first one
    pub last_update_us: u64,
    /// Updates that came later than expected
    pub overdue_count: u32,
    /// Sum of overdue deviations
    pub total_overdue_delta_us: u64,
    /// Largest overdue deviation
    pub max_overdue_delta_us: u64,
    /// Updates that came earlier than expected
    pub premature_count: u32,
    /// Sum of premature deviations
    pub total_premature_delta_us: u64,
    /// Largest premature deviation
    pub max_premature_delta_us: u64,
    /// Updates exactly on time
    pub exact_count: u32,
    /// Sum of intervals that were counted
    pub total_scheduling_time_us: u64,
}

impl SchedulingStats {
    /// Record an event at `now_us` that was expected `expected_delta_us` after
    /// the previous one
    ///
    /// The first update only records the time. Deviations of ten or more
    /// expected intervals are not counted.
    pub fn update(&mut self, now_us: u64, expected_delta_us: u64) {
        let last_us = self.last_update_us;
        self.total_updates = self.total_updates.saturating_add(1);
        self.last_update_us = now_us;

        if last_us == 0 {
            return;
        }

        let deadline_us = last_us.saturating_add(expected_delta_us);
        let outlier = expected_delta_us.saturating_mul(SCHEDULING_OUTLIER_FACTOR);
        let elapsed = now_us.saturating_sub(last_us);
        if deadline_us < now_us {
            let delta_us = now_us - deadline_us;
            if delta_us < outlier {
                self.max_overdue_delta_us = self.max_overdue_delta_us.max(delta_us);
                self.total_overdue_delta_us += delta_us;
                self.overdue_count += 1;
                self.total_scheduling_time_us += elapsed;
            }
        } else if deadline_us > now_us {
            let delta_us = deadline_us - now_us;
            if delta_us < outlier {
                self.max_premature_delta_us = self.max_premature_delta_us.max(delta_us);
                self.total_premature_delta_us += delta_us;
                self.premature_count += 1;
                self.total_scheduling_time_us += elapsed;
            }
        } else {
            self.exact_count += 1;
            self.total_scheduling_time_us += elapsed;
        }
    }

    fn accumulate(&mut self, src: &Self) {
        self.total_updates += src.total_updates;
        self.last_update_us = src.last_update_us;
        self.overdue_count += src.overdue_count;
        self.total_overdue_delta_us += src.total_overdue_delta_us;
        self.max_overdue_delta_us = self.max_overdue_delta_us.max(src.max_overdue_delta_us);
        self.premature_count += src.premature_count;
        self.total_premature_delta_us += src.total_premature_delta_us;
        self.max_premature_delta_us = self.max_premature_delta_us.max(src.max_premature_delta_us);
        self.exact_count += src.exact_count;
        self.total_scheduling_time_us += src.total_scheduling_time_us;
    }

    fn average_overdue_us(&self) -> u64 {
        self.total_overdue_delta_us
            .checked_div(u64::from(self.overdue_count))
            .unwrap_or(0)
    }

    fn average_premature_us(&self) -> u64 {
        self.total_premature_delta_us
            .checked_div(u64::from(self.premature_count))
            .unwrap_or(0)
    }
}

/// Transmit side statistics for one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaStats {
    /// Session start, 0 when no session was started
    pub session_start_us: u64,
    /// Session end, 0 while streaming
    pub session_end_us: u64,
    /// Encoder tick schedule
    pub enqueue: SchedulingStats,
    /// Transmit schedule
    pub dequeue: SchedulingStats,
    /// Codec frames queued
    pub total_frames: u32,
    /// Most codec frames in one packet
    pub max_frames_per_packet: u8,
    /// Dequeue attempts
    pub total_readbuf_calls: u32,
    /// Time of the last dequeue attempt
    pub last_readbuf_us: u64,
    /// Packets discarded by flushes
    pub total_flushed_messages: u32,
    /// Time of the last flush
    pub last_flushed_us: u64,
    /// Packets discarded on queue overflow
    pub total_dropped_messages: u32,
    /// Most packets discarded by one overflow
    pub max_dropped_messages: u32,
    /// Queue overflows
    pub dropouts: u32,
    /// Time of the last overflow
    pub last_dropout_us: u64,
    /// PCM bytes missing on short reads
    pub underflow_bytes: u32,
    /// Short PCM reads
    pub underflow_count: u32,
    /// Time of the last short read
    pub last_underflow_us: u64,
}

impl MediaStats {
    /// Add these statistics to `dst` and reset them
    pub fn accumulate_into(&mut self, dst: &mut Self) {
        dst.total_frames += self.total_frames;
        dst.max_frames_per_packet = dst.max_frames_per_packet.max(self.max_frames_per_packet);
        dst.total_readbuf_calls += self.total_readbuf_calls;
        dst.last_readbuf_us = self.last_readbuf_us;
        dst.total_flushed_messages += self.total_flushed_messages;
        dst.last_flushed_us = self.last_flushed_us;
        dst.total_dropped_messages += self.total_dropped_messages;
        dst.max_dropped_messages = dst.max_dropped_messages.max(self.max_dropped_messages);
        dst.dropouts += self.dropouts;
        dst.last_dropout_us = self.last_dropout_us;
        dst.underflow_bytes += self.underflow_bytes;
        dst.underflow_count += self.underflow_count;
        dst.last_underflow_us = self.last_underflow_us;
        dst.enqueue.accumulate(&self.enqueue);
        dst.dequeue.accumulate(&self.dequeue);
        *self = Self::default();
    }

    /// Summarize the session for metrics reporting
    #[must_use]
    pub fn metrics(&self, encoder_interval_ms: u32, now_us: u64) -> SessionMetrics {
        let mut metrics = SessionMetrics::default();
        if self.session_start_us != 0 {
            let end_us = if self.session_end_us == 0 {
                now_us
            } else {
                self.session_end_us
            };
            metrics.audio_duration_ms = Some(end_us.saturating_sub(self.session_start_us) / 1000);
        }

        let enqueue = &self.enqueue;
        if enqueue.total_updates > 1 {
            let interval = u64::from(encoder_interval_ms);
            metrics.media_timer_min_ms = interval.saturating_sub(enqueue.max_premature_delta_us / 1000);
            metrics.media_timer_max_ms = interval + enqueue.max_overdue_delta_us / 1000;
            metrics.total_scheduling_count =
                enqueue.overdue_count + enqueue.premature_count + enqueue.exact_count;
            metrics.media_timer_avg_ms = enqueue
                .total_scheduling_time_us
                .checked_div(1000 * u64::from(metrics.total_scheduling_count))
                .unwrap_or(0);
            metrics.buffer_overruns_max_count = self.max_dropped_messages;
            metrics.buffer_overruns_total = self.total_dropped_messages;
            metrics.buffer_underruns_count = self.underflow_count;
            metrics.buffer_underruns_average = self
                .underflow_bytes
                .checked_div(self.underflow_count)
                .unwrap_or(0);
        }
        metrics
    }

    /// Printable dump of these statistics as seen at `now_us`
    #[must_use]
    pub const fn report(&self, now_us: u64) -> StatsReport<'_> {
        StatsReport { stats: self, now_us }
    }
}

/// Per-session figures reported when a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionMetrics {
    /// Streaming duration, `None` if the session never started
    pub audio_duration_ms: Option<u64>,
    /// Shortest observed tick period
    pub media_timer_min_ms: u64,
    /// Longest observed tick period
    pub media_timer_max_ms: u64,
    /// Average counted tick period
    pub media_timer_avg_ms: u64,
    /// Ticks that were counted
    pub total_scheduling_count: u32,
    /// Most packets dropped by one overflow
    pub buffer_overruns_max_count: u32,
    /// Packets dropped on overflow
    pub buffer_overruns_total: u32,
    /// Short PCM reads
    pub buffer_underruns_count: u32,
    /// Average missing bytes per short read
    pub buffer_underruns_average: u32,
}

/// Debug dump of [`MediaStats`]
pub struct StatsReport<'a> {
    stats: &'a MediaStats,
    now_us: u64,
}

impl StatsReport<'_> {
    fn ago_ms(&self, at_us: u64) -> u64 {
        if at_us > 0 {
            self.now_us.saturating_sub(at_us) / 1000
        } else {
            0
        }
    }
}

impl fmt::Display for StatsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        let enq = &s.enqueue;
        let deq = &s.dequeue;
        writeln!(f, "A2DP State:")?;
        writeln!(f, "  TxQueue:")?;
        writeln!(
            f,
            "  Counts (enqueue/dequeue/readbuf)                        : {} / {} / {}",
            enq.total_updates, deq.total_updates, s.total_readbuf_calls
        )?;
        writeln!(
            f,
            "  Last update time ago in ms (enqueue/dequeue/readbuf)    : {} / {} / {}",
            self.ago_ms(enq.last_update_us),
            self.ago_ms(deq.last_update_us),
            self.ago_ms(s.last_readbuf_us)
        )?;
        let ave_size = s.total_frames.checked_div(enq.total_updates).unwrap_or(0);
        writeln!(
            f,
            "  Frames per packet (total/max/ave)                       : {} / {} / {}",
            s.total_frames, s.max_frames_per_packet, ave_size
        )?;
        writeln!(
            f,
            "  Counts (flushed/dropped/dropouts)                       : {} / {} / {}",
            s.total_flushed_messages, s.total_dropped_messages, s.dropouts
        )?;
        writeln!(
            f,
            "  Counts (max dropped)                                    : {}",
            s.max_dropped_messages
        )?;
        writeln!(
            f,
            "  Last update time ago in ms (flushed/dropped)            : {} / {}",
            self.ago_ms(s.last_flushed_us),
            self.ago_ms(s.last_dropout_us)
        )?;
        writeln!(
            f,
            "  Counts (underflow)                                      : {}",
            s.underflow_count
        )?;
        writeln!(
            f,
            "  Bytes (underflow)                                       : {}",
            s.underflow_bytes
        )?;
        writeln!(
            f,
            "  Last update time ago in ms (underflow)                  : {}",
            self.ago_ms(s.last_underflow_us)
        )?;
        for (name, stats) in [("Enqueue", enq), ("Dequeue", deq)] {
            writeln!(
                f,
                "  {name} deviation counts (overdue/premature)            : {} / {}",
                stats.overdue_count, stats.premature_count
            )?;
            writeln!(
                f,
                "  {name} overdue scheduling time in ms (total/max/ave)   : {} / {} / {}",
                stats.total_overdue_delta_us / 1000,
                stats.max_overdue_delta_us / 1000,
                stats.average_overdue_us() / 1000
            )?;
            writeln!(
                f,
                "  {name} premature scheduling time in ms (total/max/ave) : {} / {} / {}",
                stats.total_premature_delta_us / 1000,
                stats.max_premature_delta_us / 1000,
                stats.average_premature_us() / 1000
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_only_records_time() {
        let mut stats = SchedulingStats::default();
        stats.update(1_000, 20_000);
        assert_eq!(stats.total_updates, 1);
        assert_eq!(stats.last_update_us, 1_000);
        assert_eq!(stats.overdue_count + stats.premature_count + stats.exact_count, 0);
    }

    #[test]
    fn test_scheduling_deviations() {
        let mut stats = SchedulingStats::default();
        stats.update(1_000, 20_000);
        stats.update(21_000, 20_000);
        stats.update(42_000, 20_000);
        stats.update(61_500, 20_000);

        assert_eq!(stats.exact_count, 1);
        assert_eq!(stats.overdue_count, 1);
        assert_eq!(stats.max_overdue_delta_us, 1_000);
        assert_eq!(stats.premature_count, 1);
        assert_eq!(stats.max_premature_delta_us, 500);
        assert_eq!(stats.total_scheduling_time_us, 60_500);
    }

    #[test]
    fn test_outliers_ignored() {
        let mut stats = SchedulingStats::default();
        stats.update(1_000, 20_000);
        stats.update(1_000 + 20_000 + 200_000, 20_000);
        assert_eq!(stats.total_updates, 2);
        assert_eq!(stats.overdue_count, 0);
        assert_eq!(stats.total_scheduling_time_us, 0);
    }

    #[test]
    fn test_accumulate_resets_source() {
        let mut session = MediaStats {
            dropouts: 2,
            max_dropped_messages: 7,
            total_frames: 40,
            ..MediaStats::default()
        };
        let mut total = MediaStats {
            dropouts: 1,
            max_dropped_messages: 9,
            ..MediaStats::default()
        };
        session.accumulate_into(&mut total);
        assert_eq!(total.dropouts, 3);
        assert_eq!(total.max_dropped_messages, 9);
        assert_eq!(total.total_frames, 40);
        assert_eq!(session, MediaStats::default());
    }

    #[test]
    fn test_metrics() {
        let mut stats = MediaStats {
            session_start_us: 1_000_000,
            underflow_count: 2,
            underflow_bytes: 300,
            ..MediaStats::default()
        };
        assert_eq!(stats.metrics(20, 3_000_000).audio_duration_ms, Some(2_000));
        assert_eq!(stats.metrics(20, 3_000_000).buffer_underruns_count, 0);

        stats.enqueue.update(1_000_000, 20_000);
        stats.enqueue.update(1_022_000, 20_000);
        let metrics = stats.metrics(20, 3_000_000);
        assert_eq!(metrics.media_timer_max_ms, 22);
        assert_eq!(metrics.total_scheduling_count, 1);
        assert_eq!(metrics.media_timer_avg_ms, 22);
        assert_eq!(metrics.buffer_underruns_average, 150);

        assert_eq!(MediaStats::default().metrics(20, 5).audio_duration_ms, None);
    }

    #[test]
    fn test_report_mentions_dropouts() {
        use std::string::ToString;

        let stats = MediaStats {
            dropouts: 4,
            ..MediaStats::default()
        };
        let text = stats.report(0).to_string();
        assert!(text.contains("Counts (flushed/dropped/dropouts)                       : 0 / 0 / 4"));
        assert!(text.contains("Dequeue deviation counts"));
    }
}
