//! Channel processor (spec.md §4.3): boundary detection and discontinuity
//! bookkeeping, driving the minute writer from a resequenced sample stream.
//!
//! Tone detection lives exclusively in analytics (spec.md §4.6 "Analytics
//! Side"), so the capture-side time-snap here is permanently the "initial"
//! wall-clock anchor established at process start -- it is never replaced
//! mid-run. See DESIGN.md for this Open Question call (§1 and §4.6 disagree
//! on which stage owns tone-derived timing; this follows §4.6 and §2's
//! control-flow diagram, both of which place the tone detector downstream
//! of the minute archive, not inside capture).

use std::sync::Arc;

use codec::discontinuity::Discontinuity;
use codec::rtp::rtp_ts_diff;
use codec::status::{ChannelStatus, NtpStatus, TimeSnapStatus};
use codec::timesnap::TimeSnap;

use crate::ntp_accessor::NtpAccessor;
use crate::resequencer::{PendingDiscontinuity, PushOutcome, ResequencedEvent};
use crate::writer::MinuteWriter;

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64()
    }
}

pub struct ChannelProcessor {
    sample_rate: u32,
    time_snap: Arc<TimeSnap>,
    ntp: Arc<dyn NtpAccessor>,
    clock: Arc<dyn Clock>,
    writer: MinuteWriter,
    packets_received: u64,
    duplicates: u64,
    malformed: u64,
    gaps: u64,
    total_gap_samples: u64,
    last_packet_arrival: f64,
}

impl ChannelProcessor {
    pub fn new(sample_rate: u32, writer: MinuteWriter, ntp: Arc<dyn NtpAccessor>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_unix();
        Self {
            sample_rate,
            time_snap: Arc::new(TimeSnap::initial(0, now, sample_rate)),
            ntp,
            clock,
            writer,
            packets_received: 0,
            duplicates: 0,
            malformed: 0,
            gaps: 0,
            total_gap_samples: 0,
            last_packet_arrival: now,
        }
    }

    pub fn time_snap(&self) -> Arc<TimeSnap> {
        self.time_snap.clone()
    }

    fn boundary_for_rtp(&self, rtp: u32) -> i64 {
        let utc = self.time_snap.utc_for_rtp(rtp);
        (utc / 60.0).floor() as i64 * 60
    }

    fn rtp_for_boundary(&self, boundary: i64) -> u32 {
        self.time_snap.rtp_for_utc(boundary as f64)
    }

    /// Drives the writer from one resequencer `PushOutcome`, in emission
    /// order, tracking a running minute-relative sample offset so each
    /// discontinuity gets the correct `offset_samples`.
    pub fn process(&mut self, outcome: PushOutcome) {
        if outcome.duplicate {
            self.duplicates += 1;
            return;
        }

        for event in outcome.events {
            match event {
                ResequencedEvent::Block(block) => {
                    self.packets_received += 1;
                    self.last_packet_arrival = block.arrival;
                    self.write_block(block.rtp_timestamp, block.samples);
                }
                ResequencedEvent::Discontinuity(pending) => {
                    self.record_discontinuity(pending);
                }
            }
        }
    }

    fn write_block(&mut self, rtp_timestamp: u32, samples: Vec<codec::rtp::Complex32>) {
        if !self.writer.has_current() {
            let boundary = self.boundary_for_rtp(rtp_timestamp);
            let rtp_at_boundary = self.rtp_for_boundary(boundary);
            self.writer.begin_minute(boundary, rtp_at_boundary, self.clock.now_unix(), self.ntp.read());
        }

        let current_boundary = self.writer.current_boundary().expect("just ensured");
        let block_end_rtp = rtp_timestamp.wrapping_add(samples.len() as u32);
        let crosses = self.boundary_for_rtp(block_end_rtp) > current_boundary;

        if crosses {
            let next_boundary = current_boundary + 60;
            let rtp_at_boundary = self.rtp_for_boundary(next_boundary);
            self.writer.begin_minute(next_boundary, rtp_at_boundary, self.clock.now_unix(), self.ntp.read());
        }

        if self.writer.add_samples(rtp_timestamp, &samples).is_err() {
            // Sample belongs to neither arena slot (spec.md §9: arena of
            // two, out-of-range dropped with a counter).
            self.gaps += 1;
        }

        if crosses {
            let _ = self.writer.flush();
        }
    }

    fn record_discontinuity(&mut self, pending: PendingDiscontinuity) {
        if matches!(pending.kind, codec::discontinuity::DiscontinuityKind::Gap) {
            self.gaps += 1;
            self.total_gap_samples += pending.magnitude_samples.max(0) as u64;
        }

        let offset_samples = self
            .writer
            .current_boundary()
            .map(|boundary| {
                let anchor_rtp = self.rtp_for_boundary(boundary);
                rtp_ts_diff(pending.rtp_ts_before, anchor_rtp).max(0) as u64
            })
            .unwrap_or(0);

        let discontinuity = Discontinuity {
            wall_clock: self.clock.now_unix(),
            offset_samples,
            kind: pending.kind,
            magnitude_samples: pending.magnitude_samples,
            rtp_seq_before: pending.rtp_seq_before,
            rtp_seq_after: pending.rtp_seq_after,
            rtp_ts_before: pending.rtp_ts_before,
            rtp_ts_after: pending.rtp_ts_after,
            wwv_related: false,
            note: pending.note.to_string(),
        };
        self.writer.add_discontinuity(discontinuity);
    }

    /// Records a malformed RTP packet (spec.md §4.1/§7): dropped before it
    /// ever reached the resequencer, so it never produces samples or a
    /// discontinuity -- just the count.
    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    /// Records a bounded-queue overflow (spec.md §4.1/§7): the receiver
    /// dropped a packet's worth of samples before it ever reached the
    /// resequencer, so there is no RTP sequence/timestamp pair to attach to
    /// the record -- just the lost sample count at the current offset.
    pub fn record_overflow(&mut self, magnitude_samples: i64) {
        self.gaps += 1;
        self.total_gap_samples += magnitude_samples.max(0) as u64;

        let offset_samples = self.writer.current_boundary().map(|_| 0).unwrap_or(0);
        let discontinuity = Discontinuity::gap(
            self.clock.now_unix(),
            offset_samples,
            magnitude_samples,
            0,
            0,
            0,
            0,
            "bounded handoff queue overflowed, oldest packet dropped",
        );
        self.writer.add_discontinuity(discontinuity);
    }

    pub fn status(&self, channel: &str) -> ChannelStatus {
        let now = self.clock.now_unix();
        let completeness_pct = if self.packets_received == 0 {
            100.0
        } else {
            let total_samples = self.packets_received * (self.sample_rate as u64 / 50); // 20ms packets
            let lost = self.total_gap_samples.min(total_samples);
            100.0 * (1.0 - (lost as f64 / total_samples.max(1) as f64))
        };

        ChannelStatus {
            channel: channel.to_string(),
            packets_received: self.packets_received,
            duplicates: self.duplicates,
            malformed: self.malformed,
            gaps: self.gaps,
            total_gap_samples: self.total_gap_samples,
            completeness_pct,
            last_packet_age_s: (now - self.last_packet_arrival).max(0.0),
            time_snap: Some(TimeSnapStatus::from_snap(&self.time_snap, now)),
            ntp: {
                let reading = self.ntp.read();
                NtpStatus {
                    synced: reading.synced,
                    offset_ms: reading.offset_ms,
                    age_s: reading.age_s,
                }
            },
        }
    }

    pub fn shutdown(&mut self) {
        let _ = self.writer.flush_on_shutdown(self.clock.now_unix());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntp_accessor::NtpReading;
    use codec::rtp::Complex32;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedClock(std::sync::atomic::AtomicU64);
    impl Clock for FixedClock {
        fn now_unix(&self) -> f64 {
            self.0.load(Ordering::Relaxed) as f64
        }
    }

    fn tempdir(tag: &str) -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("iq-channel-test-{tag}-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn ideal_minute_produces_one_archive_with_no_discontinuities() {
        let dir = tempdir("ideal");
        let writer = MinuteWriter::new("wwv-5", 1, 5_000_000.0, 16_000, dir.clone());
        let ntp: Arc<dyn NtpAccessor> = Arc::new(NtpReading { synced: true, offset_ms: Some(1.0), age_s: 0.0 });
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(1_700_000_000)));
        let mut proc = ChannelProcessor::new(16_000, writer, ntp, clock);

        for i in 0..3000u32 {
            let samples = vec![Complex32 { re: 1.0, im: 0.0 }; 320];
            let mut outcome = PushOutcome::default();
            outcome.events.push(ResequencedEvent::Block(crate::resequencer::ResequencedBlock {
                rtp_timestamp: i * 320,
                samples,
                arrival: 0.0,
            }));
            proc.process(outcome);
        }

        let status = proc.status("wwv-5");
        assert_eq!(status.gaps, 0);
        std::fs::remove_dir_all(dir).ok();
    }
}
