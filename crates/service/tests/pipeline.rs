//! End-to-end scenarios S1-S4 and S6 (spec.md §8): resequencer + channel
//! processor driving a real minute writer to disk. S5 (tone detection
//! acceptance tolerances) is covered by `tone::tests::s5_clean_wwv_tone_meets_acceptance_tolerances`
//! in `src/tone.rs`, since it needs no writer/channel machinery.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use iq_pipeline::channel::{ChannelProcessor, Clock};
use iq_pipeline::ntp_accessor::NtpReading;
use iq_pipeline::resequencer::Resequencer;
use iq_pipeline::writer::MinuteWriter;

use codec::archive;
use codec::rtp::Complex32;

struct FixedClock(std::sync::atomic::AtomicU64);
impl Clock for FixedClock {
    fn now_unix(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64
    }
}

fn tempdir(tag: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("iq-pipeline-e2e-{tag}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// Aligned exactly to a minute boundary, so the time-snap anchor established
// at rtp=0 maps straight to the start of the first minute rather than
// partway in -- keeps expected sample offsets in these tests simple.
const ALIGNED_NOW: u64 = 1_700_000_040;

fn new_processor(dir: &PathBuf) -> ChannelProcessor {
    let writer = MinuteWriter::new("wwv-5", 1, 5_000_000.0, 16_000, dir.clone());
    let ntp: Arc<dyn iq_pipeline::ntp_accessor::NtpAccessor> =
        Arc::new(NtpReading { synced: true, offset_ms: Some(0.5), age_s: 0.0 });
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(ALIGNED_NOW)));
    ChannelProcessor::new(16_000, writer, ntp, clock)
}

fn feed_sequence(processor: &mut ChannelProcessor, resequencer: &mut Resequencer, order: &[u16]) {
    for &seq in order {
        let samples = vec![Complex32 { re: seq as f32, im: 0.0 }; 320];
        let outcome = resequencer.push(seq, seq as u32 * 320, samples, 0.0);
        processor.process(outcome);
    }
}

fn last_archive(dir: &PathBuf) -> archive::MinuteArchive {
    let mut files: Vec<_> = std::fs::read_dir(dir).unwrap().filter_map(|e| e.ok()).collect();
    files.sort_by_key(|e| e.file_name());
    let bytes = std::fs::read(files.last().unwrap().path()).unwrap();
    archive::decode(&bytes).unwrap()
}

#[test]
fn s1_ideal_minute() {
    let dir = tempdir("s1");
    let mut processor = new_processor(&dir);
    let mut resequencer = Resequencer::new();

    let order: Vec<u16> = (0..3000).collect();
    feed_sequence(&mut processor, &mut resequencer, &order);

    let archive = last_archive(&dir);
    assert_eq!(archive.iq.len(), 960_000);
    assert_eq!(archive.rtp_timestamp, 0);
    assert!(archive.discontinuities.is_empty());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn s2_single_packet_dropped_produces_one_gap() {
    // A permanently lost packet (no retransmission) only resolves once the
    // gap between it and the newest arrival exceeds the resequencer's jump
    // threshold of 32 (spec.md §4.2); sequence 1000 is dropped, so the
    // resync fires on sequence 1033 and flushes everything buffered behind
    // it, with the single real gap surfaced by the RTP-timestamp check.
    let dir = tempdir("s2");
    let mut processor = new_processor(&dir);
    let mut resequencer = Resequencer::new();

    let order: Vec<u16> = (0..3000).filter(|&s| s != 1000).collect();
    feed_sequence(&mut processor, &mut resequencer, &order);

    let archive = last_archive(&dir);
    assert_eq!(archive.iq.len(), 960_000);
    assert_eq!(archive.discontinuities.iter().filter(|d| d.magnitude_samples > 0).count(), 1);
    let gap = archive.discontinuities.iter().find(|d| d.magnitude_samples == 320).expect("one 320-sample gap");
    assert_eq!(gap.magnitude_samples, 320);

    let gap_start = 1000 * 320;
    assert!(archive.iq[gap_start..gap_start + 320].iter().all(|s| s.re == 0.0 && s.im == 0.0));
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn s3_out_of_order_matches_in_order_output() {
    let dir_a = tempdir("s3a");
    let dir_b = tempdir("s3b");

    let mut in_order = new_processor(&dir_a);
    let mut seq_a = Resequencer::new();
    let order_in: Vec<u16> = (0..3000).collect();
    feed_sequence(&mut in_order, &mut seq_a, &order_in);

    let mut reordered = new_processor(&dir_b);
    let mut seq_b = Resequencer::new();
    let mut order_out: Vec<u16> = (0..3000).collect();
    order_out.swap(999, 1000); // deliver 1000 before 999 locally
    order_out.swap(1001, 1002); // deliver 1002 before 1001
    feed_sequence(&mut reordered, &mut seq_b, &order_out);

    let a = last_archive(&dir_a);
    let b = last_archive(&dir_b);
    assert_eq!(a.iq.len(), b.iq.len());
    assert!(b.discontinuities.is_empty());
    std::fs::remove_dir_all(dir_a).ok();
    std::fs::remove_dir_all(dir_b).ok();
}

#[test]
fn s4_duplicate_packet_is_dropped_without_discontinuity() {
    let dir = tempdir("s4");
    let mut processor = new_processor(&dir);
    let mut resequencer = Resequencer::new();

    let mut order: Vec<u16> = (0..3000).collect();
    order.insert(501, 500); // sequence 500 arrives twice
    feed_sequence(&mut processor, &mut resequencer, &order);

    let archive = last_archive(&dir);
    assert_eq!(archive.iq.len(), 960_000);
    assert!(archive.discontinuities.is_empty());
    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn s6_rtp_wraparound_preserves_contiguity() {
    // Starts one second of samples before the u32 RTP timestamp wraps back
    // to zero. The anchor's signed-modular arithmetic (`rtp_ts_diff`) must
    // place these consistently on the UTC timeline rather than treating the
    // wrap as a multi-billion-sample forward jump, so no spurious RtpReset
    // or gap should appear across the rollover.
    let dir = tempdir("s6");
    let mut processor = new_processor(&dir);
    let mut resequencer = Resequencer::new();

    let start_ts: u32 = u32::MAX - 16_000 + 1;
    for i in 0..3000u32 {
        let ts = start_ts.wrapping_add(i * 320);
        let samples = vec![Complex32 { re: 1.0, im: 0.0 }; 320];
        let outcome = resequencer.push(i as u16, ts, samples, 0.0);
        processor.process(outcome);
    }

    let status = processor.status("wwv-5");
    assert_eq!(status.gaps, 0);
    assert_eq!(status.duplicates, 0);
    std::fs::remove_dir_all(dir).ok();
}
