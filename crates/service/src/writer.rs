//! Minute writer (spec.md §4.4) and long-form writer (spec.md §4.11).
//!
//! `MinuteWriter` owns the two-slot arena ("current", "next") spec.md §9
//! recommends in place of a dict-of-timestamps: a sample belonging to
//! neither slot is out of range and is dropped with a counter rather than
//! creating a third buffer.

use std::path::PathBuf;

use codec::archive::{self, MinuteArchive};
use codec::discontinuity::Discontinuity;
use codec::error::ArchiveError;
use codec::longform::{self, LongFormFile, Quality};
use codec::rtp::Complex32;
use codec::timesnap::TimeSnap;

use crate::ntp_accessor::NtpReading;

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("sample block does not belong to the current or next minute, and is out of range")]
    OutOfRange,
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

struct MinuteSlot {
    boundary_utc: i64,
    rtp_timestamp_at_start: u32,
    wall_clock_at_start: f64,
    ntp: NtpReading,
    samples: Vec<Complex32>,
    discontinuities: Vec<Discontinuity>,
    time_snap: Option<TimeSnap>,
}

impl MinuteSlot {
    fn new(boundary_utc: i64, rtp_timestamp_at_start: u32, wall_clock_at_start: f64, ntp: NtpReading, sample_rate: u32) -> Self {
        Self {
            boundary_utc,
            rtp_timestamp_at_start,
            wall_clock_at_start,
            ntp,
            samples: vec![Complex32::ZERO; MinuteArchive::expected_sample_count(sample_rate)],
            discontinuities: Vec::new(),
            time_snap: None,
        }
    }

    fn into_archive(self, channel_name: String, ssrc: u32, frequency_hz: f64, sample_rate: u32) -> MinuteArchive {
        MinuteArchive {
            iq: self.samples,
            sample_rate,
            rtp_timestamp: self.rtp_timestamp_at_start,
            unix_timestamp: self.boundary_utc as f64,
            ntp_wall_clock_time: Some(self.wall_clock_at_start),
            ntp_offset_ms: if self.ntp.synced { self.ntp.offset_ms } else { None },
            channel_name,
            ssrc,
            frequency_hz,
            discontinuities: self.discontinuities,
            time_snap: self.time_snap.map(|snap| codec::archive::EmbeddedTimeSnap {
                time_snap_rtp: snap.rtp_timestamp_at_anchor,
                time_snap_utc: snap.utc_timestamp_at_anchor,
                time_snap_source: snap.source.as_str().to_string(),
                time_snap_station: format!("{:?}", snap.station).to_lowercase(),
                time_snap_confidence: snap.confidence,
            }),
        }
    }
}

pub struct MinuteWriter {
    channel_name: String,
    ssrc: u32,
    frequency_hz: f64,
    sample_rate: u32,
    archive_dir: PathBuf,
    current: Option<MinuteSlot>,
    next: Option<MinuteSlot>,
    pending_time_snap: Option<TimeSnap>,
}

impl MinuteWriter {
    pub fn new(channel_name: impl Into<String>, ssrc: u32, frequency_hz: f64, sample_rate: u32, archive_dir: PathBuf) -> Self {
        Self {
            channel_name: channel_name.into(),
            ssrc,
            frequency_hz,
            sample_rate,
            archive_dir,
            current: None,
            next: None,
            pending_time_snap: None,
        }
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_boundary(&self) -> Option<i64> {
        self.current.as_ref().map(|s| s.boundary_utc)
    }

    /// Creates a new minute slot (the "current" one, if none exists yet --
    /// otherwise "next", per the two-slot arena).
    pub fn begin_minute(&mut self, boundary_utc: i64, rtp_timestamp_at_start: u32, wall_clock_at_start: f64, ntp: NtpReading) {
        let slot = MinuteSlot::new(boundary_utc, rtp_timestamp_at_start, wall_clock_at_start, ntp, self.sample_rate);
        if self.current.is_none() {
            self.current = Some(slot);
        } else {
            self.next = Some(slot);
        }
    }

    /// spec.md §4.4 `add_samples`: places samples at `(rtp_start -
    /// rtp_timestamp_at_start)` samples from the boundary. A block
    /// straddling the minute boundary is split and retried against `next`.
    pub fn add_samples(&mut self, rtp_start: u32, samples: &[Complex32]) -> Result<(), WriterError> {
        let Some(slot) = self.current.as_mut() else {
            return Err(WriterError::OutOfRange);
        };

        let offset = codec::rtp::rtp_ts_diff(rtp_start, slot.rtp_timestamp_at_start);
        let capacity = slot.samples.len() as i64;

        if offset < 0 {
            // Belongs to a minute already flushed; nothing to retry into.
            return Err(WriterError::OutOfRange);
        }

        if offset >= capacity {
            // Spills past this minute: write what fits (if anything already
            // overlaps) and hand the remainder to `next`.
            let Some(next) = self.next.as_mut() else {
                return Err(WriterError::OutOfRange);
            };
            let next_offset = codec::rtp::rtp_ts_diff(rtp_start, next.rtp_timestamp_at_start);
            if next_offset < 0 || next_offset as usize + samples.len() > next.samples.len() {
                return Err(WriterError::OutOfRange);
            }
            write_into(&mut next.samples, next_offset as usize, samples);
            return Ok(());
        }

        let offset = offset as usize;
        let end = offset + samples.len();
        if end <= slot.samples.len() {
            if slot_region_is_written(&slot.samples, offset, end) {
                record_sync_adjust(slot, offset, samples.len());
            }
            write_into(&mut slot.samples, offset, samples);
            return Ok(());
        }

        // Straddles the boundary: write the part that fits, hand the rest
        // to `next` (which must already have been created via begin_minute
        // before the straddling block arrives).
        let fit = slot.samples.len() - offset;
        write_into(&mut slot.samples, offset, &samples[..fit]);

        let Some(next) = self.next.as_mut() else {
            return Err(WriterError::OutOfRange);
        };
        let remainder = &samples[fit..];
        if remainder.len() > next.samples.len() {
            return Err(WriterError::OutOfRange);
        }
        write_into(&mut next.samples, 0, remainder);
        Ok(())
    }

    pub fn update_time_snap_pending(&mut self, snap: TimeSnap) {
        self.pending_time_snap = Some(snap);
    }

    pub fn add_discontinuity(&mut self, d: Discontinuity) {
        if let Some(slot) = self.current.as_mut() {
            slot.discontinuities.push(d);
        }
    }

    /// Flushes the current minute to disk atomically, promotes `next` to
    /// `current`, and applies any pending time-snap at this boundary only.
    pub fn flush(&mut self) -> Result<Option<PathBuf>, WriterError> {
        let Some(current) = self.current.take() else {
            self.current = self.next.take();
            return Ok(None);
        };

        let archive = current.into_archive(self.channel_name.clone(), self.ssrc, self.frequency_hz, self.sample_rate);
        archive.validate()?;
        let path = archive::write_atomic(&self.archive_dir, &archive)?;

        self.current = self.next.take();
        if let (Some(snap), Some(slot)) = (self.pending_time_snap.take(), self.current.as_mut()) {
            slot.time_snap = Some(snap);
        }

        Ok(Some(path))
    }

    /// spec.md §5 cancellation: flush the in-progress minute as a short
    /// minute with a "gap" discontinuity spanning the unwritten tail.
    pub fn flush_on_shutdown(&mut self, wall_clock_now: f64) -> Result<Option<PathBuf>, WriterError> {
        if let Some(slot) = self.current.as_mut() {
            let written = slot
                .samples
                .iter()
                .rposition(|s| *s != Complex32::ZERO)
                .map(|i| i + 1)
                .unwrap_or(0);
            let unwritten = slot.samples.len() - written;
            if unwritten > 0 {
                slot.discontinuities.push(Discontinuity::gap(
                    wall_clock_now,
                    written as u64,
                    unwritten as i64,
                    0,
                    0,
                    0,
                    0,
                    "capture shutdown before minute boundary",
                ));
            }
        }
        self.flush()
    }
}

fn slot_region_is_written(samples: &[Complex32], offset: usize, end: usize) -> bool {
    samples[offset..end].iter().any(|s| *s != Complex32::ZERO)
}

fn record_sync_adjust(slot: &mut MinuteSlot, offset: usize, len: usize) {
    slot.discontinuities.push(Discontinuity::sync_adjust(
        slot.wall_clock_at_start,
        offset as u64,
        -(len as i64),
        0,
        0,
        0,
        0,
        "overlapping coverage within minute, later sample wins",
    ));
}

fn write_into(dest: &mut [Complex32], offset: usize, samples: &[Complex32]) {
    dest[offset..offset + samples.len()].copy_from_slice(samples);
}

/// spec.md §4.11: continuous hourly file of decimated samples, with the
/// same boundary-aligned pending-time-snap discipline as `MinuteWriter`.
pub struct LongFormWriter {
    channel_name: String,
    ssrc: u32,
    output_dir: PathBuf,
    current: Option<LongFormFile>,
    pending_time_snap_source: Option<String>,
}

impl LongFormWriter {
    pub fn new(channel_name: impl Into<String>, ssrc: u32, output_dir: PathBuf) -> Self {
        Self {
            channel_name: channel_name.into(),
            ssrc,
            output_dir,
            current: None,
            pending_time_snap_source: None,
        }
    }

    pub fn update_time_snap_pending(&mut self, source: String) {
        self.pending_time_snap_source = Some(source);
    }

    /// Appends one minute's decimated samples (600 @ 10 Hz), rolling to a
    /// new hourly file when the minute's UTC crosses an hour boundary, and
    /// applying any pending time-snap label at that roll only.
    pub fn push_minute(&mut self, minute_boundary_utc: i64, decimated: &[Complex32], quality: Quality) -> Result<Option<PathBuf>, WriterError> {
        let hour_start = minute_boundary_utc - minute_boundary_utc.rem_euclid(3600);

        if self.current.as_ref().is_some_and(|f| f.file_start_utc != hour_start) {
            self.roll()?;
        }
        if self.current.is_none() {
            self.current = Some(LongFormFile::new(hour_start, self.channel_name.clone(), self.ssrc));
        }

        let source = self.pending_time_snap_source.take().unwrap_or_else(|| "unspecified".to_string());
        let file = self.current.as_mut().expect("just created above");
        file.push_minute(decimated, quality, &source);

        if file.is_full() {
            return self.roll();
        }
        Ok(None)
    }

    fn roll(&mut self) -> Result<Option<PathBuf>, WriterError> {
        let Some(file) = self.current.take() else {
            return Ok(None);
        };
        let name = longform::longform_file_name(file.file_start_utc, file.ssrc);
        let bytes = longform::encode(&file)?;
        let path = self.output_dir.join(name);
        codec::atomic_write(&path, &bytes).map_err(ArchiveError::Io)?;
        Ok(Some(path))
    }
}
