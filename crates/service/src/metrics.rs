//! Timing metrics writer (spec.md §4.10): per-minute CSV rows capturing
//! two-base drift (NTP-reference wall clock vs. RTP-predicted UTC) and
//! jitter, keeping the independent-time-bases principle spec.md §4.10
//! calls out -- never deriving drift from `now()` at file-write time.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::Path;

use codec::longform::Quality;
use codec::timesnap::TimeSnap;
use serde::Serialize;

const JITTER_WINDOW: usize = 10;

fn quality_as_str(quality: Quality) -> &'static str {
    match quality {
        Quality::ToneLocked => "TONE_LOCKED",
        Quality::Interpolated => "INTERPOLATED",
        Quality::NtpSynced => "NTP_SYNCED",
        Quality::WallClock => "WALL_CLOCK",
    }
}

/// spec.md §4.10's classification rule, independent of the anchor's own
/// age-tracking used elsewhere -- this recomputes from first principles at
/// every row. Shares `codec::longform::Quality` with the long-form writer's
/// per-segment classification, since both describe the same concept.
pub fn classify_quality(time_snap: Option<&TimeSnap>, now: f64, ntp_synced: bool, ntp_offset_ms: Option<f64>) -> Quality {
    if let Some(snap) = time_snap {
        let age_s = snap.age_seconds(now);
        let qualifying = matches!(
            snap.source,
            codec::timesnap::TimeSnapSource::WwvFirst
                | codec::timesnap::TimeSnapSource::WwvVerified
                | codec::timesnap::TimeSnapSource::ChuFirst
                | codec::timesnap::TimeSnapSource::ChuVerified
        ) && snap.confidence >= 0.6;

        if qualifying && age_s <= 300.0 {
            return Quality::ToneLocked;
        }
        if qualifying && age_s <= 3600.0 {
            return Quality::Interpolated;
        }
    }

    if ntp_synced && ntp_offset_ms.is_some_and(|ms| ms.abs() < 100.0) {
        return Quality::NtpSynced;
    }

    Quality::WallClock
}

#[derive(Debug, Serialize)]
struct Row<'a> {
    utc_iso8601: String,
    rtp_timestamp: u32,
    wall_clock: f64,
    ntp_offset_ms: Option<f64>,
    predicted_utc: f64,
    drift_ms: f64,
    jitter_ms_rms: f64,
    quality: &'a str,
    drift_ppm: Option<f64>,
}

pub struct TimingMetricsWriter {
    path: std::path::PathBuf,
    recent_drifts_ms: VecDeque<f64>,
}

impl TimingMetricsWriter {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            recent_drifts_ms: VecDeque::with_capacity(JITTER_WINDOW),
        }
    }

    /// Appends one row. `drift_ppm` should be `None` across an RTP session
    /// boundary (spec.md §6: "may be empty for intervals across RTP
    /// session boundaries").
    pub fn append(
        &mut self,
        utc_iso8601: &str,
        rtp_timestamp: u32,
        wall_clock_at_start: f64,
        ntp_offset_ms: Option<f64>,
        predicted_utc: f64,
        quality: Quality,
        drift_ppm: Option<f64>,
    ) -> std::io::Result<()> {
        let drift_ms = (wall_clock_at_start - predicted_utc) * 1000.0;
        if self.recent_drifts_ms.len() == JITTER_WINDOW {
            self.recent_drifts_ms.pop_front();
        }
        self.recent_drifts_ms.push_back(drift_ms);
        let jitter_ms_rms = rms(&self.recent_drifts_ms);

        let row = Row {
            utc_iso8601: utc_iso8601.to_string(),
            rtp_timestamp,
            wall_clock: wall_clock_at_start,
            ntp_offset_ms,
            predicted_utc,
            drift_ms,
            jitter_ms_rms,
            quality: quality_as_str(quality),
            drift_ppm,
        };

        let needs_header = !Path::new(&self.path).exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record([
                "utc_iso8601",
                "rtp_timestamp",
                "wall_clock",
                "ntp_offset_ms",
                "predicted_utc",
                "drift_ms",
                "jitter_ms_rms",
                "quality",
                "drift_ppm",
            ])?;
        }
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}

fn rms(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean_sq = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
    mean_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::timesnap::{Station, TimeSnapSource};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempfile(tag: &str) -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("iq-metrics-test-{tag}-{}-{n}.csv", std::process::id()))
    }

    #[test]
    fn fresh_tone_lock_classifies_as_tone_locked() {
        let snap = TimeSnap {
            rtp_timestamp_at_anchor: 0,
            utc_timestamp_at_anchor: 1_000.0,
            sample_rate: 16_000,
            source: TimeSnapSource::WwvFirst,
            confidence: 0.9,
            station: Station::Wwv,
            established_at: 1_000.0,
        };
        let q = classify_quality(Some(&snap), 1_060.0, true, Some(1.0));
        assert_eq!(q, Quality::ToneLocked);
    }

    #[test]
    fn stale_tone_lock_falls_back_to_ntp_or_wall_clock() {
        let snap = TimeSnap {
            rtp_timestamp_at_anchor: 0,
            utc_timestamp_at_anchor: 0.0,
            sample_rate: 16_000,
            source: TimeSnapSource::WwvFirst,
            confidence: 0.9,
            station: Station::Wwv,
            established_at: 0.0,
        };
        let q = classify_quality(Some(&snap), 10_000.0, false, None);
        assert_eq!(q, Quality::WallClock);
    }

    #[test]
    fn writes_header_once_and_appends_rows() {
        let path = tempfile("rows");
        let mut writer = TimingMetricsWriter::new(&path);
        writer.append("2024-01-01T00:00:00Z", 0, 0.0, Some(1.0), 0.0, Quality::ToneLocked, Some(0.1)).unwrap();
        writer.append("2024-01-01T00:01:00Z", 960_000, 60.0, Some(1.0), 60.0, Quality::ToneLocked, Some(0.1)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3); // header + 2 rows
        std::fs::remove_file(&path).ok();
    }
}
