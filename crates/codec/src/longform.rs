//! Long-form decimated archive (spec.md §4.11/§6): a continuous hourly file
//! of 10 Hz complex samples, with embedded per-segment quality metadata.
//! Sample N's UTC is `file_start_utc + N * 0.1s`; file boundaries align to
//! whole UTC hours.

use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::rtp::Complex32;

pub const LONGFORM_RATE_HZ: u32 = 10;
pub const SAMPLES_PER_HOUR: usize = LONGFORM_RATE_HZ as usize * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    ToneLocked,
    Interpolated,
    NtpSynced,
    WallClock,
}

/// One contiguous run of samples sharing a quality classification and
/// source time-snap reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_index: usize,
    pub end_index: usize,
    pub quality: Quality,
    pub time_snap_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongFormFile {
    pub file_start_utc: i64,
    pub channel_name: String,
    pub ssrc: u32,
    pub samples: Vec<Complex32>,
    pub segments: Vec<Segment>,
}

impl LongFormFile {
    pub fn new(file_start_utc: i64, channel_name: String, ssrc: u32) -> Self {
        assert_eq!(file_start_utc % 3600, 0, "long-form files must start on a whole UTC hour");
        Self {
            file_start_utc,
            channel_name,
            ssrc,
            samples: Vec::with_capacity(SAMPLES_PER_HOUR),
            segments: Vec::new(),
        }
    }

    pub fn utc_of_sample(&self, index: usize) -> f64 {
        self.file_start_utc as f64 + index as f64 * (1.0 / LONGFORM_RATE_HZ as f64)
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= SAMPLES_PER_HOUR
    }

    pub fn push_minute(&mut self, minute_samples: &[Complex32], quality: Quality, time_snap_source: &str) {
        let start_index = self.samples.len();
        self.samples.extend_from_slice(minute_samples);
        let end_index = self.samples.len();

        let merged_with_prev = self
            .segments
            .last_mut()
            .filter(|s| s.quality == quality && s.time_snap_source == time_snap_source && s.end_index == start_index);

        match merged_with_prev {
            Some(seg) => seg.end_index = end_index,
            None => self.segments.push(Segment {
                start_index,
                end_index,
                quality,
                time_snap_source: time_snap_source.to_string(),
            }),
        }
    }
}

pub fn longform_file_name(file_start_utc: i64, ssrc: u32) -> String {
    let hours = file_start_utc / 3600;
    format!("{hours:010}_{ssrc}_longform.lfz")
}

pub fn encode(file: &LongFormFile) -> Result<Vec<u8>, ArchiveError> {
    let payload = bincode::serialize(file)?;
    let compressed = zstd::stream::encode_all(&payload[..], 3).map_err(ArchiveError::Io)?;
    let checksum = crc32fast::hash(&compressed);

    let mut out = Vec::with_capacity(compressed.len() + 12);
    out.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
    out.extend_from_slice(&compressed);
    out.extend_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<LongFormFile, ArchiveError> {
    let len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
    let compressed = &bytes[8..8 + len];
    let expected = u32::from_le_bytes(bytes[8 + len..8 + len + 4].try_into().unwrap());
    let actual = crc32fast::hash(compressed);
    if actual != expected {
        return Err(ArchiveError::ChecksumMismatch { expected, actual });
    }
    let payload = zstd::stream::decode_all(compressed).map_err(ArchiveError::Io)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_utc_derives_from_index() {
        let file = LongFormFile::new(1_704_160_800, "wwv-5".into(), 1);
        assert!((file.utc_of_sample(0) - 1_704_160_800.0).abs() < 1e-9);
        assert!((file.utc_of_sample(10) - 1_704_160_801.0).abs() < 1e-9);
    }

    #[test]
    fn adjacent_same_quality_minutes_merge_into_one_segment() {
        let mut file = LongFormFile::new(1_704_160_800, "wwv-5".into(), 1);
        let minute = vec![Complex32::ZERO; 600];
        file.push_minute(&minute, Quality::ToneLocked, "wwv-verified");
        file.push_minute(&minute, Quality::ToneLocked, "wwv-verified");
        assert_eq!(file.segments.len(), 1);
        assert_eq!(file.segments[0].end_index, 1200);
    }

    #[test]
    fn quality_change_starts_a_new_segment() {
        let mut file = LongFormFile::new(1_704_160_800, "wwv-5".into(), 1);
        let minute = vec![Complex32::ZERO; 600];
        file.push_minute(&minute, Quality::ToneLocked, "wwv-verified");
        file.push_minute(&minute, Quality::Interpolated, "wwv-verified");
        assert_eq!(file.segments.len(), 2);
    }
}
