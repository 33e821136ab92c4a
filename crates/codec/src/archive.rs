//! The minute archive container (spec.md §3 "Minute archive", §6 "Minute
//! archive file format").
//!
//! The on-disk container is a dictionary of named fields, bincode-encoded
//! and zstd-compressed as one opaque blob with a CRC32 trailer -- the
//! "self-describing format" spec.md §6 asks for, without inventing a
//! bespoke binary layout. Field names/types/values match §6 exactly; `iq`
//! is carried as a flat `Vec<Complex32>` rather than split real/imag arrays,
//! since `Complex32` already is the interleaved pair.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::discontinuity::Discontinuity;
use crate::error::ArchiveError;
use crate::rtp::Complex32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedTimeSnap {
    pub time_snap_rtp: u32,
    pub time_snap_utc: f64,
    pub time_snap_source: String,
    pub time_snap_station: String,
    pub time_snap_confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteArchive {
    pub iq: Vec<Complex32>,
    pub sample_rate: u32,
    pub rtp_timestamp: u32,
    pub unix_timestamp: f64,
    pub ntp_wall_clock_time: Option<f64>,
    pub ntp_offset_ms: Option<f64>,
    pub channel_name: String,
    pub ssrc: u32,
    pub frequency_hz: f64,
    pub discontinuities: Vec<Discontinuity>,
    pub time_snap: Option<EmbeddedTimeSnap>,
}

impl MinuteArchive {
    /// spec.md §3 invariant 1: sample count equals `sample_rate * 60`.
    pub fn expected_sample_count(sample_rate: u32) -> usize {
        sample_rate as usize * 60
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        let expected = Self::expected_sample_count(self.sample_rate);
        if self.iq.len() != expected {
            return Err(ArchiveError::SampleCountMismatch {
                actual: self.iq.len(),
                expected,
            });
        }
        Ok(())
    }

    /// spec.md §8 P3: zero-fill samples inserted, counted from `gap`
    /// discontinuities only (rtp-reset and sync-adjust do not represent
    /// zero-filled samples).
    pub fn gap_sample_total(&self) -> i64 {
        self.discontinuities
            .iter()
            .filter(|d| matches!(d.kind, crate::discontinuity::DiscontinuityKind::Gap))
            .map(|d| d.magnitude_samples)
            .sum()
    }
}

/// `YYYYMMDDTHHMM00Z_<ssrc>_iq.<ext>` per spec.md §6.
pub fn archive_file_name(minute_boundary_utc: i64, ssrc: u32, ext: &str) -> String {
    let (y, mo, d, h, mi) = civil_from_unix_minute(minute_boundary_utc);
    format!("{y:04}{mo:02}{d:02}T{h:02}{mi:02}00Z_{ssrc}_iq.{ext}")
}

pub fn archive_path(dir: &Path, minute_boundary_utc: i64, ssrc: u32) -> PathBuf {
    dir.join(archive_file_name(minute_boundary_utc, ssrc, "iqz"))
}

/// `YYYY-MM-DDTHH:MM:SSZ`, truncating to the whole second -- used by the
/// timing metrics CSV (spec.md §4.10), sharing the same civil conversion as
/// the archive file name rather than pulling in chrono for one format.
pub fn iso8601_utc(unix_seconds: f64) -> String {
    let whole = unix_seconds.floor() as i64;
    let (y, mo, d, h, mi) = civil_from_unix_minute(whole - whole.rem_euclid(60));
    let sec = whole.rem_euclid(60);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{sec:02}Z")
}

/// Inverse of [`archive_file_name`]'s timestamp component: recovers the
/// minute boundary (unix seconds) and SSRC from a file name, for the
/// minute file reader's directory listing (spec.md §4.9), without needing
/// to decode the file itself.
pub fn parse_archive_file_name(name: &str) -> Result<(i64, u32), ArchiveError> {
    let bad = || ArchiveError::BadFileName(name.to_string());

    let stem = name.split('.').next().ok_or_else(bad)?;
    let mut parts = stem.splitn(3, '_');
    let datetime = parts.next().ok_or_else(bad)?;
    let ssrc_str = parts.next().ok_or_else(bad)?;

    if datetime.len() != 16 || &datetime[8..9] != "T" || &datetime[15..16] != "Z" {
        return Err(bad());
    }
    let y: i64 = datetime[0..4].parse().map_err(|_| bad())?;
    let mo: u32 = datetime[4..6].parse().map_err(|_| bad())?;
    let d: u32 = datetime[6..8].parse().map_err(|_| bad())?;
    let h: u32 = datetime[9..11].parse().map_err(|_| bad())?;
    let mi: u32 = datetime[11..13].parse().map_err(|_| bad())?;
    if &datetime[13..15] != "00" {
        return Err(bad());
    }
    let ssrc: u32 = ssrc_str.parse().map_err(|_| bad())?;

    Ok((unix_from_civil(y, mo, d, h, mi), ssrc))
}

/// Inverse of [`civil_from_unix_minute`] (Howard Hinnant's days-from-civil).
fn unix_from_civil(y: i64, m: u32, d: u32, hour: u32, minute: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = ((m + if m > 2 { 9 } else { 3 }) % 12) as u64;
    let doy = (153 * mp + 2) / 5 + d as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe as i64 - 719_468;
    days * 86_400 + hour as i64 * 3600 + minute as i64 * 60
}

/// Minimal proleptic-Gregorian civil-from-days conversion (Howard Hinnant's
/// algorithm), avoiding a chrono/time dependency for this one formatting
/// need; both the minute boundary and the archive's own `unix_timestamp`
/// field are integer-second UTC by construction (spec.md §3).
fn civil_from_unix_minute(unix_seconds: i64) -> (i64, u32, u32, u32, u32) {
    let days = unix_seconds.div_euclid(86_400);
    let secs_of_day = unix_seconds.rem_euclid(86_400);
    let hour = (secs_of_day / 3600) as u32;
    let minute = ((secs_of_day % 3600) / 60) as u32;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };

    (y, m, d, hour, minute)
}

pub fn encode(archive: &MinuteArchive) -> Result<Vec<u8>, ArchiveError> {
    let payload = bincode::serialize(archive)?;
    let compressed = zstd::stream::encode_all(&payload[..], 3).map_err(ArchiveError::Io)?;
    let checksum = crc32fast::hash(&compressed);

    let mut out = Vec::with_capacity(compressed.len() + 8);
    out.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
    out.extend_from_slice(&compressed);
    out.extend_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<MinuteArchive, ArchiveError> {
    if bytes.len() < 12 {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "archive file too short",
        )));
    }

    let len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
    let compressed = &bytes[8..8 + len];
    let checksum_bytes = &bytes[8 + len..8 + len + 4];
    let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

    let actual = crc32fast::hash(compressed);
    if actual != expected {
        return Err(ArchiveError::ChecksumMismatch { expected, actual });
    }

    let payload = zstd::stream::decode_all(compressed).map_err(ArchiveError::Io)?;
    let archive: MinuteArchive = bincode::deserialize(&payload)?;
    Ok(archive)
}

pub fn write_atomic(dir: &Path, archive: &MinuteArchive) -> Result<PathBuf, ArchiveError> {
    let path = archive_path(dir, archive.unix_timestamp as i64, archive.ssrc);
    let bytes = encode(archive)?;
    crate::atomic_write::atomic_write(&path, &bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_archive() -> MinuteArchive {
        MinuteArchive {
            iq: vec![Complex32::ZERO; 16_000 * 60],
            sample_rate: 16_000,
            rtp_timestamp: 0,
            unix_timestamp: 1_700_000_000.0,
            ntp_wall_clock_time: Some(1_700_000_000.0),
            ntp_offset_ms: Some(1.5),
            channel_name: "wwv-5".into(),
            ssrc: 12345,
            frequency_hz: 5_000_000.0,
            discontinuities: vec![],
            time_snap: None,
        }
    }

    #[test]
    fn round_trips_bit_identical() {
        let archive = sample_archive();
        let bytes = encode(&archive).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, archive.sample_rate);
        assert_eq!(decoded.iq.len(), archive.iq.len());
        assert_eq!(decoded.channel_name, archive.channel_name);
    }

    #[test]
    fn detects_corruption() {
        let archive = sample_archive();
        let mut bytes = encode(&archive).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(ArchiveError::ChecksumMismatch { .. })));
    }

    #[test]
    fn validates_sample_count() {
        let mut archive = sample_archive();
        archive.iq.pop();
        assert!(archive.validate().is_err());
    }

    #[test]
    fn file_name_matches_format() {
        // 2024-01-02T03:04:00Z
        let unix = 1_704_164_640;
        let name = archive_file_name(unix, 777, "iqz");
        assert_eq!(name, "20240102T030400Z_777_iq.iqz");
    }

    #[test]
    fn file_name_parses_back_to_the_same_minute_and_ssrc() {
        let unix = 1_704_164_640;
        let name = archive_file_name(unix, 777, "iqz");
        let (parsed_unix, parsed_ssrc) = parse_archive_file_name(&name).unwrap();
        assert_eq!(parsed_unix, unix);
        assert_eq!(parsed_ssrc, 777);
    }

    #[test]
    fn bad_file_name_is_rejected() {
        assert!(parse_archive_file_name("not-an-archive.txt").is_err());
    }

    #[test]
    fn iso8601_formats_whole_second_utc() {
        assert_eq!(iso8601_utc(1_704_164_643.0), "2024-01-02T03:04:03Z");
    }
}
