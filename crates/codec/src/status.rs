//! Per-minute status JSON file (spec.md §6), atomically rewritten.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::timesnap::TimeSnap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSnapStatus {
    pub source: String,
    pub station: String,
    pub confidence: f32,
    pub age_s: f64,
}

impl TimeSnapStatus {
    pub fn from_snap(snap: &TimeSnap, now: f64) -> Self {
        Self {
            source: snap.source.as_str().to_string(),
            station: format!("{:?}", snap.station).to_lowercase(),
            confidence: snap.confidence,
            age_s: snap.age_seconds(now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpStatus {
    pub synced: bool,
    pub offset_ms: Option<f64>,
    pub age_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub packets_received: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub gaps: u64,
    pub total_gap_samples: u64,
    pub completeness_pct: f64,
    pub last_packet_age_s: f64,
    pub time_snap: Option<TimeSnapStatus>,
    pub ntp: NtpStatus,
}

pub fn write_status(path: &Path, status: &ChannelStatus) -> Result<(), ArchiveError> {
    let json = serde_json::to_vec_pretty(status).map_err(|e| {
        ArchiveError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    crate::atomic_write::atomic_write(path, &json)?;
    Ok(())
}
