//! The RTP<->UTC anchor (spec.md §3/§4.7).
//!
//! Immutable by construction: every update replaces the `Arc<TimeSnap>` a
//! channel holds rather than mutating fields in place, per §9's "Time-snap
//! as immutable value, replaced not mutated."

use serde::{Deserialize, Serialize};

use crate::rtp::rtp_ts_diff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
    /// Placeholder station for the wall-clock-derived initial anchor.
    Initial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeSnapSource {
    Initial,
    WwvFirst,
    WwvVerified,
    ChuFirst,
    ChuVerified,
}

impl TimeSnapSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::WwvFirst => "wwv-first",
            Self::WwvVerified => "wwv-verified",
            Self::ChuFirst => "chu-first",
            Self::ChuVerified => "chu-verified",
        }
    }

    /// The "-first" variant of a qualifying re-detection once a prior
    /// time-snap already exists for the station, promoted to "-verified".
    pub fn verified_for(station: Station) -> Self {
        match station {
            Station::Wwv => Self::WwvVerified,
            Station::Chu => Self::ChuVerified,
            Station::Wwvh | Station::Initial => unreachable!("WWVH/initial never anchor time-snaps"),
        }
    }

    pub fn first_for(station: Station) -> Self {
        match station {
            Station::Wwv => Self::WwvFirst,
            Station::Chu => Self::ChuFirst,
            Station::Wwvh | Station::Initial => unreachable!("WWVH/initial never anchor time-snaps"),
        }
    }
}

/// Immutable RTP<->UTC anchor, per spec.md §3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeSnap {
    pub rtp_timestamp_at_anchor: u32,
    pub utc_timestamp_at_anchor: f64,
    pub sample_rate: u32,
    pub source: TimeSnapSource,
    pub confidence: f32,
    pub station: Station,
    pub established_at: f64,
}

impl TimeSnap {
    /// The initial wall-clock anchor created at process start, before any
    /// tone has been detected (spec.md §4.3: "uses wall clock as initial
    /// anchor (source \"initial\", confidence 0.0)").
    pub fn initial(rtp_timestamp_at_anchor: u32, wall_clock_now: f64, sample_rate: u32) -> Self {
        Self {
            rtp_timestamp_at_anchor,
            utc_timestamp_at_anchor: wall_clock_now,
            sample_rate,
            source: TimeSnapSource::Initial,
            confidence: 0.0,
            station: Station::Initial,
            established_at: wall_clock_now,
        }
    }

    /// `utc(rtp) = utc_anchor + (rtp - rtp_anchor) / sample_rate`, per
    /// spec.md §3, using signed modular arithmetic for the subtraction.
    pub fn utc_for_rtp(&self, rtp: u32) -> f64 {
        let delta_samples = rtp_ts_diff(rtp, self.rtp_timestamp_at_anchor);
        self.utc_timestamp_at_anchor + (delta_samples as f64) / (self.sample_rate as f64)
    }

    /// Inverse of [`Self::utc_for_rtp`]: the RTP timestamp that should carry
    /// a given UTC instant, wrapped into u32.
    pub fn rtp_for_utc(&self, utc: f64) -> u32 {
        let delta_seconds = utc - self.utc_timestamp_at_anchor;
        let delta_samples = (delta_seconds * self.sample_rate as f64).round() as i64;
        self.rtp_timestamp_at_anchor.wrapping_add(delta_samples as u32)
    }

    pub fn age_seconds(&self, now: f64) -> f64 {
        (now - self.established_at).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_rtp_to_utc_linearly() {
        let snap = TimeSnap {
            rtp_timestamp_at_anchor: 1_000,
            utc_timestamp_at_anchor: 1_700_000_000.0,
            sample_rate: 16_000,
            source: TimeSnapSource::WwvFirst,
            confidence: 0.9,
            station: Station::Wwv,
            established_at: 1_700_000_000.0,
        };

        assert!((snap.utc_for_rtp(1_000) - 1_700_000_000.0).abs() < 1e-9);
        assert!((snap.utc_for_rtp(17_000) - 1_700_000_001.0).abs() < 1e-9);
    }

    #[test]
    fn handles_wraparound_in_both_directions() {
        let snap = TimeSnap {
            rtp_timestamp_at_anchor: u32::MAX - 7_999,
            utc_timestamp_at_anchor: 0.0,
            sample_rate: 16_000,
            source: TimeSnapSource::WwvFirst,
            confidence: 0.9,
            station: Station::Wwv,
            established_at: 0.0,
        };

        // 8000 samples past the anchor wraps past u32::MAX.
        let wrapped_rtp = snap.rtp_timestamp_at_anchor.wrapping_add(8_000);
        assert!((snap.utc_for_rtp(wrapped_rtp) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rtp_for_utc_round_trips() {
        let snap = TimeSnap::initial(500, 1_700_000_000.25, 16_000);
        let rtp = snap.rtp_for_utc(1_700_000_001.25);
        assert!((snap.utc_for_rtp(rtp) - 1_700_000_001.25).abs() < 1e-6);
    }
}
