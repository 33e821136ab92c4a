//! Discontinuity records (spec.md §3, invariant 4: additive-only, never
//! removed or merged).
//!
//! §9's design notes call for modeling the three kinds as a tagged sum type
//! since each has a distinct natural field set; spec.md §3 nonetheless
//! defines one uniform record shape shared by all three kinds (wall clock,
//! sample offset, magnitude, before/after RTP seq+ts, a WWV-related flag, and
//! free text). We follow §3's shape literally -- the fields genuinely are
//! the same across kinds here, unlike STUN's attribute set -- and use the
//! enum purely as the kind tag. See DESIGN.md for this Open Question call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscontinuityKind {
    /// Zero-filled sample loss; magnitude is the count of zero samples inserted.
    Gap,
    /// Sequence or timestamp jump large enough to force a resequencer resync.
    RtpReset,
    /// Duplicate coverage within one minute; the later sample wins.
    SyncAdjust,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discontinuity {
    pub wall_clock: f64,
    pub offset_samples: u64,
    pub kind: DiscontinuityKind,
    /// Positive for a gap (samples inserted), negative for an overlap
    /// (sync-adjust overwrite of already-written samples).
    pub magnitude_samples: i64,
    pub rtp_seq_before: u16,
    pub rtp_seq_after: u16,
    pub rtp_ts_before: u32,
    pub rtp_ts_after: u32,
    pub wwv_related: bool,
    pub note: String,
}

impl Discontinuity {
    pub fn gap(
        wall_clock: f64,
        offset_samples: u64,
        magnitude_samples: i64,
        rtp_seq_before: u16,
        rtp_seq_after: u16,
        rtp_ts_before: u32,
        rtp_ts_after: u32,
        note: impl Into<String>,
    ) -> Self {
        Self {
            wall_clock,
            offset_samples,
            kind: DiscontinuityKind::Gap,
            magnitude_samples,
            rtp_seq_before,
            rtp_seq_after,
            rtp_ts_before,
            rtp_ts_after,
            wwv_related: false,
            note: note.into(),
        }
    }

    pub fn rtp_reset(
        wall_clock: f64,
        offset_samples: u64,
        rtp_seq_before: u16,
        rtp_seq_after: u16,
        rtp_ts_before: u32,
        rtp_ts_after: u32,
        note: impl Into<String>,
    ) -> Self {
        Self {
            wall_clock,
            offset_samples,
            kind: DiscontinuityKind::RtpReset,
            magnitude_samples: 0,
            rtp_seq_before,
            rtp_seq_after,
            rtp_ts_before,
            rtp_ts_after,
            wwv_related: false,
            note: note.into(),
        }
    }

    pub fn sync_adjust(
        wall_clock: f64,
        offset_samples: u64,
        magnitude_samples: i64,
        rtp_seq_before: u16,
        rtp_seq_after: u16,
        rtp_ts_before: u32,
        rtp_ts_after: u32,
        note: impl Into<String>,
    ) -> Self {
        debug_assert!(magnitude_samples <= 0, "sync-adjust magnitude must be non-positive");
        Self {
            wall_clock,
            offset_samples,
            kind: DiscontinuityKind::SyncAdjust,
            magnitude_samples,
            rtp_seq_before,
            rtp_seq_after,
            rtp_ts_before,
            rtp_ts_after,
            wwv_related: false,
            note: note.into(),
        }
    }
}
