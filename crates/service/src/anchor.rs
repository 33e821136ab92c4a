//! Anchor manager (spec.md §4.7): the single active time-snap per channel,
//! refined from tone detections. Analytics-side only -- capture never
//! updates its time-snap post-startup (see channel.rs's module doc).

use codec::timesnap::{Station, TimeSnap, TimeSnapSource};

use crate::tone::ToneDetection;

const QUALIFYING_CONFIDENCE: f32 = 0.6;
const RESYNC_THRESHOLD_S: f64 = 0.050;

#[derive(Debug, Clone, Copy)]
pub struct DriftSample {
    pub delta_s: f64,
    pub elapsed_s: f64,
    pub ppm: f64,
}

pub struct AnchorManager {
    active: TimeSnap,
    pending: Option<TimeSnap>,
    last_qualifying: Option<(f64, f64)>, // (detection UTC, predicted UTC) of the last WWV/CHU detection
}

impl AnchorManager {
    pub fn new(initial: TimeSnap) -> Self {
        Self {
            active: initial,
            pending: None,
            last_qualifying: None,
        }
    }

    pub fn active(&self) -> &TimeSnap {
        &self.active
    }

    /// Takes the pending update, if any, to apply at the next minute
    /// boundary (spec.md §4.3 "Pending time-snap application").
    pub fn take_pending(&mut self) -> Option<TimeSnap> {
        self.pending.take()
    }

    /// Clears cross-detection drift tracking without touching the active
    /// snap itself. Called by the minute file reader's consumer on a
    /// session-boundary event (spec.md §4.9): drift must never be computed
    /// across a capture restart.
    pub fn reset_drift_tracking(&mut self) {
        self.last_qualifying = None;
    }

    /// Applies a taken pending snap as the new active one; called by the
    /// boundary-aligned consumer (the long-form writer) exactly once per
    /// scheduled update.
    pub fn commit(&mut self, snap: TimeSnap) {
        self.active = snap;
    }

    /// Feeds one tone detection. WWVH is recorded by callers for
    /// propagation study but never reaches this method's qualifying path
    /// (spec.md §4.7: "WWVH detections are never used for time-snap
    /// updates").
    pub fn observe(&mut self, detection: &ToneDetection, sample_rate: u32) -> Option<DriftSample> {
        if !detection.use_for_time_snap || detection.confidence < QUALIFYING_CONFIDENCE {
            return None;
        }

        let predicted_rising_edge = detection.rising_edge_utc.round();
        let rtp_at_edge = self.active.rtp_for_utc(detection.rising_edge_utc);

        if self.active.source == TimeSnapSource::Initial {
            self.pending = Some(TimeSnap {
                rtp_timestamp_at_anchor: rtp_at_edge,
                utc_timestamp_at_anchor: predicted_rising_edge,
                sample_rate,
                source: TimeSnapSource::first_for(detection.station),
                confidence: detection.confidence,
                station: detection.station,
                established_at: detection.rising_edge_utc,
            });
            self.last_qualifying = Some((detection.rising_edge_utc, predicted_rising_edge));
            return None;
        }

        let predicted_utc = self.active.utc_for_rtp(rtp_at_edge);
        let delta = detection.rising_edge_utc - predicted_utc;

        let drift = self.last_qualifying.map(|(prev_utc, _prev_predicted)| {
            let elapsed = detection.rising_edge_utc - prev_utc;
            DriftSample {
                delta_s: delta,
                elapsed_s: elapsed,
                ppm: if elapsed > 0.0 { delta / elapsed * 1e6 } else { 0.0 },
            }
        });
        self.last_qualifying = Some((detection.rising_edge_utc, predicted_utc));

        if delta.abs() > RESYNC_THRESHOLD_S {
            self.pending = Some(TimeSnap {
                rtp_timestamp_at_anchor: rtp_at_edge,
                utc_timestamp_at_anchor: predicted_rising_edge,
                sample_rate,
                source: TimeSnapSource::verified_for(detection.station),
                confidence: detection.confidence,
                station: detection.station,
                established_at: detection.rising_edge_utc,
            });
        }

        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(station: Station, edge_utc: f64, confidence: f32, use_for_time_snap: bool) -> ToneDetection {
        ToneDetection {
            station,
            frequency_hz: 1000.0,
            duration_s: 0.8,
            rising_edge_utc: edge_utc,
            timing_error_ms: 0.0,
            snr_db: 20.0,
            correlation_peak: 0.5,
            noise_floor: 0.01,
            confidence,
            use_for_time_snap,
        }
    }

    #[test]
    fn first_qualifying_detection_establishes_pending_snap() {
        let mut mgr = AnchorManager::new(TimeSnap::initial(0, 1_700_000_000.0, 16_000));
        let result = mgr.observe(&detection(Station::Wwv, 1_700_000_060.0, 0.9, true), 16_000);
        assert!(result.is_none());
        let pending = mgr.take_pending().unwrap();
        assert_eq!(pending.source, TimeSnapSource::WwvFirst);
    }

    #[test]
    fn wwvh_detections_never_schedule_an_update() {
        let mut mgr = AnchorManager::new(TimeSnap::initial(0, 1_700_000_000.0, 16_000));
        mgr.observe(&detection(Station::Wwvh, 1_700_000_060.0, 0.95, false), 16_000);
        assert!(mgr.take_pending().is_none());
    }

    #[test]
    fn small_delta_does_not_schedule_resync() {
        let mut mgr = AnchorManager::new(TimeSnap::initial(0, 1_700_000_000.0, 16_000));
        mgr.observe(&detection(Station::Wwv, 1_700_000_060.0, 0.9, true), 16_000);
        mgr.commit(mgr.take_pending().unwrap());

        let drift = mgr.observe(&detection(Station::Wwv, 1_700_000_120.005, 0.9, true), 16_000);
        assert!(mgr.take_pending().is_none());
        assert!(drift.is_some());
    }
}
