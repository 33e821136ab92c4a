//! Packet resequencer (spec.md §4.2): circular 64-slot reorder buffer plus
//! RTP-timestamp-driven gap filling.

use codec::discontinuity::DiscontinuityKind;
use codec::rtp::{rtp_ts_diff, seq_diff, Complex32};

const HORIZON: usize = 64;
const JUMP_THRESHOLD: i32 = 32;

/// A reordered, gap-filled block of samples ready for the channel processor.
/// Synthetic zero-fill blocks carry the RTP timestamp of the position they
/// were inserted at.
#[derive(Debug, Clone)]
pub struct ResequencedBlock {
    pub rtp_timestamp: u32,
    pub samples: Vec<Complex32>,
    pub arrival: f64,
}

/// A discontinuity detected purely from RTP sequence/timestamp arithmetic,
/// not yet stamped with the minute-relative offset or wall clock -- those
/// are filled in by the channel processor, which is the only component
/// that knows the current minute boundary.
#[derive(Debug, Clone)]
pub struct PendingDiscontinuity {
    pub kind: DiscontinuityKind,
    pub magnitude_samples: i64,
    pub rtp_seq_before: u16,
    pub rtp_seq_after: u16,
    pub rtp_ts_before: u32,
    pub rtp_ts_after: u32,
    pub note: &'static str,
}

/// One emission from the resequencer, in strict chronological order. Kept
/// as a single interleaved sequence (rather than separate block/discontinuity
/// vectors) so downstream code can track a running minute-relative sample
/// offset without losing the association between a gap and the zero-fill
/// block it describes.
#[derive(Debug, Clone)]
pub enum ResequencedEvent {
    Block(ResequencedBlock),
    Discontinuity(PendingDiscontinuity),
}

#[derive(Debug, Default)]
pub struct PushOutcome {
    pub events: Vec<ResequencedEvent>,
    pub duplicate: bool,
    pub overflow: bool,
}

#[derive(Clone)]
struct Slot {
    sequence: u16,
    rtp_timestamp: u32,
    samples: Vec<Complex32>,
    arrival: f64,
    occupied: bool,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            sequence: 0,
            rtp_timestamp: 0,
            samples: Vec::new(),
            arrival: 0.0,
            occupied: false,
        }
    }
}

pub struct Resequencer {
    slots: Vec<Slot>,
    expected_next_sequence: u16,
    expected_next_rtp_timestamp: u32,
    last_emitted_sequence: Option<u16>,
    started: bool,
}

impl Resequencer {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::empty(); HORIZON],
            expected_next_sequence: 0,
            expected_next_rtp_timestamp: 0,
            last_emitted_sequence: None,
            started: false,
        }
    }

    pub fn push(&mut self, sequence: u16, rtp_timestamp: u32, samples: Vec<Complex32>, arrival: f64) -> PushOutcome {
        let mut out = PushOutcome::default();

        if !self.started {
            self.started = true;
            self.expected_next_sequence = sequence;
            self.expected_next_rtp_timestamp = rtp_timestamp;
        }

        let idx = (sequence as usize) % HORIZON;

        if self.slots[idx].occupied {
            let occupant_seq = self.slots[idx].sequence;
            // Aliasing within the 64-slot horizon (the only way two distinct
            // sequences collide in the same slot with |diff| < 64) is treated
            // as a duplicate per spec.md §4.2: "occupied by a different
            // packet whose sequence differs from S by less than 64".
            if seq_diff(occupant_seq, sequence).unsigned_abs() < HORIZON as u32 {
                out.duplicate = true;
                return out;
            }
        }

        let gap = seq_diff(sequence, self.expected_next_sequence);
        if gap.abs() > JUMP_THRESHOLD {
            self.flush_occupied_in_order(&mut out);

            out.events.push(ResequencedEvent::Discontinuity(PendingDiscontinuity {
                kind: DiscontinuityKind::RtpReset,
                magnitude_samples: 0,
                rtp_seq_before: self.expected_next_sequence,
                rtp_seq_after: sequence,
                rtp_ts_before: self.expected_next_rtp_timestamp,
                rtp_ts_after: rtp_timestamp,
                note: "sequence jump exceeded reorder horizon, resynced",
            }));

            self.expected_next_sequence = sequence;
            self.expected_next_rtp_timestamp = rtp_timestamp;
        }

        self.slots[idx] = Slot {
            sequence,
            rtp_timestamp,
            samples,
            arrival,
            occupied: true,
        };

        self.drain(&mut out);
        out
    }

    /// Flushes every occupied slot to the output, in ascending order of
    /// sequence relative to the current expected-next, before a resync.
    fn flush_occupied_in_order(&mut self, out: &mut PushOutcome) {
        let mut occupied: Vec<usize> = (0..HORIZON).filter(|&i| self.slots[i].occupied).collect();
        occupied.sort_by_key(|&i| seq_diff(self.slots[i].sequence, self.expected_next_sequence));

        for i in occupied {
            let slot = std::mem::replace(&mut self.slots[i], Slot::empty());
            self.emit(slot.sequence, slot.rtp_timestamp, slot.samples, slot.arrival, out);
        }
    }

    fn drain(&mut self, out: &mut PushOutcome) {
        loop {
            let idx = (self.expected_next_sequence as usize) % HORIZON;
            if !self.slots[idx].occupied {
                break;
            }

            let slot = std::mem::replace(&mut self.slots[idx], Slot::empty());
            self.expected_next_sequence = self.expected_next_sequence.wrapping_add(1);
            self.emit(slot.sequence, slot.rtp_timestamp, slot.samples, slot.arrival, out);
        }
    }

    /// Emits one packet's samples, inserting a zero-fill block ahead of it
    /// if its RTP timestamp is ahead of the expected-next timestamp
    /// (spec.md §4.2: "the authoritative rule" for gap detection).
    fn emit(&mut self, sequence: u16, rtp_timestamp: u32, samples: Vec<Complex32>, arrival: f64, out: &mut PushOutcome) {
        let delta = rtp_ts_diff(rtp_timestamp, self.expected_next_rtp_timestamp);

        if delta > 0 {
            let gap_len = delta as u64;
            let seq_before = self.last_emitted_sequence.unwrap_or(sequence.wrapping_sub(1));

            out.events.push(ResequencedEvent::Discontinuity(PendingDiscontinuity {
                kind: DiscontinuityKind::Gap,
                magnitude_samples: delta,
                rtp_seq_before: seq_before,
                rtp_seq_after: sequence,
                rtp_ts_before: self.expected_next_rtp_timestamp,
                rtp_ts_after: rtp_timestamp,
                note: "rtp timestamp advanced past expected-next, zero-filled",
            }));

            out.events.push(ResequencedEvent::Block(ResequencedBlock {
                rtp_timestamp: self.expected_next_rtp_timestamp,
                samples: vec![Complex32::ZERO; gap_len as usize],
                arrival,
            }));
        }

        let n = samples.len() as u32;
        self.expected_next_rtp_timestamp = rtp_timestamp.wrapping_add(n);
        self.last_emitted_sequence = Some(sequence);
        out.events.push(ResequencedEvent::Block(ResequencedBlock {
            rtp_timestamp,
            samples,
            arrival,
        }));
    }

    /// Flushes all occupied slots, in sequence order, for shutdown
    /// (spec.md §4.2 "Cancellation").
    pub fn drain_on_shutdown(&mut self) -> PushOutcome {
        let mut out = PushOutcome::default();
        self.flush_occupied_in_order(&mut out);
        out
    }
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new()
    }
}
