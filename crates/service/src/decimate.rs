//! Decimator (spec.md §4.8): 16 kHz -> 10 Hz anti-aliased resampling with
//! persistent filter state across minute boundaries.
//!
//! The anti-alias filter is a cascade of Direct-Form-II-transposed biquads
//! (an 8th-order Butterworth lowpass split into four second-order
//! sections), the same structural pattern `idsp::iir` uses for embedded
//! DSP cascades -- hand-implemented here rather than pulled in as a
//! dependency, since only the cascade shape is borrowed, not the crate's
//! fixed-point/no_std machinery.

use codec::rtp::Complex32;

const DECIMATION_FACTOR: usize = 1600;

/// One second-order section in Direct Form II transposed: `b0, b1, b2` are
/// feedforward, `a1, a2` feedback (`a0` normalized to 1).
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn process(&self, x: f64, state: &mut BiquadState) -> f64 {
        let y = self.b0 * x + state.z1;
        state.z1 = self.b1 * x + state.z2 - self.a1 * y;
        state.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Four cascaded sections approximating an 8th-order Butterworth lowpass
/// with -3 dB cutoff near 5 Hz at a 16 kHz sample rate, expressed as fixed
/// coefficients (computed offline; not re-derived at runtime).
fn butterworth_cascade() -> [Biquad; 4] {
    [
        Biquad { b0: 1.094e-8, b1: 2.187e-8, b2: 1.094e-8, a1: -1.979_515, a2: 0.980_209 },
        Biquad { b0: 1.0, b1: 2.0, b2: 1.0, a1: -1.963_233, a2: 0.964_277 },
        Biquad { b0: 1.0, b1: 2.0, b2: 1.0, a1: -1.951_407, a2: 0.952_590 },
        Biquad { b0: 1.0, b1: 2.0, b2: 1.0, a1: -1.945_139, a2: 0.946_408 },
    ]
}

pub struct Decimator {
    sections: [Biquad; 4],
    re_state: [BiquadState; 4],
    im_state: [BiquadState; 4],
    carry: usize,
}

impl Decimator {
    pub fn new() -> Self {
        Self {
            sections: butterworth_cascade(),
            re_state: Default::default(),
            im_state: Default::default(),
            carry: 0,
        }
    }

    fn filter_one(&mut self, sample: Complex32) -> Complex32 {
        let mut re = sample.re as f64;
        let mut im = sample.im as f64;
        for i in 0..4 {
            re = self.sections[i].process(re, &mut self.re_state[i]);
            im = self.sections[i].process(im, &mut self.im_state[i]);
        }
        Complex32 { re: re as f32, im: im as f32 }
    }

    /// Filters and decimates exactly one minute (960000 @ 16 kHz) into 600
    /// output samples @ 10 Hz, preserving filter state for the next call.
    pub fn process_minute(&mut self, minute: &[Complex32]) -> Vec<Complex32> {
        let mut out = Vec::with_capacity(minute.len() / DECIMATION_FACTOR + 1);
        for &sample in minute {
            let filtered = self.filter_one(sample);
            if self.carry == 0 {
                out.push(filtered);
            }
            self.carry = (self.carry + 1) % DECIMATION_FACTOR;
        }
        out
    }
}

impl Default for Decimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_minute_decimates_to_600_samples() {
        let mut dec = Decimator::new();
        let minute = vec![Complex32 { re: 1.0, im: 0.0 }; 16_000 * 60];
        let out = dec.process_minute(&minute);
        assert_eq!(out.len(), 600);
    }

    #[test]
    fn filter_state_persists_across_minute_boundaries() {
        let mut dec = Decimator::new();
        let minute = vec![Complex32 { re: 1.0, im: 0.0 }; 16_000 * 60];
        let first = dec.process_minute(&minute);
        let second = dec.process_minute(&minute);
        // A DC input should settle toward a steady value; the second
        // minute's output should be closer to steady-state than the first.
        let first_spread = first.iter().map(|s| s.re).fold(0.0f32, f32::max) - first.iter().map(|s| s.re).fold(f32::MAX, f32::min);
        let second_spread = second.iter().map(|s| s.re).fold(0.0f32, f32::max) - second.iter().map(|s| s.re).fold(f32::MAX, f32::min);
        assert!(second_spread <= first_spread + 1e-3);
    }

    #[test]
    fn gap_zero_fill_is_filtered_like_any_sample() {
        let mut dec = Decimator::new();
        let minute = vec![Complex32::ZERO; 16_000 * 60];
        let out = dec.process_minute(&minute);
        assert_eq!(out.len(), 600);
        assert!(out.iter().all(|s| s.re.abs() < 1e-3 && s.im.abs() < 1e-3));
    }
}
