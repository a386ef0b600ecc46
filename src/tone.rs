//! CNG/CED call-progress tone generators, per spec.md §6.
//!
//! Timing is sample-clocked the same way the rest of the session is:
//! callers drive these with `BLOCK_SAMPLES`-sized ticks rather than a
//! wall clock.

use crate::consts::{cng, ced, SAMPLE_RATE};
use crate::dsp::Dds;

/// Calling tone generator: 0.5 s on, 3.0 s off, repeating.
#[derive(Debug)]
pub struct CngGenerator {
    dds: Dds,
    samples_in_state: u32,
    on: bool,
}

impl CngGenerator {
    pub fn new() -> Self {
        Self {
            dds: Dds::new(cng::FREQ_HZ, SAMPLE_RATE),
            samples_in_state: 0,
            on: true,
        }
    }

    /// Produces the next sample and advances the on/off schedule.
    pub fn next_sample(&mut self) -> i16 {
        let on_samples = ms_to_samples(cng::ON_MS);
        let off_samples = ms_to_samples(cng::OFF_MS);
        let limit = if self.on { on_samples } else { off_samples };

        let sample = if self.on {
            crate::dsp::scale_sample(self.dds.next_sample(), cng::LEVEL_DBM0)
        } else {
            0
        };

        self.samples_in_state += 1;
        if self.samples_in_state >= limit {
            self.samples_in_state = 0;
            self.on = !self.on;
            if self.on {
                self.dds.reset();
            }
        }
        sample
    }
}

impl Default for CngGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Called-tone generator: one continuous burst between 2.6 s and 4.0 s,
/// bracketed by silence, after which it reports completion.
#[derive(Debug)]
pub struct CedGenerator {
    dds: Dds,
    samples_elapsed: u32,
    duration_samples: u32,
}

impl CedGenerator {
    /// `duration_ms` must fall within `[MIN_ON_MS, MAX_ON_MS]`.
    pub fn new(duration_ms: u32) -> Self {
        let duration_ms = duration_ms.clamp(ced::MIN_ON_MS, ced::MAX_ON_MS);
        Self {
            dds: Dds::new(ced::FREQ_HZ, SAMPLE_RATE),
            samples_elapsed: 0,
            duration_samples: ms_to_samples(duration_ms),
        }
    }

    /// Returns `Some(sample)` while the tone (including its bracketing
    /// silence) is still running, `None` once it is complete.
    pub fn next_sample(&mut self) -> Option<i16> {
        let pre = ms_to_samples(ced::PRE_SILENCE_MS);
        let post_start = pre + self.duration_samples;
        let total = post_start + ms_to_samples(ced::POST_SILENCE_MS);
        if self.samples_elapsed >= total {
            return None;
        }
        let sample = if self.samples_elapsed >= pre && self.samples_elapsed < post_start {
            crate::dsp::scale_sample(self.dds.next_sample(), ced::LEVEL_DBM0)
        } else {
            0
        };
        self.samples_elapsed += 1;
        Some(sample)
    }
}

fn ms_to_samples(ms: u32) -> u32 {
    ms * SAMPLE_RATE / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cng_alternates_on_and_off() {
        let mut g = CngGenerator::new();
        let on_samples = ms_to_samples(cng::ON_MS) as usize;
        let mut saw_nonzero = false;
        let mut saw_zero_after = false;
        for i in 0..(on_samples + 10) {
            let s = g.next_sample();
            if i < on_samples && s != 0 {
                saw_nonzero = true;
            }
            if i >= on_samples && s == 0 {
                saw_zero_after = true;
            }
        }
        assert!(saw_nonzero);
        assert!(saw_zero_after);
    }

    #[test]
    fn ced_terminates_after_its_window() {
        let mut g = CedGenerator::new(2_600);
        let mut count = 0;
        while g.next_sample().is_some() {
            count += 1;
            assert!(count < ms_to_samples(5_000), "CED generator never terminated");
        }
        let expected = ms_to_samples(ced::PRE_SILENCE_MS + 2_600 + ced::POST_SILENCE_MS);
        assert_eq!(count, expected);
    }
}
