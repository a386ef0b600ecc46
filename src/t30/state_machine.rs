//! Phase/role tags and the sample-clocked timer bank shared by
//! [`super::session::Session`] (spec.md §4.5's "Timer discipline", §8's
//! timer invariant, §5's "Real-time clock").

use std::collections::HashMap;

use crate::consts::SAMPLE_RATE;

/// The five T.30 phases (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    A,
    B,
    C,
    D,
    E,
}

/// Which side of the call this session is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Calling,
    Answering,
}

/// The five T.30 timers (T0-T5, minus T3 which only bounds an
/// operator-interrupt condition this crate never raises on its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
}

impl Timer {
    fn nominal_ms(self) -> u32 {
        use crate::consts::timers::*;
        match self {
            Timer::T0 => T0_MS,
            Timer::T1 => T1_MS,
            Timer::T2 => T2_MS,
            Timer::T3 => T3_MS,
            Timer::T4 => T4_MS,
            Timer::T5 => T5_MS,
        }
    }
}

/// Tracks every currently-armed timer in samples remaining and fires
/// each at most once per [`TimerBank::tick`] call, matching spec.md §8's
/// invariant: "for every block of N samples, any timer whose remaining
/// value was >=N becomes remaining-N; whose value was <N fires exactly
/// once."
#[derive(Debug, Default)]
pub struct TimerBank {
    remaining_samples: HashMap<Timer, u32>,
}

impl TimerBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, timer: Timer) {
        let samples = timer.nominal_ms() * SAMPLE_RATE / 1000;
        self.remaining_samples.insert(timer, samples);
    }

    pub fn cancel(&mut self, timer: Timer) {
        self.remaining_samples.remove(&timer);
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.remaining_samples.contains_key(&timer)
    }

    /// Advances every armed timer by `block_samples`, returning the
    /// timers that fired this block.
    pub fn tick(&mut self, block_samples: u32) -> Vec<Timer> {
        let mut fired = Vec::new();
        self.remaining_samples.retain(|&timer, remaining| {
            if *remaining <= block_samples {
                fired.push(timer);
                false
            } else {
                *remaining -= block_samples;
                true
            }
        });
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_timer_fires_exactly_once_when_exhausted() {
        let mut bank = TimerBank::new();
        bank.arm(Timer::T4); // 3_000 ms = 24_000 samples at 8 kHz
        let mut total_fired = 0;
        for _ in 0..200 {
            total_fired += bank.tick(160).len();
        }
        assert_eq!(total_fired, 1);
        assert!(!bank.is_armed(Timer::T4));
    }

    #[test]
    fn cancel_before_expiry_prevents_firing() {
        let mut bank = TimerBank::new();
        bank.arm(Timer::T2);
        bank.tick(160);
        bank.cancel(Timer::T2);
        let mut total_fired = 0;
        for _ in 0..500 {
            total_fired += bank.tick(160).len();
        }
        assert_eq!(total_fired, 0);
    }
}
