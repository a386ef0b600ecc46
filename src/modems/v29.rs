//! V.29: 16-QAM high-speed image transport, 4800/7200/9600 bps.
//!
//! Training per spec.md §4.3: silence (≤480 samples) → ABAB (128 symbols)
//! → scrambled CDCD (384 symbols) → ones test (48 symbols). The silence
//! figure is given in samples, not symbols; converted here to the
//! equivalent symbol count at 2400 baud.

use super::highspeed::{HighSpeedRx, HighSpeedTx, Profile, TrainingPlan};
use super::HIGH_SPEED_THRESHOLDS;
use crate::consts::SAMPLE_RATE;

const CARRIER_HZ: f32 = 1700.0;
const BAUD: u32 = 2400;
const SILENCE_SAMPLES: u32 = 480;

/// The three rates V.29 negotiates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Bps4800,
    Bps7200,
    Bps9600,
}

impl Rate {
    fn bits_per_symbol(self) -> u8 {
        match self {
            Rate::Bps4800 => 2,
            Rate::Bps7200 => 3,
            Rate::Bps9600 => 4,
        }
    }
}

pub(crate) fn profile(rate: Rate) -> Profile {
    let silence_symbols = (SILENCE_SAMPLES * BAUD) / SAMPLE_RATE;
    Profile {
        carrier_hz: CARRIER_HZ,
        baud: BAUD,
        bits_per_symbol: rate.bits_per_symbol(),
        scrambler_taps: (18, 23),
        thresholds: HIGH_SPEED_THRESHOLDS,
        plan: TrainingPlan {
            silence_symbols,
            unmod_or_abab_symbols: 128,
            scrambled_symbols: 384,
            ones_test_symbols: 48,
        },
    }
}

#[derive(Debug)]
pub struct V29Tx(HighSpeedTx);

impl V29Tx {
    pub fn new(rate: Rate) -> Self {
        Self(HighSpeedTx::new(profile(rate)))
    }

    pub fn push_bit(&mut self, bit: bool) {
        self.0.push_bit(bit);
    }

    pub fn is_idle(&self) -> bool {
        self.0.is_idle()
    }

    pub fn next_sample(&mut self) -> (Option<i16>, Option<super::TxEvent>) {
        self.0.next_sample()
    }
}

#[derive(Debug)]
pub struct V29Rx(HighSpeedRx);

impl V29Rx {
    pub fn new(rate: Rate) -> Self {
        Self(HighSpeedRx::new(profile(rate)))
    }

    pub fn state(&self) -> super::TrainingState {
        self.0.state()
    }

    pub fn receive_sample(&mut self, sample: i16) -> (Vec<bool>, Option<super::RxEvent>) {
        self.0.receive_sample(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modems::RxEvent;

    #[test]
    fn trains_at_9600_and_reports_carrier_up() {
        let mut tx = V29Tx::new(Rate::Bps9600);
        for i in 0..64 {
            tx.push_bit(i % 4 == 0);
        }
        let mut rx = V29Rx::new(Rate::Bps9600);
        let mut saw_carrier_up = false;
        for _ in 0..300 {
            let (s, _) = tx.next_sample();
            if let Some(s) = s {
                let (_, ev) = rx.receive_sample(s);
                if matches!(ev, Some(RxEvent::CarrierUp)) {
                    saw_carrier_up = true;
                }
            }
        }
        assert!(saw_carrier_up);
    }
}
