//! V.17: trellis-coded QAM high-speed image transport, 7200-14400 bps.
//!
//! The trellis encoder/decoder itself is an out-of-scope modem component
//! (spec.md §1, §4 Non-goals); what's modeled here is the protocol-visible
//! training timeline and resulting bit rate, on the same amplitude-keyed
//! channel the other high-speed modems use.
//!
//! Two training modes (spec.md §4.3): *long* (256 ABAB + 2976 scrambled +
//! 64 bridge + 48 ones) for the first train of a call, and *short* (38
//! scrambled + 48 ones) once a V.17 carrier has already trained long in
//! this session. [`super::highspeed`]'s stage machine has no separate
//! "bridge" stage; its 64 symbols are folded into the scrambled-training
//! count, since both segments are scrambled carrier with no distinct
//! receive-visible behavior before the ones test.

use super::highspeed::{HighSpeedRx, HighSpeedTx, Profile, TrainingPlan};
use super::HIGH_SPEED_THRESHOLDS;

const CARRIER_HZ: f32 = 1800.0;
const BAUD: u32 = 2400;

/// The four rates V.17 negotiates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Bps7200,
    Bps9600,
    Bps12000,
    Bps14400,
}

impl Rate {
    fn bits_per_symbol(self) -> u8 {
        match self {
            Rate::Bps7200 => 3,
            Rate::Bps9600 => 4,
            Rate::Bps12000 => 5,
            Rate::Bps14400 => 6,
        }
    }
}

/// Whether this train is the first (full) train of the call or a
/// short retrain, per spec.md §4.4's "retraining short vs long" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    Long,
    Short,
}

pub(crate) fn profile(rate: Rate, mode: TrainingMode) -> Profile {
    let plan = match mode {
        TrainingMode::Long => TrainingPlan {
            silence_symbols: 0,
            unmod_or_abab_symbols: 256,
            scrambled_symbols: 2976 + 64,
            ones_test_symbols: 48,
        },
        TrainingMode::Short => TrainingPlan {
            silence_symbols: 0,
            unmod_or_abab_symbols: 0,
            scrambled_symbols: 38,
            ones_test_symbols: 48,
        },
    };
    Profile {
        carrier_hz: CARRIER_HZ,
        baud: BAUD,
        bits_per_symbol: rate.bits_per_symbol(),
        scrambler_taps: (18, 23),
        thresholds: HIGH_SPEED_THRESHOLDS,
        plan,
    }
}

#[derive(Debug)]
pub struct V17Tx(HighSpeedTx);

impl V17Tx {
    pub fn new(rate: Rate, mode: TrainingMode) -> Self {
        Self(HighSpeedTx::new(profile(rate, mode)))
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
pub struct V17Rx(HighSpeedRx);

impl V17Rx {
    pub fn new(rate: Rate, mode: TrainingMode) -> Self {
        Self(HighSpeedRx::new(profile(rate, mode)))
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
    fn short_train_reports_carrier_up_quickly() {
        let mut tx = V17Tx::new(Rate::Bps14400, TrainingMode::Short);
        for i in 0..64 {
            tx.push_bit(i % 5 == 0);
        }
        let mut rx = V17Rx::new(Rate::Bps14400, TrainingMode::Short);
        let mut saw_carrier_up = false;
        for _ in 0..200 {
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
