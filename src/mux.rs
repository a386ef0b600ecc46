//! Modem multiplexer (spec.md §4.4): decides which rx demodulator runs
//! and which tx modulator sources samples on a given session.
//!
//! [`RxLane`] and [`TxLane`] are tagged enums selecting which sub-state
//! runs; nothing here runs a modem the session hasn't explicitly armed.

use std::collections::VecDeque;

use crate::consts::SAMPLE_RATE;
use crate::modems::v17::{self, V17Rx, V17Tx};
use crate::modems::v21::{V21Rx, V21Tx};
use crate::modems::v27ter::{self, V27terRx, V27terTx};
use crate::modems::v29::{self, V29Rx, V29Tx};
use crate::modems::{RxEvent, TrainingState};
use crate::tone::{CedGenerator, CngGenerator};

const DEFAULT_PRE_PAUSE_MS: u32 = 75;

fn ms_to_samples(ms: u32) -> u32 {
    ms * SAMPLE_RATE / 1000
}

/// Selects one high-speed modem/rate/training-mode combination.
#[derive(Debug, Clone, Copy)]
pub enum HighSpeedChoice {
    V27ter(v27ter::Rate),
    V29(v29::Rate),
    V17(v17::Rate, v17::TrainingMode),
}

#[derive(Debug)]
enum HighSpeedRxHandle {
    V27ter(V27terRx),
    V29(V29Rx),
    V17(V17Rx),
}

#[derive(Debug)]
enum HighSpeedTxHandle {
    V27ter(V27terTx),
    V29(V29Tx),
    V17(V17Tx),
}

impl HighSpeedChoice {
    fn build_rx(self) -> HighSpeedRxHandle {
        match self {
            HighSpeedChoice::V27ter(rate) => HighSpeedRxHandle::V27ter(V27terRx::new(rate)),
            HighSpeedChoice::V29(rate) => HighSpeedRxHandle::V29(V29Rx::new(rate)),
            HighSpeedChoice::V17(rate, mode) => HighSpeedRxHandle::V17(V17Rx::new(rate, mode)),
        }
    }

    fn build_tx(self) -> HighSpeedTxHandle {
        match self {
            HighSpeedChoice::V27ter(rate) => HighSpeedTxHandle::V27ter(V27terTx::new(rate)),
            HighSpeedChoice::V29(rate) => HighSpeedTxHandle::V29(V29Tx::new(rate)),
            HighSpeedChoice::V17(rate, mode) => HighSpeedTxHandle::V17(V17Tx::new(rate, mode)),
        }
    }
}

impl HighSpeedRxHandle {
    #[allow(dead_code)]
    fn state(&self) -> TrainingState {
        match self {
            HighSpeedRxHandle::V27ter(h) => h.state(),
            HighSpeedRxHandle::V29(h) => h.state(),
            HighSpeedRxHandle::V17(h) => h.state(),
        }
    }

    fn receive_sample(&mut self, sample: i16) -> (Vec<bool>, Option<RxEvent>) {
        match self {
            HighSpeedRxHandle::V27ter(h) => h.receive_sample(sample),
            HighSpeedRxHandle::V29(h) => h.receive_sample(sample),
            HighSpeedRxHandle::V17(h) => h.receive_sample(sample),
        }
    }
}

impl HighSpeedTxHandle {
    fn push_bit(&mut self, bit: bool) {
        match self {
            HighSpeedTxHandle::V27ter(h) => h.push_bit(bit),
            HighSpeedTxHandle::V29(h) => h.push_bit(bit),
            HighSpeedTxHandle::V17(h) => h.push_bit(bit),
        }
    }

    fn is_idle(&self) -> bool {
        match self {
            HighSpeedTxHandle::V27ter(h) => h.is_idle(),
            HighSpeedTxHandle::V29(h) => h.is_idle(),
            HighSpeedTxHandle::V17(h) => h.is_idle(),
        }
    }

    fn next_sample(&mut self) -> (Option<i16>, bool) {
        let (s, ev) = match self {
            HighSpeedTxHandle::V27ter(h) => h.next_sample(),
            HighSpeedTxHandle::V29(h) => h.next_sample(),
            HighSpeedTxHandle::V17(h) => h.next_sample(),
        };
        (s, ev.is_some())
    }
}

/// Which rx demodulator(s) are currently listening.
#[derive(Debug)]
enum RxLane {
    Idle,
    V21Only(V21Rx),
    HighSpeedOnly(HighSpeedRxHandle),
    /// V.21 and a high-speed candidate running on the same sample block;
    /// whichever reports training-succeeded first wins and the other is
    /// dropped (spec.md §4.4's "rule for rx").
    Racing(V21Rx, HighSpeedRxHandle),
}

/// Bits (if any) decoded from this sample, and an rx-side event.
#[derive(Debug, Default)]
pub struct MuxRxOutput {
    pub bits: Vec<bool>,
    pub event: Option<RxEvent>,
}

/// Which tx modulator is currently sourcing samples.
#[derive(Debug)]
enum TxLane {
    Silence,
    V21(V21Tx),
    HighSpeed(HighSpeedTxHandle),
    Cng(CngGenerator),
    Ced(CedGenerator),
}

/// The handler a tx-side modem change should switch to once its
/// mandated pre-pause silence has elapsed.
#[derive(Debug, Clone, Copy)]
pub enum NextTxHandler {
    V21,
    HighSpeed(HighSpeedChoice),
    Cng,
    /// Duration in milliseconds, clamped by [`crate::tone::CedGenerator`].
    Ced(u32),
}

impl NextTxHandler {
    /// Silence samples to insert before switching, per spec.md §4.4 ("75
    /// ms silence before switching from high-speed back to V.21, 200 ms
    /// before CED, etc."). CNG/CED already bracket their own tone with
    /// internal silence ([`crate::tone`]), so the multiplexer adds none
    /// on top of those.
    fn pre_pause_samples(self) -> u32 {
        match self {
            NextTxHandler::Cng | NextTxHandler::Ced(_) => 0,
            NextTxHandler::V21 | NextTxHandler::HighSpeed(_) => ms_to_samples(DEFAULT_PRE_PAUSE_MS),
        }
    }
}

#[derive(Debug)]
struct PendingSwitch {
    silence_samples_left: u32,
    next: NextTxHandler,
}

/// A tx-side event: the active handler has drained (end-of-data plus its
/// trailing sign-off), so the multiplexer has either switched to a
/// queued handler or fallen back to silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxTxEvent {
    StepComplete,
}

/// Owns the rx/tx lanes for one session and arbitrates between them.
#[derive(Debug)]
pub struct ModemMux {
    rx: RxLane,
    tx: TxLane,
    pending: Option<PendingSwitch>,
    /// Bits pushed while a switch is queued but its pre-pause silence
    /// hasn't finished draining yet. The caller that requests a handler
    /// switch usually starts feeding it data in the same breath, well
    /// before enough `next_sample()` calls have run to activate it; those
    /// bits would otherwise vanish into whatever lane (often `Silence`)
    /// was still active. Replayed into the new handler the instant it's
    /// built.
    queued_bits: VecDeque<bool>,
}

impl ModemMux {
    pub fn new() -> Self {
        Self {
            rx: RxLane::Idle,
            tx: TxLane::Silence,
            pending: None,
            queued_bits: VecDeque::new(),
        }
    }

    // --- rx side ---

    pub fn stop_rx(&mut self) {
        self.rx = RxLane::Idle;
    }

    pub fn start_rx_v21(&mut self) {
        self.rx = RxLane::V21Only(V21Rx::new());
    }

    pub fn start_rx_high_speed(&mut self, choice: HighSpeedChoice) {
        self.rx = RxLane::HighSpeedOnly(choice.build_rx());
    }

    /// Races V.21 against `choice`, per spec.md §4.4.
    pub fn start_rx_race(&mut self, choice: HighSpeedChoice) {
        self.rx = RxLane::Racing(V21Rx::new(), choice.build_rx());
    }

    pub fn is_racing(&self) -> bool {
        matches!(self.rx, RxLane::Racing(..))
    }

    pub fn receive_sample(&mut self, sample: i16) -> MuxRxOutput {
        let lane = std::mem::replace(&mut self.rx, RxLane::Idle);
        let (new_lane, output) = match lane {
            RxLane::Idle => (RxLane::Idle, MuxRxOutput::default()),
            RxLane::V21Only(mut rx) => {
                let (bit, event) = rx.receive_sample(sample);
                let output = MuxRxOutput {
                    bits: bit.into_iter().collect(),
                    event,
                };
                (RxLane::V21Only(rx), output)
            }
            RxLane::HighSpeedOnly(mut h) => {
                let (bits, event) = h.receive_sample(sample);
                (RxLane::HighSpeedOnly(h), MuxRxOutput { bits, event })
            }
            RxLane::Racing(mut v21, mut h) => {
                let (v21_bit, v21_event) = v21.receive_sample(sample);
                let (h_bits, h_event) = h.receive_sample(sample);
                if matches!(v21_event, Some(RxEvent::TrainingSucceeded)) {
                    let output = MuxRxOutput {
                        bits: v21_bit.into_iter().collect(),
                        event: v21_event,
                    };
                    (RxLane::V21Only(v21), output)
                } else if matches!(h_event, Some(RxEvent::TrainingSucceeded)) {
                    (RxLane::HighSpeedOnly(h), MuxRxOutput { bits: h_bits, event: h_event })
                } else {
                    let mut bits: Vec<bool> = v21_bit.into_iter().collect();
                    bits.extend(h_bits);
                    let event = v21_event.or(h_event);
                    (RxLane::Racing(v21, h), MuxRxOutput { bits, event })
                }
            }
        };
        self.rx = new_lane;
        output
    }

    // --- tx side ---

    /// Queues a handler switch; it takes effect once the current
    /// handler's mandated pre-pause silence has been emitted.
    pub fn queue_switch(&mut self, next: NextTxHandler) {
        self.queued_bits.clear();
        self.pending = Some(PendingSwitch {
            silence_samples_left: next.pre_pause_samples(),
            next,
        });
    }

    pub fn push_bit(&mut self, bit: bool) {
        if self.pending.is_some() {
            self.queued_bits.push_back(bit);
            return;
        }
        Self::push_bit_to(&mut self.tx, bit);
    }

    fn push_bit_to(tx: &mut TxLane, bit: bool) {
        match tx {
            TxLane::V21(h) => h.push_bit(bit),
            TxLane::HighSpeed(h) => h.push_bit(bit),
            TxLane::Silence | TxLane::Cng(_) | TxLane::Ced(_) => {}
        }
    }

    pub fn tx_is_idle(&self) -> bool {
        match &self.tx {
            TxLane::V21(h) => h.is_idle(),
            TxLane::HighSpeed(h) => h.is_idle(),
            TxLane::Silence => true,
            TxLane::Cng(_) | TxLane::Ced(_) => false,
        }
    }

    fn build_handler(next: NextTxHandler) -> TxLane {
        match next {
            NextTxHandler::V21 => TxLane::V21(V21Tx::new()),
            NextTxHandler::HighSpeed(choice) => TxLane::HighSpeed(choice.build_tx()),
            NextTxHandler::Cng => TxLane::Cng(CngGenerator::new()),
            NextTxHandler::Ced(duration_ms) => TxLane::Ced(CedGenerator::new(duration_ms)),
        }
    }

    /// Produces the next PCM sample. Returns [`MuxTxEvent::StepComplete`]
    /// the instant the active handler drains; the multiplexer then
    /// switches to any queued handler (after its pre-pause) or idles on
    /// silence, per spec.md §4.4's "rule for tx".
    pub fn next_sample(&mut self) -> (i16, Option<MuxTxEvent>) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.silence_samples_left > 0 {
                pending.silence_samples_left -= 1;
                return (0, None);
            }
            let next = self.pending.take().unwrap().next;
            self.tx = Self::build_handler(next);
            for bit in self.queued_bits.drain(..) {
                Self::push_bit_to(&mut self.tx, bit);
            }
        }

        let (sample, step_complete) = match &mut self.tx {
            TxLane::Silence => (0, false),
            TxLane::V21(h) => {
                let (s, ev) = h.next_sample();
                (s.unwrap_or(0), ev.is_some())
            }
            TxLane::HighSpeed(h) => {
                let (s, ev) = h.next_sample();
                (s.unwrap_or(0), ev.is_some())
            }
            TxLane::Cng(g) => (g.next_sample(), false),
            TxLane::Ced(g) => match g.next_sample() {
                Some(s) => (s, false),
                None => (0, true),
            },
        };

        if step_complete {
            if self.pending.is_none() {
                self.tx = TxLane::Silence;
            }
            (sample, Some(MuxTxEvent::StepComplete))
        } else {
            (sample, None)
        }
    }
}

impl Default for ModemMux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_switch_emits_pre_pause_silence_before_the_new_handler() {
        let mut mux = ModemMux::new();
        mux.queue_switch(NextTxHandler::V21);
        let pre_pause_samples = ms_to_samples(DEFAULT_PRE_PAUSE_MS) as usize;
        for _ in 0..pre_pause_samples {
            let (s, ev) = mux.next_sample();
            assert_eq!(s, 0);
            assert!(ev.is_none());
        }
        // An idle V21Tx (no bits queued) shuts down on its very first
        // clock tick, so the handler switch shows up immediately.
        let (_, ev) = mux.next_sample();
        assert_eq!(ev, Some(MuxTxEvent::StepComplete));
    }

    #[test]
    fn bits_pushed_during_the_pre_pause_reach_the_handler_once_it_activates() {
        let mut mux = ModemMux::new();
        mux.queue_switch(NextTxHandler::V21);
        // A caller that queues a switch and starts feeding bits in the
        // same breath, before any `next_sample()` has run the pre-pause
        // down, must not lose them into the still-active `Silence` lane.
        for i in 0..16 {
            mux.push_bit(i % 2 == 0);
        }
        assert!(mux.tx_is_idle(), "Silence lane reports idle regardless of pushed bits");

        let pre_pause_samples = ms_to_samples(DEFAULT_PRE_PAUSE_MS) as usize;
        for _ in 0..pre_pause_samples {
            mux.next_sample();
        }
        assert!(!mux.tx_is_idle(), "pushed bits should have carried over into the activated V21 handler");
    }

    #[test]
    fn rx_race_resolves_to_v21_when_only_v21_is_actually_on_air() {
        let mut mux = ModemMux::new();
        mux.start_rx_race(HighSpeedChoice::V29(v29::Rate::Bps9600));
        assert!(mux.is_racing());

        let mut tx = V21Tx::new();
        for i in 0..200 {
            tx.push_bit(i % 2 == 0);
        }

        let mut resolved = false;
        for _ in 0..2000 {
            let (s, _) = tx.next_sample();
            let Some(s) = s else { break };
            let out = mux.receive_sample(s);
            if matches!(out.event, Some(RxEvent::TrainingSucceeded)) {
                resolved = true;
                break;
            }
        }
        assert!(resolved, "mux never resolved the rx race");
        assert!(!mux.is_racing(), "mux should have dropped the losing lane");
    }
}
