//! Phase-event callbacks exposed to the application (spec.md §6,
//! SPEC_FULL.md §4.9). None of this is a Non-goal exclusion — these are
//! ambient observability hooks, implemented regardless of how sparse the
//! distilled spec's treatment of them was.

use crate::error::CompletionCode;

/// Outcome of phase B (pre-message negotiation), passed to
/// [`PhaseEventSink::phase_b`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseBResult {
    /// Negotiation succeeded; carries the negotiated bit rate.
    Negotiated { bps: u32 },
    Retrained { bps: u32 },
    Failed(CompletionCode),
}

/// Outcome of phase D (post-message handshake) for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDResult {
    Mcf,
    Rtp,
    Rtn,
    Ppr { bad_frame_count: u16 },
}

/// Direction of a real-time HDLC frame reported via
/// [`PhaseEventSink::real_time_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx,
    Rx,
}

/// Status of the page-source/page-sink document handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    PageStarted,
    PageCompleted,
    DocumentCompleted,
}

/// The five callbacks a host application may implement to observe a
/// running [`crate::Session`]. A session with no sink installed simply
/// does not call any of these; none of them are required for protocol
/// correctness.
pub trait PhaseEventSink {
    fn phase_b(&mut self, _result: PhaseBResult) {}
    fn phase_d(&mut self, _result: PhaseDResult) {}
    fn phase_e(&mut self, _completion_code: CompletionCode) {}
    fn document_handler(&mut self, _status: DocumentStatus) {}
    fn real_time_frame(&mut self, _direction: FrameDirection, _bytes: &[u8]) {}
}

/// A sink that logs every callback at `trace` and otherwise does
/// nothing; the default when a [`crate::Session`] is built with no
/// sink of its own.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl PhaseEventSink for LoggingSink {
    fn phase_b(&mut self, result: PhaseBResult) {
        log::trace!("phase B: {result:?}");
    }

    fn phase_d(&mut self, result: PhaseDResult) {
        log::trace!("phase D: {result:?}");
    }

    fn phase_e(&mut self, completion_code: CompletionCode) {
        if completion_code.is_ok() {
            log::info!("phase E: {completion_code:?}");
        } else {
            log::warn!("phase E: {completion_code:?}");
        }
    }

    fn document_handler(&mut self, status: DocumentStatus) {
        log::trace!("document handler: {status:?}");
    }

    fn real_time_frame(&mut self, direction: FrameDirection, bytes: &[u8]) {
        log::trace!("real-time frame {direction:?}: {} bytes", bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        phase_e_calls: Vec<CompletionCode>,
    }

    impl PhaseEventSink for Recorder {
        fn phase_e(&mut self, completion_code: CompletionCode) {
            self.phase_e_calls.push(completion_code);
        }
    }

    #[test]
    fn custom_sink_only_overrides_what_it_implements() {
        let mut r = Recorder { phase_e_calls: Vec::new() };
        r.phase_b(PhaseBResult::Negotiated { bps: 9600 });
        r.phase_e(CompletionCode::Ok);
        assert_eq!(r.phase_e_calls, vec![CompletionCode::Ok]);
    }
}
