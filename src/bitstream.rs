//! Zero-insertion / zero-deletion bit stuffing shared by the HDLC framer.
//!
//! Transmit: after five consecutive `1` data bits, a `0` is inserted
//! regardless of what the next data bit actually is. Receive: the same
//! rule run in reverse lets the six-consecutive-`1`s of a flag
//! (`01111110`) and the seven-or-more of an abort (`0111111 1...`) be told
//! apart from stuffed data, without any lookahead.

/// Incrementally bit-stuffs an outgoing data stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stuffer {
    ones_run: u8,
}

impl Stuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one data bit and returns the bit(s) that must actually go on
    /// the wire: almost always just the bit itself, occasionally the bit
    /// followed by an inserted `0`.
    pub fn feed(&mut self, bit: bool) -> StufferOut {
        if bit {
            self.ones_run += 1;
            if self.ones_run == 5 {
                self.ones_run = 0;
                return StufferOut::BitThenStuffedZero;
            }
        } else {
            self.ones_run = 0;
        }
        StufferOut::Bit
    }

    pub fn reset(&mut self) {
        self.ones_run = 0;
    }
}

/// What a [`Stuffer::feed`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StufferOut {
    /// Emit the fed bit verbatim.
    Bit,
    /// Emit the fed bit, then an extra stuffed `0`.
    BitThenStuffedZero,
}

/// Incrementally removes bit stuffing from an incoming raw bit stream and
/// recognizes flag/abort patterns inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Destuffer {
    ones_run: u8,
}

/// Result of feeding one raw bit to a [`Destuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestuffEvent {
    /// A genuine data bit, after stuffing removal.
    Data(bool),
    /// The flag octet `01111110` was recognized.
    Flag,
    /// An abort (`0111111 1`, seven or more consecutive ones) was seen.
    Abort,
    /// The bit was a stuffing artifact and carries no data.
    Consumed,
}

impl Destuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bit: bool) -> DestuffEvent {
        if bit {
            self.ones_run += 1;
            if self.ones_run >= 7 {
                // Stay latched on Abort for any further 1s until a 0 resyncs us.
                return DestuffEvent::Abort;
            }
            if self.ones_run == 6 {
                // Could be the flag's sixth one; wait for the terminating bit.
                return DestuffEvent::Consumed;
            }
            DestuffEvent::Data(true)
        } else {
            let run = self.ones_run;
            self.ones_run = 0;
            match run {
                5 => DestuffEvent::Consumed, // the stuffed zero
                6 => DestuffEvent::Flag,
                _ => DestuffEvent::Data(false),
            }
        }
    }

    pub fn reset(&mut self) {
        self.ones_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_from_bytes(bytes: &[u8]) -> Vec<bool> {
        let mut out = Vec::new();
        for &b in bytes {
            for i in 0..8 {
                out.push((b >> i) & 1 == 1);
            }
        }
        out
    }

    fn stuff_bits(data: &[bool]) -> Vec<bool> {
        let mut s = Stuffer::new();
        let mut out = Vec::new();
        for &bit in data {
            match s.feed(bit) {
                StufferOut::Bit => out.push(bit),
                StufferOut::BitThenStuffedZero => {
                    out.push(bit);
                    out.push(false);
                }
            }
        }
        out
    }

    fn destuff_bits(wire: &[bool]) -> (Vec<bool>, bool, bool) {
        let mut d = Destuffer::new();
        let mut out = Vec::new();
        let mut saw_flag = false;
        let mut saw_abort = false;
        for &bit in wire {
            match d.feed(bit) {
                DestuffEvent::Data(b) => out.push(b),
                DestuffEvent::Flag => saw_flag = true,
                DestuffEvent::Abort => saw_abort = true,
                DestuffEvent::Consumed => {}
            }
        }
        (out, saw_flag, saw_abort)
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data = bits_from_bytes(&[0xff, 0x00, 0xfa, 0x3e, 0x81]);
        let wire = stuff_bits(&data);
        let (back, flag, abort) = destuff_bits(&wire);
        assert!(!flag);
        assert!(!abort);
        assert_eq!(back, data);
    }

    #[test]
    fn flag_pattern_is_not_present_in_stuffed_data() {
        // All-ones input forces stuffing every 5 bits; the wire stream must
        // never contain six consecutive 1s (which would be ambiguous with a flag).
        let data = vec![true; 64];
        let wire = stuff_bits(&data);
        let mut run = 0;
        for b in wire {
            if b {
                run += 1;
                assert!(run < 6, "stuffed stream must never hit a run of six 1s");
            } else {
                run = 0;
            }
        }
    }

    #[test]
    fn detects_flag_after_stuffed_data() {
        let data = bits_from_bytes(&[0xff, 0x03]);
        let mut wire = stuff_bits(&data);
        // 01111110
        wire.extend_from_slice(&[false, true, true, true, true, true, true, false]);
        let (recovered, flag, abort) = destuff_bits(&wire);
        assert_eq!(recovered, data);
        assert!(flag);
        assert!(!abort);
    }

    #[test]
    fn detects_abort() {
        let mut d = Destuffer::new();
        let bits = [true, true, true, true, true, true, true];
        let mut saw_abort = false;
        for b in bits {
            if matches!(d.feed(b), DestuffEvent::Abort) {
                saw_abort = true;
            }
        }
        assert!(saw_abort);
    }
}
