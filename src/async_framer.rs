//! Asynchronous (start/stop-bit) byte framer, per spec.md §4.5.
//!
//! Used to carry ADSI/async-auxiliary channels over the same 8 kHz sample
//! clock as everything else. Supports 5-8 data bits, none/odd/even parity,
//! and 1-2 stop bits, plus the V.14-style rate-adaption reading of the
//! nominal "second stop bit" as the next frame's start bit when the link
//! is running faster than the async side.

/// Parity mode for an async byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Wire format for one async byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// V.14-style rate adaption: treat a stop-bit position that arrives
    /// early as the next start bit instead of an error.
    pub rate_adapt: bool,
}

impl Default for AsyncFormat {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            rate_adapt: false,
        }
    }
}

impl AsyncFormat {
    fn parity_bit(&self, value: u8) -> Option<bool> {
        let ones = (0..self.data_bits).filter(|&i| (value >> i) & 1 == 1).count();
        match self.parity {
            Parity::None => None,
            Parity::Odd => Some(ones % 2 == 0),
            Parity::Even => Some(ones % 2 == 1),
        }
    }
}

/// Serializes bytes into a start/data/parity/stop bit stream.
#[derive(Debug)]
pub struct AsyncTransmitter {
    format: AsyncFormat,
    pending: std::collections::VecDeque<bool>,
}

impl AsyncTransmitter {
    pub fn new(format: AsyncFormat) -> Self {
        Self {
            format,
            pending: std::collections::VecDeque::new(),
        }
    }

    /// Queues one byte (only the low `data_bits` are used).
    pub fn push_byte(&mut self, value: u8) {
        self.pending.push_back(false); // start bit
        for i in 0..self.format.data_bits {
            self.pending.push_back((value >> i) & 1 == 1);
        }
        if let Some(p) = self.format.parity_bit(value) {
            self.pending.push_back(p);
        }
        for _ in 0..self.format.stop_bits {
            self.pending.push_back(true);
        }
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        self.pending.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Start,
    Data(u8),
    Parity,
    Stop(u8),
}

/// One outcome of feeding bits into an [`AsyncReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncRxEvent {
    Byte(u8),
    ParityError(u8),
    FramingError,
}

/// Deserializes a start/data/parity/stop bit stream back into bytes.
#[derive(Debug)]
pub struct AsyncReceiver {
    format: AsyncFormat,
    state: RxState,
    shift: u8,
    bit_index: u8,
}

impl AsyncReceiver {
    pub fn new(format: AsyncFormat) -> Self {
        Self {
            format,
            state: RxState::Idle,
            shift: 0,
            bit_index: 0,
        }
    }

    pub fn receive_bit(&mut self, bit: bool) -> Option<AsyncRxEvent> {
        match self.state {
            RxState::Idle => {
                if !bit {
                    self.state = RxState::Data(0);
                    self.shift = 0;
                    self.bit_index = 0;
                }
                None
            }
            RxState::Start => None, // unused; Idle transitions straight into Data
            RxState::Data(_) => {
                if bit {
                    self.shift |= 1 << self.bit_index;
                }
                self.bit_index += 1;
                if self.bit_index == self.format.data_bits {
                    if self.format.parity == Parity::None {
                        self.state = RxState::Stop(0);
                    } else {
                        self.state = RxState::Parity;
                    }
                }
                None
            }
            RxState::Parity => {
                let expect = self.format.parity_bit(self.shift).unwrap_or(false);
                self.state = RxState::Stop(0);
                if bit != expect {
                    // Still consume the stop bits to resync, but tag the byte bad.
                    return self.finish_stop_run(Some(AsyncRxEvent::ParityError(self.shift)));
                }
                None
            }
            RxState::Stop(seen) => self.finish_stop_run_bit(seen, bit),
        }
    }

    fn finish_stop_run_bit(&mut self, seen: u8, bit: bool) -> Option<AsyncRxEvent> {
        if !bit {
            if self.format.rate_adapt && seen > 0 {
                // Early start bit of the next byte: deliver what we have
                // and immediately begin the next frame.
                let byte = self.shift;
                self.state = RxState::Data(0);
                self.shift = 0;
                self.bit_index = 0;
                return Some(AsyncRxEvent::Byte(byte));
            }
            self.state = RxState::Idle;
            return Some(AsyncRxEvent::FramingError);
        }
        let seen = seen + 1;
        if seen >= self.format.stop_bits {
            let byte = self.shift;
            self.state = RxState::Idle;
            Some(AsyncRxEvent::Byte(byte))
        } else {
            self.state = RxState::Stop(seen);
            None
        }
    }

    fn finish_stop_run(&mut self, pending: Option<AsyncRxEvent>) -> Option<AsyncRxEvent> {
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_8n1() {
        let format = AsyncFormat::default();
        let mut tx = AsyncTransmitter::new(format);
        for b in [0x00u8, 0xffu8, 0x55u8, 0xa5u8] {
            tx.push_byte(b);
        }
        let mut rx = AsyncReceiver::new(format);
        let mut out = Vec::new();
        while let Some(bit) = tx.next_bit() {
            if let Some(AsyncRxEvent::Byte(b)) = rx.receive_bit(bit) {
                out.push(b);
            }
        }
        assert_eq!(out, vec![0x00, 0xff, 0x55, 0xa5]);
    }

    #[test]
    fn even_parity_round_trips_clean_stream() {
        let format = AsyncFormat {
            data_bits: 7,
            parity: Parity::Even,
            stop_bits: 1,
            rate_adapt: false,
        };
        let mut tx = AsyncTransmitter::new(format);
        tx.push_byte(0x41);
        let mut rx = AsyncReceiver::new(format);
        let mut out = Vec::new();
        while let Some(bit) = tx.next_bit() {
            if let Some(e) = rx.receive_bit(bit) {
                out.push(e);
            }
        }
        assert_eq!(out, vec![AsyncRxEvent::Byte(0x41)]);
    }

    #[test]
    fn two_stop_bits_round_trip() {
        let format = AsyncFormat {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 2,
            rate_adapt: false,
        };
        let mut tx = AsyncTransmitter::new(format);
        tx.push_byte(0x3c);
        tx.push_byte(0x99);
        let mut rx = AsyncReceiver::new(format);
        let mut out = Vec::new();
        while let Some(bit) = tx.next_bit() {
            if let Some(AsyncRxEvent::Byte(b)) = rx.receive_bit(bit) {
                out.push(b);
            }
        }
        assert_eq!(out, vec![0x3c, 0x99]);
    }
}
