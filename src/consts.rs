//! Protocol-wide constants for HDLC framing, T.30 timers, and tone
//! generation.
//!
//! These values are pulled directly from the relevant ITU-T
//! Recommendations (T.30, T.4, V.21/27ter/29/17) and from
//! `original_source/src/spandsp/t30.h`, where the distilled spec leaves a
//! numeric detail ("35 ± 5 s") to be turned into concrete constants.

/// PCM sample rate used throughout the stack.
pub const SAMPLE_RATE: u32 = 8_000;

/// Samples in one "standard" 20 ms processing block.
pub const BLOCK_SAMPLES: usize = 160;

/// Maximum HDLC frame size in bytes, including address/control/FCF/FIF/FCS.
pub const MAX_HDLC_FRAME: usize = 260;

/// Minimum HDLC frame size in bytes (address + control + FCF, no FIF).
pub const MIN_HDLC_FRAME: usize = 3;

/// Consecutive good flags required before the HDLC receiver announces
/// framing-OK.
pub const FLAGS_FOR_FRAMING_OK: u8 = 5;

/// Default leading flag octets before the first frame of a burst.
pub const DEFAULT_LEADING_FLAGS: u16 = 2;

/// Minimum flag octets guaranteed between high-speed HDLC frames (a
/// minimum-transmit-time guarantee, not a hard link requirement).
pub const MIN_INTERFRAME_FLAGS: u16 = 240;

/// ECM partial page: maximum frames per block.
pub const ECM_MAX_FRAMES: usize = 256;

/// ECM frame payload size at <= 4800 bps.
pub const ECM_FRAME_LEN_LOW: usize = 64;

/// ECM frame payload size at >= 7200 bps.
pub const ECM_FRAME_LEN_HIGH: usize = 256;

/// Maximum bytes held per ECM slot (frame header + payload + FCS headroom).
pub const ECM_SLOT_CAP: usize = 260;

/// Identity-type string fields (ident, sub-address, TSI, CSI, ...) are
/// capped at this many printable characters.
pub const MAX_IDENT_LEN: usize = 20;

/// Non-standard-frame (NSF/NSC/NSS) payload cap.
pub const MAX_NONSTANDARD_LEN: usize = 100;

/// Timer durations, expressed as nominal/tolerance pairs in milliseconds,
/// straight out of T.30 Table 2 and spec.md §3.
pub mod timers {
    /// T0: call answer timer.
    pub const T0_MS: u32 = 35_000;
    pub const T0_TOL_MS: u32 = 5_000;
    /// T1: identification timer, bounds all of phase A.
    pub const T1_MS: u32 = 35_000;
    pub const T1_TOL_MS: u32 = 5_000;
    /// T2: waiting for the next command after answering one.
    pub const T2_MS: u32 = 6_000;
    pub const T2_TOL_MS: u32 = 1_000;
    /// T3: operator interrupt timer.
    pub const T3_MS: u32 = 10_000;
    pub const T3_TOL_MS: u32 = 5_000;
    /// T4: waiting for a response to a command just sent.
    pub const T4_MS: u32 = 3_000;
    pub const T4_TOL_MS: u32 = 150;
    /// T5: ECM receiver-ready timer.
    pub const T5_MS: u32 = 60_000;
    pub const T5_TOL_MS: u32 = 5_000;
}

/// CNG (calling tone): 1100 Hz +/- 38 Hz, -11 dBm0, 0.5 s on, 3.0 s off.
pub mod cng {
    pub const FREQ_HZ: f32 = 1100.0;
    pub const FREQ_TOL_HZ: f32 = 38.0;
    pub const LEVEL_DBM0: f32 = -11.0;
    pub const ON_MS: u32 = 500;
    pub const OFF_MS: u32 = 3_000;
}

/// CED (called tone): 2100 Hz +/- 15 Hz, -11 dBm0, 2.6-4.0 s, bracketed by
/// silence.
pub mod ced {
    pub const FREQ_HZ: f32 = 2100.0;
    pub const FREQ_TOL_HZ: f32 = 15.0;
    pub const LEVEL_DBM0: f32 = -11.0;
    pub const MIN_ON_MS: u32 = 2_600;
    pub const MAX_ON_MS: u32 = 4_000;
    pub const PRE_SILENCE_MS: u32 = 200;
    pub const POST_SILENCE_MS: u32 = 75;
}

/// Fraction (by count) of 1-bits tolerated in a received TCF burst before
/// it is judged too noisy and an FTT is returned. Tuned empirically in the
/// original source; flagged there (and here) as worth checking against the
/// ITU conformance suite rather than re-derived from first principles.
pub const TCF_ONES_THRESHOLD_PCT: f32 = 10.0;

/// Duration of a TCF training check burst.
pub const TCF_DURATION_MS: u32 = 1_500;

/// Consecutive unsuccessful PPR rounds before CTC (speed step-down) is
/// attempted.
pub const MAX_PPR_ROUNDS: u8 = 4;

/// Consecutive command retransmissions on a T4 timeout before escalating.
pub const MAX_COMMAND_RETRIES: u8 = 3;
