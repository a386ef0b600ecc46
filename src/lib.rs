//! # faxline
//!
//! A Rust implementation of the T.30 fax session state machine, its modem
//! set (V.21, V.27ter, V.29, V.17), HDLC framing with ECM, and a T.38
//! real-time fax-over-IP gateway/terminal pair.
//!
//! ## Crate layout
//!
//! - [`t30`] — the session state machine ([`t30::Session`]), frame codec,
//!   and facsimile control field definitions that drive a call over 8 kHz
//!   PCM.
//! - [`modems`] — the V.21/V.27ter/V.29/V.17 modem set and the shared
//!   training-state machine they all drive.
//! - [`mux`] — arbitrates which modem currently owns the PCM sample
//!   stream in each direction.
//! - [`hdlc`] / [`bitstream`] — bit-level HDLC framing, zero-stuffing, and
//!   CRC-16/X.25 validation.
//! - [`async_framer`] — start/stop-bit byte framing for async auxiliary
//!   channels.
//! - [`image`] — the page-source/page-sink boundary a caller implements
//!   to feed or receive T.4-coded image data.
//! - [`t38`] (feature `t38`, enabled by default) — the IFP packet core, a
//!   PCM-to-packet gateway, and a PCM-free T.38 terminal.
//! - [`callbacks`] — the [`callbacks::PhaseEventSink`] trait a caller
//!   implements to observe phase transitions, page results, and frames.
//! - [`error`] — the [`error::SessionError`], [`error::ConfigError`], and
//!   [`error::ImageError`] types returned across the crate.
//! - [`stats`] — per-session counters surfaced once a call completes.
//!
//! ## Status
//!
//! The T.38 gap and duplicate handling, ECM partial-page retransmission,
//! and the modem training-state machines implement the subset of T.30/T.38
//! that a softswitch-side endpoint needs; real symbol-level demodulation
//! (equalization, timing recovery) is explicitly out of scope (see
//! [`modems`] and [`dsp`]).

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod async_framer;
pub mod bitstream;
pub mod callbacks;
pub mod consts;
pub(crate) mod crc;
pub mod dsp;
pub mod error;
pub mod hdlc;
pub mod image;
pub mod modems;
pub mod mux;
pub mod stats;
pub(crate) mod tables;
pub mod tone;
pub mod t30;

#[cfg(feature = "t38")]
pub mod t38;

pub use t30::{Session, SessionConfig};
