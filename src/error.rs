//! Error taxonomy for `faxline`.
//!
//! No exception ever crosses the public API (spec.md §7): session-level
//! failures are reported as exactly one [`CompletionCode`] delivered
//! through the phase-E callback, never as a panic or a propagated `Err`.
//! [`SessionError`] and [`ConfigError`] are for the small set of calls that
//! *can* fail synchronously (malformed configuration, bad page source).

use thiserror::Error;

/// The ~50-member error taxonomy from spec.md §7, grouped as in the
/// original. Every session ends with exactly one of these, delivered via
/// the phase-E completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompletionCode {
    /// Session completed and the document transferred successfully.
    Ok,

    // --- Link errors ---
    CedTooLong,
    T0Expired,
    T1Expired,
    T3Expired,
    HdlcCarrierStuck,
    CannotTrain,
    OperatorInterruptFailed,
    Incompatible,
    RemoteCannotReceive,
    RemoteCannotTransmit,
    RemoteCannotMatchResolution,
    RemoteCannotMatchSize,
    UnexpectedMessage,

    // --- File errors ---
    CannotOpen,
    PageNotFound,
    UnsupportedFormat,
    MissingTags,
    NoMemory,

    // --- Transmitter phase-E errors ---
    BadResponseToDcs,
    DcnAfterPage,
    InvalidEcmResponseTx,
    T5Expired,
    DcnInsteadOfDis,
    InvalidResponseAfterPage,
    NonDisResponse,
    NoResponseToDcs,
    NoResponseAfterPage,

    // --- Receiver phase-E errors ---
    InvalidEcmResponseRx,
    DcsWhenDtcExpected,
    UnexpectedAfterPage,
    CarrierLost,
    NoEol,
    NoFirstLine,
    T2ExpiredForDcn,
    T2ExpiredForPhaseD,
    T2ExpiredForFax,
    T2ExpiredForMps,
    T2ExpiredForRr,
    T2ExpiredGeneric,
    DcnDuringHandshake,
    DcnDuringData,
    DcnDuringFax,
    DcnAfterEomOrMps,
    DcnAfterRrOrRnr,
    DcnAfterRtn,
}

impl CompletionCode {
    /// Whether this code represents a successful session outcome.
    pub fn is_ok(self) -> bool {
        matches!(self, CompletionCode::Ok)
    }
}

/// Errors `Session::new` / `SessionConfig` validation can raise
/// synchronously, before any sample has been processed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("identity string {field} exceeds {max} printable characters")]
    IdentTooLong { field: &'static str, max: usize },
    #[error("non-standard-frame payload exceeds {max} bytes")]
    NonStandardTooLong { max: usize },
    #[error("no modem is selected in the supported-modem mask")]
    EmptyModemMask,
}

/// Errors surfaced synchronously from the page source/sink boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("cannot open page store")]
    CannotOpen,
    #[error("requested page {0} does not exist")]
    PageNotFound(u32),
    #[error("page store format is not supported")]
    UnsupportedFormat,
    #[error("page store is missing required tags")]
    MissingTags,
}

impl From<ImageError> for CompletionCode {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::CannotOpen => CompletionCode::CannotOpen,
            ImageError::PageNotFound(_) => CompletionCode::PageNotFound,
            ImageError::UnsupportedFormat => CompletionCode::UnsupportedFormat,
            ImageError::MissingTags => CompletionCode::MissingTags,
        }
    }
}

/// Errors that can be raised synchronously from session-level API calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("image boundary error: {0}")]
    Image(#[from] ImageError),
}
