//! Error taxonomy shared across the bridge (spec §7).

use std::io;

use thiserror::Error;

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The four error kinds the dispatcher distinguishes.
///
/// RSP-level and probe-level errors never terminate the session; they
/// become an `E01` reply. [`Error::Fatal`] propagates to the main loop,
/// which resumes the target, closes the probe, and exits.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed RSP packet or unrecognized verb.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The probe refused or timed out on an operation.
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),
    /// Bridge state required for the operation is unavailable (e.g. an
    /// invalid cached program counter).
    #[error("state error: {0}")]
    State(String),
    /// The debugger socket or probe transport was lost.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether this error should be reported to the debugger as `E01`
    /// (versus terminating the session).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Fatal(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Fatal(err.to_string())
    }
}

impl From<avrbridge_hex::Error> for Error {
    fn from(err: avrbridge_hex::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Errors reported by the probe transport (spec §4.2).
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe was asked for a halted-only operation while the target was
    /// running. Read-PC retries once after issuing `stop`; other operations
    /// propagate immediately.
    #[error("target is in the wrong mode for this operation")]
    WrongMode,
    /// The probe did not respond in time.
    #[error("probe timed out")]
    Timeout,
    /// The probe reported a hardware-level failure.
    #[error("device error: {0}")]
    Device(String),
    /// The probe's response could not be parsed.
    #[error("malformed probe response: {0}")]
    Protocol(String),
    /// Transport-level I/O failure (closed port, USB disconnect, ...).
    #[error("transport error: {0}")]
    Transport(String),
}
