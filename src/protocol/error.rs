//! Errors returned by line waits and byte transfers.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;

/// The outcome of a failed line wait or byte handshake.  None of these are
/// retried by the caller - they are mapped onto a bus state by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// A line failed to reach the expected state in time.
    Timeout,

    /// The talker signalled EOI and then had nothing to send.
    EmptyStream,

    /// ATN and RESET are both asserted - the controller has gone away.
    Disconnected,

    /// The controller asserted ATN while we were talking.
    Attention,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Timeout => write!(f, "timed out waiting for line"),
            BusError::EmptyStream => write!(f, "empty stream"),
            BusError::Disconnected => write!(f, "bus disconnected"),
            BusError::Attention => write!(f, "interrupted by ATN"),
        }
    }
}
