//! Runtime configuration for the bus engine.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;

use crate::util::time::iec::{FOREVER_TIMEOUT, IEC_T_AT, IEC_T_V, READ_CLK_START_TIMEOUT};
use crate::util::time::us;

/// Timeouts used by the bus engine.
///
/// The defaults match the real protocol.  Waiting forever for the controller
/// to release ATN is legitimate - the controller may hold ATN for as long as
/// it likes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// How long to wait for the controller to release ATN before turning the
    /// bus around.
    pub atn_release_timeout: Duration,

    /// How long to wait for the controller to release CLK (become a
    /// listener) during turnaround.
    pub turnaround_clock_timeout: Duration,

    /// The settle delay inserted between turnaround steps.
    pub turnaround_settle: Duration,

    /// After an OPEN, how long the controller has to release ATN before we
    /// decide no filename follows.
    pub payload_atn_window: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            atn_release_timeout: FOREVER_TIMEOUT,
            turnaround_clock_timeout: READ_CLK_START_TIMEOUT,
            turnaround_settle: us(IEC_T_V),
            payload_atn_window: us(IEC_T_AT),
        }
    }
}
