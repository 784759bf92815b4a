//! This file implements custom timing functions and constants used by the
//! drive.
//!
//! In some cases we reimplement embassy-time functions, primarily to make it
//! clear what they are doing under the covers.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, Instant};

/// Functiom to block until a specific instant.  This is similar to the
/// embassy-time::Delay::block_for function.
///
/// We always inline it to reduce function call/return overhead, as this is
/// typically used in timing critical functions
#[inline(always)]
#[allow(clippy::inline_always)]
pub fn block_until(expires: Instant) {
    while Instant::now() < expires {}
}

/// Function to block for a specific Duration.  This is similar to the
/// embassy-time::Delay::block_for function.
///
/// We always inline it to reduce function call/return overhead, as this is
/// typically used in timing critical functions
#[inline(always)]
#[allow(clippy::inline_always)]
pub fn block_for(duration: Duration) {
    block_until(Instant::now() + duration);
}

/// Shorthand for a Duration a number of microseconds long.  Used throughout
/// the protocol code, as the bus timings are all specified in us.
pub const fn us(us: u64) -> Duration {
    Duration::from_micros(us)
}

pub mod iec {
    //! IEC protocol timers

    use embassy_time::Duration;

    /// Time to wait for CLK to be released at the beginning of a byte
    /// receive, before reading a byte.
    pub const READ_CLK_START_TIMEOUT: Duration = Duration::from_secs(1);

    /// Time to wait for all other listeners to release DATA once we've
    /// signalled ready for data.
    pub const LISTENER_READY_TIMEOUT: Duration = Duration::from_secs(1);

    /// Time to wait for the talker to pull CLK, per bit.
    pub const BIT_TIMEOUT: Duration = Duration::from_millis(2);

    /// Time to wait for the controller to release CLK once we've handed the
    /// bus back after talking.
    pub const UNDO_TURNAROUND_TIMEOUT: Duration = Duration::from_secs(1);

    /// A "forever" timeout.  We can't use Duration::MAX, as that's a u64, and
    /// causes the underlying embassy_time methods to panic.  So we set it to a
    /// year (ish).
    pub const FOREVER_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

    // A set of low-level IEC bus timings.  All are in us.

    /// Max ATN response required time
    pub const IEC_T_AT: u64 = 1000;

    /// Typical non-EOI response to RFD time
    pub const IEC_T_NE: u64 = 40;

    /// Min talker bit setup time (70 typical)
    pub const IEC_T_S: u64 = 20;

    /// Min data valid time (20 typical)
    pub const IEC_T_V: u64 = 20;

    /// Max frame handshake time (20 typical)
    pub const IEC_T_F: u64 = 1000;

    /// Min time between bytes
    pub const IEC_T_BB: u64 = 100;

    /// Min EOI response time (250 typical)
    pub const IEC_T_YE: u64 = 200;

    /// Min EOI response hold time
    pub const IEC_T_EI: u64 = 60;

    /// Max talker response limit (30 typical)
    pub const IEC_T_RY: u64 = 60;

    /// Min EOI acknowledge time
    pub const IEC_T_FR: u64 = 60;

    // Receive-side detection windows, in us.

    /// If the talker doesn't pull CLK within this time of us releasing DATA,
    /// it is signalling EOI.
    pub const EOI_TIMEOUT: u64 = 200;

    /// Having acknowledged an EOI, if the talker still doesn't pull CLK
    /// within this time it has nothing to send.
    pub const EMPTY_STREAM_TIMEOUT: u64 = 512;

    /// Under ATN, a talker holding CLK for longer than this before the last
    /// bit is probing for a JiffyDOS capable device.
    pub const JIFFY_DETECT: u64 = 218;

    /// How long we hold DATA to acknowledge a JiffyDOS probe.
    pub const JIFFY_ACK: u64 = 101;

    // JiffyDOS bit pair timings, in us, measured from the talker/listener
    // releasing the line that starts the byte.

    /// Receive sample points, one per bit pair.
    pub const JIFFY_RX_SLOTS: [u64; 4] = [18, 31, 42, 55];

    /// Receive EOI sample point.
    pub const JIFFY_RX_EOI: u64 = 67;

    /// Receive acknowledge point.
    pub const JIFFY_RX_ACK: u64 = 73;

    /// Send presentation points, one per bit pair.
    pub const JIFFY_TX_SLOTS: [u64; 4] = [10, 20, 31, 41];

    /// Send EOI presentation point.
    pub const JIFFY_TX_EOI: u64 = 52;
}
