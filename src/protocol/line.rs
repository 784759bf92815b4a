//! The IEC bus line model.
//!
//! The bus is open collector: a line is asserted (pulled low) if any
//! participant asserts it, and only released once every participant has
//! released it.  The protocol code never deals in voltages - it asks whether
//! a line is asserted, and asks the driver backend to assert or release the
//! lines we drive.
//!
//! CLK and DATA are modelled as separate in and out lines, as on the pico1541
//! board.  Sensing CLK-in or DATA-in shows the wired-AND of every
//! participant, including ourselves.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;

use crate::protocol::BusError;

// Line bit masks, used where a set of lines needs recording.
pub const IO_ATN: u8 = 0x01;
pub const IO_CLK_IN: u8 = 0x02;
pub const IO_CLK_OUT: u8 = 0x04;
pub const IO_DATA_IN: u8 = 0x08;
pub const IO_DATA_OUT: u8 = 0x10;
pub const IO_SRQ: u8 = 0x20;
pub const IO_RESET: u8 = 0x40;

/// The lines of the IEC bus, as seen by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    /// Attention - the controller asserts this to send commands.
    Atn,

    /// Clock, as sensed on the bus.
    ClockIn,

    /// Clock, as driven by us.
    ClockOut,

    /// Data, as sensed on the bus.
    DataIn,

    /// Data, as driven by us.
    DataOut,

    /// Service request.  Used to indicate we're busy, and by JiffyDOS.
    Srq,

    /// Reset.  Not every backend can sense this.
    Reset,
}

impl Line {
    /// The bit mask representing this line.
    pub const fn mask(self) -> u8 {
        match self {
            Line::Atn => IO_ATN,
            Line::ClockIn => IO_CLK_IN,
            Line::ClockOut => IO_CLK_OUT,
            Line::DataIn => IO_DATA_IN,
            Line::DataOut => IO_DATA_OUT,
            Line::Srq => IO_SRQ,
            Line::Reset => IO_RESET,
        }
    }
}

/// The logical state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineState {
    /// Pulled low, by at least one participant.
    Asserted,

    /// Released by all participants (high).
    Released,
}

impl LineState {
    pub fn from_asserted(asserted: bool) -> Self {
        if asserted {
            LineState::Asserted
        } else {
            LineState::Released
        }
    }
}

/// The capability set a line driver backend provides.  This is implemented
/// against the Pico's GPIOs for the firmware, and against a simulated clock
/// for testing.
///
/// [`LineDriver::wait_for`] and [`LineDriver::delay`] are the only places
/// time passes.
#[allow(async_fn_in_trait)]
pub trait LineDriver {
    /// Assert (pull low) a line we drive.  Idempotent.
    fn assert(&mut self, line: Line);

    /// Release a line we drive.  Idempotent.
    fn release(&mut self, line: Line);

    /// Sense a line.
    fn status_of(&self, line: Line) -> LineState;

    /// Wait until the line reaches `state`, or `timeout` elapses.
    ///
    /// # Returns
    /// - `Ok(())` - the line reached the requested state
    /// - `Err(BusError::Timeout)` - it didn't, within timeout
    async fn wait_for(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), BusError>;

    /// Pause for the specified time.
    async fn delay(&mut self, duration: Duration);

    /// Completes on the next ATN falling edge.  Backends that can't detect
    /// edges never complete, leaving the ATN flag as the only trigger.
    async fn attention_edge(&mut self) {
        core::future::pending::<()>().await;
    }

    /// Whether this backend can sense the RESET line.
    fn has_reset(&self) -> bool {
        true
    }

    /// Convenience to check whether a line is asserted.
    #[inline]
    fn is_asserted(&self, line: Line) -> bool {
        self.status_of(line) == LineState::Asserted
    }

    /// Drive a line to a particular state.
    #[inline]
    fn drive(&mut self, line: Line, state: LineState) {
        match state {
            LineState::Asserted => self.assert(line),
            LineState::Released => self.release(line),
        }
    }
}
