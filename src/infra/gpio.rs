//! The IEC bus lines on the Pico's GPIOs.
//!
//! The pico1541 board drives the bus through open collector inverters, so
//! driving an output pin high asserts (pulls low) the bus line.  Inputs read
//! the bus directly, so a low input is an asserted line.
//!
//! Waits shorter than [`SPIN_LIMIT`] spin, as the protocol's handshakes are
//! a few tens of us apart and an executor round trip is too slow.  Longer
//! waits on an input are edge triggered.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::{PIN_11, PIN_13, PIN_14, PIN_17, PIN_18, PIN_19, PIN_20};
use embassy_time::{Duration, Instant, Timer, with_timeout};

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::{BusError, Line, LineDriver, LineState};
use crate::util::time::block_for;

/// Waits up to this long are spun.
pub const SPIN_LIMIT: Duration = Duration::from_millis(1);

/// The GPIO pins the bus is connected to, as on the pico1541 v0.1 board.
/// The board also has ATN, RESET and SRQ outputs and an SRQ input, which a
/// peripheral doesn't use.
pub struct IecPins {
    pub clock_in: PIN_19,
    pub clock_out: PIN_11,
    pub data_in: PIN_20,
    pub data_out: PIN_13,
    pub atn_in: PIN_17,
    pub reset_in: PIN_18,
    pub srq_out: PIN_14,
}

pub struct GpioLines {
    clock_in: Input<'static>,
    data_in: Input<'static>,
    atn_in: Input<'static>,
    reset_in: Input<'static>,
    clock_out: Output<'static>,
    data_out: Output<'static>,
    srq_out: Output<'static>,
}

impl GpioLines {
    /// Set up the pins, with every output released.
    pub fn new(pins: IecPins) -> Self {
        let lines = Self {
            clock_in: Input::new(pins.clock_in, Pull::Up),
            data_in: Input::new(pins.data_in, Pull::Up),
            atn_in: Input::new(pins.atn_in, Pull::Up),
            reset_in: Input::new(pins.reset_in, Pull::Up),
            clock_out: Output::new(pins.clock_out, Level::Low),
            data_out: Output::new(pins.data_out, Level::Low),
            srq_out: Output::new(pins.srq_out, Level::Low),
        };
        debug!("IEC lines configured");
        lines
    }

    fn output(&mut self, line: Line) -> Option<&mut Output<'static>> {
        match line {
            Line::ClockOut => Some(&mut self.clock_out),
            Line::DataOut => Some(&mut self.data_out),
            Line::Srq => Some(&mut self.srq_out),
            _ => None,
        }
    }

    fn input(&mut self, line: Line) -> Option<&mut Input<'static>> {
        match line {
            Line::ClockIn => Some(&mut self.clock_in),
            Line::DataIn => Some(&mut self.data_in),
            Line::Atn => Some(&mut self.atn_in),
            Line::Reset => Some(&mut self.reset_in),
            _ => None,
        }
    }

    fn spin_until(&self, line: Line, state: LineState, until: Instant) -> Result<(), BusError> {
        loop {
            if self.status_of(line) == state {
                return Ok(());
            }
            if Instant::now() >= until {
                return Err(BusError::Timeout);
            }
        }
    }
}

impl LineDriver for GpioLines {
    fn assert(&mut self, line: Line) {
        match self.output(line) {
            Some(pin) => pin.set_high(),
            None => warn!("Can't drive {:?}", line),
        }
    }

    fn release(&mut self, line: Line) {
        match self.output(line) {
            Some(pin) => pin.set_low(),
            None => warn!("Can't drive {:?}", line),
        }
    }

    fn status_of(&self, line: Line) -> LineState {
        let asserted = match line {
            Line::ClockIn => self.clock_in.is_low(),
            Line::DataIn => self.data_in.is_low(),
            Line::Atn => self.atn_in.is_low(),
            Line::Reset => self.reset_in.is_low(),
            Line::ClockOut => self.clock_out.is_set_high(),
            Line::DataOut => self.data_out.is_set_high(),
            Line::Srq => self.srq_out.is_set_high(),
        };
        LineState::from_asserted(asserted)
    }

    async fn wait_for(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), BusError> {
        if timeout <= SPIN_LIMIT {
            return self.spin_until(line, state, Instant::now() + timeout);
        }

        let Some(pin) = self.input(line) else {
            return self.spin_until(line, state, Instant::now() + timeout);
        };
        let edge = async {
            match state {
                LineState::Asserted => pin.wait_for_low().await,
                LineState::Released => pin.wait_for_high().await,
            }
        };
        with_timeout(timeout, edge)
            .await
            .map_err(|_| BusError::Timeout)
    }

    async fn delay(&mut self, duration: Duration) {
        if duration <= SPIN_LIMIT {
            block_for(duration);
        } else {
            Timer::after(duration).await;
        }
    }

    // Level triggered, so ATN falling between waits isn't missed.
    async fn attention_edge(&mut self) {
        self.atn_in.wait_for_low().await;
    }
}
