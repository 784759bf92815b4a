//! A simulated set of bus lines, with a virtual microsecond clock.
//!
//! The other participants on the bus (the "peer") are described by a list
//! of scheduled line changes.  Our own outputs are recorded in a trace, but
//! only when they actually change.  Sensing CLK-in or DATA-in gives the
//! wired-AND of the peer and our output.
//!
//! Waiting never blocks: [`SimLines::wait_for`] jumps the clock to the first
//! scheduled change that satisfies the wait, or to the timeout.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use heapless::Vec;

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::line::{Line, LineDriver, LineState};
use crate::protocol::strategy::jiffydos::RX_PAIRS;
use crate::protocol::BusError;
use crate::util::time::iec::{JIFFY_RX_EOI, JIFFY_RX_SLOTS};

/// Maximum number of scheduled peer changes.
pub const MAX_EVENTS: usize = 512;

/// Maximum number of recorded local changes.
pub const MAX_TRACE: usize = 1024;

/// A line changing state at a point in time, in us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineChange {
    pub at: u64,
    pub line: Line,
    pub state: LineState,
}

pub struct SimLines {
    now: u64,
    local: u8,
    events: Vec<LineChange, MAX_EVENTS>,
    trace: Vec<LineChange, MAX_TRACE>,
}

impl Default for SimLines {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLines {
    pub const fn new() -> Self {
        Self {
            now: 0,
            local: 0,
            events: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// The current virtual time, in us.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Every change we made to our own outputs, oldest first.
    pub fn trace(&self) -> &[LineChange] {
        &self.trace
    }

    /// Schedule the peer changing a line.  Where several changes to a line
    /// are scheduled for the same time, the last one scheduled wins.
    pub fn schedule(&mut self, line: Line, at: u64, state: LineState) {
        if self.events.push(LineChange { at, line, state }).is_err() {
            warn!("Simulated event list full");
        }
    }

    /// The state of one of our outputs at a point in time, from the trace.
    pub fn local_state_at(&self, line: Line, at: u64) -> LineState {
        self.trace
            .iter()
            .filter(|c| c.line == line && c.at <= at)
            .last()
            .map_or(LineState::Released, |c| c.state)
    }

    // The peer's state of a line at a point in time.
    fn peer_state_at(&self, line: Line, at: u64) -> LineState {
        // max_by_key() returns the last of equal elements
        self.events
            .iter()
            .filter(|e| e.line == line && e.at <= at)
            .max_by_key(|e| e.at)
            .map_or(LineState::Released, |e| e.state)
    }

    // What we sense on a line at a point in time, assuming our outputs
    // don't change.
    fn sensed_at(&self, line: Line, at: u64) -> LineState {
        let peer = self.peer_state_at(line, at) == LineState::Asserted;
        let asserted = match line {
            Line::ClockIn => peer || self.local & Line::ClockOut.mask() != 0,
            Line::DataIn => peer || self.local & Line::DataOut.mask() != 0,
            Line::ClockOut | Line::DataOut | Line::Srq => self.local & line.mask() != 0,
            Line::Atn | Line::Reset => peer,
        };
        LineState::from_asserted(asserted)
    }

    fn set_local(&mut self, line: Line, state: LineState) {
        let before = self.local;
        match state {
            LineState::Asserted => self.local |= line.mask(),
            LineState::Released => self.local &= !line.mask(),
        }
        if before != self.local {
            let change = LineChange {
                at: self.now,
                line,
                state,
            };
            if self.trace.push(change).is_err() {
                warn!("Simulated trace full");
            }
        }
    }

    /// Schedule a standard protocol talker sending one byte, from `start`.
    /// The talker must already be holding CLK.
    ///
    /// # Returns
    /// The time the talker has finished, and a following byte may start.
    pub fn schedule_talker_byte(&mut self, start: u64, byte: u8, eoi: bool) -> u64 {
        self.schedule_talker(start, byte, eoi, false)
    }

    /// As [`Self::schedule_talker_byte`], but the talker holds CLK before
    /// the last bit, probing for JiffyDOS.
    pub fn schedule_jiffy_detect(&mut self, start: u64, byte: u8) -> u64 {
        self.schedule_talker(start, byte, false, true)
    }

    fn schedule_talker(&mut self, start: u64, byte: u8, eoi: bool, probe: bool) -> u64 {
        // Ready to send
        self.schedule(Line::ClockIn, start, LineState::Released);

        // Holding off for longer than the EOI timeout signals EOI
        let clk = start + if eoi { 400 } else { 50 };
        self.schedule(Line::ClockIn, clk, LineState::Asserted);

        let mut bit_start = clk + 20;
        let mut last_assert = clk;
        for bit in 0..8 {
            let state = LineState::from_asserted(byte & (1 << bit) == 0);
            self.schedule(Line::DataIn, bit_start, state);
            let release = if probe && bit == 7 {
                last_assert + 400
            } else {
                bit_start + 20
            };
            self.schedule(Line::ClockIn, release, LineState::Released);
            last_assert = release + 60;
            self.schedule(Line::ClockIn, last_assert, LineState::Asserted);
            bit_start = release + 80;
        }
        self.schedule(Line::DataIn, last_assert + 10, LineState::Released);

        bit_start
    }

    /// Schedule a JiffyDOS talker sending one byte, having released CLK at
    /// `start`.
    pub fn schedule_jiffy_talker_byte(&mut self, start: u64, byte: u8, eoi: bool) -> u64 {
        self.schedule(Line::ClockIn, start, LineState::Released);
        for (slot, (clk_bit, data_bit)) in JIFFY_RX_SLOTS.iter().zip(RX_PAIRS) {
            let at = start + slot - 5;
            let clk = LineState::from_asserted(byte & (1 << clk_bit) != 0);
            let data = LineState::from_asserted(byte & (1 << data_bit) != 0);
            self.schedule(Line::ClockIn, at, clk);
            self.schedule(Line::DataIn, at, data);
        }
        let eoi_state = LineState::from_asserted(!eoi);
        self.schedule(Line::ClockIn, start + JIFFY_RX_EOI - 3, eoi_state);
        self.schedule(Line::DataIn, start + 80, LineState::Released);
        start + 80
    }

    /// Schedule a standard listener accepting one byte: ready for data at
    /// `start`, an EOI acknowledgement if `eoi`, and then the frame
    /// acknowledgement.
    pub fn schedule_listener_byte(&mut self, start: u64, eoi: bool) -> u64 {
        self.schedule(Line::DataIn, start, LineState::Released);
        if eoi {
            self.schedule(Line::DataIn, start + 250, LineState::Asserted);
            self.schedule(Line::DataIn, start + 310, LineState::Released);
        }
        self.schedule(Line::DataIn, start + 1000, LineState::Asserted);
        start + 1000
    }

    /// Decode the bytes we sent with the standard protocol, from the trace.
    /// Each byte is a CLK release to signal ready to send, followed by 8 CLK
    /// releases each marking a valid bit on DATA.
    pub fn sent_bytes(&self) -> Vec<u8, 32> {
        let mut bytes = Vec::new();
        let mut bit: Option<u8> = None;
        let mut byte = 0u8;
        for change in self
            .trace
            .iter()
            .filter(|c| c.line == Line::ClockOut && c.state == LineState::Released)
        {
            match bit {
                None => {
                    bit = Some(0);
                    byte = 0;
                }
                Some(n) => {
                    if self.local_state_at(Line::DataOut, change.at) == LineState::Released {
                        byte |= 1 << n;
                    }
                    if n == 7 {
                        if bytes.push(byte).is_err() {
                            break;
                        }
                        bit = None;
                    } else {
                        bit = Some(n + 1);
                    }
                }
            }
        }
        bytes
    }
}

impl LineDriver for SimLines {
    fn assert(&mut self, line: Line) {
        self.set_local(line, LineState::Asserted);
    }

    fn release(&mut self, line: Line) {
        self.set_local(line, LineState::Released);
    }

    fn status_of(&self, line: Line) -> LineState {
        self.sensed_at(line, self.now)
    }

    async fn wait_for(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), BusError> {
        if self.status_of(line) == state {
            return Ok(());
        }

        let deadline = self.now.saturating_add(timeout.as_micros());
        let reached = self
            .events
            .iter()
            .map(|e| e.at)
            .filter(|at| *at > self.now && *at <= deadline)
            .filter(|at| self.sensed_at(line, *at) == state)
            .min();

        match reached {
            Some(at) => {
                self.now = at;
                Ok(())
            }
            None => {
                self.now = deadline;
                Err(BusError::Timeout)
            }
        }
    }

    async fn delay(&mut self, duration: Duration) {
        self.now = self.now.saturating_add(duration.as_micros());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn assert_and_release_are_idempotent() {
        let mut lines = SimLines::new();
        lines.assert(Line::DataOut);
        lines.assert(Line::DataOut);
        assert_eq!(lines.status_of(Line::DataOut), LineState::Asserted);
        assert_eq!(lines.trace().len(), 1);

        lines.release(Line::DataOut);
        lines.release(Line::DataOut);
        assert_eq!(lines.status_of(Line::DataOut), LineState::Released);
        assert_eq!(lines.trace().len(), 2);
    }

    #[test]
    fn sensed_lines_are_wired_and() {
        let mut lines = SimLines::new();
        lines.schedule(Line::DataIn, 0, LineState::Asserted);
        lines.schedule(Line::DataIn, 100, LineState::Released);
        assert!(lines.is_asserted(Line::DataIn));

        // The peer lets go, but we're still holding the line.
        lines.assert(Line::DataOut);
        block_on(lines.delay(Duration::from_micros(150)));
        assert!(lines.is_asserted(Line::DataIn));

        lines.release(Line::DataOut);
        assert!(!lines.is_asserted(Line::DataIn));
    }

    #[test]
    fn wait_jumps_to_change() {
        let mut lines = SimLines::new();
        lines.schedule(Line::Atn, 0, LineState::Asserted);
        lines.schedule(Line::Atn, 750, LineState::Released);

        let result = block_on(lines.wait_for(
            Line::Atn,
            LineState::Released,
            Duration::from_millis(1),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(lines.now(), 750);
    }

    #[test]
    fn wait_times_out_at_deadline() {
        let mut lines = SimLines::new();
        lines.schedule(Line::Atn, 0, LineState::Asserted);
        lines.schedule(Line::Atn, 2_000, LineState::Released);

        let result = block_on(lines.wait_for(
            Line::Atn,
            LineState::Released,
            Duration::from_millis(1),
        ));
        assert_eq!(result, Err(BusError::Timeout));
        assert_eq!(lines.now(), 1_000);
    }
}
