//! A byte-level scripted [`BusPort`], for testing the bus engine and
//! devices without simulating individual bit timings.
//!
//! The script is the sequence of bytes the controller will send, each
//! marked with whether ATN is asserted while it is sent and whether it
//! carries EOI.  ATN is sensed as asserted exactly when the next byte in the
//! script is an ATN byte.  Sent bytes are recorded with their EOI marker.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use heapless::{Deque, Vec};

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::{Flags, FlagsRegister};
use crate::protocol::line::{Line, LineDriver, LineState};
use crate::protocol::port::BusPort;
use crate::protocol::strategy::StrategyKind;
use crate::protocol::BusError;

/// Maximum number of steps in a script.
pub const MAX_STEPS: usize = 128;

/// Maximum number of sent bytes recorded.
pub const MAX_SENT: usize = 512;

/// One step of the controller's script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The controller sends a byte.
    Byte { value: u8, eoi: bool, atn: bool },

    /// The next receive fails.
    Fail(BusError),
}

pub struct ScriptedPort<'a> {
    flags: &'a FlagsRegister,
    script: Deque<Step, MAX_STEPS>,
    sent: Vec<(u8, bool), MAX_SENT>,
    strategies: Vec<(u8, StrategyKind), 32>,
    local: u8,
    fast: u32,
    enabled: u32,
    reset: bool,
    clock_stuck: bool,
    now: u64,
}

impl<'a> ScriptedPort<'a> {
    pub fn new(flags: &'a FlagsRegister) -> Self {
        Self {
            flags,
            script: Deque::new(),
            sent: Vec::new(),
            strategies: Vec::new(),
            local: 0,
            fast: 0,
            enabled: 0,
            reset: false,
            clock_stuck: false,
            now: 0,
        }
    }

    fn push(&mut self, step: Step) {
        if self.script.push_back(step).is_err() {
            warn!("Script full");
        }
    }

    /// The controller sends these bytes under ATN.
    pub fn atn(&mut self, bytes: &[u8]) -> &mut Self {
        for &value in bytes {
            self.push(Step::Byte {
                value,
                eoi: false,
                atn: true,
            });
        }
        self
    }

    /// The controller sends these bytes as data, with EOI on the last.
    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        for (ii, &value) in bytes.iter().enumerate() {
            self.push(Step::Byte {
                value,
                eoi: ii == bytes.len() - 1,
                atn: false,
            });
        }
        self
    }

    /// The next receive fails with `err`.
    pub fn fail(&mut self, err: BusError) -> &mut Self {
        self.push(Step::Fail(err));
        self
    }

    /// Assert or release RESET.
    pub fn set_reset(&mut self, reset: bool) -> &mut Self {
        self.reset = reset;
        self
    }

    /// If set, the controller never releases CLK, so turnaround fails.
    pub fn set_clock_stuck(&mut self, stuck: bool) -> &mut Self {
        self.clock_stuck = stuck;
        self
    }

    /// Treat `device` as having been addressed by a JiffyDOS controller.
    pub fn set_fast(&mut self, device: u8) -> &mut Self {
        self.fast |= 1 << device;
        self
    }

    /// Every byte sent, with its EOI marker.
    pub fn sent(&self) -> &[(u8, bool)] {
        &self.sent
    }

    /// Just the sent bytes.
    pub fn sent_data(&self) -> Vec<u8, MAX_SENT> {
        self.sent.iter().map(|(b, _)| *b).collect()
    }

    /// Every strategy selection made, with the device it was made for.
    pub fn strategies(&self) -> &[(u8, StrategyKind)] {
        &self.strategies
    }

    /// The enabled mask last set.
    pub fn enabled_mask(&self) -> u32 {
        self.enabled
    }

    /// Steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    fn atn_asserted(&self) -> bool {
        matches!(self.script.front(), Some(Step::Byte { atn: true, .. }))
    }
}

impl LineDriver for ScriptedPort<'_> {
    fn assert(&mut self, line: Line) {
        self.local |= line.mask();
    }

    fn release(&mut self, line: Line) {
        self.local &= !line.mask();
    }

    fn status_of(&self, line: Line) -> LineState {
        let local = |l: Line| self.local & l.mask() != 0;
        let asserted = match line {
            Line::Atn => self.atn_asserted(),
            Line::Reset => self.reset,
            Line::ClockIn => self.clock_stuck || local(Line::ClockOut),
            Line::DataIn => local(Line::DataOut),
            Line::ClockOut | Line::DataOut | Line::Srq => local(line),
        };
        LineState::from_asserted(asserted)
    }

    async fn wait_for(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), BusError> {
        if self.status_of(line) == state {
            Ok(())
        } else {
            self.now = self.now.saturating_add(timeout.as_micros());
            Err(BusError::Timeout)
        }
    }

    async fn delay(&mut self, duration: Duration) {
        self.now = self.now.saturating_add(duration.as_micros());
    }
}

impl BusPort for ScriptedPort<'_> {
    async fn send_byte(&mut self, byte: u8, eoi: bool) -> Result<(), BusError> {
        if self.atn_asserted() {
            self.flags.set(Flags::ERROR);
            return Err(BusError::Attention);
        }
        if self.sent.push((byte, eoi)).is_err() {
            warn!("Sent log full");
        }
        Ok(())
    }

    async fn receive_byte(&mut self) -> Result<u8, BusError> {
        self.flags.clear(Flags::TRANSIENT);
        match self.script.pop_front() {
            Some(Step::Byte { value, eoi, .. }) => {
                if eoi {
                    self.flags.set(Flags::EOI_RECVD);
                }
                Ok(value)
            }
            Some(Step::Fail(BusError::EmptyStream)) | None => {
                self.flags.set(Flags::EMPTY_STREAM);
                Err(BusError::EmptyStream)
            }
            Some(Step::Fail(err)) => {
                self.flags.set(Flags::ERROR);
                Err(err)
            }
        }
    }

    fn flags(&self) -> &FlagsRegister {
        self.flags
    }

    fn select_strategy(&mut self, device: u8) -> StrategyKind {
        let kind = if device < 32 && self.fast & (1 << device) != 0 {
            StrategyKind::JiffyDos
        } else {
            StrategyKind::Standard
        };
        if self.strategies.push((device, kind)).is_err() {
            warn!("Strategy log full");
        }
        kind
    }

    fn restore_default_strategy(&mut self) {}

    fn set_enabled_mask(&mut self, mask: u32) {
        self.enabled = mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn atn_follows_script() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        port.atn(&[0x28]).data(b"AB");

        assert!(port.is_asserted(Line::Atn));
        assert_eq!(block_on(port.receive_byte()), Ok(0x28));
        assert!(!port.is_asserted(Line::Atn));
        assert_eq!(block_on(port.receive_byte()), Ok(b'A'));
        assert!(!flags.contains(Flags::EOI_RECVD));
        assert_eq!(block_on(port.receive_byte()), Ok(b'B'));
        assert!(flags.contains(Flags::EOI_RECVD));
        assert_eq!(block_on(port.receive_byte()), Err(BusError::EmptyStream));
    }

    #[test]
    fn send_refused_under_atn() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        assert_eq!(block_on(port.send_byte(1, true)), Ok(()));
        port.atn(&[0x5F]);
        assert_eq!(block_on(port.send_byte(2, false)), Err(BusError::Attention));
        assert_eq!(port.sent(), &[(1, true)]);
    }
}
