//! The bus port - a line driver plus the currently selected signaling
//! strategy.
//!
//! [`BusPort`] is the capability set the bus engine and devices use.  It
//! adds byte transfer and strategy selection to [`LineDriver`], and provides
//! the fixed line sequences (listener posture, turnaround, undo turnaround,
//! file not found) in terms of it.  [`IecPort`] is the implementation used
//! with real or simulated lines.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_futures::select::select;
use embassy_time::Duration;

use crate::config::BusConfig;
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::{Flags, FlagsRegister};
use crate::protocol::line::{Line, LineDriver, LineState};
use crate::protocol::strategy::{Strategy, StrategyKind};
use crate::protocol::BusError;
use crate::util::time::iec::{IEC_T_BB, IEC_T_V, UNDO_TURNAROUND_TIMEOUT};
use crate::util::time::us;

#[allow(async_fn_in_trait)]
pub trait BusPort: LineDriver {
    /// Send one byte, using the current strategy.
    async fn send_byte(&mut self, byte: u8, eoi: bool) -> Result<(), BusError>;

    /// Receive one byte, using the current strategy.
    async fn receive_byte(&mut self) -> Result<u8, BusError>;

    /// The flags register.
    fn flags(&self) -> &FlagsRegister;

    /// Choose the strategy for a transfer with `device`, returning the
    /// strategy selected.
    fn select_strategy(&mut self, device: u8) -> StrategyKind;

    /// Return to the standard strategy.
    fn restore_default_strategy(&mut self);

    /// Tell the port which device addresses are enabled.
    fn set_enabled_mask(&mut self, mask: u32);

    /// Listener posture: CLK released, DATA asserted.  This is all the ATN
    /// edge handler does to the lines.
    fn listen_posture(&mut self) {
        self.release(Line::ClockOut);
        self.assert(Line::DataOut);
    }

    /// Release every line we drive.
    fn release_all(&mut self) {
        self.release(Line::ClockOut);
        self.release(Line::DataOut);
        self.release(Line::Srq);
    }

    /// Reverse the bus so we can talk.  When ATN is released after TALK we
    /// are holding DATA as a listener, and the controller is holding CLK.
    /// The steps must happen in this order, or both sides end up listening.
    async fn turn_around(&mut self, config: &BusConfig) -> Result<(), BusError> {
        self.wait_for(Line::Atn, LineState::Released, config.atn_release_timeout)
            .await
            .inspect_err(|_| warn!("Turnaround: ATN not released"))?;
        self.delay(config.turnaround_settle).await;

        self.wait_for(
            Line::ClockIn,
            LineState::Released,
            config.turnaround_clock_timeout,
        )
        .await
        .inspect_err(|_| warn!("Turnaround: controller did not release CLK"))?;

        self.release(Line::DataOut);
        self.delay(config.turnaround_settle).await;
        self.assert(Line::ClockOut);
        self.delay(config.turnaround_settle).await;

        trace!("Turnaround complete");
        Ok(())
    }

    /// Return the bus to its normal direction after talking.
    async fn undo_turn_around(&mut self) -> Result<(), BusError> {
        self.assert(Line::DataOut);
        self.delay(us(IEC_T_V)).await;
        self.release(Line::ClockOut);
        self.delay(us(IEC_T_V)).await;

        self.wait_for(Line::ClockIn, LineState::Released, UNDO_TURNAROUND_TIMEOUT)
            .await
            .inspect_err(|_| warn!("Undo turnaround: CLK not released"))
    }

    /// Signal file not found, or nothing to send, by releasing the lines for
    /// the inter-byte time.  The controller times out waiting for a byte.
    async fn send_fnf(&mut self) {
        self.release(Line::DataOut);
        self.release(Line::ClockOut);
        self.delay(us(IEC_T_BB)).await;
        debug!("File not found signalled");
    }
}

/// A [`BusPort`] over any [`LineDriver`].
pub struct IecPort<'a, D: LineDriver> {
    lines: D,
    flags: &'a FlagsRegister,
    strategy: Strategy,
    enabled: u32,

    // Devices which answered a JiffyDOS probe when last addressed.
    fast_capable: u32,
}

impl<'a, D: LineDriver> IecPort<'a, D> {
    pub fn new(lines: D, flags: &'a FlagsRegister) -> Self {
        Self {
            lines,
            flags,
            strategy: Strategy::default(),
            enabled: 0,
            fast_capable: 0,
        }
    }

    pub fn lines(&self) -> &D {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut D {
        &mut self.lines
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    // A LISTEN or TALK under ATN refreshes whether the addressed device is
    // being driven by a JiffyDOS controller.
    fn note_addressing(&mut self, byte: u8) {
        if !(0x20..0x60).contains(&byte) {
            return;
        }
        let bit = 1 << (byte & 0x1F);
        if self.flags.contains(Flags::FAST_DETECTED) {
            self.fast_capable |= bit;
        } else {
            self.fast_capable &= !bit;
        }
    }
}

impl<D: LineDriver> LineDriver for IecPort<'_, D> {
    fn assert(&mut self, line: Line) {
        self.lines.assert(line);
    }

    fn release(&mut self, line: Line) {
        self.lines.release(line);
    }

    fn status_of(&self, line: Line) -> LineState {
        self.lines.status_of(line)
    }

    async fn wait_for(
        &mut self,
        line: Line,
        state: LineState,
        timeout: Duration,
    ) -> Result<(), BusError> {
        self.lines.wait_for(line, state, timeout).await
    }

    async fn delay(&mut self, duration: Duration) {
        self.lines.delay(duration).await;
    }

    // Either an edge the lines saw, or one raised into the flags register
    // by an interrupt handler.
    async fn attention_edge(&mut self) {
        let flags = self.flags;
        select(self.lines.attention_edge(), flags.wait_attention()).await;
    }

    fn has_reset(&self) -> bool {
        self.lines.has_reset()
    }
}

impl<D: LineDriver> BusPort for IecPort<'_, D> {
    async fn send_byte(&mut self, byte: u8, eoi: bool) -> Result<(), BusError> {
        let result = self
            .strategy
            .send_byte(&mut self.lines, self.flags, byte, eoi)
            .await;
        if result.is_err() {
            self.flags.set(Flags::ERROR);
        }
        result
    }

    async fn receive_byte(&mut self) -> Result<u8, BusError> {
        let atn = self.lines.is_asserted(Line::Atn);
        let result = self
            .strategy
            .receive_byte(&mut self.lines, self.flags, self.enabled)
            .await;
        match result {
            Ok(byte) if atn => self.note_addressing(byte),
            Ok(_) | Err(BusError::EmptyStream) => (),
            Err(_) => self.flags.set(Flags::ERROR),
        }
        result
    }

    fn flags(&self) -> &FlagsRegister {
        self.flags
    }

    fn select_strategy(&mut self, device: u8) -> StrategyKind {
        let kind = if device < 32 && self.fast_capable & (1 << device) != 0 {
            StrategyKind::JiffyDos
        } else {
            StrategyKind::Standard
        };
        if kind != self.strategy.kind() {
            debug!("Device {} using {:?}", device, kind);
        }
        self.strategy = Strategy::from(kind);
        kind
    }

    fn restore_default_strategy(&mut self) {
        self.strategy = Strategy::default();
    }

    fn set_enabled_mask(&mut self, mask: u32) {
        self.enabled = mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLines;
    use embassy_futures::block_on;

    fn port(flags: &FlagsRegister) -> IecPort<'_, SimLines> {
        let mut port = IecPort::new(SimLines::new(), flags);
        port.listen_posture();
        port
    }

    #[test]
    fn turnaround_when_lines_release() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.lines_mut().schedule(Line::Atn, 0, LineState::Released);
        port.lines_mut().schedule(Line::ClockIn, 0, LineState::Released);

        let result = block_on(port.turn_around(&BusConfig::default()));
        assert_eq!(result, Ok(()));
        assert_eq!(port.status_of(Line::DataOut), LineState::Released);
        assert_eq!(port.status_of(Line::ClockOut), LineState::Asserted);
    }

    #[test]
    fn turnaround_waits_for_controller_clock() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.lines_mut().schedule(Line::ClockIn, 0, LineState::Asserted);
        port.lines_mut().schedule(Line::ClockIn, 500, LineState::Released);

        let result = block_on(port.turn_around(&BusConfig::default()));
        assert_eq!(result, Ok(()));

        // DATA is only released once the controller has let go of CLK.
        let released = port
            .lines()
            .trace()
            .iter()
            .find(|c| c.line == Line::DataOut && c.state == LineState::Released)
            .map(|c| c.at);
        assert_eq!(released, Some(500));
    }

    #[test]
    fn turnaround_fails_within_timeout_when_atn_stuck() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.lines_mut().schedule(Line::Atn, 0, LineState::Asserted);
        let config = BusConfig {
            atn_release_timeout: Duration::from_millis(5),
            ..BusConfig::default()
        };

        let result = block_on(port.turn_around(&config));
        assert_eq!(result, Err(BusError::Timeout));
        assert_eq!(port.lines().now(), 5_000);

        // Still a listener.
        assert_eq!(port.status_of(Line::DataOut), LineState::Asserted);
        assert_eq!(port.status_of(Line::ClockOut), LineState::Released);
    }

    #[test]
    fn turnaround_fails_when_clock_stuck() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.lines_mut().schedule(Line::ClockIn, 0, LineState::Asserted);
        let config = BusConfig {
            turnaround_clock_timeout: Duration::from_millis(2),
            ..BusConfig::default()
        };

        let result = block_on(port.turn_around(&config));
        assert_eq!(result, Err(BusError::Timeout));
        assert_eq!(port.lines().now(), IEC_T_V + 2_000);
    }

    #[test]
    fn undo_turnaround_returns_to_listening() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.release(Line::DataOut);
        port.assert(Line::ClockOut);

        let result = block_on(port.undo_turn_around());
        assert_eq!(result, Ok(()));
        assert!(port.is_asserted(Line::DataOut));
        assert!(!port.is_asserted(Line::ClockOut));
    }

    #[test]
    fn fnf_releases_for_inter_byte_time() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.assert(Line::ClockOut);
        let start = port.lines().now();

        block_on(port.send_fnf());
        assert!(!port.is_asserted(Line::DataOut));
        assert!(!port.is_asserted(Line::ClockOut));
        assert_eq!(port.lines().now() - start, IEC_T_BB);
    }

    #[test]
    fn jiffy_selected_only_after_probe() {
        let flags = FlagsRegister::new();
        let mut port = port(&flags);
        port.set_enabled_mask(1 << 8);
        assert_eq!(port.select_strategy(8), StrategyKind::Standard);

        port.lines_mut().schedule(Line::Atn, 0, LineState::Asserted);
        port.lines_mut().schedule(Line::ClockIn, 0, LineState::Asserted);
        port.lines_mut().schedule_jiffy_detect(10, 0x28);
        assert_eq!(block_on(port.receive_byte()), Ok(0x28));

        assert_eq!(port.select_strategy(8), StrategyKind::JiffyDos);
        assert_eq!(port.select_strategy(9), StrategyKind::Standard);
        port.restore_default_strategy();
        assert_eq!(port.strategy().kind(), StrategyKind::Standard);
    }
}
