//! The JiffyDOS fast serial protocol.
//!
//! Data is clocked two bits at a time on CLK and DATA, at fixed offsets from
//! the start of the byte, instead of with a per-bit handshake.  The
//! controller only uses it with a device that answered its probe while it
//! was being addressed - see [`super::standard::Standard::receive_byte`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::{Flags, FlagsRegister};
use crate::protocol::line::{Line, LineDriver, LineState};
use crate::protocol::BusError;
use crate::util::time::iec::{
    JIFFY_RX_ACK, JIFFY_RX_EOI, JIFFY_RX_SLOTS, JIFFY_TX_EOI, JIFFY_TX_SLOTS,
    LISTENER_READY_TIMEOUT, READ_CLK_START_TIMEOUT,
};
use crate::util::time::us;

// The bits carried on (CLK, DATA) in each receive slot.
pub const RX_PAIRS: [(u8, u8); 4] = [(4, 5), (6, 7), (3, 1), (2, 0)];

// The bits carried on (CLK, DATA) in each send slot.
pub const TX_PAIRS: [(u8, u8); 4] = [(0, 1), (2, 3), (4, 5), (6, 7)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JiffyDos;

impl JiffyDos {
    /// Receive a byte.  The talker starts the byte by releasing CLK, and
    /// each slot is timed from then.  A line asserted is a 1.
    pub async fn receive_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
    ) -> Result<u8, BusError> {
        flags.clear(Flags::TRANSIENT);

        // Ready for data
        lines.release(Line::DataOut);
        lines
            .wait_for(Line::ClockIn, LineState::Released, READ_CLK_START_TIMEOUT)
            .await?;

        let mut byte = 0u8;
        let mut elapsed = 0;
        for (slot, (clk_bit, data_bit)) in JIFFY_RX_SLOTS.iter().zip(RX_PAIRS) {
            lines.delay(us(slot - elapsed)).await;
            elapsed = *slot;
            if lines.is_asserted(Line::ClockIn) {
                byte |= 1 << clk_bit;
            }
            if lines.is_asserted(Line::DataIn) {
                byte |= 1 << data_bit;
            }
        }

        // CLK released at the end of the byte indicates EOI
        lines.delay(us(JIFFY_RX_EOI - elapsed)).await;
        if !lines.is_asserted(Line::ClockIn) {
            flags.set(Flags::EOI_RECVD);
        }

        lines.delay(us(JIFFY_RX_ACK - JIFFY_RX_EOI)).await;
        lines.assert(Line::DataOut);

        trace!("Received JiffyDOS byte 0x{:02x}", byte);
        Ok(byte)
    }

    /// Send a byte.  The listener starts the byte by releasing DATA.  A line
    /// released is a 1.
    pub async fn send_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
        byte: u8,
        eoi: bool,
    ) -> Result<(), BusError> {
        flags.clear(Flags::TRANSIENT);

        if lines.is_asserted(Line::Atn) {
            debug!("ATN asserted before JiffyDOS send");
            return Err(BusError::Attention);
        }

        lines.release(Line::ClockOut);
        lines.release(Line::DataOut);
        lines
            .wait_for(Line::DataIn, LineState::Released, LISTENER_READY_TIMEOUT)
            .await?;

        let mut elapsed = 0;
        for (slot, (clk_bit, data_bit)) in JIFFY_TX_SLOTS.iter().zip(TX_PAIRS) {
            lines.delay(us(slot - elapsed)).await;
            elapsed = *slot;
            lines.drive(
                Line::ClockOut,
                LineState::from_asserted(byte & (1 << clk_bit) == 0),
            );
            lines.drive(
                Line::DataOut,
                LineState::from_asserted(byte & (1 << data_bit) == 0),
            );
        }

        lines.delay(us(JIFFY_TX_EOI - elapsed)).await;
        lines.drive(Line::ClockOut, LineState::from_asserted(eoi));
        lines.release(Line::DataOut);

        trace!("Sent JiffyDOS byte 0x{:02x} EOI {}", byte, eoi);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimLines;
    use embassy_futures::block_on;

    #[test]
    fn receives_bit_pairs() {
        let mut lines = SimLines::new();
        let flags = FlagsRegister::new();
        lines.schedule(Line::ClockIn, 0, LineState::Asserted);
        lines.schedule_jiffy_talker_byte(100, 0xC3, false);

        let byte = block_on(JiffyDos.receive_byte(&mut lines, &flags));
        assert_eq!(byte, Ok(0xC3));
        assert!(!flags.contains(Flags::EOI_RECVD));
        assert!(lines.is_asserted(Line::DataOut));
    }

    #[test]
    fn receives_eoi() {
        let mut lines = SimLines::new();
        let flags = FlagsRegister::new();
        lines.schedule(Line::ClockIn, 0, LineState::Asserted);
        lines.schedule_jiffy_talker_byte(100, 0x5A, true);

        let byte = block_on(JiffyDos.receive_byte(&mut lines, &flags));
        assert_eq!(byte, Ok(0x5A));
        assert!(flags.contains(Flags::EOI_RECVD));
    }

    #[test]
    fn sends_bit_pairs_at_slot_times() {
        let mut lines = SimLines::new();
        let flags = FlagsRegister::new();
        lines.schedule(Line::DataIn, 0, LineState::Asserted);
        lines.schedule(Line::DataIn, 50, LineState::Released);

        let result = block_on(JiffyDos.send_byte(&mut lines, &flags, 0x9C, true));
        assert_eq!(result, Ok(()));

        // Sample our lines just after each slot, as the listener would.
        let mut byte = 0u8;
        for (slot, (clk_bit, data_bit)) in JIFFY_TX_SLOTS.iter().zip(TX_PAIRS) {
            let at = 50 + slot + 1;
            if lines.local_state_at(Line::ClockOut, at) == LineState::Released {
                byte |= 1 << clk_bit;
            }
            if lines.local_state_at(Line::DataOut, at) == LineState::Released {
                byte |= 1 << data_bit;
            }
        }
        assert_eq!(byte, 0x9C);
        assert_eq!(
            lines.local_state_at(Line::ClockOut, 50 + JIFFY_TX_EOI),
            LineState::Asserted
        );
    }
}
