//! The standard Commodore serial bus byte handshake.
//!
//! Timings are those of the real protocol, see [`crate::util::time::iec`].
//! The canonical description is "How the VIC/64 Serial Bus Works", Jim
//! Butterfield, Compute! July 1983.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::{Flags, FlagsRegister};
use crate::protocol::line::{Line, LineDriver, LineState};
use crate::protocol::BusError;
use crate::util::time::iec::{
    BIT_TIMEOUT, EMPTY_STREAM_TIMEOUT, EOI_TIMEOUT, IEC_T_AT, IEC_T_EI, IEC_T_F, IEC_T_FR,
    IEC_T_NE, IEC_T_RY, IEC_T_S, IEC_T_V, IEC_T_YE, JIFFY_ACK, JIFFY_DETECT,
    LISTENER_READY_TIMEOUT, READ_CLK_START_TIMEOUT,
};
use crate::util::time::us;

/// The standard handshake.  While listening under ATN it also watches for
/// the JiffyDOS probe, if `detect_jiffy` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Standard {
    pub detect_jiffy: bool,
}

impl Default for Standard {
    fn default() -> Self {
        Self { detect_jiffy: true }
    }
}

impl Standard {
    /// Receive a single byte.  We must already be in listener posture - CLK
    /// released and DATA asserted.
    ///
    /// # Arguments
    /// - `lines` - the line driver
    /// - `flags` - EOI_RECVD, EMPTY_STREAM and FAST_DETECTED are set here
    /// - `enabled` - bitmask of enabled device addresses.  We only answer a
    ///   JiffyDOS probe on behalf of an enabled device.
    ///
    /// # Returns
    /// - `Ok(byte)` - the received byte.  Check EOI_RECVD to see if it was
    ///   the last.
    /// - `Err(BusError)` - the handshake failed.
    pub async fn receive_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
        enabled: u32,
    ) -> Result<u8, BusError> {
        flags.clear(Flags::TRANSIENT);

        let atn = lines.is_asserted(Line::Atn);
        if atn && lines.has_reset() && lines.is_asserted(Line::Reset) {
            debug!("ATN and RESET both asserted");
            return Err(BusError::Disconnected);
        }

        // Wait for the talker to indicate it is ready to send
        lines
            .wait_for(Line::ClockIn, LineState::Released, READ_CLK_START_TIMEOUT)
            .await?;

        // Signal we're ready for data, and wait for any other listeners to
        // be ready too
        lines.release(Line::DataOut);
        lines
            .wait_for(Line::DataIn, LineState::Released, LISTENER_READY_TIMEOUT)
            .await?;

        // If the talker doesn't assert CLK promptly, it's signalling EOI
        if lines
            .wait_for(Line::ClockIn, LineState::Asserted, us(EOI_TIMEOUT))
            .await
            .is_err()
        {
            trace!("EOI signalled");
            flags.set(Flags::EOI_RECVD);

            // Acknowledge the EOI
            lines.assert(Line::DataOut);
            lines.delay(us(IEC_T_EI)).await;
            lines.release(Line::DataOut);

            if lines
                .wait_for(Line::ClockIn, LineState::Asserted, us(EMPTY_STREAM_TIMEOUT))
                .await
                .is_err()
            {
                debug!("Empty stream");
                flags.set(Flags::EMPTY_STREAM);
                return Err(BusError::EmptyStream);
            }
        }

        // Now read the bits, LSB first.  A bit is valid while CLK is
        // released.
        let mut byte = 0u8;
        for bit in 0..8 {
            if bit == 7 && atn && self.detect_jiffy && Self::detection_applies(byte, enabled) {
                if lines
                    .wait_for(Line::ClockIn, LineState::Released, us(JIFFY_DETECT))
                    .await
                    .is_err()
                {
                    // The talker is holding CLK before the last bit - this
                    // is the JiffyDOS probe.  Answer it.
                    trace!("JiffyDOS probe for device {}", byte & 0x1F);
                    lines.assert(Line::DataOut);
                    lines.delay(us(JIFFY_ACK)).await;
                    lines.release(Line::DataOut);
                    flags.set(Flags::FAST_DETECTED);
                }
            }

            lines
                .wait_for(Line::ClockIn, LineState::Released, BIT_TIMEOUT)
                .await?;
            if !lines.is_asserted(Line::DataIn) {
                byte |= 1 << bit;
            }
            lines
                .wait_for(Line::ClockIn, LineState::Asserted, BIT_TIMEOUT)
                .await?;
        }

        // Acknowledge the frame
        lines.assert(Line::DataOut);

        // If this was the last byte, let go of the bus
        if flags.contains(Flags::EOI_RECVD) {
            lines.delay(us(IEC_T_FR)).await;
            lines.release(Line::ClockOut);
            lines.release(Line::DataOut);
        }

        trace!("Received byte 0x{:02x}", byte);
        Ok(byte)
    }

    // A JiffyDOS probe is a LISTEN or TALK byte, addressed at a device we
    // are handling.  We only have the bottom 7 bits at the point we need to
    // decide.
    fn detection_applies(partial: u8, enabled: u32) -> bool {
        (0x20..0x60).contains(&partial) && (enabled & (1 << (partial & 0x1F))) != 0
    }

    /// Send a single byte.  On entry we hold CLK asserted (we are the
    /// talker).
    ///
    /// # Arguments
    /// - `byte` - the byte to send
    /// - `eoi` - whether this is the last byte of the transfer
    ///
    /// # Returns
    /// - `Ok(())` - the listener acknowledged the byte
    /// - `Err(BusError::Attention)` - the controller asserted ATN
    /// - `Err(BusError::Timeout)` - the listener didn't respond
    pub async fn send_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
        byte: u8,
        eoi: bool,
    ) -> Result<(), BusError> {
        flags.clear(Flags::TRANSIENT);

        // Signal we're ready to send, and wait for the listener to be ready
        // for data
        lines.release(Line::ClockOut);
        lines
            .wait_for(Line::DataIn, LineState::Released, LISTENER_READY_TIMEOUT)
            .await?;

        if eoi {
            // Hold off to signal EOI, and wait for the listener to
            // acknowledge it by pulsing DATA
            lines.delay(us(IEC_T_YE)).await;
            lines
                .wait_for(Line::DataIn, LineState::Asserted, us(IEC_T_AT))
                .await?;
            lines
                .wait_for(Line::DataIn, LineState::Released, us(IEC_T_AT))
                .await?;
            lines.delay(us(IEC_T_RY)).await;
        } else {
            lines.delay(us(IEC_T_NE)).await;
        }

        lines.assert(Line::ClockOut);

        for bit in 0..8 {
            if lines.is_asserted(Line::Atn) {
                debug!("ATN asserted during send");
                lines.release(Line::DataOut);
                return Err(BusError::Attention);
            }

            // Present the bit - released is 1
            let state = LineState::from_asserted(byte & (1 << bit) == 0);
            lines.drive(Line::DataOut, state);
            lines.delay(us(IEC_T_S)).await;

            // Bit valid
            lines.release(Line::ClockOut);
            lines.delay(us(IEC_T_V)).await;
            lines.assert(Line::ClockOut);
        }

        // Wait for the listener to accept the frame
        lines.release(Line::DataOut);
        lines
            .wait_for(Line::DataIn, LineState::Asserted, us(IEC_T_F))
            .await?;

        if eoi {
            lines.delay(us(IEC_T_FR)).await;
            lines.release(Line::ClockOut);
        }

        trace!("Sent byte 0x{:02x} EOI {}", byte, eoi);
        Ok(())
    }
}
