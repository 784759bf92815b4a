//! Sending a device's output to the controller.
//!
//! The last byte of a transfer must be sent with EOI, but a source rarely
//! knows which byte is its last until it has run out.  [`TalkStream`] holds
//! each byte back until the next arrives, so [`TalkStream::finish`] can send
//! the held byte with EOI.
//!
//! A byte is only counted as sent once the listener has acknowledged it.
//! If a send fails the byte stays held, so a caller can recover everything
//! the controller never received.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::{BusError, BusPort};

pub struct TalkStream<'p, P: BusPort> {
    port: &'p mut P,
    held: Option<u8>,
    sent: usize,
}

impl<'p, P: BusPort> TalkStream<'p, P> {
    pub fn new(port: &'p mut P) -> Self {
        Self {
            port,
            held: None,
            sent: 0,
        }
    }

    /// Queue a byte, sending the previously queued one.  If that send
    /// fails, `byte` is not queued.
    pub async fn push(&mut self, byte: u8) -> Result<(), BusError> {
        if let Some(prev) = self.held {
            self.port.send_byte(prev, false).await?;
            self.sent += 1;
        }
        self.held = Some(byte);
        Ok(())
    }

    pub async fn push_all(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        for &byte in bytes {
            self.push(byte).await?;
        }
        Ok(())
    }

    /// Send the last byte with EOI and hand the bus back to the controller.
    /// If nothing was ever queued, signal that there is nothing to send
    /// instead.
    ///
    /// # Returns
    /// The number of bytes sent.
    pub async fn finish(&mut self) -> Result<usize, BusError> {
        match self.held {
            Some(last) => {
                self.port.send_byte(last, true).await?;
                self.held = None;
                self.sent += 1;
                self.port.undo_turn_around().await?;
            }
            None => self.port.send_fnf().await,
        }
        trace!("Talk complete, {} bytes", self.sent);
        Ok(self.sent)
    }

    /// Bytes acknowledged by the listener so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Take the byte queued but not yet sent, if any.
    pub fn take_held(&mut self) -> Option<u8> {
        self.held.take()
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        &mut *self.port
    }
}
