//! Byte-level signaling strategies.
//!
//! The bus engine holds the current [`Strategy`] by value and swaps it when
//! a channel is opened or re-addressed, returning to [`Strategy::default`]
//! when the command has been processed.  Nothing here is shared with the
//! ATN edge handler.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod jiffydos;
pub mod standard;

pub use jiffydos::JiffyDos;
pub use standard::Standard;

use crate::protocol::flags::FlagsRegister;
use crate::protocol::line::LineDriver;
use crate::protocol::BusError;

/// Identifies a strategy, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StrategyKind {
    Standard,
    JiffyDos,
}

/// The available signaling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Strategy {
    Standard(Standard),
    JiffyDos(JiffyDos),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Standard(Standard::default())
    }
}

impl From<StrategyKind> for Strategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Standard => Strategy::default(),
            StrategyKind::JiffyDos => Strategy::JiffyDos(JiffyDos),
        }
    }
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Standard(_) => StrategyKind::Standard,
            Strategy::JiffyDos(_) => StrategyKind::JiffyDos,
        }
    }

    /// Receive a byte using this strategy.  `enabled` is the enabled device
    /// address mask.
    pub async fn receive_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
        enabled: u32,
    ) -> Result<u8, BusError> {
        match self {
            Strategy::Standard(s) => s.receive_byte(lines, flags, enabled).await,
            Strategy::JiffyDos(s) => s.receive_byte(lines, flags).await,
        }
    }

    /// Send a byte using this strategy.
    pub async fn send_byte<D: LineDriver>(
        &self,
        lines: &mut D,
        flags: &FlagsRegister,
        byte: u8,
        eoi: bool,
    ) -> Result<(), BusError> {
        match self {
            Strategy::Standard(s) => s.send_byte(lines, flags, byte, eoi).await,
            Strategy::JiffyDos(s) => s.send_byte(lines, flags, byte, eoi).await,
        }
    }
}
