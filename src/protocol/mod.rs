//! The IEC serial bus protocol.
//!
//! Leaf first:
//! - [`line`] - the line model, and the [`LineDriver`] capability set.
//! - [`strategy`] - byte-level send/receive handshakes.
//! - [`port`] - [`BusPort`], a line driver plus the selected strategy.
//! - [`frame`] - command byte decoding and the [`CommandFrame`].
//! - [`bus`] - the [`BusEngine`], which runs the ATN negotiation and
//!   dispatches completed commands to devices.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod bus;
pub mod error;
pub mod flags;
pub mod frame;
pub mod line;
pub mod port;
pub mod strategy;

pub use bus::BusEngine;
pub use error::BusError;
pub use flags::{Flags, FlagsRegister};
pub use frame::{BusState, Command, CommandFrame, PrimaryCommand, SecondaryCommand};
pub use line::{Line, LineDriver, LineState};
pub use port::{BusPort, IecPort};
pub use strategy::{Strategy, StrategyKind};
