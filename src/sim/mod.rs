//! Simulated bus backends, used to test the protocol core on the host.
//!
//! - [`SimLines`] simulates individual lines against a virtual clock, and is
//!   used to test the signaling strategies and the port.
//! - [`ScriptedPort`] works a byte at a time, and is used to test the bus
//!   engine and devices.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod lines;
pub mod port;

pub use lines::{LineChange, SimLines};
pub use port::{ScriptedPort, Step};
