//! Devices on the bus, and the per-channel session handling which turns a
//! completed command frame into actions.
//!
//! A [`Device`] implements four handlers - open, close, listen data and
//! talk.  [`Device::process`] decides which of them a frame needs, from the
//! frame's primary and secondary commands.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod channel;
pub mod drive;
pub mod executor;
pub mod memory;
pub mod status;
pub mod talk;

pub use channel::{ChannelSession, ChannelTable, OpenOutcome};
pub use drive::Drive;
pub use executor::{ChannelMode, DirEntry, Executor, FileType, ReadChunk, Resolution, Resolved};
pub use memory::{MemoryExecutor, MemoryFile};
pub use status::{Status, StatusCode};
pub use talk::TalkStream;

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::frame::{CommandFrame, PrimaryCommand, SecondaryCommand};
use crate::protocol::BusPort;

/// A device's state, derived from the primary command it was last
/// dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    Idle,
    Listen,
    Talk,

    /// Dispatched a frame that is neither LISTEN nor TALK.
    Active,
}

#[allow(async_fn_in_trait)]
pub trait Device {
    fn state(&self) -> DeviceState;

    fn set_state(&mut self, state: DeviceState);

    /// Return to power-on state.  Called when the bus is reset.
    fn reset(&mut self);

    /// OPEN, or REOPEN of the command channel.
    async fn handle_open<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame);

    async fn handle_close<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame);

    /// Receive data sent to an open channel.
    async fn handle_listen_data<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame);

    /// Send a channel's output.  The bus has already been turned around.
    async fn handle_talk<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame);

    /// Act on a completed command frame.
    ///
    /// # Returns
    /// The device's state afterwards.  Anything other than Idle means the
    /// combination wasn't supported, and the frame should be kept.
    async fn process<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) -> DeviceState {
        let state = match frame.primary {
            Some(PrimaryCommand::Listen) => DeviceState::Listen,
            Some(PrimaryCommand::Talk) => DeviceState::Talk,
            _ => DeviceState::Active,
        };
        self.set_state(state);

        match (frame.secondary, state) {
            (Some(SecondaryCommand::Open), DeviceState::Listen | DeviceState::Talk) => {
                self.handle_open(port, frame).await;
                if state == DeviceState::Talk {
                    self.handle_talk(port, frame).await;
                }
            }
            (Some(SecondaryCommand::Reopen), DeviceState::Listen) if frame.is_command_channel() => {
                self.handle_open(port, frame).await;
            }
            (Some(SecondaryCommand::Reopen), DeviceState::Listen) => {
                self.handle_listen_data(port, frame).await;
            }
            (Some(SecondaryCommand::Reopen), DeviceState::Talk) => {
                // A status read is an empty command followed by a talk
                if frame.is_command_channel() {
                    self.handle_open(port, frame).await;
                }
                self.handle_talk(port, frame).await;
            }
            (Some(SecondaryCommand::Close), DeviceState::Listen | DeviceState::Talk) => {
                self.handle_close(port, frame).await;
            }
            (secondary, state) => {
                warn!(
                    "Device {} unsupported {:?} in state {:?}",
                    frame.device,
                    secondary,
                    state
                );
                return state;
            }
        }

        self.set_state(DeviceState::Idle);
        DeviceState::Idle
    }
}

/// The closed set of devices which can be registered on the bus.
pub enum Peripheral<E: Executor> {
    Drive(Drive<E>),
}

impl<E: Executor> Device for Peripheral<E> {
    fn state(&self) -> DeviceState {
        match self {
            Peripheral::Drive(d) => d.state(),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        match self {
            Peripheral::Drive(d) => d.set_state(state),
        }
    }

    fn reset(&mut self) {
        match self {
            Peripheral::Drive(d) => d.reset(),
        }
    }

    async fn handle_open<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        match self {
            Peripheral::Drive(d) => d.handle_open(port, frame).await,
        }
    }

    async fn handle_close<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        match self {
            Peripheral::Drive(d) => d.handle_close(port, frame).await,
        }
    }

    async fn handle_listen_data<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        match self {
            Peripheral::Drive(d) => d.handle_listen_data(port, frame).await,
        }
    }

    async fn handle_talk<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        match self {
            Peripheral::Drive(d) => d.handle_talk(port, frame).await,
        }
    }
}
