//! Command byte decoding and the command frame.
//!
//! Under ATN the controller sends a primary command (LISTEN/TALK plus a
//! device address, or UNLISTEN/UNTALK), usually followed by a secondary
//! command (OPEN/REOPEN/CLOSE plus a channel).  The bus engine accumulates
//! these into a [`CommandFrame`], which is dispatched to the addressed
//! device once complete.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use crate::constants::{CMD_CHANNEL, MAX_PAYLOAD_LEN};

// Command byte masks and exact values.
pub const IEC_GLOBAL: u8 = 0x00;
pub const IEC_LISTEN: u8 = 0x20;
pub const IEC_UNLISTEN: u8 = 0x3F;
pub const IEC_TALK: u8 = 0x40;
pub const IEC_UNTALK: u8 = 0x5F;
pub const IEC_REOPEN: u8 = 0x60;
pub const IEC_CLOSE: u8 = 0xE0;
pub const IEC_OPEN: u8 = 0xF0;

/// Bus state.  Ordered - the engine compares states, so the declaration
/// order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// The controller is off or disconnected.  Nothing happens until the
    /// next ATN edge.
    Offline,

    /// RESET is asserted.
    Reset,

    /// The current cycle failed.  Always resolved to Idle by `service()`.
    Error,

    /// Nothing for us to do.
    Idle,

    /// ATN is asserted and command bytes are being read.
    Active,

    /// A complete command frame is being acted on.
    Process,
}

/// Primary commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrimaryCommand {
    Global,
    Listen,
    Unlisten,
    Talk,
    Untalk,
}

/// Secondary commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecondaryCommand {
    /// OPEN a named channel - a filename or command follows.
    Open,

    /// Re-address an open channel, for data transfer.
    Reopen,

    /// CLOSE a named channel.
    Close,
}

/// A single decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Global(u8),
    Listen(u8),
    Unlisten,
    Talk(u8),
    Untalk,
    Open(u8),
    Reopen(u8),
    Close(u8),
    Unknown(u8),
}

impl Command {
    /// Decode a byte received under ATN.  This is a pure function of the
    /// byte.
    pub const fn decode(byte: u8) -> Self {
        // UNLISTEN and UNTALK are exact values, the rest are a mask in the
        // top nibble with the device or channel in the bottom.  Neither
        // exact value shares a top nibble with a masked command.
        match byte {
            IEC_UNLISTEN => Command::Unlisten,
            IEC_UNTALK => Command::Untalk,
            _ => match byte & 0xF0 {
                IEC_GLOBAL => Command::Global(byte ^ IEC_GLOBAL),
                IEC_LISTEN => Command::Listen(byte ^ IEC_LISTEN),
                IEC_TALK => Command::Talk(byte ^ IEC_TALK),
                IEC_OPEN => Command::Open(byte ^ IEC_OPEN),
                IEC_REOPEN => Command::Reopen(byte ^ IEC_REOPEN),
                IEC_CLOSE => Command::Close(byte ^ IEC_CLOSE),
                _ => Command::Unknown(byte),
            },
        }
    }

    /// The bus state this command moves the engine to, from Active.  `None`
    /// means no transition.
    pub const fn next_state(&self) -> Option<BusState> {
        match self {
            Command::Global(_) | Command::Untalk => Some(BusState::Idle),
            Command::Listen(_) | Command::Talk(_) => Some(BusState::Active),
            Command::Unlisten
            | Command::Open(_)
            | Command::Reopen(_)
            | Command::Close(_) => Some(BusState::Process),
            Command::Unknown(_) => None,
        }
    }
}

/// The command being assembled by, and then acted on by, the bus engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub primary: Option<PrimaryCommand>,
    pub device: u8,
    pub secondary: Option<SecondaryCommand>,
    pub channel: u8,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandFrame {
    pub const fn new() -> Self {
        Self {
            primary: None,
            device: 0,
            secondary: None,
            channel: 0,
            payload: Vec::new(),
        }
    }

    /// Clear the frame.
    pub fn init(&mut self) {
        self.primary = None;
        self.device = 0;
        self.secondary = None;
        self.channel = 0;
        self.payload.clear();
    }

    /// Start a new LISTEN or TALK frame.  Without a following secondary
    /// command, the frame means REOPEN of the command channel.
    pub fn address(&mut self, primary: PrimaryCommand, device: u8) {
        self.init();
        self.primary = Some(primary);
        self.device = device;
        self.secondary = Some(SecondaryCommand::Reopen);
        self.channel = CMD_CHANNEL;
    }

    /// Apply a decoded command to the frame.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Global(device) => {
                self.primary = Some(PrimaryCommand::Global);
                self.device = device;
            }
            Command::Listen(device) => self.address(PrimaryCommand::Listen, device),
            Command::Talk(device) => self.address(PrimaryCommand::Talk, device),
            Command::Unlisten => self.primary = Some(PrimaryCommand::Unlisten),
            Command::Untalk => self.primary = Some(PrimaryCommand::Untalk),
            Command::Open(channel) => self.set_secondary(SecondaryCommand::Open, channel),
            Command::Reopen(channel) => self.set_secondary(SecondaryCommand::Reopen, channel),
            Command::Close(channel) => self.set_secondary(SecondaryCommand::Close, channel),
            Command::Unknown(_) => (),
        }
    }

    fn set_secondary(&mut self, secondary: SecondaryCommand, channel: u8) {
        self.secondary = Some(secondary);
        self.channel = channel;
    }

    /// Whether this frame targets the command channel.
    pub fn is_command_channel(&self) -> bool {
        self.channel == CMD_CHANNEL
    }

    /// The payload, as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_decodes_to_one_row() {
        let mut counts = [0usize; 9];
        for byte in 0..=255u8 {
            let index = match Command::decode(byte) {
                Command::Global(d) => {
                    assert_eq!(d, byte);
                    0
                }
                Command::Listen(d) => {
                    assert_eq!(d, byte - 0x20);
                    1
                }
                Command::Unlisten => {
                    assert_eq!(byte, 0x3F);
                    2
                }
                Command::Talk(d) => {
                    assert_eq!(d, byte - 0x40);
                    3
                }
                Command::Untalk => {
                    assert_eq!(byte, 0x5F);
                    4
                }
                Command::Open(c) => {
                    assert_eq!(c, byte & 0x0F);
                    assert_eq!(byte & 0xF0, 0xF0);
                    5
                }
                Command::Reopen(c) => {
                    assert_eq!(c, byte & 0x0F);
                    assert_eq!(byte & 0xF0, 0x60);
                    6
                }
                Command::Close(c) => {
                    assert_eq!(c, byte & 0x0F);
                    assert_eq!(byte & 0xF0, 0xE0);
                    7
                }
                Command::Unknown(b) => {
                    assert_eq!(b, byte);
                    8
                }
            };
            counts[index] += 1;

            // Pure - decoding twice gives the same answer.
            assert_eq!(Command::decode(byte), Command::decode(byte));
        }
        assert_eq!(counts, [16, 16, 1, 16, 1, 16, 16, 16, 158]);
    }

    #[test]
    fn device_eight() {
        assert_eq!(Command::decode(0x28), Command::Listen(8));
        assert_eq!(Command::decode(0x48), Command::Talk(8));
    }

    #[test]
    fn bytes_between_masks_are_unknown() {
        assert_eq!(Command::decode(0x30), Command::Unknown(0x30));
        assert_eq!(Command::decode(0x5E), Command::Unknown(0x5E));
        assert_eq!(Command::decode(0x80), Command::Unknown(0x80));
        assert_eq!(Command::Unknown(0x80).next_state(), None);
    }

    #[test]
    fn listen_sets_defaults() {
        let mut frame = CommandFrame::new();
        frame.payload.extend_from_slice(b"OLD").unwrap();
        frame.apply(Command::decode(0x28));
        assert_eq!(frame.primary, Some(PrimaryCommand::Listen));
        assert_eq!(frame.device, 8);
        assert_eq!(frame.secondary, Some(SecondaryCommand::Reopen));
        assert_eq!(frame.channel, CMD_CHANNEL);
        assert!(frame.payload.is_empty());

        frame.apply(Command::decode(0xF2));
        assert_eq!(frame.secondary, Some(SecondaryCommand::Open));
        assert_eq!(frame.channel, 2);

        // UNLISTEN keeps the addressed device.
        frame.apply(Command::Unlisten);
        assert_eq!(frame.primary, Some(PrimaryCommand::Unlisten));
        assert_eq!(frame.device, 8);
    }

    #[test]
    fn states_are_ordered() {
        assert!(BusState::Offline < BusState::Reset);
        assert!(BusState::Error < BusState::Idle);
        assert!(BusState::Idle < BusState::Active);
        assert!(BusState::Active < BusState::Process);
    }
}
