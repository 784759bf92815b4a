//! The contract between a drive and whatever stores its files and
//! interprets its DOS commands.
//!
//! The drive handles the bus side of a session.  Everything to do with
//! names, paths, commands and storage is behind [`Executor`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::String;

use crate::constants::MAX_TARGET_LEN;
use crate::device::status::StatusCode;

/// A resolved name or path.
pub type Target = String<MAX_TARGET_LEN>;

/// What an OPEN payload resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    /// An existing file.
    File,

    /// The directory listing.
    Directory,

    /// The status of the executor itself.
    Status,

    /// Information about the device.
    DeviceInfo,

    /// A DOS command, which has been executed.  Its outcome is available
    /// from [`Executor::status_text`].
    Command,

    /// There is nothing matching this name.
    NotFound,

    /// Nothing to act on.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub class: Resolution,
    pub target: Target,
}

impl Resolved {
    pub fn new(class: Resolution) -> Self {
        Self {
            class,
            target: Target::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    Read,
    Write,
}

/// The outcome of a read from an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChunk {
    /// How many bytes were read into the buffer.
    pub len: usize,

    /// There is nothing more to read after these bytes.
    pub end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FileType {
    Del,
    Seq,
    Prg,
    Usr,
    Rel,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Del => "DEL",
            FileType::Seq => "SEQ",
            FileType::Prg => "PRG",
            FileType::Usr => "USR",
            FileType::Rel => "REL",
        }
    }
}

/// One entry of the directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String<16>,
    pub blocks: u16,
    pub file_type: FileType,
}

pub trait Executor {
    /// Switch to the configuration for the device `id`.
    ///
    /// # Returns
    /// Whether the configuration changed.
    fn select_device(&mut self, id: u8) -> bool;

    /// Resolve the payload of an OPEN on `channel`.  On the command channel
    /// this executes the payload as a DOS command.
    fn resolve(&mut self, channel: u8, payload: &[u8]) -> Resolved;

    /// Open a resolved target on a channel.
    ///
    /// # Returns
    /// - `Ok(())` - the channel is open
    /// - `Err(StatusCode)` - why it couldn't be opened
    fn open_channel(&mut self, channel: u8, target: &str, mode: ChannelMode)
        -> Result<(), StatusCode>;

    /// Read the next bytes from an open channel.
    fn read_bytes(&mut self, channel: u8, buf: &mut [u8]) -> ReadChunk;

    /// Write bytes to an open channel.
    ///
    /// # Returns
    /// The number of bytes accepted.
    fn write_bytes(&mut self, channel: u8, data: &[u8]) -> usize;

    fn close_channel(&mut self, channel: u8);

    /// The outcome of the last command, if the executor has one to report.
    fn status_text(&self) -> Option<&str>;

    /// The disk name and id, for the directory header.
    fn media_header(&self) -> (&str, &str);

    fn read_dir_entry(&self, index: usize) -> Option<DirEntry>;

    fn blocks_free(&self) -> u16;
}
