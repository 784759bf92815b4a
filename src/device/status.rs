//! Drive status codes, and the held status string read from the command
//! channel.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt::Write;
use heapless::String;

use crate::constants::{MAX_STATUS_LEN, PRODUCT_ID};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::util::built::PKG_VERSION;

/// A status string, as sent over the command channel.
pub type StatusString = String<MAX_STATUS_LEN>;

/// Numbered drive outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    FilesScratched = 1,
    ReadError = 20,
    WriteProtectOn = 26,
    SyntaxError = 30,
    UnknownCommand = 31,
    InvalidFilename = 33,
    NoFilename = 34,
    RecordNotPresent = 50,
    WriteFileOpen = 60,
    FileNotOpen = 61,
    FileNotFound = 62,
    FileExists = 63,
    NoBlock = 65,
    NoChannel = 70,
    DosVersion = 73,
    DriveNotReady = 74,
    SelectedPartitionIllegal = 77,
    RecordTooLarge = 78,
    UserCommandError = 89,
    DirectoryError = 91,
    SoftwareError = 125,
    NotImplemented = 126,
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => StatusCode::Ok,
            1 => StatusCode::FilesScratched,
            20 => StatusCode::ReadError,
            26 => StatusCode::WriteProtectOn,
            30 => StatusCode::SyntaxError,
            31 => StatusCode::UnknownCommand,
            33 => StatusCode::InvalidFilename,
            34 => StatusCode::NoFilename,
            50 => StatusCode::RecordNotPresent,
            60 => StatusCode::WriteFileOpen,
            61 => StatusCode::FileNotOpen,
            62 => StatusCode::FileNotFound,
            63 => StatusCode::FileExists,
            65 => StatusCode::NoBlock,
            70 => StatusCode::NoChannel,
            73 => StatusCode::DosVersion,
            74 => StatusCode::DriveNotReady,
            77 => StatusCode::SelectedPartitionIllegal,
            78 => StatusCode::RecordTooLarge,
            89 => StatusCode::UserCommandError,
            91 => StatusCode::DirectoryError,
            125 => StatusCode::SoftwareError,
            126 => StatusCode::NotImplemented,
            _ => return Err(value),
        })
    }
}

impl StatusCode {
    fn message(self) -> &'static str {
        match self {
            // The real drive has a leading space here
            StatusCode::Ok => " OK",
            StatusCode::FilesScratched => " FILES SCRATCHED",
            StatusCode::ReadError => "READ ERROR",
            StatusCode::WriteProtectOn => "WRITE PROTECT ON",
            StatusCode::SyntaxError
            | StatusCode::UnknownCommand
            | StatusCode::InvalidFilename
            | StatusCode::NoFilename => "SYNTAX ERROR",
            StatusCode::RecordNotPresent => "RECORD NOT PRESENT",
            StatusCode::WriteFileOpen => "WRITE FILE OPEN",
            StatusCode::FileNotOpen => "FILE NOT OPEN",
            StatusCode::FileNotFound => "FILE NOT FOUND",
            StatusCode::FileExists => "FILE EXISTS",
            StatusCode::NoBlock => "NO BLOCK",
            StatusCode::NoChannel => "NO CHANNEL",
            StatusCode::DosVersion => PRODUCT_ID,
            StatusCode::DriveNotReady => "DRIVE NOT READY",
            StatusCode::SelectedPartitionIllegal => "SELECTED PARTITION ILLEGAL",
            StatusCode::RecordTooLarge => "RECORD TOO LARGE",
            StatusCode::UserCommandError => "USER COMMAND ERROR",
            StatusCode::DirectoryError => "DIRECTORY ERROR",
            StatusCode::SoftwareError => "SOFTWARE ERROR",
            StatusCode::NotImplemented => "NOT IMPLEMENTED",
        }
    }

    /// The status string for this code.
    pub fn render(self) -> StatusString {
        let mut s = StatusString::new();
        let track = if self == StatusCode::FilesScratched { 1 } else { 0 };
        let result = if self == StatusCode::DosVersion {
            write!(s, "{:02},{} {},00,00", self as u8, self.message(), PKG_VERSION)
        } else {
            write!(s, "{:02},{},{:02},00", self as u8, self.message(), track)
        };
        if result.is_err() {
            warn!("Status {} truncated", self as u8);
        }
        s
    }
}

/// The held status.  Reading it consumes it - with nothing held, a read
/// returns the OK status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    held: Option<StatusString>,
}

impl Status {
    /// A new status, holding the power-on message.
    pub fn power_on() -> Self {
        let mut status = Self::default();
        status.set(StatusCode::DosVersion);
        status
    }

    pub fn set(&mut self, code: StatusCode) {
        debug!("Status set to {}", code as u8);
        self.held = Some(code.render());
    }

    /// Hold a status string provided by something other than the drive.
    /// Truncated if too long.
    pub fn set_text(&mut self, text: &str) {
        let mut s = StatusString::new();
        for c in text.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        self.held = Some(s);
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Consume the held status.
    pub fn take(&mut self) -> StatusString {
        self.held
            .take()
            .unwrap_or_else(|| StatusCode::Ok.render())
    }
}
