//! A read-only [`Executor`] over a fixed table of files held in memory.
//!
//! Names are matched as the drive would: an optional `0:` drive prefix, and
//! a trailing `*` matches any name starting with what precedes it.  Any
//! `,type,mode` suffix is ignored for matching.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::{FnvIndexMap, String};

use crate::constants::{CMD_CHANNEL, MAX_OPEN_CHANNELS};
use crate::device::executor::{
    ChannelMode, DirEntry, Executor, FileType, ReadChunk, Resolution, Resolved, Target,
};
use crate::device::status::{StatusCode, StatusString};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// Bytes per block, as on a 1541 disk.
const BLOCK_SIZE: usize = 254;

/// Blocks on an empty 1541 disk.
const DISK_BLOCKS: u16 = 664;

pub struct MemoryFile {
    pub name: &'static str,
    pub file_type: FileType,
    pub data: &'static [u8],
}

impl MemoryFile {
    fn blocks(&self) -> u16 {
        self.data.len().div_ceil(BLOCK_SIZE) as u16
    }
}

// An open channel - which file, and how far through it.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    file: usize,
    pos: usize,
}

pub struct MemoryExecutor {
    disk_name: &'static str,
    disk_id: &'static str,
    files: &'static [MemoryFile],
    open: FnvIndexMap<u8, Cursor, MAX_OPEN_CHANNELS>,
    device: Option<u8>,
    status: StatusString,
}

impl MemoryExecutor {
    pub fn new(disk_name: &'static str, disk_id: &'static str, files: &'static [MemoryFile]) -> Self {
        Self {
            disk_name,
            disk_id,
            files,
            open: FnvIndexMap::new(),
            device: None,
            status: StatusCode::Ok.render(),
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        match name.strip_suffix('*') {
            Some(prefix) => self.files.iter().position(|f| f.name.starts_with(prefix)),
            None => self.files.iter().position(|f| f.name == name),
        }
    }

    fn execute(&mut self, command: &str) -> StatusCode {
        let command = command.trim_end();
        let code = match command.as_bytes().first() {
            // Initialize, validate - nothing to do for a read-only disk
            Some(b'I') | Some(b'V') => StatusCode::Ok,
            // Scratch, rename, copy, new
            Some(b'S') | Some(b'R') | Some(b'C') | Some(b'N') => StatusCode::WriteProtectOn,
            // Reset
            Some(b'U') if matches!(command.as_bytes().get(1), Some(b'J') | Some(b'I')) => {
                StatusCode::DosVersion
            }
            _ => StatusCode::UnknownCommand,
        };
        debug!("DOS command {} status {}", command, code as u8);
        self.status = code.render();
        code
    }
}

// Strip the drive number, and anything after the name.
fn file_name(payload: &str) -> &str {
    let name = payload
        .strip_prefix("0:")
        .or_else(|| payload.strip_prefix(':'))
        .unwrap_or(payload);
    name.split(',').next().unwrap_or(name)
}

fn to_target(name: &str) -> Target {
    let mut target = Target::new();
    for c in name.chars() {
        if target.push(c).is_err() {
            break;
        }
    }
    target
}

impl Executor for MemoryExecutor {
    fn select_device(&mut self, id: u8) -> bool {
        let changed = self.device != Some(id);
        self.device = Some(id);
        changed
    }

    fn resolve(&mut self, channel: u8, payload: &[u8]) -> Resolved {
        let Ok(payload) = core::str::from_utf8(payload) else {
            warn!("Payload is not text");
            return Resolved::new(Resolution::NotFound);
        };

        if channel == CMD_CHANNEL {
            self.execute(payload);
            return Resolved::new(Resolution::Command);
        }

        if payload.starts_with('$') {
            return Resolved::new(Resolution::Directory);
        }
        if payload.eq_ignore_ascii_case("@info") {
            return Resolved::new(Resolution::DeviceInfo);
        }
        if payload.eq_ignore_ascii_case("@stat") {
            return Resolved::new(Resolution::Status);
        }

        let name = file_name(payload);
        if name.is_empty() {
            return Resolved::new(Resolution::Nothing);
        }
        match self.find(name) {
            Some(index) => Resolved {
                class: Resolution::File,
                target: to_target(self.files[index].name),
            },
            None => Resolved {
                class: Resolution::NotFound,
                target: to_target(name),
            },
        }
    }

    fn open_channel(
        &mut self,
        channel: u8,
        target: &str,
        mode: ChannelMode,
    ) -> Result<(), StatusCode> {
        if mode == ChannelMode::Write {
            return Err(StatusCode::WriteProtectOn);
        }
        let file = self.find(target).ok_or(StatusCode::FileNotFound)?;
        self.open
            .insert(channel, Cursor { file, pos: 0 })
            .map_err(|_| StatusCode::NoChannel)?;
        Ok(())
    }

    fn read_bytes(&mut self, channel: u8, buf: &mut [u8]) -> ReadChunk {
        let Some(cursor) = self.open.get_mut(&channel) else {
            return ReadChunk { len: 0, end: true };
        };
        let data = self.files[cursor.file].data;
        let remaining = &data[cursor.pos.min(data.len())..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        cursor.pos += len;
        ReadChunk {
            len,
            end: cursor.pos >= data.len(),
        }
    }

    fn write_bytes(&mut self, _channel: u8, _data: &[u8]) -> usize {
        0
    }

    fn close_channel(&mut self, channel: u8) {
        self.open.remove(&channel);
    }

    fn status_text(&self) -> Option<&str> {
        Some(self.status.as_str())
    }

    fn media_header(&self) -> (&str, &str) {
        (self.disk_name, self.disk_id)
    }

    fn read_dir_entry(&self, index: usize) -> Option<DirEntry> {
        let file = self.files.get(index)?;
        let mut name = String::new();
        for c in file.name.chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        Some(DirEntry {
            name,
            blocks: file.blocks(),
            file_type: file.file_type,
        })
    }

    fn blocks_free(&self) -> u16 {
        let used: u16 = self.files.iter().map(MemoryFile::blocks).sum();
        DISK_BLOCKS.saturating_sub(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static FILES: [MemoryFile; 2] = [
        MemoryFile {
            name: "GAME",
            file_type: FileType::Prg,
            data: &[0x01, 0x08, 0x00, 0x00],
        },
        MemoryFile {
            name: "NOTES",
            file_type: FileType::Seq,
            data: &[b'A'; 300],
        },
    ];

    fn executor() -> MemoryExecutor {
        MemoryExecutor::new("TEST DISK", "01 2A", &FILES)
    }

    #[test]
    fn resolves_names_with_prefix_and_wildcard() {
        let mut ex = executor();
        let resolved = ex.resolve(0, b"0:GAME");
        assert_eq!(resolved.class, Resolution::File);
        assert_eq!(resolved.target.as_str(), "GAME");

        let resolved = ex.resolve(2, b"NO*,S,R");
        assert_eq!(resolved.class, Resolution::File);
        assert_eq!(resolved.target.as_str(), "NOTES");

        assert_eq!(ex.resolve(0, b"*").target.as_str(), "GAME");
        assert_eq!(ex.resolve(0, b"MISSING").class, Resolution::NotFound);
        assert_eq!(ex.resolve(0, b"$").class, Resolution::Directory);
        assert_eq!(ex.resolve(3, b"@INFO").class, Resolution::DeviceInfo);
    }

    #[test]
    fn reads_file_in_chunks() {
        let mut ex = executor();
        assert_eq!(ex.open_channel(2, "NOTES", ChannelMode::Read), Ok(()));
        let mut buf = [0u8; 256];
        assert_eq!(ex.read_bytes(2, &mut buf), ReadChunk { len: 256, end: false });
        assert_eq!(ex.read_bytes(2, &mut buf), ReadChunk { len: 44, end: true });
        ex.close_channel(2);
        assert_eq!(ex.read_bytes(2, &mut buf), ReadChunk { len: 0, end: true });
    }

    #[test]
    fn refuses_writes() {
        let mut ex = executor();
        assert_eq!(
            ex.open_channel(1, "NEW", ChannelMode::Write),
            Err(StatusCode::WriteProtectOn)
        );
    }

    #[test]
    fn executes_commands() {
        let mut ex = executor();
        assert_eq!(ex.resolve(CMD_CHANNEL, b"I0").class, Resolution::Command);
        assert_eq!(ex.status_text(), Some("00, OK,00,00"));
        ex.resolve(CMD_CHANNEL, b"X");
        assert_eq!(ex.status_text(), Some("31,SYNTAX ERROR,00,00"));
    }

    #[test]
    fn counts_blocks() {
        let ex = executor();
        assert_eq!(ex.read_dir_entry(1).map(|e| e.blocks), Some(2));
        assert_eq!(ex.blocks_free(), 661);
        assert!(ex.read_dir_entry(2).is_none());
    }
}
