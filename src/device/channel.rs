//! Open channel sessions.
//!
//! Each session is keyed by device and channel, so a drive keeps separate
//! sessions if it is moved to a different address.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::{FnvIndexMap, Vec};

use crate::constants::{DATA_CHUNK_LEN, MAX_OPEN_CHANNELS};
use crate::device::executor::{ChannelMode, Target};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};

/// What a TALK on a channel will produce, decided when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenOutcome {
    Nothing,
    File,
    Directory,
    Status,
    DeviceInfo,
    Error,
}

/// Bytes read from the executor that a TALK didn't get to send: at most a
/// chunk's tail plus the byte held back for EOI.
pub const PENDING_LEN: usize = DATA_CHUNK_LEN + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSession {
    pub channel: u8,
    pub outcome: OpenOutcome,
    pub target: Target,
    pub mode: ChannelMode,

    /// Whether the executor has this channel open.
    pub open: bool,

    /// Bytes transferred since the channel was opened.
    pub cursor: usize,

    /// Bytes to send before reading more from the executor, left over when
    /// ATN cut a TALK short.
    pub pending: Vec<u8, PENDING_LEN>,
}

impl ChannelSession {
    pub fn new(channel: u8, outcome: OpenOutcome) -> Self {
        Self {
            channel,
            outcome,
            target: Target::new(),
            mode: ChannelMode::Read,
            open: false,
            cursor: 0,
            pending: Vec::new(),
        }
    }
}

/// The full session table.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    sessions: FnvIndexMap<u16, ChannelSession, MAX_OPEN_CHANNELS>,
}

fn key(device: u8, channel: u8) -> u16 {
    u16::from(device) * 100 + u16::from(channel)
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, returning any session it replaced.
    ///
    /// # Returns
    /// - `Ok(Option<ChannelSession>)` - the session was added
    /// - `Err(ChannelSession)` - the table is full
    pub fn insert(
        &mut self,
        device: u8,
        session: ChannelSession,
    ) -> Result<Option<ChannelSession>, ChannelSession> {
        self.sessions
            .insert(key(device, session.channel), session)
            .map_err(|(_, session)| session)
    }

    pub fn get(&self, device: u8, channel: u8) -> Option<&ChannelSession> {
        self.sessions.get(&key(device, channel))
    }

    pub fn get_mut(&mut self, device: u8, channel: u8) -> Option<&mut ChannelSession> {
        self.sessions.get_mut(&key(device, channel))
    }

    pub fn remove(&mut self, device: u8, channel: u8) -> Option<ChannelSession> {
        self.sessions.remove(&key(device, channel))
    }

    /// The channels with sessions on `device`.
    pub fn channels_of(&self, device: u8) -> Vec<u8, MAX_OPEN_CHANNELS> {
        self.sessions
            .iter()
            .filter(|(k, _)| **k / 100 == u16::from(device))
            .map(|(_, s)| s.channel)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_per_device_and_channel() {
        let mut table = ChannelTable::new();
        assert_eq!(table.insert(8, ChannelSession::new(2, OpenOutcome::File)), Ok(None));
        assert_eq!(table.insert(9, ChannelSession::new(2, OpenOutcome::Directory)), Ok(None));

        assert_eq!(table.get(8, 2).map(|s| s.outcome), Some(OpenOutcome::File));
        assert_eq!(table.get(9, 2).map(|s| s.outcome), Some(OpenOutcome::Directory));
        assert!(table.get(8, 3).is_none());
        assert_eq!(table.channels_of(8).as_slice(), &[2]);

        let replaced = table.insert(8, ChannelSession::new(2, OpenOutcome::Status));
        assert_eq!(replaced.ok().flatten().map(|s| s.outcome), Some(OpenOutcome::File));
        assert_eq!(table.len(), 2);

        assert!(table.remove(8, 2).is_some());
        assert!(table.remove(8, 2).is_none());
    }

    #[test]
    fn full_table_rejects_new_sessions() {
        let mut table = ChannelTable::new();
        for channel in 0..MAX_OPEN_CHANNELS as u8 {
            assert!(table.insert(8, ChannelSession::new(channel, OpenOutcome::File)).is_ok());
        }
        assert!(table.insert(9, ChannelSession::new(0, OpenOutcome::File)).is_err());
        // Replacing an existing session still works
        assert!(table.insert(8, ChannelSession::new(0, OpenOutcome::Status)).is_ok());
    }
}
