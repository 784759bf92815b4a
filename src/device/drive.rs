//! A disk drive, backed by an [`Executor`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt::Write;
use heapless::{String, Vec};

use crate::constants::{
    CMD_CHANNEL, DATA_CHUNK_LEN, LOAD_CHANNEL, MAX_DEVICE_ADDRESS, MIN_DEVICE_ADDRESS, PRODUCT_ID,
    SAVE_CHANNEL,
};
use crate::device::channel::{ChannelSession, ChannelTable, OpenOutcome, PENDING_LEN};
use crate::device::executor::{ChannelMode, Executor, Resolution};
use crate::device::status::{Status, StatusCode};
use crate::device::talk::TalkStream;
use crate::device::{Device, DeviceState};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::Flags;
use crate::protocol::frame::CommandFrame;
use crate::protocol::{BusError, BusPort};
use crate::util::built::PKG_VERSION;

/// Where a BASIC program is loaded on the C64.  Directory listings are sent
/// as a program at this address.
pub const BASIC_START: u16 = 0x0801;

// CBM reverse video on.
const RVS_ON: char = '\x12';

type LineText = String<40>;

pub struct Drive<E: Executor> {
    executor: E,
    channels: ChannelTable,
    status: Status,
    state: DeviceState,
}

// A mode suffix of W or A after the name opens for writing.
fn write_requested(payload: &[u8]) -> bool {
    payload
        .split(|&b| b == b',')
        .skip(1)
        .any(|part| matches!(part.first(), Some(b'W') | Some(b'A')))
}

impl<E: Executor> Drive<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            channels: ChannelTable::new(),
            status: Status::power_on(),
            state: DeviceState::Idle,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    fn close_channel(&mut self, device: u8, channel: u8) {
        if let Some(session) = self.channels.remove(device, channel) {
            if session.open {
                self.executor.close_channel(channel);
            }
            debug!("Device {} channel {} closed", device, channel);
        }
    }

    fn close_all(&mut self, device: u8) {
        for channel in self.channels.channels_of(device) {
            self.close_channel(device, channel);
        }
    }

    // Decide what an OPEN with a payload produces, opening the channel with
    // the executor if it is a file.
    fn resolve(&mut self, session: &mut ChannelSession, payload: &[u8]) -> OpenOutcome {
        let channel = session.channel;
        let resolved = self.executor.resolve(channel, payload);
        session.target = resolved.target;

        if channel != CMD_CHANNEL && payload.first() == Some(&b'$') {
            return OpenOutcome::Directory;
        }

        session.mode = if channel == SAVE_CHANNEL || write_requested(payload) {
            ChannelMode::Write
        } else {
            ChannelMode::Read
        };

        match resolved.class {
            Resolution::Command => {
                match self.executor.status_text() {
                    Some(text) => self.status.set_text(text),
                    None => self.status.set(StatusCode::Ok),
                }
                OpenOutcome::Status
            }
            Resolution::Directory => OpenOutcome::Directory,
            Resolution::Status => OpenOutcome::Status,
            Resolution::DeviceInfo => OpenOutcome::DeviceInfo,
            Resolution::Nothing => OpenOutcome::Nothing,
            Resolution::NotFound if session.mode == ChannelMode::Read => {
                self.status.set(StatusCode::FileNotFound);
                OpenOutcome::Error
            }
            Resolution::File | Resolution::NotFound => {
                match self
                    .executor
                    .open_channel(channel, &session.target, session.mode)
                {
                    Ok(()) => {
                        session.open = true;
                        OpenOutcome::File
                    }
                    Err(code) => {
                        self.status.set(code);
                        OpenOutcome::Error
                    }
                }
            }
        }
    }

    // Sends `pending` and then the rest of the file.  On failure `unsent`
    // holds the bytes read which were never queued.
    async fn send_file<P: BusPort>(
        &mut self,
        stream: &mut TalkStream<'_, P>,
        channel: u8,
        pending: &[u8],
        unsent: &mut Vec<u8, PENDING_LEN>,
    ) -> Result<(), BusError> {
        push_keeping(stream, pending, unsent).await?;

        let mut buf = [0u8; DATA_CHUNK_LEN];
        loop {
            let chunk = self.executor.read_bytes(channel, &mut buf);
            push_keeping(stream, &buf[..chunk.len], unsent).await?;
            if chunk.end || chunk.len == 0 {
                return Ok(());
            }
        }
    }

    async fn send_directory<P: BusPort>(
        &mut self,
        stream: &mut TalkStream<'_, P>,
    ) -> Result<(), BusError> {
        let mut next = BASIC_START;
        stream.push_all(&BASIC_START.to_le_bytes()).await?;

        let mut text = LineText::new();
        let (name, id) = self.executor.media_header();
        let _ = write!(text, "{}\"{:<16}\" {}", RVS_ON, name, id);
        send_line(stream, &mut next, 0, &text).await?;

        let mut index = 0;
        while let Some(entry) = self.executor.read_dir_entry(index) {
            let mut quoted = String::<18>::new();
            let _ = write!(quoted, "\"{}\"", entry.name);
            let pad = match entry.blocks {
                0..=9 => 3,
                10..=99 => 2,
                100..=999 => 1,
                _ => 0,
            };
            text.clear();
            let _ = write!(
                text,
                "{:pad$}{:<18} {}",
                "",
                quoted.as_str(),
                entry.file_type.as_str(),
                pad = pad
            );
            send_line(stream, &mut next, entry.blocks, &text).await?;
            index += 1;
        }

        send_line(stream, &mut next, self.executor.blocks_free(), "BLOCKS FREE.").await?;

        // End of program
        stream.push_all(&[0, 0]).await
    }
}

async fn push_keeping<P: BusPort>(
    stream: &mut TalkStream<'_, P>,
    bytes: &[u8],
    unsent: &mut Vec<u8, PENDING_LEN>,
) -> Result<(), BusError> {
    for (ii, &byte) in bytes.iter().enumerate() {
        if let Err(e) = stream.push(byte).await {
            unsent.clear();
            let _ = unsent.extend_from_slice(&bytes[ii..]);
            return Err(e);
        }
    }
    Ok(())
}

// A BASIC line: pointer to the next line, line number, text, terminator.
async fn send_line<P: BusPort>(
    stream: &mut TalkStream<'_, P>,
    next: &mut u16,
    number: u16,
    text: &str,
) -> Result<(), BusError> {
    *next = next.wrapping_add(text.len() as u16 + 5);
    stream.push_all(&next.to_le_bytes()).await?;
    stream.push_all(&number.to_le_bytes()).await?;
    stream.push_all(text.as_bytes()).await?;
    stream.push(0).await
}

impl<E: Executor> Device for Drive<E> {
    fn state(&self) -> DeviceState {
        self.state
    }

    fn set_state(&mut self, state: DeviceState) {
        self.state = state;
    }

    fn reset(&mut self) {
        for device in MIN_DEVICE_ADDRESS..=MAX_DEVICE_ADDRESS {
            self.close_all(device);
        }
        self.channels.clear();
        self.status = Status::power_on();
        self.state = DeviceState::Idle;
    }

    async fn handle_open<P: BusPort>(&mut self, _port: &mut P, frame: &CommandFrame) {
        let device = frame.device;
        let channel = frame.channel;

        if self.executor.select_device(device) {
            debug!("Device {} configuration selected", device);
        }

        // Reopening a channel closes whatever it had open
        self.close_channel(device, channel);

        let mut session = ChannelSession::new(channel, OpenOutcome::Status);
        if !frame.payload.is_empty() {
            session.outcome = self.resolve(&mut session, &frame.payload);
        }
        debug!(
            "Device {} channel {} opened {:?}",
            device,
            channel,
            session.outcome
        );

        if let Err(session) = self.channels.insert(device, session) {
            warn!("No free channel for device {}", device);
            if session.open {
                self.executor.close_channel(channel);
            }
            self.status.set(StatusCode::NoChannel);
        }
    }

    async fn handle_close<P: BusPort>(&mut self, _port: &mut P, frame: &CommandFrame) {
        // Closing the command channel closes everything
        if frame.is_command_channel() {
            self.close_all(frame.device);
        } else {
            self.close_channel(frame.device, frame.channel);
        }
    }

    async fn handle_listen_data<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        let device = frame.device;
        let channel = frame.channel;
        let writing = match self.channels.get(device, channel) {
            Some(s) => s.open && s.mode == ChannelMode::Write,
            None => {
                self.status.set(StatusCode::FileNotOpen);
                false
            }
        };
        if !writing {
            debug!("Device {} channel {} not open for writing", device, channel);
        }

        let mut buf: Vec<u8, DATA_CHUNK_LEN> = Vec::new();
        let mut written = 0;
        let mut short = false;
        loop {
            match port.receive_byte().await {
                Ok(byte) => {
                    if writing {
                        let _ = buf.push(byte);
                        if buf.is_full() {
                            let accepted = self.executor.write_bytes(channel, &buf);
                            short |= accepted < buf.len();
                            written += accepted;
                            buf.clear();
                        }
                    }
                    if port.flags().contains(Flags::EOI_RECVD) {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Listen data ended {:?}", e);
                    break;
                }
            }
        }

        if writing {
            if !buf.is_empty() {
                let accepted = self.executor.write_bytes(channel, &buf);
                short |= accepted < buf.len();
                written += accepted;
            }
            if short {
                self.status.set(StatusCode::NoBlock);
            }
            if let Some(session) = self.channels.get_mut(device, channel) {
                session.cursor += written;
            }
            trace!("Wrote {} bytes to channel {}", written, channel);
        }
    }

    async fn handle_talk<P: BusPort>(&mut self, port: &mut P, frame: &CommandFrame) {
        let device = frame.device;
        let channel = frame.channel;
        let outcome = self.channels.get(device, channel).map(|s| s.outcome);

        let mut stream = TalkStream::new(port);
        let mut unsent: Vec<u8, PENDING_LEN> = Vec::new();
        let result = match outcome {
            None => {
                warn!("Device {} channel {} not open", device, channel);
                self.status.set(StatusCode::FileNotOpen);
                Ok(())
            }
            Some(OpenOutcome::Status) => {
                let text = self.status.take();
                stream.push_all(text.as_bytes()).await
            }
            Some(OpenOutcome::File) => {
                let pending = self
                    .channels
                    .get_mut(device, channel)
                    .map(|s| core::mem::take(&mut s.pending))
                    .unwrap_or_default();
                self.send_file(&mut stream, channel, &pending, &mut unsent)
                    .await
            }
            Some(OpenOutcome::Directory) => self.send_directory(&mut stream).await,
            Some(OpenOutcome::DeviceInfo) => {
                let mut text = LineText::new();
                let _ = write!(text, "{} {} #{}\r", PRODUCT_ID, PKG_VERSION, device);
                stream.push_all(text.as_bytes()).await
            }
            Some(OpenOutcome::Nothing) | Some(OpenOutcome::Error) => Ok(()),
        };

        let result = match result {
            Ok(()) => stream.finish().await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => (),
            Err(BusError::Attention) => debug!("Talk interrupted by ATN"),
            Err(e) => warn!("Talk failed {:?}", e),
        }

        // A file's unacknowledged bytes go first on the next TALK
        let sent = stream.sent();
        let held = stream.take_held();
        if let Some(session) = self.channels.get_mut(device, channel) {
            session.cursor += sent;
            if result == Err(BusError::Attention) && session.outcome == OpenOutcome::File {
                session.pending.clear();
                if let Some(byte) = held {
                    let _ = session.pending.push(byte);
                }
                let _ = session.pending.extend_from_slice(&unsent);
                debug!("Channel {} keeps {} unsent bytes", channel, session.pending.len());
            }
        }

        if channel == LOAD_CHANNEL || channel == SAVE_CHANNEL {
            self.close_channel(device, channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::executor::FileType;
    use crate::device::memory::{MemoryExecutor, MemoryFile};
    use crate::protocol::frame::{PrimaryCommand, SecondaryCommand};
    use crate::protocol::FlagsRegister;
    use crate::sim::ScriptedPort;
    use embassy_futures::block_on;

    static FILES: [MemoryFile; 2] = [
        MemoryFile {
            name: "GAME",
            file_type: FileType::Prg,
            data: &[0x01, 0x08, 0xAA, 0x55],
        },
        MemoryFile {
            name: "NOTES",
            file_type: FileType::Seq,
            data: b"HELLO",
        },
    ];

    fn drive() -> Drive<MemoryExecutor> {
        Drive::new(MemoryExecutor::new("TEST DISK", "01 2A", &FILES))
    }

    fn frame(
        primary: PrimaryCommand,
        secondary: SecondaryCommand,
        channel: u8,
        payload: &[u8],
    ) -> CommandFrame {
        let mut frame = CommandFrame::new();
        frame.address(primary, 8);
        frame.secondary = Some(secondary);
        frame.channel = channel;
        frame.payload.extend_from_slice(payload).unwrap();
        frame
    }

    fn open(drive: &mut Drive<MemoryExecutor>, port: &mut ScriptedPort, channel: u8, name: &[u8]) {
        let f = frame(PrimaryCommand::Listen, SecondaryCommand::Open, channel, name);
        assert_eq!(block_on(drive.process(port, &f)), DeviceState::Idle);
    }

    fn talk(drive: &mut Drive<MemoryExecutor>, port: &mut ScriptedPort, channel: u8) {
        let f = frame(PrimaryCommand::Talk, SecondaryCommand::Reopen, channel, b"");
        assert_eq!(block_on(drive.process(port, &f)), DeviceState::Idle);
    }

    #[test]
    fn loads_file_and_closes_channel() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 0, b"0:GAME");
        assert_eq!(drive.channels().get(8, 0).map(|s| s.outcome), Some(OpenOutcome::File));

        talk(&mut drive, &mut port, 0);
        assert_eq!(
            port.sent(),
            &[(0x01, false), (0x08, false), (0xAA, false), (0x55, true)]
        );
        assert!(drive.channels().is_empty());
    }

    #[test]
    fn missing_file_sets_status_and_sends_nothing() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 0, b"MISSING");
        talk(&mut drive, &mut port, 0);
        assert!(port.sent().is_empty());

        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert_eq!(port.sent_data().as_slice(), b"62,FILE NOT FOUND,00,00");
        assert_eq!(port.sent().last(), Some(&(b'0', true)));

        // Status is read once
        let before = port.sent().len();
        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert_eq!(&port.sent_data()[before..], b"00, OK,00,00");
    }

    #[test]
    fn power_on_status_is_dos_version() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert!(port.sent_data().starts_with(b"73,PICO1541"));
    }

    #[test]
    fn dos_command_status_comes_from_executor() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        let f = frame(PrimaryCommand::Listen, SecondaryCommand::Reopen, CMD_CHANNEL, b"X");
        assert_eq!(block_on(drive.process(&mut port, &f)), DeviceState::Idle);
        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert_eq!(port.sent_data().as_slice(), b"31,SYNTAX ERROR,00,00");
    }

    #[test]
    fn directory_is_a_basic_program() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 0, b"$");
        talk(&mut drive, &mut port, 0);
        let sent = port.sent_data();

        // Load address, then the header line's next pointer: the header
        // text is RVS, 18 quoted characters, a space and the 5 character id.
        assert_eq!(&sent[..2], &[0x01, 0x08]);
        let header_len = 1 + 18 + 1 + 5;
        let next = BASIC_START + header_len + 5;
        assert_eq!(&sent[2..4], &next.to_le_bytes());
        assert_eq!(&sent[4..6], &[0, 0]);
        assert_eq!(sent[6], 0x12);
        assert_eq!(&sent[7..25], b"\"TEST DISK       \"");

        // First entry, at the next pointer
        let entry = &sent[2 + header_len as usize + 5..];
        assert_eq!(&entry[2..4], &[1, 0]);
        let mut text = b"   \"GAME\"".to_vec();
        text.extend_from_slice(&[b' '; 13]);
        text.extend_from_slice(b"PRG\0");
        assert_eq!(&entry[4..4 + text.len()], text.as_slice());

        assert!(port.sent().ends_with(&[(0, false), (0, true)]));
        assert!(drive.channels().is_empty());
    }

    #[test]
    fn writes_refused_and_data_drained() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 1, b"NEWFILE");
        port.data(b"DATA");
        let f = frame(PrimaryCommand::Listen, SecondaryCommand::Reopen, 1, b"");
        assert_eq!(block_on(drive.process(&mut port, &f)), DeviceState::Idle);
        assert_eq!(port.remaining(), 0);

        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert_eq!(port.sent_data().as_slice(), b"26,WRITE PROTECT ON,00,00");
    }

    #[test]
    fn talk_without_open_is_file_not_open() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        talk(&mut drive, &mut port, 3);
        assert!(port.sent().is_empty());
        talk(&mut drive, &mut port, CMD_CHANNEL);
        assert_eq!(port.sent_data().as_slice(), b"61,FILE NOT OPEN,00,00");
    }

    #[test]
    fn reopening_replaces_session() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 2, b"GAME");
        open(&mut drive, &mut port, 2, b"NOTES");
        assert_eq!(drive.channels().len(), 1);
        assert_eq!(
            drive.channels().get(8, 2).map(|s| s.target.as_str()),
            Some("NOTES")
        );

        // A data channel stays open after talking
        talk(&mut drive, &mut port, 2);
        assert_eq!(port.sent_data().as_slice(), b"HELLO");
        assert_eq!(drive.channels().get(8, 2).map(|s| s.cursor), Some(5));

        let close = frame(PrimaryCommand::Listen, SecondaryCommand::Close, 2, b"");
        assert_eq!(block_on(drive.process(&mut port, &close)), DeviceState::Idle);
        assert!(drive.channels().is_empty());
    }

    #[test]
    fn interrupted_talk_resumes_where_it_stopped() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        open(&mut drive, &mut port, 2, b"NOTES");

        // The controller asserts ATN before the first byte is acknowledged
        port.atn(&[0x5F]);
        talk(&mut drive, &mut port, 2);
        assert!(port.sent().is_empty());
        assert_eq!(
            drive.channels().get(8, 2).map(|s| s.pending.as_slice()),
            Some(&b"HELLO"[..])
        );

        // UNTALK, then TALK the channel again
        assert_eq!(block_on(port.receive_byte()), Ok(0x5F));
        talk(&mut drive, &mut port, 2);
        assert_eq!(port.sent_data().as_slice(), b"HELLO");
        assert_eq!(port.sent().last(), Some(&(b'O', true)));

        let session = drive.channels().get(8, 2).unwrap();
        assert!(session.pending.is_empty());
        assert_eq!(session.cursor, 5);
    }

    #[test]
    fn unsupported_frame_keeps_state() {
        let flags = FlagsRegister::new();
        let mut port = ScriptedPort::new(&flags);
        let mut drive = drive();

        let mut f = frame(PrimaryCommand::Listen, SecondaryCommand::Open, 0, b"");
        f.primary = Some(PrimaryCommand::Unlisten);
        assert_eq!(block_on(drive.process(&mut port, &f)), DeviceState::Active);
        assert_eq!(drive.state(), DeviceState::Active);
    }
}
