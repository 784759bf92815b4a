//! The bus engine.
//!
//! [`BusEngine::service`] runs one protocol cycle: it reads command bytes
//! while ATN is asserted, assembling a [`CommandFrame`], then reads any
//! filename or turns the bus around, and hands the completed frame to the
//! addressed device.  It repeats while the controller keeps asserting ATN,
//! and always finishes with the bus Idle (or Offline) and every line
//! released.
//!
//! [`BusEngine::on_attention_edge`] is the only thing done in response to
//! ATN falling before `service()` runs - it has to answer within 1ms, so it
//! only moves the lines into listener posture.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::{Duration, with_timeout};
use heapless::Vec;

use crate::config::BusConfig;
use crate::constants::{MAX_DEVICES, MAX_PAYLOAD_LEN};
use crate::device::{Device, DeviceState};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::protocol::flags::Flags;
use crate::protocol::frame::{BusState, Command, CommandFrame, PrimaryCommand, SecondaryCommand};
use crate::protocol::line::{Line, LineState};
use crate::protocol::{BusError, BusPort};
use crate::registry::{DeviceRegistry, RegistryError};

// Padding the C64 may append to a filename.
const SHIFTED_SPACE: u8 = 0xA0;

pub struct BusEngine<P: BusPort, T: Device, const N: usize = MAX_DEVICES> {
    port: P,
    registry: DeviceRegistry<T, N>,
    config: BusConfig,
    frame: CommandFrame,
    state: BusState,
    enabled: bool,
}

impl<P: BusPort, T: Device, const N: usize> BusEngine<P, T, N> {
    pub fn new(port: P, config: BusConfig) -> Self {
        Self {
            port,
            registry: DeviceRegistry::new(),
            config,
            frame: CommandFrame::new(),
            state: BusState::Idle,
            enabled: true,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn frame(&self) -> &CommandFrame {
        &self.frame
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn registry(&self) -> &DeviceRegistry<T, N> {
        &self.registry
    }

    pub fn device(&self, address: u8) -> Option<&T> {
        self.registry.device_by_id(address)
    }

    pub fn device_mut(&mut self, address: u8) -> Option<&mut T> {
        self.registry.device_by_id_mut(address)
    }

    fn sync_enabled_mask(&mut self) {
        self.port.set_enabled_mask(self.registry.enabled_mask());
    }

    /// Register a device and enable it.
    pub fn add(&mut self, address: u8, device: T) -> Result<(), RegistryError> {
        self.registry.add(address, device)?;
        self.registry.enable(address)?;
        self.sync_enabled_mask();
        info!("Device {} added", address);
        Ok(())
    }

    pub fn remove(&mut self, address: u8) -> Result<T, RegistryError> {
        let device = self.registry.remove(address)?;
        self.sync_enabled_mask();
        info!("Device {} removed", address);
        Ok(device)
    }

    pub fn enable(&mut self, address: u8) -> Result<(), RegistryError> {
        self.registry.enable(address)?;
        self.sync_enabled_mask();
        Ok(())
    }

    pub fn disable(&mut self, address: u8) {
        self.registry.disable(address);
        self.sync_enabled_mask();
    }

    /// Turn the whole engine on or off.  When off, `service()` does
    /// nothing.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.enabled {
            info!("Bus engine {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
        if !enabled {
            self.port.release_all();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Respond to ATN falling.  Every device on the bus must answer with
    /// DATA asserted, whether or not it is addressed.
    pub fn on_attention_edge(&mut self) {
        self.port.listen_posture();
        self.port.flags().raise_attention();
        if self.state < BusState::Active {
            self.state = BusState::Active;
        }
    }

    /// Wait for an ATN edge, or for `timeout` to pass.  Handles the edge if
    /// there was one.  ATN already asserted counts as an edge, as it may
    /// have fallen while we weren't waiting.
    ///
    /// # Returns
    /// Whether there was an edge.
    pub async fn wait_attention(&mut self, timeout: Duration) -> bool {
        if self.port.is_asserted(Line::Atn) {
            self.on_attention_edge();
            return true;
        }
        match with_timeout(timeout, self.port.attention_edge()).await {
            Ok(()) => {
                self.on_attention_edge();
                true
            }
            Err(_) => false,
        }
    }

    /// Run one protocol cycle.
    ///
    /// # Returns
    /// The bus state, which is always Idle or Offline.
    pub async fn service(&mut self) -> BusState {
        if !self.enabled {
            return self.state;
        }

        if self.port.has_reset() && self.port.is_asserted(Line::Reset) {
            self.handle_reset();
            return self.state;
        }

        // Polled backends see ATN held without an edge
        let atn_held = self.state == BusState::Idle && self.port.is_asserted(Line::Atn);
        if (self.port.flags().take_attention() || atn_held) && self.state < BusState::Active {
            self.state = BusState::Active;
        }
        if self.state < BusState::Active {
            return self.state;
        }

        // Busy
        self.port.assert(Line::Srq);

        let mut empty = false;
        while self.state > BusState::Idle {
            match self.state {
                BusState::Active => {
                    self.port.listen_posture();
                    empty = self.read_command().await;
                }
                BusState::Process => self.process().await,
                _ => break,
            }

            // The controller may go straight on to the next command.  After
            // an empty stream only a fresh ATN edge counts.
            if self.state == BusState::Idle
                && self.port.is_asserted(Line::Atn)
                && (!empty || self.port.flags().take_attention())
            {
                self.state = BusState::Active;
            }
        }

        if matches!(self.state, BusState::Error | BusState::Reset) {
            debug!("Cycle ended in {:?}", self.state);
            self.state = BusState::Idle;
            self.frame.init();
        }

        self.port.release_all();
        self.port.flags().clear_all();
        self.port.restore_default_strategy();
        self.state
    }

    fn handle_reset(&mut self) {
        // An unpowered controller holds both ATN and RESET low
        if self.port.is_asserted(Line::Atn) {
            if self.state != BusState::Offline {
                info!("Controller offline");
            }
            self.state = BusState::Offline;
        } else {
            info!("Bus reset");
            self.registry.reset_all();
            self.state = BusState::Idle;
        }
        self.frame.init();
        self.port.release_all();
        self.port.flags().clear_all();
        self.port.restore_default_strategy();
    }

    // Read command bytes until ATN is released or the frame is complete.
    // Returns whether the talker signalled an empty stream.
    async fn read_command(&mut self) -> bool {
        let mut empty = false;
        while self.state == BusState::Active {
            if !self.port.is_asserted(Line::Atn) {
                self.state = match self.frame.primary {
                    Some(PrimaryCommand::Listen) | Some(PrimaryCommand::Talk) => BusState::Process,
                    _ => BusState::Idle,
                };
                break;
            }

            match self.port.receive_byte().await {
                Ok(byte) => {
                    let command = Command::decode(byte);
                    match command.next_state() {
                        Some(next) => {
                            trace!("Command 0x{:02x} {:?}", byte, command);
                            self.frame.apply(command);
                            self.state = next;
                        }
                        None => warn!("Unknown command byte 0x{:02x}", byte),
                    }
                }
                Err(BusError::EmptyStream) => {
                    empty = true;
                    self.state = BusState::Idle;
                }
                Err(BusError::Disconnected) => self.state = BusState::Offline,
                Err(e) => {
                    debug!("Command read failed {:?}", e);
                    self.state = BusState::Error;
                }
            }
        }

        if self.state >= BusState::Active && !self.registry.is_enabled(self.frame.device) {
            trace!("Not for us, device {}", self.frame.device);
            self.state = BusState::Idle;
        }
        if self.state < BusState::Active {
            self.frame.init();
        }
        empty
    }

    async fn process(&mut self) {
        if matches!(
            self.frame.secondary,
            Some(SecondaryCommand::Open) | Some(SecondaryCommand::Reopen)
        ) {
            self.port.select_strategy(self.frame.device);
        }

        match self.frame.primary {
            Some(PrimaryCommand::Listen) => self.device_listen().await,
            Some(PrimaryCommand::Talk) => self.device_talk().await,
            _ => {
                self.frame.init();
                self.state = BusState::Idle;
                return;
            }
        }

        if self.state == BusState::Process {
            let result = self.registry.dispatch(&mut self.port, &self.frame).await;
            if result == DeviceState::Idle {
                self.frame.init();
            } else {
                debug!("Device {} left {:?}, frame kept", self.frame.device, result);
            }
            self.state = BusState::Idle;
        }
    }

    async fn atn_released(&mut self) -> bool {
        self.port
            .wait_for(Line::Atn, LineState::Released, self.config.payload_atn_window)
            .await
            .is_ok()
    }

    async fn device_listen(&mut self) {
        let reopen_data =
            self.frame.secondary == Some(SecondaryCommand::Reopen) && !self.frame.is_command_channel();

        match self.frame.secondary {
            // The device pulls the data itself
            Some(SecondaryCommand::Reopen) if reopen_data => {
                if !self.atn_released().await {
                    debug!("Data channel {} with ATN held", self.frame.channel);
                    self.state = BusState::Idle;
                }
            }
            Some(SecondaryCommand::Open) | Some(SecondaryCommand::Reopen) => {
                // Without ATN released, there's no filename
                if self.atn_released().await {
                    self.read_payload().await;
                }
            }
            Some(SecondaryCommand::Close) => (),
            None => self.state = BusState::Error,
        }
    }

    // Read a filename or command.  It ends with EOI, or with the controller
    // asserting ATN to send UNLISTEN.
    async fn read_payload(&mut self) {
        let mut payload: Vec<u8, MAX_PAYLOAD_LEN> = Vec::new();
        while !self.port.is_asserted(Line::Atn) {
            match self.port.receive_byte().await {
                Ok(byte) => {
                    if byte != b'\r' && payload.push(byte).is_err() {
                        warn!("Payload too long, truncated");
                    }
                    if self.port.flags().contains(Flags::EOI_RECVD) {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Payload read failed {:?}", e);
                    self.state = BusState::Error;
                    return;
                }
            }
        }

        while payload.last() == Some(&SHIFTED_SPACE) {
            payload.pop();
        }
        trace!("Payload {} bytes", payload.len());
        self.frame.payload = payload;
    }

    async fn device_talk(&mut self) {
        if self.frame.secondary == Some(SecondaryCommand::Close) {
            return;
        }
        if let Err(e) = self.port.turn_around(&self.config).await {
            warn!("Turnaround failed {:?}", e);
            self.state = BusState::Error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::executor::FileType;
    use crate::device::{Drive, MemoryExecutor, MemoryFile};
    use crate::protocol::port::IecPort;
    use crate::protocol::FlagsRegister;
    use crate::registry::tests::Recorder;
    use crate::sim::{ScriptedPort, SimLines};
    use embassy_futures::block_on;
    use crate::protocol::line::LineDriver;

    type Engine<'a, T> = BusEngine<ScriptedPort<'a>, T>;

    fn engine<T: Device>(flags: &FlagsRegister) -> Engine<'_, T> {
        BusEngine::new(ScriptedPort::new(flags), BusConfig::default())
    }

    fn run<T: Device>(engine: &mut Engine<'_, T>) -> BusState {
        engine.on_attention_edge();
        block_on(engine.service())
    }

    static ONE_BYTE: [MemoryFile; 2] = [
        MemoryFile {
            name: "X",
            file_type: FileType::Prg,
            data: &[0x42],
        },
        MemoryFile {
            name: "ABC",
            file_type: FileType::Prg,
            data: b"abc",
        },
    ];

    fn drive() -> Drive<MemoryExecutor> {
        Drive::new(MemoryExecutor::new("TEST", "01 2A", &ONE_BYTE))
    }

    #[test]
    fn open_with_filename_dispatched_once() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine
            .port_mut()
            .atn(&[0x28, 0xF0])
            .data(b"0:GAME\r")
            .atn(&[0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);

        let device = engine.device(8).unwrap();
        assert_eq!(device.opens, 1);
        assert_eq!(device.frames.len(), 1);
        let frame = &device.frames[0];
        assert_eq!(frame.primary, Some(PrimaryCommand::Listen));
        assert_eq!(frame.device, 8);
        assert_eq!(frame.secondary, Some(SecondaryCommand::Open));
        assert_eq!(frame.channel, 0);
        assert_eq!(frame.payload.as_slice(), b"0:GAME");
        assert_eq!(engine.port().remaining(), 0);
    }

    #[test]
    fn filename_padding_removed() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine
            .port_mut()
            .atn(&[0x28, 0xF2])
            .data(b"NAME\xA0\xA0")
            .atn(&[0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);
        let device = engine.device(8).unwrap();
        assert_eq!(device.frames[0].payload.as_slice(), b"NAME");
    }

    #[test]
    fn other_devices_ignored() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        for address in 8..=11 {
            engine.add(address, Recorder::default()).unwrap();
        }
        assert_eq!(engine.port().enabled_mask(), 0x0F00);
        engine.port_mut().atn(&[0x2F, 0xF2]).data(b"X").atn(&[0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);
        for address in 8..=11 {
            assert!(engine.device(address).unwrap().frames.is_empty());
        }
    }

    #[test]
    fn status_channel_open_under_continuous_atn() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x28, 0x6F, 0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);
        let device = engine.device(8).unwrap();
        assert_eq!(device.opens, 1);
        assert!(device.frames[0].payload.is_empty());
        assert!(device.frames[0].is_command_channel());
    }

    #[test]
    fn load_one_byte_file() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, drive()).unwrap();
        engine
            .port_mut()
            .atn(&[0x28, 0xF0])
            .data(b"X")
            .atn(&[0x3F, 0x48, 0x60]);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(engine.port().sent(), &[(0x42, true)]);
        assert_eq!(engine.port().strategies()[0].0, 8);
    }

    #[test]
    fn load_marks_only_last_byte() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, drive()).unwrap();
        engine
            .port_mut()
            .atn(&[0x28, 0xF0])
            .data(b"ABC")
            .atn(&[0x3F, 0x48, 0x60]);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(
            engine.port().sent(),
            &[(b'a', false), (b'b', false), (b'c', true)]
        );
    }

    #[test]
    fn always_ends_idle_with_lines_released() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x28, 0xF0]).fail(BusError::Timeout);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert!(engine.frame().primary.is_none());
        for line in [Line::ClockOut, Line::DataOut, Line::Srq] {
            assert!(!engine.port().is_asserted(line));
        }
        assert!(flags.get().is_empty());
    }

    #[test]
    fn unknown_command_byte_skipped() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x28, 0x80, 0xF2]).data(b"F").atn(&[0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(engine.device(8).unwrap().frames[0].channel, 2);
    }

    #[test]
    fn turnaround_failure_skips_talk() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x48, 0x60]).set_clock_stuck(true);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(engine.device(8).unwrap().talks, 0);
        assert!(engine.port().sent().is_empty());
    }

    #[test]
    fn reset_resets_devices() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().set_reset(true);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(engine.device(8).unwrap().resets, 1);
    }

    #[test]
    fn powered_off_controller_is_offline() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().set_reset(true).atn(&[0x28]);

        assert_eq!(run(&mut engine), BusState::Offline);
        assert_eq!(engine.device(8).unwrap().resets, 0);

        // Stays offline until ATN falls again
        engine.port_mut().set_reset(false);
        assert_eq!(block_on(engine.service()), BusState::Offline);
        engine.port_mut().atn(&[0x3F]);
        assert_eq!(run(&mut engine), BusState::Idle);
    }

    #[test]
    fn disabled_engine_does_nothing() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.set_enabled(false);
        engine.port_mut().atn(&[0x28, 0xF0]);

        block_on(engine.service());
        assert_eq!(engine.port().remaining(), 2);
    }

    #[test]
    fn removed_device_no_longer_acknowledged() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.add(9, Recorder::default()).unwrap();
        assert!(engine.remove(8).is_ok());
        assert_eq!(engine.port().enabled_mask(), 1 << 9);
        engine.disable(9);
        assert_eq!(engine.port().enabled_mask(), 0);
    }

    #[test]
    fn atn_already_asserted_counts_as_edge() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x28, 0x6F, 0x3F]);

        // ScriptedPort never reports an edge, only the level
        assert!(block_on(engine.wait_attention(Duration::from_millis(10))));
        assert_eq!(engine.state(), BusState::Active);
        assert!(engine.port().is_asserted(Line::DataOut));

        assert_eq!(block_on(engine.service()), BusState::Idle);
        assert_eq!(engine.device(8).unwrap().opens, 1);
    }

    #[test]
    fn empty_stream_under_atn_goes_idle() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine
            .port_mut()
            .atn(&[0x28])
            .fail(BusError::EmptyStream)
            .atn(&[0x3F]);

        // ATN is still held, but it takes a new edge to read on
        assert_eq!(run(&mut engine), BusState::Idle);
        assert!(engine.frame().primary.is_none());
        assert!(engine.device(8).unwrap().frames.is_empty());
        assert_eq!(engine.port().remaining(), 1);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert_eq!(engine.port().remaining(), 0);
    }

    #[test]
    fn disconnect_during_command_is_offline() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(8, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x28]).fail(BusError::Disconnected);

        assert_eq!(run(&mut engine), BusState::Offline);
        assert!(engine.frame().primary.is_none());
        assert!(engine.device(8).unwrap().frames.is_empty());
        assert_eq!(block_on(engine.service()), BusState::Offline);
    }

    #[test]
    fn failed_payload_read_is_not_dispatched() {
        for err in [BusError::EmptyStream, BusError::Timeout] {
            let flags = FlagsRegister::new();
            let mut engine = engine(&flags);
            engine.add(8, Recorder::default()).unwrap();
            engine.port_mut().atn(&[0x28, 0xF0]).fail(err).atn(&[0x3F]);

            assert_eq!(run(&mut engine), BusState::Idle);
            assert_eq!(engine.device(8).unwrap().opens, 0);
            assert!(engine.frame().primary.is_none());
            assert_eq!(engine.port().remaining(), 1);
        }
    }

    #[test]
    fn device_above_fifteen_is_not_addressable() {
        let flags = FlagsRegister::new();
        let mut engine = engine(&flags);
        engine.add(20, Recorder::default()).unwrap();
        engine.port_mut().atn(&[0x34, 0xF0]).data(b"X").atn(&[0x3F]);

        assert_eq!(run(&mut engine), BusState::Idle);
        assert!(engine.device(20).unwrap().frames.is_empty());
    }

    // The whole stack, down to simulated line timings.
    #[test]
    fn status_open_over_simulated_lines() {
        let flags = FlagsRegister::new();
        let mut lines = SimLines::new();
        lines.schedule(Line::Atn, 0, LineState::Asserted);
        lines.schedule(Line::ClockIn, 0, LineState::Asserted);
        // Gaps longer than the window for a filename to start
        let t = lines.schedule_talker_byte(100, 0x28, false);
        let t = lines.schedule_talker_byte(t + 2000, 0x6F, false);
        let t = lines.schedule_talker_byte(t + 2000, 0x3F, false);
        lines.schedule(Line::Atn, t + 100, LineState::Released);
        lines.schedule(Line::ClockIn, t + 100, LineState::Released);

        let mut engine: BusEngine<IecPort<'_, SimLines>, Recorder> =
            BusEngine::new(IecPort::new(lines, &flags), BusConfig::default());
        engine.add(8, Recorder::default()).unwrap();

        engine.on_attention_edge();
        assert_eq!(block_on(engine.service()), BusState::Idle);
        let device = engine.device(8).unwrap();
        assert_eq!(device.opens, 1);
        assert!(device.frames[0].is_command_channel());
    }
}
