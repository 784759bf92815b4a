//! This module contains constants for the pico1541 drive.
//!
//! Bus timing constants live in [`crate::util::time::iec`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_time::Duration;
use static_assertions::const_assert;

//
// Watchdog timers
//

/// Hardware watchdog timeout - the watchdog resets the system if the
/// watchdog task isn't scheduled at least this frequently.
#[allow(dead_code)]
pub const WATCHDOG_HW_TIMEOUT: Duration = Duration::from_secs(1);

/// How often the watchdog task checks that the policed tasks have been fed.
#[allow(dead_code)]
pub const WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How often the bus service task must feed the watchdog to prevent a reset.
/// The bus service loop can legitimately block for a full byte handshake
/// timeout, so this is comfortably larger than READ_CLK_START_TIMEOUT.
#[allow(dead_code)]
pub const BUS_SERVICE_WATCHDOG_TIMER: Duration = Duration::from_secs(3);

//
// Task main runner and related timers.
//

// How often we aim to log from our primary loops to prove they are still
// alive.
#[allow(dead_code)]
pub const LOOP_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How long the bus service task waits for an ATN edge before running
/// `service()` anyway, so it can feed the watchdog and spot RESET.
#[allow(dead_code)]
pub const BUS_SERVICE_LOOP_TIMER: Duration = Duration::from_millis(100);

//
// Bus addressing
//

/// Lowest address a device may be registered at.  0-3 are the keyboard,
/// datasette, screen and RS-232 on the controller.
pub const MIN_DEVICE_ADDRESS: u8 = 4;

/// Highest address a device may be registered at.  31 is the
/// UNLISTEN/UNTALK address.
pub const MAX_DEVICE_ADDRESS: u8 = 30;

/// Highest address a LISTEN or TALK can reach.  The command byte's bottom
/// nibble carries the address, so devices registered above this are never
/// commanded.
pub const MAX_COMMAND_ADDRESS: u8 = 15;

/// The command/status channel.
pub const CMD_CHANNEL: u8 = 15;

/// The conventional LOAD channel.
pub const LOAD_CHANNEL: u8 = 0;

/// The conventional SAVE channel.
pub const SAVE_CHANNEL: u8 = 1;

//
// Buffer sizes
//

/// Maximum length of a command string/filename sent after OPEN.  The
/// controller's own input buffer is 80 bytes.
pub const MAX_PAYLOAD_LEN: usize = 80;

/// Maximum length of a resolved target (filename) held by a session.
pub const MAX_TARGET_LEN: usize = 32;

/// Maximum length of a held status string.
pub const MAX_STATUS_LEN: usize = 40;

/// Maximum number of concurrently open channel sessions, per drive.
pub const MAX_OPEN_CHANNELS: usize = 16;

/// Size of the chunk shuffled between the bus and the executor.
pub const DATA_CHUNK_LEN: usize = 64;

/// Maximum number of devices a registry may hold - one per valid address.
pub const MAX_DEVICES: usize = (MAX_DEVICE_ADDRESS - MIN_DEVICE_ADDRESS + 1) as usize;

const_assert!(MAX_TARGET_LEN <= MAX_PAYLOAD_LEN);
const_assert!(MAX_OPEN_CHANNELS >= CMD_CHANNEL as usize + 1);
const_assert!(MAX_DEVICE_ADDRESS < 32);

//
// Identification
//

/// Product string, used in the power-on status message and device info.
pub const PRODUCT_ID: &str = "PICO1541";

/// Device address of the firmware's default drive.
#[allow(dead_code)]
pub const DEFAULT_DRIVE_ADDRESS: u8 = 8;
