//! pico1541-drive
//!
//! A Commodore IEC serial bus peripheral, letting a Raspberry Pi Pico
//! appear to a C64 (or other Commodore controller) as one or more disk
//! drives.
//!
//! The protocol core - [`protocol`], [`device`] and [`registry`] - is
//! independent of the hardware, and builds and is tested on the host.  The
//! `firmware` feature adds the Pico GPIO line driver and the embassy tasks
//! which run it.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled to build the firmware");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Declare all of this library's modules.
pub mod config;
pub mod constants;
pub mod device;
pub(crate) mod fmt;
pub mod protocol;
pub mod registry;
pub mod sim;
pub mod util;

#[cfg(feature = "firmware")]
mod entry;
#[cfg(feature = "firmware")]
mod infra;

#[cfg(feature = "firmware")]
pub use entry::{common_main, defmt_panic_handler, panic_handler};

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"pico1541 drive by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(
        c"Emulates Commodore serial bus disk drives, answering a C64 or other Commodore computer as device 8."
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// The firmware's statics exist to give the bus engine and watchdog the
// 'static lifetime embassy tasks require.
//
// - Use StaticCell for statics that cannot be initialized at compile time,
//   like the engine, which owns the GPIO pins.
//
// - The flags register is initialized at compile time and only ever shared
//   immutably, as all of its state is atomic.  So it is a plain static.
//
// - If you need mutable access from more than one task, use a Mutex.
//   Generally use CriticalSectionRawMutex, as these work on multi-core
//   systems.
//
// The statics are stored in the module that creates them.
