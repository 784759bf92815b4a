//! The firmware's entry point, and the bus service task.
//!
//! At power on a single drive is registered at [`DEFAULT_DRIVE_ADDRESS`],
//! serving a small built-in disk.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use embassy_executor::Spawner;
use embassy_time::{Instant, Timer};
use static_cell::StaticCell;

use crate::config::BusConfig;
use crate::constants::{BUS_SERVICE_LOOP_TIMER, DEFAULT_DRIVE_ADDRESS, LOOP_LOG_INTERVAL};
use crate::device::{Drive, FileType, MemoryExecutor, MemoryFile, Peripheral};
#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use crate::infra::gpio::{GpioLines, IecPins};
use crate::infra::watchdog::{
    TaskId, WatchdogType, create_watchdog, feed, watch_bus_service, watchdog_task,
};
use crate::protocol::{BusEngine, FlagsRegister, IecPort};
use crate::util::built::log_fw_info;

type Engine = BusEngine<IecPort<'static, GpioLines>, Peripheral<MemoryExecutor>>;

// Shared between the bus service task and ATN edge detection.
static FLAGS: FlagsRegister = FlagsRegister::new();

static ENGINE: StaticCell<Engine> = StaticCell::new();

// 10 PRINT "HELLO FROM PICO1541"
const HELLO_PRG: &[u8] = b"\x01\x08\x1d\x08\x0a\x00\x99 \"HELLO FROM PICO1541\"\x00\x00\x00";

static BUILTIN_FILES: [MemoryFile; 1] = [MemoryFile {
    name: "HELLO",
    file_type: FileType::Prg,
    data: HELLO_PRG,
}];

/// Called by the binary's main().
pub async fn common_main(spawner: Spawner, bin_name: &'static str) -> ! {
    let p = embassy_rp::init(Default::default());
    log_fw_info(bin_name);

    let watchdog = create_watchdog(p.WATCHDOG);
    watch_bus_service(watchdog).await;
    watchdog.start().await;
    let watchdog: &'static WatchdogType = watchdog;
    spawner.must_spawn(watchdog_task(watchdog));

    let lines = GpioLines::new(IecPins {
        clock_in: p.PIN_19,
        clock_out: p.PIN_11,
        data_in: p.PIN_20,
        data_out: p.PIN_13,
        atn_in: p.PIN_17,
        reset_in: p.PIN_18,
        srq_out: p.PIN_14,
    });
    let mut engine = BusEngine::new(IecPort::new(lines, &FLAGS), BusConfig::default());

    let drive = Drive::new(MemoryExecutor::new("PICO1541", "01 2A", &BUILTIN_FILES));
    if let Err(e) = engine.add(DEFAULT_DRIVE_ADDRESS, Peripheral::Drive(drive)) {
        error!("Failed to add drive {}: {:?}", DEFAULT_DRIVE_ADDRESS, e);
    }

    spawner.must_spawn(bus_service_task(ENGINE.init(engine), watchdog));

    loop {
        Timer::after(LOOP_LOG_INTERVAL).await;
        trace!("Main loop alive");
    }
}

#[embassy_executor::task]
async fn bus_service_task(engine: &'static mut Engine, watchdog: &'static WatchdogType) -> ! {
    info!("Bus service started");
    let mut last_log = Instant::now();
    let mut cycles: u32 = 0;

    loop {
        feed(watchdog, TaskId::BusService).await;

        // Run service() even without an edge, so RESET is noticed
        if engine.wait_attention(BUS_SERVICE_LOOP_TIMER).await {
            cycles = cycles.wrapping_add(1);
        }
        let state = engine.service().await;

        if last_log.elapsed() >= LOOP_LOG_INTERVAL {
            debug!("Bus service alive, {:?}, {} cycles", state, cycles);
            last_log = Instant::now();
        }
    }
}

/// Handles a panic by logging it and resetting.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    error!("Panic: {}", defmt::Display2Format(info));
    cortex_m::peripheral::SCB::sys_reset()
}

/// Handles a defmt panic by resetting.
pub fn defmt_panic_handler() -> ! {
    error!("defmt panic");
    cortex_m::peripheral::SCB::sys_reset()
}
