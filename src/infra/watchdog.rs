//! A multi-task capable watchdog, which resets the device if any policed
//! task stops feeding it.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use crate::fmt::{debug, error, info, trace, warn};
use embassy_rp::peripherals::WATCHDOG as p_WATCHDOG;
use static_cell::StaticCell;
use task_watchdog::embassy_rp::{WatchdogRunner, watchdog_run};
use task_watchdog::{Id, WatchdogConfig};

use crate::constants::{BUS_SERVICE_WATCHDOG_TIMER, WATCHDOG_CHECK_INTERVAL, WATCHDOG_HW_TIMEOUT};

pub type WatchdogType = WatchdogRunner<TaskId, NUM_TASK_IDS>;

pub static WATCHDOG: StaticCell<WatchdogType> = StaticCell::new();

/// The tasks which are policed by the watchdog.
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TaskId {
    /// The bus service task.  It feeds the watchdog at least every
    /// [`crate::constants::BUS_SERVICE_LOOP_TIMER`], even with the bus
    /// quiet.
    BusService = 0,

    /// The number of tasks which are policed.
    Num,
}
impl Id for TaskId {}
const NUM_TASK_IDS: usize = TaskId::Num as usize;

pub fn create_watchdog(p_watchdog: p_WATCHDOG) -> &'static mut WatchdogType {
    let config = WatchdogConfig {
        hardware_timeout: WATCHDOG_HW_TIMEOUT,
        check_interval: WATCHDOG_CHECK_INTERVAL,
    };
    WATCHDOG.init(WatchdogRunner::new(p_watchdog, config))
}

/// Start policing the bus service task.
pub async fn watch_bus_service(watchdog: &WatchdogType) {
    watchdog
        .register_task(&TaskId::BusService, BUS_SERVICE_WATCHDOG_TIMER)
        .await;
    debug!("Watchdog policing bus service");
}

pub async fn feed(watchdog: &WatchdogType, id: TaskId) {
    watchdog.feed(&id).await;
}

#[embassy_executor::task]
pub async fn watchdog_task(watchdog: &'static WatchdogType) -> ! {
    watchdog_run(watchdog.create_task()).await
}
