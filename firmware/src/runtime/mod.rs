use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::i2c::{Config as I2cConfig, I2c};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;

use bms_core::afe::{Bq769x0, Calibration};
use bms_core::indicator::ActivityBands;
use bms_core::profile::BuiltinProfile;
use bms_core::protection::ProtectionEngine;

use crate::hw::afe_bus::I2cAfeBus;
use crate::hw::led::BiColorLed;
use crate::telemetry::ProtectionLog;

mod protection_task;
mod ui_task;

const AFE_I2C_HZ: u32 = 100_000;
/// Profile applied at boot until a persisted one is wired in.
const BOOT_PROFILE: BuiltinProfile = BuiltinProfile::LiFePO4;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Forces a protection cycle when ALERT has been quiet too long or the user
/// pressed the button.
pub(super) static BACKSTOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static PROTECTION_LOG: StaticCell<ProtectionLog> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        I2C1,
        PB6,
        PB7,
        PA0,
        EXTI0,
        PA1,
        PA4,
        PA5,
        PA6,
        PA7,
        ..
    } = hal::init(config);

    let mut i2c_config = I2cConfig::default();
    i2c_config.frequency = Hertz(AFE_I2C_HZ);
    let i2c = I2c::new_blocking(I2C1, PB6, PB7, i2c_config);

    let mut afe = Bq769x0::new(I2cAfeBus::new(i2c), Calibration::DEFAULT);
    let calibration = afe.read_calibration().expect("failed to read AFE trims");
    let profile = BOOT_PROFILE
        .load(&calibration)
        .expect("boot profile rejected");
    afe.configure(&profile.setup)
        .expect("failed to configure AFE");
    let engine = ProtectionEngine::new(&profile.config).expect("protection config rejected");
    defmt::info!(
        "protection: profile {} applied={} skipped={}",
        BOOT_PROFILE.name(),
        profile.applied,
        profile.skipped
    );

    let alert = ExtiInput::new(PA0, EXTI0, Pull::Down);
    let button = Input::new(PA1, Pull::Up);
    let fault_led = BiColorLed::new(
        Output::new(PA4, Level::Low, Speed::Low),
        Output::new(PA5, Level::Low, Speed::Low),
    );
    let activity_led = BiColorLed::new(
        Output::new(PA6, Level::Low, Speed::Low),
        Output::new(PA7, Level::Low, Speed::Low),
    );

    let log = PROTECTION_LOG.init(ProtectionLog::new());

    spawner
        .spawn(protection_task::run(engine, afe, alert, log))
        .expect("failed to spawn protection task");

    spawner
        .spawn(ui_task::run(
            button,
            fault_led,
            activity_led,
            ActivityBands::DEFAULT,
        ))
        .expect("failed to spawn UI task");

    core::future::pending::<()>().await;
}
