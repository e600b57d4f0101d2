use bms_core::indicator::{ActivityBands, BlinkPattern, CYCLE_PERIOD_TICKS};
use bms_core::input::{ButtonEvent, ButtonTracker, CheckinTimer};
use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Ticker};

use super::BACKSTOP;
use crate::hw::led::BiColorLed;
use crate::status;

const UI_TICK_MS: u64 = 30;

/// Button, backstop and LED rendering on a fixed tick.
#[embassy_executor::task]
pub async fn run(
    button: Input<'static>,
    mut fault_led: BiColorLed<'static>,
    mut activity_led: BiColorLed<'static>,
    bands: ActivityBands,
) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(UI_TICK_MS));
    let mut tracker = ButtonTracker::new();
    let mut checkin = CheckinTimer::new();
    let mut fault_pattern = BlinkPattern::default();
    let mut activity_pattern = BlinkPattern::default();
    let mut seen_cycles = status::cycle_count();
    let mut tick: u16 = 0;

    loop {
        ticker.next().await;

        // Active-low button.
        match tracker.tick(button.is_low()) {
            ButtonEvent::LongPress => {
                defmt::info!("ui: long press, requesting fault reset");
                status::request_clear();
                BACKSTOP.signal(());
            }
            ButtonEvent::ShortPress => BACKSTOP.signal(()),
            ButtonEvent::None => {}
        }

        let cycles = status::cycle_count();
        if cycles == seen_cycles {
            if checkin.tick() {
                BACKSTOP.signal(());
            }
        } else {
            seen_cycles = cycles;
            checkin.reset();
        }

        if tick == 0 {
            fault_pattern.set(status::fault_indicator());
            if let Some(command) = bands.classify(status::last_current()) {
                activity_pattern.set(command);
            }
        }

        fault_led.show(fault_pattern.level(tick));
        activity_led.show(activity_pattern.level(tick));
        tick = (tick + 1) % CYCLE_PERIOD_TICKS;
    }
}
