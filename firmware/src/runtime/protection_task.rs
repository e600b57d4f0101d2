use bms_core::afe::Bq769x0;
use bms_core::protection::ProtectionEngine;
use bms_core::telemetry::ProtectionEventKind;
use embassy_futures::select::select;
use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;

use super::BACKSTOP;
use crate::hw::afe_bus::I2cAfeBus;
use crate::status;
use crate::telemetry::{FirmwareInstant, ProtectionLog};

/// Runs one protection cycle per ALERT edge or backstop signal.
#[embassy_executor::task]
pub async fn run(
    mut engine: ProtectionEngine,
    mut afe: Bq769x0<I2cAfeBus<'static>>,
    mut alert: ExtiInput<'static>,
    log: &'static mut ProtectionLog,
) -> ! {
    loop {
        select(alert.wait_for_rising_edge(), BACKSTOP.wait()).await;
        BACKSTOP.reset();

        let measurements = match afe.acquire(engine.owned_status_bits()) {
            Ok(measurements) => measurements,
            Err(error) => {
                // Stale inputs never reach the engine; the backstop retries.
                defmt::warn!(
                    "protection: AFE read failed: {}",
                    defmt::Debug2Format(&error)
                );
                continue;
            }
        };

        let now = FirmwareInstant::from(Instant::now());
        let clear_requested = status::take_clear_request();
        if clear_requested {
            log.event(ProtectionEventKind::ClearRequested, now);
        }

        let current = measurements.current;
        let report = engine.evaluate(&measurements.into_inputs(clear_requested));
        log.cycle(&report, |fault| engine.trip_count(fault), now);

        let outcome = engine.flush(&mut afe);
        if let Err(error) = &outcome {
            defmt::warn!(
                "protection: output write failed: {}",
                defmt::Debug2Format(error.source())
            );
        }
        log.flush(&outcome, now);

        status::publish_cycle(&report, current);
    }
}
