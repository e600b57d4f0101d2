#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! State shared between the protection and UI tasks.
//!
//! Each static has a single writer: the protection task publishes the
//! outcome of every cycle, the UI task owns the user-reset request. Readers
//! only ever see whole values, so no lock is needed.

use bms_core::indicator::IndicatorCommand;
use bms_core::protection::{CycleReport, SwitchEnable};
use portable_atomic::{AtomicBool, AtomicI16, AtomicU8, AtomicU16, AtomicU32, Ordering};

/// Last switch decision, as `SwitchEnable` bits.
static SWITCH_BITS: AtomicU8 = AtomicU8::new(0);
/// Fault light command, packed with `IndicatorCommand::to_raw`.
static FAULT_INDICATOR: AtomicU16 = AtomicU16::new(0);
/// Most recent offset-corrected coulomb-counter code.
static LAST_CURRENT: AtomicI16 = AtomicI16::new(0);
/// Protection cycles completed since boot; wraps.
static CYCLE_COUNT: AtomicU32 = AtomicU32::new(0);
/// Set by a long press, consumed by the next protection cycle.
static CLEAR_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Publishes the outcome of one protection cycle.
pub fn publish_cycle(report: &CycleReport, current: i16) {
    SWITCH_BITS.store(report.switches.bits(), Ordering::Relaxed);
    FAULT_INDICATOR.store(report.indicator.to_raw(), Ordering::Relaxed);
    LAST_CURRENT.store(current, Ordering::Relaxed);
    CYCLE_COUNT.fetch_add(1, Ordering::Release);
}

pub fn switches() -> SwitchEnable {
    SwitchEnable::from_bits(SWITCH_BITS.load(Ordering::Relaxed))
}

pub fn fault_indicator() -> IndicatorCommand {
    IndicatorCommand::from_raw(FAULT_INDICATOR.load(Ordering::Relaxed))
}

pub fn last_current() -> i16 {
    LAST_CURRENT.load(Ordering::Relaxed)
}

pub fn cycle_count() -> u32 {
    CYCLE_COUNT.load(Ordering::Acquire)
}

pub fn request_clear() {
    CLEAR_REQUESTED.store(true, Ordering::Relaxed);
}

/// Returns and clears the pending user-reset request.
pub fn take_clear_request() -> bool {
    CLEAR_REQUESTED.swap(false, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::indicator::{BiColor, Indicator};
    use bms_core::protection::ClearMask;

    #[test]
    fn publishes_cycle_outcome() {
        let before = cycle_count();
        let report = CycleReport {
            transitions: heapless::Vec::new(),
            switches: SwitchEnable {
                charge: false,
                discharge: true,
            },
            switch_write_owed: true,
            pending_clear: ClearMask::EMPTY,
            indicator: IndicatorCommand::Show(Indicator::new(BiColor::Green, 7)),
        };

        publish_cycle(&report, -120);

        assert_eq!(switches(), report.switches);
        assert_eq!(fault_indicator(), report.indicator);
        assert_eq!(last_current(), -120);
        assert_eq!(cycle_count(), before.wrapping_add(1));
    }

    #[test]
    fn clear_request_is_consumed_once() {
        request_clear();
        assert!(take_clear_request());
        assert!(!take_clear_request());
    }
}
