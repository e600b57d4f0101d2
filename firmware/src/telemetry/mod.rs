//! Firmware side of the protection event history.
//!
//! Wraps the shared recorder around Embassy's monotonic clock and mirrors
//! every recorded event to defmt (or stdout on host builds) so bring-up does
//! not need a debugger attached to read the ring.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use bms_core::protection::{CycleReport, FaultId, FlushError, FlushReport};
use bms_core::telemetry::{
    EventId, ProtectionEventKind, ProtectionPayload, TelemetryInstant, TelemetryRecord,
    TelemetryRecorder,
};
use embassy_time::Instant;

/// Events kept on the MCU.
pub const FIRMWARE_RING_CAPACITY: usize = 32;

/// Embassy instant usable as a telemetry timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self.0.saturating_duration_since(earlier.0).as_micros();
        Duration::from_micros(micros)
    }
}

/// Recorder plus log mirroring.
pub struct ProtectionLog {
    recorder: TelemetryRecorder<FirmwareInstant, FIRMWARE_RING_CAPACITY>,
}

impl ProtectionLog {
    pub const fn new() -> Self {
        Self {
            recorder: TelemetryRecorder::new(),
        }
    }

    /// Records the cycle's edges; `trips` returns the lifetime trip count.
    pub fn cycle<F>(&mut self, report: &CycleReport, trips: F, timestamp: FirmwareInstant)
    where
        F: Fn(FaultId) -> u16,
    {
        let first = self.next_id();
        self.recorder.record_cycle(report, trips, timestamp);
        self.mirror_from(first);
    }

    pub fn flush<E>(
        &mut self,
        outcome: &Result<FlushReport, FlushError<E>>,
        timestamp: FirmwareInstant,
    ) {
        let first = self.next_id();
        self.recorder.record_flush(outcome, timestamp);
        self.mirror_from(first);
    }

    pub fn event(&mut self, event: ProtectionEventKind, timestamp: FirmwareInstant) {
        let first = self.next_id();
        self.recorder.record(event, ProtectionPayload::None, timestamp);
        self.mirror_from(first);
    }

    fn next_id(&self) -> EventId {
        self.recorder
            .latest()
            .map_or(0, |record| record.id.wrapping_add(1))
    }

    /// Logs every record whose id is at or after `first`; ids wrap.
    fn mirror_from(&self, first: EventId) {
        let window = u32::try_from(FIRMWARE_RING_CAPACITY).unwrap_or(u32::MAX);
        for record in self.recorder.oldest_first() {
            if record.id.wrapping_sub(first) < window {
                log_record(record);
            }
        }
    }
}

impl Default for ProtectionLog {
    fn default() -> Self {
        Self::new()
    }
}

fn log_record(record: &TelemetryRecord<FirmwareInstant>) {
    let code = record.event.to_raw();
    let timestamp_us = record.timestamp.as_micros();
    match record.details {
        ProtectionPayload::Trip {
            trips,
            since_previous_trip,
        } => emit_log(
            record.event,
            code,
            timestamp_us,
            Some(trips),
            since_previous_trip.map(|elapsed| elapsed.as_millis()),
        ),
        ProtectionPayload::Status(_) | ProtectionPayload::None => {
            emit_log(record.event, code, timestamp_us, None, None);
        }
    }
}

#[cfg(target_os = "none")]
fn emit_log(
    event: ProtectionEventKind,
    code: u16,
    timestamp_us: u64,
    trips: Option<u16>,
    since_ms: Option<u128>,
) {
    match (trips, since_ms) {
        (Some(trips), Some(since)) => defmt::info!(
            "protection {} code={=u16:#x} t={}us trips={} Δ={}ms",
            defmt::Display2Format(&event),
            code,
            timestamp_us,
            trips,
            defmt::Display2Format(&since)
        ),
        (Some(trips), None) => defmt::info!(
            "protection {} code={=u16:#x} t={}us trips={}",
            defmt::Display2Format(&event),
            code,
            timestamp_us,
            trips
        ),
        _ => defmt::info!(
            "protection {} code={=u16:#x} t={}us",
            defmt::Display2Format(&event),
            code,
            timestamp_us
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(
    event: ProtectionEventKind,
    code: u16,
    timestamp_us: u64,
    trips: Option<u16>,
    since_ms: Option<u128>,
) {
    match (trips, since_ms) {
        (Some(trips), Some(since)) => println!(
            "protection {event} code={code:#x} t={timestamp_us}us trips={trips} Δ={since}ms"
        ),
        (Some(trips), None) => {
            println!("protection {event} code={code:#x} t={timestamp_us}us trips={trips}");
        }
        _ => println!("protection {event} code={code:#x} t={timestamp_us}us"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::fault::Transition;
    use bms_core::indicator::IndicatorCommand;
    use bms_core::protection::{ClearMask, FaultTransition, SwitchEnable};

    #[test]
    fn instant_wrapper_measures_elapsed_time() {
        let earlier = FirmwareInstant::from(Instant::from_micros(100));
        let later = FirmwareInstant::from(Instant::from_micros(350));
        assert_eq!(
            later.saturating_duration_since(earlier),
            Duration::from_micros(250)
        );
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
    }

    #[test]
    fn cycle_edges_reach_the_ring() {
        let mut log = ProtectionLog::new();
        let mut transitions = heapless::Vec::new();
        transitions
            .push(FaultTransition {
                fault: FaultId::UnderVoltage,
                transition: Transition::Tripped,
            })
            .expect("capacity");
        let report = CycleReport {
            transitions,
            switches: SwitchEnable {
                charge: true,
                discharge: false,
            },
            switch_write_owed: true,
            pending_clear: ClearMask::EMPTY,
            indicator: IndicatorCommand::Off,
        };

        log.cycle(&report, |_| 1, FirmwareInstant::from(Instant::from_micros(10)));
        let latest = log.recorder.latest().expect("recorded");
        assert_eq!(
            latest.event,
            ProtectionEventKind::Tripped(FaultId::UnderVoltage)
        );
    }
}
