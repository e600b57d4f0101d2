//! Protection event history shared by the firmware and the emulator.
//!
//! Events are encoded to compact numeric codes so the firmware can forward
//! them over `defmt` and the emulator can print them from the `history`
//! command. The recorder keeps the most recent events in a fixed ring.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::fault::Transition;
use crate::protection::{
    ClearMask, CycleReport, FAULT_COUNT, FaultId, FlushError, FlushReport, SwitchEnable,
};

/// Monotonic event identifier; wraps on overflow.
pub type EventId = u32;

/// Number of events retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtectionEventKind {
    Tripped(FaultId),
    Cleared(FaultId),
    /// Switch enables written to the AFE.
    SwitchesWritten(SwitchEnable),
    /// Status bits written back to the AFE.
    StatusCleared,
    /// A register write failed and will be retried.
    OutputWriteFailed,
    /// User asked for a fault reset (long press).
    ClearRequested,
    /// Thresholds reloaded from a profile.
    ProfileLoaded,
    Custom(u16),
}

impl fmt::Display for ProtectionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionEventKind::Tripped(fault) => write!(f, "tripped {fault}"),
            ProtectionEventKind::Cleared(fault) => write!(f, "cleared {fault}"),
            ProtectionEventKind::SwitchesWritten(switches) => {
                write!(f, "switches-written {switches}")
            }
            ProtectionEventKind::StatusCleared => f.write_str("status-cleared"),
            ProtectionEventKind::OutputWriteFailed => f.write_str("output-write-failed"),
            ProtectionEventKind::ClearRequested => f.write_str("clear-requested"),
            ProtectionEventKind::ProfileLoaded => f.write_str("profile-loaded"),
            ProtectionEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl ProtectionEventKind {
    const TRIPPED_BASE: u16 = 0x0000;
    const CLEARED_BASE: u16 = 0x0008;
    const SWITCHES_BASE: u16 = 0x0010;
    const STATUS_CLEARED_CODE: u16 = 0x0014;
    const OUTPUT_FAILED_CODE: u16 = 0x0015;
    const CLEAR_REQUESTED_CODE: u16 = 0x0016;
    const PROFILE_LOADED_CODE: u16 = 0x0017;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            ProtectionEventKind::Tripped(fault) => Self::TRIPPED_BASE + fault_offset(fault),
            ProtectionEventKind::Cleared(fault) => Self::CLEARED_BASE + fault_offset(fault),
            ProtectionEventKind::SwitchesWritten(switches) => {
                Self::SWITCHES_BASE + u16::from_le_bytes([switches.bits(), 0])
            }
            ProtectionEventKind::StatusCleared => Self::STATUS_CLEARED_CODE,
            ProtectionEventKind::OutputWriteFailed => Self::OUTPUT_FAILED_CODE,
            ProtectionEventKind::ClearRequested => Self::CLEAR_REQUESTED_CODE,
            ProtectionEventKind::ProfileLoaded => Self::PROFILE_LOADED_CODE,
            ProtectionEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`ProtectionEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::STATUS_CLEARED_CODE => ProtectionEventKind::StatusCleared,
            Self::OUTPUT_FAILED_CODE => ProtectionEventKind::OutputWriteFailed,
            Self::CLEAR_REQUESTED_CODE => ProtectionEventKind::ClearRequested,
            Self::PROFILE_LOADED_CODE => ProtectionEventKind::ProfileLoaded,
            value if (Self::TRIPPED_BASE..Self::CLEARED_BASE).contains(&value) => {
                fault_from_offset(value - Self::TRIPPED_BASE)
                    .map_or(ProtectionEventKind::Custom(value), ProtectionEventKind::Tripped)
            }
            value if (Self::CLEARED_BASE..Self::SWITCHES_BASE).contains(&value) => {
                fault_from_offset(value - Self::CLEARED_BASE)
                    .map_or(ProtectionEventKind::Custom(value), ProtectionEventKind::Cleared)
            }
            value if (Self::SWITCHES_BASE..Self::STATUS_CLEARED_CODE).contains(&value) => {
                let [bits, _] = (value - Self::SWITCHES_BASE).to_le_bytes();
                ProtectionEventKind::SwitchesWritten(SwitchEnable::from_bits(bits))
            }
            other => ProtectionEventKind::Custom(other),
        }
    }
}

const fn fault_offset(fault: FaultId) -> u16 {
    u16::from_le_bytes([fault.index(), 0])
}

fn fault_from_offset(offset: u16) -> Option<FaultId> {
    u8::try_from(offset)
        .ok()
        .filter(|index| usize::from(*index) < FAULT_COUNT)
        .and_then(FaultId::from_index)
}

/// Extra detail attached to an event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtectionPayload {
    None,
    /// Lifetime trip count and the time since the previous trip of any fault.
    Trip {
        trips: u16,
        since_previous_trip: Option<Duration>,
    },
    /// Mask written to the status register.
    Status(ClearMask),
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: ProtectionEventKind,
    pub details: ProtectionPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records protection events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_trip_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_trip_at: None,
            next_event_id: 0,
        }
    }

    /// Recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records the trip and clear edges of one evaluation cycle.
    ///
    /// `trips` supplies the lifetime trip count for a fault after the cycle.
    pub fn record_cycle<F>(&mut self, report: &CycleReport, trips: F, timestamp: TInstant)
    where
        F: Fn(FaultId) -> u16,
    {
        for edge in &report.transitions {
            match edge.transition {
                Transition::Tripped => {
                    let since_previous_trip = self
                        .last_trip_at
                        .map(|previous| timestamp.saturating_duration_since(previous));
                    self.last_trip_at = Some(timestamp);
                    self.record(
                        ProtectionEventKind::Tripped(edge.fault),
                        ProtectionPayload::Trip {
                            trips: trips(edge.fault),
                            since_previous_trip,
                        },
                        timestamp,
                    );
                }
                Transition::Cleared => {
                    self.record(
                        ProtectionEventKind::Cleared(edge.fault),
                        ProtectionPayload::None,
                        timestamp,
                    );
                }
                Transition::None => {}
            }
        }
    }

    /// Records the writes (or the failure) of one flush.
    pub fn record_flush<E>(
        &mut self,
        outcome: &Result<FlushReport, FlushError<E>>,
        timestamp: TInstant,
    ) {
        match outcome {
            Ok(report) => {
                if let Some(mask) = report.cleared {
                    self.record(
                        ProtectionEventKind::StatusCleared,
                        ProtectionPayload::Status(mask),
                        timestamp,
                    );
                }
                if let Some(switches) = report.switches_written {
                    self.record(
                        ProtectionEventKind::SwitchesWritten(switches),
                        ProtectionPayload::None,
                        timestamp,
                    );
                }
            }
            Err(_) => {
                self.record(
                    ProtectionEventKind::OutputWriteFailed,
                    ProtectionPayload::None,
                    timestamp,
                );
            }
        }
    }

    /// Records an arbitrary event.
    pub fn record(
        &mut self,
        event: ProtectionEventKind,
        details: ProtectionPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details,
        });
        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::IndicatorCommand;
    use crate::protection::FaultTransition;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct MicrosInstant(u64);

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn report(edges: &[FaultTransition]) -> CycleReport {
        let mut transitions = heapless::Vec::new();
        for edge in edges {
            transitions.push(*edge).expect("fits");
        }
        CycleReport {
            transitions,
            switches: SwitchEnable::DISABLED,
            switch_write_owed: false,
            pending_clear: ClearMask::EMPTY,
            indicator: IndicatorCommand::Off,
        }
    }

    #[test]
    fn event_codes_decode_back() {
        for fault in FaultId::ALL {
            for kind in [
                ProtectionEventKind::Tripped(fault),
                ProtectionEventKind::Cleared(fault),
            ] {
                assert_eq!(ProtectionEventKind::from_raw(kind.to_raw()), kind);
            }
        }
        let written = ProtectionEventKind::SwitchesWritten(SwitchEnable::from_bits(0b10));
        assert_eq!(ProtectionEventKind::from_raw(written.to_raw()), written);
        assert_eq!(
            ProtectionEventKind::from_raw(0x0200),
            ProtectionEventKind::Custom(0x0200)
        );
    }

    #[test]
    fn trip_payload_tracks_elapsed_between_trips() {
        let mut recorder: TelemetryRecorder<MicrosInstant, 8> = TelemetryRecorder::new();
        let trip = |fault| FaultTransition {
            fault,
            transition: Transition::Tripped,
        };

        recorder.record_cycle(&report(&[trip(FaultId::UnderVoltage)]), |_| 1, MicrosInstant(1_000));
        recorder.record_cycle(
            &report(&[trip(FaultId::MaxCurrentDischarge)]),
            |_| 4,
            MicrosInstant(251_000),
        );

        let latest = recorder.latest().expect("two records");
        assert_eq!(latest.id, 1);
        assert_eq!(
            latest.details,
            ProtectionPayload::Trip {
                trips: 4,
                since_previous_trip: Some(Duration::from_millis(250)),
            }
        );
    }

    #[test]
    fn flush_outcomes_are_recorded() {
        let mut recorder: TelemetryRecorder<MicrosInstant, 8> = TelemetryRecorder::new();
        let ok: Result<FlushReport, FlushError<()>> = Ok(FlushReport {
            cleared: Some(ClearMask::from_bits(0x04)),
            switches_written: Some(SwitchEnable::ENABLED),
        });
        recorder.record_flush(&ok, MicrosInstant(10));
        let failed: Result<FlushReport, FlushError<()>> = Err(FlushError::WriteSwitches(()));
        recorder.record_flush(&failed, MicrosInstant(20));

        let events: heapless::Vec<ProtectionEventKind, 8> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[
                ProtectionEventKind::StatusCleared,
                ProtectionEventKind::SwitchesWritten(SwitchEnable::ENABLED),
                ProtectionEventKind::OutputWriteFailed,
            ]
        );
    }

    #[test]
    fn ring_keeps_most_recent() {
        let mut recorder: TelemetryRecorder<MicrosInstant, 2> = TelemetryRecorder::new();
        for tick in 0..5 {
            recorder.record(
                ProtectionEventKind::ClearRequested,
                ProtectionPayload::None,
                MicrosInstant(tick),
            );
        }
        assert_eq!(recorder.len(), 2);
        let ids: heapless::Vec<EventId, 2> = recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }
}
