//! Fault-pair state machines.
//!
//! A fault pair couples one latch qualifier with one clear qualifier and
//! tracks whether the protection is currently tripped. The pair consults only
//! the qualifier that matches its state, so it can never trip and clear inside
//! the same evaluation.

use core::fmt;

use crate::indicator::Indicator;
use crate::protection::ClearMask;
use crate::qualifier::{AfeQualifier, ClearQualifier, LatchQualifier, McuQualifier, ResetQualifier};

/// Protection state of a fault pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultState {
    Tripped,
    #[default]
    Cleared,
}

impl FaultState {
    #[must_use]
    pub const fn is_tripped(self) -> bool {
        matches!(self, FaultState::Tripped)
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            FaultState::Tripped => "tripped",
            FaultState::Cleared => "cleared",
        })
    }
}

/// Outcome of a single pair evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    None,
    Tripped,
    Cleared,
}

/// Latch/clear qualifier pairing with its own state and trip statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultPair<L, C> {
    state: FaultState,
    latch: L,
    clear: C,
    clear_mask: ClearMask,
    trips: u16,
    indicator: Indicator,
}

impl<L, C> FaultPair<L, C>
where
    L: LatchQualifier,
    C: ClearQualifier,
{
    /// Creates a pair in the `Cleared` state.
    #[must_use]
    pub const fn new(latch: L, clear: C, clear_mask: ClearMask, indicator: Indicator) -> Self {
        Self {
            state: FaultState::Cleared,
            latch,
            clear,
            clear_mask,
            trips: 0,
            indicator,
        }
    }

    /// Runs one evaluation step.
    ///
    /// While cleared only `latch_sample` is looked at; while tripped only
    /// `clear_sample` is. The caller supplies both so that every pair can be
    /// driven by the same per-cycle inputs.
    pub fn evaluate(&mut self, latch_sample: L::Sample, clear_sample: C::Sample) -> Transition {
        match self.state {
            FaultState::Cleared => {
                if self.latch.latch(latch_sample) {
                    self.state = FaultState::Tripped;
                    self.trips = self.trips.saturating_add(1);
                    Transition::Tripped
                } else {
                    Transition::None
                }
            }
            FaultState::Tripped => {
                if self.clear.clear(clear_sample) {
                    self.state = FaultState::Cleared;
                    Transition::Cleared
                } else {
                    Transition::None
                }
            }
        }
    }

    #[must_use]
    pub const fn state(&self) -> FaultState {
        self.state
    }

    /// Status bits to write back when this pair clears.
    #[must_use]
    pub const fn clear_mask(&self) -> ClearMask {
        self.clear_mask
    }

    /// Number of `Cleared -> Tripped` edges since construction.
    #[must_use]
    pub const fn trips(&self) -> u16 {
        self.trips
    }

    #[must_use]
    pub const fn indicator(&self) -> Indicator {
        self.indicator
    }

    #[must_use]
    pub const fn latch(&self) -> &L {
        &self.latch
    }

    #[must_use]
    pub const fn clear(&self) -> &C {
        &self.clear
    }
}

/// AFE-latched, MCU-cleared pair (over/under-voltage).
pub type AfeMcuPair = FaultPair<AfeQualifier, McuQualifier<u16>>;

/// AFE-latched, auto/user-cleared pair (short-circuit, over-current).
pub type AfeResetPair = FaultPair<AfeQualifier, ResetQualifier>;

/// MCU-latched, MCU-cleared pair, e.g. a sensor reading with hysteresis.
pub type McuMcuPair<T> = FaultPair<McuQualifier<T>, McuQualifier<T>>;

/// MCU-latched, auto/user-cleared pair (burst and max current).
pub type McuResetPair = FaultPair<McuQualifier<i16>, ResetQualifier>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afe::StatusSnapshot;
    use crate::indicator::BiColor;
    use crate::qualifier::Polarity;

    const OV_BIT: StatusSnapshot = StatusSnapshot::from_raw(0b0000_0100);
    const QUIET: StatusSnapshot = StatusSnapshot::from_raw(0);

    fn over_voltage() -> AfeMcuPair {
        FaultPair::new(
            AfeQualifier::new(2),
            McuQualifier::new(Polarity::Falling, 0x2328, 1),
            ClearMask::from_bits(0b0100),
            Indicator::new(BiColor::Green, 7),
        )
    }

    #[test]
    fn afe_mcu_pair_trips_then_clears_after_debounce() {
        let mut pair = over_voltage();

        assert_eq!(pair.evaluate(QUIET, 0x2400), Transition::None);
        assert_eq!(pair.evaluate(OV_BIT, 0x2400), Transition::Tripped);
        assert_eq!(pair.trips(), 1);

        assert_eq!(pair.evaluate(OV_BIT, 0x2000), Transition::None);
        assert_eq!(pair.evaluate(OV_BIT, 0x2000), Transition::Cleared);
        assert_eq!(pair.state(), FaultState::Cleared);
    }

    #[test]
    fn clear_qualifier_is_not_consulted_while_cleared() {
        let mut pair = over_voltage();

        for _ in 0..5 {
            assert_eq!(pair.evaluate(QUIET, 0x2000), Transition::None);
        }
        assert_eq!(pair.clear().count(), 0);
        assert_eq!(pair.evaluate(OV_BIT, 0x2000), Transition::Tripped);
        assert_eq!(pair.evaluate(OV_BIT, 0x2000), Transition::None);
        assert_eq!(pair.clear().count(), 1);
    }

    #[test]
    fn latch_qualifier_is_not_consulted_while_tripped() {
        let mut pair: McuResetPair = FaultPair::new(
            McuQualifier::new(Polarity::Falling, -1000, 3),
            ResetQualifier::user_only(),
            ClearMask::EMPTY,
            Indicator::new(BiColor::Red, 3),
        );

        for _ in 0..3 {
            assert_eq!(pair.evaluate(-1200, false), Transition::None);
        }
        assert_eq!(pair.evaluate(-1200, false), Transition::Tripped);
        assert_eq!(pair.latch().count(), 0);

        for _ in 0..10 {
            assert_eq!(pair.evaluate(-1200, false), Transition::None);
            assert_eq!(pair.latch().count(), 0);
            assert_eq!(pair.state(), FaultState::Tripped);
        }
        assert_eq!(pair.trips(), 1);

        // Debounce restarts from zero once the user clears the pair.
        assert_eq!(pair.evaluate(-1200, true), Transition::Cleared);
        for _ in 0..3 {
            assert_eq!(pair.evaluate(-1200, false), Transition::None);
        }
        assert_eq!(pair.evaluate(-1200, false), Transition::Tripped);
        assert_eq!(pair.trips(), 2);
    }

    #[test]
    fn reset_pair_clears_only_on_request() {
        let mut pair: McuResetPair = FaultPair::new(
            McuQualifier::new(Polarity::Falling, -1000, 0),
            ResetQualifier::user_only(),
            ClearMask::EMPTY,
            Indicator::new(BiColor::Red, 3),
        );

        assert_eq!(pair.evaluate(-1200, true), Transition::Tripped);
        assert_eq!(pair.evaluate(0, false), Transition::None);
        assert_eq!(pair.evaluate(0, true), Transition::Cleared);
        assert_eq!(pair.evaluate(0, true), Transition::None);
    }

    #[test]
    fn mcu_mcu_pair_uses_both_thresholds() {
        let mut pair: McuMcuPair<u16> = FaultPair::new(
            McuQualifier::new(Polarity::Rising, 600, 0),
            McuQualifier::new(Polarity::Falling, 550, 0),
            ClearMask::EMPTY,
            Indicator::new(BiColor::Yellow, 2),
        );

        assert_eq!(pair.evaluate(601, 601), Transition::Tripped);
        assert_eq!(pair.evaluate(560, 560), Transition::None);
        assert_eq!(pair.evaluate(540, 540), Transition::Cleared);
    }
}
