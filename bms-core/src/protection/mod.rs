//! Fault arbitration engine.
//!
//! [`ProtectionEngine`] owns every fault pair, evaluates them once per
//! protection cycle in [`EVALUATION_ORDER`], and folds the resulting states
//! into the charge/discharge enables, the pending status-clear mask, and the
//! fault indicator. Register I/O is kept out of the evaluation pass; callers
//! apply the outcome afterwards with [`ProtectionEngine::flush`].

mod outputs;

use core::fmt;

use heapless::Vec;

pub use outputs::{ClearMask, FlushError, FlushReport, NoopOutputs, ProtectionOutputs, SwitchEnable};

use crate::afe::StatusSnapshot;
use crate::config::{ConfigError, InhibitMap, ProtectionConfig};
use crate::fault::{AfeMcuPair, AfeResetPair, FaultPair, FaultState, McuResetPair, Transition};
use crate::indicator::{Indicator, IndicatorCommand};
use crate::qualifier::{ClearQualifier, LatchQualifier};

/// Number of fault pairs owned by the engine.
pub const FAULT_COUNT: usize = 8;

/// Identity of each protection handled by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultId {
    OverVoltage,
    UnderVoltage,
    ShortCircuitDischarge,
    OverCurrentDischarge,
    BurstCurrentDischarge,
    MaxCurrentDischarge,
    BurstCurrentCharge,
    MaxCurrentCharge,
}

impl FaultId {
    /// Every fault, highest priority first.
    pub const ALL: [FaultId; FAULT_COUNT] = [
        FaultId::OverVoltage,
        FaultId::UnderVoltage,
        FaultId::ShortCircuitDischarge,
        FaultId::OverCurrentDischarge,
        FaultId::BurstCurrentDischarge,
        FaultId::MaxCurrentDischarge,
        FaultId::BurstCurrentCharge,
        FaultId::MaxCurrentCharge,
    ];

    /// Indicator priority; 1 is the most important.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            FaultId::OverVoltage => 1,
            FaultId::UnderVoltage => 2,
            FaultId::ShortCircuitDischarge => 3,
            FaultId::OverCurrentDischarge => 4,
            FaultId::BurstCurrentDischarge => 12,
            FaultId::MaxCurrentDischarge => 13,
            FaultId::BurstCurrentCharge => 14,
            FaultId::MaxCurrentCharge => 15,
        }
    }

    /// Short mnemonic used in logs and the REPL.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            FaultId::OverVoltage => "OVP",
            FaultId::UnderVoltage => "UVP",
            FaultId::ShortCircuitDischarge => "SCPD",
            FaultId::OverCurrentDischarge => "OCPD",
            FaultId::BurstCurrentDischarge => "BCPD",
            FaultId::MaxCurrentDischarge => "MCPD",
            FaultId::BurstCurrentCharge => "BCPC",
            FaultId::MaxCurrentCharge => "MCPC",
        }
    }

    /// Dense index in `0..FAULT_COUNT`, following [`FaultId::ALL`].
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            FaultId::OverVoltage => 0,
            FaultId::UnderVoltage => 1,
            FaultId::ShortCircuitDischarge => 2,
            FaultId::OverCurrentDischarge => 3,
            FaultId::BurstCurrentDischarge => 4,
            FaultId::MaxCurrentDischarge => 5,
            FaultId::BurstCurrentCharge => 6,
            FaultId::MaxCurrentCharge => 7,
        }
    }

    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(FaultId::OverVoltage),
            1 => Some(FaultId::UnderVoltage),
            2 => Some(FaultId::ShortCircuitDischarge),
            3 => Some(FaultId::OverCurrentDischarge),
            4 => Some(FaultId::BurstCurrentDischarge),
            5 => Some(FaultId::MaxCurrentDischarge),
            6 => Some(FaultId::BurstCurrentCharge),
            7 => Some(FaultId::MaxCurrentCharge),
            _ => None,
        }
    }

    /// Looks a fault up by its mnemonic, ignoring ASCII case.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|fault| fault.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for FaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Order in which pairs are evaluated each cycle, lowest priority first.
///
/// Each pair sets the fault indicator on its own trip edge, so the pair
/// evaluated last wins when several trip in the same cycle.
pub const EVALUATION_ORDER: [FaultId; FAULT_COUNT] = [
    FaultId::MaxCurrentCharge,
    FaultId::BurstCurrentCharge,
    FaultId::MaxCurrentDischarge,
    FaultId::BurstCurrentDischarge,
    FaultId::OverCurrentDischarge,
    FaultId::ShortCircuitDischarge,
    FaultId::UnderVoltage,
    FaultId::OverVoltage,
];

/// Compact set of faults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultSet(u8);

impl FaultSet {
    pub const EMPTY: Self = Self(0);

    /// Builds a set from a list of faults.
    #[must_use]
    pub const fn of(faults: &[FaultId]) -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < faults.len() {
            bits |= 1 << faults[index].index();
            index += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn contains(self, fault: FaultId) -> bool {
        self.0 & (1 << fault.index()) != 0
    }

    pub fn insert(&mut self, fault: FaultId) {
        self.0 |= 1 << fault.index();
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates members in [`FaultId::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = FaultId> {
        FaultId::ALL
            .into_iter()
            .filter(move |fault| self.contains(*fault))
    }
}

/// Minimum and maximum cell ADC codes across the active cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageExtremes {
    pub min: u16,
    pub max: u16,
}

impl VoltageExtremes {
    #[must_use]
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Extremes of `cells`, or `None` when no cell is present.
    #[must_use]
    pub fn from_cells(cells: &[u16]) -> Option<Self> {
        let min = cells.iter().copied().min()?;
        let max = cells.iter().copied().max()?;
        Some(Self { min, max })
    }
}

/// Fresh measurements for one protection cycle.
///
/// The engine cannot tell a repeated sample from an unchanged measurement;
/// callers must supply newly acquired data every cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleInputs {
    pub status: StatusSnapshot,
    /// Coulomb-counter code with the configured offset already removed.
    pub current: i16,
    pub cells: VoltageExtremes,
    /// User (or future auto-retry) request to clear reset-qualified faults.
    pub clear_requested: bool,
}

/// A state change observed during evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultTransition {
    pub fault: FaultId,
    pub transition: Transition,
}

/// Result of one evaluation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleReport {
    /// Trip and clear edges in evaluation order.
    pub transitions: Vec<FaultTransition, FAULT_COUNT>,
    pub switches: SwitchEnable,
    /// `true` when `switches` differs from the last value written to hardware.
    pub switch_write_owed: bool,
    pub pending_clear: ClearMask,
    pub indicator: IndicatorCommand,
}

impl CycleReport {
    #[must_use]
    pub fn tripped(&self) -> FaultSet {
        self.edges(Transition::Tripped)
    }

    #[must_use]
    pub fn cleared(&self) -> FaultSet {
        self.edges(Transition::Cleared)
    }

    fn edges(&self, kind: Transition) -> FaultSet {
        let mut set = FaultSet::EMPTY;
        for edge in self.transitions.iter().filter(|edge| edge.transition == kind) {
            set.insert(edge.fault);
        }
        set
    }
}

/// Read-only view of a single pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultSummary {
    pub fault: FaultId,
    pub state: FaultState,
    pub trips: u16,
    pub indicator: Indicator,
    /// Debounce count of the qualifier consulted in the current state.
    pub debounce: u16,
}

/// Owns the fault pairs and arbitrates their outputs.
#[derive(Clone, Debug)]
pub struct ProtectionEngine {
    over_voltage: AfeMcuPair,
    under_voltage: AfeMcuPair,
    short_circuit_discharge: AfeResetPair,
    over_current_discharge: AfeResetPair,
    burst_current_discharge: McuResetPair,
    max_current_discharge: McuResetPair,
    burst_current_charge: McuResetPair,
    max_current_charge: McuResetPair,
    inhibits: InhibitMap,
    switches: SwitchEnable,
    written: SwitchEnable,
    pending_clear: ClearMask,
    indicator: IndicatorCommand,
    indicator_owner: Option<FaultId>,
}

impl ProtectionEngine {
    /// Validates `config` and builds every pair in the `Cleared` state.
    ///
    /// The hardware is assumed to start with both switches open, so the
    /// first cycle with no active fault owes a switch write.
    pub fn new(config: &ProtectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            over_voltage: config.over_voltage.build(),
            under_voltage: config.under_voltage.build(),
            short_circuit_discharge: config.short_circuit_discharge.build(),
            over_current_discharge: config.over_current_discharge.build(),
            burst_current_discharge: config.burst_current_discharge.build(),
            max_current_discharge: config.max_current_discharge.build(),
            burst_current_charge: config.burst_current_charge.build(),
            max_current_charge: config.max_current_charge.build(),
            inhibits: config.inhibits,
            switches: SwitchEnable::DISABLED,
            written: SwitchEnable::DISABLED,
            pending_clear: ClearMask::EMPTY,
            indicator: IndicatorCommand::Off,
            indicator_owner: None,
        })
    }

    /// Runs every pair once against `inputs` and aggregates the outcome.
    ///
    /// Status bits still waiting on a clear write are masked out so a
    /// dropped write cannot re-trip the pair that just cleared.
    pub fn evaluate(&mut self, inputs: &CycleInputs) -> CycleReport {
        let mut transitions = Vec::new();
        let inputs = CycleInputs {
            status: inputs.status.without(self.pending_clear),
            ..*inputs
        };

        for fault in EVALUATION_ORDER {
            let transition = self.evaluate_pair(fault, &inputs);
            match transition {
                Transition::None => continue,
                Transition::Tripped => {
                    self.indicator = IndicatorCommand::Show(self.summary(fault).indicator);
                    self.indicator_owner = Some(fault);
                }
                Transition::Cleared => {
                    let mask = self.clear_mask(fault);
                    self.pending_clear.insert(mask);
                }
            }
            // One edge per pair per cycle, so the buffer cannot overflow.
            let _ = transitions.push(FaultTransition { fault, transition });
        }

        self.switches = self.aggregate();
        self.arbitrate_indicator();

        CycleReport {
            transitions,
            switches: self.switches,
            switch_write_owed: self.switches != self.written,
            pending_clear: self.pending_clear,
            indicator: self.indicator,
        }
    }

    /// Applies owed register writes: the pending clear mask first, then the
    /// switch enables if they changed since the last successful write.
    ///
    /// A failed write leaves the corresponding output outstanding so that
    /// the next flush retries it.
    pub fn flush<P>(&mut self, port: &mut P) -> Result<FlushReport, FlushError<P::Error>>
    where
        P: ProtectionOutputs,
    {
        let mut report = FlushReport::default();

        if !self.pending_clear.is_empty() {
            let mask = self.pending_clear;
            port.clear_status(mask).map_err(FlushError::ClearStatus)?;
            self.pending_clear = ClearMask::EMPTY;
            report.cleared = Some(mask);
        }

        if self.switches != self.written {
            port.write_switches(self.switches)
                .map_err(FlushError::WriteSwitches)?;
            self.written = self.switches;
            report.switches_written = Some(self.switches);
        }

        Ok(report)
    }

    #[must_use]
    pub fn state(&self, fault: FaultId) -> FaultState {
        self.summary(fault).state
    }

    #[must_use]
    pub fn trip_count(&self, fault: FaultId) -> u16 {
        self.summary(fault).trips
    }

    /// Switch enables computed by the last evaluation.
    #[must_use]
    pub const fn switches(&self) -> SwitchEnable {
        self.switches
    }

    /// Switch enables last written successfully.
    #[must_use]
    pub const fn written_switches(&self) -> SwitchEnable {
        self.written
    }

    #[must_use]
    pub const fn pending_clear(&self) -> ClearMask {
        self.pending_clear
    }

    #[must_use]
    pub const fn indicator(&self) -> IndicatorCommand {
        self.indicator
    }

    #[must_use]
    pub const fn inhibits(&self) -> InhibitMap {
        self.inhibits
    }

    /// Faults currently tripped.
    #[must_use]
    pub fn tripped(&self) -> FaultSet {
        let mut set = FaultSet::EMPTY;
        for fault in FaultId::ALL {
            if self.state(fault).is_tripped() {
                set.insert(fault);
            }
        }
        set
    }

    /// Status bits the engine clears itself. The acquisition layer must leave
    /// these latched so the AFE-latched pairs observe them.
    #[must_use]
    pub fn owned_status_bits(&self) -> ClearMask {
        self.over_voltage
            .clear_mask()
            .union(self.under_voltage.clear_mask())
            .union(self.short_circuit_discharge.clear_mask())
            .union(self.over_current_discharge.clear_mask())
    }

    /// Summaries of every pair, highest priority first.
    pub fn summaries(&self) -> impl Iterator<Item = FaultSummary> + '_ {
        FaultId::ALL.into_iter().map(|fault| self.summary(fault))
    }

    #[must_use]
    pub fn summary(&self, fault: FaultId) -> FaultSummary {
        match fault {
            FaultId::OverVoltage => summarize(fault, &self.over_voltage, 0, |clear| clear.count()),
            FaultId::UnderVoltage => {
                summarize(fault, &self.under_voltage, 0, |clear| clear.count())
            }
            FaultId::ShortCircuitDischarge => {
                summarize(fault, &self.short_circuit_discharge, 0, |_| 0)
            }
            FaultId::OverCurrentDischarge => {
                summarize(fault, &self.over_current_discharge, 0, |_| 0)
            }
            FaultId::BurstCurrentDischarge => summarize(
                fault,
                &self.burst_current_discharge,
                self.burst_current_discharge.latch().count(),
                |_| 0,
            ),
            FaultId::MaxCurrentDischarge => summarize(
                fault,
                &self.max_current_discharge,
                self.max_current_discharge.latch().count(),
                |_| 0,
            ),
            FaultId::BurstCurrentCharge => summarize(
                fault,
                &self.burst_current_charge,
                self.burst_current_charge.latch().count(),
                |_| 0,
            ),
            FaultId::MaxCurrentCharge => summarize(
                fault,
                &self.max_current_charge,
                self.max_current_charge.latch().count(),
                |_| 0,
            ),
        }
    }

    fn evaluate_pair(&mut self, fault: FaultId, inputs: &CycleInputs) -> Transition {
        let CycleInputs {
            status,
            current,
            cells,
            clear_requested,
        } = *inputs;

        match fault {
            FaultId::OverVoltage => self.over_voltage.evaluate(status, cells.max),
            FaultId::UnderVoltage => self.under_voltage.evaluate(status, cells.min),
            FaultId::ShortCircuitDischarge => {
                self.short_circuit_discharge.evaluate(status, clear_requested)
            }
            FaultId::OverCurrentDischarge => {
                self.over_current_discharge.evaluate(status, clear_requested)
            }
            FaultId::BurstCurrentDischarge => {
                self.burst_current_discharge.evaluate(current, clear_requested)
            }
            FaultId::MaxCurrentDischarge => {
                self.max_current_discharge.evaluate(current, clear_requested)
            }
            FaultId::BurstCurrentCharge => {
                self.burst_current_charge.evaluate(current, clear_requested)
            }
            FaultId::MaxCurrentCharge => self.max_current_charge.evaluate(current, clear_requested),
        }
    }

    fn clear_mask(&self, fault: FaultId) -> ClearMask {
        match fault {
            FaultId::OverVoltage => self.over_voltage.clear_mask(),
            FaultId::UnderVoltage => self.under_voltage.clear_mask(),
            FaultId::ShortCircuitDischarge => self.short_circuit_discharge.clear_mask(),
            FaultId::OverCurrentDischarge => self.over_current_discharge.clear_mask(),
            FaultId::BurstCurrentDischarge => self.burst_current_discharge.clear_mask(),
            FaultId::MaxCurrentDischarge => self.max_current_discharge.clear_mask(),
            FaultId::BurstCurrentCharge => self.burst_current_charge.clear_mask(),
            FaultId::MaxCurrentCharge => self.max_current_charge.clear_mask(),
        }
    }

    fn aggregate(&self) -> SwitchEnable {
        let tripped = self.tripped();
        let inhibited = |set: FaultSet| set.bits() & tripped.bits() != 0;

        SwitchEnable {
            charge: !inhibited(self.inhibits.charge),
            discharge: !inhibited(self.inhibits.discharge),
        }
    }

    fn arbitrate_indicator(&mut self) {
        if self.switches.is_fully_enabled() {
            self.indicator = IndicatorCommand::Off;
            self.indicator_owner = None;
            return;
        }

        let owner_tripped = self
            .indicator_owner
            .is_some_and(|owner| self.state(owner).is_tripped());
        if owner_tripped {
            return;
        }

        // The owner cleared while others remain tripped: fall back to the
        // most important fault still holding a switch open.
        let fallback = EVALUATION_ORDER
            .into_iter()
            .rev()
            .find(|fault| self.state(*fault).is_tripped());
        if let Some(fault) = fallback {
            self.indicator = IndicatorCommand::Show(self.summary(fault).indicator);
        }
        self.indicator_owner = fallback;
    }
}

fn summarize<L, C, F>(
    fault: FaultId,
    pair: &FaultPair<L, C>,
    latch_count: u16,
    clear_count: F,
) -> FaultSummary
where
    L: LatchQualifier,
    C: ClearQualifier,
    F: FnOnce(&C) -> u16,
{
    let debounce = match pair.state() {
        FaultState::Cleared => latch_count,
        FaultState::Tripped => clear_count(pair.clear()),
    };

    FaultSummary {
        fault,
        state: pair.state(),
        trips: pair.trips(),
        indicator: pair.indicator(),
        debounce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtectionConfig;

    fn engine() -> ProtectionEngine {
        ProtectionEngine::new(&ProtectionConfig::default()).expect("default config is valid")
    }

    fn quiet() -> CycleInputs {
        CycleInputs {
            status: StatusSnapshot::from_raw(0),
            current: 0,
            cells: VoltageExtremes::new(8_500, 8_600),
            clear_requested: false,
        }
    }

    #[test]
    fn evaluation_order_is_reverse_priority() {
        let priorities = EVALUATION_ORDER.map(FaultId::priority);
        assert!(priorities.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn fault_id_round_trips_through_index_and_code() {
        for fault in FaultId::ALL {
            assert_eq!(FaultId::from_index(fault.index()), Some(fault));
            assert_eq!(FaultId::from_code(fault.code()), Some(fault));
        }
        assert_eq!(FaultId::from_code("ovp"), Some(FaultId::OverVoltage));
        assert_eq!(FaultId::from_index(8), None);
    }

    #[test]
    fn first_quiet_cycle_owes_switch_enable() {
        let mut engine = engine();
        let report = engine.evaluate(&quiet());

        assert!(report.transitions.is_empty());
        assert_eq!(report.switches, SwitchEnable::ENABLED);
        assert!(report.switch_write_owed);
        assert_eq!(report.indicator, IndicatorCommand::Off);
    }

    #[test]
    fn owned_status_bits_cover_voltage_pairs() {
        assert_eq!(engine().owned_status_bits(), ClearMask::from_bits(0b1100));
    }

    #[test]
    fn summary_reports_active_debounce() {
        let mut engine = engine();
        let mut inputs = quiet();
        inputs.current = -2_000;
        let _ = engine.evaluate(&inputs);

        let summary = engine.summary(FaultId::BurstCurrentDischarge);
        assert_eq!(summary.state, FaultState::Cleared);
        assert_eq!(summary.debounce, 1);
    }
}
