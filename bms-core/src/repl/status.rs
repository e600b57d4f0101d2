//! Text rendering of protection state for the `status` and `faults` commands.
//!
//! Both front-ends feed the same [`StatusFormatter`] so the emulator
//! transcripts match what the firmware would print.

use core::fmt;

use crate::afe::{Calibration, Measurements};
use crate::protection::{FaultSummary, ProtectionEngine};

/// Renders engine state, plus the last measurements when there are any.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    engine: &'a ProtectionEngine,
    measurements: Option<&'a Measurements>,
    calibration: &'a Calibration,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(engine: &'a ProtectionEngine, calibration: &'a Calibration) -> Self {
        Self {
            engine,
            measurements: None,
            calibration,
        }
    }

    #[must_use]
    pub const fn with_measurements(mut self, measurements: &'a Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    /// Writes e.g. `switches chg=on dsg=off written=chg=on dsg=on pending-clear=0x00`.
    pub fn write_switch_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "switches {} written={} pending-clear={}",
            self.engine.switches(),
            self.engine.written_switches(),
            self.engine.pending_clear()
        )
    }

    /// Writes e.g. `indicator greenx7 tripped=OVP,UVP`.
    pub fn write_indicator_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "indicator {} tripped=", self.engine.indicator())?;
        let tripped = self.engine.tripped();
        if tripped.is_empty() {
            return writer.write_char('-');
        }
        for (index, fault) in tripped.iter().enumerate() {
            if index > 0 {
                writer.write_char(',')?;
            }
            write!(writer, "{fault}")?;
        }
        Ok(())
    }

    /// Writes e.g. `afe stat=OV|CC_READY current=-421 (-3561mA) cells=9000..10300 (3458..3958mV)`.
    pub fn write_measurement_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let Some(measurements) = self.measurements else {
            return writer.write_str("afe no samples yet");
        };
        write!(
            writer,
            "afe stat={} current={} ({}mA) cells={}..{} ({}..{}mV)",
            measurements.status,
            measurements.current,
            self.calibration.current_milliamps(measurements.current),
            measurements.cells.min,
            measurements.cells.max,
            self.calibration.cell_millivolts(measurements.cells.min),
            self.calibration.cell_millivolts(measurements.cells.max),
        )
    }

    /// Writes one `faults` row: `OVP  tripped trips=1 debounce=0/20 led=greenx7`.
    pub fn write_fault_line<W: fmt::Write>(
        &self,
        writer: &mut W,
        summary: &FaultSummary,
    ) -> fmt::Result {
        write!(
            writer,
            "{:<4} {:<7} trips={} debounce={} led={}",
            summary.fault.code(),
            summary.state,
            summary.trips,
            summary.debounce,
            summary.indicator
        )
    }

    /// Writes every fault row, one per line, highest priority first.
    pub fn write_fault_table<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        for summary in self.engine.summaries() {
            self.write_fault_line(writer, &summary)?;
            writer.write_char('\n')?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afe::StatusSnapshot;
    use crate::config::ProtectionConfig;
    use crate::protection::{CycleInputs, FaultId, VoltageExtremes};
    use crate::protection::ClearMask;

    type Line = heapless::String<160>;

    fn engine() -> ProtectionEngine {
        ProtectionEngine::new(&ProtectionConfig::DEFAULT).expect("default config is valid")
    }

    #[test]
    fn renders_idle_engine() {
        let engine = engine();
        let calibration = Calibration::DEFAULT;
        let formatter = StatusFormatter::new(&engine, &calibration);

        let mut line = Line::new();
        formatter.write_switch_line(&mut line).expect("fits");
        assert_eq!(
            line.as_str(),
            "switches chg=off dsg=off written=chg=off dsg=off pending-clear=0x00"
        );

        line.clear();
        formatter.write_indicator_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "indicator off tripped=-");

        line.clear();
        formatter.write_measurement_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "afe no samples yet");
    }

    #[test]
    fn renders_tripped_fault_row() {
        let mut engine = engine();
        let inputs = CycleInputs {
            status: StatusSnapshot::from_raw(0b0000_0100),
            cells: VoltageExtremes::new(9_000, 10_300),
            ..CycleInputs::default()
        };
        let _ = engine.evaluate(&inputs);

        let calibration = Calibration::DEFAULT;
        let formatter = StatusFormatter::new(&engine, &calibration);
        let mut line = Line::new();
        formatter
            .write_fault_line(&mut line, &engine.summary(FaultId::OverVoltage))
            .expect("fits");
        assert_eq!(line.as_str(), "OVP  tripped trips=1 debounce=0 led=greenx7");

        line.clear();
        formatter.write_indicator_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "indicator greenx7 tripped=OVP");
    }

    #[test]
    fn renders_measurements() {
        let engine = engine();
        let calibration = Calibration::DEFAULT;
        let measurements = Measurements {
            status: StatusSnapshot::from_raw(0x80),
            current: 0,
            cells: VoltageExtremes::new(9_000, 9_000),
            acknowledged: ClearMask::EMPTY,
        };
        let formatter = StatusFormatter::new(&engine, &calibration).with_measurements(&measurements);
        let mut line = Line::new();
        formatter.write_measurement_line(&mut line).expect("fits");
        assert!(line.starts_with("afe stat=CC_READY current=0 (0mA) cells=9000..9000"));
    }
}
