use std::convert::Infallible;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use bms_core::afe::{
    AfeRegisters, Bq769x0, CELL_CHANNELS, Calibration, DEFAULT_CELL_MAP, Measurements, StatusBit,
    reg,
};
use bms_core::fault::Transition;
use bms_core::profile::{BuiltinProfile, LoadedProfile, ProfileError};
use bms_core::protection::{CycleReport, ProtectionEngine};
use bms_core::repl::catalog::{self, CommandSpec};
use bms_core::repl::grammar::{self, AfeCommand, Command, PressKind};
use bms_core::repl::status::StatusFormatter;
use bms_core::telemetry::{
    ProtectionEventKind, ProtectionPayload, TelemetryInstant, TelemetryRecorder,
};

/// Cell voltage the simulated pack starts at, in millivolts.
const NOMINAL_CELL_MV: u32 = 3_300;

/// Register file standing in for the BQ769x0.
///
/// `SYS_STAT` is write-1-to-clear. Bits in `condition` model hardware faults
/// that are still present and are latched again on every conversion.
pub struct SimulatedAfe {
    registers: [u8; 0x60],
    condition: u8,
}

impl SimulatedAfe {
    pub fn new() -> Self {
        let mut registers = [0; 0x60];
        // Trims for a 382 uV/LSB gain and zero offset.
        registers[usize::from(reg::ADCGAIN1)] = 0x08;
        registers[usize::from(reg::ADCGAIN2)] = 0x20;
        Self {
            registers,
            condition: 0,
        }
    }

    /// Completes one ADC/coulomb-counter conversion.
    fn convert(&mut self) {
        self.registers[usize::from(reg::SYS_STAT)] |=
            self.condition | StatusBit::CoulombCounterReady.mask();
    }

    fn status(&self) -> u8 {
        self.registers[usize::from(reg::SYS_STAT)]
    }

    fn set_condition(&mut self, bits: u8) {
        self.condition = bits;
        self.registers[usize::from(reg::SYS_STAT)] |= bits;
    }

    fn raw_current(&self) -> i16 {
        let at = usize::from(reg::CC_HI);
        i16::from_be_bytes([self.registers[at], self.registers[at + 1]])
    }

    fn set_raw_current(&mut self, code: i16) {
        let at = usize::from(reg::CC_HI);
        self.registers[at..at + 2].copy_from_slice(&code.to_be_bytes());
    }

    fn cell(&self, channel: usize) -> u16 {
        let at = usize::from(reg::VC1_HI) + channel * 2;
        u16::from_be_bytes([self.registers[at], self.registers[at + 1]])
    }

    fn set_cell(&mut self, channel: usize, code: u16) {
        let at = usize::from(reg::VC1_HI) + channel * 2;
        self.registers[at..at + 2].copy_from_slice(&code.to_be_bytes());
    }

    /// Places `vmin` on the first active channel and `vmax` on the rest.
    fn spread_cells(&mut self, map: u16, vmin: u16, vmax: u16) {
        let mut first = true;
        for channel in (0..CELL_CHANNELS).filter(|channel| map & (1 << channel) != 0) {
            self.set_cell(channel, if first { vmin } else { vmax });
            first = false;
        }
    }

    fn active_cells(&self, map: u16) -> (u16, u16) {
        let mut codes = (0..CELL_CHANNELS)
            .filter(|channel| map & (1 << channel) != 0)
            .map(|channel| self.cell(channel));
        let first = codes.next().unwrap_or(0);
        codes.fold((first, first), |(min, max), code| (min.min(code), max.max(code)))
    }
}

impl Default for SimulatedAfe {
    fn default() -> Self {
        Self::new()
    }
}

impl AfeRegisters for SimulatedAfe {
    type Error = Infallible;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error> {
        Ok(self.registers[usize::from(register)])
    }

    fn read_block(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let start = usize::from(start);
        buffer.copy_from_slice(&self.registers[start..start + buffer.len()]);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        let slot = &mut self.registers[usize::from(register)];
        if register == reg::SYS_STAT {
            *slot &= !value;
        } else {
            *slot = value;
        }
        Ok(())
    }
}

/// Simulated time since the session started, advanced one cycle at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(Duration);

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

pub struct Session {
    afe: Bq769x0<SimulatedAfe>,
    engine: ProtectionEngine,
    profile: BuiltinProfile,
    recorder: TelemetryRecorder<SimInstant>,
    measurements: Option<Measurements>,
    clock: SimInstant,
    cycles: u32,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(profile: BuiltinProfile) -> io::Result<Self> {
        let mut afe = Bq769x0::new(SimulatedAfe::new(), Calibration::DEFAULT);
        let calibration = afe.read_calibration().map_err(infallible)?;
        let loaded = profile.load(&calibration).map_err(invalid_profile)?;
        let engine = ProtectionEngine::new(&loaded.config)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        afe.configure(&loaded.setup).map_err(infallible)?;

        let nominal = calibration.cell_code(NOMINAL_CELL_MV);
        afe.bus_mut()
            .spread_cells(DEFAULT_CELL_MAP, nominal, nominal);
        afe.bus_mut()
            .set_raw_current(calibration.current_offset);

        Ok(Self {
            afe,
            engine,
            profile,
            recorder: TelemetryRecorder::new(),
            measurements: None,
            clock: SimInstant(Duration::ZERO),
            cycles: 0,
            transcript: None,
            started_at: HostInstant::now(),
        })
    }

    /// Same as [`Session::new`], mirroring every exchange to `path`.
    pub fn with_transcript(profile: BuiltinProfile, path: &Path, header: &str) -> io::Result<Self> {
        let mut session = Self::new(profile)?;
        session.transcript = Some(TranscriptLogger::new(path, header)?);
        Ok(session)
    }

    pub fn engine(&self) -> &ProtectionEngine {
        &self.engine
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match grammar::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command<'_>) -> Vec<String> {
        match command {
            Command::Status => self.handle_status(),
            Command::Faults => self.handle_faults(),
            Command::Afe(afe) => self.handle_afe(afe),
            Command::Cycle { count } => self.handle_cycle(count),
            Command::Press(kind) => self.handle_press(kind),
            Command::Profile(profile) => self.handle_profile(profile),
            Command::History => self.handle_history(),
            Command::Help(help) => handle_help(help.topic),
        }
    }

    fn handle_status(&self) -> Vec<String> {
        let calibration = self.afe.calibration();
        let mut formatter = StatusFormatter::new(&self.engine, calibration);
        if let Some(measurements) = self.measurements.as_ref() {
            formatter = formatter.with_measurements(measurements);
        }

        let mut lines = vec![format!(
            "profile {} cycles={} t=+{}ms",
            self.profile,
            self.cycles,
            self.clock.0.as_millis()
        )];
        let mut switches = String::new();
        let mut indicator = String::new();
        let mut afe = String::new();
        let rendered = formatter
            .write_switch_line(&mut switches)
            .and_then(|()| formatter.write_indicator_line(&mut indicator))
            .and_then(|()| formatter.write_measurement_line(&mut afe));
        if rendered.is_err() {
            return vec!["ERR render".to_string()];
        }
        lines.extend([switches, indicator, afe]);
        lines
    }

    fn handle_faults(&self) -> Vec<String> {
        let formatter = StatusFormatter::new(&self.engine, self.afe.calibration());
        let mut table = String::new();
        if formatter.write_fault_table(&mut table).is_err() {
            return vec!["ERR render".to_string()];
        }
        table.lines().map(str::to_string).collect()
    }

    fn handle_afe(&mut self, command: AfeCommand) -> Vec<String> {
        let map = self.afe.cell_map();
        let offset = self.afe.calibration().current_offset;
        let mut head = "afe";

        if !command.is_query() {
            let bus = self.afe.bus_mut();
            if let Some(stat) = command.stat {
                bus.set_condition(stat);
            }
            if let Some(current) = command.current {
                bus.set_raw_current(current.saturating_add(offset));
            }
            if command.vmin.is_some() || command.vmax.is_some() {
                let (min, max) = bus.active_cells(map);
                let vmin = command.vmin.unwrap_or(min);
                let vmax = command.vmax.unwrap_or(max).max(vmin);
                bus.spread_cells(map, vmin, vmax);
            }
            head = "OK afe";
        }

        let bus = self.afe.bus_mut();
        let (vmin, vmax) = bus.active_cells(map);
        vec![format!(
            "{head} stat={:#04x} condition={:#04x} current={} vmin={vmin} vmax={vmax}",
            bus.status(),
            bus.condition,
            bus.raw_current().saturating_sub(offset),
        )]
    }

    fn handle_cycle(&mut self, count: u16) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..count {
            self.run_cycle(false, &mut lines);
        }
        lines.push(format!(
            "OK cycle count={count} switches={} indicator={}",
            self.engine.switches(),
            self.engine.indicator()
        ));
        lines
    }

    fn handle_press(&mut self, kind: PressKind) -> Vec<String> {
        let mut lines = Vec::new();
        let clear_requested = matches!(kind, PressKind::Long);
        if clear_requested {
            self.recorder.record(
                ProtectionEventKind::ClearRequested,
                ProtectionPayload::None,
                self.clock,
            );
        }
        self.run_cycle(clear_requested, &mut lines);
        let label = match kind {
            PressKind::Short => "short",
            PressKind::Long => "long",
        };
        lines.push(format!(
            "OK press {label} switches={} indicator={}",
            self.engine.switches(),
            self.engine.indicator()
        ));
        lines
    }

    fn handle_profile(&mut self, profile: BuiltinProfile) -> Vec<String> {
        let loaded = match profile.load(self.afe.calibration()) {
            Ok(loaded) => loaded,
            Err(err) => return vec![format!("ERR profile {profile} {err}")],
        };
        match self.apply_profile(profile, &loaded) {
            Ok(()) => vec![format!(
                "OK profile {profile} applied={} skipped={}",
                loaded.applied, loaded.skipped
            )],
            Err(message) => vec![format!("ERR profile {profile} {message}")],
        }
    }

    fn apply_profile(&mut self, profile: BuiltinProfile, loaded: &LoadedProfile) -> Result<(), String> {
        let engine = ProtectionEngine::new(&loaded.config).map_err(|err| err.to_string())?;
        self.afe.configure(&loaded.setup).map_err(|err| match err {})?;
        self.engine = engine;
        self.profile = profile;
        self.measurements = None;
        self.recorder.record(
            ProtectionEventKind::ProfileLoaded,
            ProtectionPayload::None,
            self.clock,
        );
        Ok(())
    }

    fn handle_history(&self) -> Vec<String> {
        if self.recorder.is_empty() {
            return vec!["history empty".to_string()];
        }

        self.recorder
            .oldest_first()
            .map(|record| {
                let mut line = format!(
                    "#{:<3} +{}ms {} code={:#04x}",
                    record.id,
                    record.timestamp.0.as_millis(),
                    record.event,
                    record.event.to_raw()
                );
                match record.details {
                    ProtectionPayload::Trip {
                        trips,
                        since_previous_trip,
                    } => {
                        let _ = write!(line, " trips={trips}");
                        if let Some(since) = since_previous_trip {
                            let _ = write!(line, " since-previous={}ms", since.as_millis());
                        }
                    }
                    ProtectionPayload::Status(mask) => {
                        let _ = write!(line, " mask={mask}");
                    }
                    ProtectionPayload::None => {}
                }
                line
            })
            .collect()
    }

    /// One protection cycle: convert, acquire, evaluate, flush.
    fn run_cycle(&mut self, clear_requested: bool, lines: &mut Vec<String>) {
        self.cycles = self.cycles.wrapping_add(1);
        let period = u64::from(self.afe.calibration().cycle_ms);
        self.clock = SimInstant(self.clock.0 + Duration::from_millis(period));

        self.afe.bus_mut().convert();
        let measurements = match self.afe.acquire(self.engine.owned_status_bits()) {
            Ok(measurements) => measurements,
            Err(err) => match err {},
        };
        self.measurements = Some(measurements);

        let report = self
            .engine
            .evaluate(&measurements.into_inputs(clear_requested));
        let engine = &self.engine;
        self.recorder
            .record_cycle(&report, |fault| engine.trip_count(fault), self.clock);
        self.describe_edges(&report, lines);

        let outcome = self.engine.flush(&mut self.afe);
        if let Ok(flushed) = &outcome {
            if let Some(mask) = flushed.cleared {
                lines.push(format!("cycle {} status-cleared {mask}", self.cycles));
            }
            if let Some(switches) = flushed.switches_written {
                lines.push(format!("cycle {} switches {switches}", self.cycles));
            }
        }
        self.recorder.record_flush(&outcome, self.clock);
    }

    fn describe_edges(&self, report: &CycleReport, lines: &mut Vec<String>) {
        for edge in &report.transitions {
            let verb = match edge.transition {
                Transition::Tripped => "tripped",
                Transition::Cleared => "cleared",
                Transition::None => continue,
            };
            lines.push(format!(
                "cycle {} {verb} {} trips={}",
                self.cycles,
                edge.fault,
                self.engine.trip_count(edge.fault)
            ));
        }
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    match topic {
        None => {
            let mut lines = vec!["Commands:".to_string()];
            lines.extend(catalog::commands().iter().map(describe_command));
            lines
        }
        Some(name) => match catalog::find(name) {
            Some(spec) => vec![describe_command(spec)],
            None => vec![
                format!("No help available for `{name}`."),
                format!("Available topics: {}", help_topic_list()),
            ],
        },
    }
}

fn describe_command(spec: &CommandSpec) -> String {
    format!("  {:<44} - {}", spec.usage, spec.summary)
}

fn help_topic_list() -> String {
    catalog::commands()
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn infallible(err: Infallible) -> io::Error {
    match err {}
}

fn invalid_profile(err: ProfileError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# {header}")?;
        writeln!(
            self.writer,
            "# Timestamps are wall-clock milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::protection::{FaultId, SwitchEnable};

    fn session() -> Session {
        Session::new(BuiltinProfile::LiFePO4).expect("session")
    }

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("no transcript I/O")
    }

    #[test]
    fn first_cycle_closes_both_switches() {
        let mut session = session();
        let lines = run(&mut session, "cycle");
        assert_eq!(lines[0], "cycle 1 switches chg=on dsg=on");
        assert_eq!(session.engine().written_switches(), SwitchEnable::ENABLED);
    }

    #[test]
    fn hardware_short_circuit_opens_discharge() {
        let mut session = session();
        run(&mut session, "cycle");
        run(&mut session, "afe stat=0x02");
        let lines = run(&mut session, "cycle");

        assert!(lines.iter().any(|line| line.starts_with("cycle 2 tripped SCPD")));
        assert!(lines.contains(&"cycle 2 switches chg=on dsg=off".to_string()));
        assert!(session.engine().tripped().contains(FaultId::ShortCircuitDischarge));
    }

    #[test]
    fn long_press_is_logged_in_history() {
        let mut session = session();
        run(&mut session, "press long");
        let history = run(&mut session, "history");
        assert!(history[0].contains("clear-requested"));
        assert!(history.iter().any(|line| line.contains("switches-written")));
    }

    #[test]
    fn afe_query_reports_nominal_pack() {
        let mut session = session();
        let lines = run(&mut session, "afe");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("afe stat="));
        assert!(lines[0].ends_with("current=0 vmin=8638 vmax=8638"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = session();
        let lines = run(&mut session, "cycle cycle");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR syntax"));
    }

    #[test]
    fn profile_switch_resets_engine() {
        let mut session = session();
        run(&mut session, "cycle");
        let lines = run(&mut session, "profile lic");
        assert!(lines[0].starts_with("OK profile lic applied="));
        assert_eq!(session.engine().written_switches(), SwitchEnable::DISABLED);
    }

    #[test]
    fn help_lists_every_command() {
        let lines = handle_help(None);
        assert_eq!(lines.len(), catalog::commands().len() + 1);
        assert_eq!(handle_help(Some("bogus")).len(), 2);
    }
}
