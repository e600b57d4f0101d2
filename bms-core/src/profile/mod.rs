//! Persisted `CODE=VALUE;` profile strings.
//!
//! [`load`] walks a profile statement by statement, checks every value
//! against the [`catalog`], converts accepted values to AFE codes through a
//! [`Calibration`], and returns a validated [`ProtectionConfig`] together with
//! the static AFE register setup. Parsing stops at the first bad statement.

pub mod catalog;
pub mod grammar;

use core::fmt;

use crate::afe::{self, AfeSetup, Calibration};
use crate::config::{ConfigError, ProtectionConfig, ResetConfig};
use crate::protection::FaultId;
use crate::qualifier::RetryLimit;

use self::catalog::{ParamSpec, Q8_ONE, Target, ValueKind};
use self::grammar::{RawValue, Statement, StatementError};

/// Factory profile for LiFePO4 cells.
pub const LIFEPO4: &str = "OVTL=3.90; OVDL=8; OVTC=3.80; OVDC=8.0; OVRD=20; \
UVTL=2.80; UVDL=8; UVTC=2.90; UVDC=8; UVRC=50; \
SCTD=22.25; SCDD=100; SCRD=3X; OCTD=15.25; OCDD=160; OCRD=3X; \
BCTD=12.0; BCDD=5; BCRD=4X; MCTD=10.0; MCDD=60; MCRD=5X; \
BCTC=10.0; BCDC=5; BCRC=4X; MCTC=5.0; MCDC=60; MCRC=5X; \
OTTC=100; OTTD=100; OTTS=120; OTTP=120; OTDP=10; OTRP=10X; \
OTTB=50; OTDB=10; OTRB=IX; UTTB=5; UTDB=60; UTRB=IX; \
OTTA=50; OTDA=10; OTRA=IX; UTTA=5; UTDA=60; UTRA=IX; ";

/// Factory profile for lithium-ion capacitors.
pub const LITHIUM_CAPACITOR: &str = "OVTL=4.20; OVDL=8; OVTC=4.10; OVDC=8.0; OVRD=20; \
UVTL=2.80; UVDL=8; UVTC=2.90; UVDC=8; UVRC=50; \
SCTD=22.25; SCDD=100; SCRD=3X; OCTD=15.25; OCDD=160; OCRD=3X; \
BCTD=12.0; BCDD=5; BCRD=4X; MCTD=10.0; MCDD=60; MCRD=5X; \
BCTC=10.0; BCDC=5; BCRC=4X; MCTC=5.0; MCDC=60; MCRC=5X; \
OTTC=100; OTTD=100; OTTS=120; OTTP=120; OTDP=10; OTRP=10X; \
OTTB=50; OTDB=10; OTRB=IX; UTTB=5; UTDB=60; UTRB=IX; \
OTTA=50; OTDA=10; OTRA=IX; UTTA=5; UTDA=60; UTRA=IX; ";

/// Profiles stored in flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuiltinProfile {
    LiFePO4,
    LithiumCapacitor,
}

impl BuiltinProfile {
    pub const ALL: [BuiltinProfile; 2] = [BuiltinProfile::LiFePO4, BuiltinProfile::LithiumCapacitor];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            BuiltinProfile::LiFePO4 => "lifepo4",
            BuiltinProfile::LithiumCapacitor => "lic",
        }
    }

    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            BuiltinProfile::LiFePO4 => LIFEPO4,
            BuiltinProfile::LithiumCapacitor => LITHIUM_CAPACITOR,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(name))
    }

    pub fn load(self, calibration: &Calibration) -> Result<LoadedProfile, ProfileError> {
        load(self.text(), calibration)
    }
}

impl fmt::Display for BuiltinProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProfileErrorKind {
    UnknownParameter,
    MissingEquals,
    InvalidValue,
    /// Value outside the parameter's exclusive limits, or not expressible
    /// in the AFE registers.
    ValueOutOfRange,
    OptionNotAllowed,
    MissingDelimiter,
    /// Value shape does not match the parameter (e.g. a retry count for a
    /// voltage).
    TypeMismatch,
    Lex,
    /// The assembled configuration was refused.
    Config(ConfigError),
}

impl fmt::Display for ProfileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileErrorKind::UnknownParameter => f.write_str("unknown parameter"),
            ProfileErrorKind::MissingEquals => f.write_str("expected `=`"),
            ProfileErrorKind::InvalidValue => f.write_str("invalid value"),
            ProfileErrorKind::ValueOutOfRange => f.write_str("value out of range"),
            ProfileErrorKind::OptionNotAllowed => f.write_str("value is not an allowed option"),
            ProfileErrorKind::MissingDelimiter => f.write_str("expected `;`"),
            ProfileErrorKind::TypeMismatch => f.write_str("value type does not fit parameter"),
            ProfileErrorKind::Lex => f.write_str("unexpected character"),
            ProfileErrorKind::Config(error) => write!(f, "rejected configuration: {error}"),
        }
    }
}

/// Profile failure with the byte offset it was detected at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProfileError {
    pub kind: ProfileErrorKind,
    pub offset: usize,
}

impl ProfileError {
    const fn new(kind: ProfileErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

impl From<StatementError> for ProfileError {
    fn from(error: StatementError) -> Self {
        Self::new(error.kind, error.offset)
    }
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.kind, self.offset)
    }
}

/// Outcome of a successful [`load`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoadedProfile {
    pub config: ProtectionConfig,
    pub setup: AfeSetup,
    /// Statements that changed the configuration or setup.
    pub applied: u16,
    /// Statements that were validated but have no consumer.
    pub skipped: u16,
}

/// Parses `text`, starting from the factory configuration.
pub fn load(text: &str, calibration: &Calibration) -> Result<LoadedProfile, ProfileError> {
    let mut builder = ProfileBuilder::new(calibration);
    let mut cursor = 0;

    while let Some(start) = next_statement(text, cursor) {
        let end = text[start..]
            .find(';')
            .map_or(text.len(), |at| start + at + 1);
        let statement = grammar::parse_statement(&text[start..end], start)?;
        builder.apply(&statement)?;
        cursor = end;
    }

    builder.finish(text.len())
}

fn next_statement(text: &str, cursor: usize) -> Option<usize> {
    text[cursor..]
        .find(|ch: char| !ch.is_ascii_whitespace())
        .map(|at| cursor + at)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decoded {
    Q8(u32),
    Uint(u32),
    Retry(RetryLimit),
}

struct ProfileBuilder<'c> {
    calibration: &'c Calibration,
    config: ProtectionConfig,
    setup: AfeSetup,
    ov_delay_s: u8,
    uv_delay_s: u8,
    applied: u16,
    skipped: u16,
}

impl<'c> ProfileBuilder<'c> {
    fn new(calibration: &'c Calibration) -> Self {
        Self {
            calibration,
            config: ProtectionConfig::DEFAULT,
            setup: AfeSetup::DEFAULT,
            ov_delay_s: 8,
            uv_delay_s: 8,
            applied: 0,
            skipped: 0,
        }
    }

    fn apply(&mut self, statement: &Statement<'_>) -> Result<(), ProfileError> {
        let spec = catalog::find(statement.code).ok_or(ProfileError::new(
            ProfileErrorKind::UnknownParameter,
            statement.code_span.start,
        ))?;
        let at = statement.value_span.start;
        let value = decode(&spec, statement.value).map_err(|kind| ProfileError::new(kind, at))?;

        if spec.target == Target::Skipped {
            self.skipped = self.skipped.saturating_add(1);
            return Ok(());
        }

        self.assign(spec.target, value)
            .map_err(|kind| ProfileError::new(kind, at))?;
        self.applied = self.applied.saturating_add(1);
        Ok(())
    }

    fn assign(&mut self, target: Target, value: Decoded) -> Result<(), ProfileErrorKind> {
        let out_of_range = ProfileErrorKind::ValueOutOfRange;
        let calibration = self.calibration;

        match (target, value) {
            (Target::OverVoltageTrip, Decoded::Q8(volts)) => {
                self.setup.ov_trip = calibration.ov_trip(millis(volts)).ok_or(out_of_range)?;
            }
            (Target::UnderVoltageTrip, Decoded::Q8(volts)) => {
                self.setup.uv_trip = calibration.uv_trip(millis(volts)).ok_or(out_of_range)?;
            }
            (Target::OverVoltageDelay, Decoded::Uint(seconds)) => {
                self.ov_delay_s = u8::try_from(seconds).map_err(|_| out_of_range)?;
            }
            (Target::UnderVoltageDelay, Decoded::Uint(seconds)) => {
                self.uv_delay_s = u8::try_from(seconds).map_err(|_| out_of_range)?;
            }
            (Target::OverVoltageClear, Decoded::Q8(volts)) => {
                self.config.over_voltage.clear.threshold = calibration.cell_code(millis(volts));
            }
            (Target::UnderVoltageClear, Decoded::Q8(volts)) => {
                self.config.under_voltage.clear.threshold = calibration.cell_code(millis(volts));
            }
            (Target::OverVoltageClearDelay, Decoded::Q8(seconds)) => {
                self.config.over_voltage.clear.limit = calibration.cycles(millis(seconds));
            }
            (Target::UnderVoltageClearDelay, Decoded::Q8(seconds)) => {
                self.config.under_voltage.clear.limit = calibration.cycles(millis(seconds));
            }
            (Target::CurrentThreshold(fault), Decoded::Q8(amps)) => {
                let milliamps = i32::try_from(millis(amps)).map_err(|_| out_of_range)?;
                let code = calibration.current_code(milliamps);
                let discharge = matches!(
                    fault,
                    FaultId::BurstCurrentDischarge | FaultId::MaxCurrentDischarge
                );
                self.config.mcu_reset_mut(fault).latch.threshold =
                    if discharge { -code } else { code };
            }
            (Target::CurrentSamples(fault), Decoded::Uint(samples)) => {
                self.config.mcu_reset_mut(fault).latch.limit =
                    u16::try_from(samples).map_err(|_| out_of_range)?;
            }
            (Target::RetryBudget(fault), Decoded::Retry(limit)) => {
                let reset = ResetConfig::retries(limit);
                match fault {
                    FaultId::ShortCircuitDischarge => self.config.short_circuit_discharge.reset = reset,
                    FaultId::OverCurrentDischarge => self.config.over_current_discharge.reset = reset,
                    _ => self.config.mcu_reset_mut(fault).reset = reset,
                }
            }
            _ => return Err(ProfileErrorKind::TypeMismatch),
        }

        Ok(())
    }

    fn finish(mut self, end: usize) -> Result<LoadedProfile, ProfileError> {
        self.setup.protect3 = afe::protect3(self.ov_delay_s, self.uv_delay_s)
            .ok_or(ProfileError::new(ProfileErrorKind::OptionNotAllowed, end))?;
        self.config
            .validate()
            .map_err(|error| ProfileError::new(ProfileErrorKind::Config(error), end))?;

        Ok(LoadedProfile {
            config: self.config,
            setup: self.setup,
            applied: self.applied,
            skipped: self.skipped,
        })
    }
}

/// Q8 quantity scaled by 1000 (volts to millivolts, seconds to milliseconds).
fn millis(q8: u32) -> u32 {
    let scaled = u64::from(q8) * 1_000 / u64::from(Q8_ONE);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

fn decode(spec: &ParamSpec, value: RawValue<'_>) -> Result<Decoded, ProfileErrorKind> {
    match (spec.kind, value) {
        (ValueKind::Retry, RawValue::Retry(text)) => parse_retry(text).map(Decoded::Retry),
        (ValueKind::Retry, RawValue::Number(_)) | (_, RawValue::Retry(_)) => {
            Err(ProfileErrorKind::TypeMismatch)
        }
        (ValueKind::Q8 { lower, upper }, RawValue::Number(text)) => {
            let raw = parse_q8(text).ok_or(ProfileErrorKind::InvalidValue)?;
            within(raw, lower, upper).map(Decoded::Q8)
        }
        (ValueKind::Unchecked, RawValue::Number(text)) => parse_q8(text)
            .map(Decoded::Q8)
            .ok_or(ProfileErrorKind::InvalidValue),
        (ValueKind::Uint { lower, upper }, RawValue::Number(text)) => {
            let raw = parse_uint(text)?;
            within(raw, lower, upper).map(Decoded::Uint)
        }
        (ValueKind::Options(options), RawValue::Number(text)) => {
            let raw = parse_uint(text)?;
            options
                .iter()
                .any(|option| u32::from(*option) == raw)
                .then_some(Decoded::Uint(raw))
                .ok_or(ProfileErrorKind::OptionNotAllowed)
        }
    }
}

fn within(raw: u32, lower: u32, upper: u32) -> Result<u32, ProfileErrorKind> {
    if raw > lower && raw < upper {
        Ok(raw)
    } else {
        Err(ProfileErrorKind::ValueOutOfRange)
    }
}

fn parse_uint(text: &str) -> Result<u32, ProfileErrorKind> {
    if text.contains('.') {
        return Err(ProfileErrorKind::TypeMismatch);
    }
    text.parse().map_err(|_| ProfileErrorKind::InvalidValue)
}

/// Decimal text to Q8, truncating the fraction.
fn parse_q8(text: &str) -> Option<u32> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if fraction.contains('.') || (whole.is_empty() && fraction.is_empty()) {
        return None;
    }

    let whole: u32 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut digits = 0_u32;
    let mut scale = 1_u32;
    for ch in fraction.chars() {
        digits = digits * 10 + ch.to_digit(10)?;
        scale *= 10;
    }

    whole.checked_mul(Q8_ONE)?.checked_add(digits * Q8_ONE / scale)
}

fn parse_retry(text: &str) -> Result<RetryLimit, ProfileErrorKind> {
    let count = text
        .strip_suffix('X')
        .ok_or(ProfileErrorKind::InvalidValue)?;
    if count == "I" {
        return Ok(RetryLimit::Unlimited);
    }
    count
        .parse()
        .map(RetryLimit::Count)
        .map_err(|_| ProfileErrorKind::ValueOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q8_truncates_fraction() {
        assert_eq!(parse_q8("3.90"), Some(998));
        assert_eq!(parse_q8("8.0"), Some(2048));
        assert_eq!(parse_q8("22.25"), Some(5696));
        assert_eq!(parse_q8(".5"), Some(128));
        assert_eq!(parse_q8("1.2.3"), None);
        assert_eq!(parse_q8("."), None);
    }

    #[test]
    fn retry_codes() {
        assert_eq!(parse_retry("3X"), Ok(RetryLimit::Count(3)));
        assert_eq!(parse_retry("IX"), Ok(RetryLimit::Unlimited));
        assert_eq!(parse_retry("300X"), Err(ProfileErrorKind::ValueOutOfRange));
    }

    #[test]
    fn millis_scales_q8() {
        assert_eq!(millis(998), 3_898);
        assert_eq!(millis(2048), 8_000);
    }

    #[test]
    fn builtin_names_resolve() {
        assert_eq!(BuiltinProfile::from_name("LiC"), Some(BuiltinProfile::LithiumCapacitor));
        assert_eq!(BuiltinProfile::from_name("lead-acid"), None);
    }
}
