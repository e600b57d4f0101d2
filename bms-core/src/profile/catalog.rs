//! Parameter codes accepted in profile strings.

use crate::protection::FaultId;

/// Q8 fixed-point: 8 fractional bits.
pub const Q8_ONE: u32 = 256;

/// Shape and limits of a parameter value. Limits are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// Decimal stored as Q8; limits are Q8 raw values.
    Q8 { lower: u32, upper: u32 },
    /// Whole number.
    Uint { lower: u32, upper: u32 },
    /// One of a fixed set of whole numbers.
    Options(&'static [u8]),
    /// `NX` or `IX`.
    Retry,
    /// Any decimal; range checking belongs to another component.
    Unchecked,
}

/// What a parameter feeds once validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    OverVoltageTrip,
    OverVoltageDelay,
    OverVoltageClear,
    OverVoltageClearDelay,
    UnderVoltageTrip,
    UnderVoltageDelay,
    UnderVoltageClear,
    UnderVoltageClearDelay,
    CurrentThreshold(FaultId),
    CurrentSamples(FaultId),
    RetryBudget(FaultId),
    /// Recognised and validated, but not applied.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub code: &'static str,
    pub kind: ValueKind,
    pub target: Target,
    pub summary: &'static str,
}

const fn q8(whole: u32, hundredths: u32) -> u32 {
    whole * Q8_ONE + hundredths * Q8_ONE / 100
}

const UNBOUNDED_Q8: ValueKind = ValueKind::Q8 {
    lower: 0,
    upper: u32::MAX,
};

const SAMPLES: ValueKind = ValueKind::Uint {
    lower: 0,
    upper: 1 << 16,
};

const fn spec(code: &'static str, kind: ValueKind, target: Target, summary: &'static str) -> ParamSpec {
    ParamSpec {
        code,
        kind,
        target,
        summary,
    }
}

pub const PARAMETERS: &[ParamSpec] = &[
    spec(
        "OVTL",
        ValueKind::Q8 {
            lower: q8(3, 40),
            upper: q8(4, 80),
        },
        Target::OverVoltageTrip,
        "over-voltage latch threshold (V)",
    ),
    spec(
        "OVDL",
        ValueKind::Options(&crate::afe::OV_DELAYS_S),
        Target::OverVoltageDelay,
        "over-voltage latch delay (s)",
    ),
    spec(
        "OVTC",
        ValueKind::Q8 {
            lower: q8(3, 30),
            upper: q8(4, 70),
        },
        Target::OverVoltageClear,
        "over-voltage clear threshold (V)",
    ),
    spec(
        "OVDC",
        ValueKind::Q8 {
            lower: q8(1, 0),
            upper: q8(32, 0),
        },
        Target::OverVoltageClearDelay,
        "over-voltage clear delay (s)",
    ),
    spec(
        "OVRD",
        ValueKind::Uint { lower: 5, upper: 100 },
        Target::Skipped,
        "over-voltage discharge reduction (%)",
    ),
    spec(
        "UVTL",
        ValueKind::Q8 {
            lower: q8(2, 40),
            upper: q8(3, 10),
        },
        Target::UnderVoltageTrip,
        "under-voltage latch threshold (V)",
    ),
    spec(
        "UVDL",
        ValueKind::Options(&crate::afe::UV_DELAYS_S),
        Target::UnderVoltageDelay,
        "under-voltage latch delay (s)",
    ),
    spec(
        "UVTC",
        ValueKind::Q8 {
            lower: q8(2, 50),
            upper: q8(3, 20),
        },
        Target::UnderVoltageClear,
        "under-voltage clear threshold (V)",
    ),
    spec(
        "UVDC",
        ValueKind::Q8 {
            lower: q8(1, 0),
            upper: q8(32, 0),
        },
        Target::UnderVoltageClearDelay,
        "under-voltage clear delay (s)",
    ),
    spec(
        "UVRC",
        ValueKind::Uint { lower: 5, upper: 100 },
        Target::Skipped,
        "under-voltage charge reduction (%)",
    ),
    spec("SCTD", ValueKind::Unchecked, Target::Skipped, "short-circuit threshold (AFE table)"),
    spec("SCDD", ValueKind::Unchecked, Target::Skipped, "short-circuit delay (AFE table)"),
    spec(
        "SCRD",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::ShortCircuitDischarge),
        "short-circuit retries",
    ),
    spec("OCTD", ValueKind::Unchecked, Target::Skipped, "over-current threshold (AFE table)"),
    spec("OCDD", ValueKind::Unchecked, Target::Skipped, "over-current delay (AFE table)"),
    spec(
        "OCRD",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::OverCurrentDischarge),
        "over-current retries",
    ),
    spec(
        "BCTD",
        UNBOUNDED_Q8,
        Target::CurrentThreshold(FaultId::BurstCurrentDischarge),
        "burst discharge current (A)",
    ),
    spec(
        "BCDD",
        SAMPLES,
        Target::CurrentSamples(FaultId::BurstCurrentDischarge),
        "burst discharge samples",
    ),
    spec(
        "BCRD",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::BurstCurrentDischarge),
        "burst discharge retries",
    ),
    spec(
        "MCTD",
        UNBOUNDED_Q8,
        Target::CurrentThreshold(FaultId::MaxCurrentDischarge),
        "sustained discharge current (A)",
    ),
    spec(
        "MCDD",
        SAMPLES,
        Target::CurrentSamples(FaultId::MaxCurrentDischarge),
        "sustained discharge samples",
    ),
    spec(
        "MCRD",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::MaxCurrentDischarge),
        "sustained discharge retries",
    ),
    spec(
        "BCTC",
        UNBOUNDED_Q8,
        Target::CurrentThreshold(FaultId::BurstCurrentCharge),
        "burst charge current (A)",
    ),
    spec(
        "BCDC",
        SAMPLES,
        Target::CurrentSamples(FaultId::BurstCurrentCharge),
        "burst charge samples",
    ),
    spec(
        "BCRC",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::BurstCurrentCharge),
        "burst charge retries",
    ),
    spec(
        "MCTC",
        UNBOUNDED_Q8,
        Target::CurrentThreshold(FaultId::MaxCurrentCharge),
        "sustained charge current (A)",
    ),
    spec(
        "MCDC",
        SAMPLES,
        Target::CurrentSamples(FaultId::MaxCurrentCharge),
        "sustained charge samples",
    ),
    spec(
        "MCRC",
        ValueKind::Retry,
        Target::RetryBudget(FaultId::MaxCurrentCharge),
        "sustained charge retries",
    ),
];

/// Temperature parameters are accepted under these prefixes and skipped.
const TEMPERATURE_PREFIXES: [&str; 2] = ["OT", "UT"];

const TEMPERATURE_RETRY: ParamSpec = spec("OT?R", ValueKind::Retry, Target::Skipped, "temperature retries");
const TEMPERATURE_VALUE: ParamSpec = spec("OT??", ValueKind::Unchecked, Target::Skipped, "temperature setting");

/// Looks up a four-letter code.
#[must_use]
pub fn find(code: &str) -> Option<ParamSpec> {
    if let Some(spec) = PARAMETERS.iter().find(|spec| spec.code == code) {
        return Some(*spec);
    }

    if code.len() == 4 && TEMPERATURE_PREFIXES.iter().any(|prefix| code.starts_with(prefix)) {
        // Temperature retry codes carry `R` in third position (OTRP, UTRB).
        return Some(if code.as_bytes()[2] == b'R' {
            TEMPERATURE_RETRY
        } else {
            TEMPERATURE_VALUE
        });
    }

    None
}
