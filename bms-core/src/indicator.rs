//! Two-color status light commands and their blink rendering.
//!
//! The controller carries two bi-color LEDs: a fault light driven by the
//! protection engine and an activity light that reflects the measured pack
//! current. Both are rendered by [`BlinkPattern`] against a free-running tick
//! counter owned by the UI task.

use core::fmt;

/// Maximum number of blinks a single indicator pattern may request.
pub const MAX_BLINKS: u8 = 10;

/// UI ticks in one full blink cycle (blinks followed by a dark gap).
pub const CYCLE_PERIOD_TICKS: u16 = 160;

/// UI ticks a blink stays lit, followed by the same number of dark ticks.
pub const BLINK_PHASE_TICKS: u16 = 6;

/// Color of a bi-color LED; yellow lights both dies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BiColor {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for BiColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BiColor::Red => "red",
            BiColor::Yellow => "yellow",
            BiColor::Green => "green",
        })
    }
}

/// Color and blink count identifying one condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Indicator {
    pub color: BiColor,
    pub blinks: u8,
}

impl Indicator {
    #[must_use]
    pub const fn new(color: BiColor, blinks: u8) -> Self {
        Self { color, blinks }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.color, self.blinks)
    }
}

/// What a light should currently display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorCommand {
    Show(Indicator),
    #[default]
    Off,
}

impl IndicatorCommand {
    const OFF_CODE: u16 = 0;

    /// Packs the command into a `u16` so it can live in an atomic.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            IndicatorCommand::Off => Self::OFF_CODE,
            IndicatorCommand::Show(indicator) => {
                let color: u8 = match indicator.color {
                    BiColor::Red => 1,
                    BiColor::Yellow => 2,
                    BiColor::Green => 3,
                };
                u16::from_le_bytes([indicator.blinks, color])
            }
        }
    }

    /// Inverse of [`IndicatorCommand::to_raw`]; unknown codes decode as `Off`.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        let [blinks, color] = raw.to_le_bytes();
        let color = match color {
            1 => BiColor::Red,
            2 => BiColor::Yellow,
            3 => BiColor::Green,
            _ => return IndicatorCommand::Off,
        };
        IndicatorCommand::Show(Indicator::new(color, blinks))
    }
}

impl fmt::Display for IndicatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorCommand::Show(indicator) => indicator.fmt(f),
            IndicatorCommand::Off => f.write_str("off"),
        }
    }
}

/// Renders an [`IndicatorCommand`] as a blink train within each cycle period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlinkPattern {
    command: IndicatorCommand,
}

impl BlinkPattern {
    #[must_use]
    pub const fn new(command: IndicatorCommand) -> Self {
        Self { command }
    }

    /// Replaces the pattern; the blink train restarts with the next cycle.
    pub fn set(&mut self, command: IndicatorCommand) {
        self.command = command;
    }

    #[must_use]
    pub const fn command(&self) -> IndicatorCommand {
        self.command
    }

    /// Returns the lit color at `tick` within the cycle, or `None` when dark.
    #[must_use]
    pub fn level(&self, tick: u16) -> Option<BiColor> {
        let IndicatorCommand::Show(indicator) = self.command else {
            return None;
        };

        let tick = tick % CYCLE_PERIOD_TICKS;
        let blink = tick / (BLINK_PHASE_TICKS * 2);
        let lit = tick % (BLINK_PHASE_TICKS * 2) < BLINK_PHASE_TICKS;

        (blink < u16::from(indicator.blinks) && lit).then_some(indicator.color)
    }
}

/// Current band edges driving the activity light.
///
/// `discharge` edges are negative and descending, `charge` edges positive
/// and ascending. Between the first discharge and first charge edge the pack
/// is idle (one yellow blink); band `k` beyond that shows `k` red blinks while
/// discharging or `k` green blinks while charging. Samples that land exactly
/// on an edge or beyond the last one leave the light unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActivityBands {
    pub discharge: [i16; 7],
    pub charge: [i16; 7],
}

impl ActivityBands {
    /// Idle window of about half an amp, then 5 A bands, for a 1 mΩ shunt.
    pub const DEFAULT: Self = Self {
        discharge: [-60, -592, -1185, -1777, -2370, -2962, -3554],
        charge: [60, 592, 1185, 1777, 2370, 2962, 3554],
    };

    /// Maps a current sample to an activity command, if it falls in a band.
    #[must_use]
    pub fn classify(&self, current: i16) -> Option<IndicatorCommand> {
        if current > self.discharge[0] && current < self.charge[0] {
            return Some(IndicatorCommand::Show(Indicator::new(BiColor::Yellow, 1)));
        }

        let bands = self.discharge.windows(2).zip(self.charge.windows(2));
        for (blinks, (falling, rising)) in (1_u8..).zip(bands) {
            if current < falling[0] && current > falling[1] {
                return Some(IndicatorCommand::Show(Indicator::new(BiColor::Red, blinks)));
            }
            if current > rising[0] && current < rising[1] {
                return Some(IndicatorCommand::Show(Indicator::new(BiColor::Green, blinks)));
            }
        }

        None
    }
}

impl Default for ActivityBands {
    fn default() -> Self {
        Self::DEFAULT
    }
}
