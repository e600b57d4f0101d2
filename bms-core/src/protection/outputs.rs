//! Values the engine hands to the register transport, and the transport seam.

use core::convert::Infallible;
use core::fmt;

/// Charge/discharge switch enables.
///
/// The bit layout matches the switch bits of the AFE's `SYS_CTRL2`
/// register: charge on bit 0, discharge on bit 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SwitchEnable {
    pub charge: bool,
    pub discharge: bool,
}

impl SwitchEnable {
    pub const CHARGE_BIT: u8 = 1 << 0;
    pub const DISCHARGE_BIT: u8 = 1 << 1;

    /// Both switches closed.
    pub const ENABLED: Self = Self {
        charge: true,
        discharge: true,
    };

    /// Both switches open; the state the AFE is left in at startup.
    pub const DISABLED: Self = Self {
        charge: false,
        discharge: false,
    };

    #[must_use]
    pub const fn bits(self) -> u8 {
        let mut bits = 0;
        if self.charge {
            bits |= Self::CHARGE_BIT;
        }
        if self.discharge {
            bits |= Self::DISCHARGE_BIT;
        }
        bits
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            charge: bits & Self::CHARGE_BIT != 0,
            discharge: bits & Self::DISCHARGE_BIT != 0,
        }
    }

    #[must_use]
    pub const fn is_fully_enabled(self) -> bool {
        self.charge && self.discharge
    }
}

impl fmt::Display for SwitchEnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = |on: bool| if on { "on" } else { "off" };
        write!(f, "chg={} dsg={}", label(self.charge), label(self.discharge))
    }
}

/// Status bits owed back to the AFE as a write-1-to-clear.
///
/// A set bit here is a command ("clear this flag"), never a fault flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClearMask(u8);

impl ClearMask {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Returns the accumulated mask and leaves this one empty.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

impl fmt::Display for ClearMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Register transport used to apply the engine's decisions.
pub trait ProtectionOutputs {
    type Error;

    /// Writes the charge/discharge enables.
    fn write_switches(&mut self, switches: SwitchEnable) -> Result<(), Self::Error>;

    /// Writes `mask` back to the status register (write-1-to-clear).
    fn clear_status(&mut self, mask: ClearMask) -> Result<(), Self::Error>;
}

/// Transport that accepts every write and does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopOutputs;

impl ProtectionOutputs for NoopOutputs {
    type Error = Infallible;

    fn write_switches(&mut self, _switches: SwitchEnable) -> Result<(), Self::Error> {
        Ok(())
    }

    fn clear_status(&mut self, _mask: ClearMask) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Register writes performed by a successful flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub cleared: Option<ClearMask>,
    pub switches_written: Option<SwitchEnable>,
}

impl FlushReport {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.cleared.is_none() && self.switches_written.is_none()
    }
}

/// Transport failure during a flush. Fault state is unaffected; the
/// outstanding writes are retried on the next flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushError<E> {
    ClearStatus(E),
    WriteSwitches(E),
}

impl<E> FlushError<E> {
    /// Maps the transport error while preserving which write failed.
    pub fn map_err<F, T>(self, map: F) -> FlushError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            FlushError::ClearStatus(error) => FlushError::ClearStatus(map(error)),
            FlushError::WriteSwitches(error) => FlushError::WriteSwitches(map(error)),
        }
    }

    #[must_use]
    pub fn source(&self) -> &E {
        match self {
            FlushError::ClearStatus(error) | FlushError::WriteSwitches(error) => error,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for FlushError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushError::ClearStatus(error) => write!(f, "status clear write failed: {error:?}"),
            FlushError::WriteSwitches(error) => write!(f, "switch write failed: {error:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_bits_match_register_layout() {
        assert_eq!(SwitchEnable::ENABLED.bits(), 0b11);
        assert_eq!(SwitchEnable::DISABLED.bits(), 0);
        assert_eq!(
            SwitchEnable::from_bits(0b10),
            SwitchEnable {
                charge: false,
                discharge: true
            }
        );
    }

    #[test]
    fn clear_mask_take_leaves_empty() {
        let mut mask = ClearMask::EMPTY;
        mask.insert(ClearMask::from_bits(0b0100));
        mask.insert(ClearMask::from_bits(0b1000));
        assert_eq!(mask.take(), ClearMask::from_bits(0b1100));
        assert!(mask.is_empty());
    }
}
