//! Persisted fault configuration and its construction-time validation.

use core::fmt;

use crate::afe::{CELL_CODE_MAX, StatusBit};
use crate::fault::{AfeMcuPair, AfeResetPair, FaultPair, McuResetPair};
use crate::indicator::{BiColor, Indicator, MAX_BLINKS};
use crate::protection::{ClearMask, FaultId, FaultSet};
use crate::qualifier::{AfeQualifier, McuQualifier, Polarity, ResetQualifier, RetryLimit};

/// Status bits a fault pair may clear: OCD, SCD, OV and UV.
pub const FAULT_STATUS_BITS: u8 = 0x0F;

/// Threshold qualifier settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThresholdConfig<T> {
    pub polarity: Polarity,
    pub threshold: T,
    /// In-condition samples tolerated before firing; fires on `limit + 1`.
    pub limit: u16,
}

impl<T> ThresholdConfig<T>
where
    T: Copy + PartialOrd,
{
    #[must_use]
    pub const fn new(polarity: Polarity, threshold: T, limit: u16) -> Self {
        Self {
            polarity,
            threshold,
            limit,
        }
    }

    #[must_use]
    pub const fn qualifier(&self) -> McuQualifier<T> {
        McuQualifier::new(self.polarity, self.threshold, self.limit)
    }

    /// `false` when no sample of the range `min..=max` can satisfy the polarity.
    fn reachable(&self, min: T, max: T) -> bool {
        match self.polarity {
            Polarity::Rising => self.threshold < max,
            Polarity::Falling => self.threshold > min,
        }
    }
}

/// Auto-retry / user-reset settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetConfig {
    pub auto_retry: bool,
    /// Cycles between automatic retries.
    pub interval_limit: u16,
    pub retry_limit: RetryLimit,
}

impl ResetConfig {
    pub const USER_ONLY: Self = Self {
        auto_retry: false,
        interval_limit: 0,
        retry_limit: RetryLimit::Count(0),
    };

    /// Settings carrying a persisted retry budget.
    #[must_use]
    pub const fn retries(retry_limit: RetryLimit) -> Self {
        let auto_retry = !matches!(retry_limit, RetryLimit::Count(0));
        Self {
            auto_retry,
            interval_limit: 0,
            retry_limit,
        }
    }

    #[must_use]
    pub const fn qualifier(&self) -> ResetQualifier {
        ResetQualifier::new(self.auto_retry, self.interval_limit, self.retry_limit)
    }
}

/// AFE-latched pair cleared by a cell-voltage threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeMcuConfig {
    pub latch_bit: u8,
    pub clear: ThresholdConfig<u16>,
    pub clear_mask: ClearMask,
    pub indicator: Indicator,
}

impl AfeMcuConfig {
    #[must_use]
    pub const fn build(&self) -> AfeMcuPair {
        FaultPair::new(
            AfeQualifier::new(self.latch_bit),
            self.clear.qualifier(),
            self.clear_mask,
            self.indicator,
        )
    }
}

/// AFE-latched pair cleared by a reset request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeResetConfig {
    pub latch_bit: u8,
    pub reset: ResetConfig,
    pub clear_mask: ClearMask,
    pub indicator: Indicator,
}

impl AfeResetConfig {
    #[must_use]
    pub const fn build(&self) -> AfeResetPair {
        FaultPair::new(
            AfeQualifier::new(self.latch_bit),
            self.reset.qualifier(),
            self.clear_mask,
            self.indicator,
        )
    }
}

/// Current-threshold pair cleared by a reset request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct McuResetConfig {
    pub latch: ThresholdConfig<i16>,
    pub reset: ResetConfig,
    pub indicator: Indicator,
}

impl McuResetConfig {
    #[must_use]
    pub const fn build(&self) -> McuResetPair {
        FaultPair::new(
            self.latch.qualifier(),
            self.reset.qualifier(),
            ClearMask::EMPTY,
            self.indicator,
        )
    }
}

/// Which tripped faults hold each switch open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InhibitMap {
    pub charge: FaultSet,
    pub discharge: FaultSet,
}

impl InhibitMap {
    /// Over-voltage blocks charging; every other fault blocks discharging.
    pub const DEFAULT: Self = Self {
        charge: FaultSet::of(&[FaultId::OverVoltage]),
        discharge: FaultSet::of(&[
            FaultId::UnderVoltage,
            FaultId::ShortCircuitDischarge,
            FaultId::OverCurrentDischarge,
            FaultId::BurstCurrentDischarge,
            FaultId::MaxCurrentDischarge,
            FaultId::BurstCurrentCharge,
            FaultId::MaxCurrentCharge,
        ]),
    };
}

impl Default for InhibitMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Complete set of fault thresholds the engine is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtectionConfig {
    pub over_voltage: AfeMcuConfig,
    pub under_voltage: AfeMcuConfig,
    pub short_circuit_discharge: AfeResetConfig,
    pub over_current_discharge: AfeResetConfig,
    pub burst_current_discharge: McuResetConfig,
    pub max_current_discharge: McuResetConfig,
    pub burst_current_charge: McuResetConfig,
    pub max_current_charge: McuResetConfig,
    pub inhibits: InhibitMap,
}

impl ProtectionConfig {
    /// Factory record. Over-voltage clears below 0x2328 after 21 samples;
    /// the remaining pairs follow the LiFePO4 profile for a 1 mOhm shunt
    /// sampled every 250 ms.
    pub const DEFAULT: Self = Self {
        over_voltage: AfeMcuConfig {
            latch_bit: StatusBit::OverVoltage.bit(),
            clear: ThresholdConfig::new(Polarity::Falling, 0x2328, 20),
            clear_mask: ClearMask::from_bits(StatusBit::OverVoltage.mask()),
            indicator: Indicator::new(BiColor::Green, 7),
        },
        under_voltage: AfeMcuConfig {
            latch_bit: StatusBit::UnderVoltage.bit(),
            clear: ThresholdConfig::new(Polarity::Rising, 0x1DA2, 32),
            clear_mask: ClearMask::from_bits(StatusBit::UnderVoltage.mask()),
            indicator: Indicator::new(BiColor::Green, 6),
        },
        short_circuit_discharge: AfeResetConfig {
            latch_bit: StatusBit::ShortCircuitDischarge.bit(),
            reset: ResetConfig::retries(RetryLimit::Count(3)),
            clear_mask: ClearMask::EMPTY,
            indicator: Indicator::new(BiColor::Red, 1),
        },
        over_current_discharge: AfeResetConfig {
            latch_bit: StatusBit::OverCurrentDischarge.bit(),
            reset: ResetConfig::retries(RetryLimit::Count(3)),
            clear_mask: ClearMask::EMPTY,
            indicator: Indicator::new(BiColor::Red, 2),
        },
        burst_current_discharge: McuResetConfig {
            latch: ThresholdConfig::new(Polarity::Falling, -1421, 5),
            reset: ResetConfig::retries(RetryLimit::Count(4)),
            indicator: Indicator::new(BiColor::Red, 3),
        },
        max_current_discharge: McuResetConfig {
            latch: ThresholdConfig::new(Polarity::Falling, -1184, 60),
            reset: ResetConfig::retries(RetryLimit::Count(5)),
            indicator: Indicator::new(BiColor::Red, 4),
        },
        burst_current_charge: McuResetConfig {
            latch: ThresholdConfig::new(Polarity::Rising, 1184, 5),
            reset: ResetConfig::retries(RetryLimit::Count(4)),
            indicator: Indicator::new(BiColor::Yellow, 3),
        },
        max_current_charge: McuResetConfig {
            latch: ThresholdConfig::new(Polarity::Rising, 592, 60),
            reset: ResetConfig::retries(RetryLimit::Count(5)),
            indicator: Indicator::new(BiColor::Yellow, 4),
        },
        inhibits: InhibitMap::DEFAULT,
    };

    /// Rejects settings the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for fault in [FaultId::OverVoltage, FaultId::UnderVoltage] {
            let pair = self.afe_mcu(fault);
            check_latch_bit(fault, pair.latch_bit)?;
            check_clear_mask(fault, pair.clear_mask)?;
            check_indicator(fault, pair.indicator)?;
            if !pair.clear.reachable(0, CELL_CODE_MAX) {
                return Err(ConfigError::UnreachableThreshold { fault });
            }
        }

        for fault in [FaultId::ShortCircuitDischarge, FaultId::OverCurrentDischarge] {
            let pair = self.afe_reset(fault);
            check_latch_bit(fault, pair.latch_bit)?;
            // Reset-cleared pairs leave their status bit to the retry path.
            if !pair.clear_mask.is_empty() {
                return Err(ConfigError::ClearMaskNotAllowed {
                    fault,
                    mask: pair.clear_mask,
                });
            }
            check_indicator(fault, pair.indicator)?;
        }

        for fault in [
            FaultId::BurstCurrentDischarge,
            FaultId::MaxCurrentDischarge,
            FaultId::BurstCurrentCharge,
            FaultId::MaxCurrentCharge,
        ] {
            let pair = self.mcu_reset(fault);
            check_indicator(fault, pair.indicator)?;
            if !pair.latch.reachable(i16::MIN, i16::MAX) {
                return Err(ConfigError::UnreachableThreshold { fault });
            }
        }

        let inhibiting = self.inhibits.charge.bits() | self.inhibits.discharge.bits();
        if let Some(fault) = FaultId::ALL
            .into_iter()
            .find(|fault| !FaultSet::from_bits(inhibiting).contains(*fault))
        {
            return Err(ConfigError::NoInhibit { fault });
        }

        Ok(())
    }

    fn afe_mcu(&self, fault: FaultId) -> &AfeMcuConfig {
        match fault {
            FaultId::UnderVoltage => &self.under_voltage,
            _ => &self.over_voltage,
        }
    }

    fn afe_reset(&self, fault: FaultId) -> &AfeResetConfig {
        match fault {
            FaultId::OverCurrentDischarge => &self.over_current_discharge,
            _ => &self.short_circuit_discharge,
        }
    }

    /// Current-threshold record for `fault`; non-current faults map to BCPD.
    #[must_use]
    pub fn mcu_reset(&self, fault: FaultId) -> &McuResetConfig {
        match fault {
            FaultId::MaxCurrentDischarge => &self.max_current_discharge,
            FaultId::BurstCurrentCharge => &self.burst_current_charge,
            FaultId::MaxCurrentCharge => &self.max_current_charge,
            _ => &self.burst_current_discharge,
        }
    }

    pub fn mcu_reset_mut(&mut self, fault: FaultId) -> &mut McuResetConfig {
        match fault {
            FaultId::MaxCurrentDischarge => &mut self.max_current_discharge,
            FaultId::BurstCurrentCharge => &mut self.burst_current_charge,
            FaultId::MaxCurrentCharge => &mut self.max_current_charge,
            _ => &mut self.burst_current_discharge,
        }
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn check_latch_bit(fault: FaultId, bit: u8) -> Result<(), ConfigError> {
    if bit >= 8 || bit == StatusBit::RESERVED_BIT {
        return Err(ConfigError::InvalidLatchBit { fault, bit });
    }
    Ok(())
}

fn check_clear_mask(fault: FaultId, mask: ClearMask) -> Result<(), ConfigError> {
    if mask.bits() & !FAULT_STATUS_BITS != 0 {
        return Err(ConfigError::ClearMaskOutOfRange { fault, mask });
    }
    Ok(())
}

fn check_indicator(fault: FaultId, indicator: Indicator) -> Result<(), ConfigError> {
    if indicator.blinks == 0 || indicator.blinks > MAX_BLINKS {
        return Err(ConfigError::InvalidBlinkCount {
            fault,
            blinks: indicator.blinks,
        });
    }
    Ok(())
}

/// Reasons a configuration is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    InvalidLatchBit { fault: FaultId, bit: u8 },
    ClearMaskOutOfRange { fault: FaultId, mask: ClearMask },
    ClearMaskNotAllowed { fault: FaultId, mask: ClearMask },
    InvalidBlinkCount { fault: FaultId, blinks: u8 },
    UnreachableThreshold { fault: FaultId },
    NoInhibit { fault: FaultId },
}

impl ConfigError {
    #[must_use]
    pub const fn fault(&self) -> FaultId {
        match *self {
            ConfigError::InvalidLatchBit { fault, .. }
            | ConfigError::ClearMaskOutOfRange { fault, .. }
            | ConfigError::ClearMaskNotAllowed { fault, .. }
            | ConfigError::InvalidBlinkCount { fault, .. }
            | ConfigError::UnreachableThreshold { fault }
            | ConfigError::NoInhibit { fault } => fault,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLatchBit { fault, bit } => {
                write!(f, "{fault}: status bit {bit} cannot latch a fault")
            }
            ConfigError::ClearMaskOutOfRange { fault, mask } => {
                write!(f, "{fault}: clear mask {mask} touches non-fault status bits")
            }
            ConfigError::ClearMaskNotAllowed { fault, mask } => {
                write!(f, "{fault}: reset-cleared pair cannot own clear mask {mask}")
            }
            ConfigError::InvalidBlinkCount { fault, blinks } => {
                write!(f, "{fault}: blink count {blinks} outside 1..={MAX_BLINKS}")
            }
            ConfigError::UnreachableThreshold { fault } => {
                write!(f, "{fault}: threshold can never be crossed")
            }
            ConfigError::NoInhibit { fault } => write!(f, "{fault}: inhibits neither switch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_is_valid() {
        assert_eq!(ProtectionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn reserved_latch_bit_is_refused() {
        let mut config = ProtectionConfig::DEFAULT;
        config.over_current_discharge.latch_bit = 6;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLatchBit {
                fault: FaultId::OverCurrentDischarge,
                bit: 6
            })
        );
    }

    #[test]
    fn clear_mask_must_stay_in_fault_bits() {
        let mut config = ProtectionConfig::DEFAULT;
        config.under_voltage.clear_mask = ClearMask::from_bits(0x88);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ClearMaskOutOfRange {
                fault: FaultId::UnderVoltage,
                ..
            })
        ));
    }

    #[test]
    fn reset_cleared_pairs_own_no_status_bits() {
        let mut config = ProtectionConfig::DEFAULT;
        config.short_circuit_discharge.clear_mask =
            ClearMask::from_bits(StatusBit::ShortCircuitDischarge.mask());
        assert_eq!(
            config.validate(),
            Err(ConfigError::ClearMaskNotAllowed {
                fault: FaultId::ShortCircuitDischarge,
                mask: ClearMask::from_bits(StatusBit::ShortCircuitDischarge.mask()),
            })
        );

        let mut config = ProtectionConfig::DEFAULT;
        config.over_current_discharge.clear_mask =
            ClearMask::from_bits(StatusBit::OverCurrentDischarge.mask());
        assert_eq!(
            config.validate().map_err(|error| error.fault()),
            Err(FaultId::OverCurrentDischarge)
        );
    }

    #[test]
    fn blink_count_bounds() {
        let mut config = ProtectionConfig::DEFAULT;
        config.max_current_charge.indicator.blinks = 0;
        assert_eq!(
            config.validate().map_err(|error| error.fault()),
            Err(FaultId::MaxCurrentCharge)
        );

        config.max_current_charge.indicator.blinks = MAX_BLINKS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unreachable_thresholds_are_refused() {
        let mut config = ProtectionConfig::DEFAULT;
        config.burst_current_discharge.latch.threshold = i16::MIN;
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnreachableThreshold {
                fault: FaultId::BurstCurrentDischarge
            })
        );

        let mut config = ProtectionConfig::DEFAULT;
        config.under_voltage.clear.threshold = CELL_CODE_MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn every_fault_must_inhibit_something() {
        let mut config = ProtectionConfig::DEFAULT;
        config.inhibits.charge = FaultSet::EMPTY;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoInhibit {
                fault: FaultId::OverVoltage
            })
        );
    }
}
