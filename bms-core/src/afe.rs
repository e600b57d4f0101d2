//! BQ769x0 analog front end: register map, unit conversions, and a driver
//! generic over the register transport.

use core::fmt;

use crate::protection::{ClearMask, CycleInputs, ProtectionOutputs, SwitchEnable, VoltageExtremes};

/// 7-bit I2C address of the BQ769x0 family (non-CRC parts).
pub const I2C_ADDRESS: u8 = 0x18;

pub mod reg {
    pub const SYS_STAT: u8 = 0x00;
    pub const CELLBAL1: u8 = 0x01;
    pub const CELLBAL2: u8 = 0x02;
    pub const CELLBAL3: u8 = 0x03;
    pub const SYS_CTRL1: u8 = 0x04;
    pub const SYS_CTRL2: u8 = 0x05;
    pub const PROTECT1: u8 = 0x06;
    pub const PROTECT2: u8 = 0x07;
    pub const PROTECT3: u8 = 0x08;
    pub const OV_TRIP: u8 = 0x09;
    pub const UV_TRIP: u8 = 0x0A;
    pub const CC_CFG: u8 = 0x0B;
    pub const VC1_HI: u8 = 0x0C;
    pub const BAT_HI: u8 = 0x2A;
    pub const TS1_HI: u8 = 0x2C;
    pub const CC_HI: u8 = 0x32;
    pub const ADCGAIN1: u8 = 0x50;
    pub const ADCOFFSET: u8 = 0x51;
    pub const ADCGAIN2: u8 = 0x59;
}

/// `SYS_CTRL1` value enabling the cell/temperature ADC.
pub const SYS_CTRL1_ADC_EN: u8 = 0x10;
/// `SYS_CTRL2` coulomb-counter continuous enable.
pub const SYS_CTRL2_CC_EN: u8 = 0x40;
/// Value the datasheet requires in `CC_CFG`.
pub const CC_CFG_VALUE: u8 = 0x19;

/// Number of cell channels on the largest supported part.
pub const CELL_CHANNELS: usize = 10;
/// Largest cell ADC code (14-bit converter).
pub const CELL_CODE_MAX: u16 = 0x3FFF;
/// Active channels on the reference pack: VC1-3, VC5-8 and VC10.
pub const DEFAULT_CELL_MAP: u16 = 0x2F7;

/// Coulomb-counter LSB in nanovolts.
const CC_LSB_NV: i64 = 8_440;

/// Named bits of `SYS_STAT`. Bit 6 is reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusBit {
    OverCurrentDischarge,
    ShortCircuitDischarge,
    OverVoltage,
    UnderVoltage,
    OverrideAlert,
    DeviceNotReady,
    CoulombCounterReady,
}

impl StatusBit {
    pub const ALL: [StatusBit; 7] = [
        StatusBit::OverCurrentDischarge,
        StatusBit::ShortCircuitDischarge,
        StatusBit::OverVoltage,
        StatusBit::UnderVoltage,
        StatusBit::OverrideAlert,
        StatusBit::DeviceNotReady,
        StatusBit::CoulombCounterReady,
    ];

    /// Reserved position in `SYS_STAT`.
    pub const RESERVED_BIT: u8 = 6;

    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            StatusBit::OverCurrentDischarge => 0,
            StatusBit::ShortCircuitDischarge => 1,
            StatusBit::OverVoltage => 2,
            StatusBit::UnderVoltage => 3,
            StatusBit::OverrideAlert => 4,
            StatusBit::DeviceNotReady => 5,
            StatusBit::CoulombCounterReady => 7,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << self.bit()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            StatusBit::OverCurrentDischarge => "OCD",
            StatusBit::ShortCircuitDischarge => "SCD",
            StatusBit::OverVoltage => "OV",
            StatusBit::UnderVoltage => "UV",
            StatusBit::OverrideAlert => "OVRD_ALERT",
            StatusBit::DeviceNotReady => "DEVICE_XREADY",
            StatusBit::CoulombCounterReady => "CC_READY",
        }
    }
}

/// One read of `SYS_STAT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusSnapshot(u8);

impl StatusSnapshot {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// `false` for positions outside the register.
    #[must_use]
    pub const fn is_set(self, bit: u8) -> bool {
        bit < 8 && self.0 & (1 << bit) != 0
    }

    #[must_use]
    pub const fn contains(self, bit: StatusBit) -> bool {
        self.0 & bit.mask() != 0
    }

    /// Snapshot with the bits of `mask` removed.
    #[must_use]
    pub const fn without(self, mask: ClearMask) -> Self {
        Self(self.0 & !mask.bits())
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = StatusBit::ALL
            .into_iter()
            .filter(|bit| self.contains(*bit))
            .map(StatusBit::name);

        match names.next() {
            None => f.write_str("-"),
            Some(first) => {
                f.write_str(first)?;
                names.try_for_each(|name| write!(f, "|{name}"))
            }
        }
    }
}

/// Conversion constants between engineering units and AFE codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Cell ADC gain in microvolts per code.
    pub gain_uv: u16,
    /// Cell ADC offset in millivolts.
    pub offset_mv: i8,
    /// Current-sense resistor in micro-ohms.
    pub sense_micro_ohm: u32,
    /// Protection cycle period in milliseconds.
    pub cycle_ms: u32,
    /// Coulomb-counter reading at zero current.
    pub current_offset: i16,
}

impl Calibration {
    pub const DEFAULT: Self = Self {
        gain_uv: 382,
        offset_mv: 0,
        sense_micro_ohm: 1_000,
        cycle_ms: 250,
        current_offset: -170,
    };

    /// Decodes the factory gain/offset trim registers.
    #[must_use]
    pub fn from_trim(adcgain1: u8, adcoffset: u8, adcgain2: u8) -> (u16, i8) {
        let trim = ((adcgain1 & 0x0C) << 1) | ((adcgain2 & 0xE0) >> 5);
        (365 + u16::from(trim), i8::from_ne_bytes([adcoffset]))
    }

    /// Cell code for `millivolts`, clamped to the converter range.
    #[must_use]
    pub fn cell_code(&self, millivolts: u32) -> u16 {
        let microvolts = (i64::from(millivolts) - i64::from(self.offset_mv)) * 1_000;
        let code = microvolts / i64::from(self.gain_uv.max(1));
        u16::try_from(code.clamp(0, i64::from(CELL_CODE_MAX))).unwrap_or(CELL_CODE_MAX)
    }

    /// Millivolts represented by a cell code.
    #[must_use]
    pub fn cell_millivolts(&self, code: u16) -> i32 {
        let microvolts = i32::from(code) * i32::from(self.gain_uv);
        microvolts / 1_000 + i32::from(self.offset_mv)
    }

    /// Coulomb-counter code for `milliamps`, saturated to `i16`.
    #[must_use]
    pub fn current_code(&self, milliamps: i32) -> i16 {
        let code = i64::from(milliamps) * i64::from(self.sense_micro_ohm) / CC_LSB_NV;
        let clamped = code.clamp(i64::from(i16::MIN), i64::from(i16::MAX));
        i16::try_from(clamped).unwrap_or(if code < 0 { i16::MIN } else { i16::MAX })
    }

    /// Milliamps represented by an offset-corrected coulomb-counter code.
    #[must_use]
    pub fn current_milliamps(&self, code: i16) -> i32 {
        let milliamps = i64::from(code) * CC_LSB_NV / i64::from(self.sense_micro_ohm.max(1));
        i32::try_from(milliamps).unwrap_or(if milliamps < 0 { i32::MIN } else { i32::MAX })
    }

    /// Whole protection cycles in `milliseconds`, saturated to `u16`.
    #[must_use]
    pub fn cycles(&self, milliseconds: u32) -> u16 {
        let cycles = milliseconds / self.cycle_ms.max(1);
        u16::try_from(cycles).unwrap_or(u16::MAX)
    }

    /// `OV_TRIP` register value for a threshold in millivolts.
    ///
    /// The register holds bits 11..4 of a trip code whose top nibble is fixed
    /// at `0x2`, so thresholds outside that window cannot be expressed.
    #[must_use]
    pub fn ov_trip(&self, millivolts: u32) -> Option<u8> {
        trip_register(self.cell_code(millivolts), 0x2000)
    }

    /// `UV_TRIP` register value; the fixed top nibble is `0x1`.
    #[must_use]
    pub fn uv_trip(&self, millivolts: u32) -> Option<u8> {
        trip_register(self.cell_code(millivolts), 0x1000)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn trip_register(code: u16, window: u16) -> Option<u8> {
    if code & 0xF000 != window {
        return None;
    }
    let [bits, _] = (code >> 4).to_le_bytes();
    Some(bits)
}

/// Over-voltage delay choices, indexed by their `PROTECT3` encoding.
pub const OV_DELAYS_S: [u8; 4] = [1, 2, 4, 8];
/// Under-voltage delay choices, indexed by their `PROTECT3` encoding.
pub const UV_DELAYS_S: [u8; 4] = [1, 4, 8, 16];

/// `PROTECT3` for the given delays, or `None` when a delay is not offered.
#[must_use]
pub fn protect3(ov_delay_s: u8, uv_delay_s: u8) -> Option<u8> {
    let ov = OV_DELAYS_S.iter().position(|delay| *delay == ov_delay_s)?;
    let uv = UV_DELAYS_S.iter().position(|delay| *delay == uv_delay_s)?;
    let ov = u8::try_from(ov).ok()?;
    let uv = u8::try_from(uv).ok()?;
    Some(uv << 6 | ov << 4)
}

/// Static protection registers programmed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfeSetup {
    /// Short-circuit threshold and delay.
    pub protect1: u8,
    /// Over-current threshold and delay.
    pub protect2: u8,
    pub protect3: u8,
    pub ov_trip: u8,
    pub uv_trip: u8,
}

impl AfeSetup {
    /// SCD 155 A / 100 us, OCD 100 A / 160 us, OV 3.90 V / 8 s, UV 2.80 V / 8 s.
    pub const DEFAULT: Self = Self {
        protect1: 0x8D,
        protect2: 0x4F,
        protect3: 0xB0,
        ov_trip: 0x7D,
        uv_trip: 0xC9,
    };
}

impl Default for AfeSetup {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Byte-level register access to the AFE.
pub trait AfeRegisters {
    type Error;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error>;

    /// Reads consecutive registers starting at `start` into `buffer`.
    fn read_block(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error>;
}

impl<T: AfeRegisters + ?Sized> AfeRegisters for &mut T {
    type Error = T::Error;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error> {
        (**self).read_register(register)
    }

    fn read_block(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_block(start, buffer)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        (**self).write_register(register, value)
    }
}

/// One acquisition pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements {
    pub status: StatusSnapshot,
    pub current: i16,
    pub cells: VoltageExtremes,
    /// Status bits written back during acquisition.
    pub acknowledged: ClearMask,
}

impl Measurements {
    #[must_use]
    pub const fn into_inputs(self, clear_requested: bool) -> CycleInputs {
        CycleInputs {
            status: self.status,
            current: self.current,
            cells: self.cells,
            clear_requested,
        }
    }
}

/// BQ769x0 driver.
#[derive(Debug)]
pub struct Bq769x0<R> {
    bus: R,
    calibration: Calibration,
    cell_map: u16,
    last_current: i16,
}

impl<R> Bq769x0<R>
where
    R: AfeRegisters,
{
    #[must_use]
    pub const fn new(bus: R, calibration: Calibration) -> Self {
        Self {
            bus,
            calibration,
            cell_map: DEFAULT_CELL_MAP,
            last_current: 0,
        }
    }

    /// Restricts cell reads to the channels set in `map` (bit 0 = VC1).
    #[must_use]
    pub const fn with_cell_map(mut self, map: u16) -> Self {
        let map = map & 0x03FF;
        if map != 0 {
            self.cell_map = map;
        }
        self
    }

    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[must_use]
    pub const fn cell_map(&self) -> u16 {
        self.cell_map
    }

    /// Offset-corrected current from the most recent coulomb-counter read.
    #[must_use]
    pub const fn last_current(&self) -> i16 {
        self.last_current
    }

    pub fn bus_mut(&mut self) -> &mut R {
        &mut self.bus
    }

    pub fn release(self) -> R {
        self.bus
    }

    /// Loads the factory gain and offset trims into the calibration.
    pub fn read_calibration(&mut self) -> Result<Calibration, R::Error> {
        let gain1 = self.bus.read_register(reg::ADCGAIN1)?;
        let offset = self.bus.read_register(reg::ADCOFFSET)?;
        let gain2 = self.bus.read_register(reg::ADCGAIN2)?;

        let (gain_uv, offset_mv) = Calibration::from_trim(gain1, offset, gain2);
        self.calibration.gain_uv = gain_uv;
        self.calibration.offset_mv = offset_mv;
        Ok(self.calibration)
    }

    /// Programs the protection registers, enables the ADC and coulomb
    /// counter with both switches open, and clears any stale status.
    pub fn configure(&mut self, setup: &AfeSetup) -> Result<(), R::Error> {
        self.bus.write_register(reg::SYS_CTRL1, SYS_CTRL1_ADC_EN)?;
        self.bus.write_register(reg::CC_CFG, CC_CFG_VALUE)?;
        self.bus.write_register(reg::PROTECT1, setup.protect1)?;
        self.bus.write_register(reg::PROTECT2, setup.protect2)?;
        self.bus.write_register(reg::PROTECT3, setup.protect3)?;
        self.bus.write_register(reg::OV_TRIP, setup.ov_trip)?;
        self.bus.write_register(reg::UV_TRIP, setup.uv_trip)?;
        self.bus.write_register(reg::SYS_CTRL2, SYS_CTRL2_CC_EN)?;
        self.bus.write_register(reg::SYS_STAT, 0xFF)
    }

    pub fn read_status(&mut self) -> Result<StatusSnapshot, R::Error> {
        self.bus.read_register(reg::SYS_STAT).map(StatusSnapshot::from_raw)
    }

    /// Write-1-to-clear of `mask` in `SYS_STAT`; an empty mask is not written.
    pub fn acknowledge(&mut self, mask: ClearMask) -> Result<(), R::Error> {
        if mask.is_empty() {
            return Ok(());
        }
        self.bus.write_register(reg::SYS_STAT, mask.bits())
    }

    /// Reads the coulomb counter when `status` reports a fresh sample and
    /// returns the offset-corrected value; otherwise repeats the last one.
    pub fn read_current(&mut self, status: StatusSnapshot) -> Result<i16, R::Error> {
        if status.contains(StatusBit::CoulombCounterReady) {
            let mut raw = [0; 2];
            self.bus.read_block(reg::CC_HI, &mut raw)?;
            let code = i16::from_be_bytes(raw);
            self.last_current = code.saturating_sub(self.calibration.current_offset);
        }
        Ok(self.last_current)
    }

    /// Minimum and maximum code over the active cell channels.
    pub fn read_cell_extremes(&mut self) -> Result<VoltageExtremes, R::Error> {
        let mut raw = [0; CELL_CHANNELS * 2];
        self.bus.read_block(reg::VC1_HI, &mut raw)?;

        let mut extremes: Option<VoltageExtremes> = None;
        for (channel, pair) in raw.chunks_exact(2).enumerate() {
            if self.cell_map & (1 << channel) == 0 {
                continue;
            }
            let code = u16::from_be_bytes([pair[0] & 0x3F, pair[1]]);
            extremes = Some(match extremes {
                None => VoltageExtremes::new(code, code),
                Some(seen) => VoltageExtremes::new(seen.min.min(code), seen.max.max(code)),
            });
        }

        Ok(extremes.unwrap_or_default())
    }

    /// Reads status, current and cells, then acknowledges every observed
    /// status bit except those in `owned`, which the engine clears itself.
    pub fn acquire(&mut self, owned: ClearMask) -> Result<Measurements, R::Error> {
        let status = self.read_status()?;
        let current = self.read_current(status)?;
        let cells = self.read_cell_extremes()?;

        let acknowledged = ClearMask::from_bits(status.without(owned).raw());
        self.acknowledge(acknowledged)?;

        Ok(Measurements {
            status,
            current,
            cells,
            acknowledged,
        })
    }
}

impl<R> ProtectionOutputs for Bq769x0<R>
where
    R: AfeRegisters,
{
    type Error = R::Error;

    fn write_switches(&mut self, switches: SwitchEnable) -> Result<(), Self::Error> {
        self.bus
            .write_register(reg::SYS_CTRL2, SYS_CTRL2_CC_EN | switches.bits())
    }

    fn clear_status(&mut self, mask: ClearMask) -> Result<(), Self::Error> {
        self.acknowledge(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_lists_set_bits() {
        let snapshot = StatusSnapshot::from_raw(0b1000_0101);
        assert_eq!(format_status(snapshot).as_str(), "OCD|OV|CC_READY");
        assert_eq!(format_status(StatusSnapshot::default()).as_str(), "-");
    }

    fn format_status(snapshot: StatusSnapshot) -> heapless::String<48> {
        use core::fmt::Write as _;
        let mut text = heapless::String::new();
        write!(text, "{snapshot}").expect("fits");
        text
    }

    #[test]
    fn trim_decodes_gain_and_signed_offset() {
        assert_eq!(Calibration::from_trim(0, 0, 0), (365, 0));
        assert_eq!(Calibration::from_trim(0x0C, 0xFE, 0xE0), (365 + 31, -2));
        assert_eq!(Calibration::from_trim(0x04, 0x03, 0x20), (365 + 9, 3));
    }

    #[test]
    fn current_code_uses_sense_resistor() {
        let calibration = Calibration::DEFAULT;
        assert_eq!(calibration.current_code(30_000), 3554);
        assert_eq!(calibration.current_code(-12_000), -1421);
        assert_eq!(calibration.current_code(i32::MAX), i16::MAX);
    }

    #[test]
    fn trip_registers_keep_middle_bits() {
        let calibration = Calibration::DEFAULT;
        assert_eq!(calibration.ov_trip(3_898), Some(0x7D));
        assert_eq!(calibration.uv_trip(2_796), Some(0xC9));
        assert_eq!(calibration.ov_trip(2_796), None);
        assert_eq!(calibration.uv_trip(4_900), None);
    }

    #[test]
    fn protect3_encodes_both_delays() {
        assert_eq!(protect3(8, 8), Some(0xB0));
        assert_eq!(protect3(1, 1), Some(0x00));
        assert_eq!(protect3(3, 8), None);
        assert_eq!(protect3(8, 2), None);
    }

    #[test]
    fn cycles_truncate_to_whole_periods() {
        let calibration = Calibration::DEFAULT;
        assert_eq!(calibration.cycles(8_000), 32);
        assert_eq!(calibration.cycles(249), 0);
    }
}
