use bms_core::afe::{
    AfeRegisters, AfeSetup, Bq769x0, Calibration, StatusBit, reg, SYS_CTRL2_CC_EN,
};
use bms_core::config::ProtectionConfig;
use bms_core::protection::{ClearMask, FaultId, ProtectionEngine, SwitchEnable};
use heapless::Vec as HeaplessVec;

#[derive(Debug, PartialEq, Eq)]
struct BusFault;

/// Register file with write-1-to-clear semantics on `SYS_STAT`.
struct RegisterFile {
    registers: [u8; 0x60],
    writes: HeaplessVec<(u8, u8), 64>,
    offline: bool,
}

impl RegisterFile {
    fn new() -> Self {
        Self {
            registers: [0; 0x60],
            writes: HeaplessVec::new(),
            offline: false,
        }
    }

    fn set_cell(&mut self, channel: usize, code: u16) {
        let [hi, lo] = code.to_be_bytes();
        let base = usize::from(reg::VC1_HI) + channel * 2;
        self.registers[base] = hi;
        self.registers[base + 1] = lo;
    }

    fn set_current(&mut self, code: i16) {
        let [hi, lo] = code.to_be_bytes();
        self.registers[usize::from(reg::CC_HI)] = hi;
        self.registers[usize::from(reg::CC_HI) + 1] = lo;
    }
}

impl AfeRegisters for RegisterFile {
    type Error = BusFault;

    fn read_register(&mut self, register: u8) -> Result<u8, Self::Error> {
        if self.offline {
            return Err(BusFault);
        }
        Ok(self.registers[usize::from(register)])
    }

    fn read_block(&mut self, start: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        if self.offline {
            return Err(BusFault);
        }
        let start = usize::from(start);
        buffer.copy_from_slice(&self.registers[start..start + buffer.len()]);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        if self.offline {
            return Err(BusFault);
        }
        self.writes.push((register, value)).expect("write log capacity");
        let slot = &mut self.registers[usize::from(register)];
        if register == reg::SYS_STAT {
            *slot &= !value;
        } else {
            *slot = value;
        }
        Ok(())
    }
}

fn driver() -> Bq769x0<RegisterFile> {
    Bq769x0::new(RegisterFile::new(), Calibration::DEFAULT)
}

#[test]
fn configure_programs_protection_registers_in_order() {
    let mut afe = driver();
    afe.configure(&AfeSetup::DEFAULT).expect("configure");

    let writes = afe.release().writes;
    assert_eq!(
        writes.as_slice(),
        &[
            (reg::SYS_CTRL1, 0x10),
            (reg::CC_CFG, 0x19),
            (reg::PROTECT1, 0x8D),
            (reg::PROTECT2, 0x4F),
            (reg::PROTECT3, 0xB0),
            (reg::OV_TRIP, 0x7D),
            (reg::UV_TRIP, 0xC9),
            (reg::SYS_CTRL2, SYS_CTRL2_CC_EN),
            (reg::SYS_STAT, 0xFF),
        ]
    );
}

#[test]
fn reads_factory_trims() {
    let mut afe = driver();
    let registers = &mut afe.bus_mut().registers;
    registers[usize::from(reg::ADCGAIN1)] = 0x0C;
    registers[usize::from(reg::ADCOFFSET)] = 0xFE;
    registers[usize::from(reg::ADCGAIN2)] = 0xE0;

    let calibration = afe.read_calibration().expect("trim read");
    assert_eq!(calibration.gain_uv, 396);
    assert_eq!(calibration.offset_mv, -2);
    assert_eq!(afe.calibration().gain_uv, 396);
}

#[test]
fn acquire_leaves_engine_owned_bits_latched() {
    let mut afe = driver();
    let status = StatusBit::CoulombCounterReady.mask()
        | StatusBit::OverVoltage.mask()
        | StatusBit::OverCurrentDischarge.mask();
    afe.bus_mut().registers[usize::from(reg::SYS_STAT)] = status;

    let owned = ClearMask::from_bits(StatusBit::OverVoltage.mask() | StatusBit::UnderVoltage.mask());
    let measurements = afe.acquire(owned).expect("acquire");

    assert_eq!(measurements.status.raw(), status);
    assert_eq!(
        measurements.acknowledged,
        ClearMask::from_bits(
            StatusBit::CoulombCounterReady.mask() | StatusBit::OverCurrentDischarge.mask()
        )
    );
    assert_eq!(
        afe.bus_mut().registers[usize::from(reg::SYS_STAT)],
        StatusBit::OverVoltage.mask()
    );
}

#[test]
fn current_is_offset_corrected_and_held_between_samples() {
    let mut afe = driver();
    afe.bus_mut().set_current(-3000);
    afe.bus_mut().registers[usize::from(reg::SYS_STAT)] = StatusBit::CoulombCounterReady.mask();

    let first = afe.acquire(ClearMask::EMPTY).expect("acquire");
    assert_eq!(first.current, -3000 + 170);

    afe.bus_mut().set_current(0);
    let second = afe.acquire(ClearMask::EMPTY).expect("acquire");
    assert_eq!(second.current, first.current, "no CC_READY, value repeats");
    assert_eq!(afe.last_current(), first.current);
}

#[test]
fn cell_extremes_follow_channel_map() {
    let mut afe = driver().with_cell_map(0b0000_0101);
    afe.bus_mut().set_cell(0, 9_100);
    afe.bus_mut().set_cell(1, 12_000);
    afe.bus_mut().set_cell(2, 8_800);

    let cells = afe.read_cell_extremes().expect("cells");
    assert_eq!((cells.min, cells.max), (8_800, 9_100));
}

#[test]
fn cell_codes_drop_reserved_high_bits() {
    let mut afe = driver().with_cell_map(0b1);
    afe.bus_mut().set_cell(0, 0xC000 | 9_000);

    let cells = afe.read_cell_extremes().expect("cells");
    assert_eq!(cells.max, 9_000);
}

#[test]
fn empty_cell_map_keeps_default() {
    let afe = driver().with_cell_map(0);
    assert_eq!(afe.cell_map(), bms_core::afe::DEFAULT_CELL_MAP);
}

#[test]
fn engine_drives_switches_and_clears_through_driver() {
    let mut config = ProtectionConfig::DEFAULT;
    config.over_voltage.clear.limit = 0;
    let mut engine = ProtectionEngine::new(&config).expect("valid config");
    let mut afe = driver().with_cell_map(0b11);
    afe.configure(&AfeSetup::DEFAULT).expect("configure");

    afe.bus_mut().set_cell(0, 9_900);
    afe.bus_mut().set_cell(1, 10_300);
    afe.bus_mut().registers[usize::from(reg::SYS_STAT)] = StatusBit::OverVoltage.mask();

    let measurements = afe.acquire(engine.owned_status_bits()).expect("acquire");
    let report = engine.evaluate(&measurements.into_inputs(false));
    assert!(report.tripped().contains(FaultId::OverVoltage));
    engine.flush(&mut afe).expect("flush");
    assert_eq!(
        afe.bus_mut().registers[usize::from(reg::SYS_CTRL2)],
        SYS_CTRL2_CC_EN | SwitchEnable::DISCHARGE_BIT
    );
    assert_eq!(
        afe.bus_mut().registers[usize::from(reg::SYS_STAT)],
        StatusBit::OverVoltage.mask(),
        "OV stays latched while tripped"
    );

    afe.bus_mut().set_cell(0, 8_500);
    afe.bus_mut().set_cell(1, 8_600);
    let measurements = afe.acquire(engine.owned_status_bits()).expect("acquire");
    let report = engine.evaluate(&measurements.into_inputs(false));
    assert!(report.cleared().contains(FaultId::OverVoltage));
    engine.flush(&mut afe).expect("flush");

    assert_eq!(afe.bus_mut().registers[usize::from(reg::SYS_STAT)], 0);
    assert_eq!(
        afe.bus_mut().registers[usize::from(reg::SYS_CTRL2)],
        SYS_CTRL2_CC_EN | SwitchEnable::ENABLED.bits()
    );
}

#[test]
fn bus_errors_propagate() {
    let mut afe = driver();
    afe.bus_mut().offline = true;
    assert_eq!(afe.acquire(ClearMask::EMPTY).unwrap_err(), BusFault);
    assert_eq!(afe.configure(&AfeSetup::DEFAULT).unwrap_err(), BusFault);
}
