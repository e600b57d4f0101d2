use bms_core::afe::{AfeSetup, Calibration};
use bms_core::config::{ConfigError, ProtectionConfig};
use bms_core::profile::{self, BuiltinProfile, ProfileErrorKind};
use bms_core::protection::{CycleInputs, FaultId, ProtectionEngine};
use bms_core::qualifier::{Polarity, RetryLimit};

fn load(text: &str) -> Result<profile::LoadedProfile, profile::ProfileError> {
    profile::load(text, &Calibration::DEFAULT)
}

fn error_at(text: &str) -> (ProfileErrorKind, usize) {
    let error = load(text).expect_err("profile should be rejected");
    (error.kind, error.offset)
}

#[test]
fn lifepo4_reproduces_factory_record() {
    let loaded = BuiltinProfile::LiFePO4
        .load(&Calibration::DEFAULT)
        .expect("factory profile loads");

    assert_eq!(loaded.applied, 22);
    assert_eq!(loaded.skipped, 24);
    assert_eq!(loaded.setup, AfeSetup::DEFAULT);

    let factory = ProtectionConfig::DEFAULT;
    let config = loaded.config;
    assert_eq!(config.over_voltage.clear.polarity, Polarity::Falling);
    assert_eq!(config.over_voltage.clear.threshold, 9_937);
    assert_eq!(config.over_voltage.clear.limit, 32);
    assert_eq!(config.under_voltage, factory.under_voltage);
    assert_eq!(config.short_circuit_discharge, factory.short_circuit_discharge);
    assert_eq!(config.over_current_discharge, factory.over_current_discharge);
    assert_eq!(config.burst_current_discharge, factory.burst_current_discharge);
    assert_eq!(config.max_current_discharge, factory.max_current_discharge);
    assert_eq!(config.burst_current_charge, factory.burst_current_charge);
    assert_eq!(config.max_current_charge, factory.max_current_charge);
}

#[test]
fn lithium_capacitor_raises_voltage_window() {
    let loaded = BuiltinProfile::LithiumCapacitor
        .load(&Calibration::DEFAULT)
        .expect("factory profile loads");

    assert_eq!(loaded.setup.ov_trip, 0xAF);
    assert_eq!(loaded.setup.uv_trip, AfeSetup::DEFAULT.uv_trip);
    assert_eq!(loaded.config.over_voltage.clear.threshold, 10_725);

    let mut engine = ProtectionEngine::new(&loaded.config).expect("valid config");
    let report = engine.evaluate(&CycleInputs::default());
    assert!(report.tripped().is_empty());
}

#[test]
fn trims_change_converted_codes() {
    let calibration = Calibration {
        gain_uv: 396,
        offset_mv: -2,
        ..Calibration::DEFAULT
    };
    let loaded = profile::load("OVTC=3.80; ", &calibration).expect("loads");
    assert_eq!(loaded.config.over_voltage.clear.threshold, 9_590);
    assert_eq!(loaded.applied, 1);
}

#[test]
fn empty_profile_keeps_factory_values() {
    let loaded = load("  ").expect("nothing to apply");
    assert_eq!(loaded.config, ProtectionConfig::DEFAULT);
    assert_eq!(loaded.setup, AfeSetup::DEFAULT);
    assert_eq!((loaded.applied, loaded.skipped), (0, 0));
}

#[test]
fn retry_budgets_reach_reset_settings() {
    let loaded = load("SCRD=IX; MCRC=0X;").expect("loads");
    let short_circuit = loaded.config.short_circuit_discharge.reset;
    assert_eq!(short_circuit.retry_limit, RetryLimit::Unlimited);
    assert!(short_circuit.auto_retry);

    let charge = loaded.config.max_current_charge.reset;
    assert_eq!(charge.retry_limit, RetryLimit::Count(0));
    assert!(!charge.auto_retry);
}

#[test]
fn current_thresholds_take_direction_from_fault() {
    let loaded = load("BCTD=30.0; BCTC=30.0; BCDC=2;").expect("loads");
    assert_eq!(loaded.config.burst_current_discharge.latch.threshold, -3554);
    assert_eq!(loaded.config.burst_current_charge.latch.threshold, 3554);
    assert_eq!(loaded.config.burst_current_charge.latch.limit, 2);
}

#[test]
fn rejects_values_outside_limits() {
    assert_eq!(error_at("OVTL=5.00;"), (ProfileErrorKind::ValueOutOfRange, 5));
    assert_eq!(error_at("OVTL=3.40;"), (ProfileErrorKind::ValueOutOfRange, 5));
    assert_eq!(error_at("BCDD=0;"), (ProfileErrorKind::ValueOutOfRange, 5));
    assert_eq!(error_at("OVDL=3;"), (ProfileErrorKind::OptionNotAllowed, 5));
}

#[test]
fn rejects_malformed_statements() {
    assert_eq!(error_at("ABCD=1;"), (ProfileErrorKind::UnknownParameter, 0));
    assert_eq!(error_at("OVTL=3.90"), (ProfileErrorKind::MissingDelimiter, 9));
    assert_eq!(error_at("OVTL=3.90; OVDL"), (ProfileErrorKind::MissingEquals, 15));
    assert_eq!(error_at("OVTL=3,90;"), (ProfileErrorKind::Lex, 6));
}

#[test]
fn rejects_mismatched_value_shapes() {
    assert_eq!(error_at("BCRD=4;"), (ProfileErrorKind::TypeMismatch, 5));
    assert_eq!(error_at("BCDD=5.5;"), (ProfileErrorKind::TypeMismatch, 5));
    assert_eq!(error_at("OVTL=3X;"), (ProfileErrorKind::TypeMismatch, 5));
}

#[test]
fn stops_at_first_bad_statement() {
    let (kind, offset) = error_at("OVTL=3.90; OVDL=3; UVDL=99;");
    assert_eq!(kind, ProfileErrorKind::OptionNotAllowed);
    assert_eq!(offset, 16);
}

#[test]
fn reports_unusable_configuration() {
    let text = "MCTC=99999;";
    let (kind, offset) = error_at(text);
    assert_eq!(
        kind,
        ProfileErrorKind::Config(ConfigError::UnreachableThreshold {
            fault: FaultId::MaxCurrentCharge,
        })
    );
    assert_eq!(offset, text.len());
}
