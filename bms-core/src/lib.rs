#![no_std]

// Protection logic for the battery-management controller.
//
// Everything here runs on the MCU and on the host emulator alike, so the crate
// avoids the standard library and keeps every buffer bounded.

pub mod afe;
pub mod config;
pub mod fault;
pub mod indicator;
pub mod input;
pub mod profile;
pub mod protection;
pub mod qualifier;
pub mod repl;
pub mod telemetry;
