//! Board-level drivers for the protection controller.
//!
//! Everything here binds `bms-core` traits to STM32G0 peripherals; the
//! protection logic itself never touches a HAL type.

#![cfg(target_os = "none")]

pub mod afe_bus;
pub mod led;
