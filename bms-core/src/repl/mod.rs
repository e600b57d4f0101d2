//! Diagnostics REPL shared between the firmware and the host emulator.
//!
//! [`grammar`] turns a line into a [`grammar::Command`]; the front-ends run it
//! and render results through [`status::StatusFormatter`].

pub mod catalog;
pub mod grammar;
pub mod status;
