#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

//! Movement-triggered GPS tracker: NMEA fix decoding, position smoothing,
//! movement gating and cellular modem power sequencing.
//!
//! Everything here is hardware-agnostic and runs on the host; the STM32
//! firmware in `main.rs` supplies UARTs, flash and time.

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod clock;
pub mod config;
pub mod control;
pub mod drivers;
pub mod form;
pub mod geo;
pub mod power;
pub mod state;
pub mod uplink;

#[cfg(test)]
mod testutil;
