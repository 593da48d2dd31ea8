//! Portable core of the CO2 monitor firmware.
//!
//! Contains the MH-Z19 wire-protocol codec, the cooperative scheduler that
//! interleaves sensor polling, display refresh, request servicing and
//! connectivity checks on one thread, and the request routing for the two
//! HTTP endpoints. Everything hardware-facing sits behind small traits
//! (`SensorLink`, `Network`, `DisplaySink`, `RequestServer`, `Clock`) so the
//! whole crate is testable on any host with `cargo test`. The ESP-IDF binary
//! in `firmware-std/` is a thin consumer that implements those traits.
//!
//! `no_std`, no allocator.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod config;
pub mod connectivity;
pub mod display;
pub mod protocol;
pub mod scheduler;
pub mod sensor;

#[cfg(test)]
pub(crate) mod testutil;
