//! # Relay Servers
//!
//! HTTP transport and process lifecycle for the broadcast relay. The binary
//! `server_relay` wires these pieces to the `lib_relay` core.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod relay_logic;
