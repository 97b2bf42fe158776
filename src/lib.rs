//! # `avrbridge`
//!
//! A bridge between a source-level debugger speaking the [GDB Remote Serial
//! Protocol] and an on-chip debugging probe ("ICE") attached to an 8-bit AVR
//! target. The debugger connects over TCP; this crate translates each RSP
//! packet into probe operations, tracks debugger-visible state (registers,
//! breakpoints, the flash memory map), and streams asynchronous target
//! events back to the debugger.
//!
//! This crate is a thin facade over [`avrbridge_core`]; the binary lives in
//! `apps/cli`.
//!
//! [GDB Remote Serial Protocol]: https://sourceware.org/gdb/current/onlinedocs/gdb/Remote-Protocol.html

#![warn(clippy::pedantic)]

pub use avrbridge_core as core;
