//! # `avrbridge-core`
//!
//! Implements the RSP front-end state machine, breakpoint bookkeeping, and
//! probe-command adapter that sit between a GDB remote serial protocol
//! client and an AVR debug probe:
//!
//! - [`framer`] frames/unframes `$...#cc` packets (checksum, `}`-escapes,
//!   ACK/NAK retransmit).
//! - [`probe`] adapts high-level debugger intent (read memory, set PC, step,
//!   set a breakpoint, ...) onto a [`probe::ProbeTransport`] implementation.
//! - [`breakpoint`] models the debugger's requested breakpoints and
//!   arbitrates hardware slots vs. software patches.
//! - [`event`] multiplexes the debugger socket and the probe transport,
//!   classifying probe events and enforcing debugger-interrupt priority.
//! - [`dispatch`] is the RSP verb dispatcher that ties the above together.
//! - [`device`] holds the (externally supplied, here bundled with samples)
//!   per-MCU device description and registry.
//! - [`memmap`] renders the `qXfer:memory-map:read::` XML reply.
//!
//! Wiring the TCP listener and CLI lives in the `avrbridge-cli` binary, not
//! in this crate.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod breakpoint;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod framer;
pub mod memmap;
pub mod probe;

pub use breakpoint::{Breakpoint, BreakpointKind, BreakpointTable};
pub use device::{DeviceDescription, DeviceRegistry, IoRegister};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use event::{Event, EventPump};
pub use framer::Framer;
pub use probe::{ProbeAdapter, ProbeTransport};
