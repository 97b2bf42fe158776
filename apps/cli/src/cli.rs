//! Command-line interface.

use std::net::IpAddr;

use clap::Args;
use clap::Parser;
use clap_verbosity_flag::Verbosity;

use crate::def::NAME;

/// Bridge a GDB remote serial protocol client to an AVR debug probe.
#[derive(Debug, Parser)]
#[clap(name = NAME, author, version, about, long_about)]
pub struct Cli {
    /// Listener options.
    #[clap(flatten)]
    #[clap(next_help_heading = "Listener")]
    pub listen: Listen,

    /// Session options.
    #[clap(flatten)]
    #[clap(next_help_heading = "Session")]
    pub session: Session,

    /// Logging verbosity.
    #[clap(flatten)]
    pub verbose: Verbosity,
}

/// TCP listener options (spec §6 "External interfaces").
#[derive(Args, Debug)]
pub struct Listen {
    /// Address to bind the debugger-facing TCP listener to.
    #[clap(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind the debugger-facing TCP listener to.
    ///
    /// Must be in `1024..=65535`; well-known ports are rejected.
    #[clap(long)]
    pub port: u16,
}

/// Debugger session options (spec §3 "Session configuration").
#[derive(Args, Debug)]
pub struct Session {
    /// Target device identifier, e.g. `atmega644p`.
    #[clap(long, default_value = "atmega644p")]
    pub device: String,

    /// Treat a single step landing in the interrupt vector table as an
    /// implicit run-to-return rather than stopping the debugger there.
    #[clap(long)]
    pub ignore_interrupts: bool,
}
