#![warn(clippy::pedantic)]

use anyhow::Context;
use avrbridge_core::dispatch::DEFAULT_HARDWARE_SLOTS;
use avrbridge_core::probe::mock::MockTransport;
use avrbridge_core::probe::{ProbeAdapter, ProbeTransport};
use avrbridge_core::{DeviceRegistry, Dispatcher, Framer};
use clap::Parser;
use log::{error, info, trace};

use crate::cli::Cli;
use crate::err::{Error, Exit};

mod cli;
mod def;
mod err;
mod listener;
mod logging;

fn main() -> Exit {
    match run() {
        Ok(()) => Exit::Success,
        Err(e) => Exit::Failure(Error::App(e)),
    }
}

fn run() -> anyhow::Result<()> {
    let args = Cli::parse();
    logging::init(&args.verbose).context("could not initialize logger")?;
    trace!("{args:#?}");

    let device = DeviceRegistry::with_samples()
        .get(&args.session.device)
        .with_context(|| format!("unknown device: `{}`", args.session.device))?;

    let listener = listener::Listener::bind(args.listen.host, args.listen.port)
        .with_context(|| format!("failed to bind {}:{}", args.listen.host, args.listen.port))?;
    info!("listening on {}:{}", args.listen.host, args.listen.port);

    // Accept clients one at a time for the lifetime of the process (spec
    // §6: single-client acceptance, no multi-client fan-out).
    loop {
        let stream = listener.accept().context("failed to accept connection")?;
        let interrupt_source = stream
            .try_clone()
            .context("failed to clone debugger socket")?;

        // The physical probe wire protocol and USB enumeration are outside
        // this bridge's scope; a mock transport stands in until a real
        // `ProbeTransport` is wired in.
        let probe = ProbeAdapter::new(MockTransport::new());
        let mut dispatcher = Dispatcher::new(
            device.clone(),
            probe,
            DEFAULT_HARDWARE_SLOTS,
            args.session.ignore_interrupts,
        );
        let mut framer = Framer::new(stream);

        if let Err(e) = session(&mut framer, &mut dispatcher, interrupt_source) {
            error!("session ended: {e:#}");
        }
    }
}

/// Services one debugger connection until it detaches, is killed, or the
/// socket closes.
fn session<S, T>(
    framer: &mut Framer<S>,
    dispatcher: &mut Dispatcher<T>,
    mut interrupt_source: std::net::TcpStream,
) -> anyhow::Result<()>
where
    S: std::io::Read + std::io::Write,
    T: ProbeTransport,
{
    loop {
        let (payload, seq) = framer.receive().context("failed to receive packet")?;
        if let Some(seq) = seq {
            trace!("packet sequence id {seq:#04x}");
        }
        let reply = dispatcher
            .handle(&payload, &mut interrupt_source)
            .context("dispatcher failed")?;
        if let Some(reply) = reply {
            framer.send(&reply).context("failed to send reply")?;
        }
        if dispatcher.terminated() {
            return Ok(());
        }
    }
}
