//! Event pump (spec §4.4, component C5).
//!
//! Waits on both the debugger socket and the probe transport, classifies
//! probe event frames, and enforces debugger-interrupt priority.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::Error;
use crate::probe::{frame, ProbeAdapter, ProbeTransport};

/// How long to sleep between polls when neither the socket nor the probe
/// has anything ready, to avoid busy-spinning the single thread.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Outcome of [`EventPump::event_loop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The target stopped at a breakpoint, run-to-address, or step
    /// completion. Carries the byte address of the new PC.
    Breakpoint { pc: u32 },
    /// The debugger sent a raw `0x03` (or the probe reported an
    /// unrecoverable condition treated the same way).
    GdbInterrupt,
}

/// Multiplexes the debugger socket and the probe transport.
pub struct EventPump {
    /// Whether `SLEEP_ENTER`/`SLEEP_LEAVE` frames should be treated as a
    /// `GdbInterrupt` rather than logged and ignored (spec §4.4: "Log;
    /// continue (configurable to interrupt)").
    pub interrupt_on_sleep: bool,
}

impl Default for EventPump {
    fn default() -> Self {
        Self { interrupt_on_sleep: false }
    }
}

impl EventPump {
    /// Constructs a pump with the default (non-interrupting) sleep policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until either the debugger interrupts or the probe reports a
    /// breakpoint-class event. The caller must have already resumed the
    /// target (`go`/`step`/`reset`) before calling this.
    pub fn event_loop<R, T>(
        &self,
        debugger: &mut R,
        probe: &mut ProbeAdapter<T>,
    ) -> Result<Event, Error>
    where
        R: Read,
        T: ProbeTransport,
    {
        loop {
            let mut gdb_interrupt = self.poll_debugger_interrupt(debugger)?;
            let mut breakpoint_pc = None;

            if let Some(event) = probe.poll_event()? {
                match self.classify(&event) {
                    Classification::Breakpoint(word_pc) => {
                        probe.note_pc_from_event(word_pc);
                        breakpoint_pc = Some(word_pc * 2);
                    }
                    Classification::Interrupt => gdb_interrupt = true,
                    Classification::Ignore => {}
                }
            }

            // Priority: user interrupt wins when both are raised in the
            // same wake-up (spec §4.4).
            if gdb_interrupt {
                probe.stop()?;
                return Ok(Event::GdbInterrupt);
            }
            if let Some(pc) = breakpoint_pc {
                return Ok(Event::Breakpoint { pc });
            }

            thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    fn classify(&self, event: &[u8]) -> Classification {
        let Some((&tag, rest)) = event.split_first() else {
            warn!("empty probe event frame; treating as interrupt");
            return Classification::Interrupt;
        };
        match tag {
            frame::PROGRAM_BREAK => {
                let Some(word_pc) = rest.get(..4).map(le_u32) else {
                    warn!("malformed PROGRAM_BREAK frame; treating as interrupt");
                    return Classification::Interrupt;
                };
                Classification::Breakpoint(word_pc)
            }
            frame::RESET_LEAVE_PROGMODE => Classification::Ignore,
            frame::IDR_DIRTY => {
                debug!("probe IDR went dirty");
                Classification::Ignore
            }
            frame::POWER_OFF => Classification::Interrupt,
            frame::POWER_ON => {
                debug!("probe reported power restored");
                Classification::Ignore
            }
            frame::SLEEP_ENTER | frame::SLEEP_LEAVE => {
                debug!("probe reported sleep state change");
                if self.interrupt_on_sleep {
                    Classification::Interrupt
                } else {
                    Classification::Ignore
                }
            }
            other => {
                warn!("unknown probe event tag {other:#04x}; treating as interrupt");
                Classification::Interrupt
            }
        }
    }

    fn poll_debugger_interrupt<R: Read>(&self, debugger: &mut R) -> Result<bool, Error> {
        let mut buf = [0u8; 1];
        match debugger.read(&mut buf) {
            Ok(0) => Err(Error::Fatal("debugger closed connection".into())),
            Ok(_) => {
                if buf[0] == 0x03 {
                    trace!("debugger sent interrupt byte");
                    Ok(true)
                } else {
                    warn!("ignoring stray byte {:#04x} during resume", buf[0]);
                    Ok(false)
                }
            }
            Err(ref e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(Error::Fatal(e.to_string())),
        }
    }
}

enum Classification {
    Breakpoint(u32),
    Interrupt,
    Ignore,
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("slice of len 4"))
}
