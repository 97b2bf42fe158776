//! Probe adapter (spec §4.2, component C3).
//!
//! Translates high-level debugger intent (read memory, set PC, step, set a
//! breakpoint, ...) into probe commands over a [`ProbeTransport`], and owns
//! the program-counter cache.
//!
//! The wire encoding below is internal to this adapter; per spec §6 "the
//! probe adapter is swappable per target family; this spec does not
//! prescribe wire bytes." [`mock::MockTransport`] is a second, independent
//! implementation used by tests and by callers without real hardware.

pub mod mock;

use std::time::Duration;

use log::{debug, trace, warn};

use crate::breakpoint::{Breakpoint, BreakpointKind};
use crate::error::{Error, ProbeError};

/// Probe-side status byte prefixing every [`ProbeTransport::send`] reply.
mod status {
    pub const OK: u8 = 0x00;
    pub const WRONG_MODE: u8 = 0x01;
    pub const TIMEOUT: u8 = 0x02;
    pub const DEVICE_ERROR: u8 = 0x03;
    pub const PROTOCOL: u8 = 0x04;
}

mod opcode {
    pub const READ_MEM: u8 = 0x01;
    pub const WRITE_MEM: u8 = 0x02;
    pub const READ_PC: u8 = 0x03;
    pub const WRITE_PC: u8 = 0x04;
    pub const SINGLE_STEP: u8 = 0x05;
    pub const GO: u8 = 0x06;
    pub const STOP: u8 = 0x07;
    pub const RESET: u8 = 0x08;
    pub const PROGRAM_MODE: u8 = 0x09;
    pub const ERASE: u8 = 0x0a;
    pub const SET_BREAKPOINT: u8 = 0x0b;
    pub const CLEAR_BREAKPOINT: u8 = 0x0c;
}

/// Tag bytes of the asynchronous event frames [`ProbeTransport::recv_event`]
/// / [`ProbeTransport::expect_event`] return. Shared with
/// [`crate::event::EventPump`], which classifies the same frames.
pub mod frame {
    /// Program break: soft/hard breakpoint, run-to-address, or step
    /// complete. Followed by a 4-byte little-endian word PC.
    pub const PROGRAM_BREAK: u8 = 0x01;
    /// Break whose sub-reason is reset or leave-programming-mode.
    pub const RESET_LEAVE_PROGMODE: u8 = 0x02;
    /// Internal debug register went dirty; informational only.
    pub const IDR_DIRTY: u8 = 0x03;
    /// Target power rail dropped.
    pub const POWER_OFF: u8 = 0x04;
    /// Target power rail came up.
    pub const POWER_ON: u8 = 0x05;
    /// Target entered sleep.
    pub const SLEEP_ENTER: u8 = 0x06;
    /// Target left sleep.
    pub const SLEEP_LEAVE: u8 = 0x07;
}

/// How long [`ProbeTransport::recv_event`] waits for an unsolicited event
/// frame before giving up for this poll.
pub const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// The low-level capability an adapter is built on (spec §6): send a
/// command, get a response; poll for an asynchronous event frame; toggle
/// programming mode; reset the target.
pub trait ProbeTransport {
    /// Sends one command frame and returns the probe's response, status
    /// byte stripped. Implementations need not retry on `WRONG_MODE`; that
    /// is the adapter's responsibility for `read_pc`.
    fn send(&mut self, cmd: &[u8]) -> Result<Vec<u8>, Error>;

    /// Polls for an unsolicited event frame (breakpoint hit, power state,
    /// ...), waiting up to `timeout`. Returns `Ok(None)` on timeout with no
    /// event pending.
    fn recv_event(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, Error>;

    /// Blocks until an event frame arrives, with no timeout. Used after a
    /// command that the protocol guarantees completes with an event (e.g.
    /// `stop`, `reset`).
    fn expect_event(&mut self) -> Result<Vec<u8>, Error>;

    /// Enters or leaves programming mode.
    fn program_mode(&mut self, enter: bool) -> Result<(), Error>;
}

fn encode_status(resp: &[u8]) -> Result<&[u8], Error> {
    let (&code, rest) = resp
        .split_first()
        .ok_or_else(|| Error::Probe(ProbeError::Protocol("empty probe response".into())))?;
    match code {
        status::OK => Ok(rest),
        status::WRONG_MODE => Err(Error::Probe(ProbeError::WrongMode)),
        status::TIMEOUT => Err(Error::Probe(ProbeError::Timeout)),
        status::DEVICE_ERROR => Err(Error::Probe(ProbeError::Device(
            String::from_utf8_lossy(rest).into_owned(),
        ))),
        _ => Err(Error::Probe(ProbeError::Protocol(format!(
            "unrecognized status byte {code:#04x}"
        )))),
    }
}

fn breakpoint_kind_byte(kind: BreakpointKind) -> u8 {
    match kind {
        BreakpointKind::Code => 0,
        BreakpointKind::WriteData => 2,
        BreakpointKind::ReadData => 3,
        BreakpointKind::AccessData => 4,
    }
}

/// The program-counter cache (spec §3 "Program counter cache").
#[derive(Clone, Copy, Debug, Default)]
struct PcCache {
    value: u32,
    valid: bool,
}

/// Adapts [`ProbeTransport`] into the typed operations the dispatcher needs.
pub struct ProbeAdapter<T> {
    transport: T,
    pc: PcCache,
}

impl<T: ProbeTransport> ProbeAdapter<T> {
    /// Wraps a transport. The PC cache starts invalid.
    pub fn new(transport: T) -> Self {
        Self { transport, pc: PcCache::default() }
    }

    /// Reads `len` bytes starting at `addr`. `addr` carries its address
    /// space in high bits per the published memory map; stripping that
    /// bias is the dispatcher's job, not the adapter's.
    pub fn read_memory(&mut self, addr: u32, len: u32) -> Result<Vec<u8>, Error> {
        let mut cmd = Vec::with_capacity(9);
        cmd.push(opcode::READ_MEM);
        cmd.extend_from_slice(&addr.to_le_bytes());
        cmd.extend_from_slice(&len.to_le_bytes());
        let resp = self.transport.send(&cmd)?;
        let data = encode_status(&resp)?;
        Ok(data.to_vec())
    }

    /// Writes `bytes` starting at `addr`.
    pub fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error> {
        let mut cmd = Vec::with_capacity(9 + bytes.len());
        cmd.push(opcode::WRITE_MEM);
        cmd.extend_from_slice(&addr.to_le_bytes());
        cmd.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        cmd.extend_from_slice(bytes);
        let resp = self.transport.send(&cmd)?;
        encode_status(&resp)?;
        Ok(())
    }

    /// Reads the 32 general-purpose CPU registers (R0..R31).
    pub fn read_registers(&mut self, cpu_register_base: u16) -> Result<Vec<u8>, Error> {
        self.read_memory(u32::from(cpu_register_base), 32)
    }

    /// Reads SPL, SPH, SREG (in that order).
    pub fn read_status_area(&mut self, status_area_base: u16) -> Result<Vec<u8>, Error> {
        self.read_memory(u32::from(status_area_base), 3)
    }

    /// Reads the program counter (byte address), consulting the cache.
    ///
    /// On `WRONG_MODE`, issues `stop` and retries exactly once (spec §4.2).
    pub fn read_pc(&mut self) -> Result<u32, Error> {
        if self.pc.valid {
            return Ok(self.pc.value);
        }
        match self.read_pc_uncached() {
            Ok(value) => {
                self.pc = PcCache { value, valid: true };
                Ok(value)
            }
            Err(Error::Probe(ProbeError::WrongMode)) => {
                debug!("read_pc: WRONG_MODE, stopping and retrying once");
                self.stop()?;
                let value = self.read_pc_uncached()?;
                self.pc = PcCache { value, valid: true };
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    fn read_pc_uncached(&mut self) -> Result<u32, Error> {
        let resp = self.transport.send(&[opcode::READ_PC])?;
        let data = encode_status(&resp)?;
        let word = read_u32_le(data)?;
        Ok(word * 2)
    }

    /// Writes the program counter (byte address); invalidates, then
    /// revalidates on success.
    pub fn write_pc(&mut self, addr: u32) -> Result<(), Error> {
        self.pc.valid = false;
        let word = addr / 2;
        let mut cmd = Vec::with_capacity(5);
        cmd.push(opcode::WRITE_PC);
        cmd.extend_from_slice(&word.to_le_bytes());
        let resp = self.transport.send(&cmd)?;
        encode_status(&resp)?;
        self.pc = PcCache { value: addr, valid: true };
        Ok(())
    }

    /// Single-steps the target, updating the PC cache from the resulting
    /// event when it reports a program break.
    pub fn single_step(&mut self) -> Result<(), Error> {
        self.pc.valid = false;
        let resp = self.transport.send(&[opcode::SINGLE_STEP])?;
        encode_status(&resp)?;
        let event = self.transport.expect_event()?;
        self.note_event(&event);
        Ok(())
    }

    /// Resumes the target. Does not await the stop event; that is C5's job.
    pub fn go(&mut self) -> Result<(), Error> {
        self.pc.valid = false;
        let resp = self.transport.send(&[opcode::GO])?;
        encode_status(&resp)?;
        Ok(())
    }

    /// Halts the target, updating the PC cache from the resulting event.
    pub fn stop(&mut self) -> Result<(), Error> {
        let resp = self.transport.send(&[opcode::STOP])?;
        encode_status(&resp)?;
        let event = self.transport.expect_event()?;
        self.note_event(&event);
        Ok(())
    }

    /// Resets the target, updating the PC cache from the resulting event.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.pc.valid = false;
        let resp = self.transport.send(&[opcode::RESET])?;
        encode_status(&resp)?;
        let event = self.transport.expect_event()?;
        self.note_event(&event);
        Ok(())
    }

    /// Enters flash/EEPROM programming mode.
    pub fn enable_programming(&mut self) -> Result<(), Error> {
        self.transport.program_mode(true)
    }

    /// Leaves programming mode.
    pub fn disable_programming(&mut self) -> Result<(), Error> {
        self.transport.program_mode(false)
    }

    /// Erases the entire program memory. Caller must already be in
    /// programming mode.
    pub fn erase_program_memory(&mut self) -> Result<(), Error> {
        let resp = self.transport.send(&[opcode::ERASE])?;
        encode_status(&resp)?;
        Ok(())
    }

    /// Sets a breakpoint on a hardware slot.
    pub fn set_breakpoint(&mut self, bp: &Breakpoint, slot: u8) -> Result<(), Error> {
        let mut cmd = Vec::with_capacity(10);
        cmd.push(opcode::SET_BREAKPOINT);
        cmd.push(slot);
        cmd.push(breakpoint_kind_byte(bp.kind));
        cmd.extend_from_slice(&bp.address.to_le_bytes());
        cmd.extend_from_slice(&bp.length.to_le_bytes());
        let resp = self.transport.send(&cmd)?;
        encode_status(&resp)?;
        Ok(())
    }

    /// Clears a previously set hardware breakpoint.
    pub fn clear_breakpoint(&mut self, slot: u8) -> Result<(), Error> {
        let resp = self.transport.send(&[opcode::CLEAR_BREAKPOINT, slot])?;
        encode_status(&resp)?;
        Ok(())
    }

    /// Polls for a probe event with the adapter's default poll interval.
    pub fn poll_event(&mut self) -> Result<Option<Vec<u8>>, Error> {
        self.transport.recv_event(EVENT_POLL_TIMEOUT)
    }

    /// Sets the PC cache directly from an event-reported word address,
    /// doubling to byte address (spec §4.2 "Event paths").
    pub fn note_pc_from_event(&mut self, word_addr: u32) {
        trace!("PC cache updated from event: word {word_addr:#06x}");
        self.pc = PcCache { value: word_addr * 2, valid: true };
    }

    /// Forces the PC cache invalid, e.g. after an error whose effect on the
    /// target state is unknown.
    pub fn invalidate_pc(&mut self) {
        warn!("invalidating PC cache");
        self.pc.valid = false;
    }

    /// Reads the current program counter as last reported by the cache,
    /// without triggering a probe round trip. Used once a stop event has
    /// already populated it.
    #[must_use]
    pub fn cached_pc(&self) -> Option<u32> {
        self.pc.valid.then_some(self.pc.value)
    }

    fn note_event(&mut self, event: &[u8]) {
        if let [frame::PROGRAM_BREAK, rest @ ..] = event {
            if let Some(word) = rest.get(..4).map(|b| {
                u32::from_le_bytes(b.try_into().expect("checked length"))
            }) {
                self.note_pc_from_event(word);
            }
        }
    }
}

fn read_u32_le(bytes: &[u8]) -> Result<u32, Error> {
    let arr: [u8; 4] = bytes
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Probe(ProbeError::Protocol("short response".into())))?;
    Ok(u32::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use crate::breakpoint::{Breakpoint, BreakpointKind};

    #[test]
    fn read_pc_caches_until_invalidated() {
        let mut adapter = ProbeAdapter::new(MockTransport::new());
        adapter.write_pc(0x100).unwrap();
        assert_eq!(adapter.read_pc().unwrap(), 0x100);
        adapter.go().unwrap();
        assert!(!adapter.pc.valid);
    }

    #[test]
    fn write_memory_then_read_memory_round_trips() {
        let mut adapter = ProbeAdapter::new(MockTransport::new());
        adapter.write_memory(0x200, &[1, 2, 3, 4]).unwrap();
        assert_eq!(adapter.read_memory(0x200, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn set_and_clear_breakpoint_round_trip() {
        let mut adapter = ProbeAdapter::new(MockTransport::new());
        let bp = Breakpoint { address: 0x40, kind: BreakpointKind::Code, length: 2 };
        adapter.set_breakpoint(&bp, 0).unwrap();
        adapter.clear_breakpoint(0).unwrap();
    }

    #[test]
    fn read_pc_wrong_mode_retries_after_stop() {
        let mut transport = MockTransport::new();
        transport.fail_next_read_pc_with_wrong_mode();
        let mut adapter = ProbeAdapter::new(transport);
        // First read_pc should transparently stop() and retry.
        let pc = adapter.read_pc().unwrap();
        assert_eq!(pc, 0);
    }
}
