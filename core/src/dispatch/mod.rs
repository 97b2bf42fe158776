//! RSP command dispatcher (spec §4.6, component C6).
//!
//! Consumes a decoded packet payload, executes the verb, and produces the
//! reply bytes. Owns the cross-request state the original design kept in
//! module-level statics: last verb (for orphan-byte bookkeeping), the
//! orphan-byte buffer itself, and the staged flash-write buffer (spec §9
//! re-architecture note: "module-level mutable statics ... belong inside a
//! per-session dispatcher record").

mod flash;
mod monitor;
mod query;
mod status;

use std::io::Read;
use std::sync::Arc;

use avrbridge_hex as hex;
use log::warn;

use crate::breakpoint::{BreakpointKind, BreakpointTable};
use crate::device::DeviceDescription;
use crate::error::Error;
use crate::event::{Event, EventPump};
use crate::memmap;
use crate::probe::{ProbeAdapter, ProbeTransport};

use flash::FlashBuffer;

/// Default size of the hardware breakpoint comparator pool, absent more
/// specific information from the device description.
pub const DEFAULT_HARDWARE_SLOTS: u8 = 4;

/// Ties together C2 (via `handle`'s caller), C3, C4, and C5 into the
/// per-session RSP verb dispatcher.
pub struct Dispatcher<T> {
    device: Arc<DeviceDescription>,
    probe: ProbeAdapter<T>,
    breakpoints: BreakpointTable,
    pump: EventPump,
    ignore_interrupts: bool,
    last_verb: u8,
    orphan_pending: bool,
    orphan_value: u8,
    flash: Option<FlashBuffer>,
    terminated: bool,
    console_busy: bool,
}

impl<T: ProbeTransport> Dispatcher<T> {
    /// Builds a dispatcher for one debugger session.
    pub fn new(
        device: Arc<DeviceDescription>,
        probe: ProbeAdapter<T>,
        hardware_slots: u8,
        ignore_interrupts: bool,
    ) -> Self {
        Self {
            device,
            probe,
            breakpoints: BreakpointTable::new(hardware_slots),
            pump: EventPump::new(),
            ignore_interrupts,
            last_verb: 0,
            orphan_pending: false,
            orphan_value: 0,
            flash: None,
            terminated: false,
            console_busy: false,
        }
    }

    /// Whether the session should be torn down after this reply is sent
    /// (`D`, `k`). `R` restarts the target without ending the session.
    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Handles one decoded packet payload, returning the reply to send (if
    /// any). `debugger` is the raw, non-blocking debugger stream, needed
    /// only for verbs that resume the target and must watch for `0x03`.
    ///
    /// RSP-level, probe, and state errors become `E01`; only
    /// [`Error::Fatal`] propagates.
    pub fn handle<R: Read>(&mut self, payload: &[u8], debugger: &mut R) -> Result<Option<Vec<u8>>, Error> {
        let verb = payload.first().copied().unwrap_or(0);
        let rest = payload.get(1..).unwrap_or(&[]);
        let previous_verb = self.last_verb;
        self.last_verb = verb;

        match self.dispatch(verb, rest, previous_verb, debugger) {
            Ok(reply) => Ok(reply),
            Err(Error::Fatal(msg)) => Err(Error::Fatal(msg)),
            Err(e) => {
                warn!("verb {:?} failed: {e}", verb as char);
                Ok(Some(b"E01".to_vec()))
            }
        }
    }

    /// Builds an `O`-console packet, suppressing reentrant output while
    /// another console send is outstanding (spec §5 "Reentrancy"). Callers
    /// must call [`Dispatcher::console_send_complete`] once the outer send
    /// returns, success or failure.
    pub fn console_message(&mut self, msg: &str) -> Option<Vec<u8>> {
        if self.console_busy {
            return None;
        }
        self.console_busy = true;
        let mut out = vec![b'O'];
        out.extend(hex::encode(msg.as_bytes()));
        Some(out)
    }

    /// Marks the outstanding console send as complete, re-enabling console
    /// output.
    pub fn console_send_complete(&mut self) {
        self.console_busy = false;
    }

    fn dispatch<R: Read>(
        &mut self,
        verb: u8,
        rest: &[u8],
        previous_verb: u8,
        debugger: &mut R,
    ) -> Result<Option<Vec<u8>>, Error> {
        match verb {
            b'?' => Ok(Some(status::simple(status::signal::SIGTRAP).into_bytes())),
            b'g' => self.read_all_registers().map(|b| Some(hex::encode(&b))),
            b'G' => Ok(Some(b"E01".to_vec())),
            b'p' => self.read_single_register(rest).map(Some),
            b'P' => self.write_single_register(rest).map(|()| Some(b"OK".to_vec())),
            b'm' => self.read_memory_verb(rest).map(|b| Some(hex::encode(&b))),
            b'M' => self
                .write_memory_verb(rest, previous_verb)
                .map(|()| Some(b"OK".to_vec())),
            b'c' => self.cont(rest, debugger).map(Some),
            b'C' => self.cont_with_signal(rest, debugger).map(Some),
            b's' => self.step(rest, debugger).map(Some),
            b'D' => {
                self.probe.go()?;
                self.terminated = true;
                Ok(Some(b"OK".to_vec()))
            }
            b'k' => {
                self.probe.go()?;
                self.terminated = true;
                Ok(None)
            }
            b'R' => {
                self.probe.reset()?;
                Ok(None)
            }
            b'!' => Ok(Some(b"OK".to_vec())),
            b'Z' => self.add_breakpoint_verb(rest).map(|()| Some(b"OK".to_vec())),
            b'z' => self.remove_breakpoint_verb(rest).map(|()| Some(b"OK".to_vec())),
            b'q' => self.query(rest).map(Some),
            b'v' => self.flash_verb(rest).map(Some),
            _ => Ok(Some(Vec::new())),
        }
    }

    fn strip_data_space_offset(&self, addr: u32) -> u32 {
        if addr >= memmap::DATA_SPACE_OFFSET {
            addr - memmap::DATA_SPACE_OFFSET
        } else {
            addr
        }
    }

    fn split_once(bytes: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
        let pos = bytes.iter().position(|&b| b == sep)?;
        Some((&bytes[..pos], &bytes[pos + 1..]))
    }

    fn parse_hex_u32(bytes: &[u8]) -> u32 {
        hex::parse_uint(bytes, 8).0
    }

    fn read_all_registers(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = self.probe.read_registers(self.device.cpu_register_base)?;
        let status_area = self.probe.read_status_area(self.device.status_area_base)?;
        out.push(status_area[2]); // SREG
        out.push(status_area[0]); // SPL
        out.push(status_area[1]); // SPH
        let pc = self.probe.read_pc()?;
        out.extend_from_slice(&pc.to_le_bytes());
        Ok(out)
    }

    fn read_single_register(&mut self, rest: &[u8]) -> Result<Vec<u8>, Error> {
        let regno = hex::parse_uint(rest, 2).0;
        let bytes = match regno {
            0..=31 => self
                .probe
                .read_memory(u32::from(self.device.cpu_register_base) + regno, 1)?,
            32 => {
                let status_area = self.probe.read_status_area(self.device.status_area_base)?;
                vec![status_area[2]]
            }
            33 => self.probe.read_status_area(self.device.status_area_base)?[..2].to_vec(),
            34 => self.probe.read_pc()?.to_le_bytes().to_vec(),
            _ => return Err(Error::Protocol(format!("unknown register {regno}"))),
        };
        Ok(hex::encode(&bytes))
    }

    fn write_single_register(&mut self, rest: &[u8]) -> Result<(), Error> {
        let (regno_bytes, value_hex) =
            Self::split_once(rest, b'=').ok_or_else(|| Error::Protocol("P missing '='".into()))?;
        let regno = hex::parse_uint(regno_bytes, 2).0;
        let value = hex::decode(value_hex)?;
        let byte0 = value.get(..1).ok_or_else(|| Error::Protocol("empty register write".into()))?;
        match regno {
            0..=31 => self
                .probe
                .write_memory(u32::from(self.device.cpu_register_base) + regno, byte0)?,
            32 => {
                let sreg_addr = u32::from(self.device.status_area_base) + 2;
                self.probe.write_memory(sreg_addr, byte0)?;
            }
            33 => {
                let sp_bytes = value
                    .get(..2)
                    .ok_or_else(|| Error::Protocol("short SP write".into()))?;
                self.probe
                    .write_memory(u32::from(self.device.status_area_base), sp_bytes)?;
            }
            34 => {
                let pc = value
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .ok_or_else(|| Error::Protocol("short PC write".into()))?;
                self.probe.write_pc(pc)?;
            }
            _ => return Err(Error::Protocol(format!("unknown register {regno}"))),
        }
        Ok(())
    }

    fn parse_addr_len(rest: &[u8]) -> Result<(u32, u32), Error> {
        let (addr_bytes, len_bytes) =
            Self::split_once(rest, b',').ok_or_else(|| Error::Protocol("missing ','".into()))?;
        Ok((Self::parse_hex_u32(addr_bytes), Self::parse_hex_u32(len_bytes)))
    }

    fn read_memory_verb(&mut self, rest: &[u8]) -> Result<Vec<u8>, Error> {
        let (addr, len) = Self::parse_addr_len(rest)?;
        let local = self.strip_data_space_offset(addr);
        self.probe.read_memory(local, len)
    }

    fn write_memory_verb(&mut self, rest: &[u8], previous_verb: u8) -> Result<(), Error> {
        let (head, hexdata) =
            Self::split_once(rest, b':').ok_or_else(|| Error::Protocol("M missing ':'".into()))?;
        let (addr_bytes, _len_bytes) =
            Self::split_once(head, b',').ok_or_else(|| Error::Protocol("M missing ','".into()))?;
        let addr_raw = Self::parse_hex_u32(addr_bytes);
        let is_flash = addr_raw < memmap::DATA_SPACE_OFFSET;
        let mut addr = self.strip_data_space_offset(addr_raw);
        let mut payload = hex::decode(hexdata)?;

        if addr % 2 == 1 && previous_verb == b'M' && self.orphan_pending {
            addr -= 1;
            payload.insert(0, self.orphan_value);
        }
        self.orphan_pending = false;

        if is_flash && payload.len() % 2 == 1 {
            self.orphan_value = *payload.last().expect("non-empty payload");
            payload.pop();
            self.orphan_pending = true;
        }

        self.probe.write_memory(addr, &payload)
    }

    fn parse_optional_addr(rest: &[u8]) -> Option<u32> {
        (!rest.is_empty()).then(|| Self::parse_hex_u32(rest))
    }

    fn stop_reply(&mut self, sig: u8) -> Result<Vec<u8>, Error> {
        let status_area = self.probe.read_status_area(self.device.status_area_base)?;
        let sreg = status_area[2];
        let sp = u16::from_le_bytes([status_area[0], status_area[1]]);
        let pc = self.probe.read_pc()?;
        Ok(status::extended(sig, sreg, sp, pc).into_bytes())
    }

    fn cont<R: Read>(&mut self, rest: &[u8], debugger: &mut R) -> Result<Vec<u8>, Error> {
        if let Some(addr) = Self::parse_optional_addr(rest) {
            self.probe.write_pc(addr)?;
        }
        self.probe.go()?;
        self.await_resume(debugger)
    }

    fn cont_with_signal<R: Read>(&mut self, rest: &[u8], debugger: &mut R) -> Result<Vec<u8>, Error> {
        let (sig_bytes, addr_bytes) = match Self::split_once(rest, b';') {
            Some((s, a)) => (s, Some(a)),
            None => (rest, None),
        };
        let sig = hex::parse_uint(sig_bytes, 2).0;

        if sig == u32::from(status::signal::SIGHUP) {
            // Unusual but preserved: `C` with SIGHUP resets the target
            // rather than continuing (spec §9 open question).
            self.probe.reset()?;
            return self.stop_reply(status::signal::SIGTRAP);
        }

        if let Some(addr_bytes) = addr_bytes {
            if let Some(addr) = Self::parse_optional_addr(addr_bytes) {
                self.probe.write_pc(addr)?;
            }
        }
        self.probe.go()?;
        self.await_resume(debugger)
    }

    fn await_resume<R: Read>(&mut self, debugger: &mut R) -> Result<Vec<u8>, Error> {
        match self.pump.event_loop(debugger, &mut self.probe)? {
            Event::GdbInterrupt => self.stop_reply(status::signal::SIGINT),
            Event::Breakpoint { .. } => self.stop_reply(status::signal::SIGTRAP),
        }
    }

    fn step<R: Read>(&mut self, rest: &[u8], debugger: &mut R) -> Result<Vec<u8>, Error> {
        if let Some(addr) = Self::parse_optional_addr(rest) {
            self.probe.write_pc(addr)?;
        }
        self.probe.single_step()?;
        let pc = self.probe.read_pc()?;
        if self.ignore_interrupts && pc < self.device.vector_table_end() {
            self.step_over_interrupt(debugger)
        } else {
            self.stop_reply(status::signal::SIGTRAP)
        }
    }

    /// Implements spec §4.6 "Step-over-interrupt": if a single step lands
    /// inside the vector table, silently run until the ISR returns rather
    /// than stopping the debugger there.
    fn step_over_interrupt<R: Read>(&mut self, debugger: &mut R) -> Result<Vec<u8>, Error> {
        let status_area = self.probe.read_status_area(self.device.status_area_base)?;
        let ret_sp = u16::from_le_bytes([status_area[0], status_area[1]]);

        let ret_pc = match self.probe.read_memory(u32::from(ret_sp) + 1, 2) {
            Ok(bytes) => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])) * 2,
            Err(e) => {
                warn!("step-over-interrupt: failed reading return address: {e}");
                return self.stop_reply(status::signal::SIGTRAP);
            }
        };

        let mut installed = false;
        if !self.breakpoints.code_breakpoint_at(ret_pc) {
            match self
                .breakpoints
                .add_breakpoint(ret_pc, BreakpointKind::Code, 2, &mut self.probe)
            {
                Ok(()) => installed = true,
                Err(e) => {
                    warn!("step-over-interrupt: fail-open, could not install transient breakpoint: {e}");
                    return self.stop_reply(status::signal::SIGTRAP);
                }
            }
        }

        loop {
            self.probe.go()?;
            let event = self.pump.event_loop(debugger, &mut self.probe)?;
            if installed {
                self.breakpoints
                    .delete_breakpoint(ret_pc, BreakpointKind::Code, &mut self.probe)?;
                installed = false;
            }

            match event {
                Event::GdbInterrupt => return self.stop_reply(status::signal::SIGINT),
                Event::Breakpoint { pc } => {
                    let status_area = self.probe.read_status_area(self.device.status_area_base)?;
                    let sp_now = u16::from_le_bytes([status_area[0], status_area[1]]);
                    if pc == ret_pc || sp_now > ret_sp {
                        return self.stop_reply(status::signal::SIGTRAP);
                    }
                    // Nested ISR: reinstall the transient breakpoint and
                    // keep running.
                    if !self.breakpoints.code_breakpoint_at(ret_pc) {
                        match self
                            .breakpoints
                            .add_breakpoint(ret_pc, BreakpointKind::Code, 2, &mut self.probe)
                        {
                            Ok(()) => installed = true,
                            Err(e) => {
                                warn!("step-over-interrupt: fail-open on reinstall: {e}");
                                return self.stop_reply(status::signal::SIGTRAP);
                            }
                        }
                    }
                }
            }
        }
    }

    fn parse_breakpoint_triplet(rest: &[u8]) -> Result<(u32, u32, u32), Error> {
        let (ty_bytes, remainder) =
            Self::split_once(rest, b',').ok_or_else(|| Error::Protocol("Z/z missing type".into()))?;
        let (addr_bytes, len_bytes) =
            Self::split_once(remainder, b',').ok_or_else(|| Error::Protocol("Z/z missing addr/len".into()))?;
        Ok((
            hex::parse_uint(ty_bytes, 2).0,
            Self::parse_hex_u32(addr_bytes),
            Self::parse_hex_u32(len_bytes),
        ))
    }

    fn add_breakpoint_verb(&mut self, rest: &[u8]) -> Result<(), Error> {
        let (ty, addr, len) = Self::parse_breakpoint_triplet(rest)?;
        let kind = BreakpointKind::from_rsp_type(ty)
            .ok_or_else(|| Error::Protocol(format!("unknown breakpoint type {ty}")))?;
        let local_addr = if matches!(kind, BreakpointKind::Code) {
            addr
        } else {
            self.strip_data_space_offset(addr)
        };
        self.breakpoints.add_breakpoint(local_addr, kind, len, &mut self.probe)
    }

    fn remove_breakpoint_verb(&mut self, rest: &[u8]) -> Result<(), Error> {
        let (ty, addr, _len) = Self::parse_breakpoint_triplet(rest)?;
        let kind = BreakpointKind::from_rsp_type(ty)
            .ok_or_else(|| Error::Protocol(format!("unknown breakpoint type {ty}")))?;
        let local_addr = if matches!(kind, BreakpointKind::Code) {
            addr
        } else {
            self.strip_data_space_offset(addr)
        };
        self.breakpoints.delete_breakpoint(local_addr, kind, &mut self.probe)
    }

    fn query(&mut self, rest: &[u8]) -> Result<Vec<u8>, Error> {
        if rest.starts_with(b"Supported") {
            return Ok(query::SUPPORTED.as_bytes().to_vec());
        }
        if rest.starts_with(b"Xfer:memory-map:read::") {
            return Ok(query::memory_map(&self.device).into_bytes());
        }
        if let Some(hexcmd) = rest.strip_prefix(b"Rcmd,") {
            let cmd_bytes = hex::decode(hexcmd)?;
            let cmd = String::from_utf8_lossy(&cmd_bytes).into_owned();
            return Ok(match monitor::run(&cmd, &mut self.probe) {
                Some(text) => hex::encode(text.as_bytes()),
                None => Vec::new(),
            });
        }
        if let Some(after) = rest.strip_prefix(b"Ravr.io_reg") {
            if after.is_empty() {
                return Ok(query::io_reg_count(&self.device).into_bytes());
            }
            if let Some(args) = after.strip_prefix(b':') {
                let (first_bytes, count_bytes) = Self::split_once(args, b',')
                    .ok_or_else(|| Error::Protocol("bad Ravr.io_reg args".into()))?;
                let first = Self::parse_hex_u32(first_bytes) as usize;
                let count = Self::parse_hex_u32(count_bytes) as usize;
                return Ok(query::io_reg_range(&self.device, first, count, &mut self.probe)?.into_bytes());
            }
        }
        Ok(Vec::new())
    }

    fn flash_verb(&mut self, rest: &[u8]) -> Result<Vec<u8>, Error> {
        if rest.starts_with(b"FlashErase") {
            self.flash = Some(FlashBuffer::erase(
                self.device.flash_page_size,
                self.device.flash_page_count,
                &mut self.probe,
            )?);
            return Ok(b"OK".to_vec());
        }
        if let Some(after) = rest.strip_prefix(b"FlashWrite:") {
            let (offset_bytes, data) =
                Self::split_once(after, b':').ok_or_else(|| Error::Protocol("bad vFlashWrite".into()))?;
            let offset = Self::parse_hex_u32(offset_bytes);
            let flash = self
                .flash
                .as_mut()
                .ok_or_else(|| Error::State("vFlashWrite without vFlashErase".into()))?;
            flash.write(offset, data)?;
            return Ok(b"OK".to_vec());
        }
        if rest.starts_with(b"FlashDone") {
            let flash = self
                .flash
                .take()
                .ok_or_else(|| Error::State("vFlashDone without vFlashErase".into()))?;
            flash.commit(&mut self.probe)?;
            return Ok(b"OK".to_vec());
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};

    use super::*;
    use crate::device::samples;
    use crate::probe::mock::MockTransport;

    struct NoData;
    impl Read for NoData {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
        }
    }

    fn dispatcher() -> Dispatcher<MockTransport> {
        Dispatcher::new(
            Arc::new(samples::ATMEGA644P),
            ProbeAdapter::new(MockTransport::new()),
            DEFAULT_HARDWARE_SLOTS,
            false,
        )
    }

    #[test]
    fn handshake_replies_trap() {
        let mut d = dispatcher();
        let reply = d.handle(b"?", &mut NoData).unwrap().unwrap();
        assert_eq!(reply, b"S05");
    }

    #[test]
    fn register_read_reflects_pc_and_sp() {
        let mut d = dispatcher();
        d.handle(b"P22=00010000", &mut NoData).unwrap(); // PC = 0x100
        d.handle(b"P21=ff08", &mut NoData).unwrap(); // SP = 0x08ff
        let reply = d.handle(b"g", &mut NoData).unwrap().unwrap();
        let text = String::from_utf8(reply).unwrap();
        let expected = format!("{}00ff0800010000", "00".repeat(32));
        assert_eq!(text, expected);
        assert_eq!(text.len(), 78);
    }

    #[test]
    fn odd_length_flash_write_leaves_no_residue() {
        let mut d = dispatcher();
        d.handle(b"M0,3:AABBCC", &mut NoData).unwrap();
        d.handle(b"M3,3:DDEEFF", &mut NoData).unwrap();
        let reply = d.handle(b"m0,6", &mut NoData).unwrap().unwrap();
        assert_eq!(reply, b"aabbccddeeff");
        assert!(!d.orphan_pending);
    }

    #[test]
    fn unknown_verb_is_empty_reply() {
        let mut d = dispatcher();
        let reply = d.handle(b"@bogus", &mut NoData).unwrap().unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn bad_memory_read_becomes_e01() {
        let mut d = dispatcher();
        // Missing comma: malformed 'm' request.
        let reply = d.handle(b"mZZZ", &mut NoData).unwrap().unwrap();
        assert_eq!(reply, b"E01");
    }

    #[test]
    fn kill_terminates_with_no_reply() {
        let mut d = dispatcher();
        let reply = d.handle(b"k", &mut NoData).unwrap();
        assert!(reply.is_none());
        assert!(d.terminated());
    }

    #[test]
    fn detach_replies_ok_and_terminates() {
        let mut d = dispatcher();
        let reply = d.handle(b"D", &mut NoData).unwrap().unwrap();
        assert_eq!(reply, b"OK");
        assert!(d.terminated());
    }

    #[test]
    fn restart_resets_target_without_terminating() {
        let mut d = dispatcher();
        let reply = d.handle(b"R", &mut NoData).unwrap();
        assert!(reply.is_none());
        assert!(!d.terminated());
    }

    #[test]
    fn console_message_suppresses_reentry_until_complete() {
        let mut d = dispatcher();
        let first = d.console_message("hello");
        assert!(first.is_some());
        assert!(d.console_message("again").is_none());
        d.console_send_complete();
        assert!(d.console_message("again").is_some());
    }
}
