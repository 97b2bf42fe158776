//! An in-memory [`ProbeTransport`] for tests and hardware-less runs.
//!
//! Models a flat byte-addressable memory, a word-addressed PC register, and
//! a tiny event queue. Grounded on the same event-frame layout
//! [`super::super::event`] parses, so unit tests exercise the real framing.

use std::collections::VecDeque;
use std::time::Duration;

use super::{frame, status, ProbeTransport};
use crate::error::Error;

const MEM_SIZE: usize = 1 << 20;

/// In-memory stand-in for a real probe connection.
pub struct MockTransport {
    memory: Vec<u8>,
    pc_word: u32,
    programming: bool,
    events: VecDeque<Vec<u8>>,
    fail_next_read_pc: bool,
}

impl MockTransport {
    /// Builds a transport with zeroed memory and PC at word 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: vec![0; MEM_SIZE],
            pc_word: 0,
            programming: false,
            events: VecDeque::new(),
            fail_next_read_pc: false,
        }
    }

    /// Arranges for the next `READ_PC` command to return `WRONG_MODE`,
    /// exercising the adapter's retry-after-stop path.
    pub fn fail_next_read_pc_with_wrong_mode(&mut self) {
        self.fail_next_read_pc = true;
    }

    /// Queues an event frame to be returned by the next `recv_event` /
    /// `expect_event` call.
    pub fn push_event(&mut self, event: Vec<u8>) {
        self.events.push_back(event);
    }

    fn program_break_event(&self) -> Vec<u8> {
        let mut event = vec![frame::PROGRAM_BREAK];
        event.extend_from_slice(&self.pc_word.to_le_bytes());
        event
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeTransport for MockTransport {
    fn send(&mut self, cmd: &[u8]) -> Result<Vec<u8>, Error> {
        use super::opcode;

        let Some((&op, args)) = cmd.split_first() else {
            return Ok(vec![status::PROTOCOL]);
        };

        match op {
            opcode::READ_MEM => {
                let addr = le_u32(&args[0..4]) as usize;
                let len = le_u32(&args[4..8]) as usize;
                let end = (addr + len).min(self.memory.len());
                let start = addr.min(end);
                let mut resp = vec![status::OK];
                resp.extend_from_slice(&self.memory[start..end]);
                Ok(resp)
            }
            opcode::WRITE_MEM => {
                let addr = le_u32(&args[0..4]) as usize;
                let len = le_u32(&args[4..8]) as usize;
                let data = &args[8..8 + len];
                let end = (addr + len).min(self.memory.len());
                self.memory[addr..end].copy_from_slice(&data[..end - addr]);
                Ok(vec![status::OK])
            }
            opcode::READ_PC => {
                if self.fail_next_read_pc {
                    self.fail_next_read_pc = false;
                    return Ok(vec![status::WRONG_MODE]);
                }
                let mut resp = vec![status::OK];
                resp.extend_from_slice(&self.pc_word.to_le_bytes());
                Ok(resp)
            }
            opcode::WRITE_PC => {
                self.pc_word = le_u32(&args[0..4]);
                Ok(vec![status::OK])
            }
            opcode::SINGLE_STEP => {
                self.pc_word += 1;
                self.events.push_back(self.program_break_event());
                Ok(vec![status::OK])
            }
            opcode::GO => Ok(vec![status::OK]),
            opcode::STOP | opcode::RESET => {
                self.events.push_back(self.program_break_event());
                Ok(vec![status::OK])
            }
            opcode::ERASE => {
                self.memory.fill(0xff);
                Ok(vec![status::OK])
            }
            opcode::SET_BREAKPOINT | opcode::CLEAR_BREAKPOINT => Ok(vec![status::OK]),
            _ => Ok(vec![status::PROTOCOL]),
        }
    }

    fn recv_event(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.events.pop_front())
    }

    fn expect_event(&mut self) -> Result<Vec<u8>, Error> {
        Ok(self
            .events
            .pop_front()
            .unwrap_or_else(|| self.program_break_event()))
    }

    fn program_mode(&mut self, enter: bool) -> Result<(), Error> {
        self.programming = enter;
        Ok(())
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}
