//! Breakpoint table (spec §4.3, component C4).
//!
//! Models the debugger-requested breakpoints and arbitrates hardware slots
//! versus software (flash-patch) realization. `Z`/`z` packets materialize
//! immediately against the probe, which trivially satisfies the ordering
//! guarantee that breakpoints are live before the next `go`/`step` (spec §5
//! ordering guarantee 3) without a separate staged-delta pass.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::Error;
use crate::probe::{ProbeAdapter, ProbeTransport};

/// The AVR `BREAK` opcode (`0x9598`), little-endian, used to patch a
/// software breakpoint into flash.
pub const TRAP_OPCODE: [u8; 2] = [0x98, 0x95];

/// Breakpoint kind, matching the RSP `Z`/`z` `type` field (spec §4.6):
/// `0`/`1` both mean `Code`; `2`/`3`/`4` are the data variants.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BreakpointKind {
    Code,
    WriteData,
    ReadData,
    AccessData,
}

impl BreakpointKind {
    /// Parses the RSP `Z`/`z` `type` field.
    #[must_use]
    pub fn from_rsp_type(ty: u32) -> Option<Self> {
        match ty {
            0 | 1 => Some(Self::Code),
            2 => Some(Self::WriteData),
            3 => Some(Self::ReadData),
            4 => Some(Self::AccessData),
            _ => None,
        }
    }
}

/// A single requested breakpoint (spec §3 "Breakpoint").
#[derive(Clone, Copy, Debug)]
pub struct Breakpoint {
    pub address: u32,
    pub kind: BreakpointKind,
    pub length: u32,
}

/// Which resource backs a live breakpoint.
enum Resource {
    Hardware(u8),
    Software { original: [u8; 2] },
}

struct Entry {
    length: u32,
    resource: Resource,
}

/// The set of live breakpoints plus hardware-slot bookkeeping.
pub struct BreakpointTable {
    hardware_pool_size: u8,
    entries: HashMap<(u32, BreakpointKind), Entry>,
}

impl BreakpointTable {
    /// Builds an empty table with `hardware_pool_size` comparator slots.
    #[must_use]
    pub fn new(hardware_pool_size: u8) -> Self {
        Self { hardware_pool_size, entries: HashMap::new() }
    }

    /// Number of hardware comparator slots currently occupied.
    #[must_use]
    pub fn hardware_slots_in_use(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.resource, Resource::Hardware(_)))
            .count()
    }

    fn next_free_slot(&self) -> Option<u8> {
        let used: Vec<u8> = self
            .entries
            .values()
            .filter_map(|e| match e.resource {
                Resource::Hardware(slot) => Some(slot),
                Resource::Software { .. } => None,
            })
            .collect();
        (0..self.hardware_pool_size).find(|slot| !used.contains(slot))
    }

    /// Adds a breakpoint, pushing it to the probe immediately. `CODE`
    /// breakpoints prefer a hardware slot and fall back to a software
    /// flash patch when the pool is exhausted; data breakpoints require a
    /// hardware slot and error out otherwise.
    ///
    /// Idempotent: re-adding a live `(address, kind)` pair is a no-op.
    pub fn add_breakpoint<T: ProbeTransport>(
        &mut self,
        address: u32,
        kind: BreakpointKind,
        length: u32,
        probe: &mut ProbeAdapter<T>,
    ) -> Result<(), Error> {
        if self.entries.contains_key(&(address, kind)) {
            return Ok(());
        }

        let bp = Breakpoint { address, kind, length };
        match kind {
            BreakpointKind::Code => {
                if let Some(slot) = self.next_free_slot() {
                    probe.set_breakpoint(&bp, slot)?;
                    self.entries.insert((address, kind), Entry { length, resource: Resource::Hardware(slot) });
                } else {
                    debug!("hardware slots exhausted; patching software breakpoint at {address:#06x}");
                    let original = probe.read_memory(address, 2)?;
                    let original: [u8; 2] = original
                        .get(..2)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| Error::State("short read patching software breakpoint".into()))?;
                    probe.write_memory(address, &TRAP_OPCODE)?;
                    self.entries.insert((address, kind), Entry { length, resource: Resource::Software { original } });
                }
            }
            BreakpointKind::WriteData | BreakpointKind::ReadData | BreakpointKind::AccessData => {
                let slot = self.next_free_slot().ok_or_else(|| {
                    warn!("no free hardware slot for data breakpoint at {address:#06x}");
                    Error::State("no free hardware breakpoint slot".into())
                })?;
                probe.set_breakpoint(&bp, slot)?;
                self.entries.insert((address, kind), Entry { length, resource: Resource::Hardware(slot) });
            }
        }
        Ok(())
    }

    /// Removes a breakpoint, freeing its slot or restoring the original
    /// flash bytes. A no-op if no such breakpoint is live.
    pub fn delete_breakpoint<T: ProbeTransport>(
        &mut self,
        address: u32,
        kind: BreakpointKind,
        probe: &mut ProbeAdapter<T>,
    ) -> Result<(), Error> {
        let Some(entry) = self.entries.remove(&(address, kind)) else {
            return Ok(());
        };
        match entry.resource {
            Resource::Hardware(slot) => probe.clear_breakpoint(slot)?,
            Resource::Software { original } => probe.write_memory(address, &original)?,
        }
        Ok(())
    }

    /// Whether a live `CODE` breakpoint sits at `addr`, without mutating
    /// the table. Used by the step-over-interrupt logic (spec §4.6).
    #[must_use]
    pub fn code_breakpoint_at(&self, addr: u32) -> bool {
        self.entries.contains_key(&(addr, BreakpointKind::Code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::MockTransport;

    #[test]
    fn code_breakpoint_round_trips() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let mut table = BreakpointTable::new(2);
        table.add_breakpoint(0x40, BreakpointKind::Code, 2, &mut probe).unwrap();
        assert!(table.code_breakpoint_at(0x40));
        table.delete_breakpoint(0x40, BreakpointKind::Code, &mut probe).unwrap();
        assert!(!table.code_breakpoint_at(0x40));
    }

    #[test]
    fn code_breakpoints_overflow_to_software() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let mut table = BreakpointTable::new(1);
        table.add_breakpoint(0x10, BreakpointKind::Code, 2, &mut probe).unwrap();
        table.add_breakpoint(0x20, BreakpointKind::Code, 2, &mut probe).unwrap();
        assert_eq!(table.hardware_slots_in_use(), 1);
        assert!(table.code_breakpoint_at(0x10));
        assert!(table.code_breakpoint_at(0x20));
    }

    #[test]
    fn data_breakpoints_error_when_pool_exhausted() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let mut table = BreakpointTable::new(1);
        table.add_breakpoint(0x10, BreakpointKind::WriteData, 1, &mut probe).unwrap();
        let err = table.add_breakpoint(0x20, BreakpointKind::WriteData, 1, &mut probe);
        assert!(err.is_err());
    }

    #[test]
    fn adding_same_key_twice_is_idempotent() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let mut table = BreakpointTable::new(2);
        table.add_breakpoint(0x10, BreakpointKind::Code, 2, &mut probe).unwrap();
        table.add_breakpoint(0x10, BreakpointKind::Code, 2, &mut probe).unwrap();
        assert_eq!(table.hardware_slots_in_use(), 1);
    }
}
