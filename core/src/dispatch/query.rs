//! `q` subqueries (spec §4.6 "q subqueries", component C6 helper).

use avrbridge_hex as hex;

use crate::device::DeviceDescription;
use crate::error::Error;
use crate::memmap;
use crate::probe::{ProbeAdapter, ProbeTransport};

/// Reply to `qSupported`.
pub const SUPPORTED: &str = "qXfer:memory-map:read+";

/// Reply to `qXfer:memory-map:read::`.
#[must_use]
pub fn memory_map(device: &DeviceDescription) -> String {
    memmap::render(device)
}

/// Reply to bare `qRavr.io_reg` (register count), as a two-digit hex byte
/// (avr-gdb parses this reply as hex).
#[must_use]
pub fn io_reg_count(device: &DeviceDescription) -> String {
    format!("{:02x}", device.io_registers.len())
}

/// Reply to `qRavr.io_reg:first,count`: semicolon-separated `name,hex`
/// pairs. Side-effecting registers are reported as `[-- name --],00;`
/// without being read; runs of consecutive, contiguously addressed,
/// non-side-effecting registers are coalesced into a single probe read.
pub fn io_reg_range<T: ProbeTransport>(
    device: &DeviceDescription,
    first: usize,
    count: usize,
    probe: &mut ProbeAdapter<T>,
) -> Result<String, Error> {
    let end = first.saturating_add(count).min(device.io_registers.len());
    let regs = device.io_registers.get(first.min(end)..end).unwrap_or(&[]);

    let mut out = String::new();
    let mut i = 0;
    while i < regs.len() {
        if regs[i].has_side_effects() {
            out.push_str(&format!("[-- {} --],00;", regs[i].name));
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < regs.len()
            && !regs[j].has_side_effects()
            && regs[j].address == regs[j - 1].address + 1
        {
            j += 1;
        }
        let base = regs[i].address;
        let values = probe.read_memory(u32::from(base), (j - i) as u32)?;
        for (k, reg) in regs[i..j].iter().enumerate() {
            let [hi, lo] = hex::encode_byte(values[k]);
            out.push_str(&format!(
                "{},{}{};",
                reg.name,
                hi as char,
                lo as char
            ));
        }
        i = j;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::samples;
    use crate::probe::mock::MockTransport;

    #[test]
    fn side_effect_register_is_not_read() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let reply = io_reg_range(&samples::ATTINY45, 1, 1, &mut probe).unwrap();
        assert_eq!(reply, "[-- ADCL --],00;");
    }

    #[test]
    fn non_side_effect_register_reports_value() {
        let mut probe = ProbeAdapter::new(MockTransport::new());
        let reply = io_reg_range(&samples::ATTINY45, 0, 1, &mut probe).unwrap();
        assert_eq!(reply, "ADCSRB,00;");
    }

    #[test]
    fn count_matches_table_length() {
        assert_eq!(io_reg_count(&samples::ATTINY45), "0c");
    }
}
