//! Memory-map XML (spec §6, served on `qXfer:memory-map:read::`).

use crate::device::DeviceDescription;

/// Debugger-visible SRAM/EEPROM addresses are biased by this much; the
/// dispatcher strips it before talking to the probe.
pub const DATA_SPACE_OFFSET: u32 = 0x0080_0000;

/// Size of the RAM window published to the debugger. Covers the CPU
/// register file, SRAM, and EEPROM behind the probe's unified data space.
const RAM_WINDOW_LEN: u32 = 0x0002_0000;

/// Renders the `<memory-map>` document for `device`.
#[must_use]
pub fn render(device: &DeviceDescription) -> String {
    format!(
        "<memory-map>\n\
         \x20 <memory type=\"ram\"   start=\"{ram_start:#x}\" length=\"{ram_len:#x}\"/>\n\
         \x20 <memory type=\"flash\" start=\"0\"        length=\"{flash_len:#x}\">\n\
         \x20    <property name=\"blocksize\">{page_size:#x}</property>\n\
         \x20 </memory>\n\
         </memory-map>\n",
        ram_start = DATA_SPACE_OFFSET,
        ram_len = RAM_WINDOW_LEN,
        flash_len = device.flash_size(),
        page_size = device.flash_page_size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::samples;

    #[test]
    fn reflects_device_flash_geometry() {
        let xml = render(&samples::ATMEGA644P);
        assert!(xml.contains("length=\"0x10000\""));
        assert!(xml.contains("0x100</property>"));
        assert!(xml.contains("start=\"0x800000\""));
    }

    #[test]
    fn is_well_formed_enough_to_round_trip_tags() {
        let xml = render(&samples::ATTINY45);
        assert_eq!(xml.matches("<memory").count(), 2);
        assert_eq!(xml.matches("</memory>").count(), 1);
    }
}
