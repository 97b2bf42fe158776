//! Per-MCU device description and registry (spec §3 "Device description",
//! §6 "Device registry capability").
//!
//! The wire protocol, flash geometry, and register layout of a given AVR
//! part are immutable for the lifetime of a session. In the original
//! implementation these were `static constexpr` tables compiled per device;
//! per the redesign note in spec §9 ("per-device tables become a runtime
//! registry"), here they are plain data held in a [`DeviceRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

/// Flag bit on an [`IoRegister`]: reading this register has side effects,
/// so the dispatcher must not read it speculatively during a bulk
/// `qRavr.io_reg` query.
pub const IO_REG_SIDE_EFFECT: u8 = 0x01;

/// One entry of a device's I/O register table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IoRegister {
    /// Register name, as reported to the debugger.
    pub name: &'static str,
    /// I/O-space address.
    pub address: u16,
    /// Bit flags; see [`IO_REG_SIDE_EFFECT`].
    pub flags: u8,
}

impl IoRegister {
    /// Whether reading this register has side effects.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.flags & IO_REG_SIDE_EFFECT != 0
    }
}

/// Immutable, per-session device description (spec §3).
#[derive(Clone, Debug)]
pub struct DeviceDescription {
    /// Device identifier, e.g. `"atmega644p"`.
    pub id: &'static str,
    /// Bytes per flash page.
    pub flash_page_size: u32,
    /// Number of flash pages.
    pub flash_page_count: u32,
    /// Bytes per EEPROM page.
    pub eeprom_page_size: u32,
    /// Number of EEPROM pages.
    pub eeprom_page_count: u32,
    /// Base address of the CPU register file (R0..R31) in data space.
    pub cpu_register_base: u16,
    /// Base address of the status area (SPL, SPH, SREG, contiguous).
    pub status_area_base: u16,
    /// Length in bytes of the interrupt vector table at the start of flash.
    pub vector_table_len: u32,
    /// Optional I/O register description table.
    pub io_registers: &'static [IoRegister],
}

impl DeviceDescription {
    /// Total flash size in bytes.
    #[must_use]
    pub fn flash_size(&self) -> u32 {
        self.flash_page_size * self.flash_page_count
    }

    /// Total EEPROM size in bytes.
    #[must_use]
    pub fn eeprom_size(&self) -> u32 {
        self.eeprom_page_size * self.eeprom_page_count
    }

    /// Address one past the end of the interrupt vector table.
    #[must_use]
    pub fn vector_table_end(&self) -> u32 {
        self.vector_table_len
    }
}

/// A read-only mapping from device identifier to its [`DeviceDescription`].
///
/// This is the "device registry capability" of spec §6: the dispatcher
/// reads through it via [`DeviceRegistry::get`] for flash geometry, the
/// vector-table length, the I/O register table, and the status/CPU-register
/// area bases. Bundles the three sample devices transcribed from the
/// original `avarice` device tables; callers running against other parts
/// supply their own via [`DeviceRegistry::new`] / [`DeviceRegistry::insert`].
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<&'static str, Arc<DeviceDescription>>,
}

impl DeviceRegistry {
    /// Constructs an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a registry pre-populated with the bundled sample devices.
    #[must_use]
    pub fn with_samples() -> Self {
        let mut registry = Self::new();
        for device in samples::ALL {
            registry.insert(device.clone());
        }
        registry
    }

    /// Registers (or replaces) a device description.
    pub fn insert(&mut self, device: DeviceDescription) {
        self.devices.insert(device.id, Arc::new(device));
    }

    /// Looks up a device description by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<DeviceDescription>> {
        self.devices.get(id).cloned()
    }
}

/// Sample device descriptions transcribed from `devices/*.cpp` in the
/// original `avarice` source (spec §3 supplement).
pub mod samples {
    use super::{DeviceDescription, IoRegister, IO_REG_SIDE_EFFECT};

    /// `ATtiny45`: 4 KiB flash, 256 B EEPROM, 15 interrupt vectors.
    pub const ATTINY45: DeviceDescription = DeviceDescription {
        id: "attiny45",
        flash_page_size: 64,
        flash_page_count: 64,
        eeprom_page_size: 4,
        eeprom_page_count: 64,
        cpu_register_base: 0x0000,
        status_area_base: 0x005d,
        vector_table_len: 15 * 2,
        io_registers: &[
            IoRegister { name: "ADCSRB", address: 0x23, flags: 0 },
            IoRegister { name: "ADCL", address: 0x24, flags: IO_REG_SIDE_EFFECT },
            IoRegister { name: "ADCH", address: 0x25, flags: IO_REG_SIDE_EFFECT },
            IoRegister { name: "ADCSRA", address: 0x26, flags: 0 },
            IoRegister { name: "ADMUX", address: 0x27, flags: 0 },
            IoRegister { name: "USICR", address: 0x2d, flags: 0 },
            IoRegister { name: "PINB", address: 0x36, flags: 0 },
            IoRegister { name: "DDRB", address: 0x37, flags: 0 },
            IoRegister { name: "PORTB", address: 0x38, flags: 0 },
            IoRegister { name: "SPL", address: 0x5d, flags: 0 },
            IoRegister { name: "SPH", address: 0x5e, flags: 0 },
            IoRegister { name: "SREG", address: 0x5f, flags: 0 },
        ],
    };

    /// `ATmega644P`: 64 KiB flash, 2 KiB EEPROM, 31 interrupt vectors.
    pub const ATMEGA644P: DeviceDescription = DeviceDescription {
        id: "atmega644p",
        flash_page_size: 256,
        flash_page_count: 256,
        eeprom_page_size: 8,
        eeprom_page_count: 256,
        cpu_register_base: 0x0000,
        status_area_base: 0x005d,
        vector_table_len: 31 * 4,
        io_registers: &[
            IoRegister { name: "PINA", address: 0x20, flags: 0 },
            IoRegister { name: "DDRA", address: 0x21, flags: 0 },
            IoRegister { name: "PORTA", address: 0x22, flags: 0 },
            IoRegister { name: "EECR", address: 0x3f, flags: 0 },
            IoRegister { name: "EEDR", address: 0x40, flags: 0 },
            IoRegister { name: "SPCR", address: 0x4c, flags: 0 },
            IoRegister { name: "SPL", address: 0x5d, flags: 0 },
            IoRegister { name: "SPH", address: 0x5e, flags: 0 },
            IoRegister { name: "SREG", address: 0x5f, flags: 0 },
            IoRegister { name: "ADCL", address: 0x78, flags: IO_REG_SIDE_EFFECT },
            IoRegister { name: "ADCH", address: 0x79, flags: IO_REG_SIDE_EFFECT },
            IoRegister { name: "UDR0", address: 0xc6, flags: IO_REG_SIDE_EFFECT },
        ],
    };

    /// `ATmega16HVA`: 16 KiB flash, 256 B EEPROM, 21 interrupt vectors.
    pub const ATMEGA16HVA: DeviceDescription = DeviceDescription {
        id: "atmega16hva",
        flash_page_size: 128,
        flash_page_count: 128,
        eeprom_page_size: 4,
        eeprom_page_count: 64,
        cpu_register_base: 0x0000,
        status_area_base: 0x005d,
        vector_table_len: 21 * 4,
        io_registers: &[
            IoRegister { name: "PINA", address: 0x20, flags: 0 },
            IoRegister { name: "DDRA", address: 0x21, flags: 0 },
            IoRegister { name: "PORTA", address: 0x22, flags: 0 },
            IoRegister { name: "EECR", address: 0x3f, flags: 0 },
            IoRegister { name: "SPL", address: 0x5d, flags: 0 },
            IoRegister { name: "SPH", address: 0x5e, flags: 0 },
            IoRegister { name: "SREG", address: 0x5f, flags: 0 },
            IoRegister { name: "VADCL", address: 0x78, flags: IO_REG_SIDE_EFFECT },
            IoRegister { name: "VADCH", address: 0x79, flags: IO_REG_SIDE_EFFECT },
        ],
    };

    /// All bundled sample devices.
    pub const ALL: &[DeviceDescription] = &[ATTINY45, ATMEGA644P, ATMEGA16HVA];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_bundled_samples() {
        let registry = DeviceRegistry::with_samples();
        let dev = registry.get("atmega644p").unwrap();
        assert_eq!(dev.flash_size(), 65536);
        assert_eq!(dev.eeprom_size(), 2048);
        assert_eq!(dev.vector_table_end(), 124);
    }

    #[test]
    fn unknown_device_is_none() {
        let registry = DeviceRegistry::with_samples();
        assert!(registry.get("does-not-exist").is_none());
    }

    #[test]
    fn side_effect_flag_is_set_on_adc() {
        let adcl = samples::ATTINY45
            .io_registers
            .iter()
            .find(|r| r.name == "ADCL")
            .unwrap();
        assert!(adcl.has_side_effects());
    }
}
