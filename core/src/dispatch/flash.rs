//! Staged flash write buffer (spec §3 "Staged flash buffer", `v` verbs).

use log::debug;

use crate::error::Error;
use crate::probe::{ProbeAdapter, ProbeTransport};

/// Accumulates `vFlashWrite` fragments between `vFlashErase` and
/// `vFlashDone`.
pub struct FlashBuffer {
    data: Vec<u8>,
    page_size: u32,
    high_water: u32,
}

impl FlashBuffer {
    /// Allocates a buffer sized to the device's flash, filled with `0xFF`
    /// (erased-flash value), and issues the real chip erase.
    pub fn erase<T: ProbeTransport>(
        page_size: u32,
        page_count: u32,
        probe: &mut ProbeAdapter<T>,
    ) -> Result<Self, Error> {
        probe.enable_programming()?;
        probe.erase_program_memory()?;
        Ok(Self {
            data: vec![0xff; (page_size * page_count) as usize],
            page_size,
            high_water: 0,
        })
    }

    /// Accumulates one write fragment at `offset`.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::Protocol("vFlashWrite fragment out of range".into()))?;
        self.data[start..end].copy_from_slice(bytes);
        self.high_water = self.high_water.max(end as u32);
        Ok(())
    }

    /// Commits all pages covering `[0, high_water)`, rounded up to a page
    /// boundary, leaves programming mode, and releases the buffer.
    pub fn commit<T: ProbeTransport>(self, probe: &mut ProbeAdapter<T>) -> Result<(), Error> {
        let page_size = self.page_size as usize;
        let covered_pages = self.high_water.div_ceil(self.page_size) as usize;
        debug!("committing {covered_pages} flash page(s)");
        for page in 0..covered_pages {
            let start = page * page_size;
            let end = (start + page_size).min(self.data.len());
            probe.write_memory(start as u32, &self.data[start..end])?;
        }
        probe.disable_programming()
    }
}
