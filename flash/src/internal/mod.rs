// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! CH32V003 internal flash programmer.
//!
//! All erase and program work happens on 64-byte pages in fast mode. The
//! primitives have no failure path: every wait is an unbounded poll of the
//! controller status and success is only visible by reading back.

mod lock;
pub mod regs;


pub use lock::{OptionUnlocked, Unlocked};
pub use regs::{FlashRegisters, Mmio};

use consts::{FLASH_BASE, FLASH_PAGE, FLASH_PAGE_WORDS, FLASH_SIZE, OTA_END_ADDR, OTA_START_ADDR};
use embedded_storage::{ReadStorage, Storage};
use regs::{obr, Reg, RDPR_ADDR, RDPR_OFF, RDPR_ON};

const PAGE: usize = FLASH_PAGE as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Write or read reaching outside the allowed region
    OutOfBounds { addr: u32, len: usize },
}

/// Page aligned range of absolute addresses, `start..end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InternalFlashRegion {
    start: u32,
    end: u32,
}

impl InternalFlashRegion {
    /// Whole internal flash.
    pub const ALL: Self = Self {
        start: FLASH_BASE,
        end: FLASH_BASE + FLASH_SIZE,
    };

    /// Pages an update may rewrite. The vector table, the bootloader and
    /// the update session itself live below it.
    pub const UPDATABLE: Self = Self {
        start: FLASH_BASE + OTA_START_ADDR as u32,
        end: FLASH_BASE + OTA_END_ADDR as u32,
    };

    /// `None` unless both ends are page aligned and ordered.
    pub const fn new(start: u32, end: u32) -> Option<Self> {
        if start % FLASH_PAGE != 0 || end % FLASH_PAGE != 0 || start > end {
            return None;
        }
        Some(Self { start, end })
    }

    pub const fn start(&self) -> u32 {
        self.start
    }

    pub const fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let end = addr as u64 + len as u64;
        addr >= self.start && end <= self.end as u64
    }
}

/// Locked controller. Programming goes through [`Self::unlock`] and
/// [`Self::unlock_options`].
pub struct InternalFlash<R> {
    regs: R,
    writable: InternalFlashRegion,
}

impl<R: FlashRegisters> InternalFlash<R> {
    /// `writable` bounds the general [`Self::write`]; the page primitives
    /// take any address.
    pub fn new(regs: R, writable: InternalFlashRegion) -> Self {
        Self { regs, writable }
    }

    pub fn writable(&self) -> InternalFlashRegion {
        self.writable
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn release(self) -> R {
        self.regs
    }

    /// Write the primary and fast-mode keys. Locked again when the guard
    /// drops.
    pub fn unlock(&mut self) -> Unlocked<'_, R> {
        Unlocked::new(self)
    }

    /// Write the primary and option-byte keys. Locked again when the guard
    /// drops.
    pub fn unlock_options(&mut self) -> OptionUnlocked<'_, R> {
        OptionUnlocked::new(self)
    }

    pub fn page_erase(&mut self, addr: u32) {
        trace!("erase page {:#x}", addr);
        self.unlock().erase_page(addr);
    }

    pub fn buffered_write(&mut self, addr: u32, words: &[u32; FLASH_PAGE_WORDS]) {
        trace!("program page {:#x}", addr);
        self.unlock().program_page(addr, words);
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) {
        self.regs.read_flash(addr, buf);
    }

    /// Write `data` at any address inside the writable region.
    ///
    /// Every page touched is erased exactly once; bytes of partially
    /// covered pages outside `addr..addr + data.len()` keep their value.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        if !self.writable.contains(addr, data.len()) {
            return Err(Error::OutOfBounds { addr, len: data.len() });
        }

        let mut addr = addr;
        let mut data = data;

        let offset = addr as usize % PAGE;
        if offset != 0 && !data.is_empty() {
            let len = data.len().min(PAGE - offset);
            let page = addr - offset as u32;
            self.splice(page, offset, &data[..len]);
            addr += len as u32;
            data = &data[len..];
        }

        let mut pages = data.chunks_exact(PAGE);
        for block in pages.by_ref() {
            self.page_erase(addr);
            self.buffered_write(addr, &words(block));
            addr += FLASH_PAGE;
        }

        let tail = pages.remainder();
        if !tail.is_empty() {
            self.splice(addr, 0, tail);
        }

        Ok(())
    }

    /// Read back the page at `page`, patch `data` in at `offset`, rewrite.
    fn splice(&mut self, page: u32, offset: usize, data: &[u8]) {
        let mut block = [0u8; PAGE];
        self.regs.read_flash(page, &mut block);
        block[offset..offset + data.len()].copy_from_slice(data);
        self.page_erase(page);
        self.buffered_write(page, &words(&block));
    }

    pub fn is_read_protected(&self) -> bool {
        self.regs.read(Reg::Obr) & obr::RDPRT != 0
    }

    /// Block external debug and read access to the array.
    pub fn read_protect(&mut self) {
        if self.is_read_protected() {
            return;
        }
        info!("enabling read protection");
        self.unlock_options().program(RDPR_ADDR, RDPR_ON);
    }

    /// Lift read protection. The option bytes have to be erased first, the
    /// protection word cannot be programmed back otherwise.
    pub fn read_unprotect(&mut self) {
        if !self.is_read_protected() {
            return;
        }
        info!("disabling read protection");
        let mut options = self.unlock_options();
        options.erase();
        options.program(RDPR_ADDR, RDPR_OFF);
    }
}

fn words(block: &[u8]) -> [u32; FLASH_PAGE_WORDS] {
    let mut words = [0u32; FLASH_PAGE_WORDS];
    for (word, bytes) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

/// Offsets are relative to [`FLASH_BASE`]; writes are limited to the
/// writable region.
impl<R: FlashRegisters> ReadStorage for InternalFlash<R> {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if !InternalFlashRegion::ALL.contains(FLASH_BASE.wrapping_add(offset), bytes.len()) {
            return Err(Error::OutOfBounds {
                addr: FLASH_BASE.wrapping_add(offset),
                len: bytes.len(),
            });
        }
        InternalFlash::read(self, FLASH_BASE + offset, bytes);
        Ok(())
    }

    fn capacity(&self) -> usize {
        FLASH_SIZE as usize
    }
}

impl<R: FlashRegisters> Storage for InternalFlash<R> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        InternalFlash::write(self, FLASH_BASE.wrapping_add(offset), bytes)
    }
}
