// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Unlocked states of the controller.
//!
//! Each guard writes its key pairs when created and sets the lock bits again
//! when dropped, so programming commands only exist while the right keys are
//! in.

use super::regs::{ctlr, statr, FlashRegisters, Reg, KEY1, KEY2};
use super::InternalFlash;
use consts::{FLASH_PAGE, FLASH_PAGE_WORDS};

fn wait_busy<R: FlashRegisters>(regs: &R) {
    while regs.read(Reg::Statr) & statr::BSY != 0 {}
}

/// Wait until the controller is idle or flags end of operation, then
/// acknowledge the flag.
fn wait_eop<R: FlashRegisters>(regs: &mut R) {
    loop {
        let status = regs.read(Reg::Statr);
        if status & statr::BSY == 0 || status & statr::EOP != 0 {
            break;
        }
    }
    regs.modify(Reg::Statr, |v| v | statr::EOP);
}

fn set<R: FlashRegisters>(regs: &mut R, bits: u32) {
    regs.modify(Reg::Ctlr, |v| v | bits);
}

fn clear<R: FlashRegisters>(regs: &mut R, bits: u32) {
    regs.modify(Reg::Ctlr, |v| v & !bits);
}

fn page_of(addr: u32) -> u32 {
    addr & !(FLASH_PAGE - 1)
}

/// Primary and fast-mode keys written: page erase and buffered program.
pub struct Unlocked<'a, R: FlashRegisters> {
    flash: &'a mut InternalFlash<R>,
}

impl<'a, R: FlashRegisters> Unlocked<'a, R> {
    pub(super) fn new(flash: &'a mut InternalFlash<R>) -> Self {
        let regs = &mut flash.regs;
        regs.write(Reg::Keyr, KEY1);
        regs.write(Reg::Keyr, KEY2);
        wait_busy(regs);
        regs.write(Reg::Modekeyr, KEY1);
        regs.write(Reg::Modekeyr, KEY2);
        wait_busy(regs);
        Self { flash }
    }

    /// Fast erase of the 64-byte page containing `addr`.
    pub fn erase_page(&mut self, addr: u32) {
        let regs = &mut self.flash.regs;
        wait_busy(regs);
        set(regs, ctlr::FTER);
        regs.write(Reg::Addr, page_of(addr));
        set(regs, ctlr::STRT);
        wait_eop(regs);
        clear(regs, ctlr::FTER);
    }

    /// Load the page buffer with `words` and program the page containing
    /// `addr`. The page must be erased.
    pub fn program_page(&mut self, addr: u32, words: &[u32; FLASH_PAGE_WORDS]) {
        let page = page_of(addr);
        let regs = &mut self.flash.regs;
        wait_busy(regs);
        set(regs, ctlr::FTPG);
        set(regs, ctlr::BUFRST);
        wait_eop(regs);

        for (i, &word) in words.iter().enumerate() {
            regs.write_flash_word(page + 4 * i as u32, word);
            set(regs, ctlr::BUFLOAD);
            wait_eop(regs);
        }

        regs.write(Reg::Addr, page);
        set(regs, ctlr::STRT);
        wait_eop(regs);
        clear(regs, ctlr::FTPG);
    }
}

impl<R: FlashRegisters> Drop for Unlocked<'_, R> {
    fn drop(&mut self) {
        let regs = &mut self.flash.regs;
        set(regs, ctlr::FLOCK);
        wait_busy(regs);
        set(regs, ctlr::LOCK);
        wait_busy(regs);
    }
}

/// Primary and option-byte keys written: option byte erase and program.
pub struct OptionUnlocked<'a, R: FlashRegisters> {
    flash: &'a mut InternalFlash<R>,
}

impl<'a, R: FlashRegisters> OptionUnlocked<'a, R> {
    pub(super) fn new(flash: &'a mut InternalFlash<R>) -> Self {
        let regs = &mut flash.regs;
        regs.write(Reg::Keyr, KEY1);
        regs.write(Reg::Keyr, KEY2);
        wait_busy(regs);
        if regs.read(Reg::Ctlr) & ctlr::OBWRE == 0 {
            regs.write(Reg::Obkeyr, KEY1);
            regs.write(Reg::Obkeyr, KEY2);
        }
        wait_busy(regs);
        Self { flash }
    }

    /// Erase the whole option byte area.
    pub fn erase(&mut self) {
        let regs = &mut self.flash.regs;
        wait_busy(regs);
        set(regs, ctlr::OBER);
        set(regs, ctlr::STRT);
        wait_busy(regs);
        wait_eop(regs);
        clear(regs, ctlr::OBER);
    }

    /// Program one option half-word. Bits only go from 1 to 0 without an
    /// [`Self::erase`] first.
    pub fn program(&mut self, addr: u32, value: u16) {
        let regs = &mut self.flash.regs;
        wait_busy(regs);
        set(regs, ctlr::OBG);
        set(regs, ctlr::STRT);
        wait_busy(regs);
        wait_eop(regs);
        regs.write_option_half(addr, value);
        wait_busy(regs);
        clear(regs, ctlr::OBG);
    }
}

impl<R: FlashRegisters> Drop for OptionUnlocked<'_, R> {
    fn drop(&mut self) {
        let regs = &mut self.flash.regs;
        // LOCK also drops the option byte write enable.
        set(regs, ctlr::LOCK);
        wait_busy(regs);
    }
}
