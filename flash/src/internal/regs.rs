// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! CH32V003 flash controller registers.

use volatile_register::{RO, RW, WO};

pub const FLASH_R_BASE: u32 = 0x4002_2000;

pub const KEY1: u32 = 0x4567_0123;
pub const KEY2: u32 = 0xCDEF_89AB;

/// Read protection option half-word.
pub const RDPR_ADDR: u32 = 0x1FFF_F800;
pub const RDPR_ON: u16 = 0x7777;
pub const RDPR_OFF: u16 = 0x5AA5;

/// Register offsets from [`FLASH_R_BASE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Reg {
    Keyr = 0x04,
    Obkeyr = 0x08,
    Statr = 0x0C,
    Ctlr = 0x10,
    Addr = 0x14,
    Obr = 0x1C,
    Wpr = 0x20,
    Modekeyr = 0x24,
}

pub mod ctlr {
    pub const PG: u32 = 1 << 0;
    pub const PER: u32 = 1 << 1;
    pub const OBG: u32 = 1 << 4;
    pub const OBER: u32 = 1 << 5;
    pub const STRT: u32 = 1 << 6;
    pub const LOCK: u32 = 1 << 7;
    pub const OBWRE: u32 = 1 << 9;
    pub const FLOCK: u32 = 1 << 15;
    pub const FTPG: u32 = 1 << 16;
    pub const FTER: u32 = 1 << 17;
    pub const BUFLOAD: u32 = 1 << 18;
    pub const BUFRST: u32 = 1 << 19;
}

pub mod statr {
    pub const BSY: u32 = 1 << 0;
    /// Write 1 to clear.
    pub const EOP: u32 = 1 << 5;
}

pub mod obr {
    pub const RDPRT: u32 = 1 << 1;
}

/// Access to the flash controller and to the memory it programs.
///
/// Implemented by [`Mmio`] on the chip and by a simulated controller in
/// tests.
pub trait FlashRegisters {
    fn read(&self, reg: Reg) -> u32;

    fn write(&mut self, reg: Reg, value: u32);

    fn modify(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    /// Store a word to the flash array, loads the page buffer in fast
    /// programming mode.
    fn write_flash_word(&mut self, addr: u32, word: u32);

    /// Store an option half-word while option programming is enabled.
    fn write_option_half(&mut self, addr: u32, value: u16);

    /// Memory mapped read of the flash array.
    fn read_flash(&self, addr: u32, buf: &mut [u8]);
}

#[repr(C)]
struct RegisterBlock {
    actlr: RW<u32>,
    keyr: WO<u32>,
    obkeyr: WO<u32>,
    statr: RW<u32>,
    ctlr: RW<u32>,
    addr: WO<u32>,
    _reserved: u32,
    obr: RO<u32>,
    wpr: RO<u32>,
    modekeyr: WO<u32>,
}

/// The real controller at [`FLASH_R_BASE`].
pub struct Mmio {
    regs: &'static RegisterBlock,
}

impl Mmio {
    /// # Safety
    ///
    /// Only one `Mmio` may exist, and only on a CH32V003.
    pub unsafe fn steal() -> Self {
        Self {
            regs: &*(FLASH_R_BASE as *const RegisterBlock),
        }
    }

    /// Flash access latency, one wait state is needed above 24 MHz.
    pub fn set_wait_states(&mut self, wait_states: u32) {
        // SAFETY: LATENCY only affects fetch timing.
        unsafe { self.regs.actlr.modify(|v| (v & !0b11) | (wait_states & 0b11)) }
    }
}

impl FlashRegisters for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        match reg {
            Reg::Statr => self.regs.statr.read(),
            Reg::Ctlr => self.regs.ctlr.read(),
            Reg::Obr => self.regs.obr.read(),
            Reg::Wpr => self.regs.wpr.read(),
            // key and address registers are write only
            Reg::Keyr | Reg::Obkeyr | Reg::Addr | Reg::Modekeyr => 0,
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        // SAFETY: we own the controller, see `steal`.
        unsafe {
            match reg {
                Reg::Keyr => self.regs.keyr.write(value),
                Reg::Obkeyr => self.regs.obkeyr.write(value),
                Reg::Statr => self.regs.statr.write(value),
                Reg::Ctlr => self.regs.ctlr.write(value),
                Reg::Addr => self.regs.addr.write(value),
                Reg::Modekeyr => self.regs.modekeyr.write(value),
                Reg::Obr | Reg::Wpr => {}
            }
        }
    }

    fn write_flash_word(&mut self, addr: u32, word: u32) {
        // SAFETY: `addr` lies in code flash, the controller is in a
        // programming mode and latches the store instead of faulting.
        unsafe { core::ptr::write_volatile(addr as *mut u32, word) }
    }

    fn write_option_half(&mut self, addr: u32, value: u16) {
        // SAFETY: as above, option programming is enabled.
        unsafe { core::ptr::write_volatile(addr as *mut u16, value) }
    }

    fn read_flash(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: code flash is always readable by the core.
            *byte = unsafe { core::ptr::read_volatile((addr as usize + i) as *const u8) };
        }
    }
}
