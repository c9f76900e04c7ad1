// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated hardware for host tests.

use crate::internal::regs::{ctlr, obr, statr, FlashRegisters, Reg, KEY1, KEY2, RDPR_ADDR, RDPR_OFF};
use crate::nor::vendor;
use crate::ota::Ticks;
use consts::{FLASH_BASE, FLASH_PAGE, FLASH_SIZE};
use core::cell::Cell;
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType as SpiErrorType, Operation, SpiDevice};
use std::collections::VecDeque;
use std::rc::Rc;

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChipOp {
    Program,
    Erase,
}

/// Behavioural model of a SPI NOR chip.
///
/// Program and erase change the array immediately and then report busy for
/// a number of status polls. Any array read while an operation runs and is
/// not suspended is counted in `reads_while_busy`.
pub struct FakeNor {
    pub id: [u8; 5],
    pub memory: Vec<u8>,
    /// Security registers, the side region of the `0x48/0x42/0x44` set.
    pub security: Vec<u8>,
    pub block_size: usize,
    pub addr_4byte: bool,
    pub write_enabled: bool,
    pub op: Option<ChipOp>,
    pub suspended: bool,
    /// Status polls reported busy after each program.
    pub program_polls: u32,
    /// Status polls reported busy after each erase.
    pub erase_polls: u32,
    busy_polls: u32,
    pub reads_while_busy: u32,
    /// Commands needing write enable that arrived without it.
    pub ignored: u32,
    /// Bytes sent in each transaction.
    pub log: Vec<Vec<u8>>,
}

const SECURITY_CMDS: [u8; 3] = [0x48, 0x42, 0x44];
const SECURITY_REG: usize = 256;

impl FakeNor {
    pub fn new(id: [u8; 5], size: usize) -> Self {
        Self {
            id,
            memory: vec![0xFF; size],
            security: vec![0xFF; 4 * 0x1000],
            block_size: 32 * 1024,
            addr_4byte: false,
            write_enabled: false,
            op: None,
            suspended: false,
            program_polls: 0,
            erase_polls: 0,
            busy_polls: 0,
            reads_while_busy: 0,
            ignored: 0,
            log: Vec::new(),
        }
    }

    /// Winbond W25Q64, 8 MiB.
    pub fn winbond() -> Self {
        Self::new([vendor::WINBOND, 0x40, 0x17, 0, 0], 8 * 1024 * 1024)
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.log.iter().filter_map(|t| t.first().copied()).collect()
    }

    fn addr_len(&self) -> usize {
        if self.addr_4byte {
            4
        } else {
            3
        }
    }

    fn addr(bytes: &[u8]) -> usize {
        bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
    }

    fn busy_poll(&mut self) -> bool {
        if self.op.is_none() || self.suspended {
            return false;
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            true
        } else {
            self.op = None;
            false
        }
    }

    /// Bytes driven on MISO for a read that follows `mosi`.
    fn respond(&mut self, mosi: &[u8], len: usize) -> Vec<u8> {
        let Some(&opcode) = mosi.first() else {
            return vec![0xFF; len];
        };
        match opcode {
            0x9F => {
                let start = mosi.len() - 1;
                (start..start + len).map(|i| self.id.get(i).copied().unwrap_or(0)).collect()
            }
            0x05 => vec![if self.busy_poll() { 0x03 } else { 0x00 }; len],
            0x70 => vec![if self.busy_poll() { 0x00 } else { 0x80 }; len],
            0x35 => vec![0x02; len],
            0x15 => vec![0x60; len],
            0x03 => {
                let n = self.addr_len();
                if self.op.is_some() && !self.suspended {
                    self.reads_while_busy += 1;
                }
                let start = Self::addr(&mosi[1..1 + n]) + (mosi.len() - 1 - n);
                (start..start + len).map(|a| self.memory[a % self.memory.len()]).collect()
            }
            op if op == SECURITY_CMDS[0] => {
                // 3 address bytes and one dummy byte
                let start = Self::addr(&mosi[1..4]) + (mosi.len() - 5);
                (start..start + len).map(|a| self.security[a % self.security.len()]).collect()
            }
            _ => vec![0xFF; len],
        }
    }

    fn program(&mut self, addr: usize, data: &[u8], wrap: usize, security: bool) {
        let page = addr & !(wrap - 1);
        for (i, &b) in data.iter().enumerate() {
            let a = page | ((addr + i) & (wrap - 1));
            if security {
                let len = self.security.len();
                self.security[a % len] &= b;
            } else {
                let len = self.memory.len();
                self.memory[a % len] &= b;
            }
        }
        self.op = Some(ChipOp::Program);
        self.busy_polls = self.program_polls;
    }

    fn start(&mut self) -> bool {
        if !self.write_enabled || self.op.is_some() {
            self.ignored += 1;
            return false;
        }
        self.write_enabled = false;
        true
    }

    /// Commands take effect when chip select is released.
    fn execute(&mut self, mosi: &[u8]) {
        let Some(&opcode) = mosi.first() else {
            return;
        };
        let n = self.addr_len();
        match opcode {
            0x06 => self.write_enabled = true,
            0x02 if self.start() => {
                let addr = Self::addr(&mosi[1..1 + n]);
                self.program(addr, &mosi[1 + n..], 256, false);
            }
            0x52 if self.start() => {
                let addr = Self::addr(&mosi[1..1 + n]);
                let block = (addr & !(self.block_size - 1)) % self.memory.len();
                self.memory[block..block + self.block_size].fill(0xFF);
                self.op = Some(ChipOp::Erase);
                self.busy_polls = self.erase_polls;
            }
            op if op == SECURITY_CMDS[1] && self.start() => {
                let addr = Self::addr(&mosi[1..4]);
                self.program(addr, &mosi[4..], SECURITY_REG, true);
            }
            op if op == SECURITY_CMDS[2] && self.start() => {
                let addr = Self::addr(&mosi[1..4]) & !(SECURITY_REG - 1);
                let len = self.security.len();
                self.security[addr % len..addr % len + SECURITY_REG].fill(0xFF);
                self.op = Some(ChipOp::Erase);
                self.busy_polls = self.erase_polls;
            }
            0x75 => {
                self.write_enabled = false;
                self.suspended = self.op.is_some();
            }
            0x85 => {
                self.write_enabled = false;
                self.suspended = self.op == Some(ChipOp::Program);
            }
            0x7A | 0x8A => {
                self.write_enabled = false;
                self.suspended = false;
            }
            0xB7 => {
                self.write_enabled = false;
                self.addr_4byte = true;
            }
            0x17 if mosi.get(1) == Some(&0x80) => self.addr_4byte = true,
            _ => {}
        }
    }
}

impl SpiErrorType for FakeNor {
    type Error = Infallible;
}

impl SpiDevice for FakeNor {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut mosi = Vec::new();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => mosi.extend_from_slice(bytes),
                Operation::Read(buf) => {
                    let out = self.respond(&mosi, buf.len());
                    buf.copy_from_slice(&out);
                    mosi.resize(mosi.len() + buf.len(), 0);
                }
                Operation::Transfer(..) | Operation::TransferInPlace(..) => {
                    unimplemented!("full duplex transfers")
                }
                Operation::DelayNs(_) => {}
            }
        }
        self.execute(&mosi);
        self.log.push(mosi);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashEvent {
    PageErased(u32),
    PageProgrammed(u32),
    OptionsErased,
    OptionProgrammed(u32, u16),
}

/// Model of the CH32V003 flash controller and its 16 KiB array.
///
/// Violations of the documented sequences (commands while locked, buffer
/// loads outside fast program mode, ...) are collected as strings.
pub struct FakeController {
    pub memory: Vec<u8>,
    pub rdpr: u16,
    pub events: Vec<FlashEvent>,
    pub violations: Vec<&'static str>,
    locked: bool,
    fast_locked: bool,
    options_unlocked: bool,
    key_stage: u8,
    mode_key_stage: u8,
    ob_key_stage: u8,
    ctlr: u32,
    addr: u32,
    eop: bool,
    /// STATR reads left reporting BSY after a command.
    busy_reads: Cell<u32>,
    buffer: [u32; 16],
}

impl FakeController {
    pub fn new() -> Self {
        Self {
            memory: vec![0xFF; FLASH_SIZE as usize],
            rdpr: RDPR_OFF,
            events: Vec::new(),
            violations: Vec::new(),
            locked: true,
            fast_locked: true,
            options_unlocked: false,
            key_stage: 0,
            mode_key_stage: 0,
            ob_key_stage: 0,
            ctlr: 0,
            addr: 0,
            eop: false,
            busy_reads: Cell::new(0),
            buffer: [0xFFFF_FFFF; 16],
        }
    }

    /// Controller over an array pre-filled with `fill`.
    pub fn filled(fill: u8) -> Self {
        let mut c = Self::new();
        c.memory.fill(fill);
        c
    }

    pub fn is_locked(&self) -> bool {
        self.locked && self.fast_locked && !self.options_unlocked
    }

    pub fn erases(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FlashEvent::PageErased(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    fn index(addr: u32) -> Option<usize> {
        let offset = addr.checked_sub(FLASH_BASE)? as usize;
        (offset < FLASH_SIZE as usize).then_some(offset)
    }

    fn finish(&mut self) {
        self.busy_reads.set(2);
        self.eop = true;
    }

    fn key(stage: &mut u8, value: u32) -> bool {
        match (*stage, value) {
            (0, KEY1) => {
                *stage = 1;
                false
            }
            (1, KEY2) => {
                *stage = 0;
                true
            }
            _ => {
                *stage = 0;
                false
            }
        }
    }

    fn write_ctlr(&mut self, value: u32) {
        if self.locked {
            if value & ctlr::LOCK == 0 {
                self.violations.push("CTLR written while locked");
            }
            return;
        }
        let fast_mode = value & (ctlr::FTER | ctlr::FTPG) != 0;
        if fast_mode && self.fast_locked {
            self.violations.push("fast mode while fast programming is locked");
        }
        if value & (ctlr::OBG | ctlr::OBER) != 0 && !self.options_unlocked {
            self.violations.push("option mode without option keys");
        }

        if value & ctlr::BUFRST != 0 && value & ctlr::FTPG != 0 {
            self.buffer = [0xFFFF_FFFF; 16];
            self.finish();
        }
        if value & ctlr::BUFLOAD != 0 {
            if value & ctlr::FTPG == 0 {
                self.violations.push("buffer load outside fast program mode");
            }
            self.finish();
        }
        if value & ctlr::STRT != 0 {
            let page = self.addr & !(FLASH_PAGE - 1);
            if value & ctlr::FTER != 0 {
                match Self::index(page) {
                    Some(i) => self.memory[i..i + FLASH_PAGE as usize].fill(0xFF),
                    None => self.violations.push("erase outside code flash"),
                }
                self.events.push(FlashEvent::PageErased(page));
            } else if value & ctlr::FTPG != 0 {
                match Self::index(page) {
                    Some(i) => {
                        for (k, word) in self.buffer.iter().enumerate() {
                            for (j, b) in word.to_le_bytes().iter().enumerate() {
                                self.memory[i + 4 * k + j] &= b;
                            }
                        }
                    }
                    None => self.violations.push("program outside code flash"),
                }
                self.events.push(FlashEvent::PageProgrammed(page));
            } else if value & ctlr::OBER != 0 && self.options_unlocked {
                self.rdpr = 0xFFFF;
                self.events.push(FlashEvent::OptionsErased);
            }
            self.finish();
        }

        if value & ctlr::FLOCK != 0 {
            self.fast_locked = true;
        }
        if value & ctlr::LOCK != 0 {
            self.locked = true;
            self.options_unlocked = false;
        }

        self.ctlr = value & !(ctlr::STRT | ctlr::BUFLOAD | ctlr::BUFRST | ctlr::LOCK | ctlr::FLOCK | ctlr::OBWRE);
    }
}

impl FlashRegisters for FakeController {
    fn read(&self, reg: Reg) -> u32 {
        match reg {
            Reg::Ctlr => {
                let mut v = self.ctlr;
                if self.locked {
                    v |= ctlr::LOCK;
                }
                if self.fast_locked {
                    v |= ctlr::FLOCK;
                }
                if self.options_unlocked {
                    v |= ctlr::OBWRE;
                }
                v
            }
            Reg::Statr => {
                let mut v = 0;
                let busy = self.busy_reads.get();
                if busy > 0 {
                    self.busy_reads.set(busy - 1);
                    v |= statr::BSY;
                }
                if self.eop {
                    v |= statr::EOP;
                }
                v
            }
            Reg::Obr => {
                if self.rdpr == RDPR_OFF {
                    0
                } else {
                    obr::RDPRT
                }
            }
            _ => 0,
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        match reg {
            Reg::Keyr => {
                if Self::key(&mut self.key_stage, value) {
                    self.locked = false;
                }
            }
            Reg::Modekeyr => {
                if Self::key(&mut self.mode_key_stage, value) {
                    if self.locked {
                        self.violations.push("fast keys before primary keys");
                    } else {
                        self.fast_locked = false;
                    }
                }
            }
            Reg::Obkeyr => {
                if Self::key(&mut self.ob_key_stage, value) {
                    if self.locked {
                        self.violations.push("option keys before primary keys");
                    } else {
                        self.options_unlocked = true;
                    }
                }
            }
            Reg::Statr => {
                if value & statr::EOP != 0 {
                    self.eop = false;
                }
            }
            Reg::Ctlr => self.write_ctlr(value),
            Reg::Addr => self.addr = value,
            Reg::Obr | Reg::Wpr => self.violations.push("write to read only register"),
        }
    }

    fn write_flash_word(&mut self, addr: u32, word: u32) {
        if self.locked || self.fast_locked || self.ctlr & ctlr::FTPG == 0 {
            self.violations.push("flash store outside fast program mode");
            return;
        }
        self.buffer[(addr % FLASH_PAGE) as usize / 4] = word;
    }

    fn write_option_half(&mut self, addr: u32, value: u16) {
        if !self.options_unlocked || self.ctlr & ctlr::OBG == 0 {
            self.violations.push("option store outside option programming");
            return;
        }
        if addr == RDPR_ADDR {
            self.rdpr &= value;
        }
        self.events.push(FlashEvent::OptionProgrammed(addr, value));
    }

    fn read_flash(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = Self::index(addr + i as u32).map_or(0xFF, |k| self.memory[k]);
        }
    }
}

/// UART with a scripted receive side.
///
/// Each byte in `rx` becomes readable once the tick counter reaches its
/// tick stamp, so tests can model gaps in the stream.
pub struct ScriptedUart {
    pub rx: VecDeque<(u32, u8)>,
    pub tx: Vec<u8>,
    clock: Rc<Cell<u32>>,
}

impl ScriptedUart {
    pub fn new(clock: &FakeTicks) -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            clock: clock.now.clone(),
        }
    }

    /// Queue `bytes`, available from tick `at` on.
    pub fn push(&mut self, at: u32, bytes: &[u8]) {
        self.rx.extend(bytes.iter().map(|&b| (at, b)));
    }

    fn available(&self) -> bool {
        self.rx.front().is_some_and(|&(at, _)| self.clock.get().wrapping_sub(at) < u32::MAX / 2)
    }
}

impl embedded_io::ErrorType for ScriptedUart {
    type Error = Infallible;
}

impl embedded_io::ReadReady for ScriptedUart {
    fn read_ready(&mut self) -> Result<bool, Infallible> {
        Ok(self.available())
    }
}

impl embedded_io::Read for ScriptedUart {
    /// Returns 0 (end of stream) once the script is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.pop_front() {
            Some((_, b)) => {
                buf[0] = b;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl embedded_io::Write for ScriptedUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Tick counter advancing by `step` on every read, shared with the UART.
pub struct FakeTicks {
    now: Rc<Cell<u32>>,
    step: u32,
}

impl FakeTicks {
    pub fn starting_at(start: u32, step: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            step,
        }
    }

    pub fn get(&self) -> u32 {
        self.now.get()
    }
}

impl Ticks for FakeTicks {
    fn now(&mut self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}
