// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! External SPI NOR flash driver.
//!
//! One [`SpiNor`] value owns the bus device (chip select included in the
//! `SpiDevice`) and the busy state of the chip. Program and erase commands
//! return as soon as they are issued; the next call waits for them, or
//! suspends them when a read comes in and the part supports it.

mod ext;
mod storage;


pub use ext::ExternalCommandSet;

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation as SpiOp, SpiDevice};

/// Standard opcodes.
pub mod opcode {
    pub const READ_ID: u8 = 0x9F;
    pub const WRITE_ENABLE: u8 = 0x06;
    pub const PAGE_PROGRAM: u8 = 0x02;
    pub const BLOCK_ERASE: u8 = 0x52;
    pub const READ: u8 = 0x03;
    pub const READ_STATUS_1: u8 = 0x05;
    pub const READ_STATUS_2: u8 = 0x35;
    pub const READ_STATUS_3: u8 = 0x15;
    pub const READ_FLAG_STATUS: u8 = 0x70;
    pub const ENTER_4BYTE_MODE: u8 = 0xB7;
    pub const BANK_REGISTER_WRITE: u8 = 0x17;
    pub const SUSPEND: u8 = 0x75;
    pub const RESUME: u8 = 0x7A;
    pub const PROGRAM_SUSPEND_ALT: u8 = 0x85;
    pub const PROGRAM_RESUME_ALT: u8 = 0x8A;
}

/// JEDEC manufacturer IDs with special handling.
pub mod vendor {
    pub const WINBOND: u8 = 0xEF;
    pub const SPANSION: u8 = 0x01;
    pub const MICRON: u8 = 0x20;
    pub const ADESTO: u8 = 0x1F;
}

/// Page program size and alignment.
pub const PAGE_SIZE: usize = 256;

/// Size of the block erased by [`opcode::BLOCK_ERASE`].
pub const BLOCK_SIZE: u32 = 32 * 1024;

/// Block size of Spansion parts reporting `id[4] == 0`.
pub const LARGE_BLOCK_SIZE: u32 = 256 * 1024;

/// Multi-die parts must not be read across this boundary in one command.
pub const DIE_SIZE: u32 = 32 * 1024 * 1024;

const STATUS_WIP: u8 = 0x01;
const FLAG_STATUS_READY: u8 = 0x80;
const SPANSION_EXTADD: u8 = 0x80;
const FALLBACK_CAPACITY: u32 = 1024 * 1024;

bitflags! {
    /// Per-part quirks derived from the JEDEC ID.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// Larger than 16 MiB, commands carry 4 address bytes.
        const ADDR_32BIT = 0x01;
        /// Busy state comes from the flag status register (0x70).
        const FLAG_STATUS = 0x02;
        /// Program suspend/resume use their own opcodes.
        const ALT_SUSPEND = 0x04;
        /// Several dies, reads must not cross a 32 MiB boundary.
        const MULTI_DIE = 0x08;
        /// Erase blocks are 256 KiB.
        const BLOCKS_256K = 0x10;
    }
}

/// Kind of command the chip may still be executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    Program,
    Erase,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusyState {
    #[default]
    Idle,
    Programming,
    Erasing,
    /// Operation parked by a read; resumed before anything else is issued.
    Suspended(Operation),
}

impl BusyState {
    fn running(op: Operation) -> Self {
        match op {
            Operation::Program => BusyState::Programming,
            Operation::Erase => BusyState::Erasing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// SPI bus error
    Spi(E),
    /// ID read back as all zeros or all ones
    NotDetected,
    /// Access past the end of the chip
    OutOfBounds,
    /// Erase range not aligned to the erase block
    NotAligned,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Spi(e)
    }
}

/// Capacity in bytes encoded by a JEDEC ID.
///
/// Returns 0 for a blank (all-zero or all-one) ID and 1 MiB for IDs that
/// do not encode a size.
pub fn capacity(id: &[u8; 5]) -> u32 {
    if id[0] == vendor::ADESTO && id[1] == 0x89 {
        return 16 * 1024 * 1024;
    }
    match id[2] {
        n @ 16..=31 => 1u32 << n,
        n @ 32..=37 => 1u32 << (n - 6),
        _ if id_is_blank(id) => 0,
        _ => FALLBACK_CAPACITY,
    }
}

fn id_is_blank(id: &[u8; 5]) -> bool {
    id[..3] == [0x00; 3] || id[..3] == [0xFF; 3]
}

/// Capability flags for a detected part.
pub fn capabilities(id: &[u8; 5]) -> Capabilities {
    let mut caps = Capabilities::empty();

    if capacity(id) > 16 * 1024 * 1024 {
        caps |= Capabilities::ADDR_32BIT;
        if id[0] == vendor::MICRON {
            caps |= Capabilities::MULTI_DIE;
        }
    }
    if id[0] == vendor::SPANSION {
        caps |= Capabilities::ALT_SUSPEND;
        if id[4] == 0 {
            caps |= Capabilities::BLOCKS_256K;
        }
    }
    if id[0] == vendor::MICRON {
        caps |= Capabilities::FLAG_STATUS;
    }

    caps
}

pub struct SpiNor<SPI, D> {
    spi: SPI,
    delay: D,
    id: [u8; 5],
    caps: Capabilities,
    capacity: u32,
    busy: BusyState,
    ext_cmds: ExternalCommandSet,
}

impl<SPI, D> SpiNor<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    /// Probe the chip behind `spi`, switch it to 4-byte addressing if it
    /// needs it and load the extended command set from [`consts::EXT_CMDS_ADDR`].
    /// An unprovisioned chip yields all-0xFF opcodes.
    pub fn init(spi: SPI, delay: D) -> Result<Self, Error<SPI::Error>> {
        let mut flash = Self {
            spi,
            delay,
            id: [0; 5],
            caps: Capabilities::empty(),
            capacity: 0,
            busy: BusyState::Idle,
            ext_cmds: ExternalCommandSet::default(),
        };

        let id = flash.read_id()?;
        if id_is_blank(&id) {
            warn!("no flash chip, id {:?}", id);
            return Err(Error::NotDetected);
        }

        let caps = capabilities(&id);
        if caps.contains(Capabilities::ADDR_32BIT) {
            if id[0] == vendor::SPANSION {
                flash.spi.write(&[opcode::BANK_REGISTER_WRITE, SPANSION_EXTADD])?;
            } else {
                flash.spi.write(&[opcode::WRITE_ENABLE])?;
                flash.delay.delay_ms(1);
                flash.spi.write(&[opcode::ENTER_4BYTE_MODE])?;
            }
        }

        flash.id = id;
        flash.caps = caps;
        flash.capacity = capacity(&id);
        flash.load_ext_cmds()?;
        info!(
            "flash id {:?}, {} bytes, caps {:#x}",
            id,
            flash.capacity,
            caps.bits()
        );

        Ok(flash)
    }

    /// Give the bus and delay back.
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    pub fn id(&self) -> [u8; 5] {
        self.id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn busy_state(&self) -> BusyState {
        self.busy
    }

    /// Size of the block erased by [`Self::erase_block`].
    pub fn block_size(&self) -> u32 {
        if self.caps.contains(Capabilities::BLOCKS_256K) {
            LARGE_BLOCK_SIZE
        } else {
            BLOCK_SIZE
        }
    }

    /// JEDEC ID. Bytes 3 and 4 (ID-CFI and sector size) are only
    /// meaningful on Spansion parts and are zeroed for everything else.
    pub fn read_id(&mut self) -> Result<[u8; 5], Error<SPI::Error>> {
        self.settle()?;

        // Clocking out two extra ID bytes is harmless on every JEDEC part.
        let mut id = [0u8; 5];
        self.spi.transaction(&mut [SpiOp::Write(&[opcode::READ_ID]), SpiOp::Read(&mut id)])?;
        if id[0] != vendor::SPANSION {
            id[3] = 0;
            id[4] = 0;
        }

        Ok(id)
    }

    /// Status registers 1 to 3, for diagnostics.
    pub fn read_status_registers(&mut self) -> Result<[u8; 3], Error<SPI::Error>> {
        let mut status = [0u8; 3];
        for (reg, value) in [opcode::READ_STATUS_1, opcode::READ_STATUS_2, opcode::READ_STATUS_3]
            .into_iter()
            .zip(status.iter_mut())
        {
            *value = self.read_register(reg)?;
        }
        debug!("status registers {:?}", status);
        Ok(status)
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, Error<SPI::Error>> {
        let mut value = [0u8];
        self.spi.transaction(&mut [SpiOp::Write(&[reg]), SpiOp::Read(&mut value)])?;
        Ok(value[0])
    }

    fn chip_busy(&mut self) -> Result<bool, Error<SPI::Error>> {
        if self.caps.contains(Capabilities::FLAG_STATUS) {
            let status = self.read_register(opcode::READ_FLAG_STATUS)?;
            Ok(status & FLAG_STATUS_READY == 0)
        } else {
            let status = self.read_register(opcode::READ_STATUS_1)?;
            Ok(status & STATUS_WIP != 0)
        }
    }

    /// Poll until the chip reports ready. No timeout.
    fn poll_ready(&mut self) -> Result<(), Error<SPI::Error>> {
        while self.chip_busy()? {}
        Ok(())
    }

    fn wait(&mut self) -> Result<(), Error<SPI::Error>> {
        self.poll_ready()?;
        self.busy = BusyState::Idle;
        Ok(())
    }

    /// Bring the chip back to idle before a new command: resume a parked
    /// operation and wait for whatever is running.
    fn settle(&mut self) -> Result<(), Error<SPI::Error>> {
        match self.busy {
            BusyState::Idle => Ok(()),
            BusyState::Suspended(op) => {
                self.resume(op)?;
                self.wait()
            }
            BusyState::Programming | BusyState::Erasing => self.wait(),
        }
    }

    fn write_enable(&mut self) -> Result<(), Error<SPI::Error>> {
        self.spi.write(&[opcode::WRITE_ENABLE])?;
        self.delay.delay_us(1);
        Ok(())
    }

    /// Suspend/resume opcodes for `op`, if the part can suspend it.
    fn suspend_opcodes(&self, op: Operation) -> Option<(u8, u8)> {
        match op {
            Operation::Erase => Some((opcode::SUSPEND, opcode::RESUME)),
            Operation::Program if self.caps.contains(Capabilities::ALT_SUSPEND) => {
                Some((opcode::PROGRAM_SUSPEND_ALT, opcode::PROGRAM_RESUME_ALT))
            }
            Operation::Program => None,
        }
    }

    fn resume(&mut self, op: Operation) -> Result<(), Error<SPI::Error>> {
        if let Some((_, resume)) = self.suspend_opcodes(op) {
            self.write_enable()?;
            self.spi.write(&[resume])?;
        }
        self.busy = BusyState::running(op);
        Ok(())
    }

    /// Make the array readable: returns the operation to resume once the
    /// read is done.
    fn prepare_read(&mut self) -> Result<Option<Operation>, Error<SPI::Error>> {
        let op = match self.busy {
            BusyState::Idle => return Ok(None),
            BusyState::Suspended(op) => return Ok(Some(op)),
            BusyState::Programming => Operation::Program,
            BusyState::Erasing => Operation::Erase,
        };

        if !self.chip_busy()? {
            self.busy = BusyState::Idle;
            return Ok(None);
        }

        match self.suspend_opcodes(op) {
            Some((suspend, _)) => {
                trace!("suspending {:?}", op);
                self.write_enable()?;
                self.spi.write(&[suspend])?;
                // Micron only suspends once the flag status has been read.
                self.poll_ready()?;
                self.busy = BusyState::Suspended(op);
                Ok(Some(op))
            }
            None => {
                self.wait()?;
                Ok(None)
            }
        }
    }

    /// Opcode plus 3 or 4 address bytes, depending on the addressing mode.
    fn command(&self, opcode: u8, addr: u32) -> ([u8; 5], usize) {
        let a = addr.to_be_bytes();
        if self.caps.contains(Capabilities::ADDR_32BIT) {
            ([opcode, a[0], a[1], a[2], a[3]], 5)
        } else {
            ([opcode, a[1], a[2], a[3], 0], 4)
        }
    }

    /// Read `buf.len()` bytes at `addr`, suspending an outstanding erase
    /// (or program, where supported) for the duration of the read.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error<SPI::Error>> {
        let resume = self.prepare_read()?;

        let mut addr = addr;
        let mut rest = buf;
        while !rest.is_empty() {
            let mut len = rest.len();
            if self.caps.contains(Capabilities::MULTI_DIE) {
                let to_die_end = (DIE_SIZE - (addr & (DIE_SIZE - 1))) as usize;
                len = len.min(to_die_end);
            }
            let (now, later) = rest.split_at_mut(len);

            let (cmd, n) = self.command(opcode::READ, addr);
            self.spi.transaction(&mut [SpiOp::Write(&cmd[..n]), SpiOp::Read(now)])?;

            addr = addr.wrapping_add(len as u32);
            rest = later;
        }

        if let Some(op) = resume {
            trace!("resuming {:?}", op);
            self.resume(op)?;
        }

        Ok(())
    }

    /// Program `data` at `addr`, one command per 256-byte page touched.
    ///
    /// The target must be erased, programming only clears bits.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI::Error>> {
        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            self.settle()?;
            self.write_enable()?;

            let room = PAGE_SIZE - (addr as usize & (PAGE_SIZE - 1));
            let (page, rest) = data.split_at(data.len().min(room));

            let (cmd, n) = self.command(opcode::PAGE_PROGRAM, addr);
            self.spi.transaction(&mut [SpiOp::Write(&cmd[..n]), SpiOp::Write(page)])?;
            self.busy = BusyState::Programming;

            addr = addr.wrapping_add(page.len() as u32);
            data = rest;
        }
        Ok(())
    }

    /// Start erasing the block containing `addr`.
    pub fn erase_block(&mut self, addr: u32) -> Result<(), Error<SPI::Error>> {
        self.settle()?;
        self.write_enable()?;

        let (cmd, n) = self.command(opcode::BLOCK_ERASE, addr);
        self.spi.write(&cmd[..n])?;
        self.busy = BusyState::Erasing;

        debug!("erasing block {:#x}", addr);
        Ok(())
    }

    /// Wait for any outstanding program or erase to finish.
    pub fn flush(&mut self) -> Result<(), Error<SPI::Error>> {
        self.settle()
    }
}
