// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{BusyState, Error, SpiNor, PAGE_SIZE};
use consts::{DEFAULT_EXT_CMDS, EXT_CMDS_ADDR};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation as SpiOp, SpiDevice};

/// Opcodes used for the side region, provisioned at [`EXT_CMDS_ADDR`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExternalCommandSet {
    pub read: u8,
    pub write: u8,
    pub erase: u8,
}

impl Default for ExternalCommandSet {
    fn default() -> Self {
        Self::from_bytes(DEFAULT_EXT_CMDS)
    }
}

impl ExternalCommandSet {
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            read: bytes[0],
            write: bytes[1],
            erase: bytes[2],
        }
    }

    pub const fn to_bytes(self) -> [u8; 3] {
        [self.read, self.write, self.erase]
    }
}

fn ext_command(opcode: u8, addr: u32) -> [u8; 4] {
    let a = addr.to_be_bytes();
    [opcode, a[1], a[2], a[3]]
}

impl<SPI, D> SpiNor<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn ext_cmds(&self) -> ExternalCommandSet {
        self.ext_cmds
    }

    /// Reload the command set from its reserved offset.
    pub fn load_ext_cmds(&mut self) -> Result<ExternalCommandSet, Error<SPI::Error>> {
        let mut raw = [0u8; 3];
        self.read(EXT_CMDS_ADDR, &mut raw)?;
        self.ext_cmds = ExternalCommandSet::from_bytes(raw);
        debug!("ext cmds {:?}", self.ext_cmds);
        Ok(self.ext_cmds)
    }

    /// Provision a new command set. Erases the whole block holding
    /// [`EXT_CMDS_ADDR`].
    pub fn store_ext_cmds(&mut self, cmds: ExternalCommandSet) -> Result<(), Error<SPI::Error>> {
        self.erase_block(EXT_CMDS_ADDR)?;
        self.write(EXT_CMDS_ADDR, &cmds.to_bytes())?;
        self.load_ext_cmds()?;
        Ok(())
    }

    /// Read up to 256 bytes of the side region, returns the count read.
    pub fn read_ext(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Error<SPI::Error>> {
        self.settle()?;

        let len = buf.len().min(PAGE_SIZE);
        let cmd = ext_command(self.ext_cmds.read, addr);
        self.spi.transaction(&mut [
            SpiOp::Write(&cmd),
            // dummy byte
            SpiOp::Write(&[0]),
            SpiOp::Read(&mut buf[..len]),
        ])?;

        Ok(len)
    }

    /// Program up to 256 bytes of the side region, returns the count
    /// written.
    pub fn write_ext(&mut self, addr: u32, data: &[u8]) -> Result<usize, Error<SPI::Error>> {
        if data.is_empty() {
            return Ok(0);
        }
        self.settle()?;
        self.write_enable()?;

        let data = &data[..data.len().min(PAGE_SIZE)];
        let cmd = ext_command(self.ext_cmds.write, addr);
        self.spi.transaction(&mut [SpiOp::Write(&cmd), SpiOp::Write(data)])?;
        self.busy = BusyState::Programming;

        Ok(data.len())
    }

    pub fn erase_block_ext(&mut self, addr: u32) -> Result<(), Error<SPI::Error>> {
        self.settle()?;
        self.write_enable()?;

        self.spi.write(&ext_command(self.ext_cmds.erase, addr))?;
        self.busy = BusyState::Erasing;
        Ok(())
    }
}
