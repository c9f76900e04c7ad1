// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{Error, SpiNor, BLOCK_SIZE};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashError, NorFlashErrorKind,
    ReadNorFlash,
};

impl<E: core::fmt::Debug> NorFlashError for Error<E> {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

fn from_kind<E>(kind: NorFlashErrorKind) -> Error<E> {
    match kind {
        NorFlashErrorKind::NotAligned => Error::NotAligned,
        _ => Error::OutOfBounds,
    }
}

impl<SPI, D> ErrorType for SpiNor<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type Error = Error<SPI::Error>;
}

impl<SPI, D> ReadNorFlash for SpiNor<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len()).map_err(from_kind)?;
        SpiNor::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        SpiNor::capacity(self) as usize
    }
}

impl<SPI, D> NorFlash for SpiNor<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = BLOCK_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to).map_err(from_kind)?;
        let step = self.block_size();
        if from % step != 0 || to % step != 0 {
            return Err(Error::NotAligned);
        }
        for addr in (from..to).step_by(step as usize) {
            self.erase_block(addr)?;
        }
        self.flush()
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len()).map_err(from_kind)?;
        SpiNor::write(self, offset, bytes)
    }
}
