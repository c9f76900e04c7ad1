// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to device firmware update protocol.
//! The host streams fixed-size AES-128-CBC encrypted records over UART during
//! the boot window; the device answers every record with one status byte.
//! Shared by the bootloader and the host side `ota-tool`.

#![no_std]

mod chunk;
mod cipher;


pub use chunk::{cksum16, TargetBounds, UpdateChunk};
pub use cipher::{ChunkDecryptor, ChunkEncryptor, KEY};

/// Magic value leading every decrypted record.
pub const OTA_MAGIC: u16 = 0x1337;

/// Size of the record header (magic, target address, total size, checksum).
pub const HEADER_SIZE: usize = 8;

/// Payload bytes per record, exactly one internal flash page.
pub const PAYLOAD_SIZE: usize = consts::FLASH_PAGE as usize;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// Padding bytes that round the record up to a whole number of cipher blocks.
pub const PAD_SIZE: usize = BLOCK_SIZE - (HEADER_SIZE + PAYLOAD_SIZE) % BLOCK_SIZE;

/// Size of one record on the wire.
pub const RECORD_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE + PAD_SIZE;

const _: () = assert!(RECORD_SIZE % BLOCK_SIZE == 0);

/// Status byte sent back by the device after every record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    /// Record validated and its page written
    Written = b'V',
    /// Decrypted record does not start with `OTA_MAGIC`
    BadMagic = b'M',
    /// Checksum over the decrypted record does not match
    BadChecksum = b'C',
    /// Target address below the writable window
    AddressTooLow = b'S',
    /// Target address at or above the end of the writable window
    AddressTooHigh = b'E',
}

impl Status {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'V' => Some(Status::Written),
            b'M' => Some(Status::BadMagic),
            b'C' => Some(Status::BadChecksum),
            b'S' => Some(Status::AddressTooLow),
            b'E' => Some(Status::AddressTooHigh),
            _ => None,
        }
    }
}

/// Reason a decrypted record was discarded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    BadMagic,
    BadChecksum,
    AddressTooLow,
    AddressTooHigh,
}

impl From<Rejection> for Status {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::BadMagic => Status::BadMagic,
            Rejection::BadChecksum => Status::BadChecksum,
            Rejection::AddressTooLow => Status::AddressTooLow,
            Rejection::AddressTooHigh => Status::AddressTooHigh,
        }
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Status::Written => "written",
            Status::BadMagic => "bad magic",
            Status::BadChecksum => "bad checksum",
            Status::AddressTooLow => "address below update window",
            Status::AddressTooHigh => "address above update window",
        };
        f.write_str(text)
    }
}
