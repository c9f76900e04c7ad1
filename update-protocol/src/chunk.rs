// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{Rejection, HEADER_SIZE, OTA_MAGIC, PAD_SIZE, PAYLOAD_SIZE, RECORD_SIZE};
use consts::{OTA_END_ADDR, OTA_START_ADDR};

const MAGIC: usize = 0;
const TARGET_ADDR: usize = 2;
const TOTAL_SIZE: usize = 4;
const CHECKSUM: usize = 6;

/// 16-bit end-around-carry sum of little-endian half-words.
///
/// A trailing odd byte is zero-extended, never read past the slice.
pub fn cksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]) as u32)
        .fold(0u32, u32::wrapping_add);

    sum = (sum & 0xffff) + (sum >> 16);
    sum = (sum & 0xffff) + (sum >> 16);

    sum as u16
}

/// Writable window of internal flash offsets, `lower..upper`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetBounds {
    pub lower: u16,
    pub upper: u16,
}

impl Default for TargetBounds {
    fn default() -> Self {
        Self {
            lower: OTA_START_ADDR,
            upper: OTA_END_ADDR,
        }
    }
}

/// One update record: `{magic, target_addr, total_size, checksum}` header,
/// one page of payload and padding to the cipher block size.
///
/// All header fields are little-endian. The checksum covers the full record
/// with the checksum field itself zeroed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdateChunk {
    bytes: [u8; RECORD_SIZE],
}

impl Default for UpdateChunk {
    fn default() -> Self {
        Self::from_bytes([0; RECORD_SIZE])
    }
}

impl UpdateChunk {
    pub const fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a plaintext record for `target_addr` and seal its checksum.
    ///
    /// Padding follows the host image generator: `PAD_SIZE` bytes of value
    /// `PAD_SIZE` after the payload, and a short payload is filled up to the
    /// record size with bytes equal to the number of missing bytes.
    pub fn new(target_addr: u16, total_size: u16, payload: &[u8]) -> Self {
        let payload = &payload[..payload.len().min(PAYLOAD_SIZE)];
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[MAGIC..MAGIC + 2].copy_from_slice(&OTA_MAGIC.to_le_bytes());
        bytes[TARGET_ADDR..TARGET_ADDR + 2].copy_from_slice(&target_addr.to_le_bytes());
        bytes[TOTAL_SIZE..TOTAL_SIZE + 2].copy_from_slice(&total_size.to_le_bytes());

        let data_end = HEADER_SIZE + payload.len();
        bytes[HEADER_SIZE..data_end].copy_from_slice(payload);
        let pad_end = data_end + PAD_SIZE;
        bytes[data_end..pad_end].fill(PAD_SIZE as u8);
        let missing = RECORD_SIZE - pad_end;
        bytes[pad_end..].fill(missing as u8);

        let mut chunk = Self { bytes };
        chunk.seal();
        chunk
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; RECORD_SIZE] {
        &mut self.bytes
    }

    fn field(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    pub fn magic(&self) -> u16 {
        self.field(MAGIC)
    }

    /// Destination offset relative to the internal flash base.
    pub fn target_addr(&self) -> u16 {
        self.field(TARGET_ADDR)
    }

    /// Size of the whole update image this record belongs to.
    pub fn total_size(&self) -> u16 {
        self.field(TOTAL_SIZE)
    }

    pub fn checksum(&self) -> u16 {
        self.field(CHECKSUM)
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        self.bytes[CHECKSUM..CHECKSUM + 2].copy_from_slice(&checksum.to_le_bytes());
    }

    /// The `PAYLOAD_SIZE` bytes destined for one page.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..HEADER_SIZE + PAYLOAD_SIZE]
    }

    /// Payload as the little-endian words loaded into the flash page buffer.
    pub fn payload_words(&self) -> [u32; PAYLOAD_SIZE / 4] {
        let mut words = [0u32; PAYLOAD_SIZE / 4];
        for (word, bytes) in words.iter_mut().zip(self.payload().chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        words
    }

    /// Checksum of the record computed with the checksum field zeroed.
    pub fn compute_checksum(&self) -> u16 {
        let mut zeroed = self.bytes;
        zeroed[CHECKSUM..CHECKSUM + 2].fill(0);
        cksum16(&zeroed)
    }

    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.set_checksum(checksum);
    }

    pub fn checksum_matches(&self) -> bool {
        self.checksum() == self.compute_checksum()
    }

    /// Validate a decrypted record, in order: magic, checksum, lower bound,
    /// upper bound. The first failing check decides the rejection.
    pub fn validate(&self, bounds: &TargetBounds) -> Result<(), Rejection> {
        if self.magic() != OTA_MAGIC {
            return Err(Rejection::BadMagic);
        }
        if !self.checksum_matches() {
            return Err(Rejection::BadChecksum);
        }
        let target = self.target_addr();
        if target < bounds.lower {
            return Err(Rejection::AddressTooLow);
        }
        if target >= bounds.upper {
            return Err(Rejection::AddressTooHigh);
        }
        Ok(())
    }
}
