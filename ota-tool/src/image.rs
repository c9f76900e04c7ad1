// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Update image generation.
//!
//! An image is the `[OTA_START_ADDR, OTA_END_ADDR)` part of a raw firmware
//! binary cut into one [`UpdateChunk`] per flash page and encrypted as a
//! single CBC stream, so records must be sent in order.

use crate::error::Error;
use consts::{OTA_END_ADDR, OTA_START_ADDR};
use crc::{Crc, CRC_32_ISCSI};
use std::path::{Path, PathBuf};
use std::slice::ChunksExact;
use update_protocol::{ChunkEncryptor, UpdateChunk, KEY, PAYLOAD_SIZE, RECORD_SIZE};

pub fn generate(firmware: &[u8]) -> Result<Vec<u8>, Error> {
    let start = OTA_START_ADDR as usize;
    let end = firmware.len().min(OTA_END_ADDR as usize);
    if end <= start {
        return Err(Error::ImageTooSmall {
            len: firmware.len(),
        });
    }

    let data = &firmware[start..end];
    // bounded by the update window, always fits
    let total_size = data.len() as u16;

    let mut encryptor = ChunkEncryptor::new(&KEY);
    let mut image = Vec::with_capacity(data.len().div_ceil(PAYLOAD_SIZE) * RECORD_SIZE);
    for (i, payload) in data.chunks(PAYLOAD_SIZE).enumerate() {
        let target_addr = OTA_START_ADDR + (i * PAYLOAD_SIZE) as u16;
        let mut chunk = UpdateChunk::new(target_addr, total_size, payload);
        encryptor.encrypt(&mut chunk);
        image.extend_from_slice(chunk.as_bytes());
    }

    tracing::debug!(
        "{} bytes of firmware in {} records",
        data.len(),
        image.len() / RECORD_SIZE
    );
    Ok(image)
}

/// Split an encrypted image into its records.
pub fn records(image: &[u8]) -> Result<ChunksExact<'_, u8>, Error> {
    if image.is_empty() || image.len() % RECORD_SIZE != 0 {
        return Err(Error::Truncated { len: image.len() });
    }
    Ok(image.chunks_exact(RECORD_SIZE))
}

/// CRC-32C of the image, logged so two images can be told apart.
pub fn fingerprint(image: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISCSI).checksum(image)
}

/// `firmware.bin` becomes `firmware.bin.enc`.
pub fn default_output(firmware: &Path) -> PathBuf {
    let mut name = firmware.as_os_str().to_owned();
    name.push(".enc");
    PathBuf::from(name)
}
