// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::Error;
use crate::image;
use consts::OTA_START_ADDR;
use std::fmt;
use std::io::{Read, Write};
use update_protocol::{Status, PAYLOAD_SIZE};

/// Status byte as answered by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusByte(pub u8);

impl StatusByte {
    pub fn decode(self) -> Option<Status> {
        Status::from_byte(self.0)
    }
}

impl fmt::Display for StatusByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Some(status) => write!(f, "'{}' ({status})", self.0 as char),
            None => write!(f, "unknown status {:#04x}", self.0),
        }
    }
}

/// Send `image` one record at a time, waiting for the status byte of each.
///
/// Stops at the first record the device does not answer with
/// [`Status::Written`].
pub fn flash<L: Read + Write>(link: &mut L, image: &[u8]) -> Result<usize, Error> {
    let records = image::records(image)?;
    let count = records.len();

    for (index, record) in records.enumerate() {
        link.write_all(record)?;
        link.flush()?;

        let mut reply = [0u8; 1];
        link.read_exact(&mut reply)?;
        let status = StatusByte(reply[0]);

        let target = OTA_START_ADDR as usize + index * PAYLOAD_SIZE;
        tracing::debug!("record {index}/{count} for {target:#06x}: {status}");
        if status.decode() != Some(Status::Written) {
            return Err(Error::Rejected { index, status });
        }
    }
    Ok(count)
}
